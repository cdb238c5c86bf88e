use std::sync::Arc;

use anyhow::Result;
use facematch_core::{ExtractorAdapter, ExtractorHandle, FacePipeline, OnnxExtractor};
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod dbus_interface;

use config::{Bus, Config};
use dbus_interface::{FaceMatchService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(
        model_dir = %config.model_dir.display(),
        match_threshold = config.match_threshold,
        verify_threshold = ?config.verify_threshold,
        max_payload_bytes = config.max_payload_bytes,
        bus = ?config.bus,
        "facematchd starting"
    );

    let handle = ExtractorHandle::lazy(OnnxExtractor::loader(&config.model_dir));
    let pipeline = Arc::new(FacePipeline::new(
        ExtractorAdapter::new(handle),
        config.match_config(),
    ));

    if config.preload {
        tracing::info!("pre-loading face recognition models");
        let p = Arc::clone(&pipeline);
        match tokio::task::spawn_blocking(move || p.preload()).await? {
            Ok(()) => tracing::info!("models loaded"),
            Err(e) => tracing::warn!(
                error = %e,
                "could not pre-load models; serving anyway, health will report the failure"
            ),
        }
    }

    let builder = match config.bus {
        Bus::Session => zbus::connection::Builder::session()?,
        Bus::System => zbus::connection::Builder::system()?,
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, FaceMatchService::new(pipeline))?
        .build()
        .await?;

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "facematchd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facematchd shutting down");

    Ok(())
}
