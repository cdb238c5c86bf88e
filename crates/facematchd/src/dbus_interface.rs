use std::sync::Arc;

use facematch_core::FacePipeline;
use zbus::interface;

use crate::api::{self, Reply};

pub const BUS_NAME: &str = "org.facematch.FaceMatch1";
pub const OBJECT_PATH: &str = "/org/facematch/FaceMatch1";

/// D-Bus interface for the face matching daemon.
///
/// Every method takes a JSON request body and returns `(status, body)`,
/// where `status` follows HTTP conventions.
pub struct FaceMatchService {
    pipeline: Arc<FacePipeline>,
}

impl FaceMatchService {
    pub fn new(pipeline: Arc<FacePipeline>) -> Self {
        Self { pipeline }
    }

    /// Run a handler on the blocking pool; decoding and inference are CPU-bound.
    async fn run<F>(&self, op: &'static str, handler: F) -> zbus::fdo::Result<(u16, String)>
    where
        F: FnOnce(&FacePipeline) -> Reply + Send + 'static,
    {
        let pipeline = Arc::clone(&self.pipeline);
        let reply = tokio::task::spawn_blocking(move || handler(&pipeline))
            .await
            .map_err(|e| {
                tracing::error!(op, error = %e, "request handler panicked");
                zbus::fdo::Error::Failed(format!("{op} failed"))
            })?;
        tracing::debug!(op, status = reply.status, "request complete");
        Ok((reply.status, reply.body_string()))
    }
}

#[interface(name = "org.facematch.FaceMatch1")]
impl FaceMatchService {
    /// Extract the signature of the face in `{ "image": ... }`.
    #[zbus(out_args("status", "body"))]
    async fn encode(&self, request: &str) -> zbus::fdo::Result<(u16, String)> {
        let request = request.to_owned();
        self.run("encode", move |p| api::encode(p, &request)).await
    }

    /// Identify `{ "captured": ..., "stored": [...] }` against the supplied gallery.
    #[zbus(out_args("status", "body"))]
    async fn match_face(&self, request: &str) -> zbus::fdo::Result<(u16, String)> {
        let request = request.to_owned();
        self.run("match", move |p| api::match_face(p, &request)).await
    }

    /// Compare `{ "image1": ..., "image2": ... }`.
    #[zbus(out_args("status", "body"))]
    async fn verify(&self, request: &str) -> zbus::fdo::Result<(u16, String)> {
        let request = request.to_owned();
        self.run("verify", move |p| api::verify(p, &request)).await
    }

    /// Liveness probe; answers even when the model failed to load.
    #[zbus(out_args("status", "body"))]
    async fn health(&self) -> (u16, String) {
        let reply = api::health(&self.pipeline);
        (reply.status, reply.body_string())
    }
}
