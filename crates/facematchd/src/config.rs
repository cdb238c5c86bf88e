use std::path::PathBuf;

use facematch_core::{MatchConfig, DEFAULT_MATCH_THRESHOLD, DEFAULT_MAX_PAYLOAD_BYTES};

/// Which message bus to register on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bus {
    Session,
    System,
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Cosine distance below which a gallery candidate is accepted.
    pub match_threshold: f64,
    /// Verification threshold override; unset uses the model's own.
    pub verify_threshold: Option<f64>,
    /// Largest accepted image payload, in bytes.
    pub max_payload_bytes: usize,
    /// Load the models before serving instead of on first request.
    pub preload: bool,
    pub bus: Bus,
}

impl Config {
    /// Load configuration from `FACEMATCH_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let parse_f64 = |key: &str| get(key).and_then(|v| v.trim().parse::<f64>().ok());

        Self {
            model_dir: get("FACEMATCH_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(facematch_core::default_model_dir),
            match_threshold: parse_f64("FACEMATCH_MATCH_THRESHOLD")
                .unwrap_or(DEFAULT_MATCH_THRESHOLD),
            verify_threshold: parse_f64("FACEMATCH_VERIFY_THRESHOLD"),
            max_payload_bytes: get("FACEMATCH_MAX_PAYLOAD_BYTES")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_MAX_PAYLOAD_BYTES),
            preload: get("FACEMATCH_PRELOAD").map(|v| v != "0").unwrap_or(true),
            bus: match get("FACEMATCH_BUS").as_deref() {
                Some("system") => Bus::System,
                _ => Bus::Session,
            },
        }
    }

    pub fn match_config(&self) -> MatchConfig {
        MatchConfig {
            match_threshold: self.match_threshold,
            verify_threshold: self.verify_threshold,
            max_payload_bytes: self.max_payload_bytes,
        }
    }
}
