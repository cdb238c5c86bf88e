//! Request/response contracts for the Encode, Match, Verify and Health calls.
//!
//! Bodies are JSON; each reply carries an HTTP-style status code so callers
//! can tell client mistakes (4xx) from "recognized nothing" (401) and from
//! failures on our side (5xx).

use facematch_core::{FaceError, FacePipeline, GalleryEntry};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_UNAUTHORIZED: u16 = 401;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_INTERNAL: u16 = 500;
pub const STATUS_UNAVAILABLE: u16 = 503;

/// A status code and JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: Value,
}

impl Reply {
    fn ok(body: Value) -> Self {
        Self {
            status: STATUS_OK,
            body,
        }
    }

    fn failure(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "success": false, "message": message.into() }),
        }
    }

    /// Map a pipeline error to a reply. Server-side details are logged, not returned.
    fn from_error(op: &str, err: &FaceError) -> Self {
        match err {
            FaceError::EmptyGallery => Self::failure(STATUS_NOT_FOUND, err.to_string()),
            FaceError::ExtractorUnavailable(reason) => {
                tracing::error!(op, reason = %reason, "extractor unavailable");
                Self::failure(STATUS_UNAVAILABLE, "face recognition model unavailable")
            }
            e if e.is_client_fault() => {
                tracing::info!(op, kind = e.kind(), error = %e, "request rejected");
                Self::failure(STATUS_BAD_REQUEST, e.to_string())
            }
            _ => {
                tracing::error!(op, kind = err.kind(), error = %err, "request failed");
                Self::failure(STATUS_INTERNAL, "internal error while processing image")
            }
        }
    }

    pub fn body_string(&self) -> String {
        self.body.to_string()
    }
}

#[derive(Debug, Deserialize)]
struct EncodeRequest {
    image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MatchRequest {
    captured: Option<String>,
    stored: Option<Vec<GalleryEntry>>,
}

#[derive(Debug, Deserialize)]
struct VerifyRequest {
    image1: Option<String>,
    image2: Option<String>,
}

fn parse<T: DeserializeOwned>(op: &str, raw: &str) -> Result<T, Reply> {
    serde_json::from_str(raw).map_err(|e| {
        tracing::info!(op, error = %e, "malformed request body");
        Reply::failure(STATUS_BAD_REQUEST, format!("invalid request body: {e}"))
    })
}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T, Reply> {
    value.ok_or_else(|| Reply::from_error("validate", &FaceError::MissingInput(field)))
}

/// `{ image }` → `{ success, encoding, dimensions }`.
pub fn encode(pipeline: &FacePipeline, raw: &str) -> Reply {
    let run = || -> Result<Reply, Reply> {
        let req: EncodeRequest = parse("encode", raw)?;
        let image = required(req.image, "image")?;
        let signature = pipeline
            .encode(&image)
            .map_err(|e| Reply::from_error("encode", &e))?;
        let dimensions = signature.dimensions();
        Ok(Reply::ok(json!({
            "success": true,
            "encoding": signature.into_values(),
            "dimensions": dimensions,
        })))
    };
    run().unwrap_or_else(|reply| reply)
}

/// `{ captured, stored }` → `{ success, match: { userId, name, distance, confidence } }`,
/// or 401 with `bestDistance` when nobody is close enough.
pub fn match_face(pipeline: &FacePipeline, raw: &str) -> Reply {
    let run = || -> Result<Reply, Reply> {
        let req: MatchRequest = parse("match", raw)?;
        let captured = required(req.captured, "captured")?;
        let stored = required(req.stored, "stored")?;

        let decision = pipeline
            .match_face(&captured, &stored)
            .map_err(|e| Reply::from_error("match", &e))?;

        Ok(match decision.best_entry {
            Some(entry) if decision.accepted => Reply::ok(json!({
                "success": true,
                "match": {
                    "userId": entry.identity_id,
                    "name": entry.display_name,
                    "distance": decision.distance,
                    "confidence": decision.confidence_percent,
                },
            })),
            _ => Reply {
                status: STATUS_UNAUTHORIZED,
                body: json!({
                    "success": false,
                    "message": "Face not recognized",
                    "bestDistance": decision.distance,
                }),
            },
        })
    };
    run().unwrap_or_else(|reply| reply)
}

/// `{ image1, image2 }` → `{ success, verified, distance, threshold }`.
pub fn verify(pipeline: &FacePipeline, raw: &str) -> Reply {
    let run = || -> Result<Reply, Reply> {
        let req: VerifyRequest = parse("verify", raw)?;
        let image1 = required(req.image1, "image1")?;
        let image2 = required(req.image2, "image2")?;

        let decision = pipeline
            .verify(&image1, &image2)
            .map_err(|e| Reply::from_error("verify", &e))?;

        Ok(Reply::ok(json!({
            "success": true,
            "verified": decision.verified,
            "distance": decision.distance,
            "threshold": decision.threshold,
        })))
    };
    run().unwrap_or_else(|reply| reply)
}

/// Liveness check. Succeeds whatever state the extractor is in.
pub fn health(pipeline: &FacePipeline) -> Reply {
    let status = pipeline.extractor_status();
    let mut body = json!({
        "status": "ok",
        "service": "face-recognition",
        "version": env!("CARGO_PKG_VERSION"),
        "extractor": status.as_str(),
    });
    if let facematch_core::ExtractorStatus::Failed(reason) = &status {
        body["extractorError"] = Value::String(reason.clone());
    }
    Reply::ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use facematch_core::{
        DetectedFace, EmbeddingExtractor, ExtractorAdapter, ExtractorHandle, MatchConfig,
        PixelBuffer, Signature,
    };
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::Arc;

    /// Signature = mean colour; black images contain no face.
    struct MeanColour;

    impl EmbeddingExtractor for MeanColour {
        fn represent(
            &self,
            pixels: &PixelBuffer,
            _model_id: &str,
            _detector_id: &str,
            _enforce_detection: bool,
        ) -> Result<Vec<DetectedFace>, FaceError> {
            let raw = pixels.as_raw();
            if raw.iter().all(|&p| p == 0) {
                return Ok(Vec::new());
            }
            let n = (raw.len() / 3) as f32;
            let mut mean = vec![0.0f32; 3];
            for px in raw.chunks_exact(3) {
                for (m, &v) in mean.iter_mut().zip(px) {
                    *m += v as f32 / n;
                }
            }
            Ok(vec![DetectedFace {
                signature: Signature::new(mean)?,
                region: None,
            }])
        }

        fn native_threshold(&self) -> f64 {
            0.68
        }
    }

    fn pipeline() -> FacePipeline {
        let handle = ExtractorHandle::ready(Arc::new(MeanColour));
        FacePipeline::new(ExtractorAdapter::new(handle), MatchConfig::default())
    }

    fn broken_pipeline() -> FacePipeline {
        let handle = ExtractorHandle::lazy(|| {
            Err(FaceError::ExtractorUnavailable("w600k_r50.onnx missing".into()))
        });
        FacePipeline::new(ExtractorAdapter::new(handle), MatchConfig::default())
    }

    fn image(rgb: [u8; 3]) -> String {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(6, 6, Rgb(rgb)));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(out.into_inner())
        )
    }

    #[test]
    fn test_encode_success() {
        let body = json!({ "image": image([255, 0, 0]) }).to_string();
        let reply = encode(&pipeline(), &body);
        assert_eq!(reply.status, STATUS_OK);
        assert_eq!(reply.body["success"], true);
        assert_eq!(reply.body["dimensions"], 3);
        assert_eq!(reply.body["encoding"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_encode_missing_image() {
        let reply = encode(&pipeline(), "{}");
        assert_eq!(reply.status, STATUS_BAD_REQUEST);
        assert_eq!(reply.body["success"], false);
        assert!(reply.body["message"].as_str().unwrap().contains("image"));
    }

    #[test]
    fn test_encode_no_face_is_client_error() {
        let body = json!({ "image": image([0, 0, 0]) }).to_string();
        let reply = encode(&pipeline(), &body);
        assert_eq!(reply.status, STATUS_BAD_REQUEST);
        assert!(reply.body["message"].as_str().unwrap().contains("no face"));
    }

    #[test]
    fn test_malformed_json() {
        assert_eq!(encode(&pipeline(), "not json").status, STATUS_BAD_REQUEST);
    }

    #[test]
    fn test_match_accepted() {
        let body = json!({
            "captured": image([0, 0, 200]),
            "stored": [
                { "userId": "a", "name": "Red", "encoding": [1.0, 0.0, 0.0] },
                { "userId": "b", "name": "Blue", "encoding": [0.0, 0.0, 1.0] },
            ],
        })
        .to_string();
        let reply = match_face(&pipeline(), &body);
        assert_eq!(reply.status, STATUS_OK);
        assert_eq!(reply.body["match"]["userId"], "b");
        assert_eq!(reply.body["match"]["name"], "Blue");
        assert_eq!(reply.body["match"]["distance"], 0.0);
        assert_eq!(reply.body["match"]["confidence"], 100.0);
    }

    #[test]
    fn test_match_not_recognized_reports_best_distance() {
        let body = json!({
            "captured": image([0, 0, 200]),
            "stored": [{ "userId": "a", "name": "Red", "encoding": [1.0, 0.0, 0.0] }],
        })
        .to_string();
        let reply = match_face(&pipeline(), &body);
        assert_eq!(reply.status, STATUS_UNAUTHORIZED);
        assert_eq!(reply.body["success"], false);
        assert_eq!(reply.body["bestDistance"], 1.0);
    }

    /// Encoding at cosine distance `d` from the pure-blue capture used below.
    fn encoding_at(d: f32) -> Value {
        let cos = 1.0 - d;
        json!([(1.0 - cos * cos).sqrt(), 0.0, cos])
    }

    #[test]
    fn test_match_reply_numbers_are_rounded_on_the_wire() {
        let body = json!({
            "captured": image([0, 0, 200]),
            "stored": [{ "userId": "a", "name": "A", "encoding": encoding_at(0.1234) }],
        })
        .to_string();
        let reply = match_face(&pipeline(), &body);
        assert_eq!(reply.status, STATUS_OK);
        let wire = reply.body_string();
        assert!(wire.contains(r#""distance":0.1234"#), "{wire}");
        assert!(wire.contains(r#""confidence":87.7"#), "{wire}");
    }

    #[test]
    fn test_best_distance_is_rounded_on_the_wire() {
        let body = json!({
            "captured": image([0, 0, 200]),
            "stored": [{ "userId": "a", "name": "A", "encoding": encoding_at(0.55) }],
        })
        .to_string();
        let reply = match_face(&pipeline(), &body);
        assert_eq!(reply.status, STATUS_UNAUTHORIZED);
        let wire = reply.body_string();
        assert!(wire.contains(r#""bestDistance":0.55"#), "{wire}");
    }

    #[test]
    fn test_match_dimension_mismatch_is_server_fault() {
        let body = json!({
            "captured": image([0, 0, 200]),
            "stored": [{ "userId": "a", "name": "A", "encoding": [1.0, 0.0] }],
        })
        .to_string();
        let reply = match_face(&pipeline(), &body);
        assert_eq!(reply.status, STATUS_INTERNAL);
        assert_eq!(reply.body["success"], false);
        let message = reply.body["message"].as_str().unwrap();
        assert!(!message.contains("dimension"), "{message}");
    }

    #[test]
    fn test_match_empty_gallery() {
        let body = json!({ "captured": image([9, 9, 9]), "stored": [] }).to_string();
        let reply = match_face(&pipeline(), &body);
        assert_eq!(reply.status, STATUS_NOT_FOUND);
    }

    #[test]
    fn test_match_missing_stored() {
        let body = json!({ "captured": image([9, 9, 9]) }).to_string();
        assert_eq!(match_face(&pipeline(), &body).status, STATUS_BAD_REQUEST);
    }

    #[test]
    fn test_verify_same_image() {
        let img = image([10, 200, 30]);
        let body = json!({ "image1": img, "image2": img }).to_string();
        let reply = verify(&pipeline(), &body);
        assert_eq!(reply.status, STATUS_OK);
        assert_eq!(reply.body["verified"], true);
        assert_eq!(reply.body["distance"], 0.0);
        assert!(reply.body_string().contains(r#""threshold":0.68"#));
    }

    #[test]
    fn test_unavailable_extractor_is_server_fault() {
        let body = json!({ "image": image([1, 1, 1]) }).to_string();
        let reply = encode(&broken_pipeline(), &body);
        assert_eq!(reply.status, STATUS_UNAVAILABLE);
        assert!(!reply.body["message"].as_str().unwrap().contains("onnx"));
    }

    #[test]
    fn test_health_survives_broken_extractor() {
        let p = broken_pipeline();
        assert!(p.preload().is_err());
        let reply = health(&p);
        assert_eq!(reply.status, STATUS_OK);
        assert_eq!(reply.body["status"], "ok");
        assert_eq!(reply.body["extractor"], "failed");
        assert!(reply.body["extractorError"].is_string());
    }

    #[test]
    fn test_health_loaded() {
        assert_eq!(health(&pipeline()).body["extractor"], "loaded");
    }
}
