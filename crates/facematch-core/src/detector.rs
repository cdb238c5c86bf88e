//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three strides followed by NMS. Detection can run
//! enforced (only confident faces) or relaxed (fall back to the single best
//! low-confidence candidate).

use crate::types::{BoundingBox, PixelBuffer};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
/// Score floor for the relaxed second pass.
const SCRFD_RELAXED_THRESHOLD: f32 = 0.05;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Maps letterboxed model coordinates back to source image coordinates.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: usize, height: usize, target: usize) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: (target as f32 - new_w) / 2.0,
            pad_y: (target as f32 - new_h) / 2.0,
        }
    }

    fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor indices for one stride: (score, bbox, kps).
type StrideOutputIndices = (usize, usize, usize);

/// Raw tensors produced for one stride level.
struct StrideOutputs<'a> {
    stride: usize,
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    /// Per-stride output indices for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides x score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            stride_indices,
        })
    }

    /// Detect faces, most confident first.
    ///
    /// When `enforce` is false and nothing clears the confidence threshold,
    /// the best candidate above a low floor is returned on its own.
    pub fn detect(
        &mut self,
        pixels: &PixelBuffer,
        enforce: bool,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        let width = pixels.width() as usize;
        let height = pixels.height() as usize;
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let letterbox = Letterbox::fit(width, height, SCRFD_INPUT_SIZE);
        let input = preprocess(pixels, &letterbox);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let floor = if enforce {
            SCRFD_CONFIDENCE_THRESHOLD
        } else {
            SCRFD_RELAXED_THRESHOLD
        };

        let mut candidates = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[pos];
            let extract = |idx: usize, what: &'static str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| {
                        DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}"))
                    })
            };
            let level = StrideOutputs {
                stride,
                scores: extract(score_idx, "scores")?,
                bboxes: extract(bbox_idx, "bboxes")?,
                kps: extract(kps_idx, "kps")?,
            };
            candidates.extend(decode_stride(&level, SCRFD_INPUT_SIZE, &letterbox, floor));
        }

        Ok(select_faces(nms(candidates, SCRFD_NMS_THRESHOLD), enforce))
    }
}

/// Keep the confident faces. With `enforce` off and none confident, fall back
/// to the single strongest weak candidate.
fn select_faces(faces: Vec<BoundingBox>, enforce: bool) -> Vec<BoundingBox> {
    let (confident, weak): (Vec<_>, Vec<_>) = faces
        .into_iter()
        .partition(|f| f.confidence > SCRFD_CONFIDENCE_THRESHOLD);

    if !confident.is_empty() || enforce {
        return confident;
    }

    let best = weak
        .into_iter()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence));
    if let Some(face) = &best {
        tracing::debug!(confidence = face.confidence, "relaxed detection: using weak candidate");
    }
    best.into_iter().collect()
}

/// Letterbox an RGB image into a 640x640 NCHW tensor normalized for SCRFD.
fn preprocess(pixels: &PixelBuffer, letterbox: &Letterbox) -> Array4<f32> {
    let size = SCRFD_INPUT_SIZE;
    let src_w = pixels.width() as usize;
    let src_h = pixels.height() as usize;
    let new_w = (src_w as f32 * letterbox.scale).round() as usize;
    let new_h = (src_h as f32 * letterbox.scale).round() as usize;
    let pad_x0 = letterbox.pad_x.floor() as usize;
    let pad_y0 = letterbox.pad_y.floor() as usize;
    let inv_scale = 1.0 / letterbox.scale;

    // Padding normalizes to 0.0.
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for y in 0..new_h.min(size - pad_y0) {
        let src_y = (y as f32 + 0.5) * inv_scale - 0.5;
        for x in 0..new_w.min(size - pad_x0) {
            let src_x = (x as f32 + 0.5) * inv_scale - 0.5;
            let rgb = bilinear_rgb(pixels, src_x, src_y);
            for (c, value) in rgb.iter().enumerate() {
                tensor[[0, c, y + pad_y0, x + pad_x0]] = (value - SCRFD_MEAN) / SCRFD_STD;
            }
        }
    }

    tensor
}

/// Bilinear RGB sample with edge clamping.
fn bilinear_rgb(pixels: &PixelBuffer, sx: f32, sy: f32) -> [f32; 3] {
    let w = pixels.width() as i32;
    let h = pixels.height() as i32;
    let x0 = (sx.floor() as i32).clamp(0, w - 1);
    let y0 = (sy.floor() as i32).clamp(0, h - 1);
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = (sx - sx.floor()).clamp(0.0, 1.0);
    let fy = (sy - sy.floor()).clamp(0.0, 1.0);

    let tl = pixels.pixel(x0 as usize, y0 as usize);
    let tr = pixels.pixel(x1 as usize, y0 as usize);
    let bl = pixels.pixel(x0 as usize, y1 as usize);
    let br = pixels.pixel(x1 as usize, y1 as usize);

    std::array::from_fn(|c| {
        tl[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + tr[c] as f32 * fx * (1.0 - fy)
            + bl[c] as f32 * (1.0 - fx) * fy
            + br[c] as f32 * fx * fy
    })
}

/// Map SCRFD output tensors to stride slots.
///
/// Named exports ("score_8", "bbox_16", "kps_32", ...) are matched by name;
/// anything else falls back to the standard positional layout
/// [0-2] scores, [3-5] bboxes, [6-8] kps.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let mut named = [(0usize, 0usize, 0usize); 3];
    for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
        match (find("score", stride), find("bbox", stride), find("kps", stride)) {
            (Some(s), Some(b), Some(k)) => named[slot] = (s, b, k),
            _ => {
                tracing::info!(?names, "SCRFD: output names not recognized, using positional mapping");
                return [(0, 3, 6), (1, 4, 7), (2, 5, 8)];
            }
        }
    }
    tracing::info!("SCRFD: using name-based output tensor mapping");
    named
}

/// Decode detections above `threshold` for a single stride level.
fn decode_stride(
    level: &StrideOutputs<'_>,
    input_size: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let stride = level.stride as f32;
    let grid = input_size / level.stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;

    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = level.scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let Some(off) = level.bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_x = (cell % grid) as f32 * stride;
        let anchor_y = (cell / grid) as f32 * stride;

        let (x1, y1) = letterbox.to_source(anchor_x - off[0] * stride, anchor_y - off[1] * stride);
        let (x2, y2) = letterbox.to_source(anchor_x + off[2] * stride, anchor_y + off[3] * stride);

        let landmarks = level.kps.get(idx * 10..idx * 10 + 10).map(|k| {
            std::array::from_fn(|i| {
                letterbox.to_source(anchor_x + k[i * 2] * stride, anchor_y + k[i * 2 + 1] * stride)
            })
        });

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }

    detections
}

/// Non-Maximum Suppression. Output is sorted by descending confidence.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// Intersection-over-Union between two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: conf,
            landmarks: None,
        }
    }

    #[test]
    fn test_select_faces_keeps_only_confident() {
        let faces = vec![
            make_bbox(0.0, 0.0, 10.0, 10.0, 0.9),
            make_bbox(50.0, 0.0, 10.0, 10.0, 0.2),
            make_bbox(90.0, 0.0, 10.0, 10.0, 0.7),
        ];
        for enforce in [true, false] {
            let kept = select_faces(faces.clone(), enforce);
            assert_eq!(kept.len(), 2);
            assert!(kept.iter().all(|f| f.confidence > SCRFD_CONFIDENCE_THRESHOLD));
        }
    }

    #[test]
    fn test_select_faces_enforced_drops_weak() {
        let faces = vec![make_bbox(0.0, 0.0, 10.0, 10.0, 0.3)];
        assert!(select_faces(faces, true).is_empty());
    }

    #[test]
    fn test_select_faces_relaxed_keeps_strongest_weak() {
        let faces = vec![
            make_bbox(0.0, 0.0, 10.0, 10.0, 0.1),
            make_bbox(50.0, 0.0, 10.0, 10.0, 0.35),
            make_bbox(90.0, 0.0, 10.0, 10.0, 0.2),
        ];
        let kept = select_faces(faces, false);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.35);
        assert_eq!(kept[0].x, 50.0);
    }

    #[test]
    fn test_select_faces_no_candidates() {
        assert!(select_faces(Vec::new(), false).is_empty());
        assert!(select_faces(Vec::new(), true).is_empty());
    }

    #[test]
    fn test_iou_identical() {
        let a = make_bbox(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(20.0, 20.0, 10.0, 10.0, 1.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_nms_keeps_strongest_of_overlap() {
        let result = nms(
            vec![
                make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
                make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
                make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
            ],
            0.4,
        );
        let confs: Vec<f32> = result.iter().map(|b| b.confidence).collect();
        assert_eq!(confs, vec![0.9, 0.7]);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_roundtrip() {
        let lb = Letterbox::fit(320, 240, 640);
        let (ox, oy) = (100.0f32, 50.0f32);
        let (rx, ry) = lb.to_source(ox * lb.scale + lb.pad_x, oy * lb.scale + lb.pad_y);
        assert!((rx - ox).abs() < 0.1 && (ry - oy).abs() < 0.1);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 80.0);
    }

    #[test]
    fn test_preprocess_shape_and_padding() {
        let pixels = PixelBuffer::from_rgb(vec![255; 64 * 32 * 3], 64, 32).unwrap();
        let lb = Letterbox::fit(64, 32, SCRFD_INPUT_SIZE);
        let t = preprocess(&pixels, &lb);
        assert_eq!(t.shape(), &[1, 3, 640, 640]);
        // Top padding rows stay at zero, image rows carry normalized white.
        assert_eq!(t[[0, 0, 0, 320]], 0.0);
        let white = (255.0 - SCRFD_MEAN) / SCRFD_STD;
        assert!((t[[0, 2, 320, 320]] - white).abs() < 1e-5);
    }

    #[test]
    fn test_preprocess_keeps_channels_distinct() {
        let data: Vec<u8> = [10u8, 128, 250].iter().copied().cycle().take(8 * 8 * 3).collect();
        let pixels = PixelBuffer::from_rgb(data, 8, 8).unwrap();
        let lb = Letterbox::fit(8, 8, SCRFD_INPUT_SIZE);
        let t = preprocess(&pixels, &lb);
        let r = t[[0, 0, 100, 100]];
        let g = t[[0, 1, 100, 100]];
        let b = t[[0, 2, 100, 100]];
        assert!(r < g && g < b);
    }

    #[test]
    fn test_decode_stride_threshold_and_mapping() {
        let grid = SCRFD_INPUT_SIZE / 32;
        let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        let mut bboxes = vec![0.0f32; anchors * 4];
        let kps = vec![0.0f32; anchors * 10];
        // Anchor 2 sits at cell 1 → (32, 0) in model space.
        scores[2] = 0.9;
        scores[4] = 0.3;
        bboxes[8..12].copy_from_slice(&[0.5, 0.0, 0.5, 1.0]);

        let level = StrideOutputs { stride: 32, scores: &scores, bboxes: &bboxes, kps: &kps };
        let identity = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };

        let strict = decode_stride(&level, SCRFD_INPUT_SIZE, &identity, 0.5);
        assert_eq!(strict.len(), 1);
        assert_eq!((strict[0].x, strict[0].y), (16.0, 0.0));
        assert_eq!((strict[0].width, strict[0].height), (32.0, 32.0));
        assert_eq!(strict[0].landmarks.unwrap()[0], (32.0, 0.0));

        let relaxed = decode_stride(&level, SCRFD_INPUT_SIZE, &identity, 0.05);
        assert_eq!(relaxed.len(), 2);
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(discover_output_indices(&names), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(discover_output_indices(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }
}
