//! Face alignment via 4-DOF similarity transform.
//!
//! Warps a detected face into the canonical 112x112 RGB crop ArcFace expects,
//! either from five landmarks (least-squares fit to the InsightFace reference
//! points) or, without landmarks, by scaling the bounding box to fit.

use crate::types::{BoundingBox, PixelBuffer};

/// ArcFace reference landmarks for a 112x112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: usize = 112;

/// Similarity transform `dst = [[a, -b], [b, a]] * src + [tx, ty]`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Least-squares estimate mapping `src` landmarks onto `dst`.
    fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        // Normal equations for the overdetermined system in [a, b, tx, ty]:
        //   sx * a - sy * b + tx = dx
        //   sy * a + sx * b + ty = dy
        let mut ata = [[0.0f32; 4]; 4];
        let mut atb = [0.0f32; 4];

        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst) {
            for (row, rhs) in [([sx, -sy, 1.0, 0.0], dx), ([sy, sx, 0.0, 1.0], dy)] {
                for j in 0..4 {
                    for k in 0..4 {
                        ata[j][k] += row[j] * row[k];
                    }
                    atb[j] += row[j] * rhs;
                }
            }
        }

        match solve_4x4(ata, atb) {
            Some([a, b, tx, ty]) => Self { a, b, tx, ty },
            None => Self::IDENTITY,
        }
    }

    /// Uniform scale placing `face` centered in the output square.
    fn fit_box(face: &BoundingBox, out_size: usize) -> Self {
        let side = face.width.max(face.height);
        if side <= 0.0 {
            return Self::IDENTITY;
        }
        let a = out_size as f32 / side;
        let cx = face.x + face.width / 2.0;
        let cy = face.y + face.height / 2.0;
        let half = out_size as f32 / 2.0;
        Self {
            a,
            b: 0.0,
            tx: half - a * cx,
            ty: half - a * cy,
        }
    }

    const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        tx: 0.0,
        ty: 0.0,
    };
}

/// Gaussian elimination with partial pivoting. `None` when singular.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(mut m: [[f32; 4]; 4], mut rhs: [f32; 4]) -> Option<[f32; 4]> {
    for col in 0..4 {
        let pivot_row = (col..4).max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))?;
        m.swap(col, pivot_row);
        rhs.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return None;
        }
        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..4 {
                m[row][j] -= factor * m[col][j];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        let tail: f32 = ((i + 1)..4).map(|j| m[i][j] * x[j]).sum();
        x[i] = (rhs[i] - tail) / m[i][i];
    }
    Some(x)
}

/// Inverse-map every output pixel through `t` and sample bilinearly.
/// Out-of-bounds samples are black.
fn warp(pixels: &PixelBuffer, t: &Similarity, out_size: usize) -> Vec<u8> {
    let mut out = vec![0u8; out_size * out_size * PixelBuffer::CHANNELS];

    let det = t.a * t.a + t.b * t.b;
    if det < 1e-12 {
        return out;
    }
    let ia = t.a / det;
    let ib = t.b / det;
    let w = pixels.width() as i32;
    let h = pixels.height() as i32;

    let sample = |x: i32, y: i32| -> [f32; 3] {
        if x >= 0 && x < w && y >= 0 && y < h {
            pixels.pixel(x as usize, y as usize).map(f32::from)
        } else {
            [0.0; 3]
        }
    };

    for oy in 0..out_size {
        for ox in 0..out_size {
            let dx = ox as f32 - t.tx;
            let dy = oy as f32 - t.ty;
            let sx = ia * dx + ib * dy;
            let sy = -ib * dx + ia * dy;

            let x0 = sx.floor() as i32;
            let y0 = sy.floor() as i32;
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            let tl = sample(x0, y0);
            let tr = sample(x0 + 1, y0);
            let bl = sample(x0, y0 + 1);
            let br = sample(x0 + 1, y0 + 1);

            let off = (oy * out_size + ox) * PixelBuffer::CHANNELS;
            for c in 0..PixelBuffer::CHANNELS {
                let v = tl[c] * (1.0 - fx) * (1.0 - fy)
                    + tr[c] * fx * (1.0 - fy)
                    + bl[c] * (1.0 - fx) * fy
                    + br[c] * fx * fy;
                out[off + c] = v.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    out
}

/// Produce the 112x112 interleaved RGB crop for a detected face.
pub fn align_face(pixels: &PixelBuffer, face: &BoundingBox) -> Vec<u8> {
    let transform = match &face.landmarks {
        Some(landmarks) => Similarity::estimate(landmarks, &REFERENCE_LANDMARKS_112),
        None => Similarity::fit_box(face, ALIGNED_SIZE),
    };
    warp(pixels, &transform, ALIGNED_SIZE)
}
