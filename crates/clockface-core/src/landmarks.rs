//! 106-point facial landmark model (InsightFace 2d106det) via ONNX Runtime.

use crate::alignment::sample_bilinear;
use crate::types::FaceBox;
use clockface_hw::Frame;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const LANDMARK_INPUT_SIZE: usize = 192;
/// Crop side relative to the larger face box side.
const LANDMARK_CROP_SCALE: f32 = 1.5;
const LANDMARK_POINTS: usize = 106;

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Square crop window around a face, in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CropWindow {
    left: f32,
    top: f32,
    side: f32,
}

impl CropWindow {
    fn around(face: &FaceBox) -> Self {
        let side = face.width.max(face.height) * LANDMARK_CROP_SCALE;
        let cx = face.x + face.width / 2.0;
        let cy = face.y + face.height / 2.0;
        Self {
            left: cx - side / 2.0,
            top: cy - side / 2.0,
            side,
        }
    }

    /// Model output in [-1, 1] → frame coordinates.
    fn unmap(&self, nx: f32, ny: f32) -> (f32, f32) {
        (
            self.left + (nx + 1.0) / 2.0 * self.side,
            self.top + (ny + 1.0) / 2.0 * self.side,
        )
    }
}

pub struct LandmarkModel {
    session: Session,
}

impl LandmarkModel {
    pub fn load(model_path: &Path) -> Result<Self, LandmarkError> {
        if !model_path.exists() {
            return Err(LandmarkError::ModelNotFound(model_path.display().to_string()));
        }
        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;
        tracing::info!(path = %model_path.display(), "loaded landmark model");
        Ok(Self { session })
    }

    /// Locate the 106 landmark points of a detected face.
    pub fn locate(&mut self, frame: &Frame, face: &FaceBox) -> Result<Vec<(f32, f32)>, LandmarkError> {
        let window = CropWindow::around(face);
        let input = preprocess(frame, &window);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| LandmarkError::InferenceFailed(format!("landmark extraction: {e}")))?;

        if raw.len() < LANDMARK_POINTS * 2 {
            return Err(LandmarkError::InferenceFailed(format!(
                "expected {} landmark values, got {}",
                LANDMARK_POINTS * 2,
                raw.len()
            )));
        }
        Ok(raw
            .chunks_exact(2)
            .take(LANDMARK_POINTS)
            .map(|p| window.unmap(p[0], p[1]))
            .collect())
    }
}

/// Resample the crop window into a 192×192 NCHW tensor (raw 0–255 RGB).
fn preprocess(frame: &Frame, window: &CropWindow) -> Array4<f32> {
    let size = LANDMARK_INPUT_SIZE;
    let step = window.side / size as f32;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for v in 0..size {
        let sy = window.top + (v as f32 + 0.5) * step - 0.5;
        for u in 0..size {
            let sx = window.left + (u as f32 + 0.5) * step - 0.5;
            let px = sample_bilinear(frame, sx, sy);
            for c in 0..3 {
                tensor[[0, c, v, u]] = px[c];
            }
        }
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face() -> FaceBox {
        FaceBox { x: 100.0, y: 50.0, width: 80.0, height: 100.0, confidence: 0.9, landmarks: None }
    }

    #[test]
    fn test_crop_window_is_centered_square() {
        let w = CropWindow::around(&face());
        assert_eq!(w.side, 150.0);
        assert_eq!((w.left, w.top), (65.0, 25.0));
    }

    #[test]
    fn test_unmap_corners_and_center() {
        let w = CropWindow::around(&face());
        assert_eq!(w.unmap(-1.0, -1.0), (65.0, 25.0));
        assert_eq!(w.unmap(1.0, 1.0), (215.0, 175.0));
        assert_eq!(w.unmap(0.0, 0.0), (140.0, 100.0));
    }

    #[test]
    fn test_preprocess_shape_and_values() {
        let frame = Frame::solid(320, 240, [10, 20, 30]);
        let tensor = preprocess(&frame, &CropWindow::around(&face()));
        assert_eq!(tensor.shape(), &[1, 3, 192, 192]);
        let mid = LANDMARK_INPUT_SIZE / 2;
        assert!((tensor[[0, 2, mid, mid]] - 30.0).abs() < 1e-3);
    }
}
