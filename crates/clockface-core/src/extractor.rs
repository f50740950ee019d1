//! ML descriptor extraction: the three-model readiness gate and the
//! `FaceAnalyzer` seam the capture session drives every tick.

use crate::detector::{DetectorError, FaceDetector};
use crate::landmarks::{LandmarkError, LandmarkModel};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::DetectionResult;
use clockface_hw::Frame;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const LANDMARK_MODEL_FILE: &str = "2d106det.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_mbf.onnx";

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("model files missing: {}", .0.join(", "))]
    ModelsMissing(Vec<String>),
    #[error("model load timed out after {0:?}")]
    LoadTimeout(std::time::Duration),
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("landmarks: {0}")]
    Landmarks(#[from] LandmarkError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("analyzer lock poisoned by a panicked inference")]
    Poisoned,
    #[error("analyzer task failed: {0}")]
    Task(String),
}

/// Runs the full detection pipeline over one frame.
pub trait FaceAnalyzer: Send {
    /// Detection, landmarks and embedding for the most confident face.
    /// A frame without faces is `Ok` with `present == false`.
    fn analyze(&mut self, frame: &Frame) -> Result<DetectionResult, ExtractorError>;
}

/// Produces a ready analyzer, or fails as a whole.
pub trait AnalyzerLoader: Send + Sync {
    fn load(&self) -> Result<Box<dyn FaceAnalyzer>, ExtractorError>;
}

/// Locations of the three model artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub landmarks: PathBuf,
    pub recognizer: PathBuf,
}

impl ModelPaths {
    /// Standard file names inside a model directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            detector: dir.join(DETECTOR_MODEL_FILE),
            landmarks: dir.join(LANDMARK_MODEL_FILE),
            recognizer: dir.join(RECOGNIZER_MODEL_FILE),
        }
    }

    /// Paths that do not exist on disk.
    pub fn missing(&self) -> Vec<String> {
        [&self.detector, &self.landmarks, &self.recognizer]
            .into_iter()
            .filter(|p| !p.exists())
            .map(|p| p.display().to_string())
            .collect()
    }
}

impl AnalyzerLoader for ModelPaths {
    fn load(&self) -> Result<Box<dyn FaceAnalyzer>, ExtractorError> {
        Ok(Box::new(OnnxAnalyzer::load(self)?))
    }
}

/// SCRFD + 2d106 + ArcFace, loaded together.
pub struct OnnxAnalyzer {
    detector: FaceDetector,
    landmarks: LandmarkModel,
    recognizer: FaceRecognizer,
}

impl OnnxAnalyzer {
    /// Load all three models; any single failure fails the whole set.
    pub fn load(paths: &ModelPaths) -> Result<Self, ExtractorError> {
        let missing = paths.missing();
        if !missing.is_empty() {
            return Err(ExtractorError::ModelsMissing(missing));
        }
        let analyzer = Self {
            detector: FaceDetector::load(&paths.detector)?,
            landmarks: LandmarkModel::load(&paths.landmarks)?,
            recognizer: FaceRecognizer::load(&paths.recognizer)?,
        };
        tracing::info!("face model set ready");
        Ok(analyzer)
    }
}

impl FaceAnalyzer for OnnxAnalyzer {
    fn analyze(&mut self, frame: &Frame) -> Result<DetectionResult, ExtractorError> {
        let faces = self.detector.detect(frame)?;
        let Some(best) = faces.into_iter().next() else {
            return Ok(DetectionResult::absent());
        };

        let landmarks = self.landmarks.locate(frame, &best)?;
        let embedding = self.recognizer.extract(frame, &best)?;
        tracing::trace!(confidence = best.confidence, "face analyzed");

        Ok(DetectionResult {
            present: true,
            confidence: best.confidence,
            face: Some(best),
            embedding: Some(embedding),
            landmarks: Some(landmarks),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_paths_in_dir() {
        let paths = ModelPaths::in_dir(Path::new("/opt/models"));
        assert_eq!(paths.detector, PathBuf::from("/opt/models/det_10g.onnx"));
        assert_eq!(paths.landmarks, PathBuf::from("/opt/models/2d106det.onnx"));
        assert_eq!(paths.recognizer, PathBuf::from("/opt/models/w600k_mbf.onnx"));
    }

    #[test]
    fn test_load_reports_every_missing_model() {
        let paths = ModelPaths::in_dir(Path::new("/nonexistent-clockface-models"));
        match OnnxAnalyzer::load(&paths) {
            Err(ExtractorError::ModelsMissing(missing)) => assert_eq!(missing.len(), 3),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("load must fail without model files"),
        }
    }

    #[test]
    fn test_loader_trait_fails_atomically() {
        let loader: &dyn AnalyzerLoader = &ModelPaths::in_dir(Path::new("/nonexistent-clockface-models"));
        assert!(loader.load().is_err());
    }
}
