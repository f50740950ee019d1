//! clockface-core: face descriptors for attendance verification.
//!
//! Two descriptor paths share one tagged type: the ONNX pipeline (SCRFD
//! detection, 2d106 landmarks, ArcFace embedding) and a heuristic synthesizer
//! built on pixel region statistics for when the models are unavailable.
//! The matcher compares a stored profile with a probe per descriptor kind.

pub mod alignment;
pub mod detector;
pub mod extractor;
pub mod heuristic;
pub mod landmarks;
pub mod matcher;
pub mod recognizer;
pub mod region;
pub mod types;

pub use detector::FaceDetector;
pub use extractor::{AnalyzerLoader, ExtractorError, FaceAnalyzer, ModelPaths, OnnxAnalyzer};
pub use heuristic::{HeuristicFeatures, HeuristicSynthesizer};
pub use matcher::{
    evaluate, CompareError, Comparison, DescriptorMatcher, Matcher, SecurityLevel,
    VerificationOutcome,
};
pub use types::{
    DetectionResult, DetectionTier, Descriptor, DescriptorError, DescriptorKind, Embedding,
    FaceBox,
};

use std::path::PathBuf;

/// System-wide model directory used when none is configured.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/clockface/models")
}
