use crate::heuristic::HeuristicFeatures;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Confidence above which a detection is good enough to capture.
pub const ACCEPT_CONFIDENCE: f32 = 0.7;
/// Confidence from which a detection counts as a (low-quality) face.
pub const LOW_QUALITY_CONFIDENCE: f32 = 0.4;

/// Embedding lengths accepted for registration (dlib-style and ArcFace).
pub const SUPPORTED_EMBEDDING_DIMS: [usize; 2] = [128, 512];

/// Bounding box for a detected face, with optional five-point landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl FaceBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Face embedding vector produced by the recognition model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_mbf").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        cosine_similarity(&self.values, &other.values)
    }

    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        euclidean_distance(&self.values, &other.values)
    }

    /// Scale to unit L2 norm; a zero vector is returned unchanged.
    pub fn l2_normalized(mut self) -> Self {
        let norm = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            self.values.iter_mut().for_each(|x| *x /= norm);
        }
        self
    }

    /// Component-wise mean of several samples, re-normalized.
    ///
    /// Returns `None` for an empty slice or when sample lengths disagree.
    pub fn mean(samples: &[Embedding]) -> Option<Embedding> {
        let first = samples.first()?;
        let dim = first.values.len();
        if samples.iter().any(|s| s.values.len() != dim) {
            return None;
        }
        let mut acc = vec![0.0f32; dim];
        for sample in samples {
            for (a, v) in acc.iter_mut().zip(&sample.values) {
                *a += v;
            }
        }
        let n = samples.len() as f32;
        acc.iter_mut().for_each(|a| *a /= n);
        Some(
            Embedding {
                values: acc,
                model_version: first.model_version.clone(),
            }
            .l2_normalized(),
        )
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 0.0 {
        dot / denom
    } else {
        0.0
    }
}

pub(crate) fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Per-tick outcome of running detection over a frame.
#[derive(Debug, Clone, Default)]
pub struct DetectionResult {
    pub present: bool,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
    pub face: Option<FaceBox>,
    pub embedding: Option<Embedding>,
    /// Dense landmark points, opaque to callers.
    pub landmarks: Option<Vec<(f32, f32)>>,
}

impl DetectionResult {
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn tier(&self) -> DetectionTier {
        DetectionTier::classify(self.present, self.confidence)
    }
}

/// Detection quality bands driving the capture affordance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionTier {
    /// No face, or confidence below 0.4.
    Absent,
    /// Face seen with confidence in [0.4, 0.7]; capture stays disabled.
    LowQuality,
    /// Confidence above 0.7; capture allowed.
    Detected,
}

impl DetectionTier {
    pub fn classify(present: bool, confidence: f32) -> Self {
        if !present {
            DetectionTier::Absent
        } else if confidence > ACCEPT_CONFIDENCE {
            DetectionTier::Detected
        } else if confidence >= LOW_QUALITY_CONFIDENCE {
            DetectionTier::LowQuality
        } else {
            DetectionTier::Absent
        }
    }
}

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("descriptor JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("embedding is empty")]
    Empty,
    #[error("embedding contains non-finite values")]
    NonFinite,
    #[error("unsupported embedding length {0} (expected 128 or 512)")]
    UnsupportedLength(usize),
    #[error("capture too dark (brightness {0})")]
    TooDark(u32),
    #[error("capture washed out (brightness {0})")]
    TooBright(u32),
    #[error("capture histogram is empty")]
    FlatHistogram,
}

/// Which pipeline produced a descriptor. The two are never comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorKind {
    MlEmbedding,
    Heuristic,
}

/// Serialized facial features sent to the verification endpoint.
///
/// On the wire the ML variant is a bare JSON array and the heuristic variant
/// a JSON object, so the shape itself carries the tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Descriptor {
    MlEmbedding(Vec<f32>),
    HeuristicFeatures(HeuristicFeatures),
}

const MIN_REGISTER_BRIGHTNESS: u32 = 20;
const MAX_REGISTER_BRIGHTNESS: u32 = 240;

impl Descriptor {
    pub fn kind(&self) -> DescriptorKind {
        match self {
            Descriptor::MlEmbedding(_) => DescriptorKind::MlEmbedding,
            Descriptor::HeuristicFeatures(_) => DescriptorKind::Heuristic,
        }
    }

    /// JSON string form used in request bodies.
    pub fn encode(&self) -> Result<String, DescriptorError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(json: &str) -> Result<Self, DescriptorError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Quality/format gate applied before a descriptor is stored as a profile.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        match self {
            Descriptor::MlEmbedding(values) => {
                if values.is_empty() {
                    return Err(DescriptorError::Empty);
                }
                if values.iter().any(|v| !v.is_finite()) {
                    return Err(DescriptorError::NonFinite);
                }
                if !SUPPORTED_EMBEDDING_DIMS.contains(&values.len()) {
                    return Err(DescriptorError::UnsupportedLength(values.len()));
                }
                Ok(())
            }
            Descriptor::HeuristicFeatures(features) => {
                if features.brightness < MIN_REGISTER_BRIGHTNESS {
                    return Err(DescriptorError::TooDark(features.brightness));
                }
                if features.brightness > MAX_REGISTER_BRIGHTNESS {
                    return Err(DescriptorError::TooBright(features.brightness));
                }
                if features.histogram.iter().all(|&h| h == 0.0) {
                    return Err(DescriptorError::FlatHistogram);
                }
                Ok(())
            }
        }
    }
}

impl From<Embedding> for Descriptor {
    fn from(embedding: Embedding) -> Self {
        Descriptor::MlEmbedding(embedding.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristic::HeuristicSynthesizer;
    use chrono::{TimeZone, Utc};
    use clockface_hw::Frame;

    fn emb(values: Vec<f32>) -> Embedding {
        Embedding { values, model_version: None }
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = emb(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&a.clone()) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        assert_eq!(emb(vec![0.0, 0.0]).similarity(&emb(vec![1.0, 0.0])), 0.0);
    }

    #[test]
    fn test_euclidean_distance() {
        let d = emb(vec![0.0, 0.0]).euclidean_distance(&emb(vec![3.0, 4.0]));
        assert!((d - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_mean_is_normalized_average() {
        let mean = Embedding::mean(&[emb(vec![1.0, 0.0]), emb(vec![0.0, 1.0])]).unwrap();
        let expected = std::f32::consts::FRAC_1_SQRT_2;
        assert!((mean.values[0] - expected).abs() < 1e-6);
        assert!((mean.values[1] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_mean_rejects_mismatched_lengths() {
        assert!(Embedding::mean(&[emb(vec![1.0]), emb(vec![1.0, 0.0])]).is_none());
        assert!(Embedding::mean(&[]).is_none());
    }

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(DetectionTier::classify(true, 0.2), DetectionTier::Absent);
        assert_eq!(DetectionTier::classify(true, 0.4), DetectionTier::LowQuality);
        assert_eq!(DetectionTier::classify(true, 0.5), DetectionTier::LowQuality);
        assert_eq!(DetectionTier::classify(true, 0.7), DetectionTier::LowQuality);
        assert_eq!(DetectionTier::classify(true, 0.8), DetectionTier::Detected);
        assert_eq!(DetectionTier::classify(false, 0.99), DetectionTier::Absent);
    }

    #[test]
    fn test_ml_descriptor_is_json_array() {
        let d = Descriptor::MlEmbedding(vec![0.5, -0.25]);
        let json = d.encode().unwrap();
        assert_eq!(json, "[0.5,-0.25]");
        let back = Descriptor::decode(&json).unwrap();
        assert_eq!(back.kind(), DescriptorKind::MlEmbedding);
    }

    #[test]
    fn test_heuristic_descriptor_is_json_object() {
        let frame = Frame::solid(64, 48, [180, 130, 100]);
        let at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let d = Descriptor::HeuristicFeatures(HeuristicSynthesizer.synthesize(&frame, at));
        let json = d.encode().unwrap();
        assert!(json.starts_with('{'));
        assert_eq!(Descriptor::decode(&json).unwrap().kind(), DescriptorKind::Heuristic);
    }

    #[test]
    fn test_validate_embedding() {
        assert!(Descriptor::MlEmbedding(vec![0.1; 128]).validate().is_ok());
        assert!(Descriptor::MlEmbedding(vec![0.1; 512]).validate().is_ok());
        assert!(matches!(
            Descriptor::MlEmbedding(vec![]).validate(),
            Err(DescriptorError::Empty)
        ));
        assert!(matches!(
            Descriptor::MlEmbedding(vec![0.1; 64]).validate(),
            Err(DescriptorError::UnsupportedLength(64))
        ));
        let mut bad = vec![0.1; 128];
        bad[3] = f32::NAN;
        assert!(matches!(
            Descriptor::MlEmbedding(bad).validate(),
            Err(DescriptorError::NonFinite)
        ));
    }

    #[test]
    fn test_validate_heuristic_exposure() {
        let at = Utc.timestamp_millis_opt(0).unwrap();
        let dark = HeuristicSynthesizer.synthesize(&Frame::solid(32, 32, [5, 5, 5]), at);
        assert!(matches!(
            Descriptor::HeuristicFeatures(dark).validate(),
            Err(DescriptorError::TooDark(5))
        ));
        let ok = HeuristicSynthesizer.synthesize(&Frame::solid(32, 32, [150, 120, 100]), at);
        assert!(Descriptor::HeuristicFeatures(ok).validate().is_ok());
    }

    #[test]
    fn test_validate_blank_frame_descriptor() {
        let at = Utc.timestamp_millis_opt(0).unwrap();
        let blank = HeuristicSynthesizer.synthesize(&Frame::solid(0, 0, [0, 0, 0]), at);
        assert!(Descriptor::HeuristicFeatures(blank).validate().is_err());
    }
}
