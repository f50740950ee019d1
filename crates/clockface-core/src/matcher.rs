//! Descriptor comparison and the verification outcome contract.
//!
//! The comparator branches on the descriptor tag: ML embeddings use Euclidean
//! distance on unit vectors, heuristic descriptors a weighted blend of
//! Euclidean, cosine and Manhattan distance over their normalized feature
//! vector. Descriptors of different kinds are never compared.

use crate::heuristic::HeuristicFeatures;
use crate::types::{cosine_similarity, euclidean_distance, Descriptor, DescriptorKind};
use clockface_hw::{CANONICAL_HEIGHT, CANONICAL_WIDTH};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const REASON_NOT_REGISTERED: &str = "Face not registered";
pub const REASON_NO_MATCH: &str = "Face does not match";
pub const REASON_FORMAT_MISMATCH: &str = "Face descriptor format mismatch";

#[derive(Error, Debug, PartialEq)]
pub enum CompareError {
    #[error("cannot compare {stored:?} profile with {probe:?} capture")]
    IncompatibleDescriptors {
        stored: DescriptorKind,
        probe: DescriptorKind,
    },
    #[error("embedding lengths differ: {0} vs {1}")]
    LengthMismatch(usize, usize),
}

/// How confident a positive match is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    High,
    Medium,
    Low,
}

/// Distance cut-offs for one descriptor kind. Lower distance = more similar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchPolicy {
    pub tolerance: f32,
    pub high: f32,
    pub medium: f32,
}

impl MatchPolicy {
    pub const ML: MatchPolicy = MatchPolicy {
        tolerance: 1.10,
        high: 0.80,
        medium: 0.95,
    };
    pub const HEURISTIC: MatchPolicy = MatchPolicy {
        tolerance: 0.30,
        high: 0.15,
        medium: 0.22,
    };

    fn level(&self, distance: f32) -> Option<SecurityLevel> {
        if distance <= self.high {
            Some(SecurityLevel::High)
        } else if distance <= self.medium {
            Some(SecurityLevel::Medium)
        } else if distance <= self.tolerance {
            Some(SecurityLevel::Low)
        } else {
            None
        }
    }
}

/// Result of comparing a stored profile with a probe.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub kind: DescriptorKind,
    pub matched: bool,
    pub distance: f32,
    pub security_level: Option<SecurityLevel>,
}

/// Strategy for comparing a stored descriptor with a fresh capture.
pub trait Matcher {
    fn compare(&self, stored: &Descriptor, probe: &Descriptor) -> Result<Comparison, CompareError>;
}

/// Tag-dispatching matcher with one policy per descriptor kind.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorMatcher {
    pub ml: MatchPolicy,
    pub heuristic: MatchPolicy,
}

impl Default for DescriptorMatcher {
    fn default() -> Self {
        Self {
            ml: MatchPolicy::ML,
            heuristic: MatchPolicy::HEURISTIC,
        }
    }
}

impl Matcher for DescriptorMatcher {
    fn compare(&self, stored: &Descriptor, probe: &Descriptor) -> Result<Comparison, CompareError> {
        let (distance, policy) = match (stored, probe) {
            (Descriptor::MlEmbedding(a), Descriptor::MlEmbedding(b)) => {
                if a.len() != b.len() {
                    return Err(CompareError::LengthMismatch(a.len(), b.len()));
                }
                (euclidean_distance(a, b), &self.ml)
            }
            (Descriptor::HeuristicFeatures(a), Descriptor::HeuristicFeatures(b)) => {
                (heuristic_distance(a, b), &self.heuristic)
            }
            _ => {
                return Err(CompareError::IncompatibleDescriptors {
                    stored: stored.kind(),
                    probe: probe.kind(),
                })
            }
        };

        let security_level = policy.level(distance);
        Ok(Comparison {
            kind: stored.kind(),
            matched: security_level.is_some(),
            distance,
            security_level,
        })
    }
}

/// Flatten heuristic features into a vector with every component in ~[0, 1].
pub fn heuristic_vector(f: &HeuristicFeatures) -> Vec<f32> {
    let mut v = Vec::with_capacity(32);
    for region in [f.regions.eyes, f.regions.nose, f.regions.mouth, f.regions.cheeks] {
        v.extend([region.r, region.g, region.b, region.brightness].map(|c| c as f32 / 255.0));
    }
    v.push(f.brightness as f32 / 255.0);
    v.extend(f.histogram.iter().map(|h| h / 100.0));
    v.push(f.geometry.center_x as f32 / CANONICAL_WIDTH as f32);
    v.push(f.geometry.center_y as f32 / CANONICAL_HEIGHT as f32);
    v.push(f.geometry.radius as f32 / CANONICAL_HEIGHT as f32);
    v.push(f.geometry.aspect_ratio / 2.0);
    v
}

/// `0.5·euclidean + 0.3·(1 − cosine) + 0.2·manhattan / n`.
pub fn heuristic_distance(a: &HeuristicFeatures, b: &HeuristicFeatures) -> f32 {
    let va = heuristic_vector(a);
    let vb = heuristic_vector(b);
    let euclidean = euclidean_distance(&va, &vb);
    let cosine = 1.0 - cosine_similarity(&va, &vb);
    let manhattan: f32 = va.iter().zip(&vb).map(|(x, y)| (x - y).abs()).sum();
    0.5 * euclidean + 0.3 * cosine + 0.2 * manhattan / va.len() as f32
}

/// Server response to a face or PIN verification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationOutcome {
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_level: Option<SecurityLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_use_pin: Option<bool>,
}

/// Verify a probe against a user's stored profile, producing the outcome the
/// verification endpoint returns.
pub fn evaluate(
    matcher: &dyn Matcher,
    profile: Option<&Descriptor>,
    probe: &Descriptor,
    pin_enabled: bool,
) -> VerificationOutcome {
    let rejected = |reason: &str, message: String, distance: Option<f32>| VerificationOutcome {
        verified: false,
        distance,
        security_level: None,
        reason: Some(reason.to_string()),
        message: Some(message),
        can_use_pin: Some(pin_enabled),
    };

    let Some(stored) = profile else {
        return rejected(
            REASON_NOT_REGISTERED,
            "No face profile is registered for this account".to_string(),
            None,
        );
    };

    match matcher.compare(stored, probe) {
        Ok(c) if c.matched => VerificationOutcome {
            verified: true,
            distance: Some(c.distance),
            security_level: c.security_level,
            reason: None,
            message: Some("Face verified".to_string()),
            can_use_pin: None,
        },
        Ok(c) => rejected(
            REASON_NO_MATCH,
            format!("Face does not match the registered profile (distance {:.3})", c.distance),
            Some(c.distance),
        ),
        Err(e) => rejected(REASON_FORMAT_MISMATCH, e.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristic::HeuristicSynthesizer;
    use chrono::{TimeZone, Utc};
    use clockface_hw::Frame;

    fn unit(dim: usize, hot: usize) -> Descriptor {
        let mut v = vec![0.0f32; dim];
        v[hot] = 1.0;
        Descriptor::MlEmbedding(v)
    }

    fn heuristic(rgb: [u8; 3]) -> Descriptor {
        let mut frame = Frame::solid(640, 480, [90, 90, 95]);
        for y in 100..380 {
            for x in 220..420 {
                frame.set_rgb(x, y, rgb);
            }
        }
        let at = Utc.timestamp_millis_opt(0).unwrap();
        Descriptor::HeuristicFeatures(HeuristicSynthesizer.synthesize(&frame, at))
    }

    #[test]
    fn test_identical_embeddings_match_high() {
        let c = DescriptorMatcher::default().compare(&unit(128, 0), &unit(128, 0)).unwrap();
        assert!(c.matched);
        assert_eq!(c.distance, 0.0);
        assert_eq!(c.security_level, Some(SecurityLevel::High));
    }

    #[test]
    fn test_orthogonal_embeddings_reject() {
        // Unit vectors at 90° are sqrt(2) ≈ 1.414 apart, above tolerance.
        let c = DescriptorMatcher::default().compare(&unit(128, 0), &unit(128, 1)).unwrap();
        assert!(!c.matched);
        assert!((c.distance - std::f32::consts::SQRT_2).abs() < 1e-6);
        assert_eq!(c.security_level, None);
    }

    #[test]
    fn test_security_tiers() {
        let p = MatchPolicy::ML;
        assert_eq!(p.level(0.5), Some(SecurityLevel::High));
        assert_eq!(p.level(0.9), Some(SecurityLevel::Medium));
        assert_eq!(p.level(1.0), Some(SecurityLevel::Low));
        assert_eq!(p.level(1.2), None);
    }

    #[test]
    fn test_mixed_kinds_are_incompatible() {
        let err = DescriptorMatcher::default()
            .compare(&unit(128, 0), &heuristic([205, 150, 120]))
            .unwrap_err();
        assert_eq!(
            err,
            CompareError::IncompatibleDescriptors {
                stored: DescriptorKind::MlEmbedding,
                probe: DescriptorKind::Heuristic,
            }
        );
    }

    #[test]
    fn test_length_mismatch() {
        let err = DescriptorMatcher::default().compare(&unit(128, 0), &unit(512, 0)).unwrap_err();
        assert_eq!(err, CompareError::LengthMismatch(128, 512));
    }

    #[test]
    fn test_heuristic_same_capture_matches() {
        let a = heuristic([205, 150, 120]);
        let c = DescriptorMatcher::default().compare(&a, &a.clone()).unwrap();
        assert!(c.matched);
        assert!(c.distance.abs() < 1e-6);
    }

    #[test]
    fn test_heuristic_distance_grows_with_difference() {
        let a = heuristic([205, 150, 120]);
        let near = heuristic([200, 146, 118]);
        let far = Descriptor::HeuristicFeatures(
            HeuristicSynthesizer.synthesize(&Frame::solid(640, 480, [20, 20, 200]), Utc.timestamp_millis_opt(0).unwrap()),
        );
        let m = DescriptorMatcher::default();
        let d_near = m.compare(&a, &near).unwrap().distance;
        let d_far = m.compare(&a, &far).unwrap().distance;
        assert!(d_near < d_far, "near {d_near} should be below far {d_far}");
        assert!(!m.compare(&a, &far).unwrap().matched);
    }

    #[test]
    fn test_heuristic_vector_length() {
        if let Descriptor::HeuristicFeatures(f) = heuristic([205, 150, 120]) {
            assert_eq!(heuristic_vector(&f).len(), 16 + 1 + 8 + 4);
        }
    }

    #[test]
    fn test_evaluate_not_registered() {
        let out = evaluate(&DescriptorMatcher::default(), None, &unit(128, 0), true);
        assert!(!out.verified);
        assert_eq!(out.reason.as_deref(), Some(REASON_NOT_REGISTERED));
        assert_eq!(out.can_use_pin, Some(true));
    }

    #[test]
    fn test_evaluate_no_match() {
        let stored = unit(128, 0);
        let out = evaluate(&DescriptorMatcher::default(), Some(&stored), &unit(128, 1), false);
        assert!(!out.verified);
        assert_eq!(out.reason.as_deref(), Some(REASON_NO_MATCH));
        assert_eq!(out.can_use_pin, Some(false));
        assert!(out.distance.is_some());
    }

    #[test]
    fn test_evaluate_match() {
        let stored = unit(128, 0);
        let out = evaluate(&DescriptorMatcher::default(), Some(&stored), &stored, true);
        assert!(out.verified);
        assert_eq!(out.security_level, Some(SecurityLevel::High));
        assert_eq!(out.can_use_pin, None);
    }

    #[test]
    fn test_outcome_wire_shape() {
        let json = r#"{"verified":false,"reason":"face does not match","canUsePin":true}"#;
        let out: VerificationOutcome = serde_json::from_str(json).unwrap();
        assert!(!out.verified);
        assert_eq!(out.can_use_pin, Some(true));
        assert_eq!(out.distance, None);

        let ok = VerificationOutcome {
            verified: true,
            distance: Some(0.5),
            security_level: Some(SecurityLevel::High),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_string(&ok).unwrap(),
            r#"{"verified":true,"distance":0.5,"securityLevel":"high"}"#
        );
    }
}
