//! Heuristic face descriptor used when the ONNX pipeline is unavailable.
//!
//! Samples fixed proportional face regions, whole-frame brightness, the
//! brightness histogram, skin-blob geometry and the coarse frame hash. All
//! numbers are quantized so two captures of a similar frame serialize to
//! (nearly) the same descriptor.

use crate::region::{self, ProportionalRect, RegionStats};
use crate::types::DetectionResult;
use chrono::{DateTime, Utc};
use clockface_hw::Frame;
use serde::{Deserialize, Serialize};

pub const EYES: ProportionalRect = ProportionalRect::new(0.25, 0.30, 0.50, 0.15);
pub const NOSE: ProportionalRect = ProportionalRect::new(0.40, 0.40, 0.20, 0.20);
pub const MOUTH: ProportionalRect = ProportionalRect::new(0.30, 0.65, 0.40, 0.15);
pub const CHEEKS: ProportionalRect = ProportionalRect::new(0.15, 0.45, 0.70, 0.20);
/// Central area where a framed face is expected.
pub const FACE_AREA: ProportionalRect = ProportionalRect::new(0.25, 0.15, 0.50, 0.70);

/// Confidence reported by the presence check when the face area looks like skin.
pub const HEURISTIC_PRESENT_CONFIDENCE: f32 = 0.75;

const BRIGHTNESS_QUANTUM: f32 = 5.0;
const GEOMETRY_QUANTUM: f32 = 5.0;

/// Rounded color statistics of one face region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub brightness: u8,
}

impl From<RegionStats> for RegionColor {
    fn from(stats: RegionStats) -> Self {
        let q = |v: f32| v.round().clamp(0.0, 255.0) as u8;
        Self {
            r: q(stats.r),
            g: q(stats.g),
            b: q(stats.b),
            brightness: q(stats.brightness),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegions {
    pub eyes: RegionColor,
    pub nose: RegionColor,
    pub mouth: RegionColor,
    pub cheeks: RegionColor,
}

/// Geometry of the skin-colored blob, in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceGeometry {
    pub center_x: u32,
    pub center_y: u32,
    pub radius: u32,
    /// Blob width / height, two decimals; 0 when no skin was found.
    pub aspect_ratio: f32,
}

/// The heuristic descriptor object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeuristicFeatures {
    pub regions: FaceRegions,
    /// Whole-frame brightness, quantized to multiples of 5.
    pub brightness: u32,
    /// Brightness histogram in percent, one decimal.
    pub histogram: [f32; region::HISTOGRAM_BUCKETS],
    pub geometry: FaceGeometry,
    pub hash: u32,
    /// Capture time, Unix milliseconds.
    pub timestamp: i64,
}

/// Builds heuristic descriptors and runs the cheap presence check.
pub struct HeuristicSynthesizer;

impl HeuristicSynthesizer {
    /// Derive a descriptor from a frame. Never fails; a blank frame yields
    /// a degenerate (all-zero) descriptor.
    pub fn synthesize(&self, frame: &Frame, captured_at: DateTime<Utc>) -> HeuristicFeatures {
        let regions = FaceRegions {
            eyes: region::analyze_region(frame, EYES).into(),
            nose: region::analyze_region(frame, NOSE).into(),
            mouth: region::analyze_region(frame, MOUTH).into(),
            cheeks: region::analyze_region(frame, CHEEKS).into(),
        };

        let brightness = quantize(region::average_brightness(frame), BRIGHTNESS_QUANTUM) as u32;
        let histogram = region::brightness_histogram(frame).map(|v| (v * 10.0).round() / 10.0);

        HeuristicFeatures {
            regions,
            brightness,
            histogram,
            geometry: skin_geometry(frame),
            hash: region::coarse_hash(frame),
            timestamp: captured_at.timestamp_millis(),
        }
    }

    /// Cheap per-tick presence check over the central face area.
    pub fn presence(&self, frame: &Frame) -> DetectionResult {
        let stats = region::analyze_region(frame, FACE_AREA);
        if stats.is_face_like() {
            DetectionResult {
                present: true,
                confidence: HEURISTIC_PRESENT_CONFIDENCE,
                ..DetectionResult::default()
            }
        } else {
            DetectionResult::absent()
        }
    }
}

fn quantize(value: f32, step: f32) -> f32 {
    (value / step).round() * step
}

/// Centroid, equivalent-circle radius and bounding-box aspect of skin pixels.
fn skin_geometry(frame: &Frame) -> FaceGeometry {
    let stride = region::SAMPLE_STRIDE;
    let (mut sum_x, mut sum_y, mut count) = (0u64, 0u64, 0u64);
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0u32, 0u32);

    for y in (0..frame.height).step_by(stride) {
        for x in (0..frame.width).step_by(stride) {
            let (r, g, b) = frame.rgb(x, y);
            if region::is_skin_pixel(r, g, b) {
                sum_x += x as u64;
                sum_y += y as u64;
                count += 1;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }
    }

    if count == 0 {
        return FaceGeometry {
            center_x: frame.width / 2,
            center_y: frame.height / 2,
            radius: 0,
            aspect_ratio: 0.0,
        };
    }

    let cx = sum_x as f32 / count as f32;
    let cy = sum_y as f32 / count as f32;
    // Each sample stands for a stride×stride block.
    let area = count as f32 * (stride * stride) as f32;
    let radius = (area / std::f32::consts::PI).sqrt();
    let blob_w = (max_x - min_x) as f32 + stride as f32;
    let blob_h = (max_y - min_y) as f32 + stride as f32;

    FaceGeometry {
        center_x: quantize(cx, GEOMETRY_QUANTUM) as u32,
        center_y: quantize(cy, GEOMETRY_QUANTUM) as u32,
        radius: quantize(radius, GEOMETRY_QUANTUM) as u32,
        aspect_ratio: (blob_w / blob_h * 100.0).round() / 100.0,
    }
}
