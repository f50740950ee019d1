//! Pixel statistics over RGBA frames: region color/brightness, skin-tone
//! classification, brightness histogram and a coarse frame hash.
//!
//! Every pass samples on a fixed stride so cost stays bounded on 1280×720
//! frames. Results are approximate.

use clockface_hw::Frame;
use serde::Serialize;

/// Spatial sampling stride (every 4th pixel in x and y).
pub const SAMPLE_STRIDE: usize = 4;
/// Histogram sampling stride (every 4th pixel of the flattened frame).
pub const HISTOGRAM_STRIDE: usize = 4;
/// Hash sampling stride over the flattened frame.
pub const HASH_STRIDE: usize = 64;
/// Number of brightness buckets (32 levels each).
pub const HISTOGRAM_BUCKETS: usize = 8;
/// Upper bound (exclusive) of `coarse_hash` values.
pub const HASH_RANGE: u32 = 1_000_000;

const FACE_SKIN_FRACTION: f32 = 0.10;
const FACE_MIN_BRIGHTNESS: f32 = 50.0;
const FACE_MAX_BRIGHTNESS: f32 = 220.0;

/// A sub-rectangle in fractions of the full frame (0.0–1.0 on each axis).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProportionalRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl ProportionalRect {
    pub const FULL: ProportionalRect = ProportionalRect::new(0.0, 0.0, 1.0, 1.0);

    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Pixel bounds `[x0, x1) × [y0, y1)`, clamped to the frame.
    fn to_pixels(self, width: u32, height: u32) -> (usize, usize, usize, usize) {
        let clamp = |v: f32, max: u32| (v.max(0.0) * max as f32).floor().min(max as f32) as usize;
        let x0 = clamp(self.x, width);
        let y0 = clamp(self.y, height);
        let x1 = clamp(self.x + self.width, width).max(x0);
        let y1 = clamp(self.y + self.height, height).max(y0);
        (x0, y0, x1, y1)
    }
}

/// Average color statistics of one region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RegionStats {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    /// Mean of (r + g + b) / 3 over sampled pixels.
    pub brightness: f32,
    /// Fraction of sampled pixels classified as skin.
    pub skin_fraction: f32,
    pub samples: usize,
}

impl RegionStats {
    /// Plausibly a face: enough skin-like pixels at a usable exposure.
    pub fn is_face_like(&self) -> bool {
        self.skin_fraction > FACE_SKIN_FRACTION
            && (FACE_MIN_BRIGHTNESS..=FACE_MAX_BRIGHTNESS).contains(&self.brightness)
    }
}

/// Skin-tone rule on a single RGB pixel.
#[inline]
pub fn is_skin_pixel(r: u8, g: u8, b: u8) -> bool {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    r > 95
        && g > 40
        && b > 20
        && max - min > 15
        && r as i16 - g as i16 > 15
        && r as i16 - b as i16 > 15
}

#[inline]
fn pixel_brightness(r: u8, g: u8, b: u8) -> f32 {
    (r as f32 + g as f32 + b as f32) / 3.0
}

/// Average R/G/B, brightness and skin fraction over a proportional region.
///
/// An empty region (or frame) yields all-zero stats with `samples == 0`.
pub fn analyze_region(frame: &Frame, rect: ProportionalRect) -> RegionStats {
    if frame.is_empty() {
        return RegionStats::default();
    }
    let (x0, y0, x1, y1) = rect.to_pixels(frame.width, frame.height);

    let (mut sr, mut sg, mut sb) = (0u64, 0u64, 0u64);
    let mut skin = 0usize;
    let mut samples = 0usize;

    for y in (y0..y1).step_by(SAMPLE_STRIDE) {
        for x in (x0..x1).step_by(SAMPLE_STRIDE) {
            let (r, g, b) = frame.rgb(x as u32, y as u32);
            sr += r as u64;
            sg += g as u64;
            sb += b as u64;
            if is_skin_pixel(r, g, b) {
                skin += 1;
            }
            samples += 1;
        }
    }

    if samples == 0 {
        return RegionStats::default();
    }
    let n = samples as f32;
    let (r, g, b) = (sr as f32 / n, sg as f32 / n, sb as f32 / n);
    RegionStats {
        r,
        g,
        b,
        brightness: (r + g + b) / 3.0,
        skin_fraction: skin as f32 / n,
        samples,
    }
}

/// Whole-frame average brightness (0.0–255.0).
pub fn average_brightness(frame: &Frame) -> f32 {
    analyze_region(frame, ProportionalRect::FULL).brightness
}

/// Brightness histogram in percent of sampled pixels per 32-level bucket.
///
/// Buckets sum to 100 for any non-empty frame; an empty frame gives zeros.
pub fn brightness_histogram(frame: &Frame) -> [f32; HISTOGRAM_BUCKETS] {
    let mut counts = [0u32; HISTOGRAM_BUCKETS];
    let mut total = 0u32;
    for px in frame.data.chunks_exact(4).step_by(HISTOGRAM_STRIDE) {
        let level = pixel_brightness(px[0], px[1], px[2]) as usize;
        counts[(level / 32).min(HISTOGRAM_BUCKETS - 1)] += 1;
        total += 1;
    }

    let mut hist = [0.0f32; HISTOGRAM_BUCKETS];
    if total > 0 {
        for (h, &c) in hist.iter_mut().zip(counts.iter()) {
            *h = c as f32 * 100.0 / total as f32;
        }
    }
    hist
}

/// Rotating hash over coarsely quantized brightness of sampled pixels.
///
/// Brightness is reduced to 32-level steps before hashing so small sensor
/// noise rarely changes the result. Output lies in `0..HASH_RANGE`.
pub fn coarse_hash(frame: &Frame) -> u32 {
    let mut hash: u32 = 0;
    for px in frame.data.chunks_exact(4).step_by(HASH_STRIDE) {
        let level = pixel_brightness(px[0], px[1], px[2]) as u32 >> 5;
        hash = hash.rotate_left(5).wrapping_add(level);
    }
    hash % HASH_RANGE
}

/// Exposure/contrast summary of a capture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityReport {
    pub brightness: f32,
    /// Standard deviation of sampled brightness.
    pub contrast: f32,
    /// 0–100; 60 or more is considered usable.
    pub score: u32,
}

impl QualityReport {
    pub fn is_good(&self) -> bool {
        self.score >= 60
    }
}

/// Score a frame on brightness and contrast bands.
pub fn quality_report(frame: &Frame) -> QualityReport {
    let levels: Vec<f32> = frame
        .data
        .chunks_exact(4)
        .step_by(HISTOGRAM_STRIDE)
        .map(|px| pixel_brightness(px[0], px[1], px[2]))
        .collect();

    let (brightness, contrast) = if levels.is_empty() {
        (0.0, 0.0)
    } else {
        let n = levels.len() as f32;
        let mean = levels.iter().sum::<f32>() / n;
        let variance = levels.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
        (mean, variance.sqrt())
    };

    let brightness_points = if (80.0..=180.0).contains(&brightness) {
        50
    } else if (60.0..=200.0).contains(&brightness) {
        30
    } else {
        10
    };
    let contrast_points = if contrast >= 40.0 {
        50
    } else if contrast >= 25.0 {
        30
    } else {
        10
    };

    QualityReport {
        brightness,
        contrast,
        score: brightness_points + contrast_points,
    }
}
