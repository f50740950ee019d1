//! Frame type and pixel conversion: RGBA buffers, YUYV/RGB24 unpacking,
//! canonical 640×480 capture frames.

use image::imageops::{self, FilterType};
use image::RgbaImage;

/// Width of the canonical frame every capture is normalized to.
pub const CANONICAL_WIDTH: u32 = 640;
/// Height of the canonical frame every capture is normalized to.
pub const CANONICAL_HEIGHT: u32 = 480;

/// A captured camera frame in packed RGBA order.
#[derive(Clone)]
pub struct Frame {
    /// RGBA pixel data (width * height * 4 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl Frame {
    /// Wrap an RGBA buffer, checking that it covers `width * height` pixels.
    pub fn from_rgba(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence: 0,
        })
    }

    /// A frame filled with a single RGB color (alpha 255).
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * 4);
        for _ in 0..pixels {
            data.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
        }
        Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }

    /// RGB triple at (x, y). Caller guarantees the coordinate is in bounds.
    #[inline]
    pub fn rgb(&self, x: u32, y: u32) -> (u8, u8, u8) {
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        (self.data[idx], self.data[idx + 1], self.data[idx + 2])
    }

    /// Mutable RGBA slot at (x, y), used by tests and synthetic sources.
    pub fn set_rgb(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        self.data[idx..idx + 3].copy_from_slice(&rgb);
        self.data[idx + 3] = 255;
    }

    /// Copy the frame into an `image` buffer.
    pub fn to_image(&self) -> Result<RgbaImage, FrameError> {
        RgbaImage::from_raw(self.width, self.height, self.data.clone()).ok_or(
            FrameError::InvalidLength {
                expected: self.width as usize * self.height as usize * 4,
                actual: self.data.len(),
            },
        )
    }

    /// Build a frame from an `image` buffer, keeping timestamp/sequence of `like`.
    fn from_image(img: RgbaImage, like: &Frame) -> Self {
        let (width, height) = img.dimensions();
        Self {
            data: img.into_raw(),
            width,
            height,
            timestamp: like.timestamp,
            sequence: like.sequence,
        }
    }

    /// Normalize to the canonical 640×480 capture frame.
    ///
    /// The larger dimension (relative to 4:3) is center-cropped so the aspect
    /// ratio is preserved, then the crop is resampled to 640×480.
    pub fn to_canonical(&self) -> Result<Frame, FrameError> {
        if self.is_empty() {
            return Err(FrameError::Empty);
        }
        let (x, y, w, h) = center_crop_4_3(self.width, self.height);
        let img = self.to_image()?;
        let cropped = imageops::crop_imm(&img, x, y, w, h).to_image();
        let resized = if (w, h) == (CANONICAL_WIDTH, CANONICAL_HEIGHT) {
            cropped
        } else {
            imageops::resize(&cropped, CANONICAL_WIDTH, CANONICAL_HEIGHT, FilterType::Triangle)
        };
        Ok(Self::from_image(resized, self))
    }
}

/// Largest centered 4:3 window inside a `width × height` frame: (x, y, w, h).
pub fn center_crop_4_3(width: u32, height: u32) -> (u32, u32, u32, u32) {
    let (w, h) = (width as u64, height as u64);
    if w * 3 > h * 4 {
        // Too wide: trim left/right.
        let crop_w = (h * 4 / 3).max(1);
        (((w - crop_w) / 2) as u32, 0, crop_w as u32, height)
    } else {
        // Too tall (or exact): trim top/bottom.
        let crop_h = (w * 3 / 4).max(1);
        (0, ((h - crop_h) / 2) as u32, width, crop_h as u32)
    }
}

/// Convert packed YUYV (4:2:2) to RGBA using BT.601 coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_rgba(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = width as usize * height as usize;
    let expected = pixels * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgba = Vec::with_capacity(pixels * 4);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            let r = y + 1.402 * v;
            let g = y - 0.344_136 * u - 0.714_136 * v;
            let b = y + 1.772 * u;
            rgba.push(r.round().clamp(0.0, 255.0) as u8);
            rgba.push(g.round().clamp(0.0, 255.0) as u8);
            rgba.push(b.round().clamp(0.0, 255.0) as u8);
            rgba.push(255);
        }
    }
    Ok(rgba)
}

/// Expand packed RGB24 to RGBA.
pub fn rgb24_to_rgba(rgb: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = width as usize * height as usize;
    let expected = pixels * 3;
    if rgb.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: rgb.len(),
        });
    }
    let mut rgba = Vec::with_capacity(pixels * 4);
    for px in rgb[..expected].chunks_exact(3) {
        rgba.extend_from_slice(&[px[0], px[1], px[2], 255]);
    }
    Ok(rgba)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("frame has no pixels")]
    Empty,
    #[error("decode failed: {0}")]
    Decode(String),
}
