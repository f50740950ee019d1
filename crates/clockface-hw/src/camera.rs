//! Camera acquisition: constraints, the stream traits the capture session
//! owns, and a V4L2 implementation via the `v4l` crate.

use crate::frame::{self, Frame};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("no camera found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("resolution {width}x{height} is below the required minimum {min_width}x{min_height}")]
    ResolutionTooLow {
        width: u32,
        height: u32,
        min_width: u32,
        min_height: u32,
    },
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("stream already stopped")]
    Stopped,
}

/// Which way the camera should face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingMode {
    /// Front-facing (towards the person clocking in).
    User,
    Environment,
}

/// Resolution and facing constraints for opening a live stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraConstraints {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub min_width: u32,
    pub min_height: u32,
    pub facing: FacingMode,
}

impl Default for CameraConstraints {
    fn default() -> Self {
        Self {
            ideal_width: 1280,
            ideal_height: 720,
            min_width: 640,
            min_height: 480,
            facing: FacingMode::User,
        }
    }
}

impl CameraConstraints {
    /// Check a negotiated resolution against the minimum.
    pub fn accept(&self, width: u32, height: u32) -> Result<(), CameraError> {
        if width < self.min_width || height < self.min_height {
            return Err(CameraError::ResolutionTooLow {
                width,
                height,
                min_width: self.min_width,
                min_height: self.min_height,
            });
        }
        Ok(())
    }
}

/// Something that can hand out an exclusive live video stream.
pub trait CameraSource: Send {
    fn open(&self, constraints: &CameraConstraints) -> Result<Box<dyn VideoStream>, CameraError>;
}

/// An open live stream. Dropping it must release the device.
pub trait VideoStream: Send {
    /// Pull the most recent frame.
    fn latest_frame(&mut self) -> Result<Frame, CameraError>;
    /// Number of tracks still holding the device (0 once stopped).
    fn active_tracks(&self) -> usize;
    /// Release the device. Idempotent.
    fn stop(&mut self);
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Packed RGB24 (3 bytes/pixel).
    Rgb24,
    /// Motion-JPEG, one JPEG per buffer.
    Mjpeg,
}

/// V4L2 camera addressed by device path (e.g. "/dev/video0").
pub struct V4lCamera {
    device_path: String,
}

impl V4lCamera {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
        }
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .filter_map(|i| {
                let path = format!("/dev/video{i}");
                if !Path::new(&path).exists() {
                    return None;
                }
                let dev = Device::with_path(&path).ok()?;
                let caps = dev.query_caps().ok()?;
                if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                    return None;
                }
                Some(DeviceInfo {
                    path,
                    name: caps.card.clone(),
                    driver: caps.driver.clone(),
                    bus: caps.bus.clone(),
                })
            })
            .collect()
    }
}

impl CameraSource for V4lCamera {
    fn open(&self, constraints: &CameraConstraints) -> Result<Box<dyn VideoStream>, CameraError> {
        let path = self.device_path.as_str();
        if !Path::new(path).exists() {
            return Err(CameraError::DeviceNotFound(path.to_string()));
        }

        let device = Device::with_path(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                CameraError::PermissionDenied(format!("{path}: {e}"))
            }
            _ if e.to_string().contains("busy") || e.to_string().contains("EBUSY") => {
                CameraError::DeviceBusy
            }
            _ => CameraError::DeviceNotFound(format!("{path}: {e}")),
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::DeviceNotFound(format!(
                "{path}: not a video capture device"
            )));
        }
        if constraints.facing != FacingMode::User {
            tracing::debug!(device = path, "V4L2 has no facing mode; using device as-is");
        }

        let mut fmt = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = constraints.ideal_width;
        fmt.height = constraints.ideal_height;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to set format: {e}")))?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"RGB3") {
            PixelFormat::Rgb24
        } else if fourcc == FourCC::new(b"MJPG") {
            PixelFormat::Mjpeg
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, RGB3 or MJPG)"
            )));
        };
        constraints.accept(negotiated.width, negotiated.height)?;

        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, 4)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        tracing::info!(
            device = path,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "camera stream started"
        );

        Ok(Box::new(V4lStream {
            live: Some(LiveStream { _device: device, stream }),
            width: negotiated.width,
            height: negotiated.height,
            pixel_format,
            device_path: path.to_string(),
        }))
    }
}

/// Device handle and its mapped buffers; dropped together on stop.
struct LiveStream {
    // Field order matters: the stream unmaps before the device closes.
    stream: MmapStream<'static>,
    _device: Device,
}

struct V4lStream {
    live: Option<LiveStream>,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    device_path: String,
}

impl V4lStream {
    fn to_rgba(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgba(buf, self.width, self.height)
                .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}"))),
            PixelFormat::Rgb24 => frame::rgb24_to_rgba(buf, self.width, self.height)
                .map_err(|e| CameraError::CaptureFailed(format!("RGB24 conversion failed: {e}"))),
            PixelFormat::Mjpeg => {
                let decoded = image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)
                    .map_err(|e| CameraError::CaptureFailed(format!("MJPEG decode failed: {e}")))?;
                Ok(decoded.to_rgba8().into_raw())
            }
        }
    }
}

impl VideoStream for V4lStream {
    fn latest_frame(&mut self) -> Result<Frame, CameraError> {
        let live = self.live.as_mut().ok_or(CameraError::Stopped)?;
        let (buf, meta) = live
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        let sequence = meta.sequence;
        let buf = buf.to_vec();

        let rgba = self.to_rgba(&buf)?;
        let mut frame = Frame::from_rgba(rgba, self.width, self.height)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))?;
        frame.sequence = sequence;
        Ok(frame)
    }

    fn active_tracks(&self) -> usize {
        usize::from(self.live.is_some())
    }

    fn stop(&mut self) {
        if self.live.take().is_some() {
            tracing::info!(device = %self.device_path, "camera stream released");
        }
    }
}

impl Drop for V4lStream {
    fn drop(&mut self) {
        self.stop();
    }
}
