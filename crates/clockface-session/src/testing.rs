//! Fakes for camera, analyzer, model loading and the server.

use crate::backend::{
    BackendError, FaceVerifyRequest, PinVerifyRequest, RegisterRequest, VerificationBackend,
};
use clockface_core::{
    AnalyzerLoader, DetectionResult, Embedding, ExtractorError, FaceAnalyzer, FaceBox,
    VerificationOutcome,
};
use clockface_hw::{CameraConstraints, CameraError, CameraSource, Frame, VideoStream};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 640×480 grey scene with a skin-colored block where a face would be.
pub fn face_frame() -> Frame {
    let mut frame = Frame::solid(640, 480, [90, 90, 95]);
    for y in 100..380 {
        for x in 220..420 {
            frame.set_rgb(x, y, [205, 150, 120]);
        }
    }
    frame
}

/// Camera serving one still frame; counts live tracks across all streams.
pub struct FakeCamera {
    frame: Frame,
    tracks: Arc<AtomicUsize>,
    fail_reads: Arc<AtomicBool>,
    denied: bool,
}

impl FakeCamera {
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            tracks: Arc::new(AtomicUsize::new(0)),
            fail_reads: Arc::new(AtomicBool::new(false)),
            denied: false,
        }
    }

    pub fn denied() -> Self {
        Self {
            denied: true,
            ..Self::new(Frame::solid(640, 480, [0, 0, 0]))
        }
    }

    pub fn active_tracks(&self) -> usize {
        self.tracks.load(Ordering::SeqCst)
    }

    pub fn tracks(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.tracks)
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

impl CameraSource for FakeCamera {
    fn open(&self, _: &CameraConstraints) -> Result<Box<dyn VideoStream>, CameraError> {
        if self.denied {
            return Err(CameraError::PermissionDenied("fake camera".to_string()));
        }
        self.tracks.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            frame: self.frame.clone(),
            tracks: Arc::clone(&self.tracks),
            fail_reads: Arc::clone(&self.fail_reads),
            live: true,
        }))
    }
}

struct FakeStream {
    frame: Frame,
    tracks: Arc<AtomicUsize>,
    fail_reads: Arc<AtomicBool>,
    live: bool,
}

impl VideoStream for FakeStream {
    fn latest_frame(&mut self) -> Result<Frame, CameraError> {
        if !self.live {
            return Err(CameraError::Stopped);
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CameraError::CaptureFailed("fake read failure".to_string()));
        }
        Ok(self.frame.clone())
    }

    fn active_tracks(&self) -> usize {
        usize::from(self.live)
    }

    fn stop(&mut self) {
        if self.live {
            self.live = false;
            self.tracks.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Analyzer replaying a confidence script; the last value repeats.
pub struct ScriptedAnalyzer {
    script: VecDeque<f32>,
    last: f32,
    calls: Arc<AtomicUsize>,
}

impl ScriptedAnalyzer {
    pub fn new(confidences: &[f32]) -> Self {
        Self::with_counter(confidences, Arc::new(AtomicUsize::new(0)))
    }

    pub fn with_counter(confidences: &[f32], calls: Arc<AtomicUsize>) -> Self {
        Self {
            script: confidences.iter().copied().collect(),
            last: 0.0,
            calls,
        }
    }
}

impl FaceAnalyzer for ScriptedAnalyzer {
    fn analyze(&mut self, _: &Frame) -> Result<DetectionResult, ExtractorError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let confidence = self.script.pop_front().unwrap_or(self.last);
        self.last = confidence;

        // Slightly different unit-ish vector per call, like real sensor noise.
        let mut values = vec![0.05f32; 512];
        values[n % 512] += 0.1;
        Ok(DetectionResult {
            present: true,
            confidence,
            face: Some(FaceBox {
                x: 220.0,
                y: 100.0,
                width: 200.0,
                height: 280.0,
                confidence,
                landmarks: None,
            }),
            embedding: Some(Embedding { values, model_version: None }.l2_normalized()),
            landmarks: None,
        })
    }
}

/// Loader handing out fresh scripted analyzers sharing one call counter.
pub struct ScriptedLoader {
    pub script: Vec<f32>,
    pub calls: Arc<AtomicUsize>,
    pub delay: Duration,
}

impl ScriptedLoader {
    pub fn new(script: &[f32]) -> Self {
        Self {
            script: script.to_vec(),
            calls: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
        }
    }
}

impl AnalyzerLoader for ScriptedLoader {
    fn load(&self) -> Result<Box<dyn FaceAnalyzer>, ExtractorError> {
        std::thread::sleep(self.delay);
        Ok(Box::new(ScriptedAnalyzer::with_counter(&self.script, Arc::clone(&self.calls))))
    }
}

/// Loader that always fails as if the model files were absent.
pub struct FailingLoader;

impl AnalyzerLoader for FailingLoader {
    fn load(&self) -> Result<Box<dyn FaceAnalyzer>, ExtractorError> {
        Err(ExtractorError::ModelsMissing(vec!["/models/det_10g.onnx".to_string()]))
    }
}

/// Backend that accepts everything and records what was sent.
#[derive(Clone, Default)]
pub struct RecordingBackend {
    faces: Arc<Mutex<Vec<String>>>,
    registrations: Arc<Mutex<Vec<RegisterRequest>>>,
}

impl RecordingBackend {
    pub fn accepting() -> Self {
        Self::default()
    }

    pub fn face_descriptors(&self) -> Vec<String> {
        self.faces.lock().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn registrations(&self) -> Vec<RegisterRequest> {
        self.registrations.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl VerificationBackend for RecordingBackend {
    async fn verify_face(&self, request: &FaceVerifyRequest) -> Result<VerificationOutcome, BackendError> {
        if let Ok(mut faces) = self.faces.lock() {
            faces.push(request.descriptor.clone());
        }
        Ok(VerificationOutcome {
            verified: true,
            ..Default::default()
        })
    }

    async fn verify_pin(&self, _: &PinVerifyRequest) -> Result<VerificationOutcome, BackendError> {
        Ok(VerificationOutcome {
            verified: true,
            ..Default::default()
        })
    }

    async fn register_face(&self, request: &RegisterRequest) -> Result<(), BackendError> {
        if let Ok(mut registrations) = self.registrations.lock() {
            registrations.push(request.clone());
        }
        Ok(())
    }
}

/// Backend whose first `failures` face or registration requests fail with
/// `error`; later ones are accepted. Every request is recorded, and each
/// one waits `delay` first.
#[derive(Clone)]
pub struct FlakyBackend {
    failures: Arc<AtomicUsize>,
    error: BackendError,
    pub delay: Duration,
    sent: Arc<Mutex<Vec<String>>>,
}

impl FlakyBackend {
    pub fn new(failures: usize, error: BackendError) -> Self {
        Self {
            failures: Arc::new(AtomicUsize::new(failures)),
            error,
            delay: Duration::ZERO,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    async fn respond(&self, descriptor: &str) -> Result<(), BackendError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(descriptor.to_string());
        }
        tokio::time::sleep(self.delay).await;
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            Err(self.error.clone())
        } else {
            Ok(())
        }
    }
}

impl VerificationBackend for FlakyBackend {
    async fn verify_face(&self, request: &FaceVerifyRequest) -> Result<VerificationOutcome, BackendError> {
        self.respond(&request.descriptor).await?;
        Ok(VerificationOutcome {
            verified: true,
            ..Default::default()
        })
    }

    async fn verify_pin(&self, _: &PinVerifyRequest) -> Result<VerificationOutcome, BackendError> {
        Ok(VerificationOutcome {
            verified: true,
            ..Default::default()
        })
    }

    async fn register_face(&self, request: &RegisterRequest) -> Result<(), BackendError> {
        self.respond(&request.descriptor).await
    }
}
