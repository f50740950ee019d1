//! Capture session state machine.
//!
//! `CaptureController` is the synchronous core: it owns the camera stream,
//! the loaded analyzer (or the fallback flag) and the captured photo, and
//! hands out self-contained jobs for the blocking work. The async driver
//! runs those jobs off-thread and feeds the reports back. Every report
//! carries the epoch it was issued in; reports from an earlier epoch are
//! dropped.

use crate::verify::Rejection;
use chrono::{DateTime, Utc};
use clockface_core::{
    DescriptorKind, Descriptor, DetectionResult, DetectionTier, Embedding, ExtractorError,
    FaceAnalyzer, HeuristicSynthesizer,
};
use clockface_hw::{CameraConstraints, CameraError, CameraSource, Frame, FrameError, VideoStream};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

pub const STATUS_INITIALIZING: &str = "Initializing...";
pub const STATUS_LOADING_MODELS: &str = "Loading face models...";
pub const STATUS_STARTING_CAMERA: &str = "Starting camera...";
pub const STATUS_FALLBACK: &str = "Face models unavailable, using basic detection. Starting camera...";
pub const STATUS_ABSENT: &str = "Position your face in the frame";
pub const STATUS_LOW_QUALITY: &str = "Face detected, move closer or improve the lighting";
pub const STATUS_DETECTED: &str = "Face detected, ready to capture";
pub const STATUS_CAPTURING: &str = "Capturing...";
pub const STATUS_CAPTURED: &str = "Photo captured. Confirm or retake";
pub const STATUS_SUBMITTING: &str = "Verifying...";
pub const STATUS_DONE: &str = "Done";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("camera unavailable: {0}")]
    CameraUnavailable(CameraError),
    #[error("camera read failed: {0}")]
    FrameRead(CameraError),
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
    #[error("capture is disabled until a face is detected")]
    CaptureDisabled,
    #[error("cannot {action} while {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: SessionState,
    },
    #[error("captured frame is empty")]
    EmptyCapture,
    #[error("capture finished after the session moved on")]
    StaleCapture,
    #[error("background task failed: {0}")]
    Task(String),
    #[error("session has ended")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    LoadingModels,
    CameraStarting,
    Detecting,
    Captured,
    Submitting,
    Done,
}

/// What the UI renders.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub session_id: Uuid,
    pub state: SessionState,
    pub tier: DetectionTier,
    pub confidence: f32,
    pub is_detected: bool,
    pub capture_enabled: bool,
    /// Heuristic mode after the model set failed to load.
    pub fallback: bool,
    pub status_text: String,
    pub pin_available: bool,
    /// Last verification rejection, until the next capture.
    pub rejection: Option<Rejection>,
    /// Last submission error worth showing.
    pub notice: Option<String>,
    /// Completed face and PIN submissions, whatever their result.
    pub attempts: u32,
}

pub type SharedAnalyzer = Arc<Mutex<Box<dyn FaceAnalyzer>>>;

/// One detection tick over the latest frame.
pub struct DetectionJob {
    epoch: u64,
    frame: Frame,
    analyzer: Option<SharedAnalyzer>,
}

pub struct TickReport {
    pub epoch: u64,
    pub result: Result<DetectionResult, ExtractorError>,
}

impl DetectionJob {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Full pipeline in ML mode, the cheap presence check in fallback mode.
    pub fn run(self) -> TickReport {
        let result = match &self.analyzer {
            Some(analyzer) => analyzer
                .lock()
                .map_err(|_| ExtractorError::Poisoned)
                .and_then(|mut a| a.analyze(&self.frame)),
            None => Ok(HeuristicSynthesizer.presence(&self.frame)),
        };
        TickReport {
            epoch: self.epoch,
            result,
        }
    }
}

/// Descriptor derivation for one frozen canonical frame.
pub struct CaptureJob {
    epoch: u64,
    frame: Frame,
    samples: Vec<Frame>,
    analyzer: Option<SharedAnalyzer>,
    captured_at: DateTime<Utc>,
}

pub struct CaptureReport {
    pub epoch: u64,
    pub frame: Frame,
    pub descriptor: Result<Descriptor, SessionError>,
}

impl CaptureJob {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Extra frames only help the ML path.
    pub fn wants_samples(&self) -> bool {
        self.analyzer.is_some()
    }

    pub fn add_sample(&mut self, frame: Frame) {
        self.samples.push(frame);
    }

    pub fn run(self) -> CaptureReport {
        let descriptor = match self.analyzer.as_ref().and_then(|a| self.embedding_descriptor(a)) {
            Some(descriptor) => Ok(descriptor),
            None if self.frame.is_empty() => Err(SessionError::EmptyCapture),
            None => Ok(Descriptor::HeuristicFeatures(
                HeuristicSynthesizer.synthesize(&self.frame, self.captured_at),
            )),
        };
        CaptureReport {
            epoch: self.epoch,
            frame: self.frame,
            descriptor,
        }
    }

    /// Averaged embedding of the frozen frame and every confident sample.
    /// `None` when the frozen frame itself has no confident face.
    fn embedding_descriptor(&self, analyzer: &SharedAnalyzer) -> Option<Descriptor> {
        let Ok(mut analyzer) = analyzer.lock() else {
            tracing::warn!("analyzer lock poisoned; using heuristic descriptor");
            return None;
        };
        let primary = match analyzer.analyze(&self.frame) {
            Ok(result) if result.tier() == DetectionTier::Detected => result,
            Ok(result) => {
                tracing::info!(
                    confidence = result.confidence,
                    "no confident face in capture; using heuristic descriptor"
                );
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "capture analysis failed; using heuristic descriptor");
                return None;
            }
        };

        let mut embeddings: Vec<Embedding> = primary.embedding.into_iter().collect();
        if embeddings.is_empty() {
            return None;
        }
        for sample in &self.samples {
            match analyzer.analyze(sample) {
                Ok(r) if r.tier() == DetectionTier::Detected => embeddings.extend(r.embedding),
                Ok(r) => tracing::debug!(confidence = r.confidence, "stability sample skipped"),
                Err(e) => tracing::debug!(error = %e, "stability sample failed"),
            }
        }
        let count = embeddings.len();
        let mean = Embedding::mean(&embeddings)?;
        tracing::debug!(samples = count, "capture embedding averaged");
        Some(Descriptor::from(mean))
    }
}

/// A frozen frame and the descriptor derived from it.
#[derive(Debug, Clone)]
pub struct CapturedPhoto {
    pub frame: Frame,
    pub descriptor: Descriptor,
}

pub struct CaptureController {
    id: Uuid,
    state: SessionState,
    fallback: bool,
    analyzer: Option<SharedAnalyzer>,
    stream: Option<Box<dyn VideoStream>>,
    epoch: u64,
    tick_in_flight: bool,
    capturing: bool,
    tier: DetectionTier,
    confidence: f32,
    status: String,
    captured: Option<CapturedPhoto>,
}

impl Default for CaptureController {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureController {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    pub fn with_id(id: Uuid) -> Self {
        Self {
            id,
            state: SessionState::Initializing,
            fallback: false,
            analyzer: None,
            stream: None,
            epoch: 0,
            tick_in_flight: false,
            capturing: false,
            tier: DetectionTier::Absent,
            confidence: 0.0,
            status: STATUS_INITIALIZING.to_string(),
            captured: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn fallback(&self) -> bool {
        self.fallback
    }

    pub fn is_detected(&self) -> bool {
        self.state == SessionState::Detecting && self.tier == DetectionTier::Detected
    }

    pub fn capture_enabled(&self) -> bool {
        self.is_detected() && !self.capturing
    }

    pub fn captured(&self) -> Option<&CapturedPhoto> {
        self.captured.as_ref()
    }

    pub fn status_text(&self) -> &str {
        &self.status
    }

    /// Tracks still holding the camera (0 once released).
    pub fn active_tracks(&self) -> usize {
        self.stream.as_ref().map_or(0, |s| s.active_tracks())
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            session_id: self.id,
            state: self.state,
            tier: self.tier,
            confidence: self.confidence,
            is_detected: self.is_detected(),
            capture_enabled: self.capture_enabled(),
            fallback: self.fallback,
            status_text: self.status.clone(),
            pin_available: false,
            rejection: None,
            notice: None,
            attempts: 0,
        }
    }

    pub fn begin_model_load(&mut self) -> Result<(), SessionError> {
        self.expect_state("load models", SessionState::Initializing)?;
        self.transition(SessionState::LoadingModels, STATUS_LOADING_MODELS);
        Ok(())
    }

    /// Accept the model load outcome. A failure switches to fallback mode
    /// and the session continues.
    pub fn models_loaded(
        &mut self,
        result: Result<Box<dyn FaceAnalyzer>, ExtractorError>,
    ) -> Result<(), SessionError> {
        self.expect_state("finish model load", SessionState::LoadingModels)?;
        match result {
            Ok(analyzer) => {
                self.analyzer = Some(Arc::new(Mutex::new(analyzer)));
                self.fallback = false;
                self.transition(SessionState::CameraStarting, STATUS_STARTING_CAMERA);
            }
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "face models unavailable; fallback mode");
                self.analyzer = None;
                self.fallback = true;
                self.transition(SessionState::CameraStarting, STATUS_FALLBACK);
            }
        }
        Ok(())
    }

    /// Open the camera. Failure is terminal for the session.
    pub fn start_camera(
        &mut self,
        source: &dyn CameraSource,
        constraints: &CameraConstraints,
    ) -> Result<(), SessionError> {
        self.expect_state("start camera", SessionState::CameraStarting)?;
        match source.open(constraints) {
            Ok(stream) => {
                self.stream = Some(stream);
                self.enter_detecting();
                Ok(())
            }
            Err(e) => {
                tracing::error!(session = %self.id, error = %e, "camera unavailable");
                let message = format!("Camera unavailable: {e}");
                self.transition(SessionState::Done, &message);
                Err(SessionError::CameraUnavailable(e))
            }
        }
    }

    /// Start a detection tick, or `None` when no tick may run now
    /// (not detecting, capturing, or the previous tick still in flight).
    pub fn begin_tick(&mut self) -> Option<DetectionJob> {
        if self.state != SessionState::Detecting || self.capturing || self.tick_in_flight {
            return None;
        }
        let stream = self.stream.as_mut()?;
        let frame = match stream.latest_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "frame read failed; tick skipped");
                return None;
            }
        };
        self.tick_in_flight = true;
        Some(DetectionJob {
            epoch: self.epoch,
            frame,
            analyzer: self.analyzer.clone(),
        })
    }

    /// Apply a finished tick. Returns the new tier, or `None` when the
    /// report was stale or the detection failed.
    pub fn complete_tick(&mut self, report: TickReport) -> Option<DetectionTier> {
        self.tick_in_flight = false;
        if report.epoch != self.epoch || self.state != SessionState::Detecting || self.capturing {
            tracing::debug!(session = %self.id, epoch = report.epoch, "stale detection result discarded");
            return None;
        }
        let result = match report.result {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "detection failed; tick skipped");
                return None;
            }
        };

        let tier = result.tier();
        if tier != self.tier {
            tracing::debug!(session = %self.id, ?tier, confidence = result.confidence, "detection changed");
        }
        self.tier = tier;
        self.confidence = result.confidence;
        self.status = match tier {
            DetectionTier::Absent => STATUS_ABSENT,
            DetectionTier::LowQuality => STATUS_LOW_QUALITY,
            DetectionTier::Detected => STATUS_DETECTED,
        }
        .to_string();
        Some(tier)
    }

    /// Give up on an in-flight tick whose job never reported back.
    pub fn abandon_tick(&mut self) {
        self.tick_in_flight = false;
    }

    /// Freeze the latest frame as a canonical 640×480 capture.
    pub fn begin_capture(&mut self) -> Result<CaptureJob, SessionError> {
        self.expect_state("capture", SessionState::Detecting)?;
        if !self.capture_enabled() {
            return Err(SessionError::CaptureDisabled);
        }
        let frame = self.sample_frame()?;
        self.epoch += 1;
        self.capturing = true;
        self.status = STATUS_CAPTURING.to_string();
        tracing::info!(session = %self.id, fallback = self.fallback, "capture started");
        Ok(CaptureJob {
            epoch: self.epoch,
            frame,
            samples: Vec::new(),
            analyzer: self.analyzer.clone(),
            captured_at: Utc::now(),
        })
    }

    /// Pull the latest frame in canonical form.
    pub fn sample_frame(&mut self) -> Result<Frame, SessionError> {
        let stream = self.stream.as_mut().ok_or(SessionError::InvalidTransition {
            action: "read a frame",
            state: self.state,
        })?;
        let frame = stream.latest_frame().map_err(SessionError::FrameRead)?;
        Ok(frame.to_canonical()?)
    }

    /// Apply a finished capture; on success the session is `Captured`.
    pub fn complete_capture(&mut self, report: CaptureReport) -> Result<DescriptorKind, SessionError> {
        self.capturing = false;
        if report.epoch != self.epoch || self.state != SessionState::Detecting {
            return Err(SessionError::StaleCapture);
        }
        match report.descriptor {
            Ok(descriptor) => {
                let kind = descriptor.kind();
                tracing::info!(session = %self.id, ?kind, "descriptor derived");
                self.captured = Some(CapturedPhoto {
                    frame: report.frame,
                    descriptor,
                });
                self.transition(SessionState::Captured, STATUS_CAPTURED);
                Ok(kind)
            }
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "capture failed");
                self.status = STATUS_ABSENT.to_string();
                Err(e)
            }
        }
    }

    /// A capture job died without reporting back.
    pub fn abort_capture(&mut self, error: &SessionError) {
        tracing::warn!(session = %self.id, error = %error, "capture aborted");
        self.capturing = false;
        self.status = STATUS_ABSENT.to_string();
    }

    /// Discard the photo and go back to detecting.
    pub fn retake(&mut self) -> Result<(), SessionError> {
        self.expect_state("retake", SessionState::Captured)?;
        self.enter_detecting();
        Ok(())
    }

    /// Hand the captured descriptor over for submission.
    pub fn confirm(&mut self) -> Result<Descriptor, SessionError> {
        self.expect_state("confirm", SessionState::Captured)?;
        let descriptor = self
            .captured
            .as_ref()
            .map(|c| c.descriptor.clone())
            .ok_or(SessionError::InvalidTransition {
                action: "confirm without a photo",
                state: self.state,
            })?;
        self.transition(SessionState::Submitting, STATUS_SUBMITTING);
        Ok(descriptor)
    }

    /// The server rejected the capture: start over with a fresh one.
    pub fn submission_rejected(&mut self, remediation: &str) -> Result<(), SessionError> {
        self.expect_state("reject submission", SessionState::Submitting)?;
        self.enter_detecting();
        self.status = remediation.to_string();
        Ok(())
    }

    /// The submission did not complete: keep the photo so the user can
    /// re-submit or retake.
    pub fn submission_failed(&mut self, message: &str) -> Result<(), SessionError> {
        self.expect_state("fail submission", SessionState::Submitting)?;
        self.transition(SessionState::Captured, message);
        Ok(())
    }

    /// Successful end of the flow.
    pub fn finish(&mut self) {
        self.release_stream();
        self.transition(SessionState::Done, STATUS_DONE);
    }

    /// Tear down from any state. Releases the camera unconditionally.
    pub fn close(&mut self) {
        self.epoch += 1;
        self.release_stream();
        if self.state != SessionState::Done {
            self.transition(SessionState::Done, STATUS_DONE);
        }
    }

    fn enter_detecting(&mut self) {
        self.epoch += 1;
        self.captured = None;
        self.capturing = false;
        self.tier = DetectionTier::Absent;
        self.confidence = 0.0;
        self.transition(SessionState::Detecting, STATUS_ABSENT);
    }

    fn transition(&mut self, to: SessionState, status: &str) {
        tracing::info!(session = %self.id, from = ?self.state, to = ?to, "session state changed");
        self.state = to;
        self.status = status.to_string();
    }

    fn expect_state(&self, action: &'static str, expected: SessionState) -> Result<(), SessionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidTransition {
                action,
                state: self.state,
            })
        }
    }

    fn release_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            tracing::info!(session = %self.id, "camera released");
        }
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.release_stream();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{face_frame, FailingLoader, FakeCamera, ScriptedAnalyzer};
    use clockface_core::AnalyzerLoader;

    fn detecting(analyzer: Option<ScriptedAnalyzer>, camera: &FakeCamera) -> CaptureController {
        let mut c = CaptureController::new();
        c.begin_model_load().unwrap();
        let loaded: Result<Box<dyn FaceAnalyzer>, ExtractorError> = match analyzer {
            Some(a) => Ok(Box::new(a)),
            None => FailingLoader.load(),
        };
        c.models_loaded(loaded).unwrap();
        c.start_camera(camera, &CameraConstraints::default()).unwrap();
        c
    }

    fn tick(c: &mut CaptureController) -> Option<DetectionTier> {
        let job = c.begin_tick().expect("tick should start");
        c.complete_tick(job.run())
    }

    #[test]
    fn test_lifecycle_order() {
        let camera = FakeCamera::new(face_frame());
        let mut c = CaptureController::new();
        assert_eq!(c.state(), SessionState::Initializing);
        c.begin_model_load().unwrap();
        assert_eq!(c.state(), SessionState::LoadingModels);
        c.models_loaded(Ok(Box::new(ScriptedAnalyzer::new(&[0.9])))).unwrap();
        assert_eq!(c.state(), SessionState::CameraStarting);
        assert!(!c.fallback());
        c.start_camera(&camera, &CameraConstraints::default()).unwrap();
        assert_eq!(c.state(), SessionState::Detecting);
        assert_eq!(camera.active_tracks(), 1);
    }

    #[test]
    fn test_confidence_sequence_drives_tiers_and_capture() {
        let camera = FakeCamera::new(face_frame());
        let mut c = detecting(Some(ScriptedAnalyzer::new(&[0.2, 0.5, 0.8])), &camera);
        assert!(!c.capture_enabled());

        assert_eq!(tick(&mut c), Some(DetectionTier::Absent));
        assert!(!c.is_detected());
        assert!(!c.capture_enabled());
        assert_eq!(c.status_text(), STATUS_ABSENT);

        assert_eq!(tick(&mut c), Some(DetectionTier::LowQuality));
        assert!(!c.capture_enabled());
        assert_eq!(c.status_text(), STATUS_LOW_QUALITY);

        assert_eq!(tick(&mut c), Some(DetectionTier::Detected));
        assert!(c.is_detected());
        assert!(c.capture_enabled());
        assert_eq!(c.status_text(), STATUS_DETECTED);
    }

    #[test]
    fn test_tick_skipped_while_in_flight() {
        let camera = FakeCamera::new(face_frame());
        let mut c = detecting(Some(ScriptedAnalyzer::new(&[0.9])), &camera);
        let job = c.begin_tick().unwrap();
        assert!(c.begin_tick().is_none(), "second tick must be skipped, not queued");
        c.complete_tick(job.run());
        assert!(c.begin_tick().is_some());
    }

    #[test]
    fn test_stale_tick_discarded_after_retake() {
        let camera = FakeCamera::new(face_frame());
        let mut c = detecting(Some(ScriptedAnalyzer::new(&[0.9])), &camera);
        tick(&mut c);
        let in_flight = c.begin_tick().unwrap();

        let job = c.begin_capture().unwrap();
        c.complete_capture(job.run()).unwrap();
        c.retake().unwrap();

        assert_eq!(c.complete_tick(in_flight.run()), None);
        assert!(!c.is_detected(), "retake resets detection");
    }

    #[test]
    fn test_capture_disabled_until_detected() {
        let camera = FakeCamera::new(face_frame());
        let mut c = detecting(Some(ScriptedAnalyzer::new(&[0.5])), &camera);
        tick(&mut c);
        assert!(matches!(c.begin_capture(), Err(SessionError::CaptureDisabled)));
    }

    #[test]
    fn test_ml_capture_averages_samples() {
        let camera = FakeCamera::new(face_frame());
        let mut c = detecting(Some(ScriptedAnalyzer::new(&[0.9])), &camera);
        tick(&mut c);

        let mut job = c.begin_capture().unwrap();
        assert!(job.wants_samples());
        assert!(!c.capture_enabled(), "capture affordance suspended while capturing");
        job.add_sample(c.sample_frame().unwrap());
        job.add_sample(c.sample_frame().unwrap());
        let report = job.run();
        assert_eq!(report.frame.width, 640);
        assert_eq!(report.frame.height, 480);

        assert_eq!(c.complete_capture(report).unwrap(), DescriptorKind::MlEmbedding);
        assert_eq!(c.state(), SessionState::Captured);
        let Descriptor::MlEmbedding(values) = &c.captured().unwrap().descriptor else {
            panic!("expected embedding");
        };
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_ml_capture_without_confident_face_falls_back() {
        let camera = FakeCamera::new(face_frame());
        // Detected on the tick, lost by the time the frame is frozen.
        let mut c = detecting(Some(ScriptedAnalyzer::new(&[0.9, 0.3])), &camera);
        tick(&mut c);
        let job = c.begin_capture().unwrap();
        assert_eq!(c.complete_capture(job.run()).unwrap(), DescriptorKind::Heuristic);
    }

    #[test]
    fn test_fallback_mode_capture_is_heuristic() {
        let camera = FakeCamera::new(face_frame());
        let mut c = detecting(None, &camera);
        assert!(c.fallback());
        assert_eq!(tick(&mut c), Some(DetectionTier::Detected));

        let job = c.begin_capture().unwrap();
        assert!(!job.wants_samples());
        assert_eq!(c.complete_capture(job.run()).unwrap(), DescriptorKind::Heuristic);
        let json = c.captured().unwrap().descriptor.encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value.is_object());
        assert!(value.get("histogram").is_some());
    }

    #[test]
    fn test_retake_and_confirm() {
        let camera = FakeCamera::new(face_frame());
        let mut c = detecting(None, &camera);
        tick(&mut c);
        let job = c.begin_capture().unwrap();
        c.complete_capture(job.run()).unwrap();

        c.retake().unwrap();
        assert_eq!(c.state(), SessionState::Detecting);
        assert!(c.captured().is_none());

        tick(&mut c);
        let job = c.begin_capture().unwrap();
        c.complete_capture(job.run()).unwrap();
        let descriptor = c.confirm().unwrap();
        assert_eq!(descriptor.kind(), DescriptorKind::Heuristic);
        assert_eq!(c.state(), SessionState::Submitting);
        assert!(c.confirm().is_err(), "no duplicate submission");
    }

    #[test]
    fn test_submission_outcomes() {
        let camera = FakeCamera::new(face_frame());
        let mut c = detecting(None, &camera);
        tick(&mut c);
        let job = c.begin_capture().unwrap();
        c.complete_capture(job.run()).unwrap();

        c.confirm().unwrap();
        c.submission_failed("offline").unwrap();
        assert_eq!(c.state(), SessionState::Captured);
        assert!(c.captured().is_some(), "confirmed photo kept after a failed submission");

        c.confirm().unwrap();
        c.submission_rejected("try again").unwrap();
        assert_eq!(c.state(), SessionState::Detecting);
        assert_eq!(c.status_text(), "try again");

        c.finish();
        assert_eq!(c.state(), SessionState::Done);
        assert_eq!(camera.active_tracks(), 0);
    }

    #[test]
    fn test_camera_failure_is_terminal() {
        let camera = FakeCamera::denied();
        let mut c = CaptureController::new();
        c.begin_model_load().unwrap();
        c.models_loaded(FailingLoader.load()).unwrap();
        let err = c.start_camera(&camera, &CameraConstraints::default()).unwrap_err();
        assert!(matches!(err, SessionError::CameraUnavailable(CameraError::PermissionDenied(_))));
        assert_eq!(c.state(), SessionState::Done);
        assert!(c.begin_tick().is_none());
    }

    #[test]
    fn test_drop_releases_stream_in_any_state() {
        let camera = FakeCamera::new(face_frame());
        {
            let _c = detecting(None, &camera);
            assert_eq!(camera.active_tracks(), 1);
        }
        assert_eq!(camera.active_tracks(), 0);

        let mut c = detecting(None, &camera);
        tick(&mut c);
        let job = c.begin_capture().unwrap();
        c.complete_capture(job.run()).unwrap();
        drop(c);
        assert_eq!(camera.active_tracks(), 0);
    }

    #[test]
    fn test_transient_frame_error_skips_tick() {
        let camera = FakeCamera::new(face_frame());
        let mut c = detecting(None, &camera);
        camera.fail_reads(true);
        assert!(c.begin_tick().is_none());
        camera.fail_reads(false);
        assert!(c.begin_tick().is_some());
    }

    #[test]
    fn test_invalid_transitions() {
        let mut c = CaptureController::new();
        assert!(c.retake().is_err());
        assert!(c.confirm().is_err());
        assert!(matches!(
            c.models_loaded(FailingLoader.load()),
            Err(SessionError::InvalidTransition { state: SessionState::Initializing, .. })
        ));
    }
}
