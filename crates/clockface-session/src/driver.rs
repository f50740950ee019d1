//! Async driver binding a `CaptureController` to tokio.
//!
//! The detection interval exists only while the controller is detecting and
//! is dropped on any other state; inference and model loading run on the
//! blocking pool. Dropping the driver (or its `run` future) releases the
//! camera.

use crate::backend::{ClockContext, VerificationBackend};
use crate::config::Config;
use crate::controller::{
    CaptureController, SessionError, SessionState, SessionView, TickReport,
};
use crate::verify::{Orchestrator, Rejection, Verdict};
use clockface_core::{AnalyzerLoader, ExtractorError, FaceAnalyzer, VerificationOutcome};
use clockface_hw::{CameraConstraints, CameraSource};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{self, JoinError, JoinHandle};
use tokio::time::{self, Interval, MissedTickBehavior};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Capture,
    Retake,
    Confirm,
    SubmitPin(String),
    Cancel,
}

/// What a confirmed capture is for.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionPurpose {
    Clock(ClockContext),
    Register,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionExit {
    /// Face or PIN verification accepted.
    Verified(VerificationOutcome),
    Registered,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriverSettings {
    pub detection_interval: Duration,
    pub model_load_timeout: Duration,
    pub stability_samples: usize,
    pub sample_delay: Duration,
    pub constraints: CameraConstraints,
}

impl DriverSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            detection_interval: config.detection_interval(),
            model_load_timeout: config.model_load_timeout(),
            stability_samples: config.stability_samples(),
            sample_delay: config.sample_delay(),
            constraints: CameraConstraints::default(),
        }
    }
}

/// UI-side handle: send commands, observe the view.
///
/// Commands are handled one at a time. `Cancel` (or dropping every handle)
/// abandons an in-flight submission at once, but waits for a running
/// capture to finish; captures are short and bounded by the sample delay.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    view: watch::Receiver<SessionView>,
}

impl SessionHandle {
    pub async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)
    }

    pub fn view(&self) -> SessionView {
        SessionView::clone(&self.view.borrow())
    }

    /// Wait until the view satisfies `f`.
    pub async fn wait_for(
        &mut self,
        f: impl FnMut(&SessionView) -> bool,
    ) -> Result<SessionView, SessionError> {
        self.view
            .wait_for(f)
            .await
            .map(|v| SessionView::clone(&v))
            .map_err(|_| SessionError::Closed)
    }

    /// Wait for the next view change.
    pub async fn changed(&mut self) -> Result<SessionView, SessionError> {
        self.view.changed().await.map_err(|_| SessionError::Closed)?;
        Ok(SessionView::clone(&self.view.borrow_and_update()))
    }
}

pub struct SessionDriver<B> {
    controller: CaptureController,
    camera: Box<dyn CameraSource>,
    loader: Arc<dyn AnalyzerLoader>,
    orchestrator: Orchestrator<B>,
    purpose: SessionPurpose,
    settings: DriverSettings,
    commands: mpsc::Receiver<SessionCommand>,
    view: watch::Sender<SessionView>,
    rejection: Option<Rejection>,
    notice: Option<String>,
    attempts: u32,
}

impl<B: VerificationBackend> SessionDriver<B> {
    pub fn new(
        camera: Box<dyn CameraSource>,
        loader: Arc<dyn AnalyzerLoader>,
        orchestrator: Orchestrator<B>,
        purpose: SessionPurpose,
        settings: DriverSettings,
    ) -> (Self, SessionHandle) {
        let controller = CaptureController::new();
        let mut initial = controller.view();
        initial.pin_available = orchestrator.pin_available();
        let (view_tx, view_rx) = watch::channel(initial);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let driver = Self {
            controller,
            camera,
            loader,
            orchestrator,
            purpose,
            settings,
            commands: cmd_rx,
            view: view_tx,
            rejection: None,
            notice: None,
            attempts: 0,
        };
        let handle = SessionHandle {
            commands: cmd_tx,
            view: view_rx,
        };
        (driver, handle)
    }

    /// Run the session to completion. Camera failure is the only error exit.
    pub async fn run(mut self) -> Result<SessionExit, SessionError> {
        tracing::info!(session = %self.controller.id(), "capture session started");

        self.controller.begin_model_load()?;
        self.publish();
        let loaded = load_models(Arc::clone(&self.loader), self.settings.model_load_timeout).await;
        self.controller.models_loaded(loaded)?;
        self.publish();

        let started = self
            .controller
            .start_camera(self.camera.as_ref(), &self.settings.constraints);
        self.publish();
        started?;

        let exit = self.event_loop().await;
        tracing::info!(session = %self.controller.id(), ?exit, "capture session ended");
        Ok(exit)
    }

    async fn event_loop(&mut self) -> SessionExit {
        let mut ticker: Option<Interval> = None;
        let mut pending: Option<(u64, JoinHandle<TickReport>)> = None;

        loop {
            let detecting = self.controller.state() == SessionState::Detecting;
            if detecting && ticker.is_none() {
                let mut interval = time::interval(self.settings.detection_interval);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                ticker = Some(interval);
                tracing::debug!(session = %self.controller.id(), "detection timer started");
            } else if !detecting && ticker.take().is_some() {
                tracing::debug!(session = %self.controller.id(), "detection timer cancelled");
            }

            tokio::select! {
                _ = next_tick(&mut ticker) => {
                    match self.controller.begin_tick() {
                        Some(job) => {
                            let epoch = job.epoch();
                            pending = Some((epoch, task::spawn_blocking(move || job.run())));
                        }
                        None => tracing::trace!("detection tick skipped"),
                    }
                }
                (epoch, joined) = join_tick(&mut pending) => {
                    pending = None;
                    match joined {
                        Ok(report) => {
                            self.controller.complete_tick(report);
                        }
                        Err(e) => {
                            tracing::warn!(epoch, error = %e, "detection task failed");
                            self.controller.abandon_tick();
                        }
                    }
                    self.publish();
                }
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        tracing::debug!("session handle dropped");
                        self.controller.close();
                        self.publish();
                        return SessionExit::Cancelled;
                    };
                    if let Some(exit) = self.handle(command).await {
                        return exit;
                    }
                    self.publish();
                }
            }
        }
    }

    async fn handle(&mut self, command: SessionCommand) -> Option<SessionExit> {
        tracing::debug!(session = %self.controller.id(), ?command, "session command");
        match command {
            SessionCommand::Capture => self.capture().await,
            SessionCommand::Retake => {
                if let Err(e) = self.controller.retake() {
                    tracing::info!(error = %e, "retake ignored");
                }
            }
            SessionCommand::Confirm => return self.confirm().await,
            SessionCommand::SubmitPin(pin) => return self.submit_pin(&pin).await,
            SessionCommand::Cancel => return Some(self.cancel()),
        }
        None
    }

    async fn capture(&mut self) {
        let mut job = match self.controller.begin_capture() {
            Ok(job) => job,
            Err(e) => {
                tracing::info!(error = %e, "capture ignored");
                return;
            }
        };
        self.rejection = None;
        self.notice = None;
        self.publish();

        if job.wants_samples() {
            for _ in 0..self.settings.stability_samples {
                time::sleep(self.settings.sample_delay).await;
                match self.controller.sample_frame() {
                    Ok(frame) => job.add_sample(frame),
                    Err(e) => tracing::debug!(error = %e, "stability frame unavailable"),
                }
            }
        }

        match task::spawn_blocking(move || job.run()).await {
            Ok(report) => {
                if let Err(e) = self.controller.complete_capture(report) {
                    tracing::debug!(error = %e, "capture not applied");
                }
            }
            Err(e) => self.controller.abort_capture(&SessionError::Task(e.to_string())),
        }
    }

    async fn confirm(&mut self) -> Option<SessionExit> {
        let descriptor = match self.controller.confirm() {
            Ok(descriptor) => descriptor,
            Err(e) => {
                tracing::info!(error = %e, "confirm ignored");
                return None;
            }
        };
        self.publish();

        match self.purpose.clone() {
            SessionPurpose::Register => {
                let work = self.orchestrator.register(&descriptor);
                let finished = until_cancelled(&mut self.commands, work).await;
                let Some(registered) = finished else {
                    return Some(self.cancel());
                };
                self.attempts += 1;
                match registered {
                    Ok(()) => {
                        self.controller.finish();
                        self.publish();
                        Some(SessionExit::Registered)
                    }
                    Err(e) => {
                        self.fail_submission(e.to_string());
                        None
                    }
                }
            }
            SessionPurpose::Clock(context) => {
                let work = self.orchestrator.submit_face(&descriptor, &context);
                let finished = until_cancelled(&mut self.commands, work).await;
                let Some(verdict) = finished else {
                    return Some(self.cancel());
                };
                self.attempts += 1;
                match verdict {
                    Ok(Verdict::Accepted(outcome)) => {
                        self.controller.finish();
                        self.publish();
                        Some(SessionExit::Verified(outcome))
                    }
                    Ok(Verdict::Rejected(rejection)) => {
                        if let Err(e) = self.controller.submission_rejected(rejection.remediation) {
                            tracing::warn!(error = %e, "rejection not applied");
                        }
                        self.rejection = Some(rejection);
                        None
                    }
                    Err(e) => {
                        self.fail_submission(e.to_string());
                        None
                    }
                }
            }
        }
    }

    async fn submit_pin(&mut self, pin: &str) -> Option<SessionExit> {
        let SessionPurpose::Clock(context) = self.purpose.clone() else {
            tracing::info!("PIN ignored outside a clock session");
            return None;
        };
        let work = self.orchestrator.submit_pin(pin, &context);
        let finished = until_cancelled(&mut self.commands, work).await;
        let Some(verdict) = finished else {
            return Some(self.cancel());
        };
        self.attempts += 1;
        match verdict {
            Ok(Verdict::Accepted(outcome)) => {
                self.controller.finish();
                self.publish();
                Some(SessionExit::Verified(outcome))
            }
            Ok(Verdict::Rejected(rejection)) => {
                self.notice = Some(rejection.remediation.to_string());
                self.rejection = Some(rejection);
                None
            }
            Err(e) => {
                self.notice = Some(e.to_string());
                None
            }
        }
    }

    fn cancel(&mut self) -> SessionExit {
        self.controller.close();
        self.publish();
        SessionExit::Cancelled
    }

    fn fail_submission(&mut self, message: String) {
        if let Err(e) = self.controller.submission_failed(&message) {
            tracing::warn!(error = %e, "submission failure not applied");
        }
        self.notice = Some(message);
    }

    fn publish(&self) {
        let mut view = self.controller.view();
        view.pin_available = self.orchestrator.pin_available();
        view.rejection = self.rejection.clone();
        view.notice = self.notice.clone();
        view.attempts = self.attempts;
        self.view.send_replace(view);
    }
}

/// Load the model set on the blocking pool within `limit`. A load that
/// overruns keeps running in the background and its result is dropped.
async fn load_models(
    loader: Arc<dyn AnalyzerLoader>,
    limit: Duration,
) -> Result<Box<dyn FaceAnalyzer>, ExtractorError> {
    match time::timeout(limit, task::spawn_blocking(move || loader.load())).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(ExtractorError::Task(e.to_string())),
        Err(_) => Err(ExtractorError::LoadTimeout(limit)),
    }
}

/// Drive `work` to completion unless the session is cancelled first.
/// Other commands arriving meanwhile are dropped.
async fn until_cancelled<T>(
    commands: &mut mpsc::Receiver<SessionCommand>,
    work: impl Future<Output = T>,
) -> Option<T> {
    tokio::pin!(work);
    loop {
        tokio::select! {
            out = &mut work => return Some(out),
            command = commands.recv() => match command {
                None | Some(SessionCommand::Cancel) => {
                    tracing::info!("submission abandoned");
                    return None;
                }
                Some(other) => tracing::debug!(command = ?other, "command ignored while submitting"),
            },
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn join_tick(
    pending: &mut Option<(u64, JoinHandle<TickReport>)>,
) -> (u64, Result<TickReport, JoinError>) {
    match pending {
        Some((epoch, handle)) => (*epoch, handle.await),
        None => std::future::pending().await,
    }
}
