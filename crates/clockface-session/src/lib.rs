//! clockface-session: capture session and verification flow.
//!
//! `CaptureController` owns the camera and the descriptor path for one
//! session; `SessionDriver` runs it on tokio with a detection interval that
//! only exists while detecting. `Orchestrator` submits confirmed captures
//! to a `VerificationBackend` and handles rejection and PIN fallback.

pub mod backend;
pub mod config;
pub mod controller;
pub mod driver;
pub mod http;
pub mod offline;
pub mod verify;

#[cfg(test)]
mod testing;

pub use backend::{BackendError, ClockAction, ClockContext, GeoPoint, VerificationBackend};
pub use config::{Config, ConfigError};
pub use controller::{CaptureController, SessionError, SessionState, SessionView};
pub use driver::{
    DriverSettings, SessionCommand, SessionDriver, SessionExit, SessionHandle, SessionPurpose,
};
pub use http::HttpBackend;
pub use offline::OfflineBackend;
pub use verify::{FailureReason, Orchestrator, Rejection, Verdict, VerifyError};
