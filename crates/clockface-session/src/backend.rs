//! Wire contract with the attendance server's verification endpoints.

use clockface_core::VerificationOutcome;
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockAction {
    In,
    Out,
}

impl std::str::FromStr for ClockAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "in" => Ok(ClockAction::In),
            "out" => Ok(ClockAction::Out),
            other => Err(format!("unknown clock action '{other}' (expected in or out)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Where and how the user is clocking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockContext {
    pub action: ClockAction,
    /// Named work location, if the user picked one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Device position, if available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_location: Option<GeoPoint>,
}

impl ClockContext {
    pub fn new(action: ClockAction) -> Self {
        Self {
            action,
            location: None,
            user_location: None,
        }
    }
}

/// Body of a face verification request. `descriptor` is the JSON-encoded
/// descriptor string.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceVerifyRequest {
    pub descriptor: String,
    #[serde(flatten)]
    pub context: ClockContext,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PinVerifyRequest {
    pub pin: String,
    #[serde(flatten)]
    pub context: ClockContext,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegisterRequest {
    pub descriptor: String,
}

/// Server-side verification and registration.
pub trait VerificationBackend {
    fn verify_face(
        &self,
        request: &FaceVerifyRequest,
    ) -> impl Future<Output = Result<VerificationOutcome, BackendError>> + Send;

    fn verify_pin(
        &self,
        request: &PinVerifyRequest,
    ) -> impl Future<Output = Result<VerificationOutcome, BackendError>> + Send;

    fn register_face(
        &self,
        request: &RegisterRequest,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;
}
