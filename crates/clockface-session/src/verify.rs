//! Verification orchestrator: submits descriptors, interprets outcomes,
//! and gates the PIN fallback.

use crate::backend::{
    BackendError, ClockContext, FaceVerifyRequest, PinVerifyRequest, RegisterRequest,
    VerificationBackend,
};
use clockface_core::{Descriptor, DescriptorError, VerificationOutcome};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Shown for every transport failure; the user re-submits manually.
pub const NETWORK_RETRY_MESSAGE: &str =
    "Could not reach the attendance server. Check your connection and try again.";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VerifyError {
    #[error("Could not reach the attendance server. Check your connection and try again.")]
    Network,
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("unexpected server response: {0}")]
    Protocol(String),
    #[error("PIN login is not available")]
    PinUnavailable,
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("registration rejected: {0}")]
    RegistrationRejected(String),
    #[error("descriptor could not be encoded: {0}")]
    Encode(String),
}

impl From<BackendError> for VerifyError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Transport(detail) => {
                tracing::warn!(error = %detail, "verification request failed");
                VerifyError::Network
            }
            BackendError::Status { status, message } => VerifyError::Server { status, message },
            BackendError::Decode(detail) => VerifyError::Protocol(detail),
            BackendError::Rejected(reason) => VerifyError::Rejected(reason),
        }
    }
}

impl From<DescriptorError> for VerifyError {
    fn from(e: DescriptorError) -> Self {
        VerifyError::Encode(e.to_string())
    }
}

/// Why a verification was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    NoMatch,
    NotRegistered,
    LowQuality,
    LivenessFailed,
    InvalidPin,
    Unknown,
}

impl FailureReason {
    /// Classify the server's free-text reason.
    pub fn classify(reason: Option<&str>) -> Self {
        let Some(reason) = reason else {
            return FailureReason::Unknown;
        };
        let r = reason.to_ascii_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| r.contains(n));

        if has(&["not registered", "no face profile", "not enrolled"]) {
            FailureReason::NotRegistered
        } else if has(&["does not match", "doesn't match", "not match", "no match", "mismatch"]) {
            FailureReason::NoMatch
        } else if has(&["liveness", "spoof"]) {
            FailureReason::LivenessFailed
        } else if has(&[
            "quality",
            "too dark",
            "too bright",
            "contrast",
            "too small",
            "blurry",
            "no face detected",
            "low confidence",
        ]) {
            FailureReason::LowQuality
        } else if has(&["pin"]) {
            FailureReason::InvalidPin
        } else {
            FailureReason::Unknown
        }
    }

    /// Corrective message shown to the user.
    pub fn remediation(self) -> &'static str {
        match self {
            FailureReason::NoMatch => {
                "Your face doesn't match the registered profile. Make sure you are the \
                 registered user and retake the photo."
            }
            FailureReason::NotRegistered => {
                "No face profile is registered for your account. Register your face first."
            }
            FailureReason::LowQuality => {
                "The photo quality is too low. Improve the lighting, face the camera \
                 directly and retake the photo."
            }
            FailureReason::LivenessFailed => {
                "Liveness check failed. Use the live camera, not a photo or a screen."
            }
            FailureReason::InvalidPin => "The PIN is incorrect. Try again.",
            FailureReason::Unknown => "Face verification failed. Please retake the photo.",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub reason: FailureReason,
    pub remediation: &'static str,
    /// Server-provided message, if any.
    pub message: Option<String>,
    pub pin_available: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accepted(VerificationOutcome),
    Rejected(Rejection),
}

/// Submits captures and PINs; owns the PIN-unlock flag for one session.
///
/// Every submission takes `&mut self`, so only one request is ever
/// outstanding. Failures are never retried automatically.
pub struct Orchestrator<B> {
    backend: B,
    pin_unlocked: bool,
}

impl<B: VerificationBackend> Orchestrator<B> {
    /// `pin_enabled`: the caller already knows PIN is enabled for the user.
    pub fn new(backend: B, pin_enabled: bool) -> Self {
        Self {
            backend,
            pin_unlocked: pin_enabled,
        }
    }

    pub fn pin_available(&self) -> bool {
        self.pin_unlocked
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub async fn submit_face(
        &mut self,
        descriptor: &Descriptor,
        context: &ClockContext,
    ) -> Result<Verdict, VerifyError> {
        let request = FaceVerifyRequest {
            descriptor: descriptor.encode()?,
            context: context.clone(),
        };
        tracing::info!(
            kind = ?descriptor.kind(),
            fingerprint = %fingerprint(&request.descriptor),
            action = ?context.action,
            "submitting face verification"
        );
        let outcome = self.backend.verify_face(&request).await?;
        Ok(self.interpret(outcome))
    }

    pub async fn submit_pin(&mut self, pin: &str, context: &ClockContext) -> Result<Verdict, VerifyError> {
        if !self.pin_unlocked {
            return Err(VerifyError::PinUnavailable);
        }
        let request = PinVerifyRequest {
            pin: pin.to_string(),
            context: context.clone(),
        };
        tracing::info!(action = ?context.action, "submitting PIN verification");
        let outcome = self.backend.verify_pin(&request).await?;
        Ok(self.interpret(outcome))
    }

    /// Store a descriptor as the user's face profile.
    pub async fn register(&mut self, descriptor: &Descriptor) -> Result<(), VerifyError> {
        descriptor
            .validate()
            .map_err(|e| VerifyError::RegistrationRejected(e.to_string()))?;
        let request = RegisterRequest {
            descriptor: descriptor.encode()?,
        };
        tracing::info!(
            kind = ?descriptor.kind(),
            fingerprint = %fingerprint(&request.descriptor),
            "submitting face registration"
        );
        self.backend
            .register_face(&request)
            .await
            .map_err(|e| match e {
                BackendError::Rejected(reason) => VerifyError::RegistrationRejected(reason),
                other => VerifyError::from(other),
            })
    }

    fn interpret(&mut self, outcome: VerificationOutcome) -> Verdict {
        if outcome.verified {
            tracing::info!(
                distance = ?outcome.distance,
                level = ?outcome.security_level,
                "verification accepted"
            );
            return Verdict::Accepted(outcome);
        }

        if outcome.can_use_pin == Some(true) {
            self.pin_unlocked = true;
        }
        let reason = FailureReason::classify(outcome.reason.as_deref());
        tracing::info!(?reason, pin = self.pin_unlocked, "verification rejected");
        Verdict::Rejected(Rejection {
            reason,
            remediation: reason.remediation(),
            message: outcome.message.or(outcome.reason),
            pin_available: self.pin_unlocked,
        })
    }
}

/// Short SHA-256 prefix of an encoded descriptor, for logs.
pub fn fingerprint(encoded: &str) -> String {
    Sha256::digest(encoded.as_bytes())
        .iter()
        .take(6)
        .map(|b| format!("{b:02x}"))
        .collect()
}
