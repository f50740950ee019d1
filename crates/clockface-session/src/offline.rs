//! In-process backend holding one user's profile and PIN.

use crate::backend::{
    BackendError, FaceVerifyRequest, PinVerifyRequest, RegisterRequest, VerificationBackend,
};
use clockface_core::{evaluate, Descriptor, DescriptorMatcher, VerificationOutcome};
use std::sync::Mutex;

pub const REASON_INVALID_PIN: &str = "Invalid PIN";
pub const REASON_PIN_DISABLED: &str = "PIN login is not enabled";

pub struct OfflineBackend {
    profile: Mutex<Option<Descriptor>>,
    pin: Option<String>,
    matcher: DescriptorMatcher,
}

impl OfflineBackend {
    pub fn new() -> Self {
        Self {
            profile: Mutex::new(None),
            pin: None,
            matcher: DescriptorMatcher::default(),
        }
    }

    pub fn with_profile(self, profile: Descriptor) -> Self {
        Self {
            profile: Mutex::new(Some(profile)),
            ..self
        }
    }

    /// Enable PIN fallback with the given code.
    pub fn with_pin(self, pin: impl Into<String>) -> Self {
        Self {
            pin: Some(pin.into()),
            ..self
        }
    }

    pub fn profile(&self) -> Option<Descriptor> {
        self.profile.lock().ok().and_then(|p| p.clone())
    }

    fn decode(descriptor: &str) -> Result<Descriptor, BackendError> {
        Descriptor::decode(descriptor).map_err(|e| BackendError::Rejected(e.to_string()))
    }
}

impl Default for OfflineBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl VerificationBackend for OfflineBackend {
    async fn verify_face(
        &self,
        request: &FaceVerifyRequest,
    ) -> Result<VerificationOutcome, BackendError> {
        let probe = Self::decode(&request.descriptor)?;
        let profile = self.profile();
        Ok(evaluate(&self.matcher, profile.as_ref(), &probe, self.pin.is_some()))
    }

    async fn verify_pin(&self, request: &PinVerifyRequest) -> Result<VerificationOutcome, BackendError> {
        let (verified, reason) = match &self.pin {
            None => (false, Some(REASON_PIN_DISABLED)),
            Some(pin) if *pin == request.pin => (true, None),
            Some(_) => (false, Some(REASON_INVALID_PIN)),
        };
        Ok(VerificationOutcome {
            verified,
            reason: reason.map(str::to_string),
            can_use_pin: (!verified).then_some(self.pin.is_some()),
            ..Default::default()
        })
    }

    async fn register_face(&self, request: &RegisterRequest) -> Result<(), BackendError> {
        let descriptor = Self::decode(&request.descriptor)?;
        descriptor
            .validate()
            .map_err(|e| BackendError::Rejected(e.to_string()))?;
        let mut profile = self
            .profile
            .lock()
            .map_err(|_| BackendError::Transport("profile store poisoned".to_string()))?;
        *profile = Some(descriptor);
        tracing::info!("face profile registered");
        Ok(())
    }
}
