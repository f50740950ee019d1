//! HTTP client for the attendance server.

use crate::backend::{
    BackendError, FaceVerifyRequest, PinVerifyRequest, RegisterRequest, VerificationBackend,
};
use crate::config::Config;
use clockface_core::VerificationOutcome;
use serde::Serialize;

const VERIFY_FACE_PATH: &str = "/api/attendance/verify-face";
const VERIFY_PIN_PATH: &str = "/api/attendance/verify-pin";
const REGISTER_FACE_PATH: &str = "/api/face/register";

pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpBackend {
    pub fn new(config: &Config) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<(u16, String), BackendError> {
        let mut request = self.client.post(self.url(path)).json(body);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        tracing::debug!(path, status, "attendance server responded");
        Ok((status, text))
    }

    async fn post_for_outcome<T: Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<VerificationOutcome, BackendError> {
        let (status, text) = self.post(path, body).await?;
        parse_outcome(status, &text)
    }
}

/// Rejections come back as 4xx with the outcome shape, so the body is
/// parsed before the status is considered.
fn parse_outcome(status: u16, body: &str) -> Result<VerificationOutcome, BackendError> {
    match serde_json::from_str::<VerificationOutcome>(body) {
        Ok(outcome) => Ok(outcome),
        Err(_) if !(200..300).contains(&status) => Err(BackendError::Status {
            status,
            message: error_message(body),
        }),
        Err(e) => Err(BackendError::Decode(e.to_string())),
    }
}

/// Pull `error` or `message` out of a JSON error body, else the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            ["error", "message"]
                .iter()
                .find_map(|k| v.get(*k).and_then(|m| m.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string())
}

impl VerificationBackend for HttpBackend {
    async fn verify_face(
        &self,
        request: &FaceVerifyRequest,
    ) -> Result<VerificationOutcome, BackendError> {
        self.post_for_outcome(VERIFY_FACE_PATH, request).await
    }

    async fn verify_pin(&self, request: &PinVerifyRequest) -> Result<VerificationOutcome, BackendError> {
        self.post_for_outcome(VERIFY_PIN_PATH, request).await
    }

    async fn register_face(&self, request: &RegisterRequest) -> Result<(), BackendError> {
        let (status, text) = self.post(REGISTER_FACE_PATH, request).await?;
        match status {
            200..=299 => Ok(()),
            400..=499 => Err(BackendError::Rejected(error_message(&text))),
            _ => Err(BackendError::Status {
                status,
                message: error_message(&text),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_body_is_an_outcome() {
        let outcome = parse_outcome(
            401,
            r#"{"verified":false,"reason":"Face does not match","canUsePin":true}"#,
        )
        .unwrap();
        assert!(!outcome.verified);
        assert_eq!(outcome.can_use_pin, Some(true));
    }

    #[test]
    fn test_error_body_becomes_status_error() {
        let err = parse_outcome(500, r#"{"error":"database unavailable"}"#).unwrap_err();
        assert_eq!(
            err,
            BackendError::Status {
                status: 500,
                message: "database unavailable".to_string()
            }
        );
    }

    #[test]
    fn test_garbage_success_body_is_decode_error() {
        assert!(matches!(parse_outcome(200, "<html>"), Err(BackendError::Decode(_))));
    }

    #[test]
    fn test_error_message_fallbacks() {
        assert_eq!(error_message(r#"{"message":"Invalid face data"}"#), "Invalid face data");
        assert_eq!(error_message("Bad Gateway\n"), "Bad Gateway");
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let config = Config {
            server_url: "http://localhost:5000/".to_string(),
            ..Config::default()
        };
        let backend = HttpBackend::new(&config).unwrap();
        assert_eq!(
            backend.url(VERIFY_FACE_PATH),
            "http://localhost:5000/api/attendance/verify-face"
        );
    }
}
