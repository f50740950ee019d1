use clockface_core::ModelPaths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Upper bound on extra embeddings averaged into an ML capture.
pub const MAX_STABILITY_SAMPLES: usize = 3;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Client configuration: defaults, then an optional TOML file, then
/// `CLOCKFACE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the attendance server.
    pub server_url: String,
    /// Directory containing the three ONNX model files.
    pub model_dir: PathBuf,
    /// V4L2 device path.
    pub camera_device: String,
    /// Bounded wait for the model set before falling back.
    pub model_load_timeout_ms: u64,
    pub detection_interval_ms: u64,
    /// Extra embeddings averaged into an ML capture (0..=3).
    pub stability_samples: usize,
    pub sample_delay_ms: u64,
    pub request_timeout_secs: u64,
    /// The caller already knows PIN is enabled for this user.
    pub pin_enabled: bool,
    /// Bearer token sent to the attendance endpoints.
    pub auth_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:5000".to_string(),
            model_dir: clockface_core::default_model_dir(),
            camera_device: "/dev/video0".to_string(),
            model_load_timeout_ms: 10_000,
            detection_interval_ms: 300,
            stability_samples: 2,
            sample_delay_ms: 120,
            request_timeout_secs: 15,
            pin_enabled: false,
            auth_token: None,
        }
    }
}

impl Config {
    /// Load from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        tracing::debug!(
            server = %config.server_url,
            models = %config.model_dir.display(),
            camera = %config.camera_device,
            "configuration loaded"
        );
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    /// Apply `CLOCKFACE_*` overrides from `lookup`. Unparseable values are
    /// ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("CLOCKFACE_SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = lookup("CLOCKFACE_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("CLOCKFACE_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("CLOCKFACE_AUTH_TOKEN") {
            self.auth_token = Some(v);
        }
        parse_into(&lookup, "CLOCKFACE_MODEL_LOAD_TIMEOUT_MS", &mut self.model_load_timeout_ms);
        parse_into(&lookup, "CLOCKFACE_DETECTION_INTERVAL_MS", &mut self.detection_interval_ms);
        parse_into(&lookup, "CLOCKFACE_STABILITY_SAMPLES", &mut self.stability_samples);
        parse_into(&lookup, "CLOCKFACE_SAMPLE_DELAY_MS", &mut self.sample_delay_ms);
        parse_into(&lookup, "CLOCKFACE_REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs);
        if let Some(v) = lookup("CLOCKFACE_PIN_ENABLED") {
            self.pin_enabled = matches!(v.as_str(), "1" | "true" | "yes");
        }
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths::in_dir(&self.model_dir)
    }

    pub fn model_load_timeout(&self) -> Duration {
        Duration::from_millis(self.model_load_timeout_ms)
    }

    /// Detection polling period; never zero.
    pub fn detection_interval(&self) -> Duration {
        Duration::from_millis(self.detection_interval_ms.max(1))
    }

    pub fn stability_samples(&self) -> usize {
        self.stability_samples.min(MAX_STABILITY_SAMPLES)
    }

    pub fn sample_delay(&self) -> Duration {
        Duration::from_millis(self.sample_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_into<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    let Some(raw) = lookup(key) else { return };
    match raw.parse() {
        Ok(v) => *target = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable override"),
    }
}
