use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::services::orchestrator::{OrchestratorSettings, DEFAULT_MAX_IMAGE_BYTES};

/// Service configuration, read from `OCR_`-prefixed environment variables.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Path or name of the Tesseract executable
    #[serde(default = "default_tesseract_path")]
    pub tesseract_path: PathBuf,

    /// Tesseract language pack(s), e.g. "eng" or "eng+lav"
    #[serde(default = "default_tesseract_lang")]
    pub tesseract_lang: String,

    /// Tesseract page segmentation mode; engine default when unset
    pub tesseract_psm: Option<u8>,

    /// Path or name of the zbarimg executable
    #[serde(default = "default_zbar_path")]
    pub zbar_path: PathBuf,

    /// Directory for staged images. Defaults to the system temp directory.
    pub temp_dir: Option<PathBuf>,

    /// Largest accepted upload, in bytes
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,

    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,

    /// Extra webhook attempts after the first failure (0 = fire once)
    #[serde(default)]
    pub webhook_max_retries: u32,

    #[serde(default = "default_webhook_retry_base_ms")]
    pub webhook_retry_base_ms: u64,

    /// How long finished jobs remain queryable
    #[serde(default = "default_job_retention_secs")]
    pub job_retention_secs: u64,

    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_tesseract_path() -> PathBuf {
    PathBuf::from("tesseract")
}

fn default_tesseract_lang() -> String {
    "eng".to_string()
}

fn default_zbar_path() -> PathBuf {
    PathBuf::from("zbarimg")
}

fn default_max_image_bytes() -> usize {
    DEFAULT_MAX_IMAGE_BYTES
}

fn default_webhook_timeout_secs() -> u64 {
    10
}

fn default_webhook_retry_base_ms() -> u64 {
    500
}

fn default_job_retention_secs() -> u64 {
    3600
}

fn default_reaper_interval_secs() -> u64 {
    60
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::prefixed("OCR_").from_env()
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            temp_dir: self.temp_dir.clone().unwrap_or_else(std::env::temp_dir),
            max_image_bytes: self.max_image_bytes,
            job_retention: Duration::from_secs(self.job_retention_secs),
        }
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    pub fn webhook_retry_base(&self) -> Duration {
        Duration::from_millis(self.webhook_retry_base_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs.max(1))
    }
}
