use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

/// First column names of the tabular header the engine prints before any row.
const TSV_HEADER_PREFIX: &str = "level\tpage_num\tblock_num";

/// Produces the engine's raw tabular output for an image on disk.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, image_path: &Path) -> Result<String, EngineError>;
}

/// Runs the Tesseract CLI in TSV output mode.
pub struct TesseractRecognizer {
    binary: PathBuf,
    language: String,
    page_seg_mode: Option<u8>,
}

impl TesseractRecognizer {
    pub fn new(binary: impl Into<PathBuf>, language: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            language: language.into(),
            page_seg_mode: None,
        }
    }

    pub fn with_page_seg_mode(mut self, psm: Option<u8>) -> Self {
        self.page_seg_mode = psm;
        self
    }

    fn command(&self, image_path: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(image_path).arg("stdout");
        if !self.language.is_empty() {
            cmd.arg("-l").arg(&self.language);
        }
        if let Some(psm) = self.page_seg_mode {
            cmd.arg("--psm").arg(psm.to_string());
        }
        cmd.arg("tsv")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl TextRecognizer for TesseractRecognizer {
    async fn recognize(&self, image_path: &Path) -> Result<String, EngineError> {
        let output = self
            .command(image_path)
            .output()
            .await
            .map_err(|e| EngineError::Spawn {
                binary: self.binary.display().to_string(),
                source: e,
            })?;

        let stdout = String::from_utf8(output.stdout).map_err(|_| EngineError::InvalidOutput)?;
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            return Ok(stdout);
        }

        // A failing exit is only fatal when it left nothing usable behind.
        if stdout.trim_start().starts_with(TSV_HEADER_PREFIX) {
            tracing::warn!(
                status = ?output.status.code(),
                stderr = %stderr.trim(),
                "Recognition engine exited non-zero but produced tabular output"
            );
            return Ok(stdout);
        }

        Err(EngineError::Exited {
            status: output.status.code(),
            stderr: stderr.trim().to_string(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Failed to start {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Recognition engine exited with status {status:?}: {stderr}")]
    Exited { status: Option<i32>, stderr: String },

    #[error("Recognition engine produced non-UTF-8 output")]
    InvalidOutput,
}
