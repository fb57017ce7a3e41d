//! Test helpers: in-process server, fake engines and HTTP utilities

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docscan_ocr::app_state::AppState;
use docscan_ocr::routes;
use docscan_ocr::services::codes::{CodeDetectionError, CodeDetector, DetectedSymbol};
use docscan_ocr::services::orchestrator::{JobOrchestrator, OrchestratorSettings};
use docscan_ocr::services::recognition::{EngineError, TextRecognizer};
use docscan_ocr::services::webhook::WebhookNotifier;
use reqwest::multipart;
use serde::Deserialize;
use tokio::sync::Notify;
use tokio::time::sleep;

/// Response from POST /api/v1/ocr
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: String,
}

/// Response from GET /api/v1/ocr/{job_id}
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// Recognizer returning canned TSV, optionally waiting for a release signal.
pub struct CannedRecognizer {
    pub tsv: String,
    pub gate: Option<Arc<Notify>>,
}

#[async_trait]
impl TextRecognizer for CannedRecognizer {
    async fn recognize(&self, _image_path: &Path) -> Result<String, EngineError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(self.tsv.clone())
    }
}

pub struct CannedDetector(pub Vec<DetectedSymbol>);

#[async_trait]
impl CodeDetector for CannedDetector {
    async fn detect(&self, _image_path: &Path) -> Result<Vec<DetectedSymbol>, CodeDetectionError> {
        Ok(self.0.clone())
    }
}

pub fn orchestrator(
    recognizer: CannedRecognizer,
    detector: CannedDetector,
) -> JobOrchestrator {
    let notifier =
        WebhookNotifier::new(Duration::from_secs(5), 0, Duration::from_millis(50)).unwrap();
    JobOrchestrator::new(
        Arc::new(recognizer),
        Arc::new(detector),
        notifier,
        OrchestratorSettings::default(),
    )
}

/// Serve the API on an ephemeral port and return its base URL.
pub async fn spawn_app(orchestrator: JobOrchestrator) -> String {
    let app = routes::router(AppState::new(orchestrator), 10 * 1024 * 1024, None);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

pub fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::new(16, 16);
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

/// Upload an image to the submit endpoint
pub async fn upload_image(
    client: &reqwest::Client,
    base_url: &str,
    image: Vec<u8>,
    strategy: Option<&str>,
    webhook_url: Option<&str>,
    callback_headers: Option<serde_json::Value>,
) -> reqwest::Response {
    let mut form = multipart::Form::new().part(
        "image",
        multipart::Part::bytes(image)
            .file_name("page.png")
            .mime_str("image/png")
            .unwrap(),
    );
    if let Some(s) = strategy {
        form = form.text("strategy", s.to_string());
    }
    if let Some(url) = webhook_url {
        form = form.text("webhook_url", url.to_string());
    }
    if let Some(headers) = callback_headers {
        form = form.text("callback_headers", headers.to_string());
    }

    client
        .post(format!("{}/api/v1/ocr", base_url))
        .multipart(form)
        .send()
        .await
        .expect("upload request failed")
}

/// Poll job status until completed or failed (with timeout)
pub async fn poll_job_status(
    client: &reqwest::Client,
    base_url: &str,
    job_id: &str,
    timeout_secs: u64,
) -> JobStatusResponse {
    let max_attempts = timeout_secs * 20; // Poll every 50ms

    for _ in 0..max_attempts {
        let status = client
            .get(format!("{}/api/v1/ocr/{}", base_url, job_id))
            .send()
            .await
            .unwrap()
            .json::<JobStatusResponse>()
            .await
            .unwrap();

        match status.status.as_str() {
            "completed" | "failed" => return status,
            "processing" => sleep(Duration::from_millis(50)).await,
            other => panic!("Unknown job status: {}", other),
        }
    }

    panic!("Job {} did not finish within {} seconds", job_id, timeout_secs);
}

/// Split a server-sent events body into `(event, data)` pairs.
pub fn parse_sse(body: &str) -> Vec<(String, serde_json::Value)> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut event = None;
            let mut data = None;
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    event = Some(v.trim().to_string());
                } else if let Some(v) = line.strip_prefix("data:") {
                    data = serde_json::from_str(v.trim()).ok();
                }
            }
            Some((event?, data?))
        })
        .collect()
}
