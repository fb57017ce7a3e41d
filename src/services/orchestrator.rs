//! Job admission, background execution and delivery.
//!
//! At most one job is processing at any time. `submit` validates the image,
//! takes the busy flag, records the job and returns; everything else happens in
//! a supervised background task that stages the image on disk, runs both
//! engines concurrently, merges their output, records the terminal state,
//! releases the busy flag, notifies the caller and removes the staged file.

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use image::{ImageFormat, ImageReader};
use parking_lot::{Mutex, RwLock};
use tempfile::TempPath;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::job::{Delivery, Job, ProgressEvent, StrategyKind};
use crate::models::ocr::{OcrResult, PageSize};
use crate::models::submission::FormError;
use crate::services::codes::CodeDetector;
use crate::services::normalizer::{self, ParseError};
use crate::services::overlap;
use crate::services::recognition::{EngineError, TextRecognizer};
use crate::services::webhook::WebhookNotifier;

/// Default upper bound on accepted image size.
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Stream of events for a push-strategy job. Ends after the terminal event.
pub type ProgressStream = BoxStream<'static, ProgressEvent>;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Directory for per-job staged images.
    pub temp_dir: PathBuf,
    pub max_image_bytes: usize,
    /// How long terminal jobs stay queryable.
    pub job_retention: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir(),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            job_retention: Duration::from_secs(3600),
        }
    }
}

/// Owns every job record and runs at most one job at a time.
#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    recognizer: Arc<dyn TextRecognizer>,
    detector: Arc<dyn CodeDetector>,
    notifier: WebhookNotifier,
    settings: OrchestratorSettings,
    busy: AtomicBool,
    jobs: RwLock<HashMap<String, Job>>,
    channels: Mutex<HashMap<String, watch::Sender<ProgressEvent>>>,
}

/// Holds the global busy flag; dropping it releases the flag.
struct BusyGuard {
    inner: Arc<Inner>,
}

impl BusyGuard {
    fn acquire(inner: &Arc<Inner>) -> Option<Self> {
        inner
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(Self {
            inner: Arc::clone(inner),
        })
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.inner.busy.store(false, Ordering::Release);
    }
}

/// What the submit path learned about the payload.
#[derive(Debug, Clone, Copy)]
struct ImageInfo {
    format: ImageFormat,
    dimensions: Option<PageSize>,
}

impl JobOrchestrator {
    pub fn new(
        recognizer: Arc<dyn TextRecognizer>,
        detector: Arc<dyn CodeDetector>,
        notifier: WebhookNotifier,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                recognizer,
                detector,
                notifier,
                settings,
                busy: AtomicBool::new(false),
                jobs: RwLock::new(HashMap::new()),
                channels: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Admit an image for processing and return the new job id.
    ///
    /// Rejects with `Busy` while another job is processing; no record is created
    /// in that case. Must be called from within a Tokio runtime.
    pub fn submit(&self, image: Vec<u8>, delivery: Delivery) -> Result<String, SubmitError> {
        let info = match inspect_image(&image, self.inner.settings.max_image_bytes) {
            Ok(info) => info,
            Err(e) => {
                metrics::counter!("ocr_jobs_rejected_total", "reason" => "invalid_input").increment(1);
                return Err(e.into());
            }
        };

        let Some(guard) = BusyGuard::acquire(&self.inner) else {
            metrics::counter!("ocr_jobs_rejected_total", "reason" => "busy").increment(1);
            tracing::info!("Rejecting submission, a job is already processing");
            return Err(SubmitError::Busy);
        };

        let job_id = Uuid::new_v4().to_string();
        let strategy = delivery.kind();
        if strategy == StrategyKind::Push {
            let (tx, _rx) = watch::channel(ProgressEvent::Progress {
                progress: 0,
                message: "queued".to_string(),
            });
            self.inner.channels.lock().insert(job_id.clone(), tx);
        }
        self.inner
            .jobs
            .write()
            .insert(job_id.clone(), Job::new(job_id.clone(), delivery));

        metrics::counter!("ocr_jobs_submitted_total").increment(1);
        tracing::info!(
            job_id = %job_id,
            strategy = %strategy,
            bytes = image.len(),
            format = ?info.format,
            "Job admitted"
        );

        tokio::spawn(supervise(Arc::clone(&self.inner), job_id.clone(), image, info, guard));
        Ok(job_id)
    }

    /// Snapshot of a job record.
    pub fn get_status(&self, job_id: &str) -> Result<Job, LookupError> {
        self.inner
            .jobs
            .read()
            .get(job_id)
            .cloned()
            .ok_or_else(|| LookupError::NotFound(job_id.to_string()))
    }

    /// Subscribe to a push-strategy job's events.
    ///
    /// A job that already finished replays its terminal event. Unknown ids and
    /// jobs submitted with another strategy are `NotFound`.
    pub fn progress_channel(&self, job_id: &str) -> Result<ProgressStream, LookupError> {
        let not_found = || LookupError::NotFound(job_id.to_string());

        let (strategy, finished) = self
            .inner
            .jobs
            .read()
            .get(job_id)
            .map(|job| (job.delivery.kind(), job.terminal_event()))
            .ok_or_else(not_found)?;
        if strategy != StrategyKind::Push {
            return Err(not_found());
        }
        if let Some(event) = finished {
            return Ok(stream::once(async move { event }).boxed());
        }

        let live = self
            .inner
            .channels
            .lock()
            .get(job_id)
            .map(|tx| tx.subscribe());
        if let Some(rx) = live {
            return Ok(channel_stream(rx));
        }

        // The channel is removed only after the record turned terminal.
        let event = self
            .inner
            .jobs
            .read()
            .get(job_id)
            .and_then(Job::terminal_event)
            .ok_or_else(not_found)?;
        Ok(stream::once(async move { event }).boxed())
    }

    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    pub fn job_count(&self) -> usize {
        self.inner.jobs.read().len()
    }

    /// Drop terminal jobs that completed more than the retention window ago.
    pub fn evict_expired(&self) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(self.inner.settings.job_retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
        else {
            return 0;
        };

        let mut jobs = self.inner.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, job| match job.completed_at {
            Some(done) if job.status.is_terminal() => done > cutoff,
            _ => true,
        });
        let evicted = before - jobs.len();
        metrics::gauge!("ocr_jobs_retained").set(jobs.len() as f64);
        evicted
    }

    /// Periodically evict expired jobs until the runtime shuts down.
    pub fn spawn_reaper(&self, every: Duration) -> JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let evicted = orchestrator.evict_expired();
                if evicted > 0 {
                    tracing::info!(evicted, "Evicted expired job records");
                }
            }
        })
    }
}

impl Inner {
    fn publish_progress(&self, job_id: &str, progress: u8, message: &str) {
        if let Some(tx) = self.channels.lock().get(job_id) {
            tx.send_replace(ProgressEvent::Progress {
                progress,
                message: message.to_string(),
            });
        }
    }

    /// Record the terminal state and release the busy flag under the same lock,
    /// so any reader observing the terminal state can already submit again.
    fn finish(
        &self,
        job_id: &str,
        outcome: &Result<OcrResult, JobError>,
        guard: BusyGuard,
    ) -> Option<Job> {
        let mut jobs = self.jobs.write();
        let snapshot = jobs.get_mut(job_id).map(|job| {
            match outcome {
                Ok(result) => job.complete(result.clone()),
                Err(e) => job.fail(e.to_string()),
            };
            job.clone()
        });
        drop(guard);
        snapshot
    }

    fn deliver(&self, job: &Job) {
        match &job.delivery {
            Delivery::Push => {
                let tx = self.channels.lock().remove(&job.id);
                if let (Some(tx), Some(event)) = (tx, job.terminal_event()) {
                    tx.send_replace(event);
                }
            }
            Delivery::Webhook { target, headers } => {
                let notifier = self.notifier.clone();
                let target = target.clone();
                let headers = headers.clone();
                let payload = job.webhook_payload();
                tokio::spawn(async move {
                    match notifier.deliver(&target, &headers, &payload).await {
                        Ok(()) => {
                            tracing::info!(job_id = %payload.job_id, url = %target, "Webhook delivered");
                        }
                        Err(e) => {
                            metrics::counter!("ocr_webhook_failures_total").increment(1);
                            tracing::warn!(
                                job_id = %payload.job_id,
                                url = %target,
                                error = %e,
                                "Webhook delivery failed"
                            );
                        }
                    }
                });
            }
            Delivery::Poll => {}
        }
    }
}

async fn supervise(
    inner: Arc<Inner>,
    job_id: String,
    image: Vec<u8>,
    info: ImageInfo,
    guard: BusyGuard,
) {
    let started = Instant::now();
    let extension = info.format.extensions_str().first().copied().unwrap_or("img");

    let (outcome, staged) =
        match stage_image(&inner.settings.temp_dir, &job_id, image, extension).await {
            Ok(staged) => {
                inner.publish_progress(&job_id, 10, "image staged");
                let pipeline = tokio::spawn(run_pipeline(
                    Arc::clone(&inner),
                    job_id.clone(),
                    staged.to_path_buf(),
                    info.dimensions,
                ));
                let outcome = match pipeline.await {
                    Ok(outcome) => outcome,
                    Err(e) => Err(JobError::Aborted(e.to_string())),
                };
                (outcome, Some(staged))
            }
            Err(e) => (Err(JobError::Staging(e)), None),
        };

    let elapsed = started.elapsed();
    metrics::histogram!("ocr_job_processing_seconds").record(elapsed.as_secs_f64());
    match &outcome {
        Ok(result) => {
            metrics::counter!("ocr_jobs_completed_total").increment(1);
            tracing::info!(
                job_id = %job_id,
                words = result.words.len(),
                codes = result.codes.len(),
                duration_ms = elapsed.as_millis() as u64,
                "Job completed"
            );
        }
        Err(e) => {
            metrics::counter!("ocr_jobs_failed_total").increment(1);
            tracing::error!(
                job_id = %job_id,
                error = %e,
                duration_ms = elapsed.as_millis() as u64,
                "Job failed"
            );
        }
    }

    if let Some(job) = inner.finish(&job_id, &outcome, guard) {
        inner.deliver(&job);
    }

    if let Some(staged) = staged {
        remove_staged(staged, &job_id);
    }
}

async fn run_pipeline(
    inner: Arc<Inner>,
    job_id: String,
    image_path: PathBuf,
    image_size: Option<PageSize>,
) -> Result<OcrResult, JobError> {
    // A detector panic must not cancel text recognition.
    let detection = {
        let detector = Arc::clone(&inner.detector);
        let image_path = image_path.clone();
        tokio::spawn(async move { detector.detect(&image_path).await })
    };
    let (text, detected) = tokio::join!(inner.recognizer.recognize(&image_path), detection);

    let symbols = match detected {
        Ok(Ok(symbols)) => symbols,
        Ok(Err(e)) => {
            tracing::warn!(job_id = %job_id, error = %e, "Code detection failed, continuing without codes");
            Vec::new()
        }
        Err(e) => {
            tracing::warn!(job_id = %job_id, error = %e, "Code detection aborted, continuing without codes");
            Vec::new()
        }
    };
    let tsv = text?;
    inner.publish_progress(&job_id, 70, "recognition finished");

    let normalized = normalizer::normalize_tsv(&tsv)?;
    // Words are normalized against the engine's page row; codes share that space.
    let reference = normalized.page.or(image_size);
    let codes = normalizer::normalize_codes(symbols, reference);
    let total_words = normalized.words.len();
    let words = overlap::remove_words_over_codes(normalized.words, &codes);

    tracing::debug!(
        job_id = %job_id,
        words = words.len(),
        dropped = total_words - words.len(),
        codes = codes.len(),
        "Merged recognition results"
    );
    inner.publish_progress(&job_id, 90, "results merged");

    Ok(OcrResult { words, codes })
}

fn inspect_image(bytes: &[u8], max_bytes: usize) -> Result<ImageInfo, InputError> {
    if bytes.is_empty() {
        return Err(InputError::Empty);
    }
    if bytes.len() > max_bytes {
        return Err(InputError::TooLarge {
            size: bytes.len(),
            limit: max_bytes,
        });
    }
    let format = image::guess_format(bytes).map_err(|_| InputError::NotAnImage)?;
    let dimensions = ImageReader::with_format(Cursor::new(bytes), format)
        .into_dimensions()
        .ok()
        .and_then(|(w, h)| PageSize::new(w, h));
    Ok(ImageInfo { format, dimensions })
}

async fn stage_image(
    dir: &Path,
    job_id: &str,
    bytes: Vec<u8>,
    extension: &str,
) -> std::io::Result<TempPath> {
    let dir = dir.to_path_buf();
    let prefix = format!("{}-", job_id);
    let suffix = format!(".{}", extension);
    tokio::task::spawn_blocking(move || -> std::io::Result<TempPath> {
        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(&suffix)
            .tempfile_in(&dir)?;
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(file.into_temp_path())
    })
    .await
    .map_err(std::io::Error::other)?
}

fn remove_staged(staged: TempPath, job_id: &str) {
    if let Err(e) = staged.close() {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to remove staged image");
        }
    }
}

fn channel_stream(rx: watch::Receiver<ProgressEvent>) -> ProgressStream {
    stream::unfold(Some((rx, true)), |state| async move {
        let (mut rx, first) = state?;
        if !first && rx.changed().await.is_err() {
            let closed = ProgressEvent::Error {
                error: "job channel closed before completion".to_string(),
            };
            return Some((closed, None));
        }
        let event = rx.borrow_and_update().clone();
        let next = if event.is_terminal() { None } else { Some((rx, false)) };
        Some((event, next))
    })
    .boxed()
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Another job is already processing")]
    Busy,

    #[error(transparent)]
    InvalidInput(#[from] InputError),
}

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("Image payload is empty")]
    Empty,

    #[error("Image is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("Payload is not a recognized image format")]
    NotAnImage,

    #[error("Malformed upload: {0}")]
    Malformed(String),

    #[error(transparent)]
    Form(#[from] FormError),
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum LookupError {
    #[error("Job {0} not found")]
    NotFound(String),
}

/// Failure of a single job, recorded in its `error` field.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Failed to stage image: {0}")]
    Staging(#[source] std::io::Error),

    #[error("Text recognition failed: {0}")]
    Engine(#[from] EngineError),

    #[error("Could not parse recognition output: {0}")]
    Parse(#[from] ParseError),

    #[error("Job task aborted: {0}")]
    Aborted(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::geometry::Rect;
    use crate::models::job::JobStatus;
    use crate::services::codes::{CodeDetectionError, DetectedSymbol};
    use async_trait::async_trait;
    use tokio::sync::Notify;

    const TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
        1\t1\t0\t0\t0\t0\t0\t0\t1000\t1000\t-1\t\n\
        5\t1\t1\t1\t1\t1\t100\t50\t80\t20\t95\tHello\n\
        5\t1\t1\t1\t1\t2\t520\t520\t40\t20\t30\t#%&\n";

    struct FakeRecognizer {
        output: Result<String, String>,
        gate: Option<Arc<Notify>>,
        seen: Mutex<Option<(PathBuf, bool)>>,
    }

    impl FakeRecognizer {
        fn ok(tsv: &str) -> Self {
            Self {
                output: Ok(tsv.to_string()),
                gate: None,
                seen: Mutex::new(None),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                output: Err(message.to_string()),
                gate: None,
                seen: Mutex::new(None),
            }
        }

        fn gated(tsv: &str, gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::ok(tsv)
            }
        }
    }

    #[async_trait]
    impl TextRecognizer for FakeRecognizer {
        async fn recognize(&self, image_path: &Path) -> Result<String, EngineError> {
            *self.seen.lock() = Some((image_path.to_path_buf(), image_path.exists()));
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.output.clone().map_err(|stderr| EngineError::Exited {
                status: Some(1),
                stderr,
            })
        }
    }

    struct PanickingRecognizer;

    #[async_trait]
    impl TextRecognizer for PanickingRecognizer {
        async fn recognize(&self, _image_path: &Path) -> Result<String, EngineError> {
            panic!("engine bindings blew up");
        }
    }

    struct FakeDetector(Option<Vec<DetectedSymbol>>);

    #[async_trait]
    impl CodeDetector for FakeDetector {
        async fn detect(&self, _image_path: &Path) -> Result<Vec<DetectedSymbol>, CodeDetectionError> {
            self.0.clone().ok_or(CodeDetectionError::Exited {
                status: Some(2),
                stderr: "decoder crashed".to_string(),
            })
        }
    }

    struct PanickingDetector;

    #[async_trait]
    impl CodeDetector for PanickingDetector {
        async fn detect(&self, _image_path: &Path) -> Result<Vec<DetectedSymbol>, CodeDetectionError> {
            panic!("decoder bindings blew up");
        }
    }

    fn qr_over_noise() -> Vec<DetectedSymbol> {
        vec![DetectedSymbol {
            symbology: "QR-Code".to_string(),
            content: "https://example.com".to_string(),
            bounds: Rect::new(500.0, 500.0, 100.0, 100.0),
        }]
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbImage::new(8, 8);
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn notifier() -> WebhookNotifier {
        WebhookNotifier::new(Duration::from_secs(1), 0, Duration::from_millis(10)).unwrap()
    }

    fn orchestrator_with(
        recognizer: Arc<dyn TextRecognizer>,
        detector: FakeDetector,
        settings: OrchestratorSettings,
    ) -> JobOrchestrator {
        JobOrchestrator::new(recognizer, Arc::new(detector), notifier(), settings)
    }

    fn orchestrator(recognizer: Arc<dyn TextRecognizer>, detector: FakeDetector) -> JobOrchestrator {
        orchestrator_with(recognizer, detector, OrchestratorSettings::default())
    }

    async fn wait_terminal(orchestrator: &JobOrchestrator, job_id: &str) -> Job {
        for _ in 0..500 {
            let job = orchestrator.get_status(job_id).unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} did not finish", job_id);
    }

    #[tokio::test]
    async fn test_second_submission_rejected_while_busy() {
        let gate = Arc::new(Notify::new());
        let orch = orchestrator(
            Arc::new(FakeRecognizer::gated(TSV, gate.clone())),
            FakeDetector(Some(Vec::new())),
        );

        let first = orch.submit(png_bytes(), Delivery::Poll).unwrap();
        assert!(orch.is_busy());
        assert!(matches!(
            orch.submit(png_bytes(), Delivery::Poll),
            Err(SubmitError::Busy)
        ));
        assert_eq!(orch.job_count(), 1);

        gate.notify_one();
        let job = wait_terminal(&orch, &first).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert!(!orch.is_busy());

        let second = orch.submit(png_bytes(), Delivery::Poll).unwrap();
        assert_ne!(first, second);
        gate.notify_one();
        wait_terminal(&orch, &second).await;
    }

    #[tokio::test]
    async fn test_unknown_job_not_found() {
        let orch = orchestrator(Arc::new(FakeRecognizer::ok(TSV)), FakeDetector(None));
        assert_eq!(
            orch.get_status("never-issued").unwrap_err(),
            LookupError::NotFound("never-issued".to_string())
        );
        assert!(orch.progress_channel("never-issued").is_err());
    }

    #[tokio::test]
    async fn test_invalid_input_creates_no_job() {
        let orch = orchestrator_with(
            Arc::new(FakeRecognizer::ok(TSV)),
            FakeDetector(None),
            OrchestratorSettings {
                max_image_bytes: 64,
                ..Default::default()
            },
        );

        assert!(matches!(
            orch.submit(Vec::new(), Delivery::Poll),
            Err(SubmitError::InvalidInput(InputError::Empty))
        ));
        assert!(matches!(
            orch.submit(b"just some text, not pixels".to_vec(), Delivery::Poll),
            Err(SubmitError::InvalidInput(InputError::NotAnImage))
        ));
        assert!(matches!(
            orch.submit(vec![0u8; 65], Delivery::Poll),
            Err(SubmitError::InvalidInput(InputError::TooLarge { size: 65, limit: 64 }))
        ));
        assert_eq!(orch.job_count(), 0);
        assert!(!orch.is_busy());
    }

    #[tokio::test]
    async fn test_words_over_codes_removed() {
        let orch = orchestrator(
            Arc::new(FakeRecognizer::ok(TSV)),
            FakeDetector(Some(qr_over_noise())),
        );
        let id = orch.submit(png_bytes(), Delivery::Poll).unwrap();
        let job = wait_terminal(&orch, &id).await;

        let result = job.result.unwrap();
        assert_eq!(result.words.len(), 1);
        assert_eq!(result.words[0].text, "Hello");
        assert_eq!(result.codes.len(), 1);
        assert!((result.codes[0].bounds.left - 0.5).abs() < 1e-9);
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_code_failure_degrades_to_no_codes() {
        let orch = orchestrator(Arc::new(FakeRecognizer::ok(TSV)), FakeDetector(None));
        let id = orch.submit(png_bytes(), Delivery::Poll).unwrap();
        let job = wait_terminal(&orch, &id).await;

        assert_eq!(job.status, JobStatus::Completed);
        let result = job.result.unwrap();
        assert!(result.codes.is_empty());
        assert_eq!(result.words.len(), 2);
    }

    #[tokio::test]
    async fn test_panicking_detector_degrades_to_no_codes() {
        let recognizer = Arc::new(FakeRecognizer::ok(TSV));
        let orch = JobOrchestrator::new(
            recognizer.clone(),
            Arc::new(PanickingDetector),
            notifier(),
            OrchestratorSettings::default(),
        );
        let id = orch.submit(png_bytes(), Delivery::Poll).unwrap();
        let job = wait_terminal(&orch, &id).await;

        assert_eq!(job.status, JobStatus::Completed, "error: {:?}", job.error);
        let result = job.result.unwrap();
        assert!(result.codes.is_empty());
        assert_eq!(result.words.len(), 2);
        assert!(recognizer.seen.lock().is_some());
        assert!(!orch.is_busy());
    }

    #[tokio::test]
    async fn test_text_failure_fails_job() {
        let orch = orchestrator(
            Arc::new(FakeRecognizer::failing("Error opening data file")),
            FakeDetector(Some(qr_over_noise())),
        );
        let id = orch.submit(png_bytes(), Delivery::Poll).unwrap();
        let job = wait_terminal(&orch, &id).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.result.is_none());
        assert!(job.error.unwrap().contains("Error opening data file"));
        assert!(!orch.is_busy());
    }

    #[tokio::test]
    async fn test_garbled_output_fails_job() {
        let orch = orchestrator(
            Arc::new(FakeRecognizer::ok("level\tpage_num\n5\tgarbage")),
            FakeDetector(Some(Vec::new())),
        );
        let id = orch.submit(png_bytes(), Delivery::Poll).unwrap();
        let job = wait_terminal(&orch, &id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().starts_with("Could not parse recognition output"));
    }

    #[tokio::test]
    async fn test_panicking_engine_fails_job_and_releases_flag() {
        let orch = orchestrator(Arc::new(PanickingRecognizer), FakeDetector(Some(Vec::new())));
        let id = orch.submit(png_bytes(), Delivery::Poll).unwrap();
        let job = wait_terminal(&orch, &id).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().starts_with("Job task aborted"));
        assert!(!orch.is_busy());
    }

    #[tokio::test]
    async fn test_staged_image_removed_after_job() {
        let recognizer = Arc::new(FakeRecognizer::ok(TSV));
        let orch = orchestrator(recognizer.clone(), FakeDetector(Some(Vec::new())));
        let id = orch.submit(png_bytes(), Delivery::Poll).unwrap();
        wait_terminal(&orch, &id).await;

        let (path, existed) = recognizer.seen.lock().clone().unwrap();
        assert!(existed, "image should be staged before the engines run");
        assert!(path.file_name().unwrap().to_string_lossy().starts_with(&id));
        assert_eq!(path.extension().unwrap(), "png");

        for _ in 0..100 {
            if !path.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("staged image {} was not removed", path.display());
    }

    #[tokio::test]
    async fn test_staging_failure_skips_engines() {
        let recognizer = Arc::new(FakeRecognizer::ok(TSV));
        let orch = orchestrator_with(
            recognizer.clone(),
            FakeDetector(Some(Vec::new())),
            OrchestratorSettings {
                temp_dir: PathBuf::from("/nonexistent/docscan-ocr/staging"),
                ..Default::default()
            },
        );
        let id = orch.submit(png_bytes(), Delivery::Poll).unwrap();
        let job = wait_terminal(&orch, &id).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().starts_with("Failed to stage image"));
        assert!(recognizer.seen.lock().is_none());
    }

    #[tokio::test]
    async fn test_push_stream_ends_with_terminal_event() {
        let gate = Arc::new(Notify::new());
        let orch = orchestrator(
            Arc::new(FakeRecognizer::gated(TSV, gate.clone())),
            FakeDetector(Some(Vec::new())),
        );
        let id = orch.submit(png_bytes(), Delivery::Push).unwrap();
        let stream = orch.progress_channel(&id).unwrap();
        gate.notify_one();

        let events: Vec<ProgressEvent> = tokio::time::timeout(Duration::from_secs(5), stream.collect())
            .await
            .unwrap();
        let (last, rest) = events.split_last().unwrap();
        assert!(rest.iter().all(|e| !e.is_terminal()));
        match last {
            ProgressEvent::Complete { result } => assert_eq!(result.words.len(), 2),
            other => panic!("expected complete event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_terminal_event() {
        let orch = orchestrator(
            Arc::new(FakeRecognizer::failing("engine missing")),
            FakeDetector(Some(Vec::new())),
        );
        let id = orch.submit(png_bytes(), Delivery::Push).unwrap();
        wait_terminal(&orch, &id).await;

        let events: Vec<ProgressEvent> = orch.progress_channel(&id).unwrap().collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ProgressEvent::Error { error } if error.contains("engine missing")));
    }

    #[tokio::test]
    async fn test_progress_channel_only_for_push_jobs() {
        let orch = orchestrator(Arc::new(FakeRecognizer::ok(TSV)), FakeDetector(Some(Vec::new())));
        let id = orch.submit(png_bytes(), Delivery::Poll).unwrap();
        assert!(matches!(orch.progress_channel(&id), Err(LookupError::NotFound(_))));
        wait_terminal(&orch, &id).await;
    }

    #[tokio::test]
    async fn test_expired_jobs_evicted() {
        let orch = orchestrator_with(
            Arc::new(FakeRecognizer::ok(TSV)),
            FakeDetector(Some(Vec::new())),
            OrchestratorSettings {
                job_retention: Duration::ZERO,
                ..Default::default()
            },
        );
        let id = orch.submit(png_bytes(), Delivery::Poll).unwrap();
        wait_terminal(&orch, &id).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(orch.evict_expired(), 1);
        assert!(orch.get_status(&id).is_err());
    }

    #[test]
    fn test_inspect_reads_dimensions() {
        let info = inspect_image(&png_bytes(), DEFAULT_MAX_IMAGE_BYTES).unwrap();
        assert_eq!(info.format, ImageFormat::Png);
        assert_eq!(info.dimensions, PageSize::new(8, 8));
    }
}
