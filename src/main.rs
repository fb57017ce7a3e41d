use std::sync::Arc;

use docscan_ocr::{
    app_state::AppState,
    config::AppConfig,
    routes,
    services::{
        codes::ZbarDetector, orchestrator::JobOrchestrator, recognition::TesseractRecognizer,
        webhook::WebhookNotifier,
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing docscan-ocr server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("ocr_jobs_submitted_total", "Total OCR jobs admitted");
    metrics::describe_counter!(
        "ocr_jobs_rejected_total",
        "Submissions rejected because the service was busy or the input was invalid"
    );
    metrics::describe_counter!("ocr_jobs_completed_total", "Total OCR jobs completed");
    metrics::describe_counter!("ocr_jobs_failed_total", "Total OCR jobs that failed");
    metrics::describe_counter!(
        "ocr_webhook_failures_total",
        "Webhook deliveries that failed after all attempts"
    );
    metrics::describe_histogram!(
        "ocr_job_processing_seconds",
        "Time from admission to terminal state"
    );
    metrics::describe_gauge!("ocr_jobs_retained", "Job records currently held in memory");

    tracing::info!(
        tesseract = %config.tesseract_path.display(),
        lang = %config.tesseract_lang,
        zbar = %config.zbar_path.display(),
        "Configuring recognition engines"
    );
    let recognizer = TesseractRecognizer::new(&config.tesseract_path, config.tesseract_lang.as_str())
        .with_page_seg_mode(config.tesseract_psm);
    let detector = ZbarDetector::new(&config.zbar_path);

    let notifier = WebhookNotifier::new(
        config.webhook_timeout(),
        config.webhook_max_retries,
        config.webhook_retry_base(),
    )
    .expect("Failed to initialize webhook client");

    let settings = config.orchestrator_settings();
    tracing::info!(temp_dir = %settings.temp_dir.display(), "Staging images on local disk");
    let orchestrator = JobOrchestrator::new(
        Arc::new(recognizer),
        Arc::new(detector),
        notifier,
        settings,
    );
    let _reaper = orchestrator.spawn_reaper(config.reaper_interval());

    let state = AppState::new(orchestrator);
    let app = routes::router(state, config.max_image_bytes, Some(prometheus_handle));

    tracing::info!("Starting docscan-ocr on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
