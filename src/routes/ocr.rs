use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::{Stream, StreamExt};

use crate::app_state::AppState;
use crate::models::job::JobStatusResponse;
use crate::models::submission::{SubmissionForm, SubmitResponse};
use crate::routes::error::ApiError;
use crate::services::orchestrator::InputError;

/// POST /api/v1/ocr: Upload a page image for OCR.
///
/// Multipart fields: `image` (file), `strategy` (`push`, `webhook` or `poll`),
/// `webhook_url`, and `callback_headers` as a JSON object of header names to values.
pub async fn submit_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let mut image: Option<Vec<u8>> = None;
    let mut form = SubmissionForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| InputError::Malformed(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| InputError::Malformed(e.body_text()))?;
                image = Some(data.to_vec());
            }
            "strategy" | "webhook_url" | "callback_headers" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| InputError::Malformed(e.body_text()))?;
                match name.as_str() {
                    "strategy" => form.strategy = Some(text),
                    "webhook_url" => form.webhook_url = Some(text),
                    _ => {
                        let headers = serde_json::from_str(&text).map_err(|e| {
                            InputError::Malformed(format!("callback_headers: {}", e))
                        })?;
                        form.callback_headers = Some(headers);
                    }
                }
            }
            other => tracing::debug!(field = %other, "Ignoring unknown multipart field"),
        }
    }

    let image = image.ok_or_else(|| InputError::Malformed("missing 'image' field".to_string()))?;
    let delivery = form.into_delivery().map_err(InputError::from)?;
    let job_id = state.orchestrator.submit(image, delivery)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id,
            status: "processing".to_string(),
            message: "Image accepted for OCR".to_string(),
        }),
    ))
}

/// GET /api/v1/ocr/{job_id}: Current job state.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state.orchestrator.get_status(&job_id)?;
    Ok(Json(job.status_response()))
}

/// GET /api/v1/ocr/{job_id}/events: Server-sent events for push-strategy jobs.
pub async fn job_events(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let events = state.orchestrator.progress_channel(&job_id)?;
    let stream = events.map(|event| Event::default().event(event.name()).json_data(&event));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
