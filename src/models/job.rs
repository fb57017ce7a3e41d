use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::models::ocr::OcrResult;

/// Status of an OCR job. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

/// Strategy tag accepted at the submission boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StrategyKind {
    Push,
    Webhook,
    Poll,
}

/// How the caller is told that a job reached a terminal state.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Push,
    Webhook {
        target: String,
        headers: BTreeMap<String, String>,
    },
    Poll,
}

impl Delivery {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Delivery::Push => StrategyKind::Push,
            Delivery::Webhook { .. } => StrategyKind::Webhook,
            Delivery::Poll => StrategyKind::Poll,
        }
    }
}

/// An OCR job record, owned by the orchestrator. Only `status_response` and
/// `webhook_payload` leave the process; `delivery` may hold caller secrets.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<OcrResult>,
    pub error: Option<String>,
    pub delivery: Delivery,
}

impl Job {
    pub fn new(id: String, delivery: Delivery) -> Self {
        Self {
            id,
            status: JobStatus::Processing,
            created_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
            delivery,
        }
    }

    /// Move to `Completed`. Returns false if the job was already terminal.
    pub fn complete(&mut self, result: OcrResult) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        true
    }

    /// Move to `Failed`. Returns false if the job was already terminal.
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        true
    }

    pub fn status_response(&self) -> JobStatusResponse {
        JobStatusResponse {
            job_id: self.id.clone(),
            status: self.status,
            result: self.result.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }

    /// The event pushed to stream subscribers once the job is terminal.
    pub fn terminal_event(&self) -> Option<ProgressEvent> {
        match self.status {
            JobStatus::Processing => None,
            JobStatus::Completed => Some(ProgressEvent::Complete {
                result: self.result.clone().unwrap_or_default(),
            }),
            JobStatus::Failed => Some(ProgressEvent::Error {
                error: self.error.clone().unwrap_or_default(),
            }),
        }
    }

    pub fn webhook_payload(&self) -> WebhookPayload {
        WebhookPayload {
            job_id: self.id.clone(),
            status: self.status,
            result: self.result.clone(),
            error: self.error.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Response for querying job status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<OcrResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Event carried by a push-stream channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEvent {
    Progress { progress: u8, message: String },
    Complete { result: OcrResult },
    Error { error: String },
}

impl ProgressEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::Progress { .. } => "progress",
            ProgressEvent::Complete { .. } => "complete",
            ProgressEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressEvent::Progress { .. })
    }
}

/// Body of the outbound webhook POST.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<OcrResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}
