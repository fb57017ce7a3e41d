use std::collections::BTreeMap;
use std::str::FromStr;

use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::job::{Delivery, StrategyKind};

/// Delivery options submitted alongside an image (non-file multipart fields).
#[derive(Debug, Default, Deserialize, Validate)]
pub struct SubmissionForm {
    #[garde(length(min = 1, max = 16))]
    pub strategy: Option<String>,

    #[garde(url, length(max = 2048))]
    pub webhook_url: Option<String>,

    #[garde(length(max = 32))]
    pub callback_headers: Option<BTreeMap<String, String>>,
}

impl SubmissionForm {
    /// Validate the raw fields and build the tagged delivery option.
    ///
    /// A missing strategy means `poll`; an unrecognized one is rejected.
    pub fn into_delivery(self) -> Result<Delivery, FormError> {
        self.validate()?;

        let kind = match self.strategy.as_deref() {
            None => StrategyKind::Poll,
            Some(tag) => StrategyKind::from_str(tag.trim())
                .map_err(|_| FormError::UnknownStrategy(tag.to_string()))?,
        };

        match kind {
            StrategyKind::Push => Ok(Delivery::Push),
            StrategyKind::Poll => Ok(Delivery::Poll),
            StrategyKind::Webhook => {
                let target = self.webhook_url.ok_or(FormError::MissingWebhookTarget)?;
                let url = reqwest::Url::parse(&target)
                    .map_err(|_| FormError::InvalidWebhookTarget(target.clone()))?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(FormError::InvalidWebhookTarget(target));
                }
                Ok(Delivery::Webhook {
                    target,
                    headers: self.callback_headers.unwrap_or_default(),
                })
            }
        }
    }
}

/// Response after submitting an image.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum FormError {
    #[error("Invalid submission fields: {0}")]
    Validation(#[from] garde::Report),

    #[error("Unknown delivery strategy: {0}")]
    UnknownStrategy(String),

    #[error("Webhook strategy requires a webhook_url")]
    MissingWebhookTarget,

    #[error("Webhook target must be an http(s) URL: {0}")]
    InvalidWebhookTarget(String),
}
