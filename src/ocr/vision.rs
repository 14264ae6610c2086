use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{OcrFuture, OcrProvider, TextAnnotation};
use crate::providers::retry::{
    RATE_LIMIT_BASE_DELAY, RATE_LIMIT_MAX_RETRIES, is_rate_limited, retry_after,
    wait_with_backoff,
};

pub(crate) const DEFAULT_VISION_URL: &str = "https://vision.googleapis.com/v1";

/// Google Cloud Vision `images:annotate` client using document text
/// detection.
#[derive(Debug, Clone)]
pub struct GoogleVision {
    key: String,
    base_url: String,
    client: reqwest::Client,
}

impl GoogleVision {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            base_url: DEFAULT_VISION_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        if !base_url.trim().is_empty() {
            self.base_url = base_url.trim_end_matches('/').to_string();
        }
        self
    }

    async fn document_text_detection(&self, image_bytes: &[u8]) -> Result<TextAnnotation> {
        let url = format!("{}/images:annotate", self.base_url);
        let body = json!({
            "requests": [
                {
                    "image": {"content": BASE64.encode(image_bytes)},
                    "features": [{"type": "DOCUMENT_TEXT_DETECTION"}]
                }
            ]
        });

        let mut attempt = 0usize;
        let mut delay = RATE_LIMIT_BASE_DELAY;
        loop {
            attempt += 1;
            let response = self
                .client
                .post(&url)
                .header("x-goog-api-key", &self.key)
                .json(&body)
                .send()
                .await
                .with_context(|| "failed to reach the Vision API")?;

            let status = response.status();
            let retry_after = retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            if status.is_success() {
                return parse_annotate_response(&text);
            }
            if is_rate_limited(status, &text) && attempt < RATE_LIMIT_MAX_RETRIES {
                delay = wait_with_backoff("Vision", attempt, delay, retry_after).await;
                continue;
            }
            return Err(anyhow!(
                "Vision API error ({}): {}",
                status,
                extract_error_message(&text).unwrap_or(text)
            ));
        }
    }
}

impl OcrProvider for GoogleVision {
    fn annotate<'a>(&'a self, image_bytes: &'a [u8]) -> OcrFuture<'a> {
        Box::pin(self.document_text_detection(image_bytes))
    }
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<ImageResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageResponse {
    full_text_annotation: Option<TextAnnotation>,
    error: Option<Status>,
}

#[derive(Debug, Deserialize)]
struct Status {
    code: Option<i64>,
    message: Option<String>,
}

/// Parses a successful `images:annotate` body. A per-image error status in
/// the body is still a failure; an image without text yields an empty tree.
pub fn parse_annotate_response(body: &str) -> Result<TextAnnotation> {
    let payload: AnnotateResponse =
        serde_json::from_str(body).with_context(|| "failed to parse Vision response JSON")?;
    let response = payload
        .responses
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Vision response contained no results"))?;

    if let Some(error) = response.error {
        let message = error.message.unwrap_or_default();
        if !message.trim().is_empty() {
            return Err(anyhow!(
                "OCR error ({}): {}",
                error.code.unwrap_or_default(),
                message
            ));
        }
    }

    let annotation = response.full_text_annotation.unwrap_or_default();
    debug!("OCR returned {} page(s)", annotation.pages.len());
    Ok(annotation)
}

fn extract_error_message(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<Status>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    parsed
        .error?
        .message
        .filter(|message| !message.trim().is_empty())
}
