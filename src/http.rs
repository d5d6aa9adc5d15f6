//! Shared request plumbing for the management and storage clients.

use reqwest::{RequestBuilder, Response, StatusCode};

use crate::retry::{with_retry, IsRetryable, RetryConfig};

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("failed to build request: {0}")]
    Build(String),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },
}

impl HttpError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HttpError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }
}

impl IsRetryable for HttpError {
    fn is_retryable(&self) -> bool {
        match self {
            HttpError::Build(_) => false,
            HttpError::Transport(e) => e.is_timeout() || e.is_connect(),
            HttpError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS
                    || *status == StatusCode::INTERNAL_SERVER_ERROR
                    || *status == StatusCode::BAD_GATEWAY
                    || *status == StatusCode::SERVICE_UNAVAILABLE
                    || *status == StatusCode::GATEWAY_TIMEOUT
            }
        }
    }
}

/// Sends the request produced by `build`, retrying transient failures.
///
/// `build` runs once per attempt so date headers and signatures stay fresh.
/// Non-success responses become [`HttpError::Status`] carrying the response body.
pub async fn send_with_retry<F>(config: &RetryConfig, mut build: F) -> Result<Response, HttpError>
where
    F: FnMut() -> Result<RequestBuilder, HttpError>,
{
    with_retry(config, || {
        let request = build();
        async move {
            let response = request?.send().await?;
            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }
            let body = response.text().await.unwrap_or_default();
            Err(HttpError::Status { status, body })
        }
    })
    .await
}
