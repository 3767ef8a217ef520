// ABOUTME: HTTP plumbing shared by the network adapters.
// ABOUTME: Builds clients and maps rejected requests onto RawEvent errors.

use crate::event::{ErrorCode, RawEvent};
use anyhow::{Context, Result};
use std::time::Duration;

const MAX_ERROR_BODY: usize = 512;

pub(crate) fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .context("Failed to build HTTP client")
}

/// Send a request, turning transport failures and non-2xx statuses into error events
pub(crate) async fn send(
    backend: &str,
    request: reqwest::RequestBuilder,
) -> std::result::Result<reqwest::Response, RawEvent> {
    let response = request.send().await.map_err(|e| {
        tracing::warn!(backend, error = %e, "Request failed");
        RawEvent::error(ErrorCode::Transport, format!("request failed: {}", e))
    })?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::warn!(backend, status = %status, "Backend rejected request");

    let code = if status == reqwest::StatusCode::UNAUTHORIZED
        || status == reqwest::StatusCode::FORBIDDEN
    {
        ErrorCode::AuthFailed
    } else {
        ErrorCode::Transport
    };

    let body = truncate(body.trim(), MAX_ERROR_BODY);
    let message = if body.is_empty() {
        format!("backend returned {}", status)
    } else {
        format!("backend returned {}: {}", status, body)
    };
    Err(RawEvent::error(code, message))
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
