use std::time::Duration;

use heroes_sync_core::SyncError;
use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::warn;

const MAX_RETRIES: u32 = 5;
const BASE_DELAY_MS: u64 = 200;

pub(crate) const USER_AGENT: &str = concat!("heroes-sync/", env!("CARGO_PKG_VERSION"));

/// Send a request, retrying with exponential backoff on 429.
///
/// Errors never carry the request URL, which may hold an auth token.
pub(crate) async fn send_with_retry(
    label: &str,
    build_request: impl Fn() -> RequestBuilder,
) -> Result<Response, SyncError> {
    let mut delay = Duration::from_millis(BASE_DELAY_MS);
    let mut attempt = 0;

    loop {
        let response = build_request()
            .send()
            .await
            .map_err(|e| {
                SyncError::Transport(format!("{} request failed: {}", label, e.without_url()))
            })?;

        if response.status() != StatusCode::TOO_MANY_REQUESTS {
            return Ok(response);
        }

        if attempt == MAX_RETRIES {
            let text = response.text().await.unwrap_or_default();
            return Err(SyncError::Transport(format!(
                "{} rate limited after {} retries: {}",
                label, MAX_RETRIES, text
            )));
        }

        attempt += 1;
        warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "{} rate limited (429), retrying",
            label
        );
        tokio::time::sleep(delay).await;
        delay *= 2;
    }
}

/// Turn a non-2xx response into a transport error carrying the body.
pub(crate) async fn ensure_success(label: &str, response: Response) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(SyncError::Transport(format!(
        "{} failed with status {}: {}",
        label, status, text
    )))
}

/// Decode a JSON response body, treating an undecodable body as a shape mismatch.
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    label: &str,
    response: Response,
) -> Result<T, SyncError> {
    let text = response
        .text()
        .await
        .map_err(|e| {
            SyncError::Transport(format!(
                "Failed to read {} response: {}",
                label,
                e.without_url()
            ))
        })?;
    serde_json::from_str(&text)
        .map_err(|e| SyncError::ShapeMismatch(format!("Unexpected {} response: {}", label, e)))
}
