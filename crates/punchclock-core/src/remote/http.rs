//! HTTP implementation of the remote sync endpoint

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{
    Credentials, OperationRequest, RemoteError, RemoteResponse, RemoteResult, RemoteSync,
    SyncBatch, SyncBatchResponse,
};

/// Longest server message kept in an error
const MAX_ERROR_BODY: usize = 200;

/// Remote sync endpoint over HTTP/JSON
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn Credentials>,
    timeout: Duration,
}

impl HttpRemote {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<dyn Credentials>,
        timeout: Duration,
    ) -> RemoteResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> RemoteResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let mut request = self.client.post(&url).json(body);
        if let Some(token) = self.credentials.bearer_token() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &text));
        }

        serde_json::from_str(&text).map_err(|e| RemoteError::Malformed(e.to_string()))
    }

    fn transport_error(&self, error: reqwest::Error) -> RemoteError {
        if error.is_timeout() {
            RemoteError::Timeout(self.timeout)
        } else {
            RemoteError::Network(error.to_string())
        }
    }
}

impl RemoteSync for HttpRemote {
    fn send<'a>(&'a self, request: &'a OperationRequest) -> BoxFuture<'a, RemoteResult<RemoteResponse>> {
        async move {
            let path = format!("/sync/{}", request.entity_type.as_str());
            self.post_json(&path, request).await
        }
        .boxed()
    }

    fn sync_batch<'a>(&'a self, batch: &'a SyncBatch) -> BoxFuture<'a, RemoteResult<SyncBatchResponse>> {
        async move { self.post_json("/sync", batch).await }.boxed()
    }
}

/// Map a non-2xx status and its body onto a [`RemoteError`]
fn classify_status(status: u16, body: &str) -> RemoteError {
    let message = error_message(body);
    match status {
        401 | 403 => RemoteError::Unauthorized(message),
        _ => RemoteError::Status { status, message },
    }
}

/// Prefer the API's `{"error": "..."}` field, else a truncated body
fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(msg) = value.get("error").and_then(|v| v.as_str()) {
            return msg.to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "(empty body)".to_string();
    }
    trimmed.chars().take(MAX_ERROR_BODY).collect()
}
