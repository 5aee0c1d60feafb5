//! Transport seam for the streaming chat backend.
//!
//! The engine only ever asks the transport for two things: open one
//! streaming turn and cancel one by request id. Everything else (endpoints,
//! credentials, status handling) lives behind [`ChatTransport`], which keeps
//! the engine testable against scripted in-process transports.

use crate::auth::TokenProvider;
use crate::error::{Error, Result};
use crate::model::ChatMode;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;

/// Raw response bytes from an open streaming turn.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

// ============================================================================
// Requests
// ============================================================================

/// Outbound body for the "start streaming turn" endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StreamRequest {
    pub content: String,
    pub mode: ChatMode,
    pub session_id: String,
    /// Troubleshoot-mode context: the code under discussion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Troubleshoot-mode context: the error being diagnosed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamRequest {
    pub fn new(content: impl Into<String>, mode: ChatMode, session_id: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            mode,
            session_id: session_id.into(),
            code: None,
            error: None,
        }
    }
}

// ============================================================================
// Transport Trait
// ============================================================================

/// Collaborator that opens and cancels streaming turns.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Open a streaming turn; returns the raw response byte stream.
    async fn open_stream(&self, request: &StreamRequest) -> Result<ByteStream>;

    /// Ask the server to stop the turn identified by `request_id`.
    async fn cancel(&self, request_id: &str) -> Result<()>;
}

// ============================================================================
// HTTP Transport
// ============================================================================

/// Production transport over the chat backend's HTTP API.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    auth: Arc<dyn TokenProvider>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, auth: Arc<dyn TokenProvider>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
        }
    }

    /// Use a pre-configured client (timeouts, proxies, test harness).
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn open_stream(&self, request: &StreamRequest) -> Result<ByteStream> {
        let url = format!("{}/api/chat/message/stream", self.base_url);
        let response = self
            .authorize(self.client.post(&url))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::api(format!(
                "Chat API error (HTTP {status}): {body}"
            )));
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(Error::from));
        Ok(Box::pin(stream))
    }

    async fn cancel(&self, request_id: &str) -> Result<()> {
        let url = format!("{}/api/chat/stop/{request_id}", self.base_url);
        let response = self.authorize(self.client.post(&url)).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::api(format!(
                "Stop request failed (HTTP {status})"
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
