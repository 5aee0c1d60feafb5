//! Shared test harness: scripted and channel-driven in-process transports.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::channel::mpsc;
use quill::error::{Error, Result};
use quill::transport::{ByteStream, ChatTransport, StreamRequest};
use std::sync::Mutex;

// ============================================================================
// Wire Helpers
// ============================================================================

pub fn data_line(payload: serde_json::Value) -> Vec<u8> {
    format!("data: {payload}\n").into_bytes()
}

pub fn start_line(message_id: &str, request_id: &str) -> Vec<u8> {
    data_line(serde_json::json!({
        "type": "start",
        "message_id": message_id,
        "request_id": request_id,
    }))
}

pub fn content_line(content: &str) -> Vec<u8> {
    data_line(serde_json::json!({"type": "content", "content": content}))
}

pub fn end_line() -> Vec<u8> {
    data_line(serde_json::json!({"type": "end", "message_id": "m1"}))
}

pub fn error_line(error: &str) -> Vec<u8> {
    data_line(serde_json::json!({"type": "error", "error": error}))
}

pub fn stopped_line() -> Vec<u8> {
    data_line(serde_json::json!({"type": "stopped", "message": "Response generation stopped"}))
}

pub fn done_line() -> Vec<u8> {
    data_line(serde_json::json!({"type": "done"}))
}

// ============================================================================
// Scripted Transport
// ============================================================================

/// What one `open_stream` call should deliver.
pub enum Script {
    /// Deliver these chunks, then end the byte stream.
    Chunks(Vec<Vec<u8>>),
    /// Fail the open itself.
    OpenError(String),
    /// Deliver nothing and stay open until the idle timeout trips.
    Stall,
}

/// Transport that replays planned responses and records everything it is
/// asked to do.
pub struct ScriptedTransport {
    scripts: Mutex<Vec<Script>>,
    pub requests: Mutex<Vec<StreamRequest>>,
    pub cancels: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            requests: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
        }
    }

    /// Single response delivering the given chunks.
    pub fn replying(chunks: Vec<Vec<u8>>) -> Self {
        Self::new(vec![Script::Chunks(chunks)])
    }

    pub fn recorded_requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn recorded_cancels(&self) -> Vec<String> {
        self.cancels.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn open_stream(&self, request: &StreamRequest) -> Result<ByteStream> {
        self.requests.lock().unwrap().push(request.clone());
        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                Script::Chunks(vec![end_line()])
            } else {
                scripts.remove(0)
            }
        };
        match script {
            Script::Chunks(chunks) => {
                let items: Vec<Result<Vec<u8>>> = chunks.into_iter().map(Ok).collect();
                Ok(Box::pin(futures::stream::iter(items)))
            }
            Script::OpenError(message) => Err(Error::api(message)),
            Script::Stall => Ok(Box::pin(futures::stream::pending::<Result<Vec<u8>>>())),
        }
    }

    async fn cancel(&self, request_id: &str) -> Result<()> {
        self.cancels.lock().unwrap().push(request_id.to_string());
        Ok(())
    }
}

// ============================================================================
// Channel Transport
// ============================================================================

/// Transport whose response bytes are fed live from the test body, for
/// interleaving state mutations with stream events.
pub struct ChannelTransport {
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Result<Vec<u8>>>>>,
    pub cancels: Mutex<Vec<String>>,
    /// When set, `cancel` never resolves (used to prove stop() does not
    /// wait on the network).
    pub hang_cancels: bool,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedSender<Result<Vec<u8>>>) {
        let (sender, receiver) = mpsc::unbounded();
        (
            Self {
                receiver: Mutex::new(Some(receiver)),
                cancels: Mutex::new(Vec::new()),
                hang_cancels: false,
            },
            sender,
        )
    }

    pub fn hanging_cancel() -> (Self, mpsc::UnboundedSender<Result<Vec<u8>>>) {
        let (mut transport, sender) = Self::new();
        transport.hang_cancels = true;
        (transport, sender)
    }
}

#[async_trait]
impl ChatTransport for ChannelTransport {
    async fn open_stream(&self, _request: &StreamRequest) -> Result<ByteStream> {
        let receiver = self
            .receiver
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::api("channel transport already consumed"))?;
        Ok(Box::pin(receiver))
    }

    async fn cancel(&self, request_id: &str) -> Result<()> {
        self.cancels.lock().unwrap().push(request_id.to_string());
        if self.hang_cancels {
            futures::future::pending::<()>().await;
        }
        Ok(())
    }
}
