//! Stream ingestion engine.
//!
//! Drives one request/response streaming exchange: opens the transport call,
//! reads the record stream, and translates events into state mutations. The
//! engine never holds its own copy of a message: it issues patch commands
//! by (session id, message id), and every patch is guarded by "is the target
//! still streaming", which makes finalization idempotent and makes races
//! with user-triggered deletes harmless.
//!
//! The flow for one turn:
//! 1. Append the finalized user message (before any network activity, so the
//!    user always sees their input even if the connection fails instantly).
//! 2. Append an empty streaming assistant message and mark it active.
//! 3. Read records, accumulating `content` fragments engine-locally and
//!    mirroring the accumulator into the message.
//! 4. A terminal event (or any transport failure) finalizes the message and
//!    clears the active-stream cursor.

use crate::error::{Error, Result};
use crate::model::{CodeBlock, Message, ModeSuggestion, StreamEvent};
use crate::sse::EventStream;
use crate::state::{ChatState, MessagePatch, SharedState};
use crate::transport::{ChatTransport, StreamRequest};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Callback invoked when the server suggests switching modes.
pub type SuggestionHandler = Arc<dyn Fn(ModeSuggestion) + Send + Sync>;

/// Prefix for user-visible synthesized error content.
const ERROR_PREFIX: &str = "Sorry, I encountered an error";

/// The turn currently receiving stream content.
#[derive(Debug, Clone)]
struct ActiveTurn {
    session_id: String,
    message_id: String,
    request_id: Option<String>,
    cancelled: Arc<AtomicBool>,
}

/// Engine managing at most one live stream at a time.
pub struct StreamEngine {
    state: SharedState,
    transport: Arc<dyn ChatTransport>,
    idle_timeout: Duration,
    on_suggestion: Option<SuggestionHandler>,
    active: Mutex<Option<ActiveTurn>>,
}

impl StreamEngine {
    pub fn new(state: SharedState, transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            state,
            transport,
            idle_timeout: Duration::from_secs(60),
            on_suggestion: None,
            active: Mutex::new(None),
        }
    }

    /// Fail a turn locally when no data arrives for this long.
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Register the callback receiving `mode_suggestion` payloads.
    #[must_use]
    pub fn on_mode_suggestion(
        mut self,
        handler: impl Fn(ModeSuggestion) + Send + Sync + 'static,
    ) -> Self {
        self.on_suggestion = Some(Arc::new(handler));
        self
    }

    /// Whether a stream is currently live.
    pub fn is_streaming(&self) -> bool {
        self.lock_active().is_some()
    }

    /// Run a full conversational turn: user message plus streamed assistant
    /// reply. Returns the assistant message id.
    ///
    /// Transport and protocol failures are absorbed into the assistant
    /// message as synthesized error content; the only errors surfaced here
    /// are preconditions ([`Error::StreamBusy`], unknown session).
    pub async fn send_message(&self, request: StreamRequest) -> Result<String> {
        self.run_turn(request, true).await
    }

    /// Re-issue prior user content under a new mode as a fresh assistant
    /// stream. The original user message is not re-appended.
    pub async fn rerun_with_mode(&self, request: StreamRequest) -> Result<String> {
        self.run_turn(request, false).await
    }

    /// Cancel the live stream, if any.
    ///
    /// Local state is force-finalized immediately; the cancel request to the
    /// server is fire-and-forget and its outcome never gates local state.
    pub fn stop(&self) {
        let Some(turn) = self.lock_active().take() else {
            return;
        };
        turn.cancelled.store(true, Ordering::SeqCst);

        {
            let mut state = self.lock_state();
            if state.message_is_streaming(&turn.session_id, &turn.message_id) {
                state.patch_message(&turn.session_id, &turn.message_id, MessagePatch::interrupted());
            }
            if state.active_stream_id() == Some(turn.message_id.as_str()) {
                state.set_active_stream_id(None);
            }
        }

        if let Some(request_id) = turn.request_id {
            let transport = Arc::clone(&self.transport);
            tokio::spawn(async move {
                if let Err(err) = transport.cancel(&request_id).await {
                    tracing::warn!(request_id = %request_id, error = %err, "Stop request failed");
                }
            });
        }
    }

    // ------------------------------------------------------------------
    // Turn lifecycle
    // ------------------------------------------------------------------

    async fn run_turn(&self, request: StreamRequest, append_user: bool) -> Result<String> {
        let turn = self.begin_turn(&request, append_user)?;
        let message_id = turn.message_id.clone();

        match self.transport.open_stream(&request).await {
            Ok(bytes) => self.read_stream(EventStream::new(bytes), &turn).await,
            Err(err) => self.finalize_error(&turn, &err.to_string()),
        }

        self.release_turn(&turn);
        Ok(message_id)
    }

    /// Append the turn's messages and reserve the single stream slot.
    fn begin_turn(&self, request: &StreamRequest, append_user: bool) -> Result<ActiveTurn> {
        let mut active = self.lock_active();
        if active.is_some() {
            return Err(Error::StreamBusy);
        }

        let assistant = Message::assistant_placeholder(request.mode);
        let message_id = assistant.id.clone();
        {
            let mut state = self.lock_state();
            if state.session(&request.session_id).is_none() {
                return Err(Error::SessionNotFound {
                    id: request.session_id.clone(),
                });
            }
            if append_user {
                state.append_message(
                    &request.session_id,
                    Message::user(request.content.clone(), request.mode),
                );
            }
            state.append_message(&request.session_id, assistant);
            state.set_active_stream_id(Some(&message_id));
        }

        let turn = ActiveTurn {
            session_id: request.session_id.clone(),
            message_id,
            request_id: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        };
        *active = Some(turn.clone());
        Ok(turn)
    }

    async fn read_stream<S>(&self, mut events: EventStream<S>, turn: &ActiveTurn)
    where
        S: futures::Stream<Item = Result<Vec<u8>>> + Unpin,
    {
        let mut accumulated = String::new();
        let mut code: Option<CodeBlock> = None;

        loop {
            if turn.cancelled.load(Ordering::SeqCst) {
                // stop() already finalized local state.
                return;
            }

            let event = match tokio::time::timeout(self.idle_timeout, events.next()).await {
                Err(_) => {
                    let seconds = self.idle_timeout.as_secs();
                    self.finalize_error(turn, &Error::StreamIdle { seconds }.to_string());
                    return;
                }
                Ok(None) => {
                    // Closed without a terminal event: treat as aborted
                    // mid-read, unless a terminal event already settled it.
                    self.finalize_error(turn, "Stream ended unexpectedly");
                    return;
                }
                Ok(Some(Err(err))) => {
                    self.finalize_error(turn, &err.to_string());
                    return;
                }
                Ok(Some(Ok(event))) => event,
            };

            match event {
                StreamEvent::Start { request_id, .. } => self.record_request_id(turn, request_id),
                StreamEvent::Content { content } => {
                    accumulated.push_str(&content);
                    let mut state = self.lock_state();
                    if state.message_is_streaming(&turn.session_id, &turn.message_id) {
                        state.patch_message(
                            &turn.session_id,
                            &turn.message_id,
                            MessagePatch::stream_progress(&accumulated),
                        );
                    }
                }
                StreamEvent::ModeSuggestion { data } => {
                    if let Some(handler) = &self.on_suggestion {
                        handler(data);
                    }
                }
                StreamEvent::CodeBlock { language, content } => {
                    code = Some(CodeBlock { language, content });
                }
                StreamEvent::End { .. } => {
                    let mut patch = MessagePatch::finalized(accumulated);
                    patch.code = code;
                    self.finalize(turn, patch);
                    return;
                }
                StreamEvent::Error { error } => {
                    self.finalize_error(turn, &error);
                    return;
                }
                StreamEvent::Stopped { message } => {
                    tracing::debug!(message = %message, "Server acknowledged stop");
                    self.finalize(turn, MessagePatch::interrupted());
                    return;
                }
                StreamEvent::Done => {
                    // Pure signal. If no terminal event preceded it, settle
                    // with whatever accumulated rather than leaving the
                    // message streaming forever.
                    self.finalize(turn, MessagePatch::finalized(accumulated));
                    return;
                }
                StreamEvent::Unknown => {}
            }
        }
    }

    // ------------------------------------------------------------------
    // Finalization
    // ------------------------------------------------------------------

    /// Apply a terminal patch if the message is still streaming, and clear
    /// the active-stream cursor. Safe to call after `stop()` has already
    /// settled the turn.
    fn finalize(&self, turn: &ActiveTurn, patch: MessagePatch) {
        let mut state = self.lock_state();
        if state.message_is_streaming(&turn.session_id, &turn.message_id) {
            state.patch_message(&turn.session_id, &turn.message_id, patch);
        }
        if state.active_stream_id() == Some(turn.message_id.as_str()) {
            state.set_active_stream_id(None);
        }
    }

    fn finalize_error(&self, turn: &ActiveTurn, error: &str) {
        self.finalize(turn, MessagePatch::finalized(format!("{ERROR_PREFIX}: {error}")));
    }

    fn record_request_id(&self, turn: &ActiveTurn, request_id: String) {
        let mut active = self.lock_active();
        if let Some(current) = active.as_mut() {
            if current.message_id == turn.message_id {
                current.request_id = Some(request_id);
            }
        }
    }

    /// Drop the stream slot if this turn still owns it.
    fn release_turn(&self, turn: &ActiveTurn) {
        let mut active = self.lock_active();
        if active
            .as_ref()
            .is_some_and(|current| current.message_id == turn.message_id)
        {
            *active = None;
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ChatState> {
        crate::state::lock(&self.state)
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveTurn>> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
