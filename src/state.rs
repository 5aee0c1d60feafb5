//! In-memory chat state and its mutation operations.
//!
//! [`ChatState`] is the single source of truth for sessions, the current
//! selection, and the streaming cursor. Every mutation is synchronous and
//! atomic from a consumer's perspective; mutations targeting a session or
//! message that no longer exists are silent no-ops, which is what makes
//! interleavings between stream callbacks and UI actions (patch vs delete)
//! safe without locking discipline beyond the outer mutex.

use crate::model::{ChatMode, CodeBlock, Message, Source};
use crate::session::Session;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};

/// Handle shared between the controller, the stream engine, and consumers.
///
/// Constructed explicitly at application start; there is no process-wide
/// singleton. Lock scopes are short and never held across await points.
pub type SharedState = Arc<Mutex<ChatState>>;

/// Lock the shared state. Mutations are atomic and leave no partial state,
/// so a poisoned lock is recovered rather than propagated.
pub fn lock(state: &SharedState) -> MutexGuard<'_, ChatState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ============================================================================
// Patches
// ============================================================================

/// Partial update merged into a session by [`ChatState::update_session_meta`].
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub title: Option<String>,
    pub mode: Option<ChatMode>,
    /// Relative-time label refresh.
    pub timestamp: Option<String>,
}

/// Partial update merged into a message by [`ChatState::patch_message`].
///
/// `streaming_content` is doubly optional: the outer `None` leaves the field
/// untouched, `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub is_streaming: Option<bool>,
    pub streaming_content: Option<Option<String>>,
    pub timestamp: Option<DateTime<Utc>>,
    pub sources: Option<Vec<Source>>,
    pub code: Option<CodeBlock>,
}

impl MessagePatch {
    /// In-flight stream progress: mirror the accumulator into both content
    /// fields and refresh the timestamp.
    pub fn stream_progress(accumulated: &str) -> Self {
        Self {
            content: Some(accumulated.to_string()),
            streaming_content: Some(Some(accumulated.to_string())),
            timestamp: Some(Utc::now()),
            ..Self::default()
        }
    }

    /// Terminal finalization with the given content.
    pub fn finalized(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            is_streaming: Some(false),
            streaming_content: Some(None),
            ..Self::default()
        }
    }

    /// Terminal finalization that keeps whatever content has accumulated
    /// (cooperative cancel, forced local stop).
    pub fn interrupted() -> Self {
        Self {
            is_streaming: Some(false),
            streaming_content: Some(None),
            ..Self::default()
        }
    }
}

// ============================================================================
// Chat State
// ============================================================================

/// Authoritative in-memory store of sessions, selection, and the streaming
/// cursor.
#[derive(Debug, Default)]
pub struct ChatState {
    sessions: Vec<Session>,
    current_session_id: Option<String>,
    active_stream_id: Option<String>,
}

impl ChatState {
    /// Create an empty state: no sessions, no selection, no active stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap into the handle shared across tasks.
    pub fn into_shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// All sessions, newest first.
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn session(&self, session_id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == session_id)
    }

    pub fn current_session_id(&self) -> Option<&str> {
        self.current_session_id.as_deref()
    }

    /// The selected session. Selecting a deleted or unknown id yields `None`.
    pub fn current_session(&self) -> Option<&Session> {
        self.current_session_id
            .as_deref()
            .and_then(|id| self.session(id))
    }

    /// The message id currently receiving stream content, if any.
    pub fn active_stream_id(&self) -> Option<&str> {
        self.active_stream_id.as_deref()
    }

    /// Whether the given message exists and is still receiving content.
    pub fn message_is_streaming(&self, session_id: &str, message_id: &str) -> bool {
        self.session(session_id)
            .and_then(|s| s.message(message_id))
            .is_some_and(|m| m.is_streaming)
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Replace the entire session collection. Used once, at startup.
    pub fn load_sessions(&mut self, sessions: Vec<Session>) {
        self.sessions = sessions;
    }

    /// Prepend a session (newest first). Does not select it.
    pub fn create_session(&mut self, session: Session) {
        self.sessions.insert(0, session);
    }

    /// Merge fields into a session and refresh `last_activity`. No-op if the
    /// session is absent.
    pub fn update_session_meta(&mut self, session_id: &str, patch: SessionPatch) {
        let Some(session) = self.session_mut(session_id) else {
            return;
        };
        if let Some(title) = patch.title {
            session.title = title;
        }
        if let Some(mode) = patch.mode {
            session.mode = mode;
        }
        if let Some(timestamp) = patch.timestamp {
            session.timestamp = timestamp;
        }
        session.last_activity = Utc::now();
    }

    /// Remove a session. Clears the selection if it pointed at the removed
    /// session; any other selection is left untouched.
    pub fn delete_session(&mut self, session_id: &str) {
        self.sessions.retain(|s| s.id != session_id);
        if self.current_session_id.as_deref() == Some(session_id) {
            self.current_session_id = None;
        }
    }

    /// Set the current selection. Existence is not validated.
    pub fn select_session(&mut self, session_id: Option<&str>) {
        self.current_session_id = session_id.map(str::to_string);
    }

    /// Append a message to a session and refresh `last_activity`. No-op if
    /// the session is absent.
    pub fn append_message(&mut self, session_id: &str, message: Message) {
        let Some(session) = self.session_mut(session_id) else {
            return;
        };
        session.messages.push(message);
        session.last_activity = Utc::now();
    }

    /// Merge fields into one message and refresh the session's
    /// `last_activity`. No-op if the session or message is absent.
    pub fn patch_message(&mut self, session_id: &str, message_id: &str, patch: MessagePatch) {
        let Some(session) = self.session_mut(session_id) else {
            return;
        };
        let Some(message) = session.message_mut(message_id) else {
            return;
        };
        if let Some(content) = patch.content {
            message.content = content;
        }
        if let Some(is_streaming) = patch.is_streaming {
            message.is_streaming = is_streaming;
        }
        if let Some(streaming_content) = patch.streaming_content {
            message.streaming_content = streaming_content;
        }
        if let Some(timestamp) = patch.timestamp {
            message.timestamp = timestamp;
        }
        if let Some(sources) = patch.sources {
            message.sources = Some(sources);
        }
        if let Some(code) = patch.code {
            message.code = Some(code);
        }
        session.last_activity = Utc::now();
    }

    /// Overwrite a session's title. Separate from [`Self::update_session_meta`]
    /// because title derivation has its own at-most-once policy (see
    /// [`crate::controller`]).
    pub fn rename_session_title(&mut self, session_id: &str, title: impl Into<String>) {
        let Some(session) = self.session_mut(session_id) else {
            return;
        };
        session.title = title.into();
    }

    /// Track which single message, if any, is receiving stream content.
    pub fn set_active_stream_id(&mut self, message_id: Option<&str>) {
        self.active_stream_id = message_id.map(str::to_string);
    }

    fn session_mut(&mut self, session_id: &str) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == session_id)
    }
}

// ============================================================================
// Tests
// ============================================================================
