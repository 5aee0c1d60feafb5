//! Session lifecycle controller.
//!
//! Orchestrates session creation, title derivation, follow-up /
//! regenerate / mode-switch flows, and store/state coordination on load
//! and save. The controller owns the policy; the state machine owns the
//! data; the engine owns the wire.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{ChatMode, ModeSuggestion};
use crate::session::{self, Session};
use crate::state::{self, SessionPatch, SharedState};
use crate::store::SessionStore;
use crate::stream::StreamEngine;
use crate::transport::{ChatTransport, StreamRequest};
use chrono::Utc;
use std::sync::{Arc, Mutex};

/// Application-facing entry point for everything conversational.
pub struct ChatController {
    state: SharedState,
    store: SessionStore,
    engine: StreamEngine,
    suggestion: Arc<Mutex<Option<ModeSuggestion>>>,
    default_mode: ChatMode,
}

impl ChatController {
    pub fn new(
        config: &Config,
        state: SharedState,
        store: SessionStore,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        let suggestion = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&suggestion);
        let engine = StreamEngine::new(Arc::clone(&state), transport)
            .with_idle_timeout(config.idle_timeout())
            .on_mode_suggestion(move |incoming| {
                *lock_slot(&slot) = Some(incoming);
            });

        Self {
            state,
            store,
            engine,
            suggestion,
            default_mode: config.default_mode,
        }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    // ------------------------------------------------------------------
    // Startup / persistence
    // ------------------------------------------------------------------

    /// Load persisted sessions into the state machine. Called once, at
    /// startup.
    pub fn load(&self) {
        let sessions = self.store.load();
        state::lock(&self.state).load_sessions(sessions);
    }

    /// Write the current sessions to the store, if the state is settled.
    ///
    /// Only terminal (non-streaming) state is persisted, and only when there
    /// is something to persist; the store never sees a mid-stream message.
    pub fn persist(&self) {
        let snapshot = {
            let state = state::lock(&self.state);
            if state.active_stream_id().is_some() || state.sessions().is_empty() {
                None
            } else {
                Some(state.sessions().to_vec())
            }
        };
        if let Some(sessions) = snapshot {
            self.store.persist(&sessions);
        }
    }

    // ------------------------------------------------------------------
    // Session management
    // ------------------------------------------------------------------

    /// Create a session in the given mode (or the configured default),
    /// select it, and return its id.
    pub fn new_session(&self, mode: Option<ChatMode>) -> String {
        let session = Session::new(mode.unwrap_or(self.default_mode));
        let id = session.id.clone();
        {
            let mut state = state::lock(&self.state);
            state.create_session(session);
            state.select_session(Some(&id));
        }
        self.persist();
        id
    }

    pub fn select_session(&self, session_id: Option<&str>) {
        state::lock(&self.state).select_session(session_id);
    }

    /// Delete a session. Clears the selection if it pointed at the deleted
    /// session.
    pub fn delete_session(&self, session_id: &str) {
        state::lock(&self.state).delete_session(session_id);
        self.persist();
    }

    /// Refresh the relative-time label of a session from its last activity.
    pub fn refresh_timestamp(&self, session_id: &str) {
        let mut state = state::lock(&self.state);
        let Some(session) = state.session(session_id) else {
            return;
        };
        if session.messages.is_empty() {
            return;
        }
        let label = session::relative_timestamp(session.last_activity, Utc::now());
        state.update_session_meta(
            session_id,
            SessionPatch {
                timestamp: Some(label),
                ..SessionPatch::default()
            },
        );
    }

    // ------------------------------------------------------------------
    // Conversational turns
    // ------------------------------------------------------------------

    /// Send a user message in the given mode and stream the reply.
    ///
    /// Sessions are created implicitly when nothing is selected. Returns the
    /// assistant message id. Fails fast with [`Error::StreamBusy`] while
    /// another turn is live.
    pub async fn send_message(&self, content: &str, mode: ChatMode) -> Result<String> {
        let request = StreamRequest::new(content, mode, self.resolve_session(mode)?);
        self.run_send(request).await
    }

    /// Troubleshoot-mode send: composes the issue description and forwards
    /// the raw code/error as request context.
    pub async fn send_troubleshoot(
        &self,
        error: &str,
        code: Option<&str>,
        comments: Option<&str>,
    ) -> Result<String> {
        let mut content = format!("Issue: {error}");
        if let Some(code) = code {
            content.push_str(&format!("\n\nCode:\n{code}"));
        }
        if let Some(comments) = comments {
            content.push_str(&format!("\n\nContext:\n{comments}"));
        }

        let session_id = self.resolve_session(ChatMode::Troubleshoot)?;
        let mut request = StreamRequest::new(content, ChatMode::Troubleshoot, session_id);
        request.code = code.map(str::to_string);
        request.error = Some(error.to_string());
        self.run_send(request).await
    }

    /// Re-issue prior user content under the session's current mode as a
    /// fresh turn. The prior assistant message is left untouched in history.
    pub async fn regenerate(&self, content: &str) -> Result<String> {
        let (session_id, mode) = {
            let state = state::lock(&self.state);
            let session = state
                .current_session()
                .ok_or_else(|| Error::session("No session selected"))?;
            (session.id.clone(), session.mode)
        };
        let request = StreamRequest::new(content, mode, session_id);
        self.run_send(request).await
    }

    /// Re-issue prior user content under a new mode, without re-appending
    /// the user message. The session's mode follows the switch.
    pub async fn rerun_with_mode(&self, content: &str, new_mode: ChatMode) -> Result<String> {
        if self.engine.is_streaming() {
            return Err(Error::StreamBusy);
        }
        let session_id = {
            let state = state::lock(&self.state);
            state
                .current_session()
                .map(|s| s.id.clone())
                .ok_or_else(|| Error::session("No session selected"))?
        };

        state::lock(&self.state).update_session_meta(
            &session_id,
            SessionPatch {
                mode: Some(new_mode),
                ..SessionPatch::default()
            },
        );

        let request = StreamRequest::new(content, new_mode, session_id);
        let message_id = self.engine.rerun_with_mode(request).await?;
        self.persist();
        Ok(message_id)
    }

    /// Cancel the live stream, if any, and persist the settled result.
    pub fn stop(&self) {
        self.engine.stop();
        self.persist();
    }

    /// Whether a turn is currently streaming.
    pub fn is_streaming(&self) -> bool {
        self.engine.is_streaming()
    }

    // ------------------------------------------------------------------
    // Mode suggestions
    // ------------------------------------------------------------------

    /// The most recent server mode suggestion, if one is pending.
    pub fn pending_suggestion(&self) -> Option<ModeSuggestion> {
        lock_slot(&self.suggestion).clone()
    }

    /// Accept the pending suggestion: the current session switches to the
    /// suggested mode, which is returned for the caller's follow-up.
    pub fn accept_suggestion(&self) -> Option<ChatMode> {
        let suggestion = lock_slot(&self.suggestion).take()?;
        let mode = suggestion.suggested_mode;
        let session_id = {
            let state = state::lock(&self.state);
            state.current_session().map(|s| s.id.clone())
        };
        if let Some(session_id) = session_id {
            state::lock(&self.state).update_session_meta(
                &session_id,
                SessionPatch {
                    mode: Some(mode),
                    ..SessionPatch::default()
                },
            );
        }
        Some(mode)
    }

    /// Discard the pending suggestion.
    pub fn dismiss_suggestion(&self) {
        lock_slot(&self.suggestion).take();
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// The selected session's id, creating and selecting a session when
    /// nothing usable is selected.
    fn resolve_session(&self, mode: ChatMode) -> Result<String> {
        if self.engine.is_streaming() {
            return Err(Error::StreamBusy);
        }
        let existing = {
            let state = state::lock(&self.state);
            state.current_session().map(|s| s.id.clone())
        };
        Ok(match existing {
            Some(id) => id,
            None => self.new_session(Some(mode)),
        })
    }

    /// Shared tail of every user-visible send: derive the title from the
    /// first user message, run the turn, persist the settled session.
    async fn run_send(&self, request: StreamRequest) -> Result<String> {
        self.derive_title_if_default(&request.session_id, &request.content);
        let message_id = self.engine.send_message(request).await?;
        self.persist();
        Ok(message_id)
    }

    /// Title derivation policy: applied at most once, while the session
    /// still bears the default title. Later user messages never rename.
    fn derive_title_if_default(&self, session_id: &str, content: &str) {
        let mut state = state::lock(&self.state);
        let Some(session) = state.session(session_id) else {
            return;
        };
        if session.has_default_title() {
            state.rename_session_title(session_id, session::derive_title(content));
        }
    }
}

fn lock_slot(slot: &Arc<Mutex<Option<ModeSuggestion>>>) -> std::sync::MutexGuard<'_, Option<ModeSuggestion>> {
    match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ============================================================================
// Tests
// ============================================================================
