//! Session records and the derived views computed from them.
//!
//! A session owns an ordered message history. Everything a renderer needs
//! beyond the raw history is derived on demand by pure functions here:
//! title derivation from the first user message, the user/assistant pairing
//! projection, and the human-readable relative-time label. None of these
//! derived views are ever stored back onto the session.

use crate::model::{ChatMode, Message, MessageRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title given to a session before the first user message names it.
pub const DEFAULT_TITLE: &str = "New conversation";

/// Longest title kept verbatim; longer first messages are truncated.
const TITLE_MAX_CHARS: usize = 50;
const TITLE_TRUNCATE_CHARS: usize = 47;

// ============================================================================
// Session
// ============================================================================

/// One conversation thread with its own id, mode, and message history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub mode: ChatMode,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub last_activity: DateTime<Utc>,
    /// Relative-time label ("Just now", "5 min ago"). Refreshed on demand,
    /// not live-ticking.
    pub timestamp: String,
}

impl Session {
    /// Create an empty session in the given mode. Does not select it.
    pub fn new(mode: ChatMode) -> Self {
        Self {
            id: format!("session_{}", uuid::Uuid::new_v4().simple()),
            title: DEFAULT_TITLE.to_string(),
            mode,
            messages: Vec::new(),
            last_activity: Utc::now(),
            timestamp: "Just now".to_string(),
        }
    }

    /// Whether the session still bears the default title sentinel.
    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_TITLE
    }

    pub fn message(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    pub fn message_mut(&mut self, message_id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == message_id)
    }
}

// ============================================================================
// Title Derivation
// ============================================================================

/// Derive a session title from the first user message content.
///
/// Trimmed content of at most 50 characters is used verbatim; anything
/// longer is cut to its first 47 characters plus an ellipsis marker.
pub fn derive_title(content: &str) -> String {
    let content = content.trim();
    if content.chars().count() <= TITLE_MAX_CHARS {
        return content.to_string();
    }
    let mut title: String = content.chars().take(TITLE_TRUNCATE_CHARS).collect();
    title.push_str("...");
    title
}

// ============================================================================
// Pairing Projection
// ============================================================================

/// A user message grouped with its immediately following assistant response,
/// if any. Display-only view; never stored.
#[derive(Debug, Clone, Copy)]
pub struct ConversationPair<'a> {
    pub user: &'a Message,
    pub assistant: Option<&'a Message>,
}

/// Group a flat message sequence into (user, assistant-or-pending) pairs.
///
/// Single forward scan: each user message pairs with the next message if and
/// only if that message is an assistant message; an unanswered user message
/// pairs with `None`. Assistant messages never pair backwards past another
/// user message.
pub fn conversation_pairs(messages: &[Message]) -> Vec<ConversationPair<'_>> {
    let mut pairs = Vec::new();
    let mut i = 0;
    while i < messages.len() {
        let message = &messages[i];
        if message.role == MessageRole::User {
            let assistant = messages
                .get(i + 1)
                .filter(|next| next.role == MessageRole::Assistant);
            if assistant.is_some() {
                i += 1;
            }
            pairs.push(ConversationPair {
                user: message,
                assistant,
            });
        }
        i += 1;
    }
    pairs
}

// ============================================================================
// Relative Time
// ============================================================================

/// Format a timestamp relative to `now` ("Just now", "5 min ago", ...).
pub fn relative_timestamp(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - then).num_minutes();
    if minutes < 1 {
        return "Just now".to_string();
    }
    if minutes < 60 {
        return format!("{minutes} min ago");
    }

    let hours = minutes / 60;
    if hours < 24 {
        return format!("{hours} hour{} ago", plural(hours));
    }

    let days = hours / 24;
    if days < 7 {
        return format!("{days} day{} ago", plural(days));
    }
    if days < 30 {
        let weeks = days / 7;
        return format!("{weeks} week{} ago", plural(weeks));
    }

    then.format("%Y-%m-%d").to_string()
}

fn plural(n: i64) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

// ============================================================================
// Tests
// ============================================================================
