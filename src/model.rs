//! Message types, chat modes, and streaming events.
//!
//! These types are the shared wire format used across the engine:
//! - The transport delivers [`StreamEvent`] records that incrementally build
//!   an assistant reply (see [`crate::sse`] and [`crate::stream`]).
//! - Sessions persist [`Message`] values as JSON (see [`crate::store`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Chat Modes
// ============================================================================

/// Conversational behavior profile for a session or message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    #[default]
    Standard,
    Research,
    Troubleshoot,
    Code,
}

impl std::fmt::Display for ChatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Research => write!(f, "research"),
            Self::Troubleshoot => write!(f, "troubleshoot"),
            Self::Code => write!(f, "code"),
        }
    }
}

impl std::str::FromStr for ChatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(Self::Standard),
            "research" => Ok(Self::Research),
            "troubleshoot" => Ok(Self::Troubleshoot),
            "code" => Ok(Self::Code),
            other => Err(format!("Unknown chat mode: {other}")),
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// One turn's content in a conversation.
///
/// Assistant messages are created empty with `is_streaming = true` and
/// repeatedly patched while their stream is live; they become immutable the
/// instant the stream reaches a terminal event. `streaming_content` exists
/// only in memory and is stripped before persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub role: MessageRole,
    pub content: String,
    pub mode: ChatMode,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streaming_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeBlock>,
}

impl Message {
    /// Create a finalized user message.
    pub fn user(content: impl Into<String>, mode: ChatMode) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: MessageRole::User,
            content: content.into(),
            mode,
            timestamp: Utc::now(),
            is_streaming: false,
            streaming_content: None,
            sources: None,
            code: None,
        }
    }

    /// Create an empty assistant message ready to receive stream content.
    pub fn assistant_placeholder(mode: ChatMode) -> Self {
        Self {
            id: format!("assistant_{}", uuid::Uuid::new_v4().simple()),
            role: MessageRole::Assistant,
            content: String::new(),
            mode,
            timestamp: Utc::now(),
            is_streaming: true,
            streaming_content: Some(String::new()),
            sources: None,
            code: None,
        }
    }
}

// ============================================================================
// Enrichments
// ============================================================================

/// A cited source attached to an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub url: String,
    pub r#type: String,
}

/// A code block extracted from an assistant response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlock {
    pub language: String,
    pub content: String,
}

/// A server-side suggestion to switch the conversation mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeSuggestion {
    pub suggested_mode: ChatMode,
    pub confidence: f64,
    pub reason: String,
    pub message: String,
}

// ============================================================================
// Stream Events
// ============================================================================

/// One record of the streaming response protocol.
///
/// The wire format is a `data: `-prefixed JSON object with a `type`
/// discriminator. The set is closed: records with an unrecognized type
/// deserialize to [`StreamEvent::Unknown`] and are ignored by the engine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// The server accepted the turn; carries the id used for cancellation.
    Start {
        message_id: String,
        request_id: String,
        #[serde(default)]
        timestamp: Option<String>,
    },
    /// A text fragment to append to the running reply.
    Content {
        #[serde(default)]
        content: String,
    },
    /// Suggestion to switch modes; forwarded to the caller, no state effect.
    ModeSuggestion { data: ModeSuggestion },
    /// A fenced code block detected server-side during code-mode streaming.
    CodeBlock { language: String, content: String },
    /// Normal completion. Terminal.
    End {
        #[serde(default)]
        message_id: String,
    },
    /// Server-signaled failure. Terminal.
    Error { error: String },
    /// Server acknowledged a client-initiated cancel. Terminal.
    Stopped {
        #[serde(default)]
        message: String,
    },
    /// Pure end-of-stream signal; no state effect.
    Done,
    /// Any record type this version does not know. Ignored.
    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    /// Whether this event ends the read loop.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::End { .. } | Self::Error { .. } | Self::Stopped { .. } | Self::Done
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
