//! Durable session storage.
//!
//! Sessions are persisted as a single JSON document that is overwritten
//! wholesale on every settled mutation; there is no incremental diffing.
//! The store is read once at startup and never consulted during an active
//! session, so the in-memory state stays authoritative whether or not a
//! write succeeds.

use crate::session::Session;
use serde_json::Value;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// File-backed store mapping session ids to session records.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Create a store backed by the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create a store at the default location (`$QUILL_DATA_DIR` or
    /// `~/.quill`).
    pub fn default_location() -> Self {
        Self::new(data_dir_from_env(env_lookup).join("sessions.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all persisted sessions.
    ///
    /// Fails soft on every level: a missing or unreadable file yields an
    /// empty collection, and malformed entries are dropped individually so
    /// one corrupt record never takes down the rest. Loaded messages are
    /// re-materialized with their streaming state reset.
    pub fn load(&self) -> Vec<Session> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "Failed to read session store");
                return Vec::new();
            }
        };

        let entries: Vec<Value> = match serde_json::from_str(&content) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "Session store is not a JSON array");
                return Vec::new();
            }
        };

        entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value::<Session>(entry) {
                Ok(session) => Some(session),
                Err(err) => {
                    tracing::warn!(error = %err, "Dropping malformed session entry");
                    None
                }
            })
            .map(reset_streaming_state)
            .collect()
    }

    /// Overwrite the stored collection with the given sessions.
    ///
    /// Streaming state is stripped from a sanitized copy before writing.
    /// Serialization and IO failures are logged and swallowed; in-memory
    /// state remains the source of truth regardless.
    pub fn persist(&self, sessions: &[Session]) {
        let sanitized: Vec<Session> = sessions
            .iter()
            .cloned()
            .map(reset_streaming_state)
            .collect();

        if let Err(err) = self.write_atomic(&sanitized) {
            tracing::warn!(path = %self.path.display(), error = %err, "Failed to persist sessions");
        }
    }

    fn write_atomic(&self, sessions: &[Session]) -> crate::error::Result<()> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }

        let mut contents = serde_json::to_string_pretty(sessions)?;
        contents.push('\n');

        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|err| {
            crate::error::Error::store(format!(
                "Failed to persist session store to {}: {}",
                self.path.display(),
                err.error
            ))
        })?;
        Ok(())
    }
}

/// Force every message back to a settled, non-streaming shape.
fn reset_streaming_state(mut session: Session) -> Session {
    for message in &mut session.messages {
        message.is_streaming = false;
        message.streaming_content = None;
    }
    session
}

fn env_lookup(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

fn data_dir_from_env<F>(get_env: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    get_env("QUILL_DATA_DIR").map_or_else(
        || {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".quill")
        },
        PathBuf::from,
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChatMode, Message};
    use std::collections::HashMap;

    fn session_with_messages() -> Session {
        let mut session = Session::new(ChatMode::Research);
        session.messages.push(Message::user("hello", ChatMode::Research));
        let mut reply = Message::assistant_placeholder(ChatMode::Research);
        reply.content = "world".to_string();
        session.messages.push(reply);
        session
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("sessions.json"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_persist_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("sessions.json"));
        let session = session_with_messages();
        let id = session.id.clone();

        store.persist(&[session]);
        let loaded = store.load();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, id);
        assert_eq!(loaded[0].messages.len(), 2);
        assert_eq!(loaded[0].messages[1].content, "world");
    }

    #[test]
    fn test_streaming_state_is_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("sessions.json"));
        let session = session_with_messages();

        // The placeholder still claims to be streaming when persisted.
        assert!(session.messages[1].is_streaming);
        store.persist(&[session]);

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("streaming_content"));

        let loaded = store.load();
        assert!(loaded[0].messages.iter().all(|m| !m.is_streaming));
        assert!(loaded[0].messages.iter().all(|m| m.streaming_content.is_none()));
    }

    #[test]
    fn test_malformed_entries_are_dropped_individually() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        let good = serde_json::to_value(session_with_messages()).unwrap();
        let bad = serde_json::json!({"id": 42, "not": "a session"});
        std::fs::write(&path, serde_json::to_string(&[bad, good]).unwrap()).unwrap();

        let store = SessionStore::new(path);
        let loaded = store.load();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn test_garbage_file_is_empty_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        std::fs::write(&path, "not json at all").unwrap();
        assert!(SessionStore::new(path).load().is_empty());
    }

    #[test]
    fn test_persist_overwrites_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("sessions.json"));
        let first = session_with_messages();
        let second = session_with_messages();
        let second_id = second.id.clone();

        store.persist(&[first, second.clone()]);
        store.persist(&[second]);

        let loaded = store.load();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, second_id);
    }

    #[test]
    fn test_data_dir_env_override() {
        let mut env = HashMap::new();
        env.insert("QUILL_DATA_DIR".to_string(), "/tmp/quill-test".to_string());
        let dir = data_dir_from_env(|key| env.get(key).cloned());
        assert_eq!(dir, PathBuf::from("/tmp/quill-test"));

        let fallback = data_dir_from_env(|_| None);
        assert!(fallback.ends_with(".quill"));
    }
}
