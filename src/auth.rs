//! Bearer credential handling.
//!
//! The engine treats authentication as an opaque collaborator: something
//! that can hand out a bearer token and say whether it is still usable.
//! [`BearerAuth`] is the standard implementation, holding a JWT access
//! token and checking its `exp` claim locally.

use base64::Engine as _;
use chrono::Utc;
use serde_json::Value;
use std::sync::RwLock;

/// Opaque provider of a bearer credential.
pub trait TokenProvider: Send + Sync {
    /// The current bearer token, if one is set.
    fn token(&self) -> Option<String>;

    /// Whether a usable credential is available.
    fn is_valid(&self) -> bool;
}

/// JWT-backed bearer credential storage.
#[derive(Debug, Default)]
pub struct BearerAuth {
    token: RwLock<Option<String>>,
}

impl BearerAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    pub fn set_token(&self, token: impl Into<String>) {
        self.write_token(Some(token.into()));
    }

    /// Drop the stored credential (logout).
    pub fn clear(&self) {
        self.write_token(None);
    }

    fn write_token(&self, token: Option<String>) {
        // Token writes are atomic; recover the guard from poisoning.
        let mut guard = match self.token.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = token;
    }

    /// The authenticated user id from the token's `sub` (or legacy
    /// `user_id`) claim.
    pub fn user_id(&self) -> Option<String> {
        let token = self.token()?;
        let claims = decode_claims(&token)?;
        claims
            .get("sub")
            .or_else(|| claims.get("user_id"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

impl TokenProvider for BearerAuth {
    fn token(&self) -> Option<String> {
        match self.token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn is_valid(&self) -> bool {
        self.token().is_some_and(|token| !is_expired(&token))
    }
}

/// Decode the JWT payload segment without verifying the signature.
/// Validity here only means "not yet expired"; the backend is the authority.
fn decode_claims(token: &str) -> Option<Value> {
    let payload = token.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// A token that cannot be decoded counts as expired.
fn is_expired(token: &str) -> bool {
    let Some(exp) = decode_claims(token).and_then(|claims| claims.get("exp").and_then(Value::as_i64))
    else {
        return true;
    };
    exp <= Utc::now().timestamp()
}

// ============================================================================
// Tests
// ============================================================================
