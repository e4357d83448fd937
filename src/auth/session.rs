//! Session data

use serde::{Deserialize, Serialize};

use crate::storage::Durability;

/// Access and refresh token as handed out by the auth API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    /// The access token
    pub access_token: String,

    /// The refresh token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
        }
    }
}

/// Login state of one context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Refreshing,
}

/// Options for [`SessionManager::login`](super::SessionManager::login)
#[derive(Debug, Clone, Copy, Default)]
pub struct LoginOptions {
    /// "Keep me signed in": persist across restarts and restore automatically
    pub keep_signed_in: bool,
}

/// Point-in-time view of a session, for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub subject: Option<String>,
    /// Effective expiry of the stored access token, unix seconds
    pub expires_at: Option<i64>,
    /// When the armed timer will fire, unix seconds
    pub next_refresh_at: Option<i64>,
    pub refreshing: bool,
    pub online: bool,
    pub durability: Durability,
}
