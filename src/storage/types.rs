//! Types for storage operations

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Storage key of the access token
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Storage key of the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Flag keys
pub const PERSISTENT_LOGIN_KEY: &str = "persistentLogin";
pub const AUTO_LOGIN_KEY: &str = "autoLogin";
pub const IS_LOGGED_IN_KEY: &str = "isLoggedIn";
pub const LOGIN_TIMESTAMP_KEY: &str = "loginTimestamp";

pub(crate) const FLAG_KEYS: [&str; 4] = [
    PERSISTENT_LOGIN_KEY,
    AUTO_LOGIN_KEY,
    IS_LOGGED_IN_KEY,
    LOGIN_TIMESTAMP_KEY,
];

/// Which token to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Access => ACCESS_TOKEN_KEY,
            Self::Refresh => REFRESH_TOKEN_KEY,
        }
    }
}

/// How long a saved session should live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    /// Durable + session + cookie; survives a restart
    Persistent,
    /// Session + cookie only; gone when the context closes
    Ephemeral,
}

/// A change made to a shared backend by some context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    /// Context that made the change
    pub origin: Uuid,
}

impl StorageEvent {
    pub fn is_removal(&self) -> bool {
        self.new_value.is_none()
    }
}
