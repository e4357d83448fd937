//! Persisted session flags

use chrono::{DateTime, Utc};

use super::Durability;

/// Process-wide flags written at login and cleared on logout
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFlags {
    /// The user asked to stay signed in
    pub persistent_login: bool,
    /// Restore the session automatically at startup
    pub auto_login: bool,
    pub is_logged_in: bool,
    pub login_timestamp: Option<DateTime<Utc>>,
}

impl SessionFlags {
    /// Flags for a fresh login
    pub fn for_login(keep_signed_in: bool, now: DateTime<Utc>) -> Self {
        Self {
            persistent_login: keep_signed_in,
            auto_login: keep_signed_in,
            is_logged_in: true,
            login_timestamp: Some(now),
        }
    }

    pub fn durability(&self) -> Durability {
        if self.persistent_login {
            Durability::Persistent
        } else {
            Durability::Ephemeral
        }
    }

    /// Whether startup restoration should be attempted
    pub fn wants_restore(&self) -> bool {
        self.persistent_login || self.auto_login
    }

    pub(crate) fn parse_bool(raw: Option<String>) -> bool {
        matches!(raw.as_deref(), Some("true"))
    }

    pub(crate) fn parse_timestamp(raw: Option<String>) -> Option<DateTime<Utc>> {
        let raw = raw?;
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        // older sessions stored epoch milliseconds
        raw.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis)
    }
}
