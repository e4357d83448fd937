//! Redundant token persistence across the three backends

use std::sync::Arc;

use log::{debug, warn};

use super::{
    Durability, KeyValueStore, SessionFlags, StorageError, TokenKind, ACCESS_TOKEN_KEY,
    AUTO_LOGIN_KEY, FLAG_KEYS, IS_LOGGED_IN_KEY, LOGIN_TIMESTAMP_KEY, PERSISTENT_LOGIN_KEY,
    REFRESH_TOKEN_KEY,
};

/// Token storage replicated over durable, session and cookie backends.
///
/// Reads walk the backends in that order and return the first non-empty
/// value, so a value wiped from one backend (say by a privacy feature) is
/// still found in the others. Writes attempt every applicable backend even
/// when some of them fail.
#[derive(Clone)]
pub struct TokenStore {
    durable: Arc<dyn KeyValueStore>,
    session: Arc<dyn KeyValueStore>,
    cookie: Arc<dyn KeyValueStore>,
}

impl TokenStore {
    pub fn new(
        durable: Arc<dyn KeyValueStore>,
        session: Arc<dyn KeyValueStore>,
        cookie: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            durable,
            session,
            cookie,
        }
    }

    /// All backends in read-priority order
    fn backends(&self) -> [&dyn KeyValueStore; 3] {
        [&*self.durable, &*self.session, &*self.cookie]
    }

    fn token_targets(&self, durability: Durability) -> Vec<&dyn KeyValueStore> {
        match durability {
            Durability::Persistent => self.backends().to_vec(),
            Durability::Ephemeral => vec![&*self.session, &*self.cookie],
        }
    }

    fn flag_targets(&self) -> [&dyn KeyValueStore; 2] {
        [&*self.durable, &*self.session]
    }

    /// Write `value` under `key` to each target; returns how many accepted it
    fn write_all(&self, targets: &[&dyn KeyValueStore], key: &str, value: &str) -> usize {
        let mut written = 0;
        for backend in targets {
            match backend.set(key, value) {
                Ok(()) => written += 1,
                Err(err) => warn!("Failed to write {} to {} storage: {}", key, backend.name(), err),
            }
        }
        written
    }

    fn remove_everywhere(&self, key: &str) {
        for backend in self.backends() {
            if let Err(err) = backend.remove(key) {
                warn!("Failed to remove {} from {} storage: {}", key, backend.name(), err);
            }
        }
    }

    /// Persist a token pair.
    ///
    /// Fails only when no backend accepted the access token; partial failures
    /// are logged.
    pub fn save(
        &self,
        access: &str,
        refresh: Option<&str>,
        durability: Durability,
    ) -> Result<(), StorageError> {
        let targets = self.token_targets(durability);

        if durability == Durability::Ephemeral {
            // a stale durable copy would win the read priority
            for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
                if let Err(err) = self.durable.remove(key) {
                    warn!("Failed to drop durable {}: {}", key, err);
                }
            }
        }

        let written = self.write_all(&targets, ACCESS_TOKEN_KEY, access);
        if let Some(refresh) = refresh {
            if self.write_all(&targets, REFRESH_TOKEN_KEY, refresh) == 0 {
                warn!("Refresh token could not be stored in any backend");
            }
        }

        if written == 0 {
            return Err(StorageError::Unavailable(
                "no backend accepted the access token".to_string(),
            ));
        }
        debug!(
            "Saved {:?} session to {}/{} backends",
            durability,
            written,
            targets.len()
        );
        Ok(())
    }

    /// Read a token; first non-empty value in priority order wins
    pub fn read(&self, kind: TokenKind) -> Option<String> {
        self.read_key(kind.key())
    }

    fn read_key(&self, key: &str) -> Option<String> {
        for backend in self.backends() {
            match backend.get(key) {
                Ok(Some(value)) if !value.is_empty() => return Some(value),
                Ok(_) => {}
                Err(err) => warn!("Failed to read {} from {} storage: {}", key, backend.name(), err),
            }
        }
        None
    }

    /// Remove only the access token from every backend
    pub fn clear_access(&self) {
        self.remove_everywhere(ACCESS_TOKEN_KEY);
    }

    /// Remove both tokens and every session flag from every backend
    pub fn clear(&self) {
        self.remove_everywhere(ACCESS_TOKEN_KEY);
        self.remove_everywhere(REFRESH_TOKEN_KEY);
        self.clear_flags();
        debug!("Cleared session storage");
    }

    pub fn load_flags(&self) -> SessionFlags {
        SessionFlags {
            persistent_login: SessionFlags::parse_bool(self.read_key(PERSISTENT_LOGIN_KEY)),
            auto_login: SessionFlags::parse_bool(self.read_key(AUTO_LOGIN_KEY)),
            is_logged_in: SessionFlags::parse_bool(self.read_key(IS_LOGGED_IN_KEY)),
            login_timestamp: SessionFlags::parse_timestamp(self.read_key(LOGIN_TIMESTAMP_KEY)),
        }
    }

    pub fn save_flags(&self, flags: &SessionFlags) {
        let targets = self.flag_targets();
        self.write_all(&targets, PERSISTENT_LOGIN_KEY, &flags.persistent_login.to_string());
        self.write_all(&targets, AUTO_LOGIN_KEY, &flags.auto_login.to_string());
        self.write_all(&targets, IS_LOGGED_IN_KEY, &flags.is_logged_in.to_string());
        match flags.login_timestamp {
            Some(ts) => {
                self.write_all(&targets, LOGIN_TIMESTAMP_KEY, &ts.to_rfc3339());
            }
            None => self.remove_everywhere(LOGIN_TIMESTAMP_KEY),
        }
    }

    pub fn clear_flags(&self) {
        for key in FLAG_KEYS {
            self.remove_everywhere(key);
        }
    }
}
