//! Cookie-jar backend

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{trace, warn};

use super::{KeyValueStore, StorageError};
use crate::clock::Clock;

#[derive(Debug, Clone)]
struct Cookie {
    /// Percent-encoded, as a browser cookie value would be
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

/// Cookie storage.
///
/// With a max-age every write sets an expiry evaluated against the injected
/// clock; without one the cookies live as long as the jar (session cookies).
pub struct CookieStore {
    clock: Arc<dyn Clock>,
    max_age: Option<Duration>,
    jar: Mutex<HashMap<String, Cookie>>,
}

impl CookieStore {
    pub fn new(clock: Arc<dyn Clock>, max_age: Option<Duration>) -> Self {
        Self {
            clock,
            max_age,
            jar: Mutex::new(HashMap::new()),
        }
    }

    /// Session cookies without an expiry
    pub fn session(clock: Arc<dyn Clock>) -> Self {
        Self::new(clock, None)
    }

    fn expiry(&self) -> Option<DateTime<Utc>> {
        let max_age = chrono::Duration::from_std(self.max_age?).ok()?;
        Some(self.clock.now() + max_age)
    }
}

impl KeyValueStore for CookieStore {
    fn name(&self) -> &str {
        "cookie"
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut jar = self.jar.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(cookie) = jar.get(key) else {
            return Ok(None);
        };

        if let Some(expires_at) = cookie.expires_at {
            if self.clock.now() >= expires_at {
                trace!("Cookie {} expired at {}", key, expires_at);
                jar.remove(key);
                return Ok(None);
            }
        }

        match urlencoding::decode(&cookie.value) {
            Ok(value) => Ok(Some(value.into_owned())),
            Err(err) => {
                warn!("Dropping undecodable cookie {}: {}", key, err);
                jar.remove(key);
                Ok(None)
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let cookie = Cookie {
            value: urlencoding::encode(value).into_owned(),
            expires_at: self.expiry(),
        };
        let mut jar = self.jar.lock().unwrap_or_else(PoisonError::into_inner);
        jar.insert(key.to_string(), cookie);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut jar = self.jar.lock().unwrap_or_else(PoisonError::into_inner);
        jar.remove(key);
        Ok(())
    }
}
