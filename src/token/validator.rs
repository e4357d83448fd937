//! Token validity checks against the wall clock

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use super::{decode, Claims};
use crate::clock::Clock;
use crate::storage::{TokenKind, TokenStore};

/// Result of checking the stored access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenStatus {
    /// No access token stored
    Missing,
    /// Stored token could not be decoded; the session was cleared
    Malformed,
    /// Token is past its effective expiry; it was removed from storage
    Expired(Claims),
    Valid { token: String, claims: Claims },
}

impl TokenStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, TokenStatus::Valid { .. })
    }
}

/// Answers "is the stored access token usable right now".
///
/// Checking is not read-only: a malformed token clears the whole session and
/// an expired one is removed from every backend, so no other component can
/// pick up a token that will never be usable.
#[derive(Clone)]
pub struct TokenValidator {
    store: TokenStore,
    clock: Arc<dyn Clock>,
    max_age: Duration,
}

impl TokenValidator {
    pub fn new(store: TokenStore, clock: Arc<dyn Clock>, max_age: Duration) -> Self {
        Self {
            store,
            clock,
            max_age,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.check().is_valid()
    }

    pub fn check(&self) -> TokenStatus {
        let Some(token) = self.store.read(TokenKind::Access) else {
            return TokenStatus::Missing;
        };

        let Some(claims) = decode(&token) else {
            warn!("Stored access token is malformed, clearing session");
            self.store.clear();
            return TokenStatus::Malformed;
        };

        let now = self.clock.unix_now();
        match self.expiry_of(&claims) {
            Some(expiry) if now < expiry => TokenStatus::Valid { token, claims },
            expiry => {
                debug!("Access token expired (expiry {:?}, now {})", expiry, now);
                self.store.clear_access();
                TokenStatus::Expired(claims)
            }
        }
    }

    /// Effective expiry of `claims`, using the login time for tokens that
    /// carry neither `exp` nor `iat`
    pub fn expiry_of(&self, claims: &Claims) -> Option<i64> {
        let login = if claims.exp.is_none() && claims.iat.is_none() {
            self.store.load_flags().login_timestamp
        } else {
            None
        };
        claims.effective_expiry(self.max_age, login)
    }
}
