//! Client-side authentication session manager
//!
//! Stores bearer tokens redundantly, validates them against the clock, keeps
//! them fresh with a single proactive refresh timer and a single-flight
//! refresh call, and keeps several execution contexts sharing one durable
//! backend behaving as one logical session.
//!
//! # Example
//!
//! ```no_run
//! use rental_session::prelude::*;
//!
//! # async fn run(access: String, refresh: String) -> Result<(), Error> {
//! let options = SessionOptions::default().with_base_url("https://api.example.com");
//! let session = SessionManager::builder(options).build()?;
//!
//! if !session.restore().await {
//!     session.login(
//!         TokenPair::new(access, Some(refresh)),
//!         LoginOptions { keep_signed_in: true },
//!     )?;
//! }
//! let bearer = session.access_token().await;
//! # let _ = bearer;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod fetch;
pub mod storage;
pub mod token;

pub use auth::{SessionManager, SessionManagerBuilder};

/// A convenience module for common imports
pub mod prelude {
    pub use crate::auth::{
        LoginOptions, RefreshClient, SessionManager, SessionSnapshot, SessionState, TokenPair,
    };
    pub use crate::config::{RetryPolicy, SessionOptions};
    pub use crate::error::Error;
    pub use crate::events::{EventKind, SessionEvent};
}
