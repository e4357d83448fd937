//! Client-side authentication session management
//!
//! One [`SessionManager`] corresponds to one execution context (a tab, a
//! process). It owns the refresh timer and the single-flight refresh gate for
//! that context. Several managers sharing a durable [`SharedStore`] behave as
//! one logical session: token writes in one are picked up by the others.

mod client;
mod coordinator;
mod network;
mod restore;
mod scheduler;
mod session;
mod sync;
mod types;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use log::{info, trace, warn};
use reqwest::Client;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::config::SessionOptions;
use crate::error::Error;
use crate::events::{EventBus, LogoutReason, SessionEvent};
use crate::storage::{
    CookieStore, KeyValueStore, MemoryStore, SessionFlags, SharedStore, TokenKind, TokenStore,
};
use crate::token::{self, TokenStatus, TokenValidator};

pub use client::{HttpRefreshClient, RefreshClient};
pub use scheduler::{RefreshPlan, Urgency};
pub use session::*;
pub use types::*;

use coordinator::RefreshGate;
use scheduler::TimerSlot;

pub(crate) struct SessionInner {
    options: SessionOptions,
    clock: Arc<dyn Clock>,
    store: TokenStore,
    validator: TokenValidator,
    client: Arc<dyn RefreshClient>,
    events: EventBus,
    durable: SharedStore,
    timer: TimerSlot,
    gate: RefreshGate,
    online: AtomicBool,
    /// Bumped whenever a session ends; in-flight refreshes from an older
    /// epoch discard their result
    epoch: AtomicU64,
    state: RwLock<SessionState>,
    state_change: broadcast::Sender<SessionState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionInner {
    pub(crate) fn state(&self) -> SessionState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SessionState) {
        let mut current = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *current != state {
            info!("Session state changing from {:?} to {:?}", *current, state);
            *current = state;
            // Ignore send error if no receivers are listening
            let _ = self.state_change.send(state);
        } else {
            trace!("Session state already {:?}, not changing.", state);
        }
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn end_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// End the session: no timer, nothing stored, `Unauthenticated`
    fn sign_out(&self) {
        self.end_epoch();
        self.timer.cancel();
        self.store.clear();
        self.set_state(SessionState::Unauthenticated);
    }

    fn force_logout(&self, reason: LogoutReason) {
        warn!("Forcing logout: {:?}", reason);
        self.sign_out();
        self.events.publish(SessionEvent::ForcedLogout { reason });
    }

    fn track(&self, handle: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    fn abort_tasks(&self) {
        self.timer.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            task.abort();
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

/// Builder for [`SessionManager`]
pub struct SessionManagerBuilder {
    options: SessionOptions,
    clock: Option<Arc<dyn Clock>>,
    client: Option<Arc<dyn RefreshClient>>,
    http_client: Option<Client>,
    durable: Option<SharedStore>,
    session: Option<Arc<dyn KeyValueStore>>,
    cookie: Option<Arc<dyn KeyValueStore>>,
}

impl SessionManagerBuilder {
    fn new(options: SessionOptions) -> Self {
        Self {
            options,
            clock: None,
            client: None,
            http_client: None,
            durable: None,
            session: None,
            cookie: None,
        }
    }

    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use a custom refresh client instead of HTTP
    pub fn refresh_client(mut self, client: Arc<dyn RefreshClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Reuse an existing HTTP client for the refresh endpoint
    pub fn http_client(mut self, client: Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Durable backend, shared with the other contexts of the cluster
    pub fn durable(mut self, store: SharedStore) -> Self {
        self.durable = Some(store);
        self
    }

    /// Session-scoped backend private to this context
    pub fn session_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.session = Some(store);
        self
    }

    pub fn cookie_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.cookie = Some(store);
        self
    }

    /// Build the manager and start listening for changes from other contexts.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<SessionManager, Error> {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let client = match self.client {
            Some(client) => client,
            None => {
                let http = self.http_client.unwrap_or_default();
                Arc::new(HttpRefreshClient::new(http, &self.options)?)
            }
        };
        let durable = self
            .durable
            .unwrap_or_else(|| SharedStore::new(Arc::new(MemoryStore::named("durable"))));
        let session = self
            .session
            .unwrap_or_else(|| Arc::new(MemoryStore::named("session")));
        let cookie = self
            .cookie
            .unwrap_or_else(|| Arc::new(CookieStore::session(clock.clone())));

        let store = TokenStore::new(Arc::new(durable.clone()), session, cookie);
        let validator = TokenValidator::new(store.clone(), clock.clone(), self.options.max_token_age);
        let (state_change, _) = broadcast::channel(16);

        let inner = Arc::new(SessionInner {
            options: self.options,
            clock,
            store,
            validator,
            client,
            events: EventBus::new(),
            durable,
            timer: TimerSlot::new(),
            gate: RefreshGate::new(),
            online: AtomicBool::new(true),
            epoch: AtomicU64::new(0),
            state: RwLock::new(SessionState::Unauthenticated),
            state_change,
            tasks: Mutex::new(Vec::new()),
        });

        let listener = sync::spawn_listener(&inner);
        inner.track(listener);

        Ok(SessionManager { inner })
    }
}

/// Session manager for one execution context
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    /// Start building a manager with the given options
    pub fn builder(options: SessionOptions) -> SessionManagerBuilder {
        SessionManagerBuilder::new(options)
    }

    /// Store a freshly issued token pair and start the refresh schedule
    pub fn login(&self, tokens: TokenPair, options: LoginOptions) -> Result<(), Error> {
        token::try_decode(&tokens.access_token).map_err(Error::malformed)?;

        let inner = &self.inner;
        let flags = SessionFlags::for_login(options.keep_signed_in, inner.clock.now());
        inner.end_epoch();
        // peers read the durability from the flags when our token arrives
        inner.store.save_flags(&flags);
        if let Err(err) = inner.store.save(
            &tokens.access_token,
            tokens.refresh_token.as_deref(),
            flags.durability(),
        ) {
            inner.store.clear_flags();
            return Err(err.into());
        }

        info!("Logged in ({:?} session)", flags.durability());
        inner.set_state(SessionState::Authenticated);
        inner.arm(&tokens.access_token);
        Ok(())
    }

    /// Explicit logout
    pub fn logout(&self) {
        info!("Logging out");
        self.inner.sign_out();
    }

    /// Refresh now through the single-flight gate with the steady-state
    /// retry budget. `false` covers every non-success, including "another
    /// refresh is already running".
    pub async fn refresh(&self) -> bool {
        self.inner.refresh(self.inner.options.retry, 0).await
    }

    /// Decide at startup whether the persisted session can be resumed.
    ///
    /// Only attempted when `persistentLogin` or `autoLogin` is set. A valid
    /// stored token is used as is; otherwise one refresh is tried with the
    /// startup retry budget. On failure the flags are cleared and
    /// [`SessionEvent::AutoLoginFailed`] is published.
    pub async fn restore(&self) -> bool {
        self.inner.restore().await
    }

    /// (Re)arm the refresh timer for `access_token`
    pub fn arm(&self, access_token: &str) -> Option<RefreshPlan> {
        self.inner.arm(access_token)
    }

    /// Cancel the refresh timer, if any
    pub fn disarm(&self) -> bool {
        self.inner.timer.cancel()
    }

    /// A usable access token, refreshing first if the stored one is not
    pub async fn access_token(&self) -> Option<String> {
        let inner = &self.inner;
        if let TokenStatus::Valid { token, .. } = inner.validator.check() {
            return Some(token);
        }
        if inner.refresh(inner.options.retry, 0).await {
            return inner.store.read(TokenKind::Access);
        }
        // another caller's refresh may still be in flight
        inner.gate.settled().await;
        match inner.validator.check() {
            TokenStatus::Valid { token, .. } => Some(token),
            _ => None,
        }
    }

    /// Whether the stored access token is usable; expired or malformed
    /// tokens are removed as a side effect
    pub fn is_valid(&self) -> bool {
        self.inner.validator.is_valid()
    }

    /// Read-only copy of a stored token
    pub fn token(&self, kind: TokenKind) -> Option<String> {
        self.inner.store.read(kind)
    }

    pub fn flags(&self) -> SessionFlags {
        self.inner.store.load_flags()
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    pub fn on_state_change(&self) -> broadcast::Receiver<SessionState> {
        self.inner.state_change.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Report a connectivity change
    pub fn set_online(&self, online: bool) {
        self.inner.set_online(online);
    }

    /// Follow connectivity changes published on `status`
    pub fn watch_network(&self, status: watch::Receiver<bool>) {
        let task = network::spawn_watcher(&self.inner, status);
        self.inner.track(task);
    }

    /// Report that the context became visible or hidden
    pub fn on_visibility_change(&self, visible: bool) {
        if visible && self.inner.is_online() {
            self.inner.revalidate();
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = &self.inner;
        let claims = inner
            .store
            .read(TokenKind::Access)
            .and_then(|token| token::decode(&token));
        let expires_at = claims.as_ref().and_then(|c| inner.validator.expiry_of(c));

        SessionSnapshot {
            state: inner.state(),
            subject: claims.and_then(|c| c.sub),
            expires_at,
            next_refresh_at: inner.timer.fires_at(),
            refreshing: inner.gate.is_refreshing(),
            online: inner.is_online(),
            durability: inner.store.load_flags().durability(),
        }
    }

    /// Stop the refresh timer and background listeners
    pub fn shutdown(&self) {
        info!("Shutting down session manager");
        self.inner.abort_tasks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Durability;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn mint(expires_in: i64) -> String {
        let claims = json!({ "sub": "user-42", "exp": chrono::Utc::now().timestamp() + expires_in });
        encode(&Header::default(), &claims, &EncodingKey::from_secret(b"test")).unwrap()
    }

    #[test]
    fn test_logout_is_idempotent() {
        tokio_test::block_on(async {
            let session = SessionManager::builder(SessionOptions::default()).build().unwrap();
            session.logout();
            session.logout();
            assert_eq!(session.state(), SessionState::Unauthenticated);
            assert_eq!(session.token(TokenKind::Access), None);
        });
    }

    #[test]
    fn test_snapshot_after_login() {
        tokio_test::block_on(async {
            let session = SessionManager::builder(SessionOptions::default()).build().unwrap();
            let access = mint(7200);
            let expires_at = token::decode(&access).and_then(|claims| claims.exp);
            session
                .login(
                    TokenPair::new(access, Some("r1".to_string())),
                    LoginOptions {
                        keep_signed_in: true,
                    },
                )
                .unwrap();

            let snapshot = session.snapshot();
            assert_eq!(snapshot.state, SessionState::Authenticated);
            assert_eq!(snapshot.subject.as_deref(), Some("user-42"));
            assert_eq!(snapshot.expires_at, expires_at);
            assert_eq!(snapshot.next_refresh_at, expires_at.map(|exp| exp - 1800));
            assert_eq!(snapshot.durability, Durability::Persistent);
            assert!(snapshot.online);
            assert!(!snapshot.refreshing);
            session.shutdown();
        });
    }
}
