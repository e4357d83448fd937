use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use rental_session::events::{RefreshFailure, SessionEvent};
use rental_session::prelude::*;
use rental_session::storage::{FileStore, KeyValueStore, SessionFlags, SharedStore, TokenKind};
use serde_json::json;
use tokio::sync::broadcast;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_logger() {
    let _ = pretty_env_logger::try_init();
}

fn mint(expires_in: i64) -> String {
    let claims = json!({ "sub": "user-1", "exp": Utc::now().timestamp() + expires_in });
    encode(&Header::default(), &claims, &EncodingKey::from_secret(b"test")).unwrap()
}

fn options(server: &MockServer) -> SessionOptions {
    SessionOptions::default()
        .with_base_url(&server.uri())
        .with_retry(RetryPolicy::new(2, Duration::from_millis(10)))
        .with_startup_retry(RetryPolicy::new(1, Duration::from_millis(10)))
        .with_request_timeout(Some(Duration::from_secs(5)))
}

async fn next_event(events: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no session event within 5s")
        .unwrap()
}

#[tokio::test]
async fn test_concurrent_refreshes_make_one_call() {
    init_logger();
    // モックサーバーの起動
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(header("X-Client-Info", "rental-session/0.2.0"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "accessToken": mint(7200), "refreshToken": "r2" }))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let session = SessionManager::builder(options(&mock_server)).build().unwrap();
    session
        .login(
            TokenPair::new(mint(3600), Some("r1".to_string())),
            LoginOptions { keep_signed_in: true },
        )
        .unwrap();

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let session = session.clone();
            tokio::spawn(async move { session.refresh().await })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        if handle.await.unwrap() {
            succeeded += 1;
        }
    }
    assert_eq!(succeeded, 1);

    // debounce window
    assert!(!session.refresh().await);
    assert_eq!(session.token(TokenKind::Refresh).as_deref(), Some("r2"));
    assert_eq!(session.state(), SessionState::Authenticated);
}

#[tokio::test]
async fn test_transport_errors_retry_a_bounded_number_of_times() {
    init_logger();
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .expect(3)
        .mount(&mock_server)
        .await;

    let session = SessionManager::builder(options(&mock_server)).build().unwrap();
    let mut events = session.events().subscribe();
    let access = mint(3600);
    session
        .login(
            TokenPair::new(access.clone(), Some("r1".to_string())),
            LoginOptions { keep_signed_in: true },
        )
        .unwrap();

    assert!(!session.refresh().await);
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::RefreshFailed {
            reason: RefreshFailure::Transport
        }
    );

    // the old token is still good, nothing was thrown away
    assert_eq!(session.state(), SessionState::Authenticated);
    assert_eq!(session.token(TokenKind::Access), Some(access));
    assert_eq!(session.token(TokenKind::Refresh).as_deref(), Some("r1"));
    assert!(session.flags().persistent_login);
}

#[tokio::test]
async fn test_other_client_errors_are_retried() {
    init_logger();
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(403))
        .expect(2)
        .mount(&mock_server)
        .await;

    let options = options(&mock_server).with_retry(RetryPolicy::new(1, Duration::from_millis(10)));
    let session = SessionManager::builder(options).build().unwrap();
    session
        .login(
            TokenPair::new(mint(3600), Some("r1".to_string())),
            LoginOptions { keep_signed_in: true },
        )
        .unwrap();

    assert!(!session.refresh().await);
}

#[tokio::test]
async fn test_rejected_refresh_token_is_not_retried() {
    init_logger();
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "error": "invalid_grant" })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let session = SessionManager::builder(options(&mock_server)).build().unwrap();
    let mut events = session.events().subscribe();
    session
        .login(
            TokenPair::new(mint(3600), Some("r1".to_string())),
            LoginOptions { keep_signed_in: true },
        )
        .unwrap();

    assert!(!session.refresh().await);
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::RefreshFailed {
            reason: RefreshFailure::Rejected
        }
    );
    assert_eq!(session.state(), SessionState::Unauthenticated);
    assert_eq!(session.flags(), SessionFlags::default());
    assert_eq!(session.snapshot().next_refresh_at, None);
    // tokens stay for the UI to decide
    assert_eq!(session.token(TokenKind::Refresh).as_deref(), Some("r1"));
}

#[tokio::test]
async fn test_token_inside_window_refreshes_and_keeps_refresh_token() {
    init_logger();
    let mock_server = MockServer::start().await;
    let renewed = mint(3600);
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({ "refreshToken": "r1", "autoLogin": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accessToken": renewed })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let session = SessionManager::builder(options(&mock_server)).build().unwrap();
    let mut events = session.events().subscribe();

    // exp = now + 600s, ephemeral offset 900s: login fires the refresh at once
    session
        .login(
            TokenPair::new(mint(600), Some("r1".to_string())),
            LoginOptions::default(),
        )
        .unwrap();

    let SessionEvent::RefreshSucceeded { expires_at } = next_event(&mut events).await else {
        panic!("expected a successful refresh");
    };
    let expires_at = expires_at.unwrap();

    assert_eq!(session.token(TokenKind::Access), Some(renewed));
    assert_eq!(session.token(TokenKind::Refresh).as_deref(), Some("r1"));
    assert_eq!(session.state(), SessionState::Authenticated);
    assert_eq!(session.snapshot().next_refresh_at, Some(expires_at - 900));
}

#[tokio::test]
async fn test_access_token_refreshes_an_expired_token() {
    init_logger();
    let mock_server = MockServer::start().await;
    let renewed = mint(3600);
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "accessToken": renewed, "refreshToken": "r2" })),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let durable = SharedStore::new(Arc::new(rental_session::storage::MemoryStore::named("durable")));
    durable.set("accessToken", &mint(-60)).unwrap();
    durable.set("refreshToken", "r1").unwrap();

    let session = SessionManager::builder(options(&mock_server))
        .durable(durable)
        .build()
        .unwrap();

    assert!(!session.is_valid());
    assert_eq!(session.access_token().await, Some(renewed));
    assert_eq!(session.token(TokenKind::Refresh).as_deref(), Some("r2"));
}

#[tokio::test]
async fn test_restore_from_file_store_without_network() {
    init_logger();
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("session.json");
    let access = mint(7200);

    {
        let durable = SharedStore::new(Arc::new(FileStore::open(&file).unwrap()));
        let session = SessionManager::builder(options(&mock_server))
            .durable(durable)
            .build()
            .unwrap();
        session
            .login(
                TokenPair::new(access.clone(), Some("r1".to_string())),
                LoginOptions { keep_signed_in: true },
            )
            .unwrap();
        session.shutdown();
    }

    // 再起動
    let durable = SharedStore::new(Arc::new(FileStore::open(&file).unwrap()));
    let session = SessionManager::builder(options(&mock_server))
        .durable(durable)
        .build()
        .unwrap();

    assert!(session.restore().await);
    assert_eq!(session.state(), SessionState::Authenticated);
    assert_eq!(session.token(TokenKind::Access), Some(access));
    assert!(session.snapshot().next_refresh_at.is_some());
}

#[tokio::test]
async fn test_restore_refreshes_an_expired_session() {
    init_logger();
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({ "refreshToken": "r1", "autoLogin": true })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accessToken": mint(7200) })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path().join("session.json")).unwrap();
    store.set("accessToken", &mint(-60)).unwrap();
    store.set("refreshToken", "r1").unwrap();
    store.set("persistentLogin", "true").unwrap();
    store.set("autoLogin", "true").unwrap();

    let session = SessionManager::builder(options(&mock_server))
        .durable(SharedStore::new(Arc::new(store)))
        .build()
        .unwrap();

    assert!(session.restore().await);
    assert_eq!(session.state(), SessionState::Authenticated);
    assert!(session.is_valid());
    assert!(session.flags().auto_login);
}

#[tokio::test]
async fn test_failed_restore_clears_flags() {
    init_logger();
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;

    let durable = SharedStore::new(Arc::new(rental_session::storage::MemoryStore::named("durable")));
    durable.set("refreshToken", "revoked").unwrap();
    durable.set("persistentLogin", "true").unwrap();
    durable.set("autoLogin", "true").unwrap();

    let session = SessionManager::builder(options(&mock_server))
        .durable(durable)
        .build()
        .unwrap();
    let mut events = session.events().subscribe();

    assert!(!session.restore().await);
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::RefreshFailed {
            reason: RefreshFailure::Rejected
        }
    );
    assert_eq!(next_event(&mut events).await, SessionEvent::AutoLoginFailed);
    assert_eq!(session.flags(), SessionFlags::default());
    assert_eq!(session.state(), SessionState::Unauthenticated);
}

#[tokio::test]
async fn test_restore_not_requested() {
    init_logger();
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let durable = SharedStore::new(Arc::new(rental_session::storage::MemoryStore::named("durable")));
    durable.set("refreshToken", "r1").unwrap();

    let session = SessionManager::builder(options(&mock_server))
        .durable(durable)
        .build()
        .unwrap();

    assert!(!session.restore().await);
    assert_eq!(session.token(TokenKind::Refresh).as_deref(), Some("r1"));
}
