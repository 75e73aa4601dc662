use super::*;

struct FailingPersistence;

#[async_trait]
impl SessionPersistence for FailingPersistence {
    async fn load(&self, _key: &str) -> Result<Option<String>> {
        Err(anyhow!("disk unavailable"))
    }

    async fn save(&self, _key: &str, _value: &str) -> Result<()> {
        Err(anyhow!("disk unavailable"))
    }
}

fn jwt_with_payload(payload: &str) -> Token {
    Token::new(format!(
        "{}.{}.signature",
        URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(payload.as_bytes())
    ))
}

#[tokio::test]
async fn login_sets_both_tokens_and_logout_clears_them() {
    let session = SessionStore::new(Arc::new(MemorySessionPersistence::default()));
    assert!(!session.is_authenticated());

    session.login(Token::new("a"), Token::new("b")).await;
    let state = session.snapshot();
    assert!(state.is_authenticated());
    assert_eq!(state.access_token(), Some(&Token::new("a")));
    assert_eq!(state.refresh_token(), Some(&Token::new("b")));

    session.logout().await;
    let state = session.snapshot();
    assert!(!state.is_authenticated());
    assert_eq!(state.access_token(), None);
    assert_eq!(state.refresh_token(), None);
}

#[tokio::test]
async fn subscribers_only_observe_complete_session_states() {
    let session = SessionStore::new(Arc::new(MemorySessionPersistence::default()));
    let mut rx = session.subscribe();

    session.login(Token::new("a"), Token::new("b")).await;
    session.logout().await;

    let first = rx.recv().await.expect("login snapshot");
    assert_eq!(
        first,
        SessionState::authenticated(Token::new("a"), Token::new("b"))
    );
    let second = rx.recv().await.expect("logout snapshot");
    assert_eq!(second, SessionState::signed_out());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn login_persists_under_fixed_key() {
    let persistence = Arc::new(MemorySessionPersistence::default());
    let session = SessionStore::new(persistence.clone());
    session.login(Token::new("a"), Token::new("b")).await;

    let raw = persistence
        .raw(SESSION_STORAGE_KEY)
        .await
        .expect("persisted entry");
    let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(value["accessToken"], "a");
    assert_eq!(value["refreshToken"], "b");
    assert_eq!(value["isAuthenticated"], true);

    session.logout().await;
    let raw = persistence.raw(SESSION_STORAGE_KEY).await.expect("entry");
    let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
    assert!(value["accessToken"].is_null());
    assert_eq!(value["isAuthenticated"], false);
}

#[tokio::test]
async fn restore_reads_tokens_without_contacting_the_network() {
    let persistence = Arc::new(MemorySessionPersistence::default());
    SessionStore::new(persistence.clone())
        .login(Token::new("a"), Token::new("b"))
        .await;

    let restored = SessionStore::restore(persistence).await;
    assert!(restored.is_authenticated());
    assert_eq!(restored.access_token(), Some(Token::new("a")));
}

#[tokio::test]
async fn restore_normalizes_partial_records_to_signed_out() {
    let persistence = Arc::new(MemorySessionPersistence::default());
    persistence
        .save(
            SESSION_STORAGE_KEY,
            r#"{"accessToken":"a","refreshToken":null,"isAuthenticated":true}"#,
        )
        .await
        .expect("seed");

    let restored = SessionStore::restore(persistence).await;
    assert_eq!(restored.snapshot(), SessionState::signed_out());
}

#[tokio::test]
async fn restore_treats_corrupt_records_as_signed_out() {
    let persistence = Arc::new(MemorySessionPersistence::default());
    persistence
        .save(SESSION_STORAGE_KEY, "not json")
        .await
        .expect("seed");

    let restored = SessionStore::restore(persistence).await;
    assert!(!restored.is_authenticated());
}

#[tokio::test]
async fn session_survives_restart_through_sqlite_storage() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("session.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    {
        let storage = Storage::new(&database_url).await.expect("storage");
        let session = SessionStore::new(Arc::new(storage));
        session.login(Token::new("a"), Token::new("b")).await;
    }

    let storage = Storage::new(&database_url).await.expect("reopen");
    let restored = SessionStore::restore(Arc::new(storage)).await;
    assert_eq!(
        restored.snapshot(),
        SessionState::authenticated(Token::new("a"), Token::new("b"))
    );
}

#[tokio::test]
async fn persistence_failures_keep_the_in_memory_state() {
    let session = SessionStore::restore(Arc::new(FailingPersistence)).await;
    assert!(!session.is_authenticated());

    session.login(Token::new("a"), Token::new("b")).await;
    assert!(session.is_authenticated());
}

#[tokio::test]
async fn user_id_is_read_from_access_token_claims() {
    let session = SessionStore::new(Arc::new(MemorySessionPersistence::default()));
    assert_eq!(session.user_id(), None);

    session
        .login(
            jwt_with_payload(r#"{"userId":"u-42","exp":1700000000}"#),
            Token::new("refresh"),
        )
        .await;
    assert_eq!(session.user_id(), Some(UserId::new("u-42")));
}

#[test]
fn nested_user_claim_is_accepted() {
    let token = jwt_with_payload(r#"{"user":{"_id":"u-7"}}"#);
    assert_eq!(
        user_id_from_token(&token).expect("decode"),
        Some(UserId::new("u-7"))
    );
}

#[test]
fn opaque_tokens_fail_to_decode() {
    assert!(user_id_from_token(&Token::new("opaque")).is_err());
}

#[test]
fn token_debug_output_is_redacted() {
    let rendered = format!("{:?}", Token::new("secret-value"));
    assert!(!rendered.contains("secret-value"));
}
