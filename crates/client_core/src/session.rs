use std::{collections::HashMap, fmt, sync::Arc};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use shared::domain::UserId;
use storage::Storage;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{info, warn};
use zeroize::Zeroize;

use crate::store::Store;

/// Fixed persistence key for the serialized session.
pub const SESSION_STORAGE_KEY: &str = "auth-storage";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(<redacted>)")
    }
}

impl Drop for Token {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Both tokens are present exactly when the session is authenticated; the
/// fields are private so no other shape can be built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    access_token: Option<Token>,
    refresh_token: Option<Token>,
    is_authenticated: bool,
}

impl SessionState {
    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn authenticated(access_token: Token, refresh_token: Token) -> Self {
        Self {
            access_token: Some(access_token),
            refresh_token: Some(refresh_token),
            is_authenticated: true,
        }
    }

    pub fn access_token(&self) -> Option<&Token> {
        self.access_token.as_ref()
    }

    pub fn refresh_token(&self) -> Option<&Token> {
        self.refresh_token.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated
    }

    fn to_persisted(&self) -> PersistedSession {
        PersistedSession {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            is_authenticated: self.is_authenticated,
        }
    }

    fn from_persisted(persisted: PersistedSession) -> Self {
        match (persisted.access_token, persisted.refresh_token) {
            (Some(access_token), Some(refresh_token)) => {
                Self::authenticated(access_token, refresh_token)
            }
            _ => Self::signed_out(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedSession {
    access_token: Option<Token>,
    refresh_token: Option<Token>,
    #[serde(default)]
    is_authenticated: bool,
}

#[async_trait]
pub trait SessionPersistence: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<String>>;
    async fn save(&self, key: &str, value: &str) -> Result<()>;
}

#[async_trait]
impl SessionPersistence for Storage {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        self.get_value(key).await
    }

    async fn save(&self, key: &str, value: &str) -> Result<()> {
        self.put_value(key, value).await
    }
}

/// Process-local persistence, for ephemeral sessions and tests.
#[derive(Default)]
pub struct MemorySessionPersistence {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySessionPersistence {
    pub async fn raw(&self, key: &str) -> Option<String> {
        self.entries.lock().await.get(key).cloned()
    }
}

#[async_trait]
impl SessionPersistence for MemorySessionPersistence {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn save(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

pub struct SessionStore {
    store: Store<SessionState>,
    persistence: Arc<dyn SessionPersistence>,
    // Serializes persistence writes so storage ends in the last committed state.
    write_lock: Mutex<()>,
}

impl SessionStore {
    pub fn new(persistence: Arc<dyn SessionPersistence>) -> Self {
        Self {
            store: Store::new(SessionState::signed_out()),
            persistence,
            write_lock: Mutex::new(()),
        }
    }

    /// Builds a store from persisted state. Tokens are trusted as-is; nothing
    /// is validated against the server until the first authorized call.
    pub async fn restore(persistence: Arc<dyn SessionPersistence>) -> Self {
        let session = Self::new(persistence);
        let restored = match session.load_persisted().await {
            Ok(Some(state)) => state,
            Ok(None) => SessionState::signed_out(),
            Err(err) => {
                warn!("session: failed to restore persisted session: {err:#}");
                SessionState::signed_out()
            }
        };
        info!(
            authenticated = restored.is_authenticated(),
            "session: restored"
        );
        session.store.replace(restored);
        session
    }

    async fn load_persisted(&self) -> Result<Option<SessionState>> {
        let Some(raw) = self.persistence.load(SESSION_STORAGE_KEY).await? else {
            return Ok(None);
        };
        let persisted: PersistedSession =
            serde_json::from_str(&raw).context("persisted session is not valid json")?;
        Ok(Some(SessionState::from_persisted(persisted)))
    }

    pub async fn login(&self, access_token: Token, refresh_token: Token) {
        let _guard = self.write_lock.lock().await;
        let snapshot = self
            .store
            .replace(SessionState::authenticated(access_token, refresh_token));
        info!("session: logged in");
        self.persist(&snapshot).await;
    }

    pub async fn logout(&self) {
        let _guard = self.write_lock.lock().await;
        let snapshot = self.store.replace(SessionState::signed_out());
        info!("session: logged out");
        self.persist(&snapshot).await;
    }

    async fn persist(&self, state: &SessionState) {
        if let Err(err) = self.write_persisted(state).await {
            warn!("session: failed to persist session state: {err:#}");
        }
    }

    async fn write_persisted(&self, state: &SessionState) -> Result<()> {
        let raw = serde_json::to_string(&state.to_persisted())
            .context("failed to serialize session state")?;
        self.persistence.save(SESSION_STORAGE_KEY, &raw).await
    }

    pub fn snapshot(&self) -> SessionState {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionState> {
        self.store.subscribe()
    }

    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.store.watch()
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.snapshot().is_authenticated()
    }

    pub fn access_token(&self) -> Option<Token> {
        self.store.snapshot().access_token().cloned()
    }

    /// The `userId` claim of the current access token, decoded locally.
    pub fn user_id(&self) -> Option<UserId> {
        let token = self.access_token()?;
        match user_id_from_token(&token) {
            Ok(user_id) => user_id,
            Err(err) => {
                warn!("session: failed to decode access token claims: {err:#}");
                None
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessTokenClaims {
    user_id: Option<String>,
    #[serde(default)]
    user: Option<ClaimsUser>,
}

#[derive(Debug, Deserialize)]
struct ClaimsUser {
    #[serde(rename = "_id")]
    id: Option<String>,
}

/// Reads the JWT payload without verifying the signature; only the server
/// can vouch for the token.
pub fn user_id_from_token(token: &Token) -> Result<Option<UserId>> {
    let payload = token
        .as_str()
        .split('.')
        .nth(1)
        .ok_or_else(|| anyhow!("access token is not a JWT"))?;
    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| anyhow!("invalid JWT payload encoding: {e}"))?;
    let claims: AccessTokenClaims =
        serde_json::from_slice(&decoded).context("invalid JWT payload json")?;
    Ok(claims
        .user_id
        .or_else(|| claims.user.and_then(|user| user.id))
        .map(UserId))
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
