//! Per-session conversation history storage.
//!
//! The [`SessionStore`] is best-effort: every backend failure is logged and
//! mapped to an empty history (on load) or ignored (on save). When the cache
//! cannot be reached at startup the store runs in degraded mode, where loads
//! are always empty and saves do nothing.
//!
//! Writes are last-writer-wins. Two concurrent requests for the same session
//! can race and the later save overwrites the earlier one.

use crate::history::{truncate_history, HistoryEntry, HISTORY_LIMIT};
use async_trait::async_trait;
use planner_common::config::RedisConfig;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

/// Upper bound on the initial cache connection at startup.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Key under which a session's history is stored.
pub fn history_key(session_id: &str) -> String {
    format!("history:{session_id}")
}

// ============================================================================
// Backend
// ============================================================================

/// Errors from a key-value backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Command failed: {0}")]
    Command(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
            Self::Connection(e.to_string())
        } else {
            Self::Command(e.to_string())
        }
    }
}

/// Minimal string key-value contract used for history persistence.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    /// Backend name, for logs.
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Redis-backed storage.
pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    /// Open a managed connection to Redis.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(url).map_err(|e| StoreError::Connection(e.to_string()))?;

        let conn = tokio::time::timeout(CONNECT_TIMEOUT, client.get_connection_manager())
            .await
            .map_err(|_| StoreError::Connection(format!("timed out connecting to {url}")))?
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self { conn })
    }
}

#[async_trait]
impl KeyValueBackend for RedisBackend {
    fn name(&self) -> &str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }
}

/// In-process storage. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// ============================================================================
// Session Store
// ============================================================================

/// Maps session ids to bounded history logs.
#[derive(Clone)]
pub struct SessionStore {
    backend: Option<Arc<dyn KeyValueBackend>>,
    limit: usize,
}

impl SessionStore {
    /// Create a store over the given backend.
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        Self {
            backend: Some(backend),
            limit: HISTORY_LIMIT,
        }
    }

    /// Create a store that never persists anything.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            limit: HISTORY_LIMIT,
        }
    }

    /// Connect to Redis, falling back to a disabled store if it is unreachable.
    pub async fn connect(config: &RedisConfig) -> Self {
        if !config.enabled {
            tracing::info!("History cache disabled by configuration");
            return Self::disabled();
        }

        let url = config.url();
        match RedisBackend::connect(&url).await {
            Ok(backend) => {
                tracing::info!(host = %config.host, port = config.port, "Connected to history cache");
                Self::new(Arc::new(backend))
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    host = %config.host,
                    port = config.port,
                    "History cache unreachable, running without persisted history"
                );
                Self::disabled()
            }
        }
    }

    /// Whether a backend is attached.
    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Load the history for a session.
    ///
    /// Missing, unreadable, or malformed values all yield an empty history.
    pub async fn load(&self, session_id: &str) -> Vec<HistoryEntry> {
        let Some(backend) = &self.backend else {
            return Vec::new();
        };

        let key = history_key(session_id);
        let raw = match backend.get(&key).await {
            Ok(Some(raw)) if !raw.is_empty() => raw,
            Ok(_) => return Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, backend = backend.name(), key = %key, "Failed to load history");
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<HistoryEntry>>(&raw) {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Stored history is malformed, ignoring");
                Vec::new()
            }
        }
    }

    /// Persist the last entries of `history` for a session, replacing what was stored.
    pub async fn save(&self, session_id: &str, history: Vec<HistoryEntry>) {
        let Some(backend) = &self.backend else {
            return;
        };

        let key = history_key(session_id);
        let trimmed = truncate_history(history, self.limit);
        let payload = match serde_json::to_string(&trimmed) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Failed to serialize history");
                return;
            }
        };

        if let Err(e) = backend.set(&key, &payload).await {
            tracing::warn!(error = %e, backend = backend.name(), key = %key, "Failed to save history");
        } else {
            tracing::debug!(key = %key, entries = trimmed.len(), "History saved");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::Role;

    /// Backend whose every call fails.
    struct BrokenBackend;

    #[async_trait]
    impl KeyValueBackend for BrokenBackend {
        fn name(&self) -> &str {
            "broken"
        }

        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Connection("refused".into()))
        }

        async fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Connection("refused".into()))
        }
    }

    fn conversation(n: usize) -> Vec<HistoryEntry> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    HistoryEntry::user(format!("q{i}"))
                } else {
                    HistoryEntry::assistant(format!("a{i}"))
                }
            })
            .collect()
    }

    #[test]
    fn test_history_key() {
        assert_eq!(history_key("abc"), "history:abc");
        assert_eq!(history_key("anon"), "history:anon");
    }

    #[tokio::test]
    async fn test_load_missing_is_empty() {
        let store = SessionStore::new(Arc::new(MemoryBackend::new()));
        assert!(store.load("nobody").await.is_empty());
    }

    #[tokio::test]
    async fn test_save_truncates_to_last_thirty() {
        let backend = Arc::new(MemoryBackend::new());
        let store = SessionStore::new(backend.clone());

        let history = conversation(41);
        store.save("s1", history.clone()).await;

        let loaded = store.load("s1").await;
        assert_eq!(loaded.len(), HISTORY_LIMIT);
        assert_eq!(loaded.as_slice(), &history[11..]);

        let raw = backend.get("history:s1").await.unwrap().unwrap();
        let stored: Vec<HistoryEntry> = serde_json::from_str(&raw).unwrap();
        assert_eq!(stored.len(), 30);
    }

    #[tokio::test]
    async fn test_save_of_load_is_idempotent() {
        let backend = Arc::new(MemoryBackend::new());
        let store = SessionStore::new(backend.clone());
        store.save("s1", conversation(50)).await;
        let before = backend.get("history:s1").await.unwrap();

        let loaded = store.load("s1").await;
        store.save("s1", loaded).await;
        let after = backend.get("history:s1").await.unwrap();

        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_malformed_value_loads_empty() {
        let backend = Arc::new(MemoryBackend::new());
        let store = SessionStore::new(backend.clone());

        backend.set("history:s1", "{not json").await.unwrap();
        assert!(store.load("s1").await.is_empty());

        backend.set("history:s1", r#"{"role":"user"}"#).await.unwrap();
        assert!(store.load("s1").await.is_empty());

        backend.set("history:s1", "").await.unwrap();
        assert!(store.load("s1").await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_roles_survive_load_and_save() {
        let backend = Arc::new(MemoryBackend::new());
        let store = SessionStore::new(backend.clone());
        let stored = r#"[{"role":"user","content":"hi"},{"role":"tool","content":"x"}]"#;
        backend.set("history:s1", stored).await.unwrap();

        let loaded = store.load("s1").await;
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].role, Role::Other("tool".into()));

        store.save("s1", loaded).await;
        let after = backend.get("history:s1").await.unwrap();
        assert_eq!(after.as_deref(), Some(stored));
    }

    #[tokio::test]
    async fn test_null_content_keeps_the_rest_of_the_log() {
        let backend = Arc::new(MemoryBackend::new());
        let store = SessionStore::new(backend.clone());
        backend
            .set(
                "history:s1",
                r#"[{"role":"user","content":"hi"},{"role":"assistant","content":null},{"role":"user","content":"again"}]"#,
            )
            .await
            .unwrap();

        let loaded = store.load("s1").await;
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[1], HistoryEntry::assistant(""));
        assert_eq!(loaded[2], HistoryEntry::user("again"));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_swallowed() {
        let store = SessionStore::new(Arc::new(BrokenBackend));
        assert!(store.load("s1").await.is_empty());
        store.save("s1", conversation(3)).await;
    }

    #[tokio::test]
    async fn test_disabled_store_is_noop() {
        let store = SessionStore::disabled();
        assert!(!store.is_enabled());
        store.save("s1", conversation(3)).await;
        assert!(store.load("s1").await.is_empty());
    }

    #[tokio::test]
    async fn test_connect_with_unreachable_redis_degrades() {
        let config = RedisConfig {
            enabled: true,
            host: "127.0.0.1".into(),
            port: 1,
        };
        let store = SessionStore::connect(&config).await;
        assert!(!store.is_enabled());
        assert!(store.load("s1").await.is_empty());
    }

    #[tokio::test]
    async fn test_connect_disabled_by_config() {
        let config = RedisConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(!SessionStore::connect(&config).await.is_enabled());
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = SessionStore::new(Arc::new(MemoryBackend::new()));
        store.save("a", vec![HistoryEntry::user("from a")]).await;
        store.save("b", vec![HistoryEntry::user("from b")]).await;
        assert_eq!(store.load("a").await[0].content, "from a");
        assert_eq!(store.load("b").await[0].content, "from b");
    }
}
