//! Namespaced blob cache on SQLite.
//!
//! All durable bytes live here: record sets, original archive bytes, and
//! serialized index artifacts, scoped by `(namespace, key)`. A separate
//! `settings` table is the small string-keyed slot used for the schema
//! version marker (and for purging leftovers of older persistence
//! strategies).
//!
//! Absence of a value is a cache miss, never an error; only store-open and
//! I/O failures surface as [`CacheError::Unavailable`], and every caller in
//! this crate degrades to "nothing cached" on those.

use std::path::Path;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

/// Storage-layer failure. Always non-fatal for callers.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::Unavailable(e.to_string())
    }
}

/// Well-known keys of the persisted layout, shared by the loader, the index
/// manager, and the migrator.
pub const KEY_RECORDS: &str = "json";
pub const KEY_ARCHIVE: &str = "file";
pub const KEY_INDEX_META: &str = "search-index-meta";

/// Fixed prefix for rewritten keys (see [`normalize_key`]).
const KEY_PREFIX: &str = "/blob/";

/// Normalize a logical key into its storage form.
///
/// Storage keys are URL-like identifiers. A key containing a colon that is
/// not an `http(s)` URL is percent-encoded and rewritten under a fixed
/// same-origin path prefix. The mapping is deterministic — the same logical
/// key always normalizes identically — and no reverse lookup exists or is
/// needed.
pub fn normalize_key(key: &str) -> String {
    if key.starts_with("http://") || key.starts_with("https://") {
        return key.to_string();
    }
    if key.contains(':') {
        return format!("{KEY_PREFIX}{}", urlencoding::encode(key));
    }
    key.to_string()
}

/// Namespaced key/value blob store.
#[derive(Clone)]
pub struct BlobCache {
    pool: SqlitePool,
}

impl BlobCache {
    /// Open (creating if missing) the store at `path` and ensure its tables
    /// exist. Idempotent.
    pub async fn open(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| CacheError::Unavailable(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blobs (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (namespace, key)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_blobs_namespace ON blobs(namespace)")
            .execute(&pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Fetch raw bytes. `None` is a miss.
    pub async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let value: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT value FROM blobs WHERE namespace = ? AND key = ?")
                .bind(namespace)
                .bind(normalize_key(key))
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }

    /// Fetch a value as UTF-8 text. Invalid UTF-8 is treated as a miss.
    pub async fn get_text(&self, namespace: &str, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self
            .get(namespace, key)
            .await?
            .and_then(|bytes| String::from_utf8(bytes).ok()))
    }

    /// Fetch and deserialize a JSON value. Unparseable entries are treated
    /// as a miss (logged), so stale formats age out instead of erroring.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        let Some(bytes) = self.get(namespace, key).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::debug!(namespace, key, error = %e, "cached JSON no longer parseable, treating as miss");
                Ok(None)
            }
        }
    }

    /// Store raw bytes, overwriting any existing value.
    pub async fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), CacheError> {
        sqlx::query(
            r#"
            INSERT INTO blobs (namespace, key, value) VALUES (?, ?, ?)
            ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(namespace)
        .bind(normalize_key(key))
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Store UTF-8 text.
    pub async fn put_text(&self, namespace: &str, key: &str, value: &str) -> Result<(), CacheError> {
        self.put(namespace, key, value.as_bytes()).await
    }

    /// Serialize and store a JSON value.
    pub async fn put_json<T: Serialize>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
    ) -> Result<(), CacheError> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| CacheError::Unavailable(e.to_string()))?;
        self.put(namespace, key, &bytes).await
    }

    /// Delete one entry. Deleting a missing entry is a no-op.
    pub async fn delete(&self, namespace: &str, key: &str) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM blobs WHERE namespace = ? AND key = ?")
            .bind(namespace)
            .bind(normalize_key(key))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Enumerate every namespace currently holding at least one entry.
    pub async fn list_namespaces(&self) -> Result<Vec<String>, CacheError> {
        let namespaces: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT namespace FROM blobs ORDER BY namespace")
                .fetch_all(&self.pool)
                .await?;
        Ok(namespaces)
    }

    /// Drop a whole namespace and everything in it.
    pub async fn delete_namespace(&self, namespace: &str) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM blobs WHERE namespace = ?")
            .bind(namespace)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Read from the small string-keyed settings slot.
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, CacheError> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    /// Write to the settings slot, overwriting any existing value.
    pub async fn put_setting(&self, key: &str, value: &str) -> Result<(), CacheError> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove a settings entry. Missing entries are a no-op.
    pub async fn delete_setting(&self, key: &str) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_temp() -> (TempDir, BlobCache) {
        let tmp = TempDir::new().unwrap();
        let cache = BlobCache::open(&tmp.path().join("data").join("cache.sqlite"))
            .await
            .unwrap();
        (tmp, cache)
    }

    #[test]
    fn test_normalize_key_plain_passthrough() {
        assert_eq!(normalize_key("json"), "json");
        assert_eq!(normalize_key("file"), "file");
        assert_eq!(normalize_key("search-index-meta"), "search-index-meta");
    }

    #[test]
    fn test_normalize_key_http_passthrough() {
        assert_eq!(
            normalize_key("https://example.com/a:b"),
            "https://example.com/a:b"
        );
        assert_eq!(normalize_key("http://x/y"), "http://x/y");
    }

    #[test]
    fn test_normalize_key_colon_rewrite() {
        assert_eq!(
            normalize_key("index:bm25-v1:abcd1234"),
            "/blob/index%3Abm25-v1%3Aabcd1234"
        );
    }

    #[test]
    fn test_normalize_key_deterministic() {
        let key = "index:bm25-v1:deadbeef";
        assert_eq!(normalize_key(key), normalize_key(key));
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (_tmp, cache) = open_temp().await;
        cache.put("ns", "key", b"value").await.unwrap();
        assert_eq!(cache.get("ns", "key").await.unwrap(), Some(b"value".to_vec()));
    }

    #[tokio::test]
    async fn test_missing_is_none() {
        let (_tmp, cache) = open_temp().await;
        assert_eq!(cache.get("ns", "nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_colon_key_storage_roundtrip() {
        let (_tmp, cache) = open_temp().await;
        cache.put("ns", "index:tag:fp", b"blob").await.unwrap();
        // Same logical key resolves to the same normalized storage key.
        assert_eq!(cache.get("ns", "index:tag:fp").await.unwrap(), Some(b"blob".to_vec()));
    }

    #[tokio::test]
    async fn test_overwrite() {
        let (_tmp, cache) = open_temp().await;
        cache.put("ns", "k", b"one").await.unwrap();
        cache.put("ns", "k", b"two").await.unwrap();
        assert_eq!(cache.get("ns", "k").await.unwrap(), Some(b"two".to_vec()));
    }

    #[tokio::test]
    async fn test_namespaces_listed_and_deleted() {
        let (_tmp, cache) = open_temp().await;
        cache.put("ns-a", "k", b"1").await.unwrap();
        cache.put("ns-b", "k", b"2").await.unwrap();
        assert_eq!(cache.list_namespaces().await.unwrap(), vec!["ns-a", "ns-b"]);

        cache.delete_namespace("ns-a").await.unwrap();
        assert_eq!(cache.list_namespaces().await.unwrap(), vec!["ns-b"]);
        assert_eq!(cache.get("ns-a", "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_json_unparseable_is_miss() {
        let (_tmp, cache) = open_temp().await;
        cache.put("ns", "j", b"not json at all").await.unwrap();
        let parsed: Option<serde_json::Value> = cache.get_json("ns", "j").await.unwrap();
        assert!(parsed.is_none());
    }

    #[tokio::test]
    async fn test_settings_slot() {
        let (_tmp, cache) = open_temp().await;
        assert_eq!(cache.get_setting("schema_version").await.unwrap(), None);
        cache.put_setting("schema_version", "2").await.unwrap();
        assert_eq!(
            cache.get_setting("schema_version").await.unwrap(),
            Some("2".to_string())
        );
        cache.delete_setting("schema_version").await.unwrap();
        assert_eq!(cache.get_setting("schema_version").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_open_idempotent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cache.sqlite");
        let first = BlobCache::open(&path).await.unwrap();
        first.put("ns", "k", b"v").await.unwrap();
        drop(first);

        let second = BlobCache::open(&path).await.unwrap();
        assert_eq!(second.get("ns", "k").await.unwrap(), Some(b"v".to_vec()));
    }
}
