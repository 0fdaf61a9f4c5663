//! Named response caches backed by SQLite.
//!
//! Each named cache is an independent key → response map. Writes replace in
//! place. An insertion sequence number is kept per row only so that caches
//! with an entry limit can evict the least recently added entries.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock};

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::HttpResponse;

/// Immutable assets fetched cache-first
pub const STATIC_ASSET_CACHE: &str = "static-assets";

/// Search responses keyed by request body hash
pub const SEARCH_CACHE: &str = "search-responses";

/// Precached application shell
pub const APP_SHELL_CACHE: &str = "app-shell";

/// Caches owned by this version of the layer
pub const KNOWN_CACHES: [&str; 3] = [STATIC_ASSET_CACHE, SEARCH_CACHE, APP_SHELL_CACHE];

/// Errors that can occur with the response cache
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage quota exceeded for cache '{cache}'")]
    QuotaExceeded { cache: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Limits applied to one named cache
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachePolicy {
    /// Keep at most this many entries, evicting the least recently added
    pub max_entries: Option<usize>,

    /// Total body bytes allowed in this cache
    pub quota_bytes: Option<u64>,

    /// Purge the whole cache when storage runs out, then retry the write
    pub purge_on_quota_error: bool,
}

impl CachePolicy {
    /// Policy for the static-asset cache
    pub fn static_assets(max_entries: usize, quota_bytes: Option<u64>) -> Self {
        Self {
            max_entries: Some(max_entries),
            quota_bytes,
            purge_on_quota_error: true,
        }
    }
}

/// SQLite-backed store of named response caches
pub struct ResponseCache {
    conn: Mutex<Connection>,
    policies: RwLock<HashMap<String, CachePolicy>>,
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    key TEXT NOT NULL,
    seq INTEGER NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_seq
    ON cache_entries(cache_name, seq);
"#;

impl ResponseCache {
    /// Open (or create) the cache database at `path`
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open a cache that lives only as long as this value
    pub fn open_in_memory() -> Result<Self, CacheError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Open the cache database in the configured home directory
    pub fn open_default() -> anyhow::Result<Self> {
        let path: PathBuf = crate::config::cache_db_path()?;
        Ok(Self::open(&path)?)
    }

    fn from_connection(conn: Connection) -> Result<Self, CacheError> {
        conn.execute_batch(CACHE_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            policies: RwLock::new(HashMap::new()),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.conn.lock().map_err(|_| CacheError::LockPoisoned)
    }

    /// Set the limits for a named cache
    pub fn set_policy(&self, cache: &str, policy: CachePolicy) -> Result<(), CacheError> {
        self.policies
            .write()
            .map_err(|_| CacheError::LockPoisoned)?
            .insert(cache.to_string(), policy);
        Ok(())
    }

    fn policy(&self, cache: &str) -> Result<CachePolicy, CacheError> {
        Ok(self
            .policies
            .read()
            .map_err(|_| CacheError::LockPoisoned)?
            .get(cache)
            .cloned()
            .unwrap_or_default())
    }

    /// Store a snapshot of `response` under `key`, replacing any previous one.
    ///
    /// When the cache's policy allows it, quota exhaustion purges the cache
    /// and the write is retried once.
    pub fn put(&self, cache: &str, key: &str, response: &HttpResponse) -> Result<(), CacheError> {
        let policy = self.policy(cache)?;

        match self.try_put(cache, key, response, &policy) {
            Err(CacheError::QuotaExceeded { .. }) if policy.purge_on_quota_error => {
                let purged = self.clear(cache)?;
                warn!(cache, purged, "Storage quota exceeded, purged cache");
                self.try_put(cache, key, response, &policy)
            }
            result => result,
        }
    }

    fn try_put(
        &self,
        cache: &str,
        key: &str,
        response: &HttpResponse,
        policy: &CachePolicy,
    ) -> Result<(), CacheError> {
        let headers = serde_json::to_string(&response.headers)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        if let Some(quota) = policy.quota_bytes {
            let used: i64 = tx.query_row(
                "SELECT COALESCE(SUM(LENGTH(body)), 0) FROM cache_entries
                 WHERE cache_name = ?1 AND key != ?2",
                params![cache, key],
                |row| row.get(0),
            )?;

            if used as u64 + response.body.len() as u64 > quota {
                return Err(CacheError::QuotaExceeded {
                    cache: cache.to_string(),
                });
            }
        }

        let seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM cache_entries",
            [],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT OR REPLACE INTO cache_entries
                 (cache_name, key, seq, status, status_text, headers, body, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now'))",
            params![
                cache,
                key,
                seq,
                response.status,
                response.status_text,
                headers,
                response.body
            ],
        )
        .map_err(|e| quota_or_database(cache, e))?;

        if let Some(max_entries) = policy.max_entries {
            let evicted = tx.execute(
                "DELETE FROM cache_entries
                 WHERE cache_name = ?1 AND seq NOT IN (
                     SELECT seq FROM cache_entries
                     WHERE cache_name = ?1
                     ORDER BY seq DESC
                     LIMIT ?2
                 )",
                params![cache, max_entries as i64],
            )?;

            if evicted > 0 {
                debug!(cache, evicted, "Evicted oldest cache entries");
            }
        }

        tx.commit().map_err(|e| quota_or_database(cache, e))?;
        Ok(())
    }

    /// Look up a stored response. Never touches the network.
    pub fn get(&self, cache: &str, key: &str) -> Result<Option<HttpResponse>, CacheError> {
        let conn = self.lock()?;

        let row: Option<(u16, String, String, Vec<u8>)> = conn
            .query_row(
                "SELECT status, status_text, headers, body FROM cache_entries
                 WHERE cache_name = ?1 AND key = ?2",
                params![cache, key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        match row {
            Some((status, status_text, headers, body)) => Ok(Some(HttpResponse {
                status,
                status_text,
                headers: serde_json::from_str(&headers)?,
                body,
            })),
            None => Ok(None),
        }
    }

    /// Remove a single entry. Returns true if it existed.
    pub fn delete(&self, cache: &str, key: &str) -> Result<bool, CacheError> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM cache_entries WHERE cache_name = ?1 AND key = ?2",
            params![cache, key],
        )?;
        Ok(deleted > 0)
    }

    /// Remove every entry of a named cache. Returns the number removed.
    pub fn clear(&self, cache: &str) -> Result<usize, CacheError> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM cache_entries WHERE cache_name = ?1",
            params![cache],
        )?;
        Ok(deleted)
    }

    /// Drop a named cache entirely, entries and policy
    pub fn delete_cache(&self, cache: &str) -> Result<usize, CacheError> {
        let deleted = self.clear(cache)?;
        self.policies
            .write()
            .map_err(|_| CacheError::LockPoisoned)?
            .remove(cache);
        Ok(deleted)
    }

    pub fn len(&self, cache: &str) -> Result<usize, CacheError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE cache_name = ?1",
            params![cache],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Keys of a named cache, oldest first
    pub fn keys(&self, cache: &str) -> Result<Vec<String>, CacheError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT key FROM cache_entries WHERE cache_name = ?1 ORDER BY seq")?;
        let keys = stmt
            .query_map(params![cache], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    /// Names of every cache holding at least one entry
    pub fn cache_names(&self) -> Result<Vec<String>, CacheError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT cache_name FROM cache_entries ORDER BY cache_name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }
}

/// Storage engines report a full disk as a plain database error
fn quota_or_database(cache: &str, error: rusqlite::Error) -> CacheError {
    match error.sqlite_error_code() {
        Some(ErrorCode::DiskFull) => CacheError::QuotaExceeded {
            cache: cache.to_string(),
        },
        _ => CacheError::Database(error),
    }
}

/// Stable content hash of a request body (hex SHA-256)
pub fn content_hash(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}
