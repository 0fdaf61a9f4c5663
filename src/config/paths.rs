//! Canonical on-disk locations for offsync state.
//!
//! Single source of truth - import this instead of hardcoding paths.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use offsync::config::paths;
//!
//! let queues = paths::queue_log_path()?;
//! let caches = paths::cache_db_path()?;
//! ```
//!
//! | File | Purpose |
//! |------|---------|
//! | `queues.jsonl` | Append-only log of queue mutations |
//! | `cache.db` | Named response caches (SQLite) |

use std::path::{Path, PathBuf};

use anyhow::Result;

pub const QUEUE_LOG_FILE: &str = "queues.jsonl";
pub const CACHE_DB_FILE: &str = "cache.db";

/// Get the offsync home directory (from config, or ~/.offsync)
pub fn offsync_home() -> Result<PathBuf> {
    Ok(crate::config::config()?.home.clone())
}

/// Get the queue log path (~/.offsync/queues.jsonl)
pub fn queue_log_path() -> Result<PathBuf> {
    Ok(queue_log_in(&offsync_home()?))
}

/// Get the cache database path (~/.offsync/cache.db)
pub fn cache_db_path() -> Result<PathBuf> {
    Ok(cache_db_in(&offsync_home()?))
}

pub fn queue_log_in(home: &Path) -> PathBuf {
    home.join(QUEUE_LOG_FILE)
}

pub fn cache_db_in(home: &Path) -> PathBuf {
    home.join(CACHE_DB_FILE)
}
