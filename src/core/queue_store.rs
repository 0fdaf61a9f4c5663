//! Durable queue store for deferred operations.
//!
//! Append-only JSONL log with state derived from replay. Every mutation is a
//! new line, fsynced before the call returns, so queue contents survive a
//! process restart. Writers take an exclusive file lock so two processes
//! sharing a home directory cannot interleave partial lines.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::QueueName;

/// Errors that can occur with the queue store
#[derive(Debug, Error)]
pub enum QueueStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt queue log at line {line}: {source}")]
    Corrupt {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Queue writer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// An event in the queue log (append-only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEvent {
    /// When this event occurred
    pub timestamp: DateTime<Utc>,

    /// Queue the event applies to
    pub queue: QueueName,

    /// Type of queue event
    pub event_type: QueueEventType,

    /// The payload (absent for `Cleared`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<Value>,
}

impl QueueEvent {
    fn new(queue: QueueName, event_type: QueueEventType, item: Option<Value>) -> Self {
        Self {
            timestamp: Utc::now(),
            queue,
            event_type,
            item,
        }
    }
}

/// Types of queue events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEventType {
    /// Item appended to the end of the queue
    Enqueued,

    /// Singleton queue contents replaced by the item
    Replaced,

    /// First item equal to the payload removed
    Removed,

    /// Queue emptied
    Cleared,
}

/// Pending operations per queue, in enqueue order
pub type QueueState = HashMap<QueueName, Vec<Value>>;

/// JSONL-backed store mapping queue names to ordered payloads
pub struct QueueStore {
    /// Path to the queue JSONL file
    log_path: PathBuf,

    /// Serializes read-modify-append sequences within this process
    write_lock: Mutex<()>,
}

impl QueueStore {
    /// Create a store over `log_path` (the file is created on first write)
    pub fn new(log_path: PathBuf) -> Self {
        Self {
            log_path,
            write_lock: Mutex::new(()),
        }
    }

    /// Open a store, creating the parent directory if needed
    pub async fn open(log_path: PathBuf) -> Result<Self, QueueStoreError> {
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(Self::new(log_path))
    }

    /// Open the store in the configured home directory
    pub async fn open_default() -> anyhow::Result<Self> {
        let path = crate::config::queue_log_path()?;
        Ok(Self::open(path).await?)
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Add an item. Singleton queues replace their pending item; the others
    /// append to the end.
    pub async fn enqueue(&self, queue: QueueName, item: Value) -> Result<(), QueueStoreError> {
        let event_type = if queue.is_singleton() {
            QueueEventType::Replaced
        } else {
            QueueEventType::Enqueued
        };

        let _guard = self.write_lock.lock().await;
        self.append(vec![QueueEvent::new(queue, event_type, Some(item))])
            .await?;

        debug!(%queue, ?event_type, "Queued operation");
        Ok(())
    }

    /// Current ordered contents of a queue, without removing anything
    pub async fn peek_all(&self, queue: QueueName) -> Result<Vec<Value>, QueueStoreError> {
        let mut state = self.replay().await?;
        Ok(state.remove(&queue).unwrap_or_default())
    }

    /// Remove the first item equal to `item`.
    ///
    /// Matching is by value, not position: items appended after a caller took
    /// its snapshot are unaffected. Returns false if no such item is queued.
    pub async fn remove(&self, queue: QueueName, item: &Value) -> Result<bool, QueueStoreError> {
        let _guard = self.write_lock.lock().await;

        let state = self.replay().await?;
        let present = state
            .get(&queue)
            .is_some_and(|items| items.iter().any(|queued| queued == item));

        if !present {
            return Ok(false);
        }

        self.append(vec![QueueEvent::new(
            queue,
            QueueEventType::Removed,
            Some(item.clone()),
        )])
        .await?;

        Ok(true)
    }

    /// Empty a queue
    pub async fn clear(&self, queue: QueueName) -> Result<(), QueueStoreError> {
        let _guard = self.write_lock.lock().await;
        self.append(vec![QueueEvent::new(queue, QueueEventType::Cleared, None)])
            .await
    }

    /// Number of pending items in a queue
    pub async fn len(&self, queue: QueueName) -> Result<usize, QueueStoreError> {
        Ok(self.peek_all(queue).await?.len())
    }

    /// Pending counts for every queue
    pub async fn status(&self) -> Result<Vec<(QueueName, usize)>, QueueStoreError> {
        let state = self.replay().await?;
        Ok(QueueName::ALL
            .into_iter()
            .map(|queue| (queue, state.get(&queue).map_or(0, Vec::len)))
            .collect())
    }

    /// Replay the log to build the current state of every queue
    pub async fn replay(&self) -> Result<QueueState, QueueStoreError> {
        let mut state = QueueState::new();

        if !self.log_path.exists() {
            return Ok(state);
        }

        let file = File::open(&self.log_path).await?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut pending: Option<(usize, serde_json::Error)> = None;
        let mut line_no = 0;

        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }

            // A bad line is only tolerated at the very end (torn final write)
            if let Some((line, source)) = pending.take() {
                return Err(QueueStoreError::Corrupt { line, source });
            }

            match serde_json::from_str::<QueueEvent>(&line) {
                Ok(event) => Self::apply_event(&mut state, event),
                Err(source) => pending = Some((line_no, source)),
            }
        }

        if let Some((line, source)) = pending {
            warn!(line, error = %source, "Ignoring torn final line in queue log");
        }

        Ok(state)
    }

    /// Apply a single event to the state
    fn apply_event(state: &mut QueueState, event: QueueEvent) {
        let items = state.entry(event.queue).or_default();

        match (event.event_type, event.item) {
            (QueueEventType::Enqueued, Some(item)) => items.push(item),
            (QueueEventType::Replaced, Some(item)) => {
                items.clear();
                items.push(item);
            }
            (QueueEventType::Removed, Some(item)) => {
                if let Some(position) = items.iter().position(|queued| *queued == item) {
                    items.remove(position);
                }
            }
            (QueueEventType::Cleared, _) => items.clear(),
            (event_type, None) => {
                warn!(queue = %event.queue, ?event_type, "Queue event without payload");
            }
        }
    }

    /// Rewrite the log so it holds only the live items.
    ///
    /// The new log is written beside the old one and renamed over it, so a
    /// crash leaves either the old or the new file intact.
    pub async fn compact(&self) -> Result<usize, QueueStoreError> {
        let _guard = self.write_lock.lock().await;

        let state = self.replay().await?;
        let mut events = Vec::new();
        for queue in QueueName::ALL {
            for item in state.get(&queue).into_iter().flatten() {
                events.push(QueueEvent::new(queue, QueueEventType::Enqueued, Some(item.clone())));
            }
        }

        let live = events.len();
        let contents = encode_lines(&events)?;
        let log_path = self.log_path.clone();
        tokio::task::spawn_blocking(move || rewrite_log(&log_path, &contents)).await??;

        debug!(live, "Compacted queue log");
        Ok(live)
    }

    async fn append(&self, events: Vec<QueueEvent>) -> Result<(), QueueStoreError> {
        let contents = encode_lines(&events)?;
        let log_path = self.log_path.clone();
        tokio::task::spawn_blocking(move || append_lines(&log_path, &contents)).await??;
        Ok(())
    }
}

fn encode_lines(events: &[QueueEvent]) -> Result<String, serde_json::Error> {
    let mut contents = String::new();
    for event in events {
        contents.push_str(&serde_json::to_string(event)?);
        contents.push('\n');
    }
    Ok(contents)
}

/// Append under an exclusive lock and fsync
fn append_lines(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?;

    file.lock_exclusive()?;
    let written = repair_tail(&mut file)
        .and_then(|_| file.write_all(contents.as_bytes()))
        .and_then(|_| file.sync_data());
    file.unlock()?;

    written
}

/// Make sure the next event starts on a line of its own. A final line that
/// is a complete event but lost its newline is terminated; a partial one
/// left by a crash mid-append is dropped.
fn repair_tail(file: &mut std::fs::File) -> std::io::Result<()> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(());
    }

    let mut contents = Vec::with_capacity(len as usize);
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut contents)?;
    let keep = contents
        .iter()
        .rposition(|byte| *byte == b'\n')
        .map_or(0, |newline| newline + 1);

    if serde_json::from_slice::<QueueEvent>(&contents[keep..]).is_ok() {
        debug!("Terminating unterminated final line in queue log");
        return file.write_all(b"\n");
    }

    warn!(dropped = contents.len() - keep, "Truncating torn line in queue log");
    file.set_len(keep as u64)
}

fn rewrite_log(path: &Path, contents: &str) -> std::io::Result<()> {
    // Hold the current log's lock so concurrent appenders wait for the swap
    let current = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    current.lock_exclusive()?;

    let tmp_path = path.with_extension("jsonl.tmp");
    let result = (|| {
        let mut tmp = std::fs::File::create(&tmp_path)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.sync_all()?;
        std::fs::rename(&tmp_path, path)
    })();

    current.unlock()?;
    result
}
