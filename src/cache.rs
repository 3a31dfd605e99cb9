//! Persistent key-value cache gating network refreshes.
//!
//! Every data source stores its last good value together with the wall-clock
//! time it was fetched. Before a refresh goes to the network it asks the gate
//! whether the stored entry is still inside its freshness window.
//!
//! # Storage Format
//!
//! A single JSON object keyed by source name:
//!
//! ```text
//! {
//!   "entries": {
//!     "theme":     { "value": "dark", "fetched_at_ms": 1700000000000 },
//!     "quotation": { "value": { ... }, "fetched_at_ms": 1700000000000 }
//!   }
//! }
//! ```
//!
//! Writes replace the whole entry (last write wins) and are flushed to disk
//! immediately, so a second dashboard instance sharing the file can pick them
//! up with [`CacheStore::sync_from_disk`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
#[cfg(test)]
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

// ============================================================================
// Clock
// ============================================================================

/// Source of wall-clock "now" in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Entries
// ============================================================================

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("state file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("state encoding error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A typed cached value and the time it was fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub value: T,
    pub fetched_at_ms: i64,
}

#[cfg(test)]
impl<T> CacheEntry<T> {
    /// Age relative to `now_ms`. Entries stamped in the future count as age zero.
    pub fn age(&self, now_ms: i64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.fetched_at_ms).max(0) as u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct StoredEntry {
    value: serde_json::Value,
    fetched_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct StoreFile {
    entries: HashMap<String, StoredEntry>,
}

// ============================================================================
// Store
// ============================================================================

pub struct CacheStore {
    entries: HashMap<String, StoredEntry>,
    path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    /// A store that never touches the filesystem.
    #[cfg(test)]
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: HashMap::new(),
            path: None,
            clock,
        }
    }

    /// Opens the state file at `path`.
    ///
    /// A missing or unreadable file yields an empty store; the file is
    /// (re)created on the first write.
    pub fn open(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        let path = path.into();
        let entries = match read_file(&path) {
            Ok(file) => {
                tracing::info!(
                    path = %path.display(),
                    entries = file.entries.len(),
                    "Loaded state file"
                );
                file.entries
            }
            Err(CacheError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No state file yet, starting empty");
                HashMap::new()
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to load state file, starting empty"
                );
                HashMap::new()
            }
        };
        Self {
            entries,
            path: Some(path),
            clock,
        }
    }

    /// Returns the entry under `key` decoded as `T`.
    ///
    /// An entry whose stored value no longer decodes as `T` reads as absent.
    pub fn read<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        let stored = self.entries.get(key)?;
        let value = serde_json::from_value(stored.value.clone()).ok()?;
        Some(CacheEntry {
            value,
            fetched_at_ms: stored.fetched_at_ms,
        })
    }

    /// `true` when `key` has no entry or its entry is at least `max_age` old.
    pub fn is_stale(&self, key: &str, max_age: Duration) -> bool {
        let Some(stored) = self.entries.get(key) else {
            return true;
        };
        let age = self.clock.now_ms().saturating_sub(stored.fetched_at_ms);
        age >= max_age.as_millis() as i64
    }

    /// Stores `value` under `key`, stamped with the current time.
    pub fn write<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), CacheError> {
        let now = self.clock.now_ms();
        self.write_at(key, value, now)
    }

    /// Stores `value` under `key` with an explicit fetch timestamp.
    ///
    /// The in-memory entry is replaced even if flushing to disk fails.
    pub fn write_at<T: Serialize>(
        &mut self,
        key: &str,
        value: &T,
        fetched_at_ms: i64,
    ) -> Result<(), CacheError> {
        let value = serde_json::to_value(value)?;
        self.entries.insert(
            key.to_string(),
            StoredEntry {
                value,
                fetched_at_ms,
            },
        );
        self.flush()
    }

    /// Pulls in entries another process wrote to the same file since we last
    /// looked. An on-disk entry only wins when it is newer than ours.
    pub fn sync_from_disk(&mut self) {
        let Some(path) = &self.path else {
            return;
        };
        let Ok(file) = read_file(path) else {
            return;
        };
        for (key, theirs) in file.entries {
            let newer = self
                .entries
                .get(&key)
                .is_none_or(|ours| theirs.fetched_at_ms > ours.fetched_at_ms);
            if newer {
                tracing::debug!(key = %key, "Adopting newer entry from state file");
                self.entries.insert(key, theirs);
            }
        }
    }

    fn flush(&self) -> Result<(), CacheError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = StoreFile {
            entries: self.entries.clone(),
        };
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &file)?;
        Ok(())
    }
}

fn read_file(path: &Path) -> Result<StoreFile, CacheError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(1_700_000_000_000))
    }

    #[test]
    fn missing_key_is_stale() {
        let store = CacheStore::in_memory(clock());
        assert!(store.is_stale("quotation", Duration::from_secs(3600)));
        assert!(store.read::<String>("quotation").is_none());
    }

    #[test]
    fn fresh_right_after_write_for_any_positive_window() {
        let mut store = CacheStore::in_memory(clock());
        store.write("quotation", &"hello").unwrap();
        for window in [1, 1_000, 3_600_000] {
            assert!(!store.is_stale("quotation", Duration::from_millis(window)));
        }
    }

    #[test]
    fn becomes_stale_exactly_at_window() {
        let clock = clock();
        let mut store = CacheStore::in_memory(clock.clone());
        store.write("quotation", &1u32).unwrap();

        clock.advance(Duration::from_millis(3_599_999));
        assert!(!store.is_stale("quotation", Duration::from_secs(3600)));

        clock.advance(Duration::from_millis(1));
        assert!(store.is_stale("quotation", Duration::from_secs(3600)));
    }

    #[test]
    fn write_replaces_whole_entry() {
        let clock = clock();
        let mut store = CacheStore::in_memory(clock.clone());
        store.write("k", &vec![1, 2, 3]).unwrap();
        clock.advance(Duration::from_secs(5));
        store.write("k", &vec![9]).unwrap();

        let entry = store.read::<Vec<i32>>("k").unwrap();
        assert_eq!(entry.value, vec![9]);
        assert_eq!(entry.fetched_at_ms, clock.now_ms());
        assert_eq!(entry.age(clock.now_ms()), Duration::ZERO);
    }

    #[test]
    fn entry_of_wrong_type_reads_as_absent() {
        let mut store = CacheStore::in_memory(clock());
        store.write("theme", &"dark").unwrap();
        assert!(store.read::<u64>("theme").is_none());
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let clock = clock();

        let mut store = CacheStore::open(&path, clock.clone());
        store.write("theme", &"light").unwrap();
        drop(store);

        let reopened = CacheStore::open(&path, clock.clone());
        let entry = reopened.read::<String>("theme").unwrap();
        assert_eq!(entry.value, "light");
        assert!(!reopened.is_stale("theme", Duration::from_secs(1)));
    }

    #[test]
    fn corrupt_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = CacheStore::open(&path, clock());
        assert!(store.is_stale("theme", Duration::from_secs(1)));
    }

    #[test]
    fn sync_adopts_only_newer_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let clock = clock();

        let mut ours = CacheStore::open(&path, clock.clone());
        ours.write("quotation", &"old").unwrap();
        ours.write_at("theme", &"dark", clock.now_ms() + 10_000).unwrap();

        let mut theirs = CacheStore::open(&path, clock.clone());
        clock.advance(Duration::from_secs(1));
        theirs.write("quotation", &"new").unwrap();
        theirs.write_at("theme", &"light", 0).unwrap();

        ours.sync_from_disk();
        assert_eq!(ours.read::<String>("quotation").unwrap().value, "new");
        assert_eq!(ours.read::<String>("theme").unwrap().value, "dark");
    }
}
