//! Pattern store persisted as two JSON documents.
//!
//! Holds the patterns a client has uploaded, with each pattern's weaving
//! progress, so a restart resumes on the most recently used pattern at the
//! pick where weaving stopped.
//!
//! # Storage structure
//!
//! ```text
//! <data_dir>/loom-server/
//!     patterns.json            # { "next_id": N, "records": [PatternRecord, ...] }
//!     patterns.progress.json   # { "<name>": Progress, ... }
//!     *.tmp                    # written then renamed over its target
//! ```
//!
//! The patterns file is rewritten only when the set of patterns changes.
//! Serving a pick writes just the progress file. Both files are compact JSON.
//!
//! Records are ordered by `(timestamp, id)`; "oldest" and "most recent" use
//! that order. Adding a pattern or updating its progress touches its
//! timestamp.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pattern::Pattern;

/// Errors from the pattern store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No pattern with this name.
    #[error("pattern {0:?} not found")]
    NotFound(String),
    /// Reading or writing a store file failed.
    #[error("pattern store I/O error at {path}: {source}")]
    Io {
        /// Store file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A store file is not valid JSON.
    #[error("pattern store {path} is corrupt: {source}")]
    Corrupt {
        /// Store file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

/// One stored pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRecord {
    /// Insertion id; breaks timestamp ties.
    pub id: u64,
    /// Pattern name (unique).
    pub name: String,
    /// The pattern as uploaded.
    pub pattern: Pattern,
}

/// Weaving progress of one stored pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Saved pick number.
    pub pick_number: usize,
    /// Saved repeat number.
    pub repeat_number: i64,
    /// Last time the pattern was added or woven.
    pub timestamp: DateTime<Utc>,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            pick_number: 0,
            repeat_number: 1,
            timestamp: DateTime::<Utc>::default(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    next_id: u64,
    records: Vec<PatternRecord>,
}

/// JSON-file pattern store.
#[derive(Debug)]
pub struct JsonPatternStore {
    path: PathBuf,
    progress_path: PathBuf,
    data: StoreFile,
    progress: BTreeMap<String, Progress>,
}

/// Path of the progress file that goes with the patterns file at `path`.
pub fn progress_path(path: &Path) -> PathBuf {
    path.with_extension("progress.json")
}

fn read_json<T: Default + serde::de::DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(source) => Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Write `value` as compact JSON to `path` (temp file then rename).
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let io_err = |source: std::io::Error| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }
    let json = serde_json::to_vec(value).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    let mut tmp_name = path.to_path_buf().into_os_string();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    fs::write(&tmp_path, json).map_err(io_err)?;
    fs::rename(&tmp_path, path).map_err(io_err)
}

fn remove_if_exists(path: &Path) -> Result<bool, StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

impl JsonPatternStore {
    /// Open the store at `path`, creating an empty one if the files do not exist.
    ///
    /// Progress entries for patterns that are no longer stored are dropped.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let progress_path = progress_path(&path);
        let data: StoreFile = read_json(&path)?;
        let mut progress: BTreeMap<String, Progress> = read_json(&progress_path)?;
        progress.retain(|name, _| data.records.iter().any(|r| &r.name == name));
        log::info!("[Store] Opened {} ({} patterns)", path.display(), data.records.len());
        Ok(Self {
            path,
            progress_path,
            data,
            progress,
        })
    }

    /// Delete the store files for `path` if they exist.
    pub fn reset(path: &Path) -> Result<(), StoreError> {
        let removed_patterns = remove_if_exists(path)?;
        let removed_progress = remove_if_exists(&progress_path(path))?;
        if removed_patterns || removed_progress {
            log::info!("[Store] Reset {}", path.display());
        }
        Ok(())
    }

    /// Path of the patterns file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add a pattern, replacing any pattern with the same name.
    ///
    /// The new record starts at pick 0, repeat 1. If `max_entries > 0` the
    /// oldest records beyond `max(max_entries, 2)` are purged.
    pub fn add(&mut self, pattern: &Pattern, max_entries: usize) -> Result<(), StoreError> {
        self.data.records.retain(|r| r.name != pattern.name);
        let id = self.data.next_id;
        self.data.next_id += 1;

        let mut stored = pattern.clone();
        stored.pick_number = 0;
        stored.repeat_number = 1;
        self.data.records.push(PatternRecord {
            id,
            name: pattern.name.clone(),
            pattern: stored,
        });
        let timestamp = self.next_timestamp();
        self.progress.insert(
            pattern.name.clone(),
            Progress {
                timestamp,
                ..Progress::default()
            },
        );

        if max_entries > 0 {
            self.purge_oldest(max_entries.max(2));
        }
        self.save_patterns()?;
        self.save_progress()
    }

    /// Fetch a pattern with its saved progress applied.
    pub fn get(&self, name: &str) -> Result<Pattern, StoreError> {
        let record = self.find(name).ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        Ok(self.record_to_pattern(record))
    }

    /// The most recently used pattern, if any.
    pub fn most_recent(&self) -> Option<Pattern> {
        self.data
            .records
            .iter()
            .max_by_key(|r| self.order_key(r))
            .map(|r| self.record_to_pattern(r))
    }

    /// Pattern names, oldest first.
    pub fn list_names(&self) -> Vec<String> {
        let mut records: Vec<&PatternRecord> = self.data.records.iter().collect();
        records.sort_by_key(|r| self.order_key(r));
        records.into_iter().map(|r| r.name.clone()).collect()
    }

    /// Saved progress for `name`.
    pub fn progress(&self, name: &str) -> Result<Progress, StoreError> {
        self.find(name).ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        Ok(self.progress.get(name).copied().unwrap_or_default())
    }

    /// Save weaving progress for `name` and mark it most recently used.
    ///
    /// Only the progress file is written.
    pub fn update_progress(&mut self, name: &str, pick_number: usize, repeat_number: i64) -> Result<(), StoreError> {
        let timestamp = self.next_timestamp();
        *self.progress_mut(name)? = Progress {
            pick_number,
            repeat_number,
            timestamp,
        };
        self.save_progress()
    }

    /// Overwrite the timestamp for `name`.
    pub fn set_timestamp(&mut self, name: &str, timestamp: DateTime<Utc>) -> Result<(), StoreError> {
        self.progress_mut(name)?.timestamp = timestamp;
        self.save_progress()
    }

    /// Remove every pattern.
    pub fn clear(&mut self) -> Result<(), StoreError> {
        self.data.records.clear();
        self.progress.clear();
        self.save_patterns()?;
        self.save_progress()
    }

    /// Current time, bumped past every stored timestamp so the latest touch
    /// always sorts last.
    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.progress.values().map(|p| p.timestamp).max() {
            Some(latest) if latest >= now => latest + chrono::Duration::microseconds(1),
            _ => now,
        }
    }

    fn order_key(&self, record: &PatternRecord) -> (DateTime<Utc>, u64) {
        let timestamp = self.progress.get(&record.name).map(|p| p.timestamp).unwrap_or_default();
        (timestamp, record.id)
    }

    fn find(&self, name: &str) -> Option<&PatternRecord> {
        self.data.records.iter().find(|r| r.name == name)
    }

    fn progress_mut(&mut self, name: &str) -> Result<&mut Progress, StoreError> {
        if self.find(name).is_none() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        Ok(self.progress.entry(name.to_string()).or_default())
    }

    fn purge_oldest(&mut self, keep: usize) {
        if self.data.records.len() <= keep {
            return;
        }
        let mut records = std::mem::take(&mut self.data.records);
        records.sort_by_key(|r| self.order_key(r));
        let excess = records.len() - keep;
        for record in records.drain(..excess) {
            self.progress.remove(&record.name);
            log::debug!("[Store] Purged {:?}", record.name);
        }
        self.data.records = records;
    }

    fn save_patterns(&self) -> Result<(), StoreError> {
        write_json(&self.path, &self.data)
    }

    fn save_progress(&self) -> Result<(), StoreError> {
        write_json(&self.progress_path, &self.progress)
    }

    fn record_to_pattern(&self, record: &PatternRecord) -> Pattern {
        let progress = self.progress.get(&record.name).copied().unwrap_or_default();
        let mut pattern = record.pattern.clone();
        pattern.pick_number = progress.pick_number.min(pattern.picks.len());
        pattern.repeat_number = progress.repeat_number;
        pattern
    }
}
