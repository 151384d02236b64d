//! Day-rotated JSON-lines journals.
//!
//! Error records and recovery history are appended one JSON object per
//! line to `<dir>/<prefix>_YYYYMMDD.jsonl`. Loading is tolerant: missing
//! files are ignored and malformed lines are skipped with a warning.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::ResilienceError;

/// Append-only JSONL journal rotated by UTC day.
#[derive(Debug)]
pub struct DailyJournal {
    dir: PathBuf,
    prefix: &'static str,
    /// Serializes writers so lines never interleave.
    write_lock: Mutex<()>,
}

impl DailyJournal {
    /// Create a journal writing into `dir` with the given file prefix.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, prefix: &'static str) -> Self {
        Self {
            dir: dir.into(),
            prefix,
            write_lock: Mutex::new(()),
        }
    }

    /// Directory holding the journal files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file for the day containing `at`.
    #[must_use]
    pub fn path_for(&self, at: DateTime<Utc>) -> PathBuf {
        self.dir
            .join(format!("{}_{}.jsonl", self.prefix, at.format("%Y%m%d")))
    }

    /// Append one record to the file for the day containing `at`.
    pub fn append<T: Serialize>(&self, record: &T, at: DateTime<Utc>) -> Result<(), ResilienceError> {
        let line = serde_json::to_string(record)
            .map_err(|e| ResilienceError::Persistence(format!("serialize record: {e}")))?;

        let _guard = self.write_lock.lock();
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            ResilienceError::Persistence(format!("create '{}': {e}", self.dir.display()))
        })?;

        let path = self.path_for(at);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ResilienceError::Persistence(format!("open '{}': {e}", path.display())))?;
        writeln!(file, "{line}")
            .map_err(|e| ResilienceError::Persistence(format!("write '{}': {e}", path.display())))?;

        Ok(())
    }

    /// Load every record from all files of this journal, oldest file first.
    pub fn load_all<T: DeserializeOwned>(&self) -> Vec<T> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };

        let file_prefix = format!("{}_", self.prefix);
        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(&file_prefix) && name.ends_with(".jsonl"))
            })
            .collect();
        paths.sort();

        paths.iter().flat_map(|path| load_file(path)).collect()
    }
}

/// Load records from a single JSONL file, skipping malformed lines.
pub fn load_file<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Journal file not readable");
            return Vec::new();
        }
    };

    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let Ok(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    line = index + 1,
                    error = %e,
                    "Skipping malformed journal line"
                );
            }
        }
    }
    records
}
