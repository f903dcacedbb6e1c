//! Append-only persistence for pipeline records
//!
//! Every status change is appended as a new record; readers keep the latest
//! version per id. `JsonLinesStore` writes one JSON object per line and
//! rewrites the file through a temporary sibling when purging.

use crate::error::StoreError;
use crate::events::{ErrorEvent, NotificationMessage, RecoveryAttempt, SystemMetric, Timestamp};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// One persisted row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Event(ErrorEvent),
    Attempt(RecoveryAttempt),
    Notification(NotificationMessage),
    Metric(SystemMetric),
}

impl Record {
    /// Time used for range queries and retention
    pub fn timestamp(&self) -> Timestamp {
        match self {
            Record::Event(event) => event.timestamp,
            Record::Attempt(attempt) => attempt.start_time,
            Record::Notification(message) => message.created_at,
            Record::Metric(metric) => metric.timestamp,
        }
    }
}

/// Storage backend for analytics records
pub trait RecordStore: Send + Sync {
    /// Append one record
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` when the record cannot be encoded or written.
    fn append(&self, record: &Record) -> Result<(), StoreError>;

    /// Every record with `timestamp() >= since`, in append order
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` when the backend cannot be read.
    fn load_since(&self, since: Timestamp) -> Result<Vec<Record>, StoreError>;

    /// Drop every record older than `cutoff`; returns how many were removed
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` when the backend cannot be rewritten.
    fn purge_before(&self, cutoff: Timestamp) -> Result<usize, StoreError>;
}

/// Volatile store used when no file is configured
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordStore for MemoryStore {
    fn append(&self, record: &Record) -> Result<(), StoreError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }

    fn load_since(&self, since: Timestamp) -> Result<Vec<Record>, StoreError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .iter()
            .filter(|record| record.timestamp() >= since)
            .cloned()
            .collect())
    }

    fn purge_before(&self, cutoff: Timestamp) -> Result<usize, StoreError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let before = records.len();
        records.retain(|record| record.timestamp() >= cutoff);
        Ok(before - records.len())
    }
}

/// Durable store writing one JSON record per line
#[derive(Debug)]
pub struct JsonLinesStore {
    path: PathBuf,
    // Serializes appends against purge rewrites
    lock: Mutex<()>,
}

impl JsonLinesStore {
    /// Open (or lazily create) a JSON-lines file
    ///
    /// # Errors
    ///
    /// Fails when the parent directory cannot be created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<Record>, StoreError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Record>(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    "Skipping unreadable record at {}:{}: {}",
                    self.path.display(),
                    number + 1,
                    e
                ),
            }
        }
        Ok(records)
    }
}

impl RecordStore for JsonLinesStore {
    fn append(&self, record: &Record) -> Result<(), StoreError> {
        let line = serde_json::to_string(record)?;
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    fn load_since(&self, since: Timestamp) -> Result<Vec<Record>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|record| record.timestamp() >= since)
            .collect())
    }

    fn purge_before(&self, cutoff: Timestamp) -> Result<usize, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let records = self.read_all()?;
        let total = records.len();
        let kept: Vec<&Record> = records
            .iter()
            .filter(|record| record.timestamp() >= cutoff)
            .collect();
        let removed = total - kept.len();
        if removed == 0 {
            return Ok(0);
        }

        let temp_path = self.path.with_extension("jsonl.tmp");
        {
            let mut writer = BufWriter::new(File::create(&temp_path)?);
            for record in &kept {
                serde_json::to_writer(&mut writer, record)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        fs::rename(&temp_path, &self.path)?;

        debug!(
            "Purged {} of {} records from {}",
            removed,
            total,
            self.path.display()
        );
        Ok(removed)
    }
}
