use crate::common::config::StorageConfig;
use crate::common::Result;
use crate::core::stats::AttemptRecord;
use crate::core::matcher::UNKNOWN_IDENTITY;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Entries kept in the JSON access log.
pub const ACCESS_LOG_CAPACITY: usize = 100;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AccessEntry {
    pub time: String,
    pub user: String,
    pub success: bool,
}

/// Persists attempt records: a daily append-only text log and a bounded JSON
/// access log. Either sink can be disabled.
#[derive(Debug, Clone, Default)]
pub struct AttemptJournal {
    log_dir: Option<PathBuf>,
    access_log: Option<PathBuf>,
}

impl AttemptJournal {
    pub fn new(log_dir: Option<PathBuf>, access_log: Option<PathBuf>) -> Self {
        Self { log_dir, access_log }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(Some(config.log_dir.clone()), Some(config.access_log.clone()))
    }

    /// Journal that writes nothing.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Writes `record` on the blocking pool. Failures are logged and
    /// swallowed; they never fail an attempt.
    pub async fn append(&self, record: &AttemptRecord) {
        if self.log_dir.is_none() && self.access_log.is_none() {
            return;
        }

        let journal = self.clone();
        let record = record.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || journal.write(&record)).await {
            tracing::warn!("Journal task failed: {}", e);
        }
    }

    /// Synchronous form of [`append`](Self::append).
    pub fn write(&self, record: &AttemptRecord) {
        if let Some(dir) = &self.log_dir {
            if let Err(e) = append_event_line(dir, record) {
                tracing::warn!("Failed to write event log: {}", e);
            }
        }
        if let Some(path) = &self.access_log {
            if let Err(e) = append_access_entry(path, record) {
                tracing::warn!("Failed to write access log: {}", e);
            }
        }
    }

    pub fn event_log_path(&self, record: &AttemptRecord) -> Option<PathBuf> {
        self.log_dir.as_ref().map(|dir| daily_log_path(dir, record))
    }
}

fn daily_log_path(dir: &Path, record: &AttemptRecord) -> PathBuf {
    dir.join(format!("face_unlock_{}.log", record.timestamp.format("%Y%m%d")))
}

fn append_event_line(dir: &Path, record: &AttemptRecord) -> Result<()> {
    fs::create_dir_all(dir)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(daily_log_path(dir, record))?;
    writeln!(
        file,
        "{}: {}",
        record.timestamp.format("%Y-%m-%d %H:%M:%S%.6f"),
        record.summary()
    )?;
    Ok(())
}

pub fn read_access_log(path: &Path) -> Vec<AccessEntry> {
    let Ok(data) = fs::read(path) else {
        return Vec::new();
    };
    serde_json::from_slice(&data).unwrap_or_else(|e| {
        tracing::warn!("Access log {} is corrupt, starting a new one: {}", path.display(), e);
        Vec::new()
    })
}

fn append_access_entry(path: &Path, record: &AttemptRecord) -> Result<()> {
    let mut entries = read_access_log(path);
    entries.push(AccessEntry {
        time: record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        user: record.identity.clone().unwrap_or_else(|| UNKNOWN_IDENTITY.to_string()),
        success: record.outcome.is_success(),
    });
    if entries.len() > ACCESS_LOG_CAPACITY {
        let excess = entries.len() - ACCESS_LOG_CAPACITY;
        entries.drain(..excess);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let encoded = serde_json::to_vec_pretty(&entries)
        .map_err(|e| anyhow::anyhow!("Failed to encode access log: {}", e))?;
    fs::write(path, encoded)?;
    Ok(())
}
