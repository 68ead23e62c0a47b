//! Append-only per-task audit log.
//!
//! Entries are kept either in memory or as JSON Lines, one file per task
//! (`<dir>/<task_id>.jsonl`). A failed append is logged and otherwise
//! ignored: losing an audit line must never abort a task.

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{TaskId, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

/// Structured payload of a log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    Status {
        status: TaskStatus,
    },
    Retry {
        item: String,
        /// 1-based
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    ItemSucceeded {
        item: String,
    },
    ItemSkipped {
        item: String,
        reason: String,
    },
    ItemFailed {
        item: String,
        reason: String,
    },
    Note,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub task_id: TaskId,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub event: TaskEvent,
}

impl TaskLogEntry {
    pub fn new(task_id: TaskId, level: LogLevel, message: impl Into<String>, event: TaskEvent) -> Self {
        Self {
            task_id,
            timestamp: Utc::now(),
            level,
            message: message.into(),
            event,
        }
    }
}

enum Backend {
    Memory(Mutex<HashMap<TaskId, Vec<TaskLogEntry>>>),
    Dir(PathBuf),
}

/// Where task logs are written.
pub struct TaskLogStore {
    backend: Backend,
}

impl TaskLogStore {
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Mutex::new(HashMap::new())),
        }
    }

    /// JSONL files under `dir`, created if missing.
    pub fn on_disk(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            backend: Backend::Dir(dir),
        })
    }

    /// File backing a task's log, if on disk.
    pub fn path_for(&self, task_id: TaskId) -> Option<PathBuf> {
        match &self.backend {
            Backend::Memory(_) => None,
            Backend::Dir(dir) => Some(dir.join(format!("{}.jsonl", task_id))),
        }
    }

    /// Append an entry and mirror it to the process log.
    pub fn append(&self, entry: &TaskLogEntry) {
        let level: log::Level = entry.level.into();
        log::log!(
            level,
            "[task {}] {}",
            short_id(entry.task_id),
            entry.message
        );
        if let Err(e) = self.try_append(entry) {
            log::warn!("Failed to append task log for {}: {}", entry.task_id, e);
        }
    }

    fn try_append(&self, entry: &TaskLogEntry) -> std::io::Result<()> {
        match &self.backend {
            Backend::Memory(map) => {
                map.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .entry(entry.task_id)
                    .or_default()
                    .push(entry.clone());
                Ok(())
            }
            Backend::Dir(dir) => {
                let path = dir.join(format!("{}.jsonl", entry.task_id));
                let mut line = serde_json::to_string(entry)?;
                line.push('\n');
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                file.write_all(line.as_bytes())
            }
        }
    }

    /// All entries for a task in append order. Unknown tasks have no entries.
    pub fn read(&self, task_id: TaskId) -> std::io::Result<Vec<TaskLogEntry>> {
        match &self.backend {
            Backend::Memory(map) => Ok(map
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&task_id)
                .cloned()
                .unwrap_or_default()),
            Backend::Dir(dir) => read_jsonl(&dir.join(format!("{}.jsonl", task_id))),
        }
    }

    /// Drop a task's in-memory entries. Files on disk are kept.
    pub fn forget(&self, task_id: TaskId) {
        if let Backend::Memory(map) = &self.backend {
            map.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&task_id);
        }
    }
}

fn read_jsonl(path: &Path) -> std::io::Result<Vec<TaskLogEntry>> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut entries = Vec::new();
    for (n, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(entry) => entries.push(entry),
            // A torn final line after a crash is expected; skip it.
            Err(e) => log::warn!("{}:{}: skipping bad log line: {}", path.display(), n + 1, e),
        }
    }
    Ok(entries)
}

fn short_id(id: TaskId) -> String {
    id.to_string().chars().take(8).collect()
}

/// Counts derived from a task's log.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LogSummary {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub retries: usize,
    pub final_status: Option<TaskStatus>,
}

pub fn summarize(entries: &[TaskLogEntry]) -> LogSummary {
    let mut summary = LogSummary::default();
    for entry in entries {
        match &entry.event {
            TaskEvent::ItemSucceeded { .. } => summary.succeeded += 1,
            TaskEvent::ItemSkipped { .. } => summary.skipped += 1,
            TaskEvent::ItemFailed { .. } => summary.failed += 1,
            TaskEvent::Retry { .. } => summary.retries += 1,
            TaskEvent::Status { status } => summary.final_status = Some(*status),
            TaskEvent::Note => {}
        }
    }
    summary
}

/// Write a human-readable report of a task log.
pub fn write_report(entries: &[TaskLogEntry], path: &Path) -> std::io::Result<()> {
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    write_report_to(entries, &mut file)?;
    file.flush()
}

pub fn write_report_to(entries: &[TaskLogEntry], out: &mut impl Write) -> std::io::Result<()> {
    let summary = summarize(entries);

    writeln!(out, "=== Task Log ===")?;
    if let Some(first) = entries.first() {
        writeln!(out, "Task: {}", first.task_id)?;
    }
    writeln!(
        out,
        "Date: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    )?;
    writeln!(out)?;
    writeln!(out, "--- Summary ---")?;
    if let Some(status) = summary.final_status {
        writeln!(out, "Status: {}", status)?;
    }
    writeln!(out, "Successful: {}", summary.succeeded)?;
    writeln!(out, "Skipped: {}", summary.skipped)?;
    writeln!(out, "Failed: {}", summary.failed)?;
    writeln!(out, "Retries: {}", summary.retries)?;
    writeln!(out)?;
    writeln!(out, "--- Details ---")?;
    writeln!(out)?;

    for entry in entries {
        let time = entry.timestamp.format("%H:%M:%S");
        match &entry.event {
            TaskEvent::Status { status } => writeln!(out, "{} [{}] {}", time, status, entry.message)?,
            TaskEvent::ItemSucceeded { item } => writeln!(out, "{} [OK] {}", time, item)?,
            TaskEvent::ItemSkipped { item, reason } => {
                writeln!(out, "{} [SKIP] {}: {}", time, item, reason)?
            }
            TaskEvent::ItemFailed { item, reason } => {
                writeln!(out, "{} [ERROR] {}: {}", time, item, reason)?
            }
            TaskEvent::Retry {
                item,
                attempt,
                delay_ms,
                error,
            } => writeln!(
                out,
                "{} [RETRY] {} attempt {} in {}ms: {}",
                time, item, attempt, delay_ms, error
            )?,
            TaskEvent::Note => writeln!(out, "{} {}", time, entry.message)?,
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/task_log_tests.rs"]
mod tests;
