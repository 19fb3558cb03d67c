//! Ordered, leveled diagnostics for one publish call.
//!
//! Every entry is also emitted through `tracing` at the matching level. The
//! transcript is only written to disk when asked, as JSON lines.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::state::FulfillmentState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warning,
    Error,
    /// The run was aborted.
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub ts: DateTime<Utc>,
    pub level: Level,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<FulfillmentState>,
    pub message: String,
}

/// Append-only transcript. Shared by reference across the workflow.
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Mutex<Vec<TranscriptEntry>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, level: Level, state: Option<FulfillmentState>, message: impl Into<String>) {
        let message = message.into();
        let phase = state.map(|s| s.to_string()).unwrap_or_default();
        match level {
            Level::Info => info!(phase = %phase, "{}", message),
            Level::Warning => warn!(phase = %phase, "{}", message),
            Level::Error | Level::Fatal => {
                let fatal = level == Level::Fatal;
                error!(phase = %phase, fatal, "{}", message)
            }
        }
        self.entries.lock().push(TranscriptEntry {
            ts: Utc::now(),
            level,
            state,
            message,
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(Level::Info, None, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.push(Level::Warning, None, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(Level::Error, None, message);
    }

    pub fn fatal(&self, message: impl Into<String>) {
        self.push(Level::Fatal, None, message);
    }

    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn has_fatal(&self) -> bool {
        self.entries.lock().iter().any(|e| e.level == Level::Fatal)
    }

    /// Entries at or above `level`.
    pub fn at_least(&self, level: Level) -> Vec<TranscriptEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.level >= level)
            .cloned()
            .collect()
    }

    /// Append all entries to `path` as JSON lines.
    pub fn persist_jsonl(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| anyhow!("Failed to create directory {}: {}", parent.display(), e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| anyhow!("Failed to open transcript {}: {}", path.display(), e))?;
        for entry in self.entries.lock().iter() {
            let line = serde_json::to_string(entry)?;
            writeln!(file, "{}", line)?;
        }
        Ok(())
    }
}
