use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

use super::BackendKind;
use crate::error::DeliveryError;

pub const LOG_FILE_NAME: &str = "delivery_log.txt";

const RULE: &str = "##################################################";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    Success,
    Failure,
}

/// One delivery attempt as written to the session log.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub timestamp: DateTime<Local>,
    pub backend: BackendKind,
    pub attempt: u32,
    pub max_attempts: Option<u32>,
    pub status: AttemptStatus,
    pub recipient: Option<String>,
    pub error: Option<DeliveryError>,
    /// Free-form note for successful attempts (share URL, recipient count).
    pub detail: Option<String>,
}

impl AttemptRecord {
    pub fn success(backend: BackendKind, attempt: u32, recipient: Option<String>) -> Self {
        Self {
            timestamp: Local::now(),
            backend,
            attempt,
            max_attempts: None,
            status: AttemptStatus::Success,
            recipient,
            error: None,
            detail: None,
        }
    }

    pub fn failure(
        backend: BackendKind,
        attempt: u32,
        max_attempts: Option<u32>,
        recipient: Option<String>,
        error: DeliveryError,
    ) -> Self {
        Self {
            timestamp: Local::now(),
            backend,
            attempt,
            max_attempts,
            status: AttemptStatus::Failure,
            recipient,
            error: Some(error),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Render the plain-text block appended to the log.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{RULE}");
        let _ = writeln!(out, "TIMESTAMP: {}", self.timestamp.format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(out, "BACKEND: {}", self.backend.as_str());
        let status = match (self.status, self.max_attempts) {
            (AttemptStatus::Success, _) => format!("Success on attempt {}", self.attempt),
            (AttemptStatus::Failure, Some(max)) => {
                format!("Failure during attempt {}/{max}", self.attempt)
            }
            (AttemptStatus::Failure, None) => format!("Failure during attempt {}", self.attempt),
        };
        let _ = writeln!(out, "STATUS: {status}");
        if let Some(recipient) = &self.recipient {
            let _ = writeln!(out, "RECIPIENT: {recipient}");
        }
        if let Some(error) = &self.error {
            let _ = writeln!(out, "ERROR TYPE: {}", error.class);
            let _ = writeln!(out, "MESSAGE: {}", error.message);
        }
        if let Some(detail) = &self.detail {
            let _ = writeln!(out, "DETAIL: {detail}");
        }
        let _ = writeln!(out, "{RULE}");
        out
    }
}

pub fn log_path(session_dir: &Path) -> PathBuf {
    session_dir.join(LOG_FILE_NAME)
}

/// Append `record` to the session's log. Sessions that no longer exist
/// (discarded meanwhile) are skipped.
pub fn append(session_dir: &Path, record: &AttemptRecord) -> Result<()> {
    if !session_dir.is_dir() {
        return Ok(());
    }
    let path = log_path(session_dir);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(record.render().as_bytes())
        .with_context(|| format!("failed to append to {}", path.display()))?;
    Ok(())
}
