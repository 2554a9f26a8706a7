//! JSONL audit log writer with daily file rotation.

use std::{
    fs::{self, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::{NaiveDate, Utc};

use super::AuditLogger;
use crate::models::CoreEvent;
use crate::{AppError, Result};

struct WriterState {
    current_date: NaiveDate,
    writer: BufWriter<fs::File>,
}

/// A daily-rotating JSONL audit log writer.
///
/// Appends one JSON object per line to `<log_dir>/events-YYYY-MM-DD.jsonl`,
/// opening a new file when the calendar date changes between writes.
pub struct JsonlAuditWriter {
    log_dir: PathBuf,
    state: Mutex<Option<WriterState>>,
}

impl JsonlAuditWriter {
    /// Construct a writer that stores logs in `log_dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the directory cannot be created.
    pub fn new(log_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&log_dir).map_err(|e| {
            AppError::Io(format!(
                "failed to create audit log directory {}: {e}",
                log_dir.display()
            ))
        })?;
        Ok(Self {
            log_dir,
            state: Mutex::new(None),
        })
    }

    /// Path of the log file for `date`.
    #[must_use]
    pub fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.log_dir.join(format!("events-{date}.jsonl"))
    }

    fn open_for_date(&self, date: NaiveDate) -> Result<BufWriter<fs::File>> {
        let path = self.file_for(date);
        let file = open_append(&path)?;
        Ok(BufWriter::new(file))
    }
}

fn open_append(path: &Path) -> Result<fs::File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| AppError::Io(format!("failed to open audit log {}: {e}", path.display())))
}

impl AuditLogger for JsonlAuditWriter {
    fn log_event(&self, event: &CoreEvent) -> Result<()> {
        let today = Utc::now().date_naive();

        let mut guard = self
            .state
            .lock()
            .map_err(|_| AppError::Io("audit writer mutex poisoned".to_string()))?;

        if guard.as_ref().is_none_or(|s| s.current_date != today) {
            let writer = self.open_for_date(today)?;
            *guard = Some(WriterState {
                current_date: today,
                writer,
            });
        }

        if let Some(state) = guard.as_mut() {
            let line = serde_json::to_string(event)?;
            writeln!(state.writer, "{line}")
                .and_then(|()| state.writer.flush())
                .map_err(|e| AppError::Io(format!("audit write failed: {e}")))?;
        }

        Ok(())
    }
}
