// dbbackupd/src/schedule/run_gate.rs
use chrono::NaiveDate;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::errors::BackupError;

/// Persisted "last attempt started on" date; at most one attempt per day.
///
/// The marker records attempts, not successes: a failed run still blocks a
/// same-day retry.
#[derive(Debug, Clone)]
pub struct RunGate {
    path: PathBuf,
}

impl RunGate {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check-and-set for `today`. Marker I/O problems never block a run.
    pub fn attempt_is_authorized(&self, today: NaiveDate) -> bool {
        match self.last_attempt() {
            Ok(Some(last)) if last == today => {
                info!("Backup already attempted today ({})", today);
                return false;
            }
            Ok(_) => {}
            Err(e) => warn!("⚠️ {}; assuming no backup ran today", e),
        }

        if let Err(e) = self.record_attempt(today) {
            warn!("⚠️ {}; running anyway", e);
        }
        info!("Running backup for {}", today);
        true
    }

    /// Date stored in the marker. A missing file or unparsable content is `None`.
    pub fn last_attempt(&self) -> Result<Option<NaiveDate>, BackupError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(BackupError::GateIo {
                    path: self.path.clone(),
                    action: "read",
                    source,
                });
            }
        };

        match NaiveDate::parse_from_str(content.trim(), "%Y-%m-%d") {
            Ok(date) => Ok(Some(date)),
            Err(_) => {
                warn!(
                    "⚠️ Ignoring unreadable date {:?} in {}",
                    content.trim(),
                    self.path.display()
                );
                Ok(None)
            }
        }
    }

    fn record_attempt(&self, today: NaiveDate) -> Result<(), BackupError> {
        fs::write(&self.path, today.format("%Y-%m-%d").to_string()).map_err(|source| {
            BackupError::GateIo {
                path: self.path.clone(),
                action: "written",
                source,
            }
        })
    }
}
