use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures the backup pipeline and its gate can report.
///
/// Only `Connection`, `Dump`, `Compress` and `Upload` end a run attempt.
/// `LocalDelete` and `GateIo` are logged and the run carries on.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Cannot list databases: {0}")]
    Connection(String),

    #[error("Dump of database {database} failed: {message}")]
    Dump { database: String, message: String },

    #[error("Compression of {} failed: {message}", path.display())]
    Compress { path: PathBuf, message: String },

    #[error("Upload of {name} failed: {message}")]
    Upload { name: String, message: String },

    #[error("Could not delete local file {}: {source}", path.display())]
    LocalDelete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Run gate file {} could not be {action}: {source}", path.display())]
    GateIo {
        path: PathBuf,
        action: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} timed out after {}s", after.as_secs())]
    Timeout {
        operation: String,
        after: Duration,
    },
}
