use anyhow::{Context, Result};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::timeout;
use which::which;

use crate::errors::BackupError;

/// Finds the mysqldump executable in the system PATH.
pub fn find_mysqldump_executable() -> Result<PathBuf> {
    which("mysqldump").context(
        "mysqldump executable not found in PATH. \
         Please ensure MySQL client tools are installed and in your PATH.",
    )
}

/// Runs `fut` with a deadline, turning an elapsed deadline into `BackupError::Timeout`.
pub async fn with_deadline<T, F>(operation: &str, after: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(BackupError::Timeout {
            operation: operation.to_string(),
            after,
        }
        .into()),
    }
}

/// Formats a byte count with a binary unit, e.g. `12.34 MiB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = UNITS[0];
    for next in &UNITS[1..] {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{:.2} {}", value, unit)
}
