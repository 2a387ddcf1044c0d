// dbbackupd/src/backup/cleanup.rs
use std::fs;
use std::path::Path;
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PurgeSummary {
    pub removed: usize,
    pub failed: usize,
}

/// Removes everything left in the working area, whatever stage produced it.
///
/// The working area itself is kept. Entries that cannot be removed are
/// logged and skipped so one locked file does not stop the purge.
pub fn purge_working_area(working_dir: &Path) -> PurgeSummary {
    let mut summary = PurgeSummary::default();
    if !working_dir.exists() {
        return summary;
    }

    for entry in WalkDir::new(working_dir).min_depth(1).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("⚠️ Could not read entry in {}: {}", working_dir.display(), e);
                summary.failed += 1;
                continue;
            }
        };
        let path = entry.path();
        let removed = if entry.file_type().is_dir() {
            fs::remove_dir(path)
        } else {
            fs::remove_file(path)
        };
        match removed {
            Ok(()) => summary.removed += 1,
            Err(e) => {
                warn!("⚠️ Failed to remove {}: {}", path.display(), e);
                summary.failed += 1;
            }
        }
    }

    info!(
        "🧹 Working area {} cleaned ({} removed, {} failed)",
        working_dir.display(),
        summary.removed,
        summary.failed
    );
    summary
}

pub fn working_area_is_empty(working_dir: &Path) -> bool {
    fs::read_dir(working_dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}
