// dbbackupd/src/backup/artifact.rs
use std::fmt;
use std::path::PathBuf;

/// One database eligible for backup in the current run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpTarget {
    pub name: String,
}

impl DumpTarget {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Dump,
    Archive,
}

/// A file produced mid-pipeline. Consumed (and deleted) by the next stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub kind: ArtifactKind,
    /// Name of the `DumpTarget` this file derives from.
    pub owner: String,
}

impl Artifact {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Remote confirmation that one complete archive was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub owner: String,
    pub object_id: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunResult {
    AllSucceeded,
    DumpFailed,
    CompressFailed,
    UploadFailed,
    /// Shutdown was requested; the run stopped after draining a stage.
    Interrupted,
}

impl RunResult {
    pub fn needs_cleanup(self) -> bool {
        self != RunResult::AllSucceeded
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunResult::AllSucceeded => "all succeeded",
            RunResult::DumpFailed => "dump failed",
            RunResult::CompressFailed => "compress failed",
            RunResult::UploadFailed => "upload failed",
            RunResult::Interrupted => "interrupted",
        };
        f.write_str(label)
    }
}

/// Outcome of one pipeline run, for narration and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub result: RunResult,
    pub receipts: Vec<UploadReceipt>,
    pub dumps_produced: usize,
    pub archives_produced: usize,
}

impl RunReport {
    pub(crate) fn new(result: RunResult) -> Self {
        Self {
            result,
            receipts: Vec::new(),
            dumps_produced: 0,
            archives_produced: 0,
        }
    }
}
