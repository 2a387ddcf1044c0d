//! In-process stand-ins for the external capabilities, used by unit tests.
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::archive::Archiver;
use super::artifact::DumpTarget;
use super::db_dump::DatabaseDumper;
use super::s3_upload::{object_key, Progress, RemoteStore, UploadRequest};

/// Writes a small SQL file per target; targets in `fail_on` leave a partial
/// file behind and fail, the way an interrupted mysqldump does.
#[derive(Default)]
pub(crate) struct ScriptedDumper {
    fail_on: Vec<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedDumper {
    pub(crate) fn failing_on(names: &[&str]) -> Self {
        Self {
            fail_on: names.iter().map(|n| n.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DatabaseDumper for ScriptedDumper {
    async fn dump(&self, target: &DumpTarget, output_path: &Path) -> Result<()> {
        self.calls.lock().unwrap().push(target.name.clone());
        if self.fail_on.contains(&target.name) {
            tokio::fs::write(output_path, b"-- partial").await?;
            anyhow::bail!(
                "mysqldump for database {} failed with status: exit status: 2\n\
                 Stderr: mysqldump: Got error: 1045: Access denied for user 'backup'",
                target.name
            );
        }
        let body = format!("-- dump of {}\nCREATE TABLE t (id INT);\n", target.name);
        tokio::fs::write(output_path, body)
            .await
            .with_context(|| format!("write {}", output_path.display()))?;
        Ok(())
    }
}

/// Always fails without writing anything.
pub(crate) struct FailingArchiver;

#[async_trait]
impl Archiver for FailingArchiver {
    async fn compress(&self, source: &Path) -> Result<PathBuf> {
        anyhow::bail!("No space left on device while compressing {}", source.display())
    }
}

/// Records the key of every object it accepts.
#[derive(Default)]
pub(crate) struct RecordingStore {
    fail_on: Vec<String>,
    remove_source: bool,
    uploaded: Mutex<Vec<String>>,
}

impl RecordingStore {
    /// Fails uploads named in `object_names`, or whose name starts with `<entry>_`.
    pub(crate) fn failing_on(object_names: &[&str]) -> Self {
        Self {
            fail_on: object_names.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Deletes the local file during upload, so the caller's own delete fails.
    pub(crate) fn removing_source() -> Self {
        Self {
            remove_source: true,
            ..Self::default()
        }
    }

    pub(crate) fn uploaded(&self) -> Vec<String> {
        self.uploaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteStore for RecordingStore {
    async fn upload(
        &self,
        request: &UploadRequest<'_>,
        progress: &Progress<'_>,
    ) -> Result<String> {
        tokio::fs::metadata(request.path).await.with_context(|| {
            format!("archive {} missing at upload time", request.path.display())
        })?;
        let name = request.object_name;
        let fails = self
            .fail_on
            .iter()
            .any(|n| n.as_str() == name || name.starts_with(&format!("{}_", n)));
        if fails {
            anyhow::bail!("503 Service Unavailable while uploading {}", name);
        }
        progress(1.0);

        if self.remove_source {
            tokio::fs::remove_file(request.path).await?;
        }
        let key = object_key(request.folder, request.object_name);
        self.uploaded.lock().unwrap().push(key.clone());
        Ok(key)
    }
}
