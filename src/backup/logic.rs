// dbbackupd/src/backup/logic.rs
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::archive::{archive_artifact, Archiver};
use super::artifact::{Artifact, DumpTarget, RunReport, RunResult};
use super::cleanup::{purge_working_area, working_area_is_empty};
use super::db_dump::{dump_target, DatabaseDumper};
use super::inventory::{list_targets, DatabaseInventory};
use super::s3_upload::{upload_artifact, RemoteStore};
use crate::config::{Timeouts, UploadOptions};
use crate::errors::BackupError;
use crate::schedule::{AttemptKind, BackupJob};
use crate::utils::format_size;

/// Knobs of a pipeline run that do not come from the capabilities themselves.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub working_dir: PathBuf,
    pub upload: UploadOptions,
    pub destination_folder: Option<String>,
    pub timeouts: Timeouts,
    /// Pause before uploading on the startup attempt, while links come up.
    pub startup_upload_delay: Duration,
}

/// Dump → compress → upload, with cleanup when any stage fails.
pub struct BackupPipeline {
    inventory: Arc<dyn DatabaseInventory>,
    dumper: Arc<dyn DatabaseDumper>,
    archiver: Arc<dyn Archiver>,
    store: Arc<dyn RemoteStore>,
    settings: PipelineSettings,
    shutdown: CancellationToken,
}

impl BackupPipeline {
    pub fn new(
        inventory: Arc<dyn DatabaseInventory>,
        dumper: Arc<dyn DatabaseDumper>,
        archiver: Arc<dyn Archiver>,
        store: Arc<dyn RemoteStore>,
        settings: PipelineSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inventory,
            dumper,
            archiver,
            store,
            settings,
            shutdown,
        }
    }

    /// Runs one attempt end to end.
    ///
    /// `Err` is only returned when the databases could not be listed; nothing
    /// has been written at that point, so no cleanup happens.
    pub async fn perform_backup_orchestration(
        &self,
        upload_delay: Duration,
    ) -> Result<RunReport, BackupError> {
        info!("🚀 Starting database backup run");
        let targets = list_targets(self.inventory.as_ref()).await?;

        let mut report = RunReport::new(RunResult::AllSucceeded);
        let result = self.run_stages(&targets, upload_delay, &mut report).await;
        report.result = result;

        if report.result.needs_cleanup() {
            error!(
                "❌ Backup run ended with: {}. Cleaning working area.",
                report.result
            );
            purge_working_area(&self.settings.working_dir);
        } else {
            let uploaded: u64 = report.receipts.iter().map(|r| r.size_bytes).sum();
            info!(
                "🎉 Backup run completed: {} archive(s) uploaded ({})",
                report.receipts.len(),
                format_size(uploaded)
            );
        }
        Ok(report)
    }

    async fn run_stages(
        &self,
        targets: &[DumpTarget],
        upload_delay: Duration,
        report: &mut RunReport,
    ) -> RunResult {
        if let Err(e) = tokio::fs::create_dir_all(&self.settings.working_dir).await {
            error!(
                "❌ Failed to create working area {}: {}",
                self.settings.working_dir.display(),
                e
            );
            return RunResult::DumpFailed;
        }
        // Files left by a killed process would otherwise outlive every later run.
        if !working_area_is_empty(&self.settings.working_dir) {
            warn!(
                "⚠️ Working area {} holds leftovers from an earlier run; removing them",
                self.settings.working_dir.display()
            );
            purge_working_area(&self.settings.working_dir);
        }

        let dumps = match self.dump_stage(targets, report).await {
            Ok(dumps) => dumps,
            Err(e) => {
                error!("❌ Error creating backups: {}", e);
                return RunResult::DumpFailed;
            }
        };
        info!("Backups created ({} database(s))", dumps.len());
        if self.stop_requested("compress") {
            return RunResult::Interrupted;
        }

        let archives = match self.archive_stage(&dumps, report).await {
            Ok(archives) => archives,
            Err(e) => {
                error!("❌ Error compressing backups: {}", e);
                return RunResult::CompressFailed;
            }
        };
        info!("Archives compressed ({} file(s))", archives.len());

        if !upload_delay.is_zero() {
            info!("Waiting {}s before uploading", upload_delay.as_secs());
            tokio::select! {
                _ = tokio::time::sleep(upload_delay) => {}
                _ = self.shutdown.cancelled() => {}
            }
        }
        if self.stop_requested("upload") {
            return RunResult::Interrupted;
        }

        if let Err(e) = self.upload_stage(&archives, report).await {
            error!("❌ Error uploading backups: {}", e);
            return RunResult::UploadFailed;
        }
        info!("Backups uploaded");
        RunResult::AllSucceeded
    }

    /// Strictly sequential; the first failing database ends the stage.
    async fn dump_stage(
        &self,
        targets: &[DumpTarget],
        report: &mut RunReport,
    ) -> Result<Vec<Artifact>, BackupError> {
        let mut dumps = Vec::with_capacity(targets.len());
        for target in targets {
            let dump = dump_target(
                self.dumper.as_ref(),
                target,
                &self.settings.working_dir,
                self.settings.timeouts.dump,
            )
            .await?;
            report.dumps_produced += 1;
            dumps.push(dump);
        }
        Ok(dumps)
    }

    async fn archive_stage(
        &self,
        dumps: &[Artifact],
        report: &mut RunReport,
    ) -> Result<Vec<Artifact>, BackupError> {
        let mut archives = Vec::with_capacity(dumps.len());
        for dump in dumps {
            let archive =
                archive_artifact(self.archiver.as_ref(), dump, self.settings.timeouts.compress)
                    .await?;
            report.archives_produced += 1;
            archives.push(archive);
        }
        Ok(archives)
    }

    async fn upload_stage(
        &self,
        archives: &[Artifact],
        report: &mut RunReport,
    ) -> Result<(), BackupError> {
        for archive in archives {
            let receipt = upload_artifact(
                self.store.as_ref(),
                archive,
                &self.settings.upload,
                self.settings.destination_folder.as_deref(),
                self.settings.timeouts.upload_chunk,
            )
            .await?;
            report.receipts.push(receipt);
        }
        Ok(())
    }

    fn stop_requested(&self, next_stage: &str) -> bool {
        if self.shutdown.is_cancelled() {
            warn!("Shutdown requested; not starting {} stage", next_stage);
            return true;
        }
        false
    }
}

#[async_trait]
impl BackupJob for BackupPipeline {
    async fn run_attempt(&self, kind: AttemptKind) -> Result<RunReport, BackupError> {
        let upload_delay = match kind {
            AttemptKind::Startup => self.settings.startup_upload_delay,
            AttemptKind::Scheduled => Duration::ZERO,
        };
        self.perform_backup_orchestration(upload_delay).await
    }
}
