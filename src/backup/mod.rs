pub(crate) mod archive;    // Single-file zip or tar.gz archives
pub(crate) mod artifact;   // Values threaded between stages
pub(crate) mod cleanup;    // Working-area purge after a failed run
pub(crate) mod db_dump;    // mysqldump invocation
pub(crate) mod inventory;  // SHOW DATABASES over a scoped connection
mod logic;
pub(crate) mod s3_upload;  // Chunked uploads to S3-compatible storage
#[cfg(test)]
pub(crate) mod testing;

use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
pub use artifact::{RunReport, RunResult};
pub use logic::{BackupPipeline, PipelineSettings};

/// Builds the production pipeline (MySQL, mysqldump, zip or tar.gz, S3) from the configuration.
pub async fn build_pipeline(
    app_config: &AppConfig,
    shutdown: CancellationToken,
) -> Result<BackupPipeline> {
    let inventory = inventory::MySqlInventory::new(
        app_config.database.clone(),
        app_config.timeouts.connect,
    );
    let dumper = db_dump::MysqlDumper::locate(app_config.database.clone())?;
    let store = s3_upload::S3Store::connect(&app_config.spaces_config).await;

    let settings = PipelineSettings {
        working_dir: app_config.working_dir.clone(),
        upload: app_config.upload.clone(),
        destination_folder: app_config.spaces_config.folder_prefix.clone(),
        timeouts: app_config.timeouts.clone(),
        startup_upload_delay: app_config.schedule.startup_upload_delay,
    };

    Ok(BackupPipeline::new(
        Arc::new(inventory),
        Arc::new(dumper),
        archive::archiver_for(app_config.archive_format),
        Arc::new(store),
        settings,
        shutdown,
    ))
}
