// dbbackupd/src/backup/db_dump.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::info;

use super::artifact::{Artifact, ArtifactKind, DumpTarget};
use crate::config::DatabaseConfig;
use crate::errors::BackupError;
use crate::utils::{find_mysqldump_executable, format_size, with_deadline};

pub const DUMP_CHARSET: &str = "utf8mb4";
pub const DUMP_COLLATION: &str = "utf8mb4_general_ci";

/// Writes a full dump of one database to a file.
#[async_trait]
pub trait DatabaseDumper: Send + Sync {
    async fn dump(&self, target: &DumpTarget, output_path: &Path) -> Result<()>;
}

/// Dumps databases by running the `mysqldump` client.
pub struct MysqlDumper {
    database: DatabaseConfig,
    executable: PathBuf,
}

impl MysqlDumper {
    pub fn locate(database: DatabaseConfig) -> Result<Self> {
        let executable = find_mysqldump_executable()?;
        info!("Found mysqldump executable at: {}", executable.display());
        Ok(Self {
            database,
            executable,
        })
    }
}

#[async_trait]
impl DatabaseDumper for MysqlDumper {
    async fn dump(&self, target: &DumpTarget, output_path: &Path) -> Result<()> {
        let output = Command::new(&self.executable)
            .args(mysqldump_args(&self.database, &target.name, output_path))
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to execute mysqldump for database: {}", target.name))?;

        if !output.status.success() {
            anyhow::bail!(
                "mysqldump for database {} failed with status: {}\nStderr: {}",
                target.name,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// Command line for one dump. The password flag is always present, empty or not.
pub fn mysqldump_args(database: &DatabaseConfig, name: &str, output_path: &Path) -> Vec<String> {
    vec![
        format!("--host={}", database.host),
        format!("--port={}", database.port),
        format!("--user={}", database.user),
        format!("--password={}", database.password),
        name.to_string(),
        format!("--result-file={}", output_path.display()),
        format!("--default-character-set={}", DUMP_CHARSET),
        format!("--collation={}", DUMP_COLLATION),
        "--skip-set-charset".to_string(),
    ]
}

/// `<working_dir>/<name>_<YYYY-MM-DD_HH-MM-SS>.sql`
pub fn dump_file_path(working_dir: &Path, name: &str, at: DateTime<Local>) -> PathBuf {
    working_dir.join(format!("{}_{}.sql", name, at.format("%Y-%m-%d_%H-%M-%S")))
}

/// Dumps one target into the working area and measures the result.
pub async fn dump_target(
    dumper: &dyn DatabaseDumper,
    target: &DumpTarget,
    working_dir: &Path,
    deadline: Duration,
) -> std::result::Result<Artifact, BackupError> {
    let output_path = dump_file_path(working_dir, &target.name, Local::now());
    info!("🔍 Backing up database {} to {}", target.name, output_path.display());

    let measured = with_deadline(&format!("mysqldump {}", target.name), deadline, async {
        dumper.dump(target, &output_path).await?;
        let metadata = tokio::fs::metadata(&output_path)
            .await
            .with_context(|| format!("Dump file {} was not written", output_path.display()))?;
        Ok(metadata.len())
    })
    .await;

    match measured {
        Ok(size_bytes) => {
            info!(
                "✅ Dumped database {} to {} (size: {})",
                target.name,
                output_path.display(),
                format_size(size_bytes)
            );
            Ok(Artifact {
                path: output_path,
                size_bytes,
                kind: ArtifactKind::Dump,
                owner: target.name.clone(),
            })
        }
        Err(e) => Err(BackupError::Dump {
            database: target.name.clone(),
            message: format!("{:#}", e),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::testing::ScriptedDumper;
    use chrono::TimeZone;

    fn database(password: &str) -> DatabaseConfig {
        DatabaseConfig {
            host: "db.internal".to_string(),
            port: 3306,
            user: "backup".to_string(),
            password: password.to_string(),
        }
    }

    #[test]
    fn test_empty_password_is_passed_explicitly() {
        let args = mysqldump_args(&database(""), "shop", Path::new("/work/shop.sql"));
        assert!(args.contains(&"--password=".to_string()));
    }

    #[test]
    fn test_args_carry_charset_and_target() {
        let args = mysqldump_args(&database("pw"), "shop", Path::new("/work/shop.sql"));
        assert_eq!(
            args,
            vec![
                "--host=db.internal",
                "--port=3306",
                "--user=backup",
                "--password=pw",
                "shop",
                "--result-file=/work/shop.sql",
                "--default-character-set=utf8mb4",
                "--collation=utf8mb4_general_ci",
                "--skip-set-charset",
            ]
        );
    }

    #[test]
    fn test_dump_file_name_embeds_second_resolution_timestamp() {
        let at = Local
            .with_ymd_and_hms(2026, 10, 18, 3, 4, 5)
            .single()
            .expect("unambiguous local time");
        let path = dump_file_path(Path::new("respaldos_mysql"), "shop", at);
        assert_eq!(path, Path::new("respaldos_mysql/shop_2026-10-18_03-04-05.sql"));
    }

    #[tokio::test]
    async fn test_dump_target_measures_artifact() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let dumper = ScriptedDumper::default();
        let artifact = dump_target(
            &dumper,
            &DumpTarget::new("shop"),
            dir.path(),
            Duration::from_secs(5),
        )
        .await?;

        assert_eq!(artifact.kind, ArtifactKind::Dump);
        assert_eq!(artifact.owner, "shop");
        assert_eq!(artifact.size_bytes, std::fs::metadata(&artifact.path)?.len());
        assert!(artifact.size_bytes > 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_dump_failure_names_database() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let dumper = ScriptedDumper::failing_on(&["blog"]);
        let err = dump_target(&dumper, &DumpTarget::new("blog"), dir.path(), Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            BackupError::Dump { database, message } => {
                assert_eq!(database, "blog");
                assert!(message.contains("Access denied"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        Ok(())
    }
}
