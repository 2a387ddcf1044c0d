// dbbackupd/src/config/mod.rs
use anyhow::{Context, Result};
use chrono::Weekday;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_WORKING_DIR: &str = "respaldos_mysql";
pub const DEFAULT_RUN_GATE_FILE: &str = "backup_log.txt";
pub const DEFAULT_MYSQL_PORT: u16 = 3306;
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
/// Environment variable that overrides `database.password` from config.json.
pub const PASSWORD_ENV_VAR: &str = "BACKUP_DB_PASSWORD";

// Structs for deserializing config.json
#[derive(Debug, Clone, Deserialize)]
pub struct JsonDatabaseConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonS3StorageConfig {
    pub bucket_name: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint_url: Option<String>,
    pub folder_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonUploadOptions {
    pub chunk_size_bytes: Option<usize>,
    pub content_type: Option<String>,
    pub resumable: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonScheduleOptions {
    pub interval_hours: Option<u64>,
    pub weekday: Option<String>,
    pub startup_upload_delay_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonTimeouts {
    pub connect_secs: Option<u64>,
    pub dump_secs: Option<u64>,
    pub compress_secs: Option<u64>,
    pub upload_chunk_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawJsonConfig {
    pub database: Option<JsonDatabaseConfig>,
    pub working_dir: Option<PathBuf>,
    pub archive_format: Option<String>,
    pub run_gate_file: Option<PathBuf>,
    pub s3_storage: Option<JsonS3StorageConfig>,
    pub upload: Option<JsonUploadOptions>,
    pub schedule: Option<JsonScheduleOptions>,
    pub timeouts: Option<JsonTimeouts>,
}

// Application's internal configuration structs
#[derive(Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// May be empty; the dump command then receives an explicit empty password.
    pub password: String,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &if self.password.is_empty() { "<empty>" } else { "<redacted>" })
            .finish()
    }
}

#[derive(Clone)]
pub struct SpacesConfig {
    pub endpoint_url: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    /// Destination folder for uploaded archives (S3 key prefix).
    pub folder_prefix: Option<String>,
}

impl std::fmt::Debug for SpacesConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpacesConfig")
            .field("endpoint_url", &self.endpoint_url)
            .field("region", &self.region)
            .field("bucket_name", &self.bucket_name)
            .field("folder_prefix", &self.folder_prefix)
            .finish_non_exhaustive()
    }
}

/// Container each dump is packed into before upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArchiveFormat {
    #[default]
    Zip,
    TarGz,
}

impl ArchiveFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::TarGz => "tar.gz",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "application/zip",
            ArchiveFormat::TarGz => "application/gzip",
        }
    }
}

impl std::str::FromStr for ArchiveFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zip" => Ok(ArchiveFormat::Zip),
            "tar.gz" | "tgz" => Ok(ArchiveFormat::TarGz),
            other => anyhow::bail!("archive_format '{}' is not one of: zip, tar.gz", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub chunk_size: usize,
    pub content_type: String,
    pub resumable: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            content_type: ArchiveFormat::default().content_type().to_string(),
            resumable: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub interval: Duration,
    pub weekday: Weekday,
    pub startup_upload_delay: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 60 * 60),
            weekday: Weekday::Sun,
            startup_upload_delay: Duration::from_secs(5),
        }
    }
}

/// Deadlines applied to every external call.
#[derive(Debug, Clone)]
pub struct Timeouts {
    pub connect: Duration,
    pub dump: Duration,
    pub compress: Duration,
    pub upload_chunk: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            dump: Duration::from_secs(2 * 60 * 60),
            compress: Duration::from_secs(60 * 60),
            upload_chunk: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub working_dir: PathBuf,
    pub run_gate_file: PathBuf,
    pub archive_format: ArchiveFormat,
    pub spaces_config: SpacesConfig,
    pub upload: UploadOptions,
    pub schedule: ScheduleConfig,
    pub timeouts: Timeouts,
}

impl AppConfig {
    /// Reads and validates `config_path`. The database password may be
    /// overridden through `BACKUP_DB_PASSWORD` (a `.env` file is honoured).
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let raw_json_config: RawJsonConfig = serde_json::from_str(&config_content)
            .with_context(|| {
                format!(
                    "Failed to parse JSON from config file at {}",
                    config_path.display()
                )
            })?;

        let password_override = std::env::var(PASSWORD_ENV_VAR).ok();
        Self::from_raw(raw_json_config, password_override)
    }

    pub fn from_raw(raw: RawJsonConfig, password_override: Option<String>) -> Result<Self> {
        let db_raw = raw
            .database
            .context("database section must be set in config.json")?;
        let host = db_raw
            .host
            .filter(|s| !s.trim().is_empty())
            .context("database.host must be set in config.json")?;
        let user = db_raw
            .user
            .filter(|s| !s.trim().is_empty())
            .context("database.user must be set in config.json")?;
        let password = password_override.or(db_raw.password).unwrap_or_default();

        let database = DatabaseConfig {
            host,
            port: db_raw.port.unwrap_or(DEFAULT_MYSQL_PORT),
            user,
            password,
        };

        let working_dir = raw
            .working_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKING_DIR));
        if working_dir.as_os_str().is_empty() {
            anyhow::bail!("working_dir cannot be empty in config.json.");
        }
        let run_gate_file = raw
            .run_gate_file
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RUN_GATE_FILE));

        let archive_format = match raw.archive_format.as_deref() {
            Some(format) => format.parse::<ArchiveFormat>()?,
            None => ArchiveFormat::default(),
        };

        let spaces_config = parse_spaces_config(
            raw.s3_storage
                .as_ref()
                .context("s3_storage must be set in config.json")?,
        )?;

        Ok(AppConfig {
            database,
            working_dir,
            run_gate_file,
            archive_format,
            spaces_config,
            upload: parse_upload_options(raw.upload.unwrap_or_default(), archive_format)?,
            schedule: parse_schedule(raw.schedule.unwrap_or_default())?,
            timeouts: parse_timeouts(raw.timeouts.unwrap_or_default()),
        })
    }
}

fn parse_spaces_config(s3_raw: &JsonS3StorageConfig) -> Result<SpacesConfig> {
    let required = |value: &Option<String>, field: &str| -> Result<String> {
        value
            .as_ref()
            .filter(|s| !s.is_empty())
            .cloned()
            .with_context(|| format!("s3_storage.{} is missing or empty in config.json", field))
    };

    Ok(SpacesConfig {
        bucket_name: required(&s3_raw.bucket_name, "bucket_name")?,
        region: required(&s3_raw.region, "region")?,
        access_key_id: required(&s3_raw.access_key_id, "access_key_id")?,
        secret_access_key: required(&s3_raw.secret_access_key, "secret_access_key")?,
        endpoint_url: required(&s3_raw.endpoint_url, "endpoint_url")?,
        folder_prefix: s3_raw.folder_prefix.clone().filter(|s| !s.is_empty()),
    })
}

fn parse_upload_options(raw: JsonUploadOptions, format: ArchiveFormat) -> Result<UploadOptions> {
    let defaults = UploadOptions {
        content_type: format.content_type().to_string(),
        ..UploadOptions::default()
    };
    let chunk_size = raw.chunk_size_bytes.unwrap_or(defaults.chunk_size);
    if chunk_size == 0 {
        anyhow::bail!("upload.chunk_size_bytes must be greater than zero");
    }
    Ok(UploadOptions {
        chunk_size,
        content_type: raw
            .content_type
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.content_type),
        resumable: raw.resumable.unwrap_or(defaults.resumable),
    })
}

fn parse_schedule(raw: JsonScheduleOptions) -> Result<ScheduleConfig> {
    let defaults = ScheduleConfig::default();

    let interval = match raw.interval_hours {
        Some(0) => anyhow::bail!("schedule.interval_hours must be greater than zero"),
        Some(hours) => Duration::from_secs(hours * 60 * 60),
        None => defaults.interval,
    };
    let weekday = match raw.weekday {
        Some(day) => day
            .trim()
            .parse::<Weekday>()
            .map_err(|_| anyhow::anyhow!("schedule.weekday '{}' is not a day of the week", day))?,
        None => defaults.weekday,
    };
    let startup_upload_delay = raw
        .startup_upload_delay_secs
        .map(Duration::from_secs)
        .unwrap_or(defaults.startup_upload_delay);

    Ok(ScheduleConfig {
        interval,
        weekday,
        startup_upload_delay,
    })
}

fn parse_timeouts(raw: JsonTimeouts) -> Timeouts {
    let defaults = Timeouts::default();
    Timeouts {
        connect: raw.connect_secs.map(Duration::from_secs).unwrap_or(defaults.connect),
        dump: raw.dump_secs.map(Duration::from_secs).unwrap_or(defaults.dump),
        compress: raw.compress_secs.map(Duration::from_secs).unwrap_or(defaults.compress),
        upload_chunk: raw
            .upload_chunk_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.upload_chunk),
    }
}
