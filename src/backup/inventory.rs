// dbbackupd/src/backup/inventory.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::Connection;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::artifact::DumpTarget;
use crate::config::DatabaseConfig;
use crate::errors::BackupError;
use crate::utils::with_deadline;

/// Schemas owned by the server itself; never backed up.
pub const EXCLUDED_DATABASES: &[&str] = &[
    "information_schema",
    "mysql",
    "performance_schema",
    "phpmyadmin",
    "sys",
];

/// Source of database names for a run.
#[async_trait]
pub trait DatabaseInventory: Send + Sync {
    async fn list_databases(&self) -> Result<Vec<String>>;
}

/// Lists databases over a short-lived MySQL connection.
pub struct MySqlInventory {
    database: DatabaseConfig,
    connect_timeout: Duration,
}

impl MySqlInventory {
    pub fn new(database: DatabaseConfig, connect_timeout: Duration) -> Self {
        Self {
            database,
            connect_timeout,
        }
    }

    fn connect_options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.database.host)
            .port(self.database.port)
            .username(&self.database.user)
            .password(&self.database.password)
    }
}

#[async_trait]
impl DatabaseInventory for MySqlInventory {
    async fn list_databases(&self) -> Result<Vec<String>> {
        let options = self.connect_options();
        let mut conn = with_deadline(
            &format!("connect to {}:{}", self.database.host, self.database.port),
            self.connect_timeout,
            async {
                MySqlConnection::connect_with(&options).await.with_context(|| {
                    format!(
                        "Failed to connect to MySQL at {}:{} as {}",
                        self.database.host, self.database.port, self.database.user
                    )
                })
            },
        )
        .await?;
        debug!("Connected to {}:{}", self.database.host, self.database.port);

        let listed = with_deadline("SHOW DATABASES", self.connect_timeout, async {
            sqlx::query_scalar::<_, String>("SHOW DATABASES")
                .fetch_all(&mut conn)
                .await
                .context("Failed to list databases with SHOW DATABASES")
        })
        .await;

        // Released on both the success and the failure path.
        if let Err(e) = conn.close().await {
            warn!("⚠️ Failed to close inventory connection cleanly: {}", e);
        }

        listed
    }
}

/// Lists the databases eligible for this run, minus the excluded system schemas.
pub async fn list_targets(
    inventory: &dyn DatabaseInventory,
) -> std::result::Result<Vec<DumpTarget>, BackupError> {
    let names = inventory
        .list_databases()
        .await
        .map_err(|e| BackupError::Connection(format!("{:#}", e)))?;

    let mut targets: Vec<DumpTarget> = Vec::with_capacity(names.len());
    for name in names {
        let name = name.trim();
        if name.is_empty() || is_excluded(name) {
            debug!("Skipping system database: {}", name);
            continue;
        }
        if targets.iter().any(|t| t.name == name) {
            continue;
        }
        targets.push(DumpTarget::new(name));
    }

    info!(
        "Databases to be backed up: {:?}",
        targets.iter().map(|t| t.name.as_str()).collect::<Vec<_>>()
    );
    Ok(targets)
}

fn is_excluded(name: &str) -> bool {
    EXCLUDED_DATABASES
        .iter()
        .any(|excluded| excluded.eq_ignore_ascii_case(name))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Inventory returning a fixed list, or failing like a refused connection.
    pub(crate) struct StaticInventory(pub Option<Vec<&'static str>>);

    #[async_trait]
    impl DatabaseInventory for StaticInventory {
        async fn list_databases(&self) -> Result<Vec<String>> {
            match &self.0 {
                Some(names) => Ok(names.iter().map(|n| n.to_string()).collect()),
                None => Err(anyhow::anyhow!("Connection refused (os error 111)")
                    .context("Failed to connect to MySQL at 127.0.0.1:3306 as backup")),
            }
        }
    }

    #[tokio::test]
    async fn test_system_schemas_are_excluded() -> anyhow::Result<()> {
        let inventory = StaticInventory(Some(vec![
            "information_schema",
            "shop",
            "mysql",
            "performance_schema",
            "blog",
            "phpmyadmin",
            "sys",
        ]));
        let targets = list_targets(&inventory).await?;
        assert_eq!(targets, vec![DumpTarget::new("shop"), DumpTarget::new("blog")]);
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_and_blank_names_are_dropped() -> anyhow::Result<()> {
        let inventory = StaticInventory(Some(vec!["shop", " ", "shop", "SYS"]));
        let targets = list_targets(&inventory).await?;
        assert_eq!(targets, vec![DumpTarget::new("shop")]);
        Ok(())
    }

    #[tokio::test]
    async fn test_listing_failure_is_a_connection_error() {
        let err = list_targets(&StaticInventory(None)).await.unwrap_err();
        match err {
            BackupError::Connection(message) => {
                assert!(message.contains("Connection refused"));
                assert!(message.contains("127.0.0.1:3306"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_server_is_bounded_by_deadline() -> anyhow::Result<()> {
        // Accepts the socket but never speaks the MySQL protocol.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let _server = tokio::spawn(async move {
            let _socket = listener.accept().await;
            std::future::pending::<()>().await;
        });
        let inventory = MySqlInventory::new(
            DatabaseConfig {
                host: "127.0.0.1".to_string(),
                port,
                user: "backup".to_string(),
                password: String::new(),
            },
            Duration::from_secs(5),
        );

        let err = list_targets(&inventory).await.unwrap_err();
        match err {
            BackupError::Connection(message) => assert!(message.contains("timed out"), "{message}"),
            other => panic!("unexpected error: {other:?}"),
        }
        Ok(())
    }
}
