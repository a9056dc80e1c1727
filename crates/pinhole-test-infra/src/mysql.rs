use crate::{Result, TestInfraError};
use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;
use std::time::Duration;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use tracing::debug;
use typed_builder::TypedBuilder;

const MYSQL_PORT: u16 = 3306;

/// Settings of a throwaway MySQL container.
#[derive(Debug, Clone, TypedBuilder)]
pub struct MysqlConfig {
    #[builder(default = "8.4".to_string(), setter(into))]
    pub tag: String,
    #[builder(default = "pinhole".to_string(), setter(into))]
    pub database: String,
    #[builder(default = "pinhole".to_string(), setter(into))]
    pub username: String,
    #[builder(default = "pinhole".to_string(), setter(into))]
    pub password: String,
    /// Connection attempts made by [`MySqlServer::pool`].
    #[builder(default = 20)]
    pub connect_attempts: usize,
    #[builder(default = Duration::from_millis(500))]
    pub connect_backoff: Duration,
}

/// A MySQL server living as long as this value.
pub struct MySqlServer {
    container: ContainerAsync<GenericImage>,
    config: MysqlConfig,
}

impl MySqlServer {
    pub async fn new(config: MysqlConfig) -> Result<Self> {
        let container = GenericImage::new("mysql", config.tag.as_str())
            .with_exposed_port(MYSQL_PORT.tcp())
            .with_wait_for(WaitFor::message_on_stderr("ready for connections"))
            .with_env_var("MYSQL_ROOT_PASSWORD", "root")
            .with_env_var("MYSQL_DATABASE", config.database.as_str())
            .with_env_var("MYSQL_USER", config.username.as_str())
            .with_env_var("MYSQL_PASSWORD", config.password.as_str())
            .start()
            .await?;

        Ok(Self { container, config })
    }

    /// Host of the mapped port. `localhost` is pinned to IPv4.
    pub async fn host(&self) -> Result<String> {
        let host = self.container.get_host().await?.to_string();
        Ok(if host == "localhost" {
            "127.0.0.1".to_string()
        } else {
            host
        })
    }

    pub async fn port(&self) -> Result<u16> {
        Ok(self.container.get_host_port_ipv4(MYSQL_PORT).await?)
    }

    pub async fn database_url(&self) -> Result<String> {
        let MysqlConfig {
            database,
            username,
            password,
            ..
        } = &self.config;
        let host = self.host().await?;
        let port = self.port().await?;

        Ok(format!(
            "mysql://{username}:{password}@{host}:{port}/{database}"
        ))
    }

    /// Opens a pool, retrying while the server finishes its first boot.
    ///
    /// The "ready for connections" line is printed once by the temporary
    /// init server as well, so the first attempts may be refused.
    pub async fn pool(&self) -> Result<MySqlPool> {
        let url = self.database_url().await?;
        let attempts = self.config.connect_attempts.max(1);

        let mut attempt = 1;
        loop {
            match MySqlPoolOptions::new().max_connections(5).connect(&url).await {
                Ok(pool) => return Ok(pool),
                Err(source) if attempt >= attempts => {
                    return Err(TestInfraError::Unreachable { attempts, source });
                }
                Err(err) => {
                    debug!(attempt, error = %err, "mysql not ready yet");
                    attempt += 1;
                    tokio::time::sleep(self.config.connect_backoff).await;
                }
            }
        }
    }
}
