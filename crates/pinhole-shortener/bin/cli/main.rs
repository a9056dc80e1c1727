mod cli;

use crate::cli::{Command, StorageBackendArg, CLI};
use anyhow::{bail, Context};
use clap::Parser;
use pinhole_core::Repository;
use pinhole_generator::RandomGenerator;
use pinhole_shortener::{ServiceSettings, Shortener, ShortenerError, ShortenerService};
use pinhole_storage::{MySqlRepository, SnapshotPersister};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, Deserialize)]
struct BatchItem {
    correlation_id: String,
    original_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CLI::parse();

    pinhole_telemetry::init(config.log_format.into()).context("failed to initialise logging")?;

    info!(
        storage_backend = %config.storage,
        base_url = %config.base_url,
        deletion_workers = config.deletion_workers,
        code_length = config.code_length,
        "starting pinhole"
    );

    let generator = RandomGenerator::new(config.code_length).context("invalid code length")?;
    let settings = ServiceSettings::builder()
        .deletion_workers(config.deletion_workers)
        .build();

    match config.storage {
        StorageBackendArg::InMemory => {
            let persister = SnapshotPersister::new(&config.snapshot_path);
            let repository = persister.load().await.with_context(|| {
                format!("failed to load snapshot {}", config.snapshot_path.display())
            })?;

            let outcome = run(
                repository.clone(),
                generator,
                settings,
                &config.base_url,
                config.command,
            )
            .await;

            if let Err(err) = persister.save(&repository).await {
                error!(
                    path = %persister.path().display(),
                    error = %err,
                    "failed to save snapshot"
                );
                return Err(err).context("failed to save snapshot");
            }

            outcome
        }
        StorageBackendArg::Mysql => {
            let mysql_dsn = config
                .mysql_dsn
                .context("mysql dsn is required when storage backend is mysql")?;
            let repository = MySqlRepository::connect(&mysql_dsn)
                .await
                .context("failed to connect to mysql")?
                .with_ping_timeout(Duration::from_millis(config.mysql_ping_timeout_ms));
            repository
                .ensure_schema()
                .await
                .context("failed to create mysql schema")?;

            run(
                repository,
                generator,
                settings,
                &config.base_url,
                config.command,
            )
            .await
        }
    }
}

/// Runs one command and drains pending deletions before returning.
async fn run<R: Repository>(
    repository: R,
    generator: RandomGenerator,
    settings: ServiceSettings,
    base_url: &str,
    command: Command,
) -> anyhow::Result<()> {
    let service = ShortenerService::with_settings(repository, generator, settings);
    let outcome = execute(&service, base_url, command).await;
    service.shutdown().await;
    outcome
}

async fn execute<S: Shortener>(
    service: &S,
    base_url: &str,
    command: Command,
) -> anyhow::Result<()> {
    let output = match command {
        Command::Shorten { user, url } => match service.save_url(&url, base_url, &user).await {
            Ok(short_url) => json!({ "short_url": short_url, "created": true }),
            Err(ShortenerError::ConflictInsert(short_url)) => {
                json!({ "short_url": short_url, "created": false })
            }
            Err(err) => return Err(err.into()),
        },
        Command::Batch { user, file } => {
            let batch = read_batch(&file).await?;
            let saved = service.save_urls(batch, base_url, &user).await?;
            let entries: Vec<_> = saved
                .into_iter()
                .map(|(correlation_id, short_url)| {
                    json!({ "correlation_id": correlation_id, "short_url": short_url })
                })
                .collect();
            json!(entries)
        }
        Command::Resolve { code } => {
            let original_url = service.get_url(&code).await?;
            json!({ "code": code, "original_url": original_url })
        }
        Command::List { user } => json!(service.get_user_urls(&user).await?),
        Command::Delete { user, codes } => {
            let accepted = codes.len();
            service.delete_urls(codes, &user).await?;
            json!({ "accepted": accepted })
        }
        Command::Stats => json!(service.statistics().await?),
        Command::Ping => {
            service.check_connection().await?;
            json!({ "status": "ok" })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn read_batch(path: &Path) -> anyhow::Result<BTreeMap<String, String>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read batch file {}", path.display()))?;
    let items: Vec<BatchItem> = serde_json::from_str(&content)
        .with_context(|| format!("invalid batch file {}", path.display()))?;

    let mut batch = BTreeMap::new();
    for item in items {
        if batch
            .insert(item.correlation_id.clone(), item.original_url)
            .is_some()
        {
            bail!("duplicate correlation id {}", item.correlation_id);
        }
    }
    Ok(batch)
}
