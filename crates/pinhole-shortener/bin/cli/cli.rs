use clap::{Parser, Subcommand, ValueEnum};
use pinhole_telemetry::LogFormat;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const STORAGE_BACKEND_ENV: &str = "PINHOLE_STORAGE_BACKEND";
pub const SNAPSHOT_PATH_ENV: &str = "PINHOLE_SNAPSHOT_PATH";
pub const MYSQL_DSN_ENV: &str = "PINHOLE_MYSQL_DSN";
pub const MYSQL_PING_TIMEOUT_ENV: &str = "PINHOLE_MYSQL_PING_TIMEOUT_MS";
pub const BASE_URL_ENV: &str = "PINHOLE_BASE_URL";
pub const DELETION_WORKERS_ENV: &str = "PINHOLE_DELETION_WORKERS";
pub const CODE_LENGTH_ENV: &str = "PINHOLE_CODE_LENGTH";
pub const LOG_FORMAT_ENV: &str = "PINHOLE_LOG_FORMAT";

pub const DEFAULT_SNAPSHOT_PATH: &str = "pinhole.snapshot";
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_MYSQL_PING_TIMEOUT_MS: u64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackendArg {
    #[value(name = "in-memory")]
    InMemory,
    #[value(name = "mysql")]
    Mysql,
}

impl Display for StorageBackendArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackendArg::InMemory => write!(f, "in-memory"),
            StorageBackendArg::Mysql => write!(f, "mysql"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "pinhole", about = "Shorten, resolve and delete URLs")]
pub struct CLI {
    #[arg(
        long,
        env = STORAGE_BACKEND_ENV,
        value_enum,
        default_value_t = StorageBackendArg::InMemory
    )]
    pub storage: StorageBackendArg,

    #[arg(long, env = SNAPSHOT_PATH_ENV, default_value = DEFAULT_SNAPSHOT_PATH)]
    pub snapshot_path: PathBuf,

    #[arg(long, env = MYSQL_DSN_ENV, required_if_eq("storage", "mysql"))]
    pub mysql_dsn: Option<String>,

    /// How long `ping` waits for MySQL, in milliseconds.
    #[arg(
        long = "mysql-ping-timeout-ms",
        env = MYSQL_PING_TIMEOUT_ENV,
        default_value_t = DEFAULT_MYSQL_PING_TIMEOUT_MS
    )]
    pub mysql_ping_timeout_ms: u64,

    #[arg(long, env = BASE_URL_ENV, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    #[arg(
        long,
        env = DELETION_WORKERS_ENV,
        default_value_t = pinhole_shortener::deletion::DEFAULT_DELETION_WORKERS
    )]
    pub deletion_workers: usize,

    #[arg(
        long,
        env = CODE_LENGTH_ENV,
        default_value_t = pinhole_generator::random::DEFAULT_CODE_LENGTH
    )]
    pub code_length: usize,

    #[arg(long, env = LOG_FORMAT_ENV, value_enum, default_value_t = LogFormatArg::Text)]
    pub log_format: LogFormatArg,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Shorten one URL.
    Shorten {
        #[arg(long)]
        user: String,
        url: String,
    },
    /// Shorten every entry of a JSON file of `{correlation_id, original_url}`.
    Batch {
        #[arg(long)]
        user: String,
        file: PathBuf,
    },
    /// Print the original URL behind a short code.
    Resolve { code: String },
    /// List the active URLs of a user.
    List {
        #[arg(long)]
        user: String,
    },
    /// Queue short codes for deletion.
    Delete {
        #[arg(long)]
        user: String,
        #[arg(required = true)]
        codes: Vec<String>,
    },
    Stats,
    /// Check that the storage backend answers.
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_in_memory() {
        let cli = CLI::try_parse_from(["pinhole", "stats"]).unwrap();

        assert_eq!(cli.storage, StorageBackendArg::InMemory);
        assert_eq!(cli.snapshot_path, PathBuf::from(DEFAULT_SNAPSHOT_PATH));
        assert_eq!(cli.deletion_workers, 4);
        assert_eq!(cli.code_length, 8);
        assert_eq!(cli.mysql_ping_timeout_ms, 2000);
        assert!(matches!(cli.command, Command::Stats));
    }

    #[test]
    fn mysql_requires_dsn() {
        let err = CLI::try_parse_from(["pinhole", "--storage", "mysql", "ping"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn mysql_ping_timeout_is_configurable() {
        let cli = CLI::try_parse_from([
            "pinhole",
            "--storage",
            "mysql",
            "--mysql-dsn",
            "mysql://u:p@localhost/db",
            "--mysql-ping-timeout-ms",
            "250",
            "ping",
        ])
        .unwrap();

        assert_eq!(cli.mysql_ping_timeout_ms, 250);
    }

    #[test]
    fn delete_requires_codes() {
        assert!(CLI::try_parse_from(["pinhole", "delete", "--user", "u1"]).is_err());

        let cli = CLI::try_parse_from(["pinhole", "delete", "--user", "u1", "abc", "def"]).unwrap();
        match cli.command {
            Command::Delete { user, codes } => {
                assert_eq!(user, "u1");
                assert_eq!(codes, vec!["abc", "def"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
