use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::warn;

const DEV_SECRET_KEY: &str = "change-me-to-a-strong-secret";

/// Static startup configuration. Every flag can also come from the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "darktube")]
#[command(about = "A small video sharing server", long_about = None)]
pub struct Config {
    #[arg(long, env = "DARKTUBE_BIND", default_value = "0.0.0.0:3000", help = "Address to listen on")]
    pub bind: String,

    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://darktube.db", help = "SQLite connection string")]
    pub database_url: String,

    #[arg(long, env = "DARKTUBE_UPLOAD_DIR", default_value = "uploads", help = "Directory for uploaded videos")]
    pub upload_dir: PathBuf,

    #[arg(long, env = "DARKTUBE_SECRET_KEY", default_value = DEV_SECRET_KEY, help = "Key used to sign session cookies")]
    pub secret_key: String,

    #[arg(
        long,
        env = "DARKTUBE_ALLOWED_EXTENSIONS",
        default_value = "mp4,avi,mov,mkv",
        value_delimiter = ',',
        help = "Comma-separated list of accepted file extensions"
    )]
    pub allowed_extensions: Vec<String>,

    #[arg(long, env = "DARKTUBE_SESSION_TTL_HOURS", default_value_t = 744, help = "Session lifetime in hours")]
    pub session_ttl_hours: i64,

    #[arg(
        long,
        env = "DARKTUBE_SESSION_PURGE_MINUTES",
        default_value_t = 60,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Minutes between sweeps of expired sessions"
    )]
    pub session_purge_minutes: u64,

    #[arg(long, env = "DARKTUBE_MAX_UPLOAD_BYTES", default_value_t = 1024 * 1024 * 1024, help = "Maximum request body size for uploads")]
    pub max_upload_bytes: usize,

    #[arg(long, env = "DARKTUBE_PBKDF2_ROUNDS", default_value_t = 600_000, help = "PBKDF2 iteration count for new passwords")]
    pub pbkdf2_rounds: u32,
}

impl Config {
    pub fn session_purge_interval(&self) -> Duration {
        Duration::from_secs(self.session_purge_minutes * 60)
    }

    /// Lowercased allow-list, blanks dropped.
    pub fn extension_set(&self) -> HashSet<String> {
        self.allowed_extensions
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect()
    }

    pub fn warn_if_insecure(&self) {
        if self.secret_key == DEV_SECRET_KEY {
            warn!("DARKTUBE_SECRET_KEY not set, using the development key");
        }
    }
}
