use std::path::PathBuf;

use clap::{ArgAction, Args};
use tracing::warn;

/// Placeholder secrets that must be replaced outside development.
const PLACEHOLDER_SECRETS: &[&str] = &["you-will-never-guess"];

/// Settings sourced from flags, the environment, or `.env`.
#[derive(Debug, Clone, Args)]
pub struct Config {
    /// SQLite database file. A `sqlite://` prefix is accepted.
    #[arg(env = "DATABASE_URL", long, default_value = "app.db")]
    pub database_url: String,

    /// Key for signing tokens and form protection.
    #[arg(env = "SECRET_KEY", long, default_value = "you-will-never-guess", hide_env_values = true)]
    pub secret_key: String,

    /// The host to listen on.
    #[arg(env = "MICROBLOG_HOST", long, default_value = "0.0.0.0")]
    pub host: String,

    /// The port to listen on.
    #[arg(env = "MICROBLOG_PORT", long, default_value_t = 5000)]
    pub port: u16,

    /// Directory holding migration step files.
    #[arg(env = "MICROBLOG_MIGRATIONS_DIR", long, default_value = "migrations/versions")]
    pub migrations_dir: PathBuf,

    /// Upgrade the store to head before serving.
    #[arg(env = "MICROBLOG_AUTO_MIGRATE", long, default_value_t = true, action = ArgAction::Set)]
    pub auto_migrate: bool,
}

impl Config {
    pub fn database_path(&self) -> PathBuf {
        let url = self.database_url.as_str();
        let path = url
            .strip_prefix("sqlite:///")
            .or_else(|| url.strip_prefix("sqlite://"))
            .unwrap_or(url);
        PathBuf::from(path)
    }

    pub fn warn_on_placeholder_secret(&self) {
        if self.secret_key.is_empty() || PLACEHOLDER_SECRETS.contains(&self.secret_key.as_str()) {
            warn!("SECRET_KEY is unset or still a placeholder; set it in your .env before deploying");
        }
    }
}
