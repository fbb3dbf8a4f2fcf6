use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

pub const DEFAULT_SERVICE_URL: &str = "http://localhost:8000/dashboard_risk/students_at_risk";
pub const DEFAULT_STORE_DIR: &str = ".risk-dashboard";

/// Where the persisted prediction set lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StoreBackend {
    /// Key/value directory on local disk
    File,
    /// Upload history tables in Postgres
    Postgres,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub service_url: String,
    pub store_backend: StoreBackend,
    pub store_dir: PathBuf,
    pub database_url: Option<String>,
    pub ttl: chrono::Duration,
    pub grace_delay: Duration,
    pub poll_interval: Duration,
}

impl Settings {
    pub fn database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .context("DATABASE_URL must be set to a production Postgres instance")
    }
}
