use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

/// Which [`DocumentStore`](crate::store::DocumentStore) backs the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Durable SQLite database at `Config::db_path`
    Sqlite,
    /// Process-local store, nothing survives a restart
    Memory,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow!("unknown backend '{}' (expected sqlite or memory)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub backend: BackendKind,
    pub db_path: PathBuf,
    pub widget_dir: PathBuf,
    pub local_state_path: PathBuf,
    pub sync_interval: Duration,
    pub sync_debounce: Duration,
    pub jwt_secret: String,
    pub host: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::Sqlite,
            db_path: "tandem.db".into(),
            widget_dir: "./widget".into(),
            local_state_path: "./widget/local-state.json".into(),
            sync_interval: Duration::from_secs(15 * 60),
            sync_debounce: Duration::from_millis(1000),
            jwt_secret: String::new(),
            host: "0.0.0.0".into(),
            port: 3000,
        }
    }
}

impl Config {
    /// Read `TANDEM_*` variables. Callers load `.env` with dotenvy first.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("TANDEM_BACKEND") {
            config.backend = v.parse()?;
        }
        if let Some(v) = lookup("TANDEM_DB_PATH") {
            config.db_path = v.into();
        }
        if let Some(v) = lookup("TANDEM_WIDGET_DIR") {
            config.local_state_path = PathBuf::from(&v).join("local-state.json");
            config.widget_dir = v.into();
        }
        if let Some(v) = lookup("TANDEM_LOCAL_STATE_PATH") {
            config.local_state_path = v.into();
        }
        if let Some(v) = lookup("TANDEM_SYNC_INTERVAL_SECS") {
            let secs: u64 = v.parse().context("TANDEM_SYNC_INTERVAL_SECS must be an integer")?;
            config.sync_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(v) = lookup("TANDEM_SYNC_DEBOUNCE_MS") {
            let ms: u64 = v.parse().context("TANDEM_SYNC_DEBOUNCE_MS must be an integer")?;
            config.sync_debounce = Duration::from_millis(ms);
        }
        if let Some(v) = lookup("TANDEM_JWT_SECRET") {
            config.jwt_secret = v;
        }
        if let Some(v) = lookup("TANDEM_HOST") {
            config.host = v;
        }
        if let Some(v) = lookup("TANDEM_PORT") {
            config.port = v.parse().context("TANDEM_PORT must be a port number")?;
        }

        Ok(config)
    }
}
