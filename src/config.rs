use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub server_host: String,
    pub server_port: u16,
    pub data_dir: PathBuf,
    pub flush_interval_secs: u64,
    pub default_daily_quota: u32,
    pub default_monthly_quota: u32,
    pub symbols_monthly_cap: u64,
    pub ban_window_days: u64,
    pub log_level: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 8184,
            data_dir: PathBuf::from("data/ledger"),
            flush_interval_secs: 30,
            default_daily_quota: 30,
            default_monthly_quota: 1000,
            symbols_monthly_cap: 500_000,
            ban_window_days: 7,
            log_level: "info".to_string(),
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        if let Ok(host) = env::var("LEDGER_HOST") {
            cfg.server_host = host;
        }
        if let Ok(port) = env::var("LEDGER_PORT") {
            cfg.server_port = port.parse().context("LEDGER_PORT must be a valid u16")?;
        }
        if let Ok(dir) = env::var("LEDGER_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Ok(interval) = env::var("FLUSH_INTERVAL_SECS") {
            cfg.flush_interval_secs = interval
                .parse()
                .context("FLUSH_INTERVAL_SECS must be a positive integer")?;
        }
        if let Ok(quota) = env::var("DEFAULT_DAILY_QUOTA") {
            cfg.default_daily_quota = quota
                .parse()
                .context("DEFAULT_DAILY_QUOTA must be a positive integer")?;
        }
        if let Ok(quota) = env::var("DEFAULT_MONTHLY_QUOTA") {
            cfg.default_monthly_quota = quota
                .parse()
                .context("DEFAULT_MONTHLY_QUOTA must be a positive integer")?;
        }
        if let Ok(cap) = env::var("SYMBOLS_MONTHLY_CAP") {
            cfg.symbols_monthly_cap = cap
                .parse()
                .context("SYMBOLS_MONTHLY_CAP must be a positive integer")?;
        }
        if let Ok(days) = env::var("BAN_WINDOW_DAYS") {
            cfg.ban_window_days = days
                .parse()
                .context("BAN_WINDOW_DAYS must be a positive integer")?;
        }
        if let Ok(level) = env::var("LOG_LEVEL") {
            cfg.log_level = level;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        ensure_directory(&self.data_dir)?;

        if self.flush_interval_secs == 0 {
            anyhow::bail!("FLUSH_INTERVAL_SECS must be greater than zero");
        }
        if self.default_daily_quota == 0 {
            anyhow::bail!("DEFAULT_DAILY_QUOTA must be greater than zero");
        }
        if self.default_monthly_quota == 0 {
            anyhow::bail!("DEFAULT_MONTHLY_QUOTA must be greater than zero");
        }
        if self.symbols_monthly_cap == 0 {
            anyhow::bail!("SYMBOLS_MONTHLY_CAP must be greater than zero");
        }
        if self.ban_window_days == 0 {
            anyhow::bail!("BAN_WINDOW_DAYS must be greater than zero");
        }

        Ok(())
    }
}

fn ensure_directory(path: &Path) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            anyhow::bail!("{} exists but is not a directory", path.display());
        }
    } else {
        fs::create_dir_all(path)
            .with_context(|| format!("unable to create data directory {}", path.display()))?;
    }
    Ok(())
}
