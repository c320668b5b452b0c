use std::env;
use std::time::Duration;

use anyhow::{anyhow, bail};
use chrono::FixedOffset;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database: DatabaseConfig,
    pub bind_addr: String,
    pub storage: StorageBackend,
    /// Upper bound on waiting for a booking's commit scope.
    pub commit_timeout: Duration,
    /// Offset in which `DD/MM/YYYY HH:MM` strings are read and written.
    pub clinic_offset: FixedOffset,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let storage = match env::var("STORAGE").ok().as_deref().map(str::trim) {
            None | Some("") | Some("postgres") => StorageBackend::Postgres,
            Some("memory") => StorageBackend::Memory,
            Some(other) => bail!("STORAGE must be `postgres` or `memory`, got `{other}`"),
        };

        let url = match storage {
            StorageBackend::Postgres => env::var("DATABASE_URL")?,
            StorageBackend::Memory => env::var("DATABASE_URL").unwrap_or_default(),
        };
        let max_connections = env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(10);

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let commit_timeout_ms = env::var("COMMIT_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(5_000);
        let clinic_offset = match env::var("CLINIC_UTC_OFFSET") {
            Ok(raw) => parse_utc_offset(&raw)?,
            Err(_) => parse_utc_offset("-03:00")?,
        };

        Ok(Self {
            database: DatabaseConfig {
                url,
                max_connections,
            },
            bind_addr,
            storage,
            commit_timeout: Duration::from_millis(commit_timeout_ms),
            clinic_offset,
        })
    }
}

/// Parses `+HH:MM` / `-HH:MM`.
pub fn parse_utc_offset(raw: &str) -> anyhow::Result<FixedOffset> {
    let raw = raw.trim();
    let (sign, rest) = match raw.as_bytes().first() {
        Some(b'+') => (1, &raw[1..]),
        Some(b'-') => (-1, &raw[1..]),
        _ => bail!("utc offset must start with + or -: `{raw}`"),
    };
    let (hours, minutes) = rest
        .split_once(':')
        .ok_or_else(|| anyhow!("utc offset must look like -03:00: `{raw}`"))?;
    let hours: i32 = hours.parse()?;
    let minutes: i32 = minutes.parse()?;
    if !(0..=23).contains(&hours) || !(0..=59).contains(&minutes) {
        bail!("utc offset out of range: `{raw}`");
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| anyhow!("utc offset out of range: `{raw}`"))
}
