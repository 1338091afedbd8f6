//! Configuration Module
//!
//! This module reads configuration values from environment variables, provides
//! sensible defaults, and validates key parameters such as file size limits, the
//! polling interval and the number of files processed concurrently.

use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Hard ceiling for `DMARC_MAX_FILE_SIZE`.
const MAX_FILE_SIZE_LIMIT: usize = 500_000_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub reports_dir: PathBuf,
    pub poll_interval: Duration,
    pub sweep_concurrency: usize,
    pub operation_timeout: Duration,
    pub failure_sidecar: bool,
    pub max_file_size: usize,
    pub max_decompressed_size: usize,
    pub max_files_in_zip: usize,
    pub max_compression_ratio: f64,
    pub max_filename_length: usize,
    pub webhook_url: Option<String>,
    pub webhook_timeout: Duration,
    pub webhook_retries: u32,
    pub http_addr: SocketAddr,
    pub database_url: Option<String>,
}

impl Config {
    /// Creates a new configuration by reading environment variables.
    /// If a variable is missing or empty, a default value is used.
    pub fn new() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        let max_file_size = parse_or(&get, "DMARC_MAX_FILE_SIZE", 10 * 1024 * 1024)?;
        if max_file_size > MAX_FILE_SIZE_LIMIT {
            return Err(anyhow::anyhow!("Max file size too large (500MB limit)"));
        }

        let poll_secs: u64 = parse_or(&get, "DMARC_POLL_INTERVAL_SECS", 60)?;
        if poll_secs == 0 {
            return Err(anyhow::anyhow!("DMARC_POLL_INTERVAL_SECS must be greater than 0"));
        }

        let sweep_concurrency: usize = parse_or(&get, "DMARC_SWEEP_CONCURRENCY", 4)?;
        if sweep_concurrency == 0 {
            return Err(anyhow::anyhow!("DMARC_SWEEP_CONCURRENCY must be at least 1"));
        }

        let operation_timeout = parse_or(&get, "DMARC_OPERATION_TIMEOUT_SECS", 30)?;
        let webhook_timeout = parse_or(&get, "DMARC_WEBHOOK_TIMEOUT_SECS", 30)?;

        Ok(Config {
            reports_dir: get("DMARC_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("reports")),
            poll_interval: Duration::from_secs(poll_secs),
            sweep_concurrency,
            operation_timeout: Duration::from_secs(operation_timeout),
            failure_sidecar: parse_or(&get, "DMARC_FAILURE_SIDECAR", false)?,
            max_file_size,
            max_decompressed_size: parse_or(&get, "DMARC_MAX_DECOMPRESSED_SIZE", 100 * 1024 * 1024)?,
            max_files_in_zip: parse_or(&get, "DMARC_MAX_FILES_IN_ZIP", 1000)?,
            max_compression_ratio: parse_or(&get, "DMARC_MAX_COMPRESSION_RATIO", 1000.0)?,
            max_filename_length: parse_or(&get, "DMARC_MAX_FILENAME_LENGTH", 256)?,
            webhook_url: get("DMARC_WEBHOOK_URL"),
            webhook_timeout: Duration::from_secs(webhook_timeout),
            webhook_retries: parse_or(&get, "DMARC_WEBHOOK_RETRIES", 3)?,
            http_addr: parse_or(&get, "DMARC_HTTP_ADDR", SocketAddr::from(([127, 0, 0, 1], 8080)))?,
            database_url: get("DATABASE_URL"),
        })
    }
}

/// Parses `key` if it is set, otherwise returns `default`. A value that is set but
/// does not parse is an error rather than a silent fallback.
fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e: T::Err| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}
