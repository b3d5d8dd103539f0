//! Runtime configuration resolved from the environment.
//!
//! Variables (a `.env` file is honoured when the binary loads it):
//! - `TAGLINK_DB`: database file path
//! - `TAGLINK_USER`: acting user id recorded as tagger and in audit entries
//! - `TAGLINK_BUSY_TIMEOUT_MS`: how long merge/copy wait for the write lock

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::models::UserId;

const DEFAULT_USER: i64 = 1;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Resolved configuration for opening the database and acting on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_path: PathBuf,
    pub user: UserId,
    pub busy_timeout: Duration,
}

impl Config {
    /// Reads configuration from the process environment, falling back to defaults.
    ///
    /// The default database lives at `{data_dir}/taglink/tags.db`.
    pub fn from_env() -> Result<Self> {
        let database_path = match std::env::var_os("TAGLINK_DB") {
            Some(path) => PathBuf::from(path),
            None => default_database_path()?,
        };

        let user = match std::env::var("TAGLINK_USER") {
            Ok(raw) => raw
                .trim()
                .parse::<i64>()
                .with_context(|| format!("TAGLINK_USER is not an integer: {raw}"))?,
            Err(_) => DEFAULT_USER,
        };

        let busy_timeout_ms = match std::env::var("TAGLINK_BUSY_TIMEOUT_MS") {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("TAGLINK_BUSY_TIMEOUT_MS is not a number: {raw}"))?,
            Err(_) => DEFAULT_BUSY_TIMEOUT_MS,
        };

        Ok(Self {
            database_path,
            user: UserId::new(user),
            busy_timeout: Duration::from_millis(busy_timeout_ms),
        })
    }
}

/// Gets the cross-platform default database path.
fn default_database_path() -> Result<PathBuf> {
    let data_dir =
        dirs::data_dir().ok_or_else(|| anyhow::anyhow!("Failed to determine data directory"))?;

    Ok(data_dir.join("taglink").join("tags.db"))
}
