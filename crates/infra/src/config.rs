//! Configuration loading and representation.
//!
//! All settings come from environment variables; every value is validated at
//! startup so a bad deployment fails before the first firing instead of at it.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `SWEEP_SCHEDULE` | `daily@00:00` | `daily@HH:MM` or `every:<n><s\|m\|h\|d>`, interval at most 366 days |
//! | `SWEEP_UTC_OFFSET` | host local offset | offset for daily schedules, `+HH:MM` |
//! | `SWEEP_RUN_ON_START` | `true` | sweep once right after startup |
//! | `SWEEP_TIMEOUT_SECS` | unset | bound on each store call |
//! | `SWEEP_MAX_NAP_SECS` | `30` | how often a sleeping worker re-reads the clock |
//! | `USE_PERSISTENT_STORES` | `false` | use Postgres instead of the in-memory store |
//! | `DATABASE_URL` | — | required when `USE_PERSISTENT_STORES=true` |

use std::time::Duration;

use chrono::{FixedOffset, Local};
use thiserror::Error;

use crate::jobs::schedule::parse_utc_offset;
use crate::jobs::{Schedule, SweepWorkerConfig};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be set when {because}")]
    Missing { key: &'static str, because: &'static str },

    #[error("invalid {key}=`{value}`: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Where lots are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    InMemory,
    Postgres { database_url: String },
}

/// Settings for the expiration sweep process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweeperConfig {
    pub schedule: Schedule,
    pub run_on_start: bool,
    pub store_timeout: Option<Duration>,
    pub max_nap: Duration,
    pub store: StoreBackend,
}

impl SweeperConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let offset = match lookup("SWEEP_UTC_OFFSET") {
            Some(raw) => parse_utc_offset(&raw).map_err(|e| invalid("SWEEP_UTC_OFFSET", &raw, e))?,
            None => local_offset(),
        };

        let schedule = match lookup("SWEEP_SCHEDULE") {
            Some(raw) => Schedule::parse(&raw, offset).map_err(|e| invalid("SWEEP_SCHEDULE", &raw, e))?,
            None => Schedule::DailyAt {
                at: chrono::NaiveTime::MIN,
                offset,
            },
        };

        let run_on_start = match lookup("SWEEP_RUN_ON_START") {
            Some(raw) => parse_bool("SWEEP_RUN_ON_START", &raw)?,
            None => true,
        };

        let store_timeout = lookup("SWEEP_TIMEOUT_SECS")
            .map(|raw| parse_secs("SWEEP_TIMEOUT_SECS", &raw))
            .transpose()?;

        let max_nap = match lookup("SWEEP_MAX_NAP_SECS") {
            Some(raw) => parse_secs("SWEEP_MAX_NAP_SECS", &raw)?,
            None => Duration::from_secs(30),
        };

        let use_persistent = match lookup("USE_PERSISTENT_STORES") {
            Some(raw) => parse_bool("USE_PERSISTENT_STORES", &raw)?,
            None => false,
        };

        let store = if use_persistent {
            let database_url = lookup("DATABASE_URL").ok_or(ConfigError::Missing {
                key: "DATABASE_URL",
                because: "USE_PERSISTENT_STORES=true",
            })?;
            StoreBackend::Postgres { database_url }
        } else {
            StoreBackend::InMemory
        };

        Ok(Self {
            schedule,
            run_on_start,
            store_timeout,
            max_nap,
            store,
        })
    }

    /// Worker settings derived from this configuration.
    pub fn worker_config(&self) -> SweepWorkerConfig {
        SweepWorkerConfig::default()
            .with_run_on_start(self.run_on_start)
            .with_max_nap(self.max_nap)
    }
}

fn local_offset() -> FixedOffset {
    *Local::now().offset()
}

fn invalid(key: &'static str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, raw, "expected a boolean")),
    }
}

fn parse_secs(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = raw
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| invalid(key, raw, e))?;
    if secs == 0 {
        return Err(invalid(key, raw, "must be greater than zero"));
    }
    Ok(Duration::from_secs(secs))
}
