//! Session configuration.
//!
//! Stored at `~/.config/tripsplit/config.json`. The API URL and bearer token
//! can be overridden from the environment (`TRIPSPLIT_API_URL`,
//! `TRIPSPLIT_TOKEN`); the token is never written to disk.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::cache::EntityKind;

/// Application name used for config directory paths
const APP_NAME: &str = "tripsplit";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const ENV_API_URL: &str = "TRIPSPLIT_API_URL";
pub const ENV_TOKEN: &str = "TRIPSPLIT_TOKEN";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const MIN_REQUEST_TIMEOUT_SECS: u64 = 1;
const DEFAULT_GC_TIME_SECS: u64 = 300;

/// Freshness windows per entity type, in seconds.
///
/// Derived data (balances, totals, settlements) changes with every expense
/// and gets short windows; membership and invites change rarely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTimings {
    pub trips_secs: u64,
    pub trip_detail_secs: u64,
    pub expenses_secs: u64,
    pub balances_secs: u64,
    pub totals_secs: u64,
    pub settlements_secs: u64,
    pub members_secs: u64,
    pub invites_secs: u64,
    pub profile_secs: u64,
}

impl Default for CacheTimings {
    fn default() -> Self {
        Self {
            trips_secs: 60,
            trip_detail_secs: 60,
            expenses_secs: 30,
            balances_secs: 10,
            totals_secs: 10,
            settlements_secs: 10,
            members_secs: 60,
            invites_secs: 300,
            profile_secs: 300,
        }
    }
}

impl CacheTimings {
    pub fn window(&self, kind: EntityKind) -> Duration {
        let secs = match kind {
            EntityKind::TripList => self.trips_secs,
            EntityKind::TripDetail => self.trip_detail_secs,
            EntityKind::ExpenseList | EntityKind::ExpenseInfinite | EntityKind::ExpenseDetail => self.expenses_secs,
            EntityKind::Members => self.members_secs,
            EntityKind::Balances | EntityKind::MemberBalance => self.balances_secs,
            EntityKind::Totals => self.totals_secs,
            EntityKind::Settlements => self.settlements_secs,
            EntityKind::Invites => self.invites_secs,
            EntityKind::Profile => self.profile_secs,
        };
        Duration::from_secs(secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    /// Idle time after which an unused cache entry is dropped.
    pub gc_time_secs: u64,
    /// Directory for daily rolling log files. Logs go to stderr only when unset.
    pub log_dir: Option<PathBuf>,
    pub cache: CacheTimings,
    #[serde(skip)]
    pub token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            gc_time_secs: DEFAULT_GC_TIME_SECS,
            log_dir: None,
            cache: CacheTimings::default(),
            token: None,
        }
    }
}

impl Config {
    /// Load from the config file (defaults when absent), then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        if config.request_timeout_secs < MIN_REQUEST_TIMEOUT_SECS {
            bail!(
                "request_timeout_secs must be at least {} in {}",
                MIN_REQUEST_TIMEOUT_SECS,
                path.display()
            );
        }
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = var(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }
        if let Some(token) = var(ENV_TOKEN).filter(|v| !v.trim().is_empty()) {
            self.token = Some(token.trim().to_string());
        }
    }

    /// Bound on every remote call. Never zero, which would fail each call
    /// before it is sent.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(MIN_REQUEST_TIMEOUT_SECS))
    }

    pub fn gc_time(&self) -> Duration {
        Duration::from_secs(self.gc_time_secs)
    }
}
