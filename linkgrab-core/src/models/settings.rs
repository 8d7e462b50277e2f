use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::fs_paths::{AppPaths, DefaultPaths};

const MB: u64 = 1024 * 1024;
const GB: u64 = 1024 * MB;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub schema_version: u32,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub delivery: DeliverySettings,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_max_concurrent_per_requester")]
    pub max_concurrent_per_requester: usize,
    #[serde(default = "default_transfer_timeout_secs")]
    pub transfer_timeout_secs: u64,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    #[serde(default = "default_disk_floor_mb")]
    pub disk_floor_mb: u64,
    #[serde(default = "default_max_remote_size_mb")]
    pub max_remote_size_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,
    #[serde(default = "default_high_water_bytes")]
    pub high_water_bytes: u64,
    #[serde(default = "default_low_water_bytes")]
    pub low_water_bytes: u64,
    #[serde(default = "default_cleanup_interval_hours")]
    pub cleanup_interval_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverySettings {
    #[serde(default = "default_oversize_threshold_mb")]
    pub oversize_threshold_mb: u64,
    #[serde(default = "default_retry_link_ttl_secs")]
    pub retry_link_ttl_secs: u64,
}

fn default_max_concurrent_per_requester() -> usize {
    3
}

fn default_transfer_timeout_secs() -> u64 {
    420
}

fn default_progress_interval_ms() -> u64 {
    2000
}

fn default_disk_floor_mb() -> u64 {
    500
}

fn default_max_remote_size_mb() -> u64 {
    1024
}

fn default_ttl_hours() -> u64 {
    6
}

fn default_high_water_bytes() -> u64 {
    10 * GB
}

fn default_low_water_bytes() -> u64 {
    8 * GB
}

fn default_cleanup_interval_hours() -> u64 {
    24
}

fn default_oversize_threshold_mb() -> u64 {
    48
}

fn default_retry_link_ttl_secs() -> u64 {
    3600
}

fn default_cache_dir() -> PathBuf {
    DefaultPaths.cache_dir().join("files")
}

fn default_database_path() -> PathBuf {
    DefaultPaths.data_dir().join("cache.db")
}

fn default_work_dir() -> PathBuf {
    DefaultPaths.work_dir()
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_concurrent_per_requester: default_max_concurrent_per_requester(),
            transfer_timeout_secs: default_transfer_timeout_secs(),
            progress_interval_ms: default_progress_interval_ms(),
            disk_floor_mb: default_disk_floor_mb(),
            max_remote_size_mb: default_max_remote_size_mb(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            database_path: default_database_path(),
            ttl_hours: default_ttl_hours(),
            high_water_bytes: default_high_water_bytes(),
            low_water_bytes: default_low_water_bytes(),
            cleanup_interval_hours: default_cleanup_interval_hours(),
        }
    }
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            oversize_threshold_mb: default_oversize_threshold_mb(),
            retry_link_ttl_secs: default_retry_link_ttl_secs(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: 1,
            scheduler: SchedulerSettings::default(),
            cache: CacheSettings::default(),
            delivery: DeliverySettings::default(),
            work_dir: default_work_dir(),
        }
    }
}

impl SchedulerSettings {
    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn disk_floor_bytes(&self) -> u64 {
        self.disk_floor_mb * MB
    }

    pub fn max_remote_size_bytes(&self) -> u64 {
        self.max_remote_size_mb * MB
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours * 3600)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_hours * 3600)
    }
}

impl DeliverySettings {
    pub fn oversize_threshold_bytes(&self) -> u64 {
        self.oversize_threshold_mb * MB
    }

    pub fn retry_link_ttl(&self) -> Duration {
        Duration::from_secs(self.retry_link_ttl_secs)
    }
}

fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} must be a valid number", name)),
        _ => Ok(default),
    }
}

fn env_path_or(name: &str, default: PathBuf) -> PathBuf {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or(default)
}

impl Settings {
    /// Loads settings from `LINKGRAB_*` environment variables, reading `.env`
    /// first when present. Unset variables keep their defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let defaults = Settings::default();

        let settings = Self {
            schema_version: defaults.schema_version,
            scheduler: SchedulerSettings {
                max_concurrent_per_requester: env_or(
                    "LINKGRAB_MAX_CONCURRENT",
                    defaults.scheduler.max_concurrent_per_requester,
                )?,
                transfer_timeout_secs: env_or(
                    "LINKGRAB_TRANSFER_TIMEOUT_SECS",
                    defaults.scheduler.transfer_timeout_secs,
                )?,
                progress_interval_ms: env_or(
                    "LINKGRAB_PROGRESS_INTERVAL_MS",
                    defaults.scheduler.progress_interval_ms,
                )?,
                disk_floor_mb: env_or("LINKGRAB_DISK_FLOOR_MB", defaults.scheduler.disk_floor_mb)?,
                max_remote_size_mb: env_or(
                    "LINKGRAB_MAX_REMOTE_SIZE_MB",
                    defaults.scheduler.max_remote_size_mb,
                )?,
            },
            cache: CacheSettings {
                dir: env_path_or("LINKGRAB_CACHE_DIR", defaults.cache.dir),
                database_path: env_path_or("LINKGRAB_CACHE_DB", defaults.cache.database_path),
                ttl_hours: env_or("LINKGRAB_CACHE_TTL_HOURS", defaults.cache.ttl_hours)?,
                high_water_bytes: env_or(
                    "LINKGRAB_CACHE_HIGH_WATER_BYTES",
                    defaults.cache.high_water_bytes,
                )?,
                low_water_bytes: env_or(
                    "LINKGRAB_CACHE_LOW_WATER_BYTES",
                    defaults.cache.low_water_bytes,
                )?,
                cleanup_interval_hours: env_or(
                    "LINKGRAB_CACHE_CLEANUP_HOURS",
                    defaults.cache.cleanup_interval_hours,
                )?,
            },
            delivery: DeliverySettings {
                oversize_threshold_mb: env_or(
                    "LINKGRAB_OVERSIZE_MB",
                    defaults.delivery.oversize_threshold_mb,
                )?,
                retry_link_ttl_secs: env_or(
                    "LINKGRAB_RETRY_LINK_TTL_SECS",
                    defaults.delivery.retry_link_ttl_secs,
                )?,
            },
            work_dir: env_path_or("LINKGRAB_WORK_DIR", defaults.work_dir),
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.scheduler.max_concurrent_per_requester == 0 {
            anyhow::bail!("LINKGRAB_MAX_CONCURRENT must be at least 1");
        }
        if self.scheduler.transfer_timeout_secs == 0 {
            anyhow::bail!("LINKGRAB_TRANSFER_TIMEOUT_SECS must be at least 1");
        }
        if self.cache.cleanup_interval_hours == 0 {
            anyhow::bail!("LINKGRAB_CACHE_CLEANUP_HOURS must be at least 1");
        }
        if self.cache.low_water_bytes > self.cache.high_water_bytes {
            anyhow::bail!(
                "cache low-water mark ({}) exceeds high-water mark ({})",
                self.cache.low_water_bytes,
                self.cache.high_water_bytes
            );
        }
        Ok(())
    }
}
