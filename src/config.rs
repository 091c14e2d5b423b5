use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::feed::{FeedQuery, FEED_LIMIT, RETENTION_HORIZON};

/// Tunables for a chat session, stored as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How far back the live feed reaches
    pub retention_secs: u64,
    /// Cap on the initial feed window
    pub feed_limit: usize,
    /// Capacity of the session command queue
    pub command_buffer: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            retention_secs: RETENTION_HORIZON.as_secs(),
            feed_limit: FEED_LIMIT,
            command_buffer: 100,
            database_path: None,
        }
    }
}

impl SyncConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// Feed window ending at `now_ms`
    pub fn feed_query(&self, now_ms: i64) -> FeedQuery {
        FeedQuery::recent(now_ms, self.retention()).with_limit(self.feed_limit)
    }

    /// Load from the default location, falling back to defaults when no
    /// file exists yet
    pub fn load() -> SyncResult<Self> {
        let path = get_config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> SyncResult<Self> {
        let mut file = File::open(path)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))?;

        let config: SyncConfig = serde_json::from_str(&contents)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;

        info!("Loaded sync config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.feed_limit == 0 || self.command_buffer == 0 {
            return Err(SyncError::Config(
                "feed_limit and command_buffer must be positive".to_string(),
            ));
        }
        // The window start is computed in signed milliseconds
        let fits = self
            .retention_secs
            .checked_mul(1000)
            .map_or(false, |ms| i64::try_from(ms).is_ok());
        if !fits {
            return Err(SyncError::Config(format!(
                "retention_secs {} is too large",
                self.retention_secs
            )));
        }
        Ok(())
    }

    pub fn save_to(&self, path: &Path) -> SyncResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| SyncError::Config(e.to_string()))?;
            }
        }
        let file = File::create(path).map_err(|e| SyncError::Config(e.to_string()))?;
        serde_json::to_writer_pretty(file, self).map_err(|e| SyncError::Config(e.to_string()))?;

        info!("Sync config saved to {}", path.display());
        Ok(())
    }
}

pub fn get_config_dir() -> SyncResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| SyncError::Config("Could not determine config directory".to_string()))?
        .join("chatsync");
    Ok(config_dir)
}

static CONFIG_PATH_OVERRIDE: OnceCell<PathBuf> = OnceCell::new();

/// Read the config from `path` instead of the default location.
/// Only the first call has an effect.
pub fn set_config_path_override(path: PathBuf) {
    let _ = CONFIG_PATH_OVERRIDE.set(path);
}

fn get_config_path() -> SyncResult<PathBuf> {
    if let Some(path) = CONFIG_PATH_OVERRIDE.get() {
        return Ok(path.clone());
    }
    Ok(get_config_dir()?.join("config.json"))
}
