use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding [`EngineConfig::retention`].
pub const RETENTION_ENV: &str = "KANVIEW_RETENTION";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Change records kept per board.
    #[serde(default = "default_retention")]
    pub retention: usize,
    /// How long a caller waits on someone else's rebuild; 0 waits forever.
    #[serde(default = "default_rebuild_wait_ms")]
    pub rebuild_wait_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retention: default_retention(),
            rebuild_wait_ms: default_rebuild_wait_ms(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub const fn rebuild_wait(&self) -> Option<Duration> {
        if self.rebuild_wait_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.rebuild_wait_ms))
        }
    }

    fn with_retention_override(mut self, raw: Option<&str>) -> Result<Self> {
        if let Some(raw) = raw {
            self.retention = raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid {RETENTION_ENV} value '{raw}'"))?;
        }
        Ok(self)
    }
}

/// Load the engine configuration from `path`, falling back to defaults
/// when the file does not exist, then apply `KANVIEW_RETENTION`.
pub fn load_engine_config(path: &Path) -> Result<EngineConfig> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str::<EngineConfig>(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?
    } else {
        EngineConfig::default()
    };

    let retention = env::var(RETENTION_ENV).ok();
    config.with_retention_override(retention.as_deref())
}

const fn default_retention() -> usize {
    100
}

const fn default_rebuild_wait_ms() -> u64 {
    30_000
}
