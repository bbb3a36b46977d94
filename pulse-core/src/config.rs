// TOML configuration for the pulse pipeline

use crate::buckets::{parse_period, DEFAULT_PERIOD};
use crate::dedup::DedupStrategy;
use crate::error::{PipelineError, Result};
use crate::store::MAX_WORKING_SET;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

/// Pipeline configuration stored in ~/.pulse/config.toml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PulseConfig {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub refresh: RefreshSection,
    #[serde(default)]
    pub log_errors: LogErrorsSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    #[serde(default = "default_dedup_window")]
    pub dedup_window_minutes: u32,
    #[serde(default)]
    pub dedup_strategy: DedupStrategy,
    #[serde(default = "default_period")]
    pub default_period: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshSection {
    #[serde(default = "default_auto_refresh")]
    pub auto_refresh: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogErrorsSection {
    #[serde(default = "default_max_errors")]
    pub max_errors: usize,
    #[serde(default = "default_log_fetch_limit")]
    pub fetch_limit: usize,
    #[serde(default)]
    pub critical_only: bool,
}

fn default_max_events() -> usize {
    MAX_WORKING_SET
}

fn default_dedup_window() -> u32 {
    5
}

fn default_period() -> String {
    DEFAULT_PERIOD.to_string()
}

fn default_auto_refresh() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    30
}

fn default_fetch_limit() -> usize {
    500
}

fn default_max_errors() -> usize {
    500
}

fn default_log_fetch_limit() -> usize {
    200
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
            dedup_window_minutes: default_dedup_window(),
            dedup_strategy: DedupStrategy::default(),
            default_period: default_period(),
        }
    }
}

impl Default for RefreshSection {
    fn default() -> Self {
        Self {
            auto_refresh: default_auto_refresh(),
            interval_secs: default_interval_secs(),
            fetch_limit: default_fetch_limit(),
        }
    }
}

impl Default for LogErrorsSection {
    fn default() -> Self {
        Self {
            max_errors: default_max_errors(),
            fetch_limit: default_log_fetch_limit(),
            critical_only: false,
        }
    }
}

impl PipelineSection {
    pub fn period(&self) -> Result<Duration> {
        parse_period(&self.default_period)
    }
}

impl RefreshSection {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }
}

impl PulseConfig {
    /// `~/.pulse/config.toml`, when a home directory can be found
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".pulse").join("config.toml"))
    }

    /// Serialize to TOML string
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| PipelineError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Deserialize from TOML string
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)
            .map_err(|e| PipelineError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&content)
    }

    /// Save configuration to file, creating its parent directory
    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let toml_string = self.to_toml_string()?;
        tokio::fs::write(path, toml_string).await?;
        Ok(())
    }

    /// Resolve the effective configuration: the explicit path if given,
    /// otherwise the default path when it exists, otherwise defaults.
    /// Environment overrides are applied last.
    pub async fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path).await?,
            None => match Self::default_path() {
                Some(path) if path.exists() => {
                    tracing::debug!("Loading config from {}", path.display());
                    Self::load(&path).await?
                }
                _ => Self::default(),
            },
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `PULSE_*` overrides using `lookup` to read variables.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(max) = lookup("PULSE_MAX_EVENTS") {
            self.pipeline.max_events = parse_var("PULSE_MAX_EVENTS", &max)?;
        }

        if let Some(window) = lookup("PULSE_DEDUP_WINDOW") {
            self.pipeline.dedup_window_minutes = parse_var("PULSE_DEDUP_WINDOW", &window)?;
        }

        if let Some(strategy) = lookup("PULSE_DEDUP_STRATEGY") {
            self.pipeline.dedup_strategy = strategy.parse()?;
        }

        if let Some(period) = lookup("PULSE_DEFAULT_PERIOD") {
            self.pipeline.default_period = period;
        }

        if let Some(interval) = lookup("PULSE_REFRESH_INTERVAL") {
            self.refresh.interval_secs = parse_var("PULSE_REFRESH_INTERVAL", &interval)?;
        }

        if let Some(auto) = lookup("PULSE_AUTO_REFRESH") {
            self.refresh.auto_refresh = parse_var("PULSE_AUTO_REFRESH", &auto)?;
        }

        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.max_events == 0 || self.pipeline.max_events > MAX_WORKING_SET {
            return Err(PipelineError::Config(format!(
                "max_events must be between 1 and {}",
                MAX_WORKING_SET
            )));
        }
        if self.pipeline.dedup_window_minutes == 0 {
            return Err(PipelineError::InvalidWindow(0));
        }
        if self.refresh.interval_secs == 0 {
            return Err(PipelineError::Config("interval_secs must be at least 1".to_string()));
        }
        if self.log_errors.max_errors == 0 {
            return Err(PipelineError::Config("max_errors must be at least 1".to_string()));
        }
        self.pipeline.period()?;
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| PipelineError::Config(format!("Invalid value for {}: {}", key, value)))
}
