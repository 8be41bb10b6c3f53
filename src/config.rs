// =============================================================================
// Config — typed, validated scanner configuration
// =============================================================================
//
// Loaded in three layers, outermost wins: built-in defaults -> YAML file ->
// environment variable overrides (`FUNDING_SCANNER_*`). Every field carries
// `#[serde(default = "...")]` so that adding a field never breaks loading an
// older YAML file, matching the atomic-save/serde-default discipline of the
// teacher's `RuntimeConfig`.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::types::Category;

// -----------------------------------------------------------------------------
// Defaults
// -----------------------------------------------------------------------------

fn default_category() -> ConfigCategory {
    ConfigCategory::Both
}
fn default_limit() -> u32 {
    100
}
fn default_volatility_ttl_sec() -> u64 {
    120
}
fn default_display_interval_seconds() -> u64 {
    5
}
fn default_funding_time_min_minutes() -> u32 {
    0
}
fn default_funding_time_max_minutes() -> u32 {
    1440
}
fn default_weights() -> Weights {
    Weights::default()
}
fn default_rate_limit_n() -> u32 {
    5
}
fn default_rate_limit_window_secs() -> u64 {
    1
}
fn default_retry_max_attempts() -> u32 {
    4
}
fn default_retry_base_secs() -> f64 {
    0.5
}
fn default_breaker_failure_threshold() -> u32 {
    5
}
fn default_breaker_open_secs() -> u64 {
    60
}
fn default_rescan_secs() -> u64 {
    60
}
fn default_imminent_scan_secs() -> u64 {
    5
}
fn default_funding_threshold_minutes() -> u32 {
    10
}
fn default_live_ttl_secs() -> u64 {
    120
}
fn default_ws_idle_secs() -> u64 {
    30
}
fn default_ws_subscribe_chunk() -> usize {
    200
}
fn default_volatility_parallelism() -> usize {
    8
}
fn default_http_timeout_secs() -> u64 {
    10
}
fn default_shutdown_timeout_secs() -> u64 {
    10
}
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

/// Category filter as expressed in config (distinct from the internal
/// two-variant [`Category`] because it additionally allows "both").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigCategory {
    Linear,
    Inverse,
    Both,
}

impl ConfigCategory {
    pub fn categories(&self) -> Vec<Category> {
        match self {
            ConfigCategory::Linear => vec![Category::Linear],
            ConfigCategory::Inverse => vec![Category::Inverse],
            ConfigCategory::Both => vec![Category::Linear, Category::Inverse],
        }
    }
}

/// Scoring weights for the final ranking stage (spec §4.2 stage 7).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Weights {
    #[serde(default = "Weights::default_funding")]
    pub funding: f64,
    #[serde(default = "Weights::default_volume")]
    pub volume: f64,
    #[serde(default = "Weights::default_spread")]
    pub spread: f64,
    #[serde(default = "Weights::default_volatility")]
    pub volatility: f64,
    #[serde(default = "Weights::default_top_symbols")]
    pub top_symbols: u32,
}

impl Weights {
    fn default_funding() -> f64 {
        10.0
    }
    fn default_volume() -> f64 {
        0.5
    }
    fn default_spread() -> f64 {
        5.0
    }
    fn default_volatility() -> f64 {
        2.0
    }
    fn default_top_symbols() -> u32 {
        20
    }
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            funding: Self::default_funding(),
            volume: Self::default_volume(),
            spread: Self::default_spread(),
            volatility: Self::default_volatility(),
            top_symbols: Self::default_top_symbols(),
        }
    }
}

/// Top-level scanner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub funding_min: Option<f64>,
    #[serde(default)]
    pub funding_max: Option<f64>,

    #[serde(default)]
    pub volume_min_millions: Option<f64>,

    #[serde(default)]
    pub spread_max: Option<f64>,

    #[serde(default)]
    pub volatility_min: Option<f64>,
    #[serde(default)]
    pub volatility_max: Option<f64>,

    #[serde(default = "default_funding_time_min_minutes")]
    pub funding_time_min_minutes: u32,
    #[serde(default = "default_funding_time_max_minutes")]
    pub funding_time_max_minutes: u32,

    #[serde(default = "default_category")]
    pub category: ConfigCategory,

    #[serde(default = "default_limit")]
    pub limit: u32,

    #[serde(default = "default_volatility_ttl_sec")]
    pub volatility_ttl_sec: u64,

    #[serde(default = "default_display_interval_seconds")]
    pub display_interval_seconds: u64,

    #[serde(default = "default_weights")]
    pub weights: Weights,

    #[serde(default = "default_rate_limit_n")]
    pub rate_limit_n: u32,
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,

    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_base_secs")]
    pub retry_base_secs: f64,

    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,
    #[serde(default = "default_breaker_open_secs")]
    pub breaker_open_secs: u64,

    #[serde(default = "default_rescan_secs")]
    pub rescan_secs: u64,
    #[serde(default = "default_imminent_scan_secs")]
    pub imminent_scan_secs: u64,
    #[serde(default = "default_funding_threshold_minutes")]
    pub funding_threshold_minutes: u32,

    #[serde(default = "default_live_ttl_secs")]
    pub live_ttl_secs: u64,

    #[serde(default = "default_ws_idle_secs")]
    pub ws_idle_secs: u64,
    #[serde(default = "default_ws_subscribe_chunk")]
    pub ws_subscribe_chunk: usize,

    #[serde(default = "default_volatility_parallelism")]
    pub volatility_parallelism: usize,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            funding_min: None,
            funding_max: None,
            volume_min_millions: None,
            spread_max: None,
            volatility_min: None,
            volatility_max: None,
            funding_time_min_minutes: default_funding_time_min_minutes(),
            funding_time_max_minutes: default_funding_time_max_minutes(),
            category: default_category(),
            limit: default_limit(),
            volatility_ttl_sec: default_volatility_ttl_sec(),
            display_interval_seconds: default_display_interval_seconds(),
            weights: default_weights(),
            rate_limit_n: default_rate_limit_n(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_secs: default_retry_base_secs(),
            breaker_failure_threshold: default_breaker_failure_threshold(),
            breaker_open_secs: default_breaker_open_secs(),
            rescan_secs: default_rescan_secs(),
            imminent_scan_secs: default_imminent_scan_secs(),
            funding_threshold_minutes: default_funding_threshold_minutes(),
            live_ttl_secs: default_live_ttl_secs(),
            ws_idle_secs: default_ws_idle_secs(),
            ws_subscribe_chunk: default_ws_subscribe_chunk(),
            volatility_parallelism: default_volatility_parallelism(),
            http_timeout_secs: default_http_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            bind_addr: default_bind_addr(),
        }
    }
}

/// Fatal configuration problems, surfaced at startup per spec §7
/// ("Config — fatal at startup").
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Config {
    /// Load defaults, overlay a YAML file if present, then overlay
    /// `FUNDING_SCANNER_*` environment variables, and validate the result.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let path = path.as_ref();
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
            config = serde_yaml::from_str(&content)?;
            info!(path = %path.display(), "config loaded from YAML");
        } else {
            warn!(path = %path.display(), "config file not found — using built-in defaults");
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Overlay `FUNDING_SCANNER_*` environment variables. Unknown
    /// `FUNDING_SCANNER_*` variables are warned but not fatal; variables
    /// outside that prefix are ignored entirely.
    fn apply_env_overrides(&mut self) {
        const PREFIX: &str = "FUNDING_SCANNER_";

        for (key, value) in std::env::vars() {
            let Some(field) = key.strip_prefix(PREFIX) else {
                continue;
            };

            match field {
                "FUNDING_MIN" => self.funding_min = value.parse().ok(),
                "FUNDING_MAX" => self.funding_max = value.parse().ok(),
                "VOLUME_MIN_MILLIONS" => self.volume_min_millions = value.parse().ok(),
                "SPREAD_MAX" => self.spread_max = value.parse().ok(),
                "VOLATILITY_MIN" => self.volatility_min = value.parse().ok(),
                "VOLATILITY_MAX" => self.volatility_max = value.parse().ok(),
                "FUNDING_TIME_MIN_MINUTES" => {
                    if let Ok(v) = value.parse() {
                        self.funding_time_min_minutes = v;
                    }
                }
                "FUNDING_TIME_MAX_MINUTES" => {
                    if let Ok(v) = value.parse() {
                        self.funding_time_max_minutes = v;
                    }
                }
                "CATEGORY" => {
                    if let Ok(v) = value.to_lowercase().parse::<CategoryWire>() {
                        self.category = v.0;
                    }
                }
                "LIMIT" => {
                    if let Ok(v) = value.parse() {
                        self.limit = v;
                    }
                }
                "VOLATILITY_TTL_SEC" => {
                    if let Ok(v) = value.parse() {
                        self.volatility_ttl_sec = v;
                    }
                }
                "DISPLAY_INTERVAL_SECONDS" => {
                    if let Ok(v) = value.parse() {
                        self.display_interval_seconds = v;
                    }
                }
                "BIND_ADDR" => self.bind_addr = value,
                _ => warn!(key = %key, "unknown FUNDING_SCANNER_ environment variable"),
            }
        }
    }

    /// Validate all enumerated ranges/enums per spec §3. Fatal on failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let (Some(min), Some(max)) = (self.funding_min, self.funding_max) {
            if min > max {
                return Err(ConfigError::Invalid(format!(
                    "funding_min ({min}) > funding_max ({max})"
                )));
            }
        }
        if let Some(v) = self.volume_min_millions {
            if v < 0.0 {
                return Err(ConfigError::Invalid("volume_min_millions must be >= 0".into()));
            }
        }
        if let Some(v) = self.spread_max {
            if !(0.0..=1.0).contains(&v) {
                return Err(ConfigError::Invalid("spread_max must be in [0,1]".into()));
            }
        }
        for (name, v) in [
            ("volatility_min", self.volatility_min),
            ("volatility_max", self.volatility_max),
        ] {
            if let Some(v) = v {
                if !(0.0..=1.0).contains(&v) {
                    return Err(ConfigError::Invalid(format!("{name} must be in [0,1]")));
                }
            }
        }
        if self.funding_time_min_minutes > 1440 || self.funding_time_max_minutes > 1440 {
            return Err(ConfigError::Invalid(
                "funding_time_*_minutes must be in [0,1440]".into(),
            ));
        }
        if self.funding_time_min_minutes > self.funding_time_max_minutes {
            return Err(ConfigError::Invalid(
                "funding_time_min_minutes > funding_time_max_minutes".into(),
            ));
        }
        if !(1..=1000).contains(&self.limit) {
            return Err(ConfigError::Invalid("limit must be in [1,1000]".into()));
        }
        if !(10..=3600).contains(&self.volatility_ttl_sec) {
            return Err(ConfigError::Invalid(
                "volatility_ttl_sec must be in [10,3600]".into(),
            ));
        }
        if !(1..=300).contains(&self.display_interval_seconds) {
            return Err(ConfigError::Invalid(
                "display_interval_seconds must be in [1,300]".into(),
            ));
        }
        Ok(())
    }
}

/// Tiny wrapper so `ConfigCategory` can be parsed from an env var string via
/// `FromStr` without colliding with serde's own (de)serialization impls.
struct CategoryWire(ConfigCategory);

impl std::str::FromStr for CategoryWire {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(CategoryWire(ConfigCategory::Linear)),
            "inverse" => Ok(CategoryWire(ConfigCategory::Inverse)),
            "both" => Ok(CategoryWire(ConfigCategory::Both)),
            _ => Err(()),
        }
    }
}

/// Convenience used by `main.rs`: load with context-wrapped error for the
/// orchestration boundary.
pub fn load_or_fail(path: impl AsRef<Path>) -> Result<Config> {
    Config::load(&path).with_context(|| {
        format!(
            "failed to load scanner configuration from {}",
            path.as_ref().display()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn deserialize_empty_yaml_uses_defaults() {
        let cfg: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg.limit, 100);
        assert_eq!(cfg.volatility_ttl_sec, 120);
        assert!(matches!(cfg.category, ConfigCategory::Both));
    }

    #[test]
    fn rejects_funding_min_greater_than_max() {
        let mut cfg = Config::default();
        cfg.funding_min = Some(0.01);
        cfg.funding_max = Some(0.001);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_spread_max() {
        let mut cfg = Config::default();
        cfg.spread_max = Some(1.5);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_volatility_ttl() {
        let mut cfg = Config::default();
        cfg.volatility_ttl_sec = 5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn both_category_expands_to_both_variants() {
        let cfg = Config::default();
        let cats = cfg.category.categories();
        assert_eq!(cats.len(), 2);
        assert!(cats.contains(&Category::Linear));
        assert!(cats.contains(&Category::Inverse));
    }
}
