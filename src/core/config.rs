use crate::core::rates::{CurrencyMeta, FixedRate};
use anyhow::{Context, Result};
use directories::ProjectDirs;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    /// Maximum days per upstream range request.
    #[serde(default = "default_chunk_days")]
    pub chunk_days: u32,
    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        UpstreamConfig {
            base_url: "https://feed.fxdash.org".to_string(),
            chunk_days: default_chunk_days(),
            timeout_secs: default_upstream_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RateStoreConfig {
    /// Hard cap on the durable store round trip before falling back to the
    /// upstream source.
    #[serde(default = "default_lookup_timeout_secs")]
    pub lookup_timeout_secs: u64,
    /// Spans at or below this many days try the store first; longer spans
    /// go straight to upstream.
    #[serde(default = "default_short_span_days")]
    pub short_span_days: i64,
}

impl Default for RateStoreConfig {
    fn default() -> Self {
        RateStoreConfig {
            lookup_timeout_secs: default_lookup_timeout_secs(),
            short_span_days: default_short_span_days(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LimiterConfig {
    #[serde(default = "default_short_cap_per_hour")]
    pub short_cap_per_hour: usize,
    /// Spans at or above this many days count as long-range requests.
    #[serde(default = "default_long_range_days")]
    pub long_range_days: i64,
    #[serde(default = "default_long_cooldown_secs")]
    pub long_cooldown_secs: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        LimiterConfig {
            short_cap_per_hour: default_short_cap_per_hour(),
            long_range_days: default_long_range_days(),
            long_cooldown_secs: default_long_cooldown_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GateConfig {
    #[serde(default = "default_rule_ttl_secs")]
    pub rule_ttl_secs: u64,
    #[serde(default = "default_quota_window_secs")]
    pub quota_window_secs: u64,
    /// Ledger rows older than this are deleted by `prune`.
    #[serde(default = "default_prune_after_secs")]
    pub prune_after_secs: u64,
    /// Parameterized route patterns used to canonicalize endpoint keys.
    #[serde(default = "default_routes")]
    pub routes: Vec<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        GateConfig {
            rule_ttl_secs: default_rule_ttl_secs(),
            quota_window_secs: default_quota_window_secs(),
            prune_after_secs: default_prune_after_secs(),
            routes: default_routes(),
        }
    }
}

fn default_chunk_days() -> u32 {
    90
}

fn default_upstream_timeout_secs() -> u64 {
    30
}

fn default_lookup_timeout_secs() -> u64 {
    5
}

fn default_short_span_days() -> i64 {
    7
}

fn default_short_cap_per_hour() -> usize {
    60
}

fn default_long_range_days() -> i64 {
    365 * 3
}

fn default_long_cooldown_secs() -> u64 {
    69
}

fn default_rule_ttl_secs() -> u64 {
    300
}

fn default_quota_window_secs() -> u64 {
    3600
}

fn default_prune_after_secs() -> u64 {
    7200
}

fn default_routes() -> Vec<String> {
    vec![
        "/api/rates/:currency".to_string(),
        "/api/rates/:currency/history".to_string(),
        "/api/posts/:slug".to_string(),
    ]
}

fn default_currencies() -> Vec<CurrencyMeta> {
    vec![
        CurrencyMeta {
            code: "USD".to_string(),
            display_name: "US Dollar".to_string(),
            unit: 1,
            // The local currency is pegged to the dollar by policy, so the
            // USD series is generated analytically instead of fetched.
            fixed_peg: Some(FixedRate {
                buy: Decimal::new(36710, 4),
                sell: Decimal::new(36740, 4),
            }),
        },
        CurrencyMeta {
            code: "EUR".to_string(),
            display_name: "Euro".to_string(),
            unit: 1,
            fixed_peg: None,
        },
        CurrencyMeta {
            code: "GBP".to_string(),
            display_name: "Pound Sterling".to_string(),
            unit: 1,
            fixed_peg: None,
        },
        CurrencyMeta {
            code: "JPY".to_string(),
            display_name: "Japanese Yen".to_string(),
            unit: 100,
            fixed_peg: None,
        },
    ]
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub store: RateStoreConfig,
    #[serde(default)]
    pub limiter: LimiterConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default = "default_currencies")]
    pub currencies: Vec<CurrencyMeta>,
    pub data_path: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            upstream: UpstreamConfig::default(),
            store: RateStoreConfig::default(),
            limiter: LimiterConfig::default(),
            gate: GateConfig::default(),
            currencies: default_currencies(),
            data_path: None,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("org", "fxdash", "fxdash")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("org", "fxdash", "fxdash")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    pub fn currency(&self, code: &str) -> Option<&CurrencyMeta> {
        self.currencies
            .iter()
            .find(|c| c.code.eq_ignore_ascii_case(code))
    }
}
