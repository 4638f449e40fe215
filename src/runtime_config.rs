// =============================================================================
// Engine Configuration — JSON file with serde defaults and atomic save
// =============================================================================
//
// Every tunable of the simulation and settlement core lives here. All fields
// carry `#[serde(default)]` so that adding a field never breaks loading an
// older config file. Persistence uses a tmp + rename pattern.
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::BiasMode;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_okx_base_url() -> String {
    "https://www.okx.com/api/v5".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_price_cache_ttl_secs() -> u64 {
    300
}

fn default_history_margin() -> usize {
    50
}

fn default_limit() -> usize {
    100
}

fn default_max_limit() -> usize {
    500
}

fn default_payout_ratio() -> f64 {
    0.7
}

fn default_trade_fee_pct() -> f64 {
    2.0
}

fn default_min_stake() -> f64 {
    5.0
}

fn default_exchange_fee_pct() -> f64 {
    2.0
}

fn default_quote_assets() -> Vec<String> {
    ["BTC", "ETH", "TON", "SOL", "BNB", "XRP", "DOGE", "LTC", "TRX"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level configuration for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // --- Live candle -------------------------------------------------------

    /// Which directive provider shapes the in-progress candle.
    #[serde(default)]
    pub bias_mode: BiasMode,

    /// Fixed seed for the random walk. `None` seeds every series from OS
    /// entropy.
    #[serde(default)]
    pub rng_seed: Option<u64>,

    // --- Exchange ------------------------------------------------------------

    #[serde(default = "default_okx_base_url")]
    pub okx_base_url: String,

    /// Per-request HTTP timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Attempts per exchange call, including the first one.
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    /// Delay before the first retry; doubled for every further retry.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Freshness window of cached spot prices (charts and quotes only).
    #[serde(default = "default_price_cache_ttl_secs")]
    pub price_cache_ttl_secs: u64,

    // --- Candle history ----------------------------------------------------

    /// Extra candles retained beyond the requested limit.
    #[serde(default = "default_history_margin")]
    pub history_margin: usize,

    #[serde(default = "default_limit")]
    pub default_limit: usize,

    #[serde(default = "default_max_limit")]
    pub max_limit: usize,

    // --- Trading -------------------------------------------------------------

    /// Profit paid on a winning stake (0.7 = 70 %).
    #[serde(default = "default_payout_ratio")]
    pub payout_ratio: f64,

    /// Entry fee charged on top of the stake, in percent.
    #[serde(default = "default_trade_fee_pct")]
    pub trade_fee_pct: f64,

    #[serde(default = "default_min_stake")]
    pub min_stake: f64,

    /// Fee deducted from the received amount of an asset conversion, in
    /// percent.
    #[serde(default = "default_exchange_fee_pct")]
    pub exchange_fee_pct: f64,

    /// Assets listed on the quote board.
    #[serde(default = "default_quote_assets")]
    pub quote_assets: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bias_mode: BiasMode::FairMarket,
            rng_seed: None,
            okx_base_url: default_okx_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            price_cache_ttl_secs: default_price_cache_ttl_secs(),
            history_margin: default_history_margin(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            payout_ratio: default_payout_ratio(),
            trade_fee_pct: default_trade_fee_pct(),
            min_stake: default_min_stake(),
            exchange_fee_pct: default_exchange_fee_pct(),
            quote_assets: default_quote_assets(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            bias_mode = %config.bias_mode,
            okx = %config.okx_base_url,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the configuration to `path` (write `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise engine config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }

    /// Apply `SPOTSIM_*` environment overrides on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(mode) = std::env::var("SPOTSIM_BIAS_MODE") {
            match mode.parse::<BiasMode>() {
                Ok(m) => self.bias_mode = m,
                Err(e) => warn!(error = %e, "ignoring SPOTSIM_BIAS_MODE"),
            }
        }
        if let Ok(url) = std::env::var("SPOTSIM_OKX_BASE_URL") {
            let url = url.trim().trim_end_matches('/').to_string();
            if !url.is_empty() {
                self.okx_base_url = url;
            }
        }
        if let Ok(seed) = std::env::var("SPOTSIM_RNG_SEED") {
            match seed.trim().parse::<u64>() {
                Ok(s) => self.rng_seed = Some(s),
                Err(e) => warn!(error = %e, "ignoring SPOTSIM_RNG_SEED"),
            }
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn price_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.price_cache_ttl_secs)
    }
}
