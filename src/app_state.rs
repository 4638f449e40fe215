// =============================================================================
// Central Application State — SpotSim Engine
// =============================================================================
//
// Ties the engine components together for the HTTP surface. Every component
// manages its own interior mutability; AppState only holds Arc handles.
//
//   source ──► SpotPriceService ──► CandleHistoryCache (synthetic charts)
//                               ├─► SettlementEngine   (fresh prices)
//                               └─► QuoteDesk          (board / quotes)
//   source ──► MarketFeed (real exchange candles)
//
// Positions are never stored here: callers pass them in with each request.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::bias::provider_for;
use crate::market_data::{
    Candle, CandleHistoryCache, LiveCandleUpdater, MarketFeed, SpotPriceService, Timeframe,
};
use crate::okx::{FetchError, OkxClient, PriceSource, RetryPolicy};
use crate::position::TradePosition;
use crate::quote::QuoteDesk;
use crate::runtime_config::EngineConfig;
use crate::settlement::SettlementEngine;

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub bias_mode: String,
    pub series: usize,
    pub settled: usize,
    pub uptime_secs: u64,
    pub server_time: i64,
}

pub struct AppState {
    pub config: EngineConfig,

    // ── Market Data ─────────────────────────────────────────────────────
    pub prices: Arc<SpotPriceService>,
    pub history: Arc<CandleHistoryCache>,
    pub market: Arc<MarketFeed>,

    // ── Trading ─────────────────────────────────────────────────────────
    pub settlement: Arc<SettlementEngine>,
    pub quotes: Arc<QuoteDesk>,

    pub start_time: std::time::Instant,
}

impl AppState {
    /// Wire every component on top of `source`.
    pub fn new(config: EngineConfig, source: Arc<dyn PriceSource>) -> Self {
        let prices = Arc::new(SpotPriceService::new(source.clone(), config.price_cache_ttl()));
        let updater = LiveCandleUpdater::new(provider_for(config.bias_mode));
        let history = Arc::new(CandleHistoryCache::new(prices.clone(), updater, &config));
        let settlement = Arc::new(SettlementEngine::new(prices.clone(), config.payout_ratio));
        let quotes = Arc::new(QuoteDesk::new(
            prices.clone(),
            config.exchange_fee_pct,
            config.quote_assets.clone(),
        ));
        let market = Arc::new(MarketFeed::new(source));

        info!(bias_mode = %config.bias_mode, provider = history.bias_provider(), "engine assembled");

        Self {
            config,
            prices,
            history,
            market,
            settlement,
            quotes,
            start_time: std::time::Instant::now(),
        }
    }

    /// Build the live OKX client from `config` and wire the engine on it.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let retry = RetryPolicy::new(
            config.retry_max_attempts,
            config.retry_base_delay(),
            FetchError::is_transient,
        );
        info!(
            max_attempts = retry.max_attempts(),
            base_delay_ms = config.retry_base_delay_ms,
            timeout_secs = config.request_timeout().as_secs(),
            "exchange retry policy"
        );
        let client = OkxClient::new(config.okx_base_url.clone(), config.request_timeout(), retry)
            .context("building OKX client")?;
        Ok(Self::new(config, Arc::new(client)))
    }

    /// Chart candles for `symbol`; `limit` falls back to the configured
    /// default.
    pub async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: Option<usize>,
        positions: &[TradePosition],
    ) -> Vec<Candle> {
        let limit = limit.unwrap_or(self.config.default_limit);
        self.history
            .get_or_create_series(symbol, timeframe, limit, positions)
            .await
    }

    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            status: "ok",
            bias_mode: self.config.bias_mode.to_string(),
            series: self.history.series_count(),
            settled: self.settlement.ledger_len(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            server_time: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedSource;

    #[tokio::test]
    async fn default_limit_applies_when_absent() {
        let state = AppState::new(
            EngineConfig::default(),
            Arc::new(ScriptedSource::with_price("BTC", 45_000.0)),
        );
        let candles = state.get_candles("BTC", Timeframe::M1, None, &[]).await;
        assert_eq!(candles.len(), 100);

        let health = state.health();
        assert_eq!(health.series, 1);
        assert_eq!(health.settled, 0);
        assert_eq!(health.bias_mode, "FairMarket");
    }

    #[test]
    fn live_client_builds_from_defaults() {
        assert!(AppState::from_config(EngineConfig::default()).is_ok());
    }
}
