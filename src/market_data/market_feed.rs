// =============================================================================
// Market Feed — real exchange candles for the chart
// =============================================================================
//
// Timeframes with a native OKX bar are fetched directly. 2m and 10m are built
// from 1m candles through the aggregator. On any failure the feed degrades to
// one flat candle at the spot price, or at FALLBACK_PRICE when even the spot
// price is unavailable.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use super::aggregator::aggregate;
use super::{Candle, Timeframe};
use crate::okx::{normalize_inst_id, FetchError, PriceSource};

const FALLBACK_PRICE: f64 = 50_000.0;
/// Largest page the OKX candle endpoint returns.
const MAX_PAGE: u32 = 300;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub price: f64,
    pub change_pct: f64,
    pub candles: Vec<Candle>,
}

pub struct MarketFeed {
    source: Arc<dyn PriceSource>,
}

impl MarketFeed {
    pub fn new(source: Arc<dyn PriceSource>) -> Self {
        Self { source }
    }

    async fn fetch(&self, inst_id: &str, timeframe: Timeframe) -> Result<Vec<Candle>, FetchError> {
        let count = timeframe.chart_count();
        match timeframe.okx_bar() {
            Some(bar) => self.source.klines(inst_id, bar, count).await,
            None => {
                let minutes = u32::try_from(timeframe.minutes()).unwrap_or(u32::MAX);
                let need = minutes.saturating_mul(count).min(MAX_PAGE);
                let base = self.source.klines(inst_id, "1m", need).await?;
                let mut bars = aggregate(&base, timeframe.minutes());
                let skip = bars.len().saturating_sub(count as usize);
                bars.drain(..skip);
                Ok(bars)
            }
        }
    }

    pub async fn snapshot(&self, symbol: &str, timeframe: Timeframe) -> MarketSnapshot {
        let inst_id = normalize_inst_id(symbol);

        match self.fetch(&inst_id, timeframe).await {
            Ok(candles) if !candles.is_empty() => {
                let first_open = candles[0].open;
                let last_close = candles[candles.len() - 1].close;
                let change_pct = if first_open > 0.0 {
                    ((last_close - first_open) / first_open * 100.0 * 100.0).round() / 100.0
                } else {
                    0.0
                };
                debug!(inst_id = %inst_id, timeframe = %timeframe, candles = candles.len(), "market snapshot");
                MarketSnapshot {
                    symbol: inst_id,
                    timeframe,
                    price: last_close,
                    change_pct,
                    candles,
                }
            }
            Ok(_) => self.fallback(inst_id, timeframe, "no candles returned").await,
            Err(e) => self.fallback(inst_id, timeframe, &e.to_string()).await,
        }
    }

    async fn fallback(&self, inst_id: String, timeframe: Timeframe, reason: &str) -> MarketSnapshot {
        let price = self.source.spot_price(&inst_id).await.unwrap_or(FALLBACK_PRICE);
        warn!(inst_id = %inst_id, timeframe = %timeframe, reason, price, "market candles unavailable, serving flat candle");
        MarketSnapshot {
            symbol: inst_id,
            timeframe,
            price,
            change_pct: 0.0,
            candles: vec![Candle::flat(Utc::now().timestamp_millis(), price)],
        }
    }
}
