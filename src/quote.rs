// =============================================================================
// Quote Desk — price board and asset-to-asset conversion quotes
// =============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::market_data::random_walk::base_asset;
use crate::market_data::SpotPriceService;
use crate::okx::FetchError;

const QUOTE_ASSET: &str = "USDT";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QuoteError {
    #[error("cannot exchange {0} for itself")]
    SameAsset(String),

    #[error("amount must be positive, got {0}")]
    InvalidAmount(f64),

    #[error("price for {asset} unavailable: {source}")]
    PriceUnavailable {
        asset: String,
        #[source]
        source: FetchError,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub from: String,
    pub to: String,
    pub amount: f64,
    pub amount_to: f64,
    pub usdt_value: f64,
    pub rate_from: f64,
    pub rate_to: f64,
    pub fee_pct: f64,
}

pub struct QuoteDesk {
    prices: Arc<SpotPriceService>,
    fee_pct: f64,
    assets: Vec<String>,
}

impl QuoteDesk {
    pub fn new(prices: Arc<SpotPriceService>, fee_pct: f64, assets: Vec<String>) -> Self {
        Self {
            prices,
            fee_pct,
            assets: assets.iter().map(|a| base_asset(a)).collect(),
        }
    }

    async fn usdt_price(&self, asset: &str) -> Result<f64, QuoteError> {
        if asset == QUOTE_ASSET {
            return Ok(1.0);
        }
        self.prices
            .cached_or_fetch(asset)
            .await
            .map_err(|source| QuoteError::PriceUnavailable {
                asset: asset.to_string(),
                source,
            })
    }

    /// Convert `amount` of `from` into `to`, fee taken from the received side.
    pub async fn quote(&self, from: &str, to: &str, amount: f64) -> Result<Quote, QuoteError> {
        let from = base_asset(from);
        let to = base_asset(to);
        if from == to {
            return Err(QuoteError::SameAsset(from));
        }
        if !(amount.is_finite() && amount > 0.0) {
            return Err(QuoteError::InvalidAmount(amount));
        }

        let rate_from = self.usdt_price(&from).await?;
        let rate_to = self.usdt_price(&to).await?;
        let usdt_value = amount * rate_from;
        let amount_to = usdt_value / rate_to * (1.0 - self.fee_pct / 100.0);

        debug!(from = %from, to = %to, amount, amount_to, "quote");
        Ok(Quote {
            from,
            to,
            amount,
            amount_to,
            usdt_value,
            rate_from,
            rate_to,
            fee_pct: self.fee_pct,
        })
    }

    /// Current USDT price of every configured asset. Failed fetches read 0.
    pub async fn board(&self) -> BTreeMap<String, f64> {
        let fetches = self.assets.iter().map(|asset| async move {
            let price = match self.usdt_price(asset).await {
                Ok(price) => price,
                Err(e) => {
                    warn!(asset = %asset, error = %e, "price board entry unavailable");
                    0.0
                }
            };
            (asset.clone(), price)
        });

        let mut board: BTreeMap<String, f64> = join_all(fetches).await.into_iter().collect();
        board.insert(QUOTE_ASSET.to_string(), 1.0);
        board
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedSource;
    use std::time::Duration;

    fn desk(source: ScriptedSource) -> QuoteDesk {
        let prices = Arc::new(SpotPriceService::new(Arc::new(source), Duration::from_secs(300)));
        QuoteDesk::new(prices, 2.0, vec!["BTC".into(), "ETH".into(), "TON".into()])
    }

    #[tokio::test]
    async fn converts_with_fee_on_received_side() {
        let source = ScriptedSource::with_price("BTC", 50_000.0);
        source.set_price("ETH", 2_500.0);
        let q = desk(source).quote("btc", "ETH-USDT", 0.1).await.unwrap();

        assert_eq!(q.from, "BTC");
        assert_eq!(q.to, "ETH");
        assert!((q.usdt_value - 5_000.0).abs() < 1e-9);
        assert!((q.amount_to - 1.96).abs() < 1e-9);
    }

    #[tokio::test]
    async fn usdt_is_always_one() {
        let source = ScriptedSource::with_price("BTC", 40_000.0);
        let q = desk(source).quote("USDT", "BTC", 400.0).await.unwrap();
        assert_eq!(q.rate_from, 1.0);
        assert!((q.amount_to - 0.0098).abs() < 1e-12);
    }

    #[tokio::test]
    async fn rejects_bad_requests() {
        let d = desk(ScriptedSource::with_price("BTC", 40_000.0));
        assert_eq!(d.quote("BTC", "btcusdt", 1.0).await, Err(QuoteError::SameAsset("BTC".into())));
        assert_eq!(d.quote("BTC", "USDT", 0.0).await, Err(QuoteError::InvalidAmount(0.0)));
        assert!(matches!(
            d.quote("BTC", "ETH", 1.0).await,
            Err(QuoteError::PriceUnavailable { asset, .. }) if asset == "ETH"
        ));
    }

    #[tokio::test]
    async fn board_reports_failures_as_zero() {
        let source = ScriptedSource::with_price("BTC", 50_000.0);
        source.set_price("ETH", 2_500.0);
        let board = desk(source).board().await;

        assert_eq!(board.len(), 4);
        assert_eq!(board["USDT"], 1.0);
        assert_eq!(board["BTC"], 50_000.0);
        assert_eq!(board["TON"], 0.0);
    }
}
