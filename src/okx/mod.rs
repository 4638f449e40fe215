// =============================================================================
// Price Source — spot prices and candles from the OKX public API
// =============================================================================
//
// `PriceSource` is the seam between the engine and the exchange. The live
// implementation is `OkxClient`; tests substitute an in-memory source.
// Every failure is reported as a `FetchError` and callers decide how to fall
// back. A source never invents a price.
// =============================================================================

pub mod client;
pub mod retry;

use async_trait::async_trait;
use thiserror::Error;

use crate::market_data::Candle;

pub use client::{normalize_inst_id, OkxClient};
pub use retry::RetryPolicy;

/// Why a price or candle request produced no data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("rate limited by exchange (HTTP 429)")]
    RateLimited,

    #[error("exchange server error (HTTP {status})")]
    Upstream { status: u16 },

    #[error("request rejected (HTTP {status})")]
    Rejected { status: u16 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("exchange returned code {code}: {msg}")]
    Exchange { code: String, msg: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Timeouts, 429s, 5xx and connection failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RateLimited | Self::Upstream { .. } | Self::Transport(_)
        )
    }
}

/// Live market data capability consumed by the engine.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Last traded price for `symbol` (any accepted spelling, e.g. `BTC`,
    /// `BTCUSDT`, `BTC-USDT`).
    async fn spot_price(&self, symbol: &str) -> Result<f64, FetchError>;

    /// Up to `limit` candles of exchange bar size `bar`, oldest first.
    async fn klines(&self, symbol: &str, bar: &str, limit: u32) -> Result<Vec<Candle>, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(FetchError::Timeout.is_transient());
        assert!(FetchError::RateLimited.is_transient());
        assert!(FetchError::Upstream { status: 503 }.is_transient());
        assert!(FetchError::Transport("reset".into()).is_transient());
        assert!(!FetchError::Rejected { status: 404 }.is_transient());
        assert!(!FetchError::Malformed("x".into()).is_transient());
        assert!(!FetchError::Exchange {
            code: "51001".into(),
            msg: "Instrument ID does not exist".into()
        }
        .is_transient());
    }
}
