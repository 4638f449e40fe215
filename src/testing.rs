// In-memory `PriceSource` for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::market_data::Candle;
use crate::okx::{normalize_inst_id, FetchError, PriceSource};

/// Answers from a fixed price table. Queued responses, when present, are
/// served first (one per call) regardless of symbol.
#[derive(Default)]
pub struct ScriptedSource {
    prices: Mutex<HashMap<String, f64>>,
    queued: Mutex<VecDeque<Result<f64, FetchError>>>,
    candles: Mutex<HashMap<(String, String), Vec<Candle>>>,
    kline_requests: Mutex<Vec<(String, String, u32)>>,
    spot_calls: AtomicU32,
}

impl ScriptedSource {
    pub fn with_price(symbol: &str, price: f64) -> Self {
        let source = Self::default();
        source.set_price(symbol, price);
        source
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.prices.lock().insert(normalize_inst_id(symbol), price);
    }

    pub fn push_response(&self, response: Result<f64, FetchError>) {
        self.queued.lock().push_back(response);
    }

    pub fn set_klines(&self, symbol: &str, bar: &str, candles: Vec<Candle>) {
        self.candles
            .lock()
            .insert((normalize_inst_id(symbol), bar.to_string()), candles);
    }

    pub fn spot_calls(&self) -> u32 {
        self.spot_calls.load(Ordering::SeqCst)
    }

    /// `(inst_id, bar, limit)` of every klines call, in order.
    pub fn kline_requests(&self) -> Vec<(String, String, u32)> {
        self.kline_requests.lock().clone()
    }
}

#[async_trait]
impl PriceSource for ScriptedSource {
    async fn spot_price(&self, symbol: &str) -> Result<f64, FetchError> {
        self.spot_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(response) = self.queued.lock().pop_front() {
            return response;
        }
        self.prices
            .lock()
            .get(&normalize_inst_id(symbol))
            .copied()
            .ok_or_else(|| FetchError::Rejected { status: 404 })
    }

    async fn klines(&self, symbol: &str, bar: &str, limit: u32) -> Result<Vec<Candle>, FetchError> {
        let inst_id = normalize_inst_id(symbol);
        self.kline_requests
            .lock()
            .push((inst_id.clone(), bar.to_string(), limit));
        let candles = self
            .candles
            .lock()
            .get(&(inst_id, bar.to_string()))
            .cloned()
            .ok_or(FetchError::Upstream { status: 503 })?;
        let skip = candles.len().saturating_sub(limit as usize);
        Ok(candles[skip..].to_vec())
    }
}
