// =============================================================================
// Spot Price Service — short-lived cache in front of the price source
// =============================================================================
//
// Chart bootstrap and quotes tolerate a price up to `ttl` old. Settlement
// always calls `fresh`, which goes to the exchange and refreshes the entry.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::random_walk::static_price;
use crate::okx::{normalize_inst_id, FetchError, PriceSource};

#[derive(Debug, Clone, Copy)]
pub struct PricePoint {
    pub price: f64,
    pub fetched_at: Instant,
}

pub struct SpotPriceService {
    source: Arc<dyn PriceSource>,
    ttl: Duration,
    points: RwLock<HashMap<String, PricePoint>>,
}

impl SpotPriceService {
    pub fn new(source: Arc<dyn PriceSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            points: RwLock::new(HashMap::new()),
        }
    }

    fn cached(&self, inst_id: &str) -> Option<f64> {
        let points = self.points.read();
        points
            .get(inst_id)
            .filter(|p| p.fetched_at.elapsed() < self.ttl)
            .map(|p| p.price)
    }

    fn store(&self, inst_id: String, price: f64) {
        self.points.write().insert(
            inst_id,
            PricePoint {
                price,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Cached price when younger than the TTL, else a fetch.
    pub async fn cached_or_fetch(&self, symbol: &str) -> Result<f64, FetchError> {
        let inst_id = normalize_inst_id(symbol);
        if let Some(price) = self.cached(&inst_id) {
            debug!(inst_id = %inst_id, price, "price cache hit");
            return Ok(price);
        }
        self.fresh(symbol).await
    }

    /// Always asks the source; a successful answer refreshes the cache.
    pub async fn fresh(&self, symbol: &str) -> Result<f64, FetchError> {
        let inst_id = normalize_inst_id(symbol);
        let price = self.source.spot_price(&inst_id).await?;
        self.store(inst_id, price);
        Ok(price)
    }

    /// Price to anchor a synthetic series on. Never fails: falls back to the
    /// static table when the exchange is unavailable.
    pub async fn reference_price(&self, symbol: &str) -> f64 {
        match self.cached_or_fetch(symbol).await {
            Ok(price) => price,
            Err(e) => {
                let fallback = static_price(symbol);
                warn!(symbol, error = %e, fallback, "spot price unavailable, using static reference");
                fallback
            }
        }
    }
}

impl std::fmt::Debug for SpotPriceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpotPriceService")
            .field("ttl", &self.ttl)
            .field("cached", &self.points.read().len())
            .finish()
    }
}
