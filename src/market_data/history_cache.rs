// =============================================================================
// Candle History Cache — one synthetic series per (symbol, timeframe)
// =============================================================================
//
// Lifecycle of a series on every read:
//
//   1. repair    drop everything from the first bad candle onward
//                (misaligned, mis-spaced, in the future, or inconsistent OHLC)
//   2. bootstrap when nothing is left: `limit` bars ending at the current
//                boundary, anchored on the reference price
//   3. extend    one bar per missed boundary, chained from the last close,
//                then trim to `limit + margin`
//   4. live      re-price the final bar through the LiveCandleUpdater
//   5. snapshot  copy out the last `limit` bars
//
// Completed bars are never rewritten. Each key owns an async mutex, so reads
// of one series are serialized while different series proceed in parallel.
// The table lock is only held for the map lookup.
// =============================================================================

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use super::live_candle::LiveCandleUpdater;
use super::price_cache::SpotPriceService;
use super::random_walk::{volatility, RandomWalk};
use super::{Candle, SeriesKey, Timeframe};
use crate::okx::normalize_inst_id;
use crate::position::TradePosition;
use crate::runtime_config::EngineConfig;

type SeriesSlot = Arc<tokio::sync::Mutex<Option<SeriesState>>>;

struct SeriesState {
    candles: VecDeque<Candle>,
    /// Zero-trend walk used for extension and live updates.
    walk: RandomWalk,
    rng: StdRng,
}

impl SeriesState {
    /// Truncate at the first candle that breaks the series. Returns `false`
    /// when nothing usable is left.
    fn repair(&mut self, key: &SeriesKey, step_ms: i64, current_open: i64) -> bool {
        let mut good = 0;
        let mut prev: Option<i64> = None;

        for c in &self.candles {
            let aligned = c.open_time.rem_euclid(step_ms) == 0;
            let spaced = prev.map_or(true, |p| c.open_time - p == step_ms);
            if !(aligned && spaced && c.open_time <= current_open && c.is_consistent()) {
                break;
            }
            prev = Some(c.open_time);
            good += 1;
        }

        if good < self.candles.len() {
            warn!(
                series = %key,
                kept = good,
                dropped = self.candles.len() - good,
                "inconsistent series truncated"
            );
            self.candles.truncate(good);
        }
        good > 0
    }

    fn last(&self) -> Option<Candle> {
        self.candles.back().copied()
    }
}

pub struct CandleHistoryCache {
    slots: parking_lot::Mutex<HashMap<SeriesKey, SeriesSlot>>,
    prices: Arc<SpotPriceService>,
    updater: LiveCandleUpdater,
    margin: usize,
    max_limit: usize,
    rng_seed: Option<u64>,
}

impl CandleHistoryCache {
    pub fn new(prices: Arc<SpotPriceService>, updater: LiveCandleUpdater, config: &EngineConfig) -> Self {
        Self {
            slots: parking_lot::Mutex::new(HashMap::new()),
            prices,
            updater,
            margin: config.history_margin,
            max_limit: config.max_limit.max(1),
            rng_seed: config.rng_seed,
        }
    }

    /// Number of series created so far.
    pub fn series_count(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn bias_provider(&self) -> &'static str {
        self.updater.provider_name()
    }

    fn slot(&self, key: &SeriesKey) -> SeriesSlot {
        let mut slots = self.slots.lock();
        slots.entry(key.clone()).or_default().clone()
    }

    fn series_rng(&self, key: &SeriesKey) -> StdRng {
        match self.rng_seed {
            Some(seed) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                StdRng::seed_from_u64(seed ^ hasher.finish())
            }
            None => StdRng::from_entropy(),
        }
    }

    async fn bootstrap(&self, key: &SeriesKey, current_open: i64, limit: usize) -> SeriesState {
        let reference = self.prices.reference_price(&key.symbol).await;
        let mut rng = self.series_rng(key);
        let walk = RandomWalk::new(volatility(&key.symbol), reference);
        let trend = rng.gen_range(-0.001..0.001);

        let history = walk
            .with_trend(trend)
            .history(&mut rng, reference, current_open, key.timeframe.millis(), limit);

        info!(series = %key, reference, trend, candles = history.len(), "series bootstrapped");

        SeriesState {
            candles: history.into(),
            walk,
            rng,
        }
    }

    /// Candles for `symbol` at `timeframe`, newest last, creating the series
    /// on first access.
    pub async fn get_or_create_series(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        positions: &[TradePosition],
    ) -> Vec<Candle> {
        self.snapshot_at(symbol, timeframe, limit, positions, Utc::now())
            .await
    }

    pub async fn snapshot_at(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        positions: &[TradePosition],
        now: DateTime<Utc>,
    ) -> Vec<Candle> {
        let key = SeriesKey {
            symbol: normalize_inst_id(symbol),
            timeframe,
        };
        let limit = limit.clamp(1, self.max_limit);
        let cap = limit + self.margin;
        let step_ms = timeframe.millis();
        let current_open = timeframe.align(now.timestamp_millis());

        let slot = self.slot(&key);
        let mut guard = slot.lock().await;

        let repaired = guard
            .take()
            .and_then(|mut state| state.repair(&key, step_ms, current_open).then_some(state));
        let state = match repaired {
            Some(state) => state,
            None => self.bootstrap(&key, current_open, limit).await,
        };
        let state = guard.insert(state);

        // extend
        if let Some(last) = state.last() {
            let missed = (current_open - last.open_time) / step_ms;
            if missed > 0 {
                let mut first_open = last.open_time + step_ms;
                if missed > cap as i64 {
                    first_open = current_open - (cap as i64 - 1) * step_ms;
                    state.candles.clear();
                }

                let mut prev_close = last.close;
                let mut open_time = first_open;
                let mut appended = 0usize;
                while open_time <= current_open {
                    let candle = state.walk.step(&mut state.rng, open_time, prev_close, false);
                    prev_close = candle.close;
                    state.candles.push_back(candle);
                    open_time += step_ms;
                    appended += 1;
                }

                debug!(series = %key, missed, appended, "series extended");
            }
        }
        while state.candles.len() > cap {
            state.candles.pop_front();
        }

        // live
        if let Some(live) = state.candles.back_mut() {
            if live.open_time == current_open {
                self.updater.apply(
                    &mut state.rng,
                    &key.symbol,
                    current_open,
                    current_open + step_ms,
                    &state.walk,
                    live,
                    positions,
                );
            }
        }

        let skip = state.candles.len().saturating_sub(limit);
        state.candles.iter().skip(skip).copied().collect()
    }
}

impl std::fmt::Debug for CandleHistoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandleHistoryCache")
            .field("series", &self.series_count())
            .field("margin", &self.margin)
            .field("max_limit", &self.max_limit)
            .field("bias", &self.updater.provider_name())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
