// =============================================================================
// Settlement Engine — active → completed, exactly once per position
// =============================================================================
//
// Outcome at expiry, against a fresh exchange price:
//
//   close > entry   buy wins,  sell loses
//   close < entry   sell wins, buy loses
//   close = entry   push
//
//   win   payout = stake * payout_ratio (6 dp), refund = stake + fee
//   push  payout = 0,                        refund = stake + fee
//   loss  payout = 0,                        refund = 0
//
// Each position id has its own async mutex, and decided outcomes are kept in
// a bounded ledger. Concurrent callers holding stale `active` copies get the
// recorded decision back with `newly_settled = false`. Ids pushed out of the
// ledger are remembered without their decision, and settling one of those is
// refused. A failed price fetch records nothing, so the call can simply be
// retried.
// =============================================================================

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::market_data::SpotPriceService;
use crate::okx::FetchError;
use crate::position::{round6, TradePosition};
use crate::types::{Side, TradeResult, TradeStatus};

const LEDGER_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettlementError {
    #[error("close price for {symbol} unavailable: {source}")]
    PriceUnavailable {
        symbol: String,
        #[source]
        source: FetchError,
    },
    #[error("position {id} was settled earlier and its decision is no longer held")]
    AlreadySettled { id: String },
}

/// Result of a settle call. `credit` is what the caller disburses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettlementDecision {
    pub position_id: String,
    pub status: TradeStatus,
    pub result: Option<TradeResult>,
    pub payout: f64,
    pub refund: f64,
    pub credit: f64,
    pub close_price: Option<f64>,
    pub closed_at: Option<DateTime<Utc>>,
    pub newly_settled: bool,
}

impl SettlementDecision {
    fn pending(position: &TradePosition) -> Self {
        Self {
            position_id: position.id.clone(),
            status: TradeStatus::Active,
            result: None,
            payout: 0.0,
            refund: 0.0,
            credit: 0.0,
            close_price: None,
            closed_at: None,
            newly_settled: false,
        }
    }

    /// Decision already carried by a completed position.
    fn prior(position: &TradePosition) -> Self {
        let refund = match position.result {
            Some(TradeResult::Win) | Some(TradeResult::Push) => position.stake + position.fee,
            _ => 0.0,
        };
        Self {
            position_id: position.id.clone(),
            status: TradeStatus::Completed,
            result: position.result,
            payout: position.payout,
            refund,
            credit: refund + position.payout,
            close_price: position.close_price,
            closed_at: position.closed_at,
            newly_settled: false,
        }
    }

    fn decide(position: &TradePosition, close_price: f64, payout_ratio: f64, now: DateTime<Utc>) -> Self {
        let result = resolve(position.side, position.entry_price, close_price);
        let (payout, refund) = match result {
            TradeResult::Win => (round6(position.stake * payout_ratio), position.stake + position.fee),
            TradeResult::Push => (0.0, position.stake + position.fee),
            TradeResult::Loss => (0.0, 0.0),
        };
        Self {
            position_id: position.id.clone(),
            status: TradeStatus::Completed,
            result: Some(result),
            payout,
            refund,
            credit: round6(refund + payout),
            close_price: Some(close_price),
            closed_at: Some(now),
            newly_settled: true,
        }
    }

    fn replayed(mut self) -> Self {
        self.newly_settled = false;
        self
    }

    /// Write a completed decision onto the matching active position, all
    /// fields at once. Returns whether anything changed.
    pub fn apply_to(&self, position: &mut TradePosition) -> bool {
        if self.status != TradeStatus::Completed
            || position.id != self.position_id
            || !position.is_active()
        {
            return false;
        }
        position.status = TradeStatus::Completed;
        position.result = self.result;
        position.payout = self.payout;
        position.close_price = self.close_price;
        position.closed_at = self.closed_at;
        true
    }
}

/// Outcome of `side` entered at `entry` and closed at `current`.
pub fn resolve(side: Side, entry: f64, current: f64) -> TradeResult {
    match current.partial_cmp(&entry) {
        Some(std::cmp::Ordering::Greater) => match side {
            Side::Buy => TradeResult::Win,
            Side::Sell => TradeResult::Loss,
        },
        Some(std::cmp::Ordering::Less) => match side {
            Side::Buy => TradeResult::Loss,
            Side::Sell => TradeResult::Win,
        },
        _ => TradeResult::Push,
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

struct Ledger {
    decided: HashMap<String, SettlementDecision>,
    order: VecDeque<String>,
    /// Settled ids whose decisions were evicted.
    evicted: HashSet<String>,
    capacity: usize,
}

impl Ledger {
    fn new(capacity: usize) -> Self {
        Self {
            decided: HashMap::new(),
            order: VecDeque::new(),
            evicted: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    /// Whatever the ledger knows about `id`: `Err` when it was settled but
    /// the decision has since been evicted.
    fn lookup(&self, id: &str) -> Result<Option<SettlementDecision>, SettlementError> {
        if self.evicted.contains(id) {
            return Err(SettlementError::AlreadySettled { id: id.to_string() });
        }
        Ok(self.decided.get(id).cloned().map(SettlementDecision::replayed))
    }

    /// Record `decision` unless one exists; returns the decision that stands.
    fn record(&mut self, decision: SettlementDecision) -> Result<SettlementDecision, SettlementError> {
        if let Some(existing) = self.lookup(&decision.position_id)? {
            return Ok(existing);
        }
        while self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.decided.remove(&oldest);
                self.evicted.insert(oldest);
            }
        }
        self.order.push_back(decision.position_id.clone());
        self.decided.insert(decision.position_id.clone(), decision.clone());
        Ok(decision)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SettlementEngine {
    prices: Arc<SpotPriceService>,
    payout_ratio: f64,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    ledger: Mutex<Ledger>,
}

impl SettlementEngine {
    pub fn new(prices: Arc<SpotPriceService>, payout_ratio: f64) -> Self {
        Self::with_ledger_capacity(prices, payout_ratio, LEDGER_CAPACITY)
    }

    pub fn with_ledger_capacity(prices: Arc<SpotPriceService>, payout_ratio: f64, capacity: usize) -> Self {
        Self {
            prices,
            payout_ratio,
            locks: Mutex::new(HashMap::new()),
            ledger: Mutex::new(Ledger::new(capacity)),
        }
    }

    pub fn ledger_len(&self) -> usize {
        self.ledger.lock().decided.len()
    }

    pub async fn settle(&self, position: &TradePosition) -> Result<SettlementDecision, SettlementError> {
        self.settle_at(position, Utc::now()).await
    }

    pub async fn settle_at(
        &self,
        position: &TradePosition,
        now: DateTime<Utc>,
    ) -> Result<SettlementDecision, SettlementError> {
        if !position.is_active() {
            return Ok(SettlementDecision::prior(position));
        }
        if !position.is_expired(now) {
            debug!(id = %position.id, left_sec = position.time_left(now).num_seconds(), "position not expired yet");
            return Ok(SettlementDecision::pending(position));
        }
        if let Some(decision) = self.ledger.lock().lookup(&position.id)? {
            return Ok(decision);
        }

        let lock = self
            .locks
            .lock()
            .entry(position.id.clone())
            .or_default()
            .clone();
        let outcome = {
            let _guard = lock.lock().await;
            self.settle_locked(position, now).await
        };
        self.locks.lock().remove(&position.id);
        outcome
    }

    async fn settle_locked(
        &self,
        position: &TradePosition,
        now: DateTime<Utc>,
    ) -> Result<SettlementDecision, SettlementError> {
        if let Some(decision) = self.ledger.lock().lookup(&position.id)? {
            return Ok(decision);
        }

        let close_price = match self.prices.fresh(&position.symbol).await {
            Ok(price) => price,
            Err(source) => {
                warn!(id = %position.id, symbol = %position.symbol, error = %source, "settlement deferred, no close price");
                return Err(SettlementError::PriceUnavailable {
                    symbol: position.symbol.clone(),
                    source,
                });
            }
        };

        let decision = SettlementDecision::decide(position, close_price, self.payout_ratio, now);
        let decision = self.ledger.lock().record(decision)?;

        if decision.newly_settled {
            info!(
                id = %position.id,
                symbol = %position.symbol,
                side = %position.side,
                entry = position.entry_price,
                close = close_price,
                result = ?decision.result,
                payout = decision.payout,
                credit = decision.credit,
                "position settled"
            );
        }
        Ok(decision)
    }
}

impl std::fmt::Debug for SettlementEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementEngine")
            .field("payout_ratio", &self.payout_ratio)
            .field("ledger", &self.ledger_len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
