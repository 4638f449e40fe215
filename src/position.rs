// =============================================================================
// Trade Positions — fixed-duration binary option records
// =============================================================================
//
// Positions are owned and persisted by the caller. The engine reads them to
// shape the chart and to settle them, and hands back decisions; it never
// stores a position itself.
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::okx::normalize_inst_id;
use crate::runtime_config::EngineConfig;
use crate::types::{Side, TradeResult, TradeStatus};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PositionError {
    #[error("stake {stake} is below the minimum of {min}")]
    StakeTooSmall { stake: f64, min: f64 },

    #[error("duration must be positive")]
    InvalidDuration,

    #[error("entry price {0} is not a positive number")]
    InvalidEntryPrice(f64),
}

/// A single binary position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePosition {
    pub id: String,
    /// OKX instrument id, e.g. `BTC-USDT`.
    pub symbol: String,
    pub side: Side,
    pub stake: f64,
    /// Entry fee paid on top of the stake; refunded together with the stake
    /// on a win or push.
    #[serde(default)]
    pub fee: f64,
    pub entry_price: f64,
    pub opened_at: DateTime<Utc>,
    pub duration_sec: u64,
    #[serde(default)]
    pub status: TradeStatus,
    #[serde(default)]
    pub result: Option<TradeResult>,
    #[serde(default)]
    pub payout: f64,
    #[serde(default)]
    pub close_price: Option<f64>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    /// Fate fixed at order time. Only read by the outcome-biased directive
    /// provider.
    #[serde(default)]
    pub predicted_result: Option<TradeResult>,
}

impl TradePosition {
    /// Validate an order and build the active position for it.
    pub fn open(
        symbol: &str,
        side: Side,
        stake: f64,
        entry_price: f64,
        duration_sec: u64,
        config: &EngineConfig,
    ) -> Result<Self, PositionError> {
        if !(stake.is_finite() && stake >= config.min_stake) {
            return Err(PositionError::StakeTooSmall {
                stake,
                min: config.min_stake,
            });
        }
        if duration_sec == 0 {
            return Err(PositionError::InvalidDuration);
        }
        if !(entry_price.is_finite() && entry_price > 0.0) {
            return Err(PositionError::InvalidEntryPrice(entry_price));
        }

        let fee = round6(stake * config.trade_fee_pct / 100.0);
        let position = Self {
            id: Uuid::new_v4().to_string(),
            symbol: normalize_inst_id(symbol),
            side,
            stake,
            fee,
            entry_price,
            opened_at: Utc::now(),
            duration_sec,
            status: TradeStatus::Active,
            result: None,
            payout: 0.0,
            close_price: None,
            closed_at: None,
            predicted_result: None,
        };

        info!(
            id = %position.id,
            symbol = %position.symbol,
            side = %side,
            stake,
            fee,
            entry_price,
            duration_sec,
            "position opened"
        );

        Ok(position)
    }

    /// Stake plus entry fee, i.e. what the caller debits at order time.
    pub fn total_cost(&self) -> f64 {
        self.stake + self.fee
    }

    pub fn expire_at(&self) -> DateTime<Utc> {
        i64::try_from(self.duration_sec)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|d| self.opened_at.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expire_at()
    }

    pub fn is_active(&self) -> bool {
        self.status == TradeStatus::Active
    }

    /// Time left before expiry; zero once expired.
    pub fn time_left(&self, now: DateTime<Utc>) -> Duration {
        (self.expire_at() - now).max(Duration::zero())
    }
}

pub(crate) fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

// ---------------------------------------------------------------------------
// Entry markers
// ---------------------------------------------------------------------------

/// What a chart needs to draw an open position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMarker {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub stake: f64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub expire_at: DateTime<Utc>,
    pub time_left_sec: i64,
}

/// Markers for active, not yet expired positions, newest first.
pub fn entry_markers(positions: &[TradePosition], now: DateTime<Utc>) -> Vec<EntryMarker> {
    let mut live: Vec<&TradePosition> = positions
        .iter()
        .filter(|p| p.is_active() && !p.is_expired(now))
        .collect();
    live.sort_by(|a, b| b.opened_at.cmp(&a.opened_at));

    live.into_iter()
        .map(|p| EntryMarker {
            id: p.id.clone(),
            symbol: p.symbol.clone(),
            side: p.side,
            stake: p.stake,
            entry_price: p.entry_price,
            entry_time: p.opened_at,
            expire_at: p.expire_at(),
            time_left_sec: p.time_left(now).num_seconds(),
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn position_at(
        side: Side,
        entry_price: f64,
        opened_at: DateTime<Utc>,
        duration_sec: u64,
    ) -> TradePosition {
        TradePosition {
            id: Uuid::new_v4().to_string(),
            symbol: "BTC-USDT".into(),
            side,
            stake: 10.0,
            fee: 0.2,
            entry_price,
            opened_at,
            duration_sec,
            status: TradeStatus::Active,
            result: None,
            payout: 0.0,
            close_price: None,
            closed_at: None,
            predicted_result: None,
        }
    }

    #[test]
    fn open_computes_fee_and_normalizes_symbol() {
        let cfg = EngineConfig::default();
        let p = TradePosition::open("btcusdt", Side::Buy, 50.0, 64_000.0, 60, &cfg).unwrap();
        assert_eq!(p.symbol, "BTC-USDT");
        assert!((p.fee - 1.0).abs() < 1e-9);
        assert!((p.total_cost() - 51.0).abs() < 1e-9);
        assert!(p.is_active());
        assert!(p.result.is_none());
    }

    #[test]
    fn open_rejects_bad_orders() {
        let cfg = EngineConfig::default();
        assert!(matches!(
            TradePosition::open("BTC", Side::Buy, 4.99, 100.0, 60, &cfg),
            Err(PositionError::StakeTooSmall { .. })
        ));
        assert_eq!(
            TradePosition::open("BTC", Side::Buy, 10.0, 100.0, 0, &cfg),
            Err(PositionError::InvalidDuration)
        );
        assert_eq!(
            TradePosition::open("BTC", Side::Sell, 10.0, 0.0, 60, &cfg),
            Err(PositionError::InvalidEntryPrice(0.0))
        );
    }

    #[test]
    fn expiry_and_time_left() {
        let opened = Utc::now();
        let p = position_at(Side::Buy, 100.0, opened, 90);
        assert_eq!(p.expire_at(), opened + Duration::seconds(90));
        assert!(!p.is_expired(opened + Duration::seconds(89)));
        assert!(p.is_expired(opened + Duration::seconds(90)));
        assert_eq!(p.time_left(opened + Duration::seconds(30)).num_seconds(), 60);
        assert_eq!(p.time_left(opened + Duration::seconds(300)), Duration::zero());
    }

    #[test]
    fn huge_duration_saturates_instead_of_overflowing() {
        let p = position_at(Side::Buy, 100.0, Utc::now(), u64::MAX);
        assert_eq!(p.expire_at(), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn markers_skip_expired_and_completed_positions() {
        let now = Utc::now();
        let older = position_at(Side::Buy, 100.0, now - Duration::seconds(30), 60);
        let newer = position_at(Side::Sell, 101.0, now - Duration::seconds(10), 60);
        let expired = position_at(Side::Buy, 99.0, now - Duration::seconds(120), 60);
        let mut done = position_at(Side::Buy, 98.0, now - Duration::seconds(5), 60);
        done.status = TradeStatus::Completed;

        let markers = entry_markers(&[older.clone(), expired, newer.clone(), done], now);
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].id, newer.id);
        assert_eq!(markers[1].id, older.id);
        assert_eq!(markers[1].time_left_sec, 30);
        assert_eq!(markers[0].expire_at, newer.expire_at());
    }

    #[test]
    fn deserialises_minimal_collaborator_record() {
        let json = r#"{
            "id": "42",
            "symbol": "ETH-USDT",
            "side": "sell",
            "stake": 20.0,
            "entry_price": 2500.0,
            "opened_at": "2024-05-01T12:00:00Z",
            "duration_sec": 60
        }"#;
        let p: TradePosition = serde_json::from_str(json).unwrap();
        assert_eq!(p.status, TradeStatus::Active);
        assert_eq!(p.fee, 0.0);
        assert!(p.predicted_result.is_none());
    }
}
