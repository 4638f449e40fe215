// =============================================================================
// Bias Directive Providers — optional nudge for the in-progress candle
// =============================================================================
//
// A provider looks at the active positions on a symbol and may ask the live
// candle to close up or down. Which provider runs is a configuration choice
// (`BiasMode`), made once when the engine is built:
//
//   FairMarket     never returns a directive
//   OutcomeBiased  follows `predicted_result` of positions expiring inside the
//                  current bar; the last qualifying position decides
// =============================================================================

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::okx::normalize_inst_id;
use crate::position::TradePosition;
use crate::types::{BiasMode, Side, TradeResult};

/// Requested direction of the live candle's close relative to its open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BiasDirective {
    Up,
    Down,
}

pub trait BiasProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Directive for the bar `[bar_start_ms, bar_end_ms)` of `symbol`.
    fn directive(
        &self,
        symbol: &str,
        bar_start_ms: i64,
        bar_end_ms: i64,
        positions: &[TradePosition],
    ) -> Option<BiasDirective>;
}

/// Pure random walk.
#[derive(Debug, Default, Clone, Copy)]
pub struct FairMarket;

impl BiasProvider for FairMarket {
    fn name(&self) -> &'static str {
        "FairMarket"
    }

    fn directive(&self, _: &str, _: i64, _: i64, _: &[TradePosition]) -> Option<BiasDirective> {
        None
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OutcomeBiased;

impl OutcomeBiased {
    fn direction_for(side: Side, fate: TradeResult) -> Option<BiasDirective> {
        match (fate, side) {
            (TradeResult::Win, Side::Buy) | (TradeResult::Loss, Side::Sell) => Some(BiasDirective::Up),
            (TradeResult::Win, Side::Sell) | (TradeResult::Loss, Side::Buy) => Some(BiasDirective::Down),
            (TradeResult::Push, _) => None,
        }
    }
}

impl BiasProvider for OutcomeBiased {
    fn name(&self) -> &'static str {
        "OutcomeBiased"
    }

    fn directive(
        &self,
        symbol: &str,
        bar_start_ms: i64,
        bar_end_ms: i64,
        positions: &[TradePosition],
    ) -> Option<BiasDirective> {
        let inst_id = normalize_inst_id(symbol);
        let mut directive = None;

        for p in positions {
            if !p.is_active() || normalize_inst_id(&p.symbol) != inst_id {
                continue;
            }
            let expire_ms = p.expire_at().timestamp_millis();
            if expire_ms < bar_start_ms || expire_ms >= bar_end_ms {
                continue;
            }
            let Some(fate) = p.predicted_result else {
                continue;
            };
            if let Some(d) = Self::direction_for(p.side, fate) {
                debug!(id = %p.id, side = %p.side, fate = %fate, directive = ?d, "position expires in live bar");
                directive = Some(d);
            }
        }

        directive
    }
}

pub fn provider_for(mode: BiasMode) -> Arc<dyn BiasProvider> {
    match mode {
        BiasMode::FairMarket => Arc::new(FairMarket),
        BiasMode::OutcomeBiased => Arc::new(OutcomeBiased),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::tests::position_at;
    use crate::types::TradeStatus;
    use chrono::{TimeZone, Utc};

    const BAR_START: i64 = 1_700_000_100_000;
    const BAR_END: i64 = BAR_START + 60_000;

    fn expiring_in_bar(side: Side, fate: Option<TradeResult>) -> TradePosition {
        // opened 30 s before the bar, 60 s duration -> expires 30 s into it
        let opened = Utc.timestamp_millis_opt(BAR_START - 30_000).unwrap();
        let mut p = position_at(side, 100.0, opened, 60);
        p.predicted_result = fate;
        p
    }

    #[test]
    fn fair_market_never_directs() {
        let p = expiring_in_bar(Side::Buy, Some(TradeResult::Win));
        assert_eq!(FairMarket.directive("BTC-USDT", BAR_START, BAR_END, &[p]), None);
    }

    #[test]
    fn fate_and_side_pick_direction() {
        let cases = [
            (Side::Buy, TradeResult::Win, BiasDirective::Up),
            (Side::Sell, TradeResult::Win, BiasDirective::Down),
            (Side::Buy, TradeResult::Loss, BiasDirective::Down),
            (Side::Sell, TradeResult::Loss, BiasDirective::Up),
        ];
        for (side, fate, expected) in cases {
            let p = expiring_in_bar(side, Some(fate));
            assert_eq!(
                OutcomeBiased.directive("BTCUSDT", BAR_START, BAR_END, &[p]),
                Some(expected)
            );
        }
    }

    #[test]
    fn last_qualifying_position_wins() {
        let a = expiring_in_bar(Side::Buy, Some(TradeResult::Win));
        let b = expiring_in_bar(Side::Buy, Some(TradeResult::Loss));
        assert_eq!(
            OutcomeBiased.directive("BTC-USDT", BAR_START, BAR_END, &[a.clone(), b.clone()]),
            Some(BiasDirective::Down)
        );
        assert_eq!(
            OutcomeBiased.directive("BTC-USDT", BAR_START, BAR_END, &[b, a]),
            Some(BiasDirective::Up)
        );
    }

    #[test]
    fn positions_outside_the_bar_or_symbol_are_ignored() {
        let mut next_bar = expiring_in_bar(Side::Buy, Some(TradeResult::Win));
        next_bar.duration_sec = 90; // expires exactly at BAR_END
        let mut other_symbol = expiring_in_bar(Side::Buy, Some(TradeResult::Win));
        other_symbol.symbol = "ETH-USDT".into();
        let mut done = expiring_in_bar(Side::Buy, Some(TradeResult::Win));
        done.status = TradeStatus::Completed;
        let no_fate = expiring_in_bar(Side::Buy, None);

        let positions = [next_bar, other_symbol, done, no_fate];
        assert_eq!(
            OutcomeBiased.directive("BTC-USDT", BAR_START, BAR_END, &positions),
            None
        );
    }

    #[test]
    fn provider_selection_follows_mode() {
        assert_eq!(provider_for(BiasMode::FairMarket).name(), "FairMarket");
        assert_eq!(provider_for(BiasMode::OutcomeBiased).name(), "OutcomeBiased");
    }
}
