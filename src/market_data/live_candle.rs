// =============================================================================
// Live Candle Updater — re-price the in-progress bar on every read
// =============================================================================
//
// Only the close of the final candle moves. High and low are expand-only, so
// a wick that has been shown never disappears. Completed candles are never
// touched here.
// =============================================================================

use std::sync::Arc;

use rand::Rng;
use tracing::debug;

use super::random_walk::{gaussian, RandomWalk};
use super::Candle;
use crate::bias::{BiasDirective, BiasProvider};
use crate::position::TradePosition;

#[derive(Clone)]
pub struct LiveCandleUpdater {
    provider: Arc<dyn BiasProvider>,
}

impl LiveCandleUpdater {
    pub fn new(provider: Arc<dyn BiasProvider>) -> Self {
        Self { provider }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Recompute `candle.close` for the bar `[bar_start_ms, bar_end_ms)`.
    /// Returns the directive that shaped the move, if any.
    #[allow(clippy::too_many_arguments)]
    pub fn apply<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        symbol: &str,
        bar_start_ms: i64,
        bar_end_ms: i64,
        walk: &RandomWalk,
        candle: &mut Candle,
        positions: &[TradePosition],
    ) -> Option<BiasDirective> {
        let v = walk.volatility();
        let directive = self
            .provider
            .directive(symbol, bar_start_ms, bar_end_ms, positions);

        let intra = match directive {
            None => gaussian(rng, 0.0, v * 0.2),
            Some(BiasDirective::Up) => rng.gen_range(v * 0.3..=v * 1.5),
            Some(BiasDirective::Down) => -rng.gen_range(v * 0.3..=v * 1.5),
        };

        let close = walk.round(candle.open * (1.0 + intra));
        candle.close = close;
        candle.high = candle.high.max(close);
        candle.low = candle.low.min(close);

        debug!(symbol, bar_start_ms, close, directive = ?directive, "live candle updated");
        directive
    }
}

impl std::fmt::Debug for LiveCandleUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveCandleUpdater")
            .field("provider", &self.provider.name())
            .finish()
    }
}
