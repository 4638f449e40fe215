// =============================================================================
// Random Walk — synthetic OHLCV bars around a reference price
// =============================================================================
//
// Step model (v = per-symbol volatility):
//   change ~ N(trend, v*0.5), amplified x U(1.5, 2.5) with p = 0.10
//   open   = previous close, gapped by N(0, v*0.1) with p = 0.20
//   close  = open * (1 + change)
//   wicks  = U(0.2, 1.2) * |close - open| above / below the body
//   volume = U(100, 500) * (1 + |change| / v * 2)
// Prices round to 2 decimals for references >= 1, else 8.
// =============================================================================

use rand::Rng;
use statrs::distribution::Normal;

use super::Candle;

const DEFAULT_BASE_PRICE: f64 = 100.0;
const DEFAULT_VOLATILITY: f64 = 0.02;

const BASE_PRICES: &[(&str, f64)] = &[
    ("BTC", 45_000.0),
    ("ETH", 2_500.0),
    ("SOL", 100.0),
    ("ADA", 0.55),
    ("DOT", 7.5),
    ("LINK", 15.0),
    ("MATIC", 0.85),
    ("AVAX", 35.0),
    ("XRP", 0.60),
    ("DOGE", 0.08),
    ("SHIB", 0.000_025),
    ("UNI", 8.0),
    ("LTC", 90.0),
    ("BCH", 250.0),
    ("TRX", 0.10),
];

const VOLATILITY: &[(&str, f64)] = &[
    ("BTC", 0.015),
    ("ETH", 0.02),
    ("SOL", 0.03),
    ("ADA", 0.025),
    ("DOT", 0.025),
    ("LINK", 0.03),
    ("MATIC", 0.03),
    ("AVAX", 0.035),
    ("XRP", 0.025),
    ("DOGE", 0.04),
    ("SHIB", 0.05),
    ("UNI", 0.03),
    ("LTC", 0.02),
    ("BCH", 0.025),
    ("TRX", 0.03),
];

/// Strip the quote currency: `BTC-USDT`, `BTCUSDT`, `btc` all give `BTC`.
pub fn base_asset(symbol: &str) -> String {
    let upper = symbol.trim().to_uppercase().replace(['/', '-'], "");
    match upper.strip_suffix("USDT") {
        Some(base) if !base.is_empty() => base.to_string(),
        _ => upper,
    }
}

/// Last-resort reference price when the exchange is unreachable.
pub fn static_price(symbol: &str) -> f64 {
    let base = base_asset(symbol);
    BASE_PRICES
        .iter()
        .find(|(sym, _)| *sym == base)
        .map_or(DEFAULT_BASE_PRICE, |(_, p)| *p)
}

pub fn volatility(symbol: &str) -> f64 {
    let base = base_asset(symbol);
    VOLATILITY
        .iter()
        .find(|(sym, _)| *sym == base)
        .map_or(DEFAULT_VOLATILITY, |(_, v)| *v)
}

pub fn price_decimals(reference_price: f64) -> u32 {
    if reference_price >= 1.0 {
        2
    } else {
        8
    }
}

pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Draw from N(mean, std_dev); a degenerate deviation yields the mean.
pub fn gaussian<R: Rng + ?Sized>(rng: &mut R, mean: f64, std_dev: f64) -> f64 {
    if !(std_dev.is_finite() && std_dev > 0.0) {
        return mean;
    }
    match Normal::new(mean, std_dev) {
        Ok(normal) => rng.sample(normal),
        Err(_) => mean,
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Bar generator for one series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RandomWalk {
    volatility: f64,
    trend: f64,
    decimals: u32,
}

impl RandomWalk {
    pub fn new(volatility: f64, reference_price: f64) -> Self {
        Self {
            volatility: volatility.max(f64::EPSILON),
            trend: 0.0,
            decimals: price_decimals(reference_price),
        }
    }

    /// Mean of the per-step change.
    pub fn with_trend(mut self, trend: f64) -> Self {
        self.trend = trend;
        self
    }

    pub fn volatility(&self) -> f64 {
        self.volatility
    }

    pub fn round(&self, price: f64) -> f64 {
        round_to(price, self.decimals)
    }

    /// Produce the bar opening at `open_time` from the previous close.
    /// `allow_gap` enables the occasional open gap.
    pub fn step<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        open_time: i64,
        prev_close: f64,
        allow_gap: bool,
    ) -> Candle {
        let v = self.volatility;

        let mut change = gaussian(rng, self.trend, v * 0.5);
        if rng.gen_bool(0.1) {
            change *= rng.gen_range(1.5..2.5);
        }

        let mut open = prev_close;
        if allow_gap && rng.gen_bool(0.2) {
            open *= 1.0 + gaussian(rng, 0.0, v * 0.1);
        }
        let close = open * (1.0 + change);

        let body = (close - open).abs();
        let wick_up = body * rng.gen_range(0.2..1.2);
        let wick_down = body * rng.gen_range(0.2..1.2);
        let volume = rng.gen_range(100.0..500.0) * (1.0 + change.abs() / v * 2.0);

        let open = self.round(open);
        let close = self.round(close);
        let high = self.round(open.max(close) + wick_up).max(open.max(close));
        let low = self.round(open.min(close) - wick_down).min(open.min(close));

        Candle {
            open_time,
            open,
            high,
            low,
            close,
            volume: round_to(volume, 2),
        }
    }

    /// Synthesize `count` consecutive bars whose last one opens at
    /// `last_open_time`. The first bar opens near `reference_price`.
    pub fn history<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        reference_price: f64,
        last_open_time: i64,
        step_ms: i64,
        count: usize,
    ) -> Vec<Candle> {
        let mut candles: Vec<Candle> = Vec::with_capacity(count);
        let mut prev_close = reference_price * rng.gen_range(0.95..1.05);

        for i in 0..count {
            let back = (count - 1 - i) as i64;
            let open_time = last_open_time - step_ms * back;
            let candle = self.step(rng, open_time, prev_close, i > 0);
            prev_close = candle.close;
            candles.push(candle);
        }

        candles
    }
}

// =============================================================================
// Tests
// =============================================================================
