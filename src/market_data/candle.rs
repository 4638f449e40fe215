use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Candle
// ---------------------------------------------------------------------------

/// A single OHLCV bar. `open_time` is the UNIX time of the bar start in
/// milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// A bar with no range, used when only a single price is known.
    pub fn flat(open_time: i64, price: f64) -> Self {
        Self {
            open_time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
        }
    }

    /// True when all values are finite, prices positive and the wicks
    /// enclose the body.
    pub fn is_consistent(&self) -> bool {
        let values = [self.open, self.high, self.low, self.close, self.volume];
        values.iter().all(|v| v.is_finite())
            && self.low > 0.0
            && self.volume >= 0.0
            && self.high >= self.open.max(self.close)
            && self.low <= self.open.min(self.close)
    }
}

// ---------------------------------------------------------------------------
// Timeframe
// ---------------------------------------------------------------------------

const MINUTE_MS: i64 = 60_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported timeframe '{0}'")]
pub struct TimeframeError(pub String);

/// Bar duration of a candle series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "2m")]
    M2,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "10m")]
    M10,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 9] = [
        Self::M1,
        Self::M2,
        Self::M5,
        Self::M10,
        Self::M15,
        Self::M30,
        Self::H1,
        Self::H4,
        Self::D1,
    ];

    pub fn minutes(self) -> i64 {
        match self {
            Self::M1 => 1,
            Self::M2 => 2,
            Self::M5 => 5,
            Self::M10 => 10,
            Self::M15 => 15,
            Self::M30 => 30,
            Self::H1 => 60,
            Self::H4 => 240,
            Self::D1 => 1440,
        }
    }

    pub fn millis(self) -> i64 {
        self.minutes() * MINUTE_MS
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M2 => "2m",
            Self::M5 => "5m",
            Self::M10 => "10m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }

    /// OKX bar code, or `None` when the exchange has no native bar of this
    /// size and it has to be built from 1m candles.
    pub fn okx_bar(self) -> Option<&'static str> {
        match self {
            Self::M1 => Some("1m"),
            Self::M5 => Some("5m"),
            Self::M15 => Some("15m"),
            Self::M30 => Some("30m"),
            Self::H1 => Some("1H"),
            Self::H4 => Some("4H"),
            Self::D1 => Some("1D"),
            Self::M2 | Self::M10 => None,
        }
    }

    /// Number of real candles shown for a market chart of this timeframe.
    pub fn chart_count(self) -> u32 {
        match self {
            Self::M1 | Self::M2 => 40,
            Self::M5 | Self::M10 => 36,
            Self::M15 => 32,
            Self::M30 => 30,
            Self::H1 => 24,
            Self::H4 => 18,
            Self::D1 => 20,
        }
    }

    /// Start of the bar containing `ts_ms`.
    pub fn align(self, ts_ms: i64) -> i64 {
        let step = self.millis();
        ts_ms - ts_ms.rem_euclid(step)
    }

    pub fn from_minutes(minutes: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|tf| tf.minutes() == minutes)
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for Timeframe {
    type Err = TimeframeError;

    /// Accepts labels (`5m`, `1H`, `1d`) or a bare number of minutes (`240`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(minutes) = trimmed.parse::<i64>() {
            return Self::from_minutes(minutes).ok_or_else(|| TimeframeError(s.to_string()));
        }
        let lower = trimmed.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|tf| tf.label() == lower)
            .ok_or_else(|| TimeframeError(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// SeriesKey
// ---------------------------------------------------------------------------

/// Composite key that identifies a unique candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SeriesKey {
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timeframe)
    }
}
