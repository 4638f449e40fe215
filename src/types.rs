// =============================================================================
// Shared types used across the spot-simulation engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Direction the trader bet on: `Buy` wins when price rises, `Sell` when it
/// falls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Life-cycle state of a binary position. `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Active,
    Completed,
}

impl Default for TradeStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Settled outcome of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeResult {
    Win,
    Loss,
    Push,
}

impl std::fmt::Display for TradeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Win => write!(f, "win"),
            Self::Loss => write!(f, "loss"),
            Self::Push => write!(f, "push"),
        }
    }
}

/// Which directive provider drives the live candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BiasMode {
    /// Live candle follows the random walk only.
    FairMarket,
    /// Live candle is nudged towards the predetermined fate of positions
    /// expiring inside the current bar.
    OutcomeBiased,
}

impl Default for BiasMode {
    fn default() -> Self {
        Self::FairMarket
    }
}

impl std::fmt::Display for BiasMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FairMarket => write!(f, "FairMarket"),
            Self::OutcomeBiased => write!(f, "OutcomeBiased"),
        }
    }
}

impl std::str::FromStr for BiasMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "fairmarket" | "fair" => Ok(Self::FairMarket),
            "outcomebiased" | "biased" => Ok(Self::OutcomeBiased),
            other => Err(format!("unknown bias mode '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_and_result_serialise_lowercase() {
        assert_eq!(serde_json::to_string(&Side::Buy).unwrap(), "\"buy\"");
        assert_eq!(serde_json::to_string(&TradeResult::Push).unwrap(), "\"push\"");
        let status: TradeStatus = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(status, TradeStatus::Completed);
    }

    #[test]
    fn bias_mode_parses_loose_spellings() {
        assert_eq!("fair".parse::<BiasMode>(), Ok(BiasMode::FairMarket));
        assert_eq!("Outcome_Biased".parse::<BiasMode>(), Ok(BiasMode::OutcomeBiased));
        assert!("rigged".parse::<BiasMode>().is_err());
    }
}
