pub mod aggregator;
pub mod candle;
pub mod history_cache;
pub mod live_candle;
pub mod market_feed;
pub mod price_cache;
pub mod random_walk;

// Re-export the core types for convenient access (e.g. `use crate::market_data::Candle`).
pub use candle::{Candle, SeriesKey, Timeframe};
pub use history_cache::CandleHistoryCache;
pub use live_candle::LiveCandleUpdater;
pub use market_feed::MarketFeed;
pub use price_cache::SpotPriceService;
