// =============================================================================
// OKX REST Client — public ticker and candle endpoints
// =============================================================================
//
// Only unauthenticated market endpoints are used, so no request signing is
// needed. Every request carries the client-wide timeout and is wrapped in
// the shared `RetryPolicy`.
//
// Response envelope: { "code": "0", "msg": "", "data": [ ... ] }
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, instrument, warn};

use super::{FetchError, PriceSource, RetryPolicy};
use crate::market_data::Candle;

/// Quote currency appended to bare asset symbols.
const QUOTE_CCY: &str = "USDT";

/// Convert any accepted symbol spelling into an OKX instrument id.
///
/// `btc`, `BTCUSDT`, `BTC/USDT` and `BTC-USDT` all map to `BTC-USDT`.
pub fn normalize_inst_id(symbol: &str) -> String {
    let upper = symbol.trim().to_uppercase().replace('/', "-");
    if upper.contains('-') {
        return upper;
    }
    match upper.strip_suffix(QUOTE_CCY) {
        Some(base) if !base.is_empty() => format!("{base}-{QUOTE_CCY}"),
        _ => format!("{upper}-{QUOTE_CCY}"),
    }
}

/// OKX public REST client.
#[derive(Clone)]
pub struct OkxClient {
    base_url: String,
    client: reqwest::Client,
    retry: RetryPolicy<FetchError>,
}

impl OkxClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Build a client against `base_url` (e.g. `https://www.okx.com/api/v5`).
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy<FetchError>,
    ) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;

        debug!(base_url = %base_url, timeout_ms = timeout.as_millis() as u64, "OkxClient initialised");

        Ok(Self {
            base_url,
            client,
            retry,
        })
    }

    // -------------------------------------------------------------------------
    // Single attempts
    // -------------------------------------------------------------------------

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<serde_json::Value, FetchError> {
        let resp = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        resp.json::<serde_json::Value>()
            .await
            .map_err(|e| FetchError::Malformed(e.to_string()))
    }

    async fn ticker_once(&self, inst_id: &str) -> Result<f64, FetchError> {
        let url = format!("{}/market/ticker", self.base_url);
        let body = self.get_json(&url, &[("instId", inst_id.to_string())]).await?;
        parse_ticker(&body)
    }

    async fn candles_once(&self, inst_id: &str, bar: &str, limit: u32) -> Result<Vec<Candle>, FetchError> {
        let url = format!("{}/market/candles", self.base_url);
        let body = self
            .get_json(
                &url,
                &[
                    ("instId", inst_id.to_string()),
                    ("bar", bar.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        parse_candles(&body)
    }
}

#[async_trait]
impl PriceSource for OkxClient {
    /// GET /market/ticker with retries.
    #[instrument(skip(self), name = "okx::spot_price")]
    async fn spot_price(&self, symbol: &str) -> Result<f64, FetchError> {
        let inst_id = normalize_inst_id(symbol);
        let price = self
            .retry
            .run("okx ticker", |_| self.ticker_once(&inst_id))
            .await?;
        debug!(inst_id = %inst_id, price, "spot price fetched");
        Ok(price)
    }

    /// GET /market/candles with retries, returned oldest first.
    #[instrument(skip(self), name = "okx::klines")]
    async fn klines(&self, symbol: &str, bar: &str, limit: u32) -> Result<Vec<Candle>, FetchError> {
        let inst_id = normalize_inst_id(symbol);
        let candles = self
            .retry
            .run("okx candles", |_| self.candles_once(&inst_id, bar, limit))
            .await?;
        debug!(inst_id = %inst_id, bar, count = candles.len(), "klines fetched");
        Ok(candles)
    }
}

impl std::fmt::Debug for OkxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OkxClient")
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Response handling
// -----------------------------------------------------------------------------

fn transport_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Transport(e.to_string())
    }
}

fn classify_status(status: StatusCode) -> FetchError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        FetchError::RateLimited
    } else if status.is_server_error() {
        FetchError::Upstream {
            status: status.as_u16(),
        }
    } else {
        FetchError::Rejected {
            status: status.as_u16(),
        }
    }
}

/// Check the `code` field and return the `data` array.
fn envelope_data(body: &serde_json::Value) -> Result<&Vec<serde_json::Value>, FetchError> {
    let code = body["code"].as_str().unwrap_or("");
    if code != "0" {
        return Err(FetchError::Exchange {
            code: code.to_string(),
            msg: body["msg"].as_str().unwrap_or("").to_string(),
        });
    }
    body["data"]
        .as_array()
        .ok_or_else(|| FetchError::Malformed("missing 'data' array".into()))
}

/// Parse a JSON value that may be either a string or a number into `f64`.
fn parse_str_f64(val: &serde_json::Value, name: &str) -> Result<f64, FetchError> {
    let parsed = match val {
        serde_json::Value::String(s) => s.parse::<f64>().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    };
    parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| FetchError::Malformed(format!("field {name} is not a number: {val}")))
}

fn parse_ticker(body: &serde_json::Value) -> Result<f64, FetchError> {
    let data = envelope_data(body)?;
    let first = data
        .first()
        .ok_or_else(|| FetchError::Malformed("empty ticker data".into()))?;
    let last = parse_str_f64(&first["last"], "last")?;
    if last <= 0.0 {
        return Err(FetchError::Malformed(format!("non-positive last price {last}")));
    }
    Ok(last)
}

/// Rows look like `[ts, o, h, l, c, vol, volCcy, volCcyQuote, confirm]`,
/// newest first.
fn parse_candles(body: &serde_json::Value) -> Result<Vec<Candle>, FetchError> {
    let data = envelope_data(body)?;
    let mut candles = Vec::with_capacity(data.len());

    for row in data.iter().rev() {
        let Some(arr) = row.as_array() else {
            warn!("skipping non-array candle row");
            continue;
        };
        if arr.len() < 6 {
            warn!("skipping malformed candle row with {} elements", arr.len());
            continue;
        }
        let open_time = parse_str_f64(&arr[0], "ts")? as i64;
        candles.push(Candle {
            open_time,
            open: parse_str_f64(&arr[1], "o")?,
            high: parse_str_f64(&arr[2], "h")?,
            low: parse_str_f64(&arr[3], "l")?,
            close: parse_str_f64(&arr[4], "c")?,
            volume: parse_str_f64(&arr[5], "vol")?,
        });
    }

    Ok(candles)
}

// =============================================================================
// Tests
// =============================================================================
