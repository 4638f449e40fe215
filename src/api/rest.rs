// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. There is no authentication and no
// persistence: trade endpoints take the caller's positions in the request
// body and hand back decisions for the caller to store.
//
// CORS is configured permissively.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::market_data::{Candle, Timeframe};
use crate::position::{entry_markers, EntryMarker, PositionError, TradePosition};
use crate::quote::QuoteError;
use crate::settlement::{SettlementDecision, SettlementError};
use crate::types::Side;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        // ── Charts ──────────────────────────────────────────────────
        .route("/api/v1/candles", get(candles_query).post(candles_with_positions))
        .route("/api/v1/market/candles", get(market_candles))
        // ── Prices ──────────────────────────────────────────────────
        .route("/api/v1/prices", get(prices))
        .route("/api/v1/quote", get(quote))
        // ── Trades ──────────────────────────────────────────────────
        .route("/api/v1/trades/open", post(open_trade))
        .route("/api/v1/trades/markers", post(markers))
        .route("/api/v1/trades/settle", post(settle))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Conflict(String),
    Unavailable(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}

impl From<PositionError> for ApiError {
    fn from(e: PositionError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<QuoteError> for ApiError {
    fn from(e: QuoteError) -> Self {
        match e {
            QuoteError::PriceUnavailable { .. } => Self::Unavailable(e.to_string()),
            QuoteError::SameAsset(_) | QuoteError::InvalidAmount(_) => Self::BadRequest(e.to_string()),
        }
    }
}

impl From<SettlementError> for ApiError {
    fn from(e: SettlementError) -> Self {
        match e {
            SettlementError::PriceUnavailable { .. } => Self::Unavailable(e.to_string()),
            SettlementError::AlreadySettled { .. } => Self::Conflict(e.to_string()),
        }
    }
}

/// Unknown or missing timeframes fall back to 5m.
fn timeframe_or_default(tf: Option<&str>) -> Timeframe {
    match tf.map(str::parse::<Timeframe>) {
        Some(Ok(tf)) => tf,
        Some(Err(e)) => {
            warn!(error = %e, "unknown timeframe, using 5m");
            Timeframe::M5
        }
        None => Timeframe::M5,
    }
}

// =============================================================================
// Health
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.health())
}

// =============================================================================
// Synthetic chart
// =============================================================================

#[derive(Debug, Deserialize)]
struct CandlesQuery {
    symbol: String,
    tf: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct CandlesRequest {
    symbol: String,
    tf: Option<String>,
    limit: Option<usize>,
    #[serde(default)]
    positions: Vec<TradePosition>,
}

#[derive(Debug, Serialize)]
struct CandlesResponse {
    symbol: String,
    timeframe: Timeframe,
    candles: Vec<Candle>,
    markers: Vec<EntryMarker>,
}

async fn candles_query(
    State(state): State<Arc<AppState>>,
    Query(q): Query<CandlesQuery>,
) -> impl IntoResponse {
    let timeframe = timeframe_or_default(q.tf.as_deref());
    let candles = state.get_candles(&q.symbol, timeframe, q.limit, &[]).await;
    Json(CandlesResponse {
        symbol: q.symbol,
        timeframe,
        candles,
        markers: Vec::new(),
    })
}

async fn candles_with_positions(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CandlesRequest>,
) -> impl IntoResponse {
    let timeframe = timeframe_or_default(req.tf.as_deref());
    let candles = state
        .get_candles(&req.symbol, timeframe, req.limit, &req.positions)
        .await;
    let markers = entry_markers(&req.positions, Utc::now());
    Json(CandlesResponse {
        symbol: req.symbol,
        timeframe,
        candles,
        markers,
    })
}

// =============================================================================
// Real market chart
// =============================================================================

#[derive(Debug, Deserialize)]
struct MarketQuery {
    symbol: String,
    tf: Option<String>,
}

async fn market_candles(
    State(state): State<Arc<AppState>>,
    Query(q): Query<MarketQuery>,
) -> impl IntoResponse {
    let timeframe = timeframe_or_default(q.tf.as_deref());
    Json(state.market.snapshot(&q.symbol, timeframe).await)
}

// =============================================================================
// Prices & quotes
// =============================================================================

async fn prices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.quotes.board().await)
}

#[derive(Debug, Deserialize)]
struct QuoteQuery {
    from: String,
    to: String,
    amount: f64,
}

async fn quote(
    State(state): State<Arc<AppState>>,
    Query(q): Query<QuoteQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let quote = state.quotes.quote(&q.from, &q.to, q.amount).await?;
    Ok(Json(quote))
}

// =============================================================================
// Trades
// =============================================================================

#[derive(Debug, Deserialize)]
struct OpenTradeRequest {
    symbol: String,
    side: Side,
    stake: f64,
    duration_sec: u64,
}

#[derive(Debug, Serialize)]
struct OpenTradeResponse {
    /// Stake plus entry fee, to be debited by the caller.
    total_cost: f64,
    position: TradePosition,
}

async fn open_trade(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OpenTradeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let entry_price = state
        .prices
        .fresh(&req.symbol)
        .await
        .map_err(|e| ApiError::Unavailable(format!("entry price unavailable: {e}")))?;
    let position = TradePosition::open(
        &req.symbol,
        req.side,
        req.stake,
        entry_price,
        req.duration_sec,
        &state.config,
    )?;
    Ok(Json(OpenTradeResponse {
        total_cost: position.total_cost(),
        position,
    }))
}

#[derive(Debug, Deserialize)]
struct MarkersRequest {
    #[serde(default)]
    positions: Vec<TradePosition>,
}

async fn markers(Json(req): Json<MarkersRequest>) -> impl IntoResponse {
    Json(entry_markers(&req.positions, Utc::now()))
}

#[derive(Debug, Deserialize)]
struct SettleRequest {
    position: TradePosition,
}

#[derive(Debug, Serialize)]
struct SettleResponse {
    decision: SettlementDecision,
    /// The submitted position with the decision applied.
    position: TradePosition,
}

async fn settle(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SettleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut position = req.position;
    let decision = state.settlement.settle(&position).await?;
    if decision.apply_to(&mut position) {
        info!(id = %decision.position_id, result = ?decision.result, credit = decision.credit, "position completed");
    }
    Ok(Json(SettleResponse { decision, position }))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::tests::position_at;
    use crate::runtime_config::EngineConfig;
    use crate::testing::ScriptedSource;
    use axum::body::Body;
    use axum::http::{header, Request};
    use chrono::Duration;
    use tower::ServiceExt;

    fn app(source: ScriptedSource) -> Router {
        let state = AppState::new(EngineConfig::default(), Arc::new(source));
        router(Arc::new(state))
    }

    async fn call(app: Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, body) = call(app(ScriptedSource::default()), get("/api/v1/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["bias_mode"], "FairMarket");
    }

    #[tokio::test]
    async fn candles_with_unknown_timeframe_use_five_minutes() {
        let source = ScriptedSource::with_price("BTC", 45_000.0);
        let (status, body) = call(app(source), get("/api/v1/candles?symbol=BTC&tf=7m&limit=20")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["timeframe"], "5m");
        assert_eq!(body["candles"].as_array().unwrap().len(), 20);
    }

    #[tokio::test]
    async fn candles_post_returns_markers() {
        let source = ScriptedSource::with_price("BTC", 45_000.0);
        let open = position_at(Side::Buy, 45_000.0, Utc::now(), 120);
        let body = serde_json::json!({ "symbol": "BTC", "tf": "1m", "limit": 10, "positions": [open] });

        let (status, resp) = call(app(source), post_json("/api/v1/candles", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp["candles"].as_array().unwrap().len(), 10);
        assert_eq!(resp["markers"][0]["id"], open.id);
    }

    #[tokio::test]
    async fn quote_errors_map_to_status_codes() {
        let source = ScriptedSource::with_price("BTC", 50_000.0);
        let app = app(source);

        let (status, _) = call(app.clone(), get("/api/v1/quote?from=BTC&to=BTC&amount=1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(app.clone(), get("/api/v1/quote?from=BTC&to=ETH&amount=1")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, body) = call(app, get("/api/v1/quote?from=BTC&to=USDT&amount=1")).await;
        assert_eq!(status, StatusCode::OK);
        assert!((body["amount_to"].as_f64().unwrap() - 49_000.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn prices_include_usdt() {
        let (status, body) = call(app(ScriptedSource::default()), get("/api/v1/prices")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["USDT"], 1.0);
        assert_eq!(body["BTC"], 0.0);
    }

    #[tokio::test]
    async fn open_then_settle_round_trip() {
        let source = ScriptedSource::with_price("ETH", 2_500.0);
        let body = serde_json::json!({ "symbol": "eth", "side": "sell", "stake": 10.0, "duration_sec": 60 });
        let (status, opened) = call(app(source), post_json("/api/v1/trades/open", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert!((opened["total_cost"].as_f64().unwrap() - 10.2).abs() < 1e-9);
        let opened = opened["position"].clone();
        assert_eq!(opened["symbol"], "ETH-USDT");
        assert_eq!(opened["entry_price"], 2_500.0);
        assert_eq!(opened["status"], "active");

        let mut position: TradePosition = serde_json::from_value(opened).unwrap();
        position.opened_at = Utc::now() - Duration::seconds(120);
        let source = ScriptedSource::with_price("ETH", 2_400.0);
        let (status, resp) = call(
            app(source),
            post_json("/api/v1/trades/settle", serde_json::json!({ "position": position })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let decision = &resp["decision"];
        assert_eq!(decision["result"], "win");
        assert_eq!(decision["newly_settled"], true);
        assert_eq!(decision["payout"], 7.0);

        let settled = &resp["position"];
        assert_eq!(settled["id"], position.id);
        assert_eq!(settled["status"], "completed");
        assert_eq!(settled["result"], "win");
        assert_eq!(settled["payout"], 7.0);
        assert_eq!(settled["close_price"], 2_400.0);
        assert!(settled["closed_at"].is_string());
    }

    #[tokio::test]
    async fn settle_before_expiry_returns_position_unchanged() {
        let open = position_at(Side::Buy, 100.0, Utc::now(), 600);
        let (status, resp) = call(
            app(ScriptedSource::with_price("BTC", 105.0)),
            post_json("/api/v1/trades/settle", serde_json::json!({ "position": open })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp["decision"]["status"], "active");
        assert_eq!(resp["position"]["status"], "active");
        assert!(resp["position"]["result"].is_null());
    }

    #[test]
    fn settlement_errors_map_to_status() {
        let settled = ApiError::from(SettlementError::AlreadySettled { id: "p1".into() });
        assert_eq!(settled.into_response().status(), StatusCode::CONFLICT);
        let unavailable = ApiError::from(SettlementError::PriceUnavailable {
            symbol: "BTC-USDT".into(),
            source: crate::okx::FetchError::RateLimited,
        });
        assert_eq!(unavailable.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn small_stake_is_rejected() {
        let source = ScriptedSource::with_price("BTC", 45_000.0);
        let body = serde_json::json!({ "symbol": "BTC", "side": "buy", "stake": 1.0, "duration_sec": 60 });
        let (status, resp) = call(app(source), post_json("/api/v1/trades/open", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(resp["error"].as_str().unwrap().contains("minimum"));
    }

    #[tokio::test]
    async fn settle_without_price_is_unavailable() {
        let expired = position_at(Side::Buy, 100.0, Utc::now() - Duration::seconds(120), 60);
        let (status, _) = call(
            app(ScriptedSource::default()),
            post_json("/api/v1/trades/settle", serde_json::json!({ "position": expired })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
