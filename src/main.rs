// =============================================================================
// SpotSim Engine — Main Entry Point
// =============================================================================
//
// Serves synthetic and real market charts, entry markers, quotes and binary
// option settlement over HTTP. The engine starts in FairMarket mode unless the
// configuration explicitly selects another bias mode.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod bias;
mod market_data;
mod okx;
mod position;
mod quote;
mod runtime_config;
mod settlement;
#[cfg(test)]
mod testing;
mod types;

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::runtime_config::EngineConfig;

const CONFIG_PATH: &str = "engine_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        SpotSim Engine — Starting Up                      ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = match EngineConfig::load(CONFIG_PATH) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "Failed to load config, writing defaults");
            let config = EngineConfig::default();
            if let Err(e) = config.save(CONFIG_PATH) {
                warn!(error = %e, "Failed to write default config");
            }
            config
        }
    };
    config.apply_env_overrides();

    info!(
        bias_mode = %config.bias_mode,
        okx = %config.okx_base_url,
        payout_ratio = config.payout_ratio,
        seeded = config.rng_seed.is_some(),
        "Engine configuration"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let state = Arc::new(AppState::from_config(config)?);

    // ── 3. Start the API server ──────────────────────────────────────────
    let bind_addr =
        std::env::var("SPOTSIM_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding API server to {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    let app = api::rest::router(state.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            warn!("Shutdown signal received — stopping gracefully");
        })
        .await
        .context("API server failed")?;

    // ── 4. Shutdown ──────────────────────────────────────────────────────
    let health = state.health();
    info!(
        series = health.series,
        settled = health.settled,
        uptime_secs = health.uptime_secs,
        "SpotSim Engine shut down complete."
    );
    Ok(())
}
