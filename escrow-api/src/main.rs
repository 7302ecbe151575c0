//! Escrow trade service entry point
//!
//! Wires settings, the settlement executor, the lifecycle and the
//! gateway together and serves the HTTP surface.

mod routes;
mod settings;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use escrow_core::gateway::TradeGateway;
use escrow_core::lifecycle::{Authority, LifecycleConfig, TradeLifecycle};
use escrow_core::model::Principal;
use escrow_core::settlement::{HttpLedger, MemoryLedger, SettlementExecutor};
use escrow_core::store::TradeStore;

use crate::routes::AppState;
use crate::settings::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::load().context("failed to load settings")?;

    let (executor, backend): (Arc<dyn SettlementExecutor>, Option<Arc<HttpLedger>>) =
        if settings.settlement_backend_url.is_empty() {
            info!("no settlement backend configured, using the in-process ledger");
            (Arc::new(MemoryLedger::new()), None)
        } else {
            info!(url = %settings.settlement_backend_url, "using remote settlement backend");
            let ledger = Arc::new(HttpLedger::new(settings.settlement_backend_url.clone()));
            (ledger.clone(), Some(ledger))
        };

    let seller = Principal::new(settings.identity.seller.clone())
        .context("invalid seller identity")?;
    let buyer = Principal::new(settings.identity.buyer.clone()).context("invalid buyer identity")?;
    let arbiter =
        Principal::new(settings.identity.arbiter.clone()).context("invalid arbiter identity")?;

    let lifecycle = Arc::new(TradeLifecycle::new(
        TradeStore::new(),
        executor,
        Authority::new(arbiter.clone()),
        LifecycleConfig {
            settlement_timeout: Duration::from_secs(settings.settlement_timeout_secs),
        },
    ));

    let state = AppState {
        gateway: Arc::new(TradeGateway::new(lifecycle)),
        seller,
        buyer,
        arbiter,
        backend,
    };

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;
    info!(addr = %settings.bind_addr, "escrow service listening");
    axum::serve(listener, routes::router(state)).await?;

    Ok(())
}
