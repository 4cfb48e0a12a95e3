//! Service entry point
//!
//! Wires config -> logging -> Postgres -> stores/ledger/queue -> adapter
//! registry -> orchestrator -> worker pool -> axum server, with cooperative
//! shutdown on ctrl-c.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pulsagate::adapter::sim::SimAdapter;
use pulsagate::adapter::AdapterRegistry;
use pulsagate::auth::{H2hVerifier, JwtService};
use pulsagate::config::AppConfig;
use pulsagate::dispatch::{Orchestrator, Shutdown, WorkerPool};
use pulsagate::gateway::{self, AppState};
use pulsagate::ledger::PgLedger;
use pulsagate::logging::init_logging;
use pulsagate::routing::RoutingScorer;
use pulsagate::store::postgres::{
    Database, PgApiClientStore, PgDispatchQueue, PgMappingStore, PgMutationStore, PgProductStore,
    PgSupplierStore, PgTransactionStore, PgUserStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    let env = std::env::var("APP_ENV").unwrap_or_else(|_| "default".to_string());
    let config = AppConfig::load(&env)?;
    let _log_guard = init_logging(&config);

    tracing::info!(env = %env, "pulsagate starting");

    let db = Database::connect(&config.database.url, config.database.max_connections)
        .await
        .context("failed to connect to postgres")?;
    db.health_check().await.context("postgres not healthy")?;
    let pool = db.pool().clone();

    let users = Arc::new(PgUserStore::new(pool.clone()));
    let products = Arc::new(PgProductStore::new(pool.clone()));
    let suppliers = Arc::new(PgSupplierStore::new(pool.clone()));
    let mappings = Arc::new(PgMappingStore::new(pool.clone()));
    let transactions = Arc::new(PgTransactionStore::new(pool.clone()));
    let mutations = Arc::new(PgMutationStore::new(pool.clone()));
    let api_clients = Arc::new(PgApiClientStore::new(pool.clone()));
    let ledger = Arc::new(PgLedger::new(pool.clone()));
    let queue = Arc::new(
        PgDispatchQueue::new(pool.clone())
            .with_poll_interval(Duration::from_millis(config.dispatch.poll_interval_ms)),
    );

    // Register adapters. Concrete upstream integrations register here; the
    // simulator stands in for suppliers marked `testing`.
    let adapters = Arc::new(AdapterRegistry::new());
    for block in &config.suppliers {
        if block.testing {
            adapters.register(
                &block.code,
                Arc::new(SimAdapter::new(block.sim_success_ratio, 150)),
            );
            tracing::info!(code = %block.code, "registered simulator adapter");
        } else {
            tracing::warn!(
                code = %block.code,
                "no built-in adapter for supplier, expecting external registration"
            );
        }
    }

    let (shutdown_tx, shutdown) = Shutdown::channel();

    let orchestrator = Arc::new(Orchestrator::new(
        users,
        products,
        suppliers.clone(),
        mappings.clone(),
        transactions,
        mutations,
        ledger,
        adapters,
        queue.clone(),
        config.dispatch_config(),
        config.retry_policy(),
        shutdown.clone(),
    ));

    let pool_handles = WorkerPool::new(
        orchestrator.clone(),
        queue,
        config.dispatch.workers,
        Duration::from_secs(config.dispatch.sweep_interval_secs),
        shutdown.clone(),
    )
    .spawn();

    let routing = Arc::new(RoutingScorer::new(suppliers, mappings));
    let jwt = Arc::new(JwtService::new(
        &config.auth.access_secret,
        config.auth.token_ttl_hours,
        &config.auth.issuer,
        &config.auth.audience,
    ));
    let h2h = Arc::new(H2hVerifier::new(api_clients));

    let state = AppState::new(orchestrator, routing, jwt, h2h);
    let app = gateway::router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "gateway listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    })
    .await
    .context("server error")?;

    // Drain the workers: finish in-flight invocations, no new dequeues.
    let _ = shutdown_tx.send(true);
    for handle in pool_handles {
        let _ = handle.await;
    }

    tracing::info!("pulsagate stopped");
    Ok(())
}
