use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{error, info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use booking_cell::BookingTransactor;
use identity_cell::IdentityService;
use ledger_cell::{LedgerClient, LedgerSyncQueue};
use reconciler_cell::models::RunTrigger;
use reconciler_cell::{ReconcileError, ReconciliationEngine};
use shared_config::AppConfig;
use shared_store::ClinicStore;

#[tokio::main]
async fn main() {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting clinic scheduling API server");

    // Load configuration
    let config = AppConfig::from_env();

    // Shared primary store and ledger plumbing
    let store = Arc::new(ClinicStore::new(config.default_slot_capacity));
    let ledger = Arc::new(LedgerClient::new(&config));
    let sync_queue = LedgerSyncQueue::spawn(store.clone(), ledger.clone());

    let transactor = Arc::new(BookingTransactor::new(
        store.clone(),
        sync_queue.clone(),
        &config,
    ));
    let identity = Arc::new(IdentityService::new(store.clone()));
    let engine = Arc::new(ReconciliationEngine::new(
        store.clone(),
        ledger.clone(),
        identity.clone(),
        &config,
    ));

    if config.reconcile_interval_seconds > 0 {
        spawn_reconcile_scheduler(engine.clone(), config.reconcile_interval_seconds);
    }

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(transactor, identity, engine)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await.expect("bind failed");
    axum::serve(listener, app).await.expect("server error");
}

/// Background trigger for periodic reconciliation. A run that overlaps a
/// still-active one is simply skipped; the lease keeps runs exclusive.
fn spawn_reconcile_scheduler(engine: Arc<ReconciliationEngine>, interval_seconds: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match engine.run(RunTrigger::Scheduled).await {
                Ok(report) => {
                    info!(
                        "Scheduled reconciliation run {} finished with {} entries",
                        report.run_id,
                        report.entries.len()
                    );
                }
                Err(ReconcileError::RunInProgress) => {
                    info!("Skipping scheduled reconciliation, a run is already active");
                }
                Err(e) => error!("Scheduled reconciliation failed: {}", e),
            }
        }
    });
}
