use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::json;

use booking_cell::router::booking_routes;
use booking_cell::BookingTransactor;
use identity_cell::router::identity_routes;
use identity_cell::IdentityService;
use reconciler_cell::router::reconciler_routes;
use reconciler_cell::ReconciliationEngine;

pub fn create_router(
    transactor: Arc<BookingTransactor>,
    identity: Arc<IdentityService>,
    engine: Arc<ReconciliationEngine>,
) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(booking_routes(transactor))
        .merge(identity_routes(identity))
        .merge(reconciler_routes(engine))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
