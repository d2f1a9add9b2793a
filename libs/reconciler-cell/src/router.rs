// libs/reconciler-cell/src/router.rs
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers;
use crate::services::engine::ReconciliationEngine;

pub fn reconciler_routes(engine: Arc<ReconciliationEngine>) -> Router {
    Router::new()
        .route("/admin/reconcile", post(handlers::trigger_run))
        .route("/admin/reconcile/reports", get(handlers::list_reports))
        .with_state(engine)
}
