// libs/identity-cell/src/router.rs
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers;
use crate::services::resolution::IdentityService;

pub fn identity_routes(service: Arc<IdentityService>) -> Router {
    Router::new()
        .route("/patients", post(handlers::register_patient))
        .route("/patients/{patient_id}", get(handlers::get_patient))
        .route("/identities/resolve", get(handlers::resolve_identity))
        .route("/admin/identities/merge", post(handlers::merge_identities))
        .route("/admin/identities/collisions", get(handlers::list_collisions))
        .with_state(service)
}
