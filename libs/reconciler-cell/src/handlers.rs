// libs/reconciler-cell/src/handlers.rs
use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use shared_models::error::AppError;

use crate::models::{ReconcileError, RunTrigger};
use crate::services::engine::ReconciliationEngine;

impl From<ReconcileError> for AppError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::RunInProgress => AppError::Conflict(err.to_string()),
            ReconcileError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

#[axum::debug_handler]
pub async fn trigger_run(
    State(engine): State<Arc<ReconciliationEngine>>,
) -> Result<Json<Value>, AppError> {
    let report = engine.run(RunTrigger::Manual).await?;
    Ok(Json(json!(report)))
}

#[axum::debug_handler]
pub async fn list_reports(
    State(engine): State<Arc<ReconciliationEngine>>,
) -> Result<Json<Value>, AppError> {
    let reports = engine.list_reports().await;
    Ok(Json(json!({ "reports": reports })))
}
