// libs/identity-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::error::AppError;

use crate::models::{
    IdentityError, MergeIdentitiesRequest, MergeIdentitiesResponse, RegisterPatientRequest,
    ResolveQuery,
};
use crate::services::resolution::IdentityService;

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::UnknownMessagingUid(_) | IdentityError::PatientNotFound(_) => {
                AppError::NotFound(err.to_string())
            }
            IdentityError::IdentityConflict { .. } => AppError::Conflict(err.to_string()),
            IdentityError::PlaceholderPrimary(_) | IdentityError::SelfMerge => {
                AppError::BadRequest(err.to_string())
            }
            IdentityError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

#[axum::debug_handler]
pub async fn register_patient(
    State(service): State<Arc<IdentityService>>,
    Json(request): Json<RegisterPatientRequest>,
) -> Result<Json<Value>, AppError> {
    if request.name.trim().is_empty() {
        return Err(AppError::BadRequest("Patient name must not be empty".to_string()));
    }
    let patient = service
        .register_patient(request.name, request.messaging_uid, request.is_placeholder)
        .await;
    Ok(Json(json!(patient)))
}

#[axum::debug_handler]
pub async fn get_patient(
    State(service): State<Arc<IdentityService>>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let patient = service.get_patient(patient_id).await?;
    Ok(Json(json!(patient)))
}

#[axum::debug_handler]
pub async fn resolve_identity(
    State(service): State<Arc<IdentityService>>,
    Query(query): Query<ResolveQuery>,
) -> Result<Json<Value>, AppError> {
    let patient_id = service.resolve_identity(&query.messaging_uid).await?;
    Ok(Json(json!({ "patient_id": patient_id })))
}

#[axum::debug_handler]
pub async fn merge_identities(
    State(service): State<Arc<IdentityService>>,
    Json(request): Json<MergeIdentitiesRequest>,
) -> Result<Json<MergeIdentitiesResponse>, AppError> {
    let rows_reassigned = service
        .merge_identities(request.primary_id, request.duplicate_id)
        .await?;
    Ok(Json(MergeIdentitiesResponse { rows_reassigned }))
}

#[axum::debug_handler]
pub async fn list_collisions(
    State(service): State<Arc<IdentityService>>,
) -> Result<Json<Value>, AppError> {
    let collisions = service.find_collisions().await;
    Ok(Json(json!({ "collisions": collisions })))
}
