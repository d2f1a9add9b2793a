// libs/booking-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::error::AppError;

use crate::models::{
    BookingError, BookingResponse, CancelBookingRequest, CreateBookingRequest, OccupancyQuery,
};
use crate::services::transactor::BookingTransactor;

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::CapacityExceeded { .. } => AppError::Conflict(err.to_string()),
            BookingError::DuplicateActiveBooking { .. } => AppError::Conflict(err.to_string()),
            BookingError::InvalidStatusTransition { .. } => AppError::Conflict(err.to_string()),
            BookingError::NotFound => AppError::NotFound("Booking not found".to_string()),
            BookingError::PatientNotFound => AppError::NotFound("Patient not found".to_string()),
            BookingError::Busy => AppError::Busy(err.to_string()),
            BookingError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

#[axum::debug_handler]
pub async fn create_booking(
    State(transactor): State<Arc<BookingTransactor>>,
    Json(request): Json<CreateBookingRequest>,
) -> Result<Json<BookingResponse>, AppError> {
    let booking = transactor
        .create_booking(request.patient_id, request.date, request.time)
        .await?;

    Ok(Json(BookingResponse {
        reserve_id: booking.reserve_id,
        status: booking.status,
    }))
}

#[axum::debug_handler]
pub async fn get_booking(
    State(transactor): State<Arc<BookingTransactor>>,
    Path(reserve_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let booking = transactor
        .booking(reserve_id)
        .await
        .ok_or_else(|| AppError::NotFound("Booking not found".to_string()))?;
    Ok(Json(json!(booking)))
}

#[axum::debug_handler]
pub async fn cancel_booking(
    State(transactor): State<Arc<BookingTransactor>>,
    Path(reserve_id): Path<Uuid>,
    Json(request): Json<CancelBookingRequest>,
) -> Result<Json<Value>, AppError> {
    let canceled = transactor.cancel_booking(reserve_id, request.actor).await?;
    Ok(Json(json!({
        "reserve_id": canceled.reserve_id,
        "status": canceled.status
    })))
}

#[axum::debug_handler]
pub async fn confirm_booking(
    State(transactor): State<Arc<BookingTransactor>>,
    Path(reserve_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let confirmed = transactor.confirm_booking(reserve_id).await?;
    Ok(Json(json!({
        "reserve_id": confirmed.reserve_id,
        "status": confirmed.status
    })))
}

#[axum::debug_handler]
pub async fn get_current_booking(
    State(transactor): State<Arc<BookingTransactor>>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let projection = transactor.current_booking(patient_id).await;
    Ok(Json(json!(projection)))
}

#[axum::debug_handler]
pub async fn get_slot_occupancy(
    State(transactor): State<Arc<BookingTransactor>>,
    Query(query): Query<OccupancyQuery>,
) -> Result<Json<Value>, AppError> {
    if query.from > query.to {
        return Err(AppError::BadRequest(
            "'from' must not be after 'to'".to_string(),
        ));
    }
    let occupancy = transactor.slot_occupancy(query.from, query.to).await;
    Ok(Json(json!({ "slots": occupancy })))
}
