// libs/booking-cell/src/router.rs
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers;
use crate::services::transactor::BookingTransactor;

pub fn booking_routes(transactor: Arc<BookingTransactor>) -> Router {
    Router::new()
        .route("/bookings", post(handlers::create_booking))
        .route("/bookings/{reserve_id}", get(handlers::get_booking))
        .route("/bookings/{reserve_id}/cancel", post(handlers::cancel_booking))
        .route("/bookings/{reserve_id}/confirm", post(handlers::confirm_booking))
        .route("/patients/{patient_id}/booking", get(handlers::get_current_booking))
        .route("/slots/occupancy", get(handlers::get_slot_occupancy))
        .with_state(transactor)
}
