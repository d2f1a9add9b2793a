// libs/booking-cell/src/models.rs
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_store::{BookingStatus, SlotKey, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBookingRequest {
    pub patient_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingResponse {
    pub reserve_id: Uuid,
    pub status: BookingStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelActor {
    Patient,
    Staff,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelBookingRequest {
    pub actor: CancelActor,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OccupancyQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Error, Debug)]
pub enum BookingError {
    #[error("Slot {slot} is at capacity")]
    CapacityExceeded { slot: SlotKey },

    #[error("Patient already holds active booking {existing}")]
    DuplicateActiveBooking { existing: Uuid },

    #[error("Booking not found")]
    NotFound,

    #[error("Patient not found")]
    PatientNotFound,

    #[error("Booking cannot transition from {from} to {to}")]
    InvalidStatusTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    /// Slot contention outlasted the bounded internal retries; the caller
    /// should retry shortly.
    #[error("Slot temporarily busy, retry shortly")]
    Busy,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::CapacityExceeded { slot } => BookingError::CapacityExceeded { slot },
            StoreError::DuplicateActiveBooking { existing } => {
                BookingError::DuplicateActiveBooking { existing }
            }
            StoreError::BookingNotFound(_) => BookingError::NotFound,
            StoreError::PatientNotFound(_) => BookingError::PatientNotFound,
            StoreError::InvalidStatusTransition { from, to } => {
                BookingError::InvalidStatusTransition { from, to }
            }
            other => BookingError::Internal(other.to_string()),
        }
    }
}
