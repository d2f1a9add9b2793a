// libs/shared/store/src/models.rs
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Canceled,
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookingStatus::Pending => write!(f, "pending"),
            BookingStatus::Confirmed => write!(f, "confirmed"),
            BookingStatus::Canceled => write!(f, "canceled"),
        }
    }
}

/// Grouping key for capacity enforcement. Slots are not stored rows;
/// occupancy is always derived by counting active bookings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl SlotKey {
    pub fn new(date: NaiveDate, time: NaiveTime) -> Self {
        Self { date, time }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.date, self.time.format("%H:%M"))
    }
}

/// Canonical patient identity. `patient_id` is immutable once assigned;
/// a retired duplicate keeps its row with `merged_into` pointing at the
/// surviving identity so historical references keep resolving.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub patient_id: Uuid,
    pub name: String,
    pub messaging_uid: Option<String>,
    pub is_placeholder: bool,
    pub merged_into: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Patient {
    pub fn is_retired(&self) -> bool {
        self.merged_into.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub reserve_id: Uuid,
    pub patient_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn slot_key(&self) -> SlotKey {
        SlotKey::new(self.date, self.time)
    }

    pub fn is_active(&self) -> bool {
        self.status != BookingStatus::Canceled
    }
}

/// Read-optimized "current booking" snapshot per patient. Whenever
/// `reserve_id` is set it must reference an existing non-canceled booking
/// with matching date/time; the reconciler repairs divergence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientProjection {
    pub patient_id: Uuid,
    pub reserve_id: Option<Uuid>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub status: Option<BookingStatus>,
}

impl PatientProjection {
    pub fn cleared(patient_id: Uuid) -> Self {
        Self {
            patient_id,
            reserve_id: None,
            date: None,
            time: None,
            status: None,
        }
    }

    pub fn from_booking(booking: &Booking) -> Self {
        Self {
            patient_id: booking.patient_id,
            reserve_id: Some(booking.reserve_id),
            date: Some(booking.date),
            time: Some(booking.time),
            status: Some(booking.status),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.reserve_id.is_none()
    }
}

/// Staff-facing occupancy view of a slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotOccupancy {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub active_bookings: u32,
    pub capacity: u32,
}
