// libs/ledger-cell/src/models.rs
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_store::{Booking, BookingStatus};

/// The flat record shape the external ledger reads and writes. The
/// service addresses rows by reserve_id; everything else is a copy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub reserve_id: Uuid,
    pub patient_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: BookingStatus,
}

impl LedgerEntry {
    pub fn from_booking(booking: &Booking) -> Self {
        Self {
            reserve_id: booking.reserve_id,
            patient_id: booking.patient_id,
            date: booking.date,
            time: booking.time,
            status: booking.status,
        }
    }

    /// True when the entry already mirrors the booking; a stale entry
    /// needs a re-push, the booking being authoritative.
    pub fn matches_booking(&self, booking: &Booking) -> bool {
        self.status == booking.status && self.date == booking.date && self.time == booking.time
    }
}
