// libs/shared/store/src/store.rs
//
// Primary store for patients, bookings and patient projections. Every
// multi-row mutation runs inside one short write-locked critical section,
// which is the serializable unit the booking transactor relies on. Slot
// contention is additionally serialized by per-(date,time) async mutexes
// so unrelated slots never queue behind each other.

use chrono::{NaiveDate, NaiveTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use shared_config::DuplicatePolicy;

use crate::models::{Booking, BookingStatus, Patient, PatientProjection, SlotKey, SlotOccupancy};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Slot {slot} is at capacity")]
    CapacityExceeded { slot: SlotKey },

    #[error("Patient already holds active booking {existing}")]
    DuplicateActiveBooking { existing: Uuid },

    #[error("Booking not found: {0}")]
    BookingNotFound(Uuid),

    #[error("Patient not found: {0}")]
    PatientNotFound(Uuid),

    #[error("Booking cannot transition from {from} to {to}")]
    InvalidStatusTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("Placeholder identity {0} cannot be a merge primary")]
    PlaceholderPrimary(Uuid),
}

/// Result of a successful create: the new booking plus the prior booking
/// canceled by the replace-prior policy, if any. Both need a ledger sync.
#[derive(Debug, Clone)]
pub struct CreatedBooking {
    pub booking: Booking,
    pub replaced: Option<Booking>,
}

#[derive(Default)]
struct Tables {
    patients: HashMap<Uuid, Patient>,
    bookings: HashMap<Uuid, Booking>,
    projections: HashMap<Uuid, PatientProjection>,
    capacity_overrides: HashMap<SlotKey, u32>,
}

impl Tables {
    fn capacity(&self, slot: &SlotKey, default_capacity: u32) -> u32 {
        self.capacity_overrides
            .get(slot)
            .copied()
            .unwrap_or(default_capacity)
    }

    fn active_count(&self, slot: &SlotKey) -> u32 {
        self.bookings
            .values()
            .filter(|b| b.is_active() && b.slot_key() == *slot)
            .count() as u32
    }

    fn active_booking_for_patient(&self, patient_id: Uuid) -> Option<Booking> {
        self.bookings
            .values()
            .find(|b| b.is_active() && b.patient_id == patient_id)
            .cloned()
    }

    /// Follow merged_into links to the surviving identity. Chains are
    /// short in practice; the bound guards against a cycle introduced by
    /// a corrupted merge.
    fn canonical_patient_id(&self, patient_id: Uuid) -> Option<Uuid> {
        let mut current = patient_id;
        for _ in 0..16 {
            match self.patients.get(&current) {
                Some(p) => match p.merged_into {
                    Some(next) => current = next,
                    None => return Some(current),
                },
                None => return None,
            }
        }
        None
    }

    fn cancel_booking_row(&mut self, reserve_id: Uuid) -> Option<Booking> {
        let booking = self.bookings.get_mut(&reserve_id)?;
        booking.status = BookingStatus::Canceled;
        booking.updated_at = Utc::now();
        let canceled = booking.clone();

        // Clear the projection only if it still points at this booking,
        // otherwise a newer booking's snapshot would be wiped.
        if let Some(projection) = self.projections.get_mut(&canceled.patient_id) {
            if projection.reserve_id == Some(reserve_id) {
                *projection = PatientProjection::cleared(canceled.patient_id);
            }
        }

        Some(canceled)
    }
}

pub struct ClinicStore {
    tables: RwLock<Tables>,
    slot_locks: StdMutex<HashMap<SlotKey, Arc<Mutex<()>>>>,
    default_capacity: u32,
}

impl ClinicStore {
    pub fn new(default_capacity: u32) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            slot_locks: StdMutex::new(HashMap::new()),
            default_capacity: default_capacity.max(1),
        }
    }

    /// Per-slot mutex used by the transactor to bound contention on one
    /// (date, time) without serializing unrelated slots.
    pub fn slot_guard(&self, slot: SlotKey) -> Arc<Mutex<()>> {
        let mut locks = self.slot_locks.lock().expect("slot lock table poisoned");
        locks.entry(slot).or_default().clone()
    }

    // ------------------------------------------------------------------
    // Patients
    // ------------------------------------------------------------------

    pub async fn register_patient(
        &self,
        name: String,
        messaging_uid: Option<String>,
        is_placeholder: bool,
    ) -> Patient {
        let now = Utc::now();
        let patient = Patient {
            patient_id: Uuid::new_v4(),
            name,
            messaging_uid,
            is_placeholder,
            merged_into: None,
            created_at: now,
            updated_at: now,
        };
        let mut tables = self.tables.write().await;
        tables.patients.insert(patient.patient_id, patient.clone());
        debug!("Registered patient {}", patient.patient_id);
        patient
    }

    pub async fn patient(&self, patient_id: Uuid) -> Option<Patient> {
        self.tables.read().await.patients.get(&patient_id).cloned()
    }

    /// Resolve a possibly-retired patient id to its surviving identity.
    pub async fn canonical_patient(&self, patient_id: Uuid) -> Option<Patient> {
        let tables = self.tables.read().await;
        let canonical = tables.canonical_patient_id(patient_id)?;
        tables.patients.get(&canonical).cloned()
    }

    /// Live (non-retired) patients carrying the given messaging uid.
    pub async fn patients_by_messaging_uid(&self, messaging_uid: &str) -> Vec<Patient> {
        self.tables
            .read()
            .await
            .patients
            .values()
            .filter(|p| !p.is_retired() && p.messaging_uid.as_deref() == Some(messaging_uid))
            .cloned()
            .collect()
    }

    pub async fn patients_snapshot(&self) -> Vec<Patient> {
        self.tables.read().await.patients.values().cloned().collect()
    }

    /// Reassign every row owned by `duplicate_id` to `primary_id`, union
    /// non-null fields preferring the more recently updated value, and
    /// retire the duplicate. A placeholder duplicate contributes its
    /// bookings and at most a uid backfill, never its name. Idempotent:
    /// merging an already-merged pair reassigns nothing.
    pub async fn merge_patients(
        &self,
        primary_id: Uuid,
        duplicate_id: Uuid,
    ) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;

        let primary = tables
            .patients
            .get(&primary_id)
            .cloned()
            .ok_or(StoreError::PatientNotFound(primary_id))?;
        let duplicate = tables
            .patients
            .get(&duplicate_id)
            .cloned()
            .ok_or(StoreError::PatientNotFound(duplicate_id))?;

        if primary.is_placeholder {
            return Err(StoreError::PlaceholderPrimary(primary_id));
        }
        if duplicate.merged_into == Some(primary_id) {
            return Ok(0);
        }

        let mut rows_reassigned = 0usize;

        for booking in tables.bookings.values_mut() {
            if booking.patient_id == duplicate_id {
                booking.patient_id = primary_id;
                booking.updated_at = Utc::now();
                rows_reassigned += 1;
            }
        }

        // Fold the duplicate's projection into the primary's slot when the
        // primary has no current booking of its own.
        if let Some(dup_projection) = tables.projections.remove(&duplicate_id) {
            if !dup_projection.is_empty() {
                let keep_primary = tables
                    .projections
                    .get(&primary_id)
                    .map(|p| !p.is_empty())
                    .unwrap_or(false);
                if !keep_primary {
                    rows_reassigned += 1;
                    tables.projections.insert(
                        primary_id,
                        PatientProjection {
                            patient_id: primary_id,
                            ..dup_projection
                        },
                    );
                }
            }
        }

        let now = Utc::now();
        let prefer_duplicate = duplicate.updated_at > primary.updated_at;
        {
            let primary_row = tables
                .patients
                .get_mut(&primary_id)
                .ok_or(StoreError::PatientNotFound(primary_id))?;
            // A placeholder's name is never canonical.
            if !duplicate.is_placeholder
                && (primary_row.name.is_empty() || (prefer_duplicate && !duplicate.name.is_empty()))
            {
                primary_row.name = duplicate.name.clone();
            }
            if primary_row.messaging_uid.is_none() {
                primary_row.messaging_uid = duplicate.messaging_uid.clone();
            }
            primary_row.updated_at = now;
        }
        {
            let duplicate_row = tables
                .patients
                .get_mut(&duplicate_id)
                .ok_or(StoreError::PatientNotFound(duplicate_id))?;
            duplicate_row.messaging_uid = None;
            duplicate_row.merged_into = Some(primary_id);
            duplicate_row.updated_at = now;
        }

        debug!(
            "Merged patient {} into {} ({} rows reassigned)",
            duplicate_id, primary_id, rows_reassigned
        );
        Ok(rows_reassigned)
    }

    // ------------------------------------------------------------------
    // Bookings
    // ------------------------------------------------------------------

    /// The booking transaction: capacity check, per-patient uniqueness
    /// check, booking insert and projection upsert, all under one write
    /// lock. Callers serialize per slot via `slot_guard` first.
    pub async fn create_booking(
        &self,
        patient_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        policy: DuplicatePolicy,
    ) -> Result<CreatedBooking, StoreError> {
        let slot = SlotKey::new(date, time);
        let mut tables = self.tables.write().await;

        let canonical_id = tables
            .canonical_patient_id(patient_id)
            .ok_or(StoreError::PatientNotFound(patient_id))?;

        // Replace-prior cancels before the capacity count so rebooking the
        // same slot cannot fail against the patient's own old reservation.
        let mut replaced = None;
        if let Some(existing) = tables.active_booking_for_patient(canonical_id) {
            match policy {
                DuplicatePolicy::Reject => {
                    let capacity = tables.capacity(&slot, self.default_capacity);
                    if tables.active_count(&slot) >= capacity {
                        return Err(StoreError::CapacityExceeded { slot });
                    }
                    return Err(StoreError::DuplicateActiveBooking {
                        existing: existing.reserve_id,
                    });
                }
                DuplicatePolicy::ReplacePrior => {
                    replaced = tables.cancel_booking_row(existing.reserve_id);
                }
            }
        }

        let capacity = tables.capacity(&slot, self.default_capacity);
        if tables.active_count(&slot) >= capacity {
            return Err(StoreError::CapacityExceeded { slot });
        }

        let now = Utc::now();
        let booking = Booking {
            reserve_id: Uuid::new_v4(),
            patient_id: canonical_id,
            date,
            time,
            status: BookingStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        tables.bookings.insert(booking.reserve_id, booking.clone());
        tables
            .projections
            .insert(canonical_id, PatientProjection::from_booking(&booking));

        Ok(CreatedBooking { booking, replaced })
    }

    /// Cancel a booking and, in the same critical section, clear the
    /// projection if it still points at the canceled reservation (the
    /// ghost-booking defect). Canceling twice is a no-op.
    pub async fn cancel_booking(&self, reserve_id: Uuid) -> Result<Booking, StoreError> {
        let mut tables = self.tables.write().await;
        let existing = tables
            .bookings
            .get(&reserve_id)
            .cloned()
            .ok_or(StoreError::BookingNotFound(reserve_id))?;
        if existing.status == BookingStatus::Canceled {
            return Ok(existing);
        }
        tables
            .cancel_booking_row(reserve_id)
            .ok_or(StoreError::BookingNotFound(reserve_id))
    }

    /// Staff confirmation: pending -> confirmed. Confirming twice is a
    /// no-op; confirming a canceled booking is rejected.
    pub async fn confirm_booking(&self, reserve_id: Uuid) -> Result<Booking, StoreError> {
        let mut tables = self.tables.write().await;
        let booking = tables
            .bookings
            .get_mut(&reserve_id)
            .ok_or(StoreError::BookingNotFound(reserve_id))?;
        match booking.status {
            BookingStatus::Pending => {
                booking.status = BookingStatus::Confirmed;
                booking.updated_at = Utc::now();
            }
            BookingStatus::Confirmed => {}
            BookingStatus::Canceled => {
                return Err(StoreError::InvalidStatusTransition {
                    from: BookingStatus::Canceled,
                    to: BookingStatus::Confirmed,
                });
            }
        }
        let confirmed = booking.clone();

        if let Some(projection) = tables.projections.get_mut(&confirmed.patient_id) {
            if projection.reserve_id == Some(reserve_id) {
                projection.status = Some(confirmed.status);
            }
        }

        Ok(confirmed)
    }

    pub async fn booking(&self, reserve_id: Uuid) -> Option<Booking> {
        self.tables.read().await.bookings.get(&reserve_id).cloned()
    }

    pub async fn active_booking_for_patient(&self, patient_id: Uuid) -> Option<Booking> {
        self.tables.read().await.active_booking_for_patient(patient_id)
    }

    pub async fn bookings_snapshot(&self) -> Vec<Booking> {
        self.tables.read().await.bookings.values().cloned().collect()
    }

    pub async fn bookings_in_window(&self, from: NaiveDate, to: NaiveDate) -> Vec<Booking> {
        self.tables
            .read()
            .await
            .bookings
            .values()
            .filter(|b| b.date >= from && b.date <= to)
            .cloned()
            .collect()
    }

    /// Earliest and latest booking dates, used to bound ledger fetches.
    pub async fn booking_date_bounds(&self) -> Option<(NaiveDate, NaiveDate)> {
        let tables = self.tables.read().await;
        let mut dates = tables.bookings.values().map(|b| b.date);
        let first = dates.next()?;
        let (min, max) = dates.fold((first, first), |(lo, hi), d| (lo.min(d), hi.max(d)));
        Some((min, max))
    }

    // ------------------------------------------------------------------
    // Slots
    // ------------------------------------------------------------------

    pub async fn set_slot_capacity(&self, slot: SlotKey, capacity: u32) {
        let mut tables = self.tables.write().await;
        tables.capacity_overrides.insert(slot, capacity.max(1));
    }

    pub async fn slot_capacity(&self, slot: SlotKey) -> u32 {
        self.tables.read().await.capacity(&slot, self.default_capacity)
    }

    pub async fn slot_occupancy(&self, from: NaiveDate, to: NaiveDate) -> Vec<SlotOccupancy> {
        let tables = self.tables.read().await;
        let mut counts: HashMap<SlotKey, u32> = HashMap::new();
        for booking in tables.bookings.values() {
            if booking.is_active() && booking.date >= from && booking.date <= to {
                *counts.entry(booking.slot_key()).or_default() += 1;
            }
        }
        let mut occupancy: Vec<SlotOccupancy> = counts
            .into_iter()
            .map(|(slot, active)| SlotOccupancy {
                date: slot.date,
                time: slot.time,
                active_bookings: active,
                capacity: tables.capacity(&slot, self.default_capacity),
            })
            .collect();
        occupancy.sort_by_key(|o| (o.date, o.time));
        occupancy
    }

    // ------------------------------------------------------------------
    // Projections
    // ------------------------------------------------------------------

    pub async fn projection(&self, patient_id: Uuid) -> Option<PatientProjection> {
        self.tables.read().await.projections.get(&patient_id).cloned()
    }

    pub async fn projections_snapshot(&self) -> Vec<PatientProjection> {
        self.tables
            .read()
            .await
            .projections
            .values()
            .cloned()
            .collect()
    }

    /// Raw projection write. The transactor and the reconciler keep the
    /// invariant themselves; this seam exists for intake backfills and
    /// for manufacturing divergence in tests.
    pub async fn put_projection(&self, projection: PatientProjection) {
        let mut tables = self.tables.write().await;
        tables.projections.insert(projection.patient_id, projection);
    }

    /// Reconciler repair: clear a projection, but only while it still
    /// references the expected reservation. Returns false when live
    /// traffic moved the projection on since the snapshot was taken.
    pub async fn clear_projection_if(&self, patient_id: Uuid, expected: Uuid) -> bool {
        let mut tables = self.tables.write().await;
        match tables.projections.get_mut(&patient_id) {
            Some(projection) if projection.reserve_id == Some(expected) => {
                *projection = PatientProjection::cleared(patient_id);
                true
            }
            _ => false,
        }
    }

    /// Reconciler repair: rewrite a projection from its authoritative
    /// booking row.
    pub async fn repair_projection_from_booking(
        &self,
        reserve_id: Uuid,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let booking = tables
            .bookings
            .get(&reserve_id)
            .cloned()
            .ok_or(StoreError::BookingNotFound(reserve_id))?;
        tables
            .projections
            .insert(booking.patient_id, PatientProjection::from_booking(&booking));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{NaiveDate, NaiveTime};

    fn slot() -> (NaiveDate, NaiveTime) {
        (
            NaiveDate::from_ymd_opt(2026, 2, 20).unwrap(),
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn capacity_is_enforced_inside_the_transaction() {
        let store = ClinicStore::new(1);
        let (date, time) = slot();
        let p1 = store.register_patient("Ada".into(), None, false).await;
        let p2 = store.register_patient("Grace".into(), None, false).await;

        store
            .create_booking(p1.patient_id, date, time, DuplicatePolicy::Reject)
            .await
            .unwrap();
        let err = store
            .create_booking(p2.patient_id, date, time, DuplicatePolicy::Reject)
            .await
            .unwrap_err();
        assert_matches!(err, StoreError::CapacityExceeded { .. });
    }

    #[tokio::test]
    async fn duplicate_policy_reject_keeps_the_prior_booking() {
        let store = ClinicStore::new(2);
        let (date, time) = slot();
        let p = store.register_patient("Ada".into(), None, false).await;

        let first = store
            .create_booking(p.patient_id, date, time, DuplicatePolicy::Reject)
            .await
            .unwrap();
        let err = store
            .create_booking(p.patient_id, date, time, DuplicatePolicy::Reject)
            .await
            .unwrap_err();
        assert_matches!(err, StoreError::DuplicateActiveBooking { existing }
            if existing == first.booking.reserve_id);
    }

    #[tokio::test]
    async fn duplicate_policy_replace_cancels_the_prior_booking() {
        let store = ClinicStore::new(2);
        let (date, time) = slot();
        let p = store.register_patient("Ada".into(), None, false).await;

        let first = store
            .create_booking(p.patient_id, date, time, DuplicatePolicy::ReplacePrior)
            .await
            .unwrap();
        let second = store
            .create_booking(p.patient_id, date, time, DuplicatePolicy::ReplacePrior)
            .await
            .unwrap();

        let replaced = second.replaced.expect("prior booking should be canceled");
        assert_eq!(replaced.reserve_id, first.booking.reserve_id);
        assert_eq!(replaced.status, BookingStatus::Canceled);

        let projection = store.projection(p.patient_id).await.unwrap();
        assert_eq!(projection.reserve_id, Some(second.booking.reserve_id));
    }

    #[tokio::test]
    async fn cancel_clears_a_matching_projection() {
        let store = ClinicStore::new(1);
        let (date, time) = slot();
        let p = store.register_patient("Ada".into(), None, false).await;

        let created = store
            .create_booking(p.patient_id, date, time, DuplicatePolicy::Reject)
            .await
            .unwrap();
        store.cancel_booking(created.booking.reserve_id).await.unwrap();

        let projection = store.projection(p.patient_id).await.unwrap();
        assert!(projection.is_empty());

        // Second cancel is a no-op, history stays put.
        let again = store.cancel_booking(created.booking.reserve_id).await.unwrap();
        assert_eq!(again.status, BookingStatus::Canceled);
    }

    #[tokio::test]
    async fn confirm_rejects_canceled_bookings() {
        let store = ClinicStore::new(1);
        let (date, time) = slot();
        let p = store.register_patient("Ada".into(), None, false).await;

        let created = store
            .create_booking(p.patient_id, date, time, DuplicatePolicy::Reject)
            .await
            .unwrap();
        store.cancel_booking(created.booking.reserve_id).await.unwrap();

        let err = store
            .confirm_booking(created.booking.reserve_id)
            .await
            .unwrap_err();
        assert_matches!(err, StoreError::InvalidStatusTransition { .. });
    }

    #[tokio::test]
    async fn merge_is_idempotent_and_reassigns_history() {
        let store = ClinicStore::new(4);
        let (date, time) = slot();
        let primary = store
            .register_patient("Ada L".into(), Some("U-1".into()), false)
            .await;
        let duplicate = store
            .register_patient("Ada".into(), Some("U-1".into()), false)
            .await;

        let created = store
            .create_booking(duplicate.patient_id, date, time, DuplicatePolicy::Reject)
            .await
            .unwrap();

        let first = store
            .merge_patients(primary.patient_id, duplicate.patient_id)
            .await
            .unwrap();
        assert!(first >= 1);

        let second = store
            .merge_patients(primary.patient_id, duplicate.patient_id)
            .await
            .unwrap();
        assert_eq!(second, 0);

        let booking = store.booking(created.booking.reserve_id).await.unwrap();
        assert_eq!(booking.patient_id, primary.patient_id);

        let retired = store.patient(duplicate.patient_id).await.unwrap();
        assert_eq!(retired.merged_into, Some(primary.patient_id));
        assert!(retired.messaging_uid.is_none());

        // Lookups through the retired id land on the primary.
        let canonical = store.canonical_patient(duplicate.patient_id).await.unwrap();
        assert_eq!(canonical.patient_id, primary.patient_id);
    }

    #[tokio::test]
    async fn merge_never_takes_the_name_of_a_placeholder() {
        let store = ClinicStore::new(1);
        // The placeholder is registered after the real patient, so its
        // updated_at is newer; the real name must still survive.
        let real = store
            .register_patient("Ada Lovelace".into(), Some("U-7".into()), false)
            .await;
        let placeholder = store
            .register_patient("fallback".into(), Some("U-7".into()), true)
            .await;

        store
            .merge_patients(real.patient_id, placeholder.patient_id)
            .await
            .unwrap();

        let surviving = store.patient(real.patient_id).await.unwrap();
        assert_eq!(surviving.name, "Ada Lovelace");
        assert_eq!(surviving.messaging_uid, Some("U-7".into()));
    }

    #[tokio::test]
    async fn merge_does_not_count_a_dropped_duplicate_projection() {
        let store = ClinicStore::new(2);
        let (date, time) = slot();
        let other_time = NaiveTime::from_hms_opt(11, 0, 0).unwrap();
        let primary = store.register_patient("Ada".into(), None, false).await;
        let duplicate = store.register_patient("Ada dup".into(), None, false).await;

        store
            .create_booking(primary.patient_id, date, time, DuplicatePolicy::Reject)
            .await
            .unwrap();
        store
            .create_booking(duplicate.patient_id, date, other_time, DuplicatePolicy::Reject)
            .await
            .unwrap();

        // The primary keeps its own projection; the duplicate's is dropped
        // and must not be counted, leaving only the reassigned booking.
        let rows = store
            .merge_patients(primary.patient_id, duplicate.patient_id)
            .await
            .unwrap();
        assert_eq!(rows, 1);

        let projection = store.projection(primary.patient_id).await.unwrap();
        assert_eq!(projection.time, Some(time));
    }

    #[tokio::test]
    async fn merge_refuses_a_placeholder_primary() {
        let store = ClinicStore::new(1);
        let placeholder = store
            .register_patient("fallback".into(), Some("U-9".into()), true)
            .await;
        let real = store
            .register_patient("Ada".into(), Some("U-9".into()), false)
            .await;

        let err = store
            .merge_patients(placeholder.patient_id, real.patient_id)
            .await
            .unwrap_err();
        assert_matches!(err, StoreError::PlaceholderPrimary(_));
    }

    #[tokio::test]
    async fn booking_through_a_retired_id_lands_on_the_primary() {
        let store = ClinicStore::new(1);
        let (date, time) = slot();
        let primary = store
            .register_patient("Ada".into(), Some("U-2".into()), false)
            .await;
        let duplicate = store
            .register_patient("Ada dup".into(), Some("U-2".into()), false)
            .await;
        store
            .merge_patients(primary.patient_id, duplicate.patient_id)
            .await
            .unwrap();

        let created = store
            .create_booking(duplicate.patient_id, date, time, DuplicatePolicy::Reject)
            .await
            .unwrap();
        assert_eq!(created.booking.patient_id, primary.patient_id);
    }
}
