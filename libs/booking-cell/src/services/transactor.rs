// libs/booking-cell/src/services/transactor.rs
//
// The single entry point for booking mutations. Capacity and per-patient
// uniqueness are validated inside the store's critical section, never
// before it; the per-slot mutex bounds contention so two concurrent
// requests for the last remaining place cannot both observe a free slot.
// Ledger sync happens strictly after commit and is fire-and-forget.

use chrono::{NaiveDate, NaiveTime};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use ledger_cell::LedgerSyncQueue;
use shared_config::AppConfig;
use shared_store::{Booking, ClinicStore, PatientProjection, SlotKey, SlotOccupancy, StoreError};

use crate::models::{BookingError, CancelActor};

pub struct BookingTransactor {
    store: Arc<ClinicStore>,
    sync_queue: Arc<LedgerSyncQueue>,
    config: AppConfig,
}

impl BookingTransactor {
    pub fn new(
        store: Arc<ClinicStore>,
        sync_queue: Arc<LedgerSyncQueue>,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            sync_queue,
            config: config.clone(),
        }
    }

    #[instrument(skip(self))]
    pub async fn create_booking(
        &self,
        patient_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<Booking, BookingError> {
        let slot = SlotKey::new(date, time);
        let attempts = self.config.booking_retry_attempts.max(1);

        for attempt in 1..=attempts {
            let guard = self.store.slot_guard(slot);
            let lock_wait = Duration::from_millis(self.config.slot_lock_wait_ms);

            let acquired = tokio::time::timeout(lock_wait, guard.lock()).await;
            match acquired {
                Ok(_held) => {
                    let created = self
                        .store
                        .create_booking(
                            patient_id,
                            date,
                            time,
                            self.config.duplicate_booking_policy,
                        )
                        .await;
                    return match created {
                        Ok(created) => {
                            info!(
                                "Booked {} for patient {} at {}",
                                created.booking.reserve_id, patient_id, slot
                            );
                            if let Some(replaced) = &created.replaced {
                                self.sync_queue.enqueue(replaced.reserve_id).await;
                            }
                            self.sync_queue.enqueue(created.booking.reserve_id).await;
                            Ok(created.booking)
                        }
                        // Business rejections surface as-is, never retried.
                        Err(e) => Err(e.into()),
                    };
                }
                Err(_) if attempt < attempts => {
                    warn!(
                        "Slot {} lock wait exceeded, retry {}/{}",
                        slot, attempt, attempts
                    );
                    tokio::time::sleep(Duration::from_millis(
                        self.config.booking_retry_backoff_ms * attempt as u64,
                    ))
                    .await;
                }
                Err(_) => break,
            }
        }

        Err(BookingError::Busy)
    }

    #[instrument(skip(self))]
    pub async fn cancel_booking(
        &self,
        reserve_id: Uuid,
        actor: CancelActor,
    ) -> Result<Booking, BookingError> {
        let booking = self
            .store
            .booking(reserve_id)
            .await
            .ok_or(BookingError::NotFound)?;

        let guard = self.store.slot_guard(booking.slot_key());
        let lock_wait = Duration::from_millis(self.config.slot_lock_wait_ms);
        let _held = tokio::time::timeout(lock_wait, guard.lock())
            .await
            .map_err(|_| BookingError::Busy)?;

        let canceled = self.store.cancel_booking(reserve_id).await?;
        info!("Canceled {} (actor {:?})", reserve_id, actor);
        self.sync_queue.enqueue(reserve_id).await;
        Ok(canceled)
    }

    #[instrument(skip(self))]
    pub async fn confirm_booking(&self, reserve_id: Uuid) -> Result<Booking, BookingError> {
        let confirmed = match self.store.confirm_booking(reserve_id).await {
            Ok(b) => b,
            Err(StoreError::BookingNotFound(_)) => return Err(BookingError::NotFound),
            Err(e) => return Err(e.into()),
        };
        debug!("Confirmed {}", reserve_id);
        self.sync_queue.enqueue(reserve_id).await;
        Ok(confirmed)
    }

    pub async fn booking(&self, reserve_id: Uuid) -> Option<Booking> {
        self.store.booking(reserve_id).await
    }

    /// Patient-facing "current booking" read, served from the projection.
    pub async fn current_booking(&self, patient_id: Uuid) -> PatientProjection {
        self.store
            .projection(patient_id)
            .await
            .unwrap_or_else(|| PatientProjection::cleared(patient_id))
    }

    pub async fn slot_occupancy(&self, from: NaiveDate, to: NaiveDate) -> Vec<SlotOccupancy> {
        self.store.slot_occupancy(from, to).await
    }
}
