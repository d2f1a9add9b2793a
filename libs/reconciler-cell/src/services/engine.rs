// libs/reconciler-cell/src/services/engine.rs
//
// Periodic batch engine replacing the one-off repair scripts this system
// grew out of. Each run takes snapshot reads, compares the projection
// table, the slot occupancy and the external ledger against the booking
// table, and applies idempotent corrective writes as small independent
// store operations. A failed repair aborts that entity only, never the
// run; overlapping runs are excluded by a leased run lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use identity_cell::IdentityService;
use ledger_cell::{LedgerClient, LedgerEntry};
use shared_config::AppConfig;
use shared_store::{Booking, ClinicStore};

use crate::models::{
    ActionTaken, DivergenceKind, EntityType, ReconcileError, ReconciliationReport, ReportEntry,
    RunState, RunTrigger,
};
use crate::services::lease::RunLease;

pub struct ReconciliationEngine {
    store: Arc<ClinicStore>,
    ledger: Arc<LedgerClient>,
    identity: Arc<IdentityService>,
    lease: Arc<RunLease>,
    fallback_window_days: i64,
    reports: Mutex<Vec<ReconciliationReport>>,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<ClinicStore>,
        ledger: Arc<LedgerClient>,
        identity: Arc<IdentityService>,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            identity,
            lease: RunLease::new(Duration::from_secs(config.reconcile_lease_seconds.max(1))),
            fallback_window_days: config.ledger_fetch_window_days.max(1),
            reports: Mutex::new(Vec::new()),
        }
    }

    /// Execute one reconciliation run. Returns RunInProgress when another
    /// run currently holds the lease.
    #[instrument(skip(self))]
    pub async fn run(&self, trigger: RunTrigger) -> Result<ReconciliationReport, ReconcileError> {
        let Some(_lease) = self.lease.try_acquire() else {
            return Err(ReconcileError::RunInProgress);
        };

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut state = RunState::Scanning;
        debug!("Reconciliation run {} entering {:?}", run_id, state);

        let projections = self.store.projections_snapshot().await;
        let bookings = self.store.bookings_snapshot().await;
        let bookings_by_id: HashMap<Uuid, Booking> = bookings
            .iter()
            .map(|b| (b.reserve_id, b.clone()))
            .collect();

        state = RunState::Comparing;
        debug!("Reconciliation run {} entering {:?}", run_id, state);
        let mut entries = Vec::new();

        state = RunState::Repairing;
        debug!("Reconciliation run {} entering {:?}", run_id, state);

        self.check_projections(&projections, &bookings_by_id, &mut entries)
            .await;
        self.check_capacity(&bookings, &mut entries).await;
        self.check_ledger(&bookings_by_id, &mut entries).await;
        self.check_identities(&mut entries).await;

        state = RunState::Reported;
        let report = ReconciliationReport {
            run_id,
            trigger,
            state,
            started_at,
            finished_at: Some(Utc::now()),
            entries,
        };

        info!(
            "Reconciliation run {} reported {} divergence(s)",
            run_id,
            report.entries.len()
        );
        self.reports.lock().await.push(report.clone());
        Ok(report)
    }

    pub async fn list_reports(&self) -> Vec<ReconciliationReport> {
        self.reports.lock().await.clone()
    }

    /// Check 1: every projection pointing at a reservation must reference
    /// an existing, non-canceled booking with matching fields. The booking
    /// row is authoritative in every repair.
    async fn check_projections(
        &self,
        projections: &[shared_store::PatientProjection],
        bookings_by_id: &HashMap<Uuid, Booking>,
        entries: &mut Vec<ReportEntry>,
    ) {
        for projection in projections {
            let Some(reserve_id) = projection.reserve_id else {
                continue;
            };

            match bookings_by_id.get(&reserve_id) {
                None => {
                    let cleared = self
                        .store
                        .clear_projection_if(projection.patient_id, reserve_id)
                        .await;
                    entries.push(ReportEntry {
                        entity_type: EntityType::Projection,
                        entity_id: projection.patient_id.to_string(),
                        divergence_kind: DivergenceKind::MissingBooking,
                        action_taken: if cleared {
                            ActionTaken::ProjectionCleared
                        } else {
                            ActionTaken::Skipped
                        },
                    });
                }
                Some(booking) if !booking.is_active() => {
                    let cleared = self
                        .store
                        .clear_projection_if(projection.patient_id, reserve_id)
                        .await;
                    entries.push(ReportEntry {
                        entity_type: EntityType::Projection,
                        entity_id: projection.patient_id.to_string(),
                        divergence_kind: DivergenceKind::GhostBooking,
                        action_taken: if cleared {
                            ActionTaken::ProjectionCleared
                        } else {
                            ActionTaken::Skipped
                        },
                    });
                }
                Some(booking)
                    if projection.date != Some(booking.date)
                        || projection.time != Some(booking.time)
                        || projection.status != Some(booking.status) =>
                {
                    let action = match self.store.repair_projection_from_booking(reserve_id).await
                    {
                        Ok(()) => ActionTaken::ProjectionOverwritten,
                        Err(e) => {
                            error!(
                                "Projection repair failed for patient {}: {}",
                                projection.patient_id, e
                            );
                            ActionTaken::Skipped
                        }
                    };
                    entries.push(ReportEntry {
                        entity_type: EntityType::Projection,
                        entity_id: projection.patient_id.to_string(),
                        divergence_kind: DivergenceKind::FieldMismatch,
                        action_taken: action,
                    });
                }
                Some(_) => {}
            }
        }
    }

    /// Check 2: over-capacity slots are reported, never auto-repaired.
    /// Canceling the "wrong" patient is a business decision, not ours.
    async fn check_capacity(&self, bookings: &[Booking], entries: &mut Vec<ReportEntry>) {
        let mut active_per_slot: HashMap<shared_store::SlotKey, u32> = HashMap::new();
        for booking in bookings {
            if booking.is_active() {
                *active_per_slot.entry(booking.slot_key()).or_default() += 1;
            }
        }

        let mut over_capacity: Vec<(shared_store::SlotKey, u32)> = Vec::new();
        for (slot, active) in active_per_slot {
            let capacity = self.store.slot_capacity(slot).await;
            if active > capacity {
                over_capacity.push((slot, active));
            }
        }
        over_capacity.sort_by_key(|(slot, _)| *slot);

        for (slot, active) in over_capacity {
            warn!("Slot {} over capacity: {} active bookings", slot, active);
            entries.push(ReportEntry {
                entity_type: EntityType::Slot,
                entity_id: slot.to_string(),
                divergence_kind: DivergenceKind::OverCapacity,
                action_taken: ActionTaken::ReportedOnly,
            });
        }
    }

    /// Check 3: ledger rows must mirror their bookings. Missing or stale
    /// rows are re-pushed (the booking is authoritative); orphan rows are
    /// reported only, since staff edit the external sheet independently.
    async fn check_ledger(
        &self,
        bookings_by_id: &HashMap<Uuid, Booking>,
        entries: &mut Vec<ReportEntry>,
    ) {
        if !self.ledger.is_configured() {
            debug!("Ledger not configured, skipping ledger divergence check");
            return;
        }
        // With no local bookings there may still be ledger-only rows to
        // surface, so fall back to a window around today.
        let (from, to) = match self.store.booking_date_bounds().await {
            Some(bounds) => bounds,
            None => {
                let today = Utc::now().date_naive();
                (
                    today - ChronoDuration::days(self.fallback_window_days),
                    today + ChronoDuration::days(self.fallback_window_days),
                )
            }
        };

        let snapshot = match self.ledger.fetch_snapshot(from, to).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Ledger snapshot unavailable, check skipped: {}", e);
                entries.push(ReportEntry {
                    entity_type: EntityType::LedgerEntry,
                    entity_id: format!("{}..{}", from, to),
                    divergence_kind: DivergenceKind::LedgerUnreachable,
                    action_taken: ActionTaken::Skipped,
                });
                return;
            }
        };

        let ledger_by_id: HashMap<Uuid, &LedgerEntry> =
            snapshot.iter().map(|e| (e.reserve_id, e)).collect();

        let mut ordered: Vec<&Booking> = bookings_by_id.values().collect();
        ordered.sort_by_key(|b| b.reserve_id);
        for booking in ordered {
            let divergence = match ledger_by_id.get(&booking.reserve_id) {
                None => DivergenceKind::MissingLedgerEntry,
                Some(entry) if !entry.matches_booking(booking) => {
                    DivergenceKind::StaleLedgerEntry
                }
                Some(_) => continue,
            };

            let action = match self
                .ledger
                .push_entry(&LedgerEntry::from_booking(booking))
                .await
            {
                Ok(()) => ActionTaken::LedgerResynced,
                Err(e) => {
                    error!("Ledger re-push failed for {}: {}", booking.reserve_id, e);
                    ActionTaken::Skipped
                }
            };
            entries.push(ReportEntry {
                entity_type: EntityType::LedgerEntry,
                entity_id: booking.reserve_id.to_string(),
                divergence_kind: divergence,
                action_taken: action,
            });
        }

        // ledger_by_id rather than the raw snapshot: a row straddling
        // fetch windows must be reported once.
        for entry in ledger_by_id.values() {
            if !bookings_by_id.contains_key(&entry.reserve_id) {
                entries.push(ReportEntry {
                    entity_type: EntityType::LedgerEntry,
                    entity_id: entry.reserve_id.to_string(),
                    divergence_kind: DivergenceKind::OrphanLedgerEntry,
                    action_taken: ActionTaken::ReportedOnly,
                });
            }
        }
    }

    /// Check 4: live patients sharing a messaging uid. Merged only when
    /// the primary is unambiguous (exactly one non-placeholder holder);
    /// anything else is a human decision.
    async fn check_identities(&self, entries: &mut Vec<ReportEntry>) {
        for collision in self.identity.find_collisions().await {
            let real: Vec<_> = collision
                .patients
                .iter()
                .filter(|p| !p.is_placeholder)
                .collect();

            if real.len() == 1 {
                let primary = real[0].patient_id;
                for duplicate in collision.patients.iter().filter(|p| p.is_placeholder) {
                    let action = match self
                        .identity
                        .merge_identities(primary, duplicate.patient_id)
                        .await
                    {
                        Ok(_) => ActionTaken::IdentitiesMerged,
                        Err(e) => {
                            error!(
                                "Identity merge failed for uid '{}': {}",
                                collision.messaging_uid, e
                            );
                            ActionTaken::Skipped
                        }
                    };
                    entries.push(ReportEntry {
                        entity_type: EntityType::Patient,
                        entity_id: duplicate.patient_id.to_string(),
                        divergence_kind: DivergenceKind::DuplicateIdentity,
                        action_taken: action,
                    });
                }
            } else {
                entries.push(ReportEntry {
                    entity_type: EntityType::Patient,
                    entity_id: collision.messaging_uid.clone(),
                    divergence_kind: DivergenceKind::DuplicateIdentity,
                    action_taken: ActionTaken::ReportedOnly,
                });
            }
        }
    }
}
