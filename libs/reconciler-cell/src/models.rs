// libs/reconciler-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// State machine of a single reconciliation run. Terminal on Reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Scanning,
    Comparing,
    Repairing,
    Reported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Scheduled,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Projection,
    Slot,
    Booking,
    LedgerEntry,
    Patient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceKind {
    /// Projection references a reservation that was never durably booked.
    MissingBooking,
    /// Projection still shows a canceled reservation.
    GhostBooking,
    /// Projection fields disagree with the authoritative booking row.
    FieldMismatch,
    /// More active bookings in a slot than its capacity allows.
    OverCapacity,
    /// Booking has no row in the external ledger.
    MissingLedgerEntry,
    /// Ledger row disagrees with the authoritative booking.
    StaleLedgerEntry,
    /// Ledger row references a reservation we have no booking for.
    OrphanLedgerEntry,
    /// Snapshot fetch failed; ledger comparison skipped this run.
    LedgerUnreachable,
    /// Two or more live patients share a messaging uid.
    DuplicateIdentity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTaken {
    ProjectionCleared,
    ProjectionOverwritten,
    LedgerResynced,
    IdentitiesMerged,
    /// Divergence needs a human or policy decision; nothing was changed.
    ReportedOnly,
    /// Repair attempted and failed for this entity; logged and skipped.
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEntry {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub divergence_kind: DivergenceKind,
    pub action_taken: ActionTaken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub run_id: Uuid,
    pub trigger: RunTrigger,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub entries: Vec<ReportEntry>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("A reconciliation run is already in progress")]
    RunInProgress,

    #[error("Internal error: {0}")]
    Internal(String),
}
