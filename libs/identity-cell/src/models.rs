// libs/identity-cell/src/models.rs
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_store::Patient;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPatientRequest {
    pub name: String,
    pub messaging_uid: Option<String>,
    #[serde(default)]
    pub is_placeholder: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveQuery {
    pub messaging_uid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeIdentitiesRequest {
    pub primary_id: Uuid,
    pub duplicate_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeIdentitiesResponse {
    pub rows_reassigned: usize,
}

/// Live patients sharing one messaging uid; input for a merge decision.
#[derive(Debug, Clone, Serialize)]
pub struct IdentityCollision {
    pub messaging_uid: String,
    pub patients: Vec<Patient>,
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("No patient holds messaging uid '{0}'")]
    UnknownMessagingUid(String),

    #[error("Patient not found: {0}")]
    PatientNotFound(Uuid),

    /// More than one real patient holds the uid; a human (or the admin
    /// merge call) has to pick the primary. Never auto-resolved.
    #[error("Messaging uid '{messaging_uid}' is claimed by {} patients", candidates.len())]
    IdentityConflict {
        messaging_uid: String,
        candidates: Vec<Uuid>,
    },

    #[error("Placeholder identity {0} cannot be a merge primary")]
    PlaceholderPrimary(Uuid),

    #[error("Cannot merge a patient into itself")]
    SelfMerge,

    #[error("Internal error: {0}")]
    Internal(String),
}
