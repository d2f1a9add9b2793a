// libs/identity-cell/src/services/resolution.rs
//
// Identity resolution over the canonical patient table. The messaging
// platform hands us uids, not patient ids, and its session reuse bugs
// mean a uid can transiently land on the wrong row; resolution therefore
// never treats a placeholder identity as canonical and never overwrites a
// conflicting patient implicitly. Merges go through one idempotent path.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use shared_store::{ClinicStore, Patient, StoreError};

use crate::models::{IdentityCollision, IdentityError};

pub struct IdentityService {
    store: Arc<ClinicStore>,
}

impl IdentityService {
    pub fn new(store: Arc<ClinicStore>) -> Self {
        Self { store }
    }

    pub async fn register_patient(
        &self,
        name: String,
        messaging_uid: Option<String>,
        is_placeholder: bool,
    ) -> Patient {
        if let Some(uid) = &messaging_uid {
            let holders = self.store.patients_by_messaging_uid(uid).await;
            if !holders.is_empty() {
                // The collision is representable on purpose; the
                // reconciler reports it and a merge resolves it.
                warn!(
                    "messaging uid '{}' already held by {} patient(s)",
                    uid,
                    holders.len()
                );
            }
        }
        self.store
            .register_patient(name, messaging_uid, is_placeholder)
            .await
    }

    /// Lookups through a retired id land on the surviving identity.
    pub async fn get_patient(&self, patient_id: Uuid) -> Result<Patient, IdentityError> {
        self.store
            .canonical_patient(patient_id)
            .await
            .ok_or(IdentityError::PatientNotFound(patient_id))
    }

    /// Resolve a messaging uid to the canonical patient id. A placeholder
    /// holder loses to any real patient; two real holders are an explicit
    /// conflict, never a silent pick.
    #[instrument(skip(self))]
    pub async fn resolve_identity(&self, messaging_uid: &str) -> Result<Uuid, IdentityError> {
        let holders = self.store.patients_by_messaging_uid(messaging_uid).await;
        if holders.is_empty() {
            return Err(IdentityError::UnknownMessagingUid(messaging_uid.to_string()));
        }

        let real: Vec<&Patient> = holders.iter().filter(|p| !p.is_placeholder).collect();
        match real.len() {
            1 => Ok(real[0].patient_id),
            0 => {
                // Only placeholder(s) hold the uid. One placeholder is the
                // best answer we have; several mean cross-contaminated
                // session state and need a human.
                if holders.len() == 1 {
                    Ok(holders[0].patient_id)
                } else {
                    Err(IdentityError::IdentityConflict {
                        messaging_uid: messaging_uid.to_string(),
                        candidates: holders.iter().map(|p| p.patient_id).collect(),
                    })
                }
            }
            _ => Err(IdentityError::IdentityConflict {
                messaging_uid: messaging_uid.to_string(),
                candidates: real.iter().map(|p| p.patient_id).collect(),
            }),
        }
    }

    /// Administrative merge. Idempotent: repeating an already-applied
    /// merge reassigns zero rows.
    #[instrument(skip(self))]
    pub async fn merge_identities(
        &self,
        primary_id: Uuid,
        duplicate_id: Uuid,
    ) -> Result<usize, IdentityError> {
        if primary_id == duplicate_id {
            return Err(IdentityError::SelfMerge);
        }

        let rows = self
            .store
            .merge_patients(primary_id, duplicate_id)
            .await
            .map_err(|e| match e {
                StoreError::PatientNotFound(id) => IdentityError::PatientNotFound(id),
                StoreError::PlaceholderPrimary(id) => IdentityError::PlaceholderPrimary(id),
                other => IdentityError::Internal(other.to_string()),
            })?;

        info!(
            "Merged identity {} into {} ({} rows reassigned)",
            duplicate_id, primary_id, rows
        );
        Ok(rows)
    }

    /// Live patients sharing a messaging uid, grouped per uid. Consumed
    /// by the reconciler's identity audit and by operator tooling.
    pub async fn find_collisions(&self) -> Vec<IdentityCollision> {
        let patients = self.store.patients_snapshot().await;
        let mut by_uid: HashMap<String, Vec<Patient>> = HashMap::new();
        for patient in patients {
            if patient.is_retired() {
                continue;
            }
            if let Some(uid) = &patient.messaging_uid {
                by_uid.entry(uid.clone()).or_default().push(patient);
            }
        }

        let mut collisions: Vec<IdentityCollision> = by_uid
            .into_iter()
            .filter(|(_, group)| group.len() > 1)
            .map(|(messaging_uid, mut patients)| {
                patients.sort_by_key(|p| p.created_at);
                IdentityCollision {
                    messaging_uid,
                    patients,
                }
            })
            .collect();
        collisions.sort_by(|a, b| a.messaging_uid.cmp(&b.messaging_uid));
        collisions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn service() -> (Arc<ClinicStore>, IdentityService) {
        let store = Arc::new(ClinicStore::new(1));
        (store.clone(), IdentityService::new(store))
    }

    #[tokio::test]
    async fn placeholder_loses_to_a_real_patient() {
        let (_store, service) = service();
        let real = service
            .register_patient("Ada".into(), Some("U-1".into()), false)
            .await;
        service
            .register_patient("fallback".into(), Some("U-1".into()), true)
            .await;

        let resolved = service.resolve_identity("U-1").await.unwrap();
        assert_eq!(resolved, real.patient_id);
    }

    #[tokio::test]
    async fn two_real_holders_are_an_explicit_conflict() {
        let (_store, service) = service();
        service
            .register_patient("Ada".into(), Some("U-2".into()), false)
            .await;
        service
            .register_patient("Grace".into(), Some("U-2".into()), false)
            .await;

        let err = service.resolve_identity("U-2").await.unwrap_err();
        assert_matches!(err, IdentityError::IdentityConflict { candidates, .. }
            if candidates.len() == 2);
    }

    #[tokio::test]
    async fn lone_placeholder_still_resolves() {
        let (_store, service) = service();
        let placeholder = service
            .register_patient("fallback".into(), Some("U-3".into()), true)
            .await;
        let resolved = service.resolve_identity("U-3").await.unwrap();
        assert_eq!(resolved, placeholder.patient_id);
    }

    #[tokio::test]
    async fn merge_twice_reassigns_zero_rows() {
        let (store, service) = service();
        let primary = service
            .register_patient("Ada L".into(), Some("U-4".into()), false)
            .await;
        let duplicate = service
            .register_patient("Ada".into(), Some("U-4".into()), false)
            .await;
        store
            .create_booking(
                duplicate.patient_id,
                "2026-02-20".parse().unwrap(),
                "10:00:00".parse().unwrap(),
                shared_config::DuplicatePolicy::Reject,
            )
            .await
            .unwrap();

        let first = service
            .merge_identities(primary.patient_id, duplicate.patient_id)
            .await
            .unwrap();
        assert!(first >= 1);

        let second = service
            .merge_identities(primary.patient_id, duplicate.patient_id)
            .await
            .unwrap();
        assert_eq!(second, 0);

        // After the merge the uid resolves cleanly again.
        let resolved = service.resolve_identity("U-4").await.unwrap();
        assert_eq!(resolved, primary.patient_id);
        assert!(service.find_collisions().await.is_empty());
    }

    #[tokio::test]
    async fn self_merge_is_rejected() {
        let (_store, service) = service();
        let p = service.register_patient("Ada".into(), None, false).await;
        let err = service
            .merge_identities(p.patient_id, p.patient_id)
            .await
            .unwrap_err();
        assert_matches!(err, IdentityError::SelfMerge);
    }
}
