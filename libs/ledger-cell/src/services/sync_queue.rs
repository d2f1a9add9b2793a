// libs/ledger-cell/src/services/sync_queue.rs
//
// In-process outbox between the booking transactor and the ledger client.
// Enqueueing is fire-and-forget: a booking transaction commits whether or
// not the ledger is reachable, and whatever the worker cannot deliver is
// picked up by the next reconciliation pass.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use shared_store::ClinicStore;

use crate::models::LedgerEntry;
use crate::services::client::LedgerClient;

pub struct LedgerSyncQueue {
    tx: mpsc::UnboundedSender<Uuid>,
    pending: Arc<Mutex<HashSet<Uuid>>>,
    shutdown: Arc<Notify>,
}

impl LedgerSyncQueue {
    /// Spawn the outbox worker. The worker reads the current booking row
    /// for each queued reservation so late deliveries always carry the
    /// latest status, not the one at enqueue time.
    pub fn spawn(store: Arc<ClinicStore>, client: Arc<LedgerClient>) -> Arc<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Uuid>();
        let pending: Arc<Mutex<HashSet<Uuid>>> = Arc::new(Mutex::new(HashSet::new()));
        let shutdown = Arc::new(Notify::new());

        let worker_pending = pending.clone();
        let worker_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                let reserve_id = tokio::select! {
                    _ = worker_shutdown.notified() => {
                        info!("Ledger sync worker shutting down");
                        break;
                    }
                    received = rx.recv() => match received {
                        Some(id) => id,
                        None => break,
                    },
                };

                Self::sync_one(&store, &client, reserve_id).await;
                worker_pending.lock().await.remove(&reserve_id);
            }
        });

        Arc::new(Self {
            tx,
            pending,
            shutdown,
        })
    }

    async fn sync_one(store: &ClinicStore, client: &LedgerClient, reserve_id: Uuid) {
        let Some(booking) = store.booking(reserve_id).await else {
            warn!("Ledger sync skipped: booking {} not found", reserve_id);
            return;
        };
        if !client.is_configured() {
            debug!("Ledger not configured, skipping sync for {}", reserve_id);
            return;
        }
        let entry = LedgerEntry::from_booking(&booking);
        if let Err(e) = client.push_entry(&entry).await {
            // Deferred to reconciliation; never propagated to the caller.
            error!("LedgerSyncError for {}: {}", reserve_id, e);
        }
    }

    /// Queue a reservation for ledger sync. Never blocks and never fails
    /// the caller; a closed worker only means the divergence waits for
    /// reconciliation.
    pub async fn enqueue(&self, reserve_id: Uuid) {
        self.pending.lock().await.insert(reserve_id);
        if self.tx.send(reserve_id).is_err() {
            warn!("Ledger sync queue closed, {} deferred to reconciliation", reserve_id);
            self.pending.lock().await.remove(&reserve_id);
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Wait (bounded) for the worker to drain everything queued so far.
    /// Test and shutdown helper; live traffic never waits on the ledger.
    pub async fn flush(&self, max_wait: Duration) {
        let deadline = tokio::time::Instant::now() + max_wait;
        while tokio::time::Instant::now() < deadline {
            if self.pending.lock().await.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        warn!("Ledger sync queue did not drain within {:?}", max_wait);
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}
