// libs/reconciler-cell/src/services/lease.rs
//
// Run-level lease making overlapping reconciliation runs mutually
// exclusive. The lease expires after a TTL so a crashed run cannot block
// future runs; release checks the holder token so a stale guard dropped
// after expiry cannot release somebody else's lease.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;
use uuid::Uuid;

struct Holder {
    token: Uuid,
    expires_at: Instant,
}

pub struct RunLease {
    ttl: Duration,
    holder: Mutex<Option<Holder>>,
}

impl RunLease {
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            ttl,
            holder: Mutex::new(None),
        })
    }

    pub fn try_acquire(self: &Arc<Self>) -> Option<LeaseGuard> {
        let mut holder = self.holder.lock().expect("lease mutex poisoned");
        if let Some(current) = holder.as_ref() {
            if current.expires_at > Instant::now() {
                return None;
            }
            warn!("Reconciliation lease expired without release, taking over");
        }

        let token = Uuid::new_v4();
        *holder = Some(Holder {
            token,
            expires_at: Instant::now() + self.ttl,
        });
        Some(LeaseGuard {
            lease: self.clone(),
            token,
        })
    }

    fn release(&self, token: Uuid) {
        let mut holder = self.holder.lock().expect("lease mutex poisoned");
        if holder.as_ref().map(|h| h.token) == Some(token) {
            *holder = None;
        }
    }
}

pub struct LeaseGuard {
    lease: Arc<RunLease>,
    token: Uuid,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.lease.release(self.token);
    }
}
