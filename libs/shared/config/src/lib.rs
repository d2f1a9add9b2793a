use std::env;
use tracing::warn;

/// Policy applied when a patient who already holds an active booking
/// requests another one. One explicit switch, one code path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Reject the new request with DuplicateActiveBooking.
    Reject,
    /// Cancel the prior booking and create the new one inside the same
    /// atomic unit.
    ReplacePrior,
}

impl DuplicatePolicy {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "reject" => Some(DuplicatePolicy::Reject),
            "replace_prior" => Some(DuplicatePolicy::ReplacePrior),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub ledger_base_url: String,
    pub ledger_api_key: String,
    pub ledger_request_timeout_seconds: u64,
    pub ledger_sync_max_attempts: u32,
    pub ledger_sync_backoff_ms: u64,
    pub ledger_fetch_window_days: i64,
    pub ledger_fetch_page_size: usize,
    pub default_slot_capacity: u32,
    pub duplicate_booking_policy: DuplicatePolicy,
    pub slot_lock_wait_ms: u64,
    pub booking_retry_attempts: u32,
    pub booking_retry_backoff_ms: u64,
    pub reconcile_lease_seconds: u64,
    /// Interval for the background reconciliation task; 0 disables it.
    pub reconcile_interval_seconds: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            ledger_base_url: env::var("LEDGER_BASE_URL").unwrap_or_else(|_| {
                warn!("LEDGER_BASE_URL not set, using empty value");
                String::new()
            }),
            ledger_api_key: env::var("LEDGER_API_KEY").unwrap_or_else(|_| {
                warn!("LEDGER_API_KEY not set, using empty value");
                String::new()
            }),
            ledger_request_timeout_seconds: parse_env("LEDGER_REQUEST_TIMEOUT_SECONDS", 5),
            ledger_sync_max_attempts: parse_env("LEDGER_SYNC_MAX_ATTEMPTS", 3),
            ledger_sync_backoff_ms: parse_env("LEDGER_SYNC_BACKOFF_MS", 200),
            ledger_fetch_window_days: parse_env("LEDGER_FETCH_WINDOW_DAYS", 7),
            ledger_fetch_page_size: parse_env("LEDGER_FETCH_PAGE_SIZE", 200),
            default_slot_capacity: parse_env("DEFAULT_SLOT_CAPACITY", 1),
            duplicate_booking_policy: env::var("DUPLICATE_BOOKING_POLICY")
                .ok()
                .and_then(|v| {
                    let parsed = DuplicatePolicy::parse(&v);
                    if parsed.is_none() {
                        warn!(
                            "DUPLICATE_BOOKING_POLICY '{}' not recognized, using 'reject'",
                            v
                        );
                    }
                    parsed
                })
                .unwrap_or(DuplicatePolicy::Reject),
            slot_lock_wait_ms: parse_env("SLOT_LOCK_WAIT_MS", 2000),
            booking_retry_attempts: parse_env("BOOKING_RETRY_ATTEMPTS", 3),
            booking_retry_backoff_ms: parse_env("BOOKING_RETRY_BACKOFF_MS", 100),
            reconcile_lease_seconds: parse_env("RECONCILE_LEASE_SECONDS", 300),
            reconcile_interval_seconds: parse_env("RECONCILE_INTERVAL_SECONDS", 0),
        };

        if !config.is_ledger_configured() {
            warn!("External ledger not configured - sync is skipped until LEDGER_BASE_URL is set");
        }

        config
    }

    pub fn is_ledger_configured(&self) -> bool {
        !self.ledger_base_url.is_empty()
    }
}

fn parse_env<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default", key, value);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_policy_parses_known_values() {
        assert_eq!(DuplicatePolicy::parse("reject"), Some(DuplicatePolicy::Reject));
        assert_eq!(
            DuplicatePolicy::parse("replace_prior"),
            Some(DuplicatePolicy::ReplacePrior)
        );
        assert_eq!(DuplicatePolicy::parse("overwrite"), None);
    }
}
