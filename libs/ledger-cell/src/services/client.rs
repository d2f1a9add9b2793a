// libs/ledger-cell/src/services/client.rs
//
// Best-effort HTTP client for the external ledger service. Pushes are
// retried a bounded number of times with exponential backoff; snapshot
// reads are chunked into date windows and fetched page by page, since the
// service caps response sizes.

use chrono::{Duration as ChronoDuration, NaiveDate};
use rand::Rng;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, StatusCode,
};
use std::time::Duration;
use tracing::{debug, error, warn};

use shared_config::AppConfig;

use crate::error::LedgerError;
use crate::models::LedgerEntry;

pub struct LedgerClient {
    client: Client,
    base_url: String,
    api_key: String,
    max_attempts: u32,
    backoff_ms: u64,
    window_days: i64,
    page_size: usize,
}

impl LedgerClient {
    pub fn new(config: &AppConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.ledger_request_timeout_seconds))
            .build()
            .expect("reqwest client construction failed");
        Self {
            client,
            base_url: config.ledger_base_url.trim_end_matches('/').to_string(),
            api_key: config.ledger_api_key.clone(),
            max_attempts: config.ledger_sync_max_attempts.max(1),
            backoff_ms: config.ledger_sync_backoff_ms,
            window_days: config.ledger_fetch_window_days.max(1),
            page_size: config.ledger_fetch_page_size.max(1),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty()
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !self.api_key.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", self.api_key)) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    /// Push one entry, retrying transport failures and 5xx responses with
    /// exponential backoff. A 4xx rejection is final: the service tells us
    /// the payload is malformed and repeating it cannot help.
    pub async fn push_entry(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        if !self.is_configured() {
            return Err(LedgerError::NotConfigured);
        }

        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            match self.try_push(entry).await {
                Ok(()) => {
                    debug!("Ledger push ok for {} (attempt {})", entry.reserve_id, attempt);
                    return Ok(());
                }
                Err(LedgerError::Rejected { status, body }) if status < 500 => {
                    // Logged verbatim so operators can diagnose the shape
                    // the service objected to.
                    error!("Ledger rejected entry {} ({}): {}", entry.reserve_id, status, body);
                    return Err(LedgerError::Rejected { status, body });
                }
                Err(e) => {
                    warn!(
                        "Ledger push attempt {}/{} failed for {}: {}",
                        attempt, self.max_attempts, entry.reserve_id, e
                    );
                    last_error = e.to_string();
                }
            }

            if attempt < self.max_attempts {
                let jitter = rand::thread_rng().gen_range(0..50);
                let backoff = self.backoff_ms * (1u64 << (attempt - 1)) + jitter;
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
        }

        Err(LedgerError::SyncExhausted {
            attempts: self.max_attempts,
            last: last_error,
        })
    }

    async fn try_push(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let url = format!("{}/entries", self.base_url);
        let response = self
            .client
            .post(&url)
            .headers(self.headers())
            .json(entry)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(LedgerError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    /// Bulk read for the reconciler. The range is split into bounded date
    /// windows and each window fetched page by page; a short page ends the
    /// window. Results are merged into one vector.
    pub async fn fetch_snapshot(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        if !self.is_configured() {
            return Err(LedgerError::NotConfigured);
        }

        let mut entries = Vec::new();
        let mut window_start = from;
        while window_start <= to {
            let window_end =
                (window_start + ChronoDuration::days(self.window_days - 1)).min(to);
            self.fetch_window(window_start, window_end, &mut entries).await?;
            window_start = window_end + ChronoDuration::days(1);
        }

        debug!("Ledger snapshot {}..{}: {} entries", from, to, entries.len());
        Ok(entries)
    }

    async fn fetch_window(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        entries: &mut Vec<LedgerEntry>,
    ) -> Result<(), LedgerError> {
        let mut page = 1usize;
        loop {
            let url = format!(
                "{}/entries?from={}&to={}&page={}&page_size={}",
                self.base_url, from, to, page, self.page_size
            );
            let response = self.client.get(&url).headers(self.headers()).send().await?;

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                // Service reports an empty window this way; nothing to merge.
                return Ok(());
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                error!("Ledger snapshot fetch failed ({}): {}", status, body);
                return Err(LedgerError::Rejected {
                    status: status.as_u16(),
                    body,
                });
            }

            let batch: Vec<LedgerEntry> = response.json().await?;
            let batch_len = batch.len();
            entries.extend(batch);

            if batch_len < self.page_size {
                return Ok(());
            }
            page += 1;
        }
    }
}
