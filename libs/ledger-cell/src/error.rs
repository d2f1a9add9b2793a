use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service rejected the payload; the structured body is carried
    /// verbatim for diagnosis.
    #[error("Ledger rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Ledger sync failed after {attempts} attempts: {last}")]
    SyncExhausted { attempts: u32, last: String },

    #[error("Ledger service not configured")]
    NotConfigured,
}
