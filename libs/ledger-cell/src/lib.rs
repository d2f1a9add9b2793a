pub mod error;
pub mod models;
pub mod services;

pub use error::LedgerError;
pub use models::LedgerEntry;
pub use services::client::LedgerClient;
pub use services::sync_queue::LedgerSyncQueue;
