pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{ReconcileError, ReconciliationReport};
pub use services::engine::ReconciliationEngine;
pub use services::lease::RunLease;
