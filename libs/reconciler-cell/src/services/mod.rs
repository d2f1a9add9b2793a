pub mod engine;
pub mod lease;
