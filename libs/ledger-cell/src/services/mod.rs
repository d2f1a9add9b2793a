pub mod client;
pub mod sync_queue;
