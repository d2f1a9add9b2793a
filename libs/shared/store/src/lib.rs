pub mod models;
pub mod store;

pub use models::{Booking, BookingStatus, Patient, PatientProjection, SlotKey, SlotOccupancy};
pub use store::{ClinicStore, StoreError};
