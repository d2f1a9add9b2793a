use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{NaiveDate, NaiveTime};

use booking_cell::models::{BookingError, CancelActor};
use booking_cell::BookingTransactor;
use ledger_cell::{LedgerClient, LedgerSyncQueue};
use shared_config::{AppConfig, DuplicatePolicy};
use shared_store::{BookingStatus, ClinicStore, SlotKey};

fn test_config() -> AppConfig {
    AppConfig {
        ledger_base_url: String::new(),
        ledger_api_key: String::new(),
        ledger_request_timeout_seconds: 2,
        ledger_sync_max_attempts: 1,
        ledger_sync_backoff_ms: 10,
        ledger_fetch_window_days: 7,
        ledger_fetch_page_size: 100,
        default_slot_capacity: 1,
        duplicate_booking_policy: DuplicatePolicy::Reject,
        slot_lock_wait_ms: 500,
        booking_retry_attempts: 3,
        booking_retry_backoff_ms: 10,
        reconcile_lease_seconds: 60,
        reconcile_interval_seconds: 0,
    }
}

fn setup(default_capacity: u32) -> (Arc<ClinicStore>, Arc<BookingTransactor>) {
    let config = test_config();
    let store = Arc::new(ClinicStore::new(default_capacity));
    let client = Arc::new(LedgerClient::new(&config));
    let queue = LedgerSyncQueue::spawn(store.clone(), client);
    let transactor = Arc::new(BookingTransactor::new(store.clone(), queue, &config));
    (store, transactor)
}

fn slot() -> (NaiveDate, NaiveTime) {
    (
        NaiveDate::from_ymd_opt(2026, 2, 20).unwrap(),
        NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
    )
}

#[tokio::test]
async fn exactly_capacity_many_concurrent_bookings_succeed() {
    let (store, transactor) = setup(2);
    let (date, time) = slot();

    let mut patients = Vec::new();
    for i in 0..8 {
        patients.push(
            store
                .register_patient(format!("patient-{i}"), None, false)
                .await,
        );
    }

    let mut handles = Vec::new();
    for patient in &patients {
        let transactor = transactor.clone();
        let patient_id = patient.patient_id;
        handles.push(tokio::spawn(async move {
            transactor.create_booking(patient_id, date, time).await
        }));
    }

    let mut succeeded = 0;
    let mut capacity_rejections = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(BookingError::CapacityExceeded { .. }) => capacity_rejections += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(succeeded, 2);
    assert_eq!(capacity_rejections, 6);

    // No successful booking may later be found violating capacity.
    let occupancy = store.slot_occupancy(date, date).await;
    assert_eq!(occupancy.len(), 1);
    assert_eq!(occupancy[0].active_bookings, 2);
}

#[tokio::test]
async fn second_active_booking_for_a_patient_is_rejected() {
    let (store, transactor) = setup(3);
    let (date, time) = slot();
    let other_time = NaiveTime::from_hms_opt(11, 0, 0).unwrap();
    let patient = store.register_patient("Ada".into(), None, false).await;

    transactor
        .create_booking(patient.patient_id, date, time)
        .await
        .unwrap();
    let err = transactor
        .create_booking(patient.patient_id, date, other_time)
        .await
        .unwrap_err();
    assert_matches!(err, BookingError::DuplicateActiveBooking { .. });
}

#[tokio::test]
async fn cancel_clears_the_patient_projection() {
    let (store, transactor) = setup(1);
    let (date, time) = slot();
    let patient = store.register_patient("Ada".into(), None, false).await;

    let booking = transactor
        .create_booking(patient.patient_id, date, time)
        .await
        .unwrap();

    let projection = transactor.current_booking(patient.patient_id).await;
    assert_eq!(projection.reserve_id, Some(booking.reserve_id));

    transactor
        .cancel_booking(booking.reserve_id, CancelActor::Patient)
        .await
        .unwrap();

    let projection = transactor.current_booking(patient.patient_id).await;
    assert!(projection.is_empty());

    // The slot frees up for the next patient.
    let next = store.register_patient("Grace".into(), None, false).await;
    transactor
        .create_booking(next.patient_id, date, time)
        .await
        .unwrap();
}

#[tokio::test]
async fn confirm_moves_pending_to_confirmed_and_rejects_canceled() {
    let (store, transactor) = setup(1);
    let (date, time) = slot();
    let patient = store.register_patient("Ada".into(), None, false).await;

    let booking = transactor
        .create_booking(patient.patient_id, date, time)
        .await
        .unwrap();
    assert_eq!(booking.status, BookingStatus::Pending);

    let confirmed = transactor.confirm_booking(booking.reserve_id).await.unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);

    transactor
        .cancel_booking(booking.reserve_id, CancelActor::Staff)
        .await
        .unwrap();
    let err = transactor.confirm_booking(booking.reserve_id).await.unwrap_err();
    assert_matches!(err, BookingError::InvalidStatusTransition { .. });
}

#[tokio::test]
async fn contended_slot_surfaces_busy_after_bounded_waits() {
    let mut config = test_config();
    config.slot_lock_wait_ms = 20;
    config.booking_retry_attempts = 2;
    config.booking_retry_backoff_ms = 5;

    let store = Arc::new(ClinicStore::new(1));
    let client = Arc::new(LedgerClient::new(&config));
    let queue = LedgerSyncQueue::spawn(store.clone(), client);
    let transactor = Arc::new(BookingTransactor::new(store.clone(), queue, &config));

    let (date, time) = slot();
    let patient = store.register_patient("Ada".into(), None, false).await;

    // Hold the slot's lock for the whole call: every bounded wait times
    // out and the transactor reports Busy instead of blocking forever.
    let guard = store.slot_guard(SlotKey::new(date, time));
    let _held = guard.lock().await;

    let err = transactor
        .create_booking(patient.patient_id, date, time)
        .await
        .unwrap_err();
    assert_matches!(err, BookingError::Busy);

    // Nothing was written while the slot was contended.
    assert!(store.booking_date_bounds().await.is_none());
}

#[tokio::test]
async fn unknown_booking_cancel_reports_not_found() {
    let (_store, transactor) = setup(1);
    let err = transactor
        .cancel_booking(uuid::Uuid::new_v4(), CancelActor::Patient)
        .await
        .unwrap_err();
    assert_matches!(err, BookingError::NotFound);
}

#[tokio::test]
async fn unknown_patient_cannot_book() {
    let (_store, transactor) = setup(1);
    let (date, time) = slot();
    let err = transactor
        .create_booking(uuid::Uuid::new_v4(), date, time)
        .await
        .unwrap_err();
    assert_matches!(err, BookingError::PatientNotFound);
}
