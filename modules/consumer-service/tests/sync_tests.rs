//! Synchronizer behaviour against a fake reference service and in-memory cache
//!
//! Run with: cargo test --package consumer-service-rs --test sync_tests

mod common;

use chrono::{DateTime, Utc};
use common::{envelope, sync_use_case, FakeReferenceService};
use consumer_service_rs::reference_client::{FetchError, FetchFailure};
use consumer_service_rs::sync::SyncError;
use consumer_service_rs::{InMemoryUserCacheRepository, SyncOutcome, UserCacheRepository};
use event_bus::{ChangeAction, ChangeEvent};

fn event(entity_type: &str, id: &str, action: ChangeAction) -> ChangeEvent {
    envelope(entity_type, id, action, Some("o1")).validate().unwrap()
}

fn ts(value: &str) -> DateTime<Utc> {
    value.parse().unwrap()
}

#[tokio::test]
async fn test_update_event_upserts_fetched_user() {
    let reference = FakeReferenceService::new();
    reference.put_user("u1", "o1", "a@b.com", "A", "2024-01-01T00:00:00Z");
    let cache = InMemoryUserCacheRepository::new();
    let sync = sync_use_case(reference.clone(), cache.clone());

    let outcome = sync
        .execute(&event("USER", "u1", ChangeAction::Update))
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Upserted);

    let record = cache.find_by_id("u1").await.unwrap().unwrap();
    assert_eq!(record.id, "u1");
    assert_eq!(record.org_id, "o1");
    assert_eq!(record.email, "a@b.com");
    assert_eq!(record.name, "A");
    assert_eq!(record.phone, None);
    assert_eq!(record.source_updated_at, ts("2024-01-01T00:00:00Z"));

    let requests = reference.requests.lock().unwrap();
    assert_eq!(requests[0].user_id, "u1");
    assert_eq!(requests[0].tenant_id, "o1");
}

#[tokio::test]
async fn test_same_event_twice_leaves_one_identical_record() {
    let reference = FakeReferenceService::new();
    reference.put_user("u1", "o1", "a@b.com", "A", "2024-01-01T00:00:00Z");
    let cache = InMemoryUserCacheRepository::new();
    let sync = sync_use_case(reference, cache.clone());
    let update = event("USER", "u1", ChangeAction::Update);

    sync.execute(&update).await.unwrap();
    let first = cache.find_by_id("u1").await.unwrap().unwrap();

    assert_eq!(sync.execute(&update).await.unwrap(), SyncOutcome::Stale);
    let second = cache.find_by_id("u1").await.unwrap().unwrap();

    assert_eq!(first, second);
    assert_eq!(cache.find_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_newer_source_data_overwrites() {
    let reference = FakeReferenceService::new();
    reference.put_user("u1", "o1", "a@b.com", "A", "2024-01-01T00:00:00Z");
    let cache = InMemoryUserCacheRepository::new();
    let sync = sync_use_case(reference.clone(), cache.clone());

    sync.execute(&event("USER", "u1", ChangeAction::Insert))
        .await
        .unwrap();
    reference.put_user("u1", "o1", "new@b.com", "B", "2024-02-01T00:00:00Z");

    let outcome = sync
        .execute(&event("USER", "u1", ChangeAction::Update))
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Upserted);

    let record = cache.find_by_id("u1").await.unwrap().unwrap();
    assert_eq!(record.email, "new@b.com");
    assert_eq!(record.name, "B");
}

#[tokio::test]
async fn test_delete_removes_record_and_repeats_harmlessly() {
    let reference = FakeReferenceService::new();
    reference.put_user("u1", "o1", "a@b.com", "A", "2024-01-01T00:00:00Z");
    let cache = InMemoryUserCacheRepository::new();
    let sync = sync_use_case(reference.clone(), cache.clone());

    sync.execute(&event("USER", "u1", ChangeAction::Insert))
        .await
        .unwrap();
    let requests_before_delete = reference.request_count();

    let delete = event("USER", "u1", ChangeAction::Delete);
    assert_eq!(sync.execute(&delete).await.unwrap(), SyncOutcome::Deleted);
    assert!(cache.find_by_id("u1").await.unwrap().is_none());

    assert_eq!(sync.execute(&delete).await.unwrap(), SyncOutcome::Deleted);
    assert!(cache.find_by_id("u1").await.unwrap().is_none());

    // Deletes never consult the source
    assert_eq!(reference.request_count(), requests_before_delete);
}

#[tokio::test]
async fn test_non_user_entity_is_ignored() {
    let reference = FakeReferenceService::new();
    let cache = InMemoryUserCacheRepository::new();
    let sync = sync_use_case(reference.clone(), cache.clone());

    let outcome = sync
        .execute(&event("ORGANIZATION", "org-9", ChangeAction::Update))
        .await
        .unwrap();

    assert_eq!(outcome, SyncOutcome::Ignored);
    assert_eq!(reference.request_count(), 0);
    assert!(cache.find_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_user_missing_at_source_is_skipped() {
    let reference = FakeReferenceService::new();
    let cache = InMemoryUserCacheRepository::new();
    let sync = sync_use_case(reference.clone(), cache.clone());

    let outcome = sync
        .execute(&event("USER", "ghost", ChangeAction::Insert))
        .await
        .unwrap();

    assert_eq!(outcome, SyncOutcome::SourceMissing);
    // First 404 is retried, the second one is final
    assert_eq!(reference.request_count(), 2);
    assert!(cache.find_by_id("ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn test_auth_failure_surfaces_as_sync_error() {
    let reference = FakeReferenceService::new();
    reference.respond_with("u1", 403);
    let sync = sync_use_case(reference.clone(), InMemoryUserCacheRepository::new());

    let err = sync
        .execute(&event("USER", "u1", ChangeAction::Update))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SyncError::Fetch(FetchFailure {
            error: FetchError::Unauthorized { status: 403 },
            attempts: 1,
        })
    ));
    assert_eq!(err.name(), "ReferenceUnauthorized");
    assert_eq!(err.retry_count(), 1);
    assert_eq!(reference.request_count(), 1);
}

#[tokio::test]
async fn test_server_error_exhausts_retries() {
    let reference = FakeReferenceService::new();
    reference.respond_with("u1", 503);
    let sync = sync_use_case(reference.clone(), InMemoryUserCacheRepository::new());

    let err = sync
        .execute(&event("USER", "u1", ChangeAction::Update))
        .await
        .unwrap_err();

    assert_eq!(err.name(), "ReferenceStatusError");
    assert_eq!(err.retry_count(), 3);
    assert_eq!(reference.request_count(), 3);
}

#[tokio::test]
async fn test_unsafe_id_is_rejected_before_any_request() {
    let reference = FakeReferenceService::new();
    let cache = InMemoryUserCacheRepository::new();
    let sync = sync_use_case(reference.clone(), cache.clone());

    let err = sync
        .execute(&event("USER", "..", ChangeAction::Update))
        .await
        .unwrap_err();

    assert_eq!(err.name(), "ReferenceInvalidId");
    assert_eq!(err.retry_count(), 0);
    assert_eq!(reference.request_count(), 0);
    assert!(cache.find_all().await.unwrap().is_empty());
}
