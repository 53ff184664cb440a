//! Postgres-backed outbox and user-write tests
//!
//! Require a running Postgres reachable through DATABASE_URL.
//! Run with: cargo test --package source-service-rs --test outbox_pg_test -- --ignored

mod common;

use common::{get_test_pool, reset_tables};
use event_bus::ChangeAction;
use serial_test::serial;
use source_service_rs::outbox::{OutboxStatus, OutboxStore};
use source_service_rs::users::{
    create_user, delete_user, find_user, update_user, NewUser, UserError, UserUpdate,
};
use source_service_rs::PgOutboxStore;

fn new_user(email: &str) -> NewUser {
    NewUser {
        org_id: "o1".to_string(),
        email: email.to_string(),
        name: "A".to_string(),
        phone: None,
    }
}

#[tokio::test]
#[serial]
#[ignore] // Requires Postgres
async fn test_user_writes_enqueue_outbox_events_in_order() {
    let pool = get_test_pool().await;
    reset_tables(&pool).await;
    let store = PgOutboxStore::new(pool.clone());

    let user = create_user(&pool, new_user("a@b.com")).await.unwrap();
    update_user(
        &pool,
        "o1",
        user.id,
        UserUpdate {
            name: Some("B".to_string()),
            phone: None,
        },
    )
    .await
    .unwrap();
    delete_user(&pool, "o1", user.id).await.unwrap();

    let batch = store.claim_pending(50).await.unwrap();
    let actions: Vec<ChangeAction> = batch.events().iter().map(|e| e.event_type).collect();
    assert_eq!(
        actions,
        vec![ChangeAction::Insert, ChangeAction::Update, ChangeAction::Delete]
    );
    for event in batch.events() {
        assert_eq!(event.aggregate_id, user.id.to_string());
        assert_eq!(event.org_id(), Some("o1"));
    }
    batch.rollback().await.unwrap();
}

#[tokio::test]
#[serial]
#[ignore] // Requires Postgres
async fn test_duplicate_email_is_rejected_without_outbox_row() {
    let pool = get_test_pool().await;
    reset_tables(&pool).await;
    let store = PgOutboxStore::new(pool.clone());

    create_user(&pool, new_user("dup@b.com")).await.unwrap();
    let err = create_user(&pool, new_user("dup@b.com")).await.unwrap_err();
    assert!(matches!(err, UserError::EmailTaken(_)));

    let batch = store.claim_pending(50).await.unwrap();
    assert_eq!(batch.events().len(), 1);
    batch.rollback().await.unwrap();
}

#[tokio::test]
#[serial]
#[ignore] // Requires Postgres
async fn test_find_user_is_tenant_scoped() {
    let pool = get_test_pool().await;
    reset_tables(&pool).await;

    let user = create_user(&pool, new_user("scoped@b.com")).await.unwrap();
    assert!(find_user(&pool, "o1", user.id).await.unwrap().is_some());
    assert!(find_user(&pool, "o2", user.id).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
#[ignore] // Requires Postgres
async fn test_concurrent_claims_skip_locked_rows() {
    let pool = get_test_pool().await;
    reset_tables(&pool).await;
    let store = PgOutboxStore::new(pool.clone());

    for i in 0..4 {
        create_user(&pool, new_user(&format!("c{i}@b.com"))).await.unwrap();
    }

    let first = store.claim_pending(3).await.unwrap();
    let second = store.claim_pending(3).await.unwrap();

    assert_eq!(first.events().len(), 3);
    assert_eq!(second.events().len(), 1);
    assert!(!first
        .events()
        .iter()
        .any(|e| e.id == second.events()[0].id));

    let published_id = second.events()[0].id;
    second.commit_published().await.unwrap();
    first.rollback().await.unwrap();

    let published = store.find_by_id(published_id).await.unwrap().unwrap();
    assert_eq!(published.status, OutboxStatus::Published);
    assert!(published.published_at.is_some());
}

#[tokio::test]
#[serial]
#[ignore] // Requires Postgres
async fn test_dropped_claim_rolls_back() {
    let pool = get_test_pool().await;
    reset_tables(&pool).await;
    let store = PgOutboxStore::new(pool.clone());

    create_user(&pool, new_user("drop@b.com")).await.unwrap();
    {
        let claimed = store.claim_pending(10).await.unwrap();
        assert_eq!(claimed.events().len(), 1);
    }

    // The rollback of a dropped transaction is issued when its connection returns to the pool
    let mut reclaimed = 0;
    for _ in 0..50 {
        let again = store.claim_pending(10).await.unwrap();
        reclaimed = again.events().len();
        if reclaimed == 1 {
            assert_eq!(again.events()[0].status, OutboxStatus::Pending);
        }
        again.rollback().await.unwrap();
        if reclaimed == 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(reclaimed, 1);
}
