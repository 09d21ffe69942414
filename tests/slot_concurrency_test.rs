use chrono::Duration;
use membership_backend::{
    domain::models::{product::Product, user::User},
    domain::services::{
        allocator::{ReserveOutcome, SlotAllocator},
        promoter::WaitlistPromoter,
    },
    infra::factory::postgres_backends,
    state::Backends,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use uuid::Uuid;

async fn postgres_or_skip() -> Option<Backends> {
    let db_url = std::env::var("DATABASE_URL").unwrap_or_default();
    if !db_url.starts_with("postgres") {
        println!("Skipping concurrency test (not targeting Postgres)");
        return None;
    }
    Some(postgres_backends(&db_url).await.expect("Failed to connect to DB"))
}

async fn seed_users(backends: &Backends, count: usize) -> Vec<User> {
    let mut users = Vec::with_capacity(count);
    for i in 0..count {
        let user = User::new(format!("racer-{}-{}@example.org", i, Uuid::new_v4()), format!("Racer {}", i));
        users.push(backends.user_repo.create(&user).await.unwrap());
    }
    users
}

async fn seed_limited_product(backends: &Backends, capacity: i32) -> Product {
    let product = backends.product_repo
        .create(&Product::membership("Race membership", "RACE", 1000, capacity))
        .await
        .unwrap();

    let promoter = WaitlistPromoter::new(
        backends.product_repo.clone(),
        backends.slot_store.clone(),
        backends.lease_repo.clone(),
        format!("test-{}", Uuid::new_v4()),
        Duration::seconds(60),
        Duration::hours(48),
    );
    let report = promoter.reconcile_product(&product).await.unwrap();
    assert_eq!(report.opened, capacity as usize);
    product
}

#[tokio::test]
async fn test_concurrent_reservations_never_exceed_capacity() {
    let Some(backends) = postgres_or_skip().await else { return };

    let capacity = 5;
    let racers = 20;
    let product = seed_limited_product(&backends, capacity).await;
    let users = seed_users(&backends, racers).await;

    let allocator = Arc::new(SlotAllocator::new(
        backends.product_repo.clone(),
        backends.slot_store.clone(),
        Duration::hours(48),
    ));

    let mut set = JoinSet::new();
    for user in users {
        let allocator = allocator.clone();
        let product_id = product.id.clone();
        set.spawn(async move { allocator.reserve(&product_id, &user.id).await });
    }

    let mut slot_ids = HashSet::new();
    let mut holders = HashSet::new();
    let mut queued = 0;
    while let Some(res) = set.join_next().await {
        match res.unwrap().expect("reserve failed") {
            ReserveOutcome::Reserved(slot) => {
                assert!(slot_ids.insert(slot.id.clone()), "slot {} handed out twice", slot.id);
                holders.insert(slot.user_id.unwrap());
            }
            ReserveOutcome::Queued(_) => queued += 1,
        }
    }

    assert_eq!(slot_ids.len(), capacity as usize);
    assert_eq!(holders.len(), capacity as usize);
    assert_eq!(queued, racers - capacity as usize);
    assert_eq!(backends.slot_store.list_waitlist(&product.id).await.unwrap().len(), queued);
}

#[tokio::test]
async fn test_same_user_racing_gets_one_slot() {
    let Some(backends) = postgres_or_skip().await else { return };

    let product = seed_limited_product(&backends, 3).await;
    let user = seed_users(&backends, 1).await.remove(0);

    let allocator = Arc::new(SlotAllocator::new(
        backends.product_repo.clone(),
        backends.slot_store.clone(),
        Duration::hours(48),
    ));

    let mut set = JoinSet::new();
    for _ in 0..10 {
        let allocator = allocator.clone();
        let product_id = product.id.clone();
        let user_id = user.id.clone();
        set.spawn(async move { allocator.reserve(&product_id, &user_id).await });
    }

    let mut slot_ids = HashSet::new();
    while let Some(res) = set.join_next().await {
        match res.unwrap().expect("reserve failed") {
            ReserveOutcome::Reserved(slot) => {
                slot_ids.insert(slot.id);
            }
            ReserveOutcome::Queued(entry) => panic!("user was queued: {:?}", entry),
        }
    }

    assert_eq!(slot_ids.len(), 1);
    let counts = backends.slot_store.availability(&product.id, chrono::Utc::now()).await.unwrap();
    assert_eq!(counts.holders, 1);
    assert_eq!(counts.open_slots, 2);
}

#[tokio::test]
async fn test_claim_committed_during_promoter_count_does_not_overshoot() {
    let Some(backends) = postgres_or_skip().await else { return };

    let capacity = 2;
    let product = seed_limited_product(&backends, capacity).await;
    let users = seed_users(&backends, 3).await;

    let allocator = SlotAllocator::new(
        backends.product_repo.clone(),
        backends.slot_store.clone(),
        Duration::hours(48),
    );
    assert!(matches!(allocator.reserve(&product.id, &users[0].id).await.unwrap(), ReserveOutcome::Reserved(_)));

    // Same statement order as a promoter cycle, with a claim committed from
    // another connection before the capacity read.
    let mut tx = backends.slot_store.begin().await.unwrap();
    assert!(tx.lock_product(&product.id).await.unwrap());
    let now = chrono::Utc::now();
    tx.release_reclaimable_slots(&product.id, now).await.unwrap();

    assert!(matches!(allocator.reserve(&product.id, &users[1].id).await.unwrap(), ReserveOutcome::Reserved(_)));

    let counts = tx.capacity_counts(&product.id, now).await.unwrap();
    assert_eq!(counts.holders + counts.open_slots, capacity as i64);
    assert_eq!((i64::from(capacity) - counts.holders - counts.open_slots).max(0), 0);
    drop(tx);

    let promoter = WaitlistPromoter::new(
        backends.product_repo.clone(),
        backends.slot_store.clone(),
        backends.lease_repo.clone(),
        format!("test-{}", Uuid::new_v4()),
        Duration::seconds(60),
        Duration::hours(48),
    );
    assert_eq!(promoter.reconcile_product(&product).await.unwrap().opened, 0);

    assert!(matches!(allocator.reserve(&product.id, &users[2].id).await.unwrap(), ReserveOutcome::Queued(_)));

    let counts = backends.slot_store.availability(&product.id, chrono::Utc::now()).await.unwrap();
    assert_eq!(counts.holders, 2);
    assert_eq!(counts.open_slots, 0);
}
