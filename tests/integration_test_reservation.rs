mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{Duration, Utc};
use common::{parse_body, TestApp};
use membership_backend::domain::models::product::{Product, ProductKind};
use tower::ServiceExt;

async fn limited_product(app: &TestApp, capacity: i32) -> Product {
    let product = app.seed_product(Product::membership("Workshop membership", "WORKSHOP", 45000, capacity)).await;
    app.state.promoter.run_cycle().await.unwrap();
    product
}

#[tokio::test]
async fn test_reserve_returns_held_slot_and_is_idempotent() {
    let app = TestApp::new().await;
    let alice = app.seed_user("Alice").await;
    let product = limited_product(&app, 2).await;

    let res = app.reserve(&product.id, &alice.id).await;
    assert_eq!(res.status(), StatusCode::OK);
    let first = parse_body(res).await;
    assert_eq!(first["user_id"], alice.id.as_str());
    assert_eq!(first["product_id"], product.id.as_str());
    assert_eq!(first["payment_state"], "UNASSIGNED");

    let res = app.reserve(&product.id, &alice.id).await;
    assert_eq!(res.status(), StatusCode::OK);
    let second = parse_body(res).await;
    assert_eq!(first["id"], second["id"]);
    assert_eq!(first["key"], second["key"]);
    assert_eq!(first["reserved_until"], second["reserved_until"]);
}

#[tokio::test]
async fn test_reservation_lasts_two_days() {
    let app = TestApp::new().await;
    let alice = app.seed_user("Alice").await;
    let product = limited_product(&app, 1).await;

    let before = Utc::now();
    let body = parse_body(app.reserve(&product.id, &alice.id).await).await;
    let reserved_until: chrono::DateTime<Utc> = body["reserved_until"].as_str().unwrap().parse().unwrap();

    assert!(reserved_until >= before + Duration::hours(48));
    assert!(reserved_until <= Utc::now() + Duration::hours(48));
}

#[tokio::test]
async fn test_full_product_queues_with_429_and_no_duplicate_entry() {
    let app = TestApp::new().await;
    let alice = app.seed_user("Alice").await;
    let bob = app.seed_user("Bob").await;
    let product = limited_product(&app, 1).await;

    assert_eq!(app.reserve(&product.id, &alice.id).await.status(), StatusCode::OK);

    let res = app.reserve(&product.id, &bob.id).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    let entry = parse_body(res).await;
    assert_eq!(entry["user_id"], bob.id.as_str());

    let res = app.reserve(&product.id, &bob.id).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(parse_body(res).await["id"], entry["id"]);

    let queued = app.count("SELECT COUNT(*) FROM waiting_list WHERE product_id = ?", &product.id).await;
    assert_eq!(queued, 1);
}

#[tokio::test]
async fn test_no_slots_generated_yet_means_waiting_list() {
    let app = TestApp::new().await;
    let alice = app.seed_user("Alice").await;
    let product = app.seed_product(Product::membership("Fresh", "FRESH", 1000, 5)).await;

    let res = app.reserve(&product.id, &alice.id).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_unlimited_product_creates_slot_on_demand() {
    let app = TestApp::new().await;
    let alice = app.seed_user("Alice").await;
    let bob = app.seed_user("Bob").await;
    let product = app.seed_product(Product::membership("Supporter", "SUPPORT", 10000, 0)).await;

    let a = parse_body(app.reserve(&product.id, &alice.id).await).await;
    let res = app.reserve(&product.id, &bob.id).await;
    assert_eq!(res.status(), StatusCode::OK);
    let b = parse_body(res).await;
    assert_ne!(a["id"], b["id"]);
}

#[tokio::test]
async fn test_unknown_or_inactive_product_is_not_found() {
    let app = TestApp::new().await;
    let alice = app.seed_user("Alice").await;

    let res = app.reserve("does-not-exist", &alice.id).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let mut retired = Product::membership("Retired", "OLD", 1000, 3);
    retired.active = false;
    let retired = app.seed_product(retired).await;
    let res = app.reserve(&retired.id, &alice.id).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_event_signup_closed_after_deadline() {
    let app = TestApp::new().await;
    let alice = app.seed_user("Alice").await;
    let today = Utc::now().date_naive();
    let product = Product::with_kind("Spring gala", "GALA", 2500, 0, ProductKind::Event {
        signup_deadline: Some(Utc::now() - Duration::hours(1)),
        date_start: today + Duration::days(10),
        date_end: today + Duration::days(11),
    });
    let product = app.seed_product(product).await;

    let res = app.reserve(&product.id, &alice.id).await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(parse_body(res).await["error"], "Signup deadline has passed");
}

#[tokio::test]
async fn test_reserve_requires_valid_token() {
    let app = TestApp::new().await;
    let product = limited_product(&app, 1).await;

    let res = app.router.clone().oneshot(
        Request::builder()
            .method("POST")
            .uri(format!("/api/v1/products/{}/reserve-slot", product.id))
            .body(Body::empty())
            .unwrap()
    ).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = app.router.clone().oneshot(
        Request::builder()
            .method("POST")
            .uri(format!("/api/v1/products/{}/reserve-slot", product.id))
            .header("Authorization", "Bearer not-a-jwt")
            .body(Body::empty())
            .unwrap()
    ).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_expired_slot_is_claimable_by_someone_else() {
    let app = TestApp::new().await;
    let alice = app.seed_user("Alice").await;
    let bob = app.seed_user("Bob").await;
    let product = limited_product(&app, 1).await;

    let alice_slot = parse_body(app.reserve(&product.id, &alice.id).await).await;
    app.expire_slot(alice_slot["id"].as_str().unwrap()).await;

    let res = app.reserve(&product.id, &bob.id).await;
    assert_eq!(res.status(), StatusCode::OK);
    let bob_slot = parse_body(res).await;
    assert_eq!(bob_slot["id"], alice_slot["id"]);
    assert_eq!(bob_slot["user_id"], bob.id.as_str());

    let res = app.create_payment_intent(alice_slot["key"].as_str().unwrap(), &alice.id).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_product_endpoints_report_availability() {
    let app = TestApp::new().await;
    let alice = app.seed_user("Alice").await;
    let product = limited_product(&app, 3).await;

    app.reserve(&product.id, &alice.id).await;

    let res = app.get(&format!("/api/v1/products/{}", product.id), None).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = parse_body(res).await;
    assert_eq!(body["kind"], "MEMBERSHIP");
    assert_eq!(body["grants_door_access"], true);
    assert_eq!(body["availability"]["capacity_limit"], 3);
    assert_eq!(body["availability"]["holders"], 1);
    assert_eq!(body["availability"]["open_slots"], 2);

    let list = parse_body(app.get("/api/v1/products", None).await).await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    let mine = parse_body(app.get("/api/v1/me/slots", Some(&alice.id)).await).await;
    assert_eq!(mine.as_array().unwrap().len(), 1);

    let res = app.get("/health", None).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reservations_wait_for_the_write_lock() {
    let app = TestApp::new().await;
    let product = limited_product(&app, 3).await;

    let mut set = tokio::task::JoinSet::new();
    for i in 0..6 {
        let user = app.seed_user(&format!("Racer{}", i)).await;
        let request = Request::builder()
            .method("POST")
            .uri(format!("/api/v1/products/{}/reserve-slot", product.id))
            .header("Authorization", format!("Bearer {}", app.token_for(&user.id)))
            .body(Body::empty())
            .unwrap();
        let router = app.router.clone();
        set.spawn(async move { router.oneshot(request).await.unwrap().status() });
    }

    let mut reserved = 0;
    let mut queued = 0;
    while let Some(status) = set.join_next().await {
        match status.unwrap() {
            StatusCode::OK => reserved += 1,
            StatusCode::TOO_MANY_REQUESTS => queued += 1,
            other => panic!("reservation failed with {}", other),
        }
    }

    assert_eq!(reserved, 3);
    assert_eq!(queued, 3);
    assert_eq!(app.count("SELECT COUNT(*) FROM waiting_list WHERE product_id = ?", &product.id).await, 3);
}
