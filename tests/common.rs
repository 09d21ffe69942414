#![allow(dead_code)]

use membership_backend::{
    api::{extractors::{auth::{Claims, AUDIENCE}, signature::{sign_payload, SIGNATURE_HEADER}}, router::create_router},
    state::AppState,
    config::Config,
    domain::models::{
        payment::{PaymentIntent, PaymentIntentRequest},
        product::Product,
        user::User,
    },
    domain::ports::{EmailService, PaymentProvider},
    infra::factory::{load_templates, sqlite_backends},
    error::AppError,
};
use sqlx::{sqlite::{SqliteConnectOptions, SqlitePoolOptions}, Pool, Sqlite};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;
use axum::{
    body::Body,
    http::{header, Request},
    response::Response,
    Router,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use tokio::sync::Notify;
use tower::ServiceExt;
use serde_json::{json, Value};

pub const WEBHOOK_SECRET: &str = "whsec_integration";
pub const ISSUER: &str = "test-issuer";

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub recipient: String,
    pub subject: String,
    pub html_body: String,
}

#[derive(Default)]
pub struct MockEmailService {
    pub sent: Mutex<Vec<SentEmail>>,
}

#[async_trait]
impl EmailService for MockEmailService {
    async fn send(&self, recipient: &str, subject: &str, html_body: &str) -> Result<(), AppError> {
        self.sent.lock().unwrap().push(SentEmail {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            html_body: html_body.to_string(),
        });
        Ok(())
    }
}

/// Replays intents by idempotency key the way the real provider does.
#[derive(Default)]
pub struct MockPaymentProvider {
    pub calls: AtomicUsize,
    /// (amount, statement suffix, slot id, idempotency key) per call.
    pub requests: Mutex<Vec<(i32, String, String, String)>>,
    intents: Mutex<HashMap<String, PaymentIntent>>,
    gate: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
}

impl MockPaymentProvider {
    /// Holds the next call open until `resume` is notified; `entered` fires
    /// once the call is in flight.
    pub fn pause_next_call(&self) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let resume = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some((entered.clone(), resume.clone()));
        (entered, resume)
    }
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    async fn create_payment_intent(&self, request: &PaymentIntentRequest) -> Result<PaymentIntent, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push((
            request.amount_cents,
            request.statement_suffix.clone(),
            request.slot_id.clone(),
            request.idempotency_key.clone(),
        ));

        let gate = self.gate.lock().unwrap().take();
        if let Some((entered, resume)) = gate {
            entered.notify_one();
            resume.notified().await;
        }

        let mut intents = self.intents.lock().unwrap();
        let n = intents.len() + 1;
        let intent = intents.entry(request.idempotency_key.clone()).or_insert_with(|| PaymentIntent {
            id: format!("pi_test_{}", n),
            client_secret: Some(format!("pi_test_{}_secret", n)),
        });
        Ok(intent.clone())
    }
}

pub struct TestApp {
    pub router: Router,
    pub pool: Pool<Sqlite>,
    pub db_filename: String,
    pub state: Arc<AppState>,
    pub emails: Arc<MockEmailService>,
    pub payments: Arc<MockPaymentProvider>,
    encoding_key: EncodingKey,
}

impl TestApp {
    pub async fn new() -> Self {
        let db_filename = format!("test_{}.db", Uuid::new_v4());
        let db_url = format!("sqlite://{}?mode=rwc", db_filename);

        let backends = sqlite_backends(&db_url).await.expect("Failed to set up test db");

        let connection_options = SqliteConnectOptions::from_str(&db_url).unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connection_options)
            .await
            .expect("Failed to connect to test db");

        let priv_key_pem = include_str!("../tests/keys/test_private.pem");
        let pub_key_pem = include_str!("../tests/keys/test_public.pem");

        let config = Config {
            database_url: db_url.clone(),
            port: 0,
            mail_service_url: "http://localhost".to_string(),
            mail_service_token: "token".to_string(),
            jwt_public_key: pub_key_pem.to_string(),
            auth_issuer: ISSUER.to_string(),
            payment_provider_url: "http://localhost".to_string(),
            payment_provider_key: "sk_test".to_string(),
            payment_currency: "dkk".to_string(),
            webhook_secret: WEBHOOK_SECRET.to_string(),
            webhook_tolerance_secs: 300,
            reservation_ttl_hours: 48,
            promoter_interval_secs: 60,
            lease_ttl_secs: 120,
            instance_id: "test-instance".to_string(),
            frontend_url: "http://frontend.test".to_string(),
        };

        let emails = Arc::new(MockEmailService::default());
        let payments = Arc::new(MockPaymentProvider::default());

        let state = Arc::new(
            AppState::new(
                config,
                backends,
                emails.clone(),
                payments.clone(),
                Arc::new(load_templates().unwrap()),
            )
            .expect("Failed to build app state"),
        );

        let router = create_router(state.clone());

        Self {
            router,
            pool,
            db_filename,
            state,
            emails,
            payments,
            encoding_key: EncodingKey::from_ed_pem(priv_key_pem.as_bytes()).unwrap(),
        }
    }

    pub async fn seed_user(&self, name: &str) -> User {
        let user = User::new(format!("{}@example.org", name.to_lowercase()), name.to_string());
        self.state.user_repo.create(&user).await.unwrap()
    }

    pub async fn seed_product(&self, product: Product) -> Product {
        self.state.product_repo.create(&product).await.unwrap()
    }

    pub fn token_for(&self, user_id: &str) -> String {
        let claims = Claims {
            sub: user_id.to_string(),
            aud: AUDIENCE.to_string(),
            iss: ISSUER.to_string(),
            exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
        };
        encode(&Header::new(Algorithm::EdDSA), &claims, &self.encoding_key).unwrap()
    }

    pub async fn post(&self, uri: &str, user_id: &str) -> Response {
        self.router.clone().oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Bearer {}", self.token_for(user_id)))
                .body(Body::empty())
                .unwrap()
        ).await.unwrap()
    }

    pub async fn get(&self, uri: &str, user_id: Option<&str>) -> Response {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(user_id) = user_id {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", self.token_for(user_id)));
        }
        self.router.clone().oneshot(builder.body(Body::empty()).unwrap()).await.unwrap()
    }

    pub async fn reserve(&self, product_id: &str, user_id: &str) -> Response {
        self.post(&format!("/api/v1/products/{}/reserve-slot", product_id), user_id).await
    }

    pub async fn create_payment_intent(&self, slot_key: &str, user_id: &str) -> Response {
        self.post(&format!("/api/v1/slots/{}/create-payment-intent", slot_key), user_id).await
    }

    /// Same request as `create_payment_intent`, built for spawning on its own task.
    pub fn create_payment_intent_request(&self, slot_key: &str, user_id: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/api/v1/slots/{}/create-payment-intent", slot_key))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token_for(user_id)))
            .body(Body::empty())
            .unwrap()
    }

    pub async fn send_webhook(&self, event_type: &str, payment_id: &str) -> Response {
        let body = json!({
            "id": format!("evt_{}", Uuid::new_v4().simple()),
            "type": event_type,
            "data": { "object": { "id": payment_id } }
        }).to_string();
        let signature = sign_payload(WEBHOOK_SECRET, Utc::now().timestamp(), body.as_bytes()).unwrap();
        self.send_raw_webhook(body, &signature).await
    }

    pub async fn send_raw_webhook(&self, body: String, signature: &str) -> Response {
        self.router.clone().oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/webhooks/payments")
                .header(header::CONTENT_TYPE, "application/json")
                .header(SIGNATURE_HEADER, signature)
                .body(Body::from(body))
                .unwrap()
        ).await.unwrap()
    }

    /// Moves a reservation into the past without waiting for it.
    pub async fn expire_slot(&self, slot_id: &str) {
        let past: DateTime<Utc> = Utc::now() - Duration::minutes(5);
        sqlx::query("UPDATE slots SET reserved_until = ? WHERE id = ?")
            .bind(past)
            .bind(slot_id)
            .execute(&self.pool)
            .await
            .unwrap();
    }

    pub async fn count(&self, sql: &str, product_id: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(sql)
            .bind(product_id)
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }

    pub fn sent_emails(&self) -> Vec<SentEmail> {
        self.emails.sent.lock().unwrap().clone()
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.db_filename);
        let _ = std::fs::remove_file(format!("{}-wal", self.db_filename));
        let _ = std::fs::remove_file(format!("{}-shm", self.db_filename));
    }
}

pub async fn parse_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
