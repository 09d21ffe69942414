use std::sync::Arc;
use crate::domain::ports::{
    EmailService, JobRepository, LeaseRepository, PaymentProvider, ProductRepository, SlotStore,
    UserRepository,
};
use crate::domain::services::{
    allocator::SlotAllocator, payment_confirmation::PaymentConfirmationHandler, promoter::WaitlistPromoter,
};
use crate::config::Config;
use crate::error::AppError;
use jsonwebtoken::DecodingKey;
use tera::Tera;

/// Repository set for one database backend.
pub struct Backends {
    pub product_repo: Arc<dyn ProductRepository>,
    pub user_repo: Arc<dyn UserRepository>,
    pub slot_store: Arc<dyn SlotStore>,
    pub lease_repo: Arc<dyn LeaseRepository>,
    pub job_repo: Arc<dyn JobRepository>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub product_repo: Arc<dyn ProductRepository>,
    pub user_repo: Arc<dyn UserRepository>,
    pub slot_store: Arc<dyn SlotStore>,
    pub lease_repo: Arc<dyn LeaseRepository>,
    pub job_repo: Arc<dyn JobRepository>,
    pub email_service: Arc<dyn EmailService>,
    pub allocator: Arc<SlotAllocator>,
    pub promoter: Arc<WaitlistPromoter>,
    pub payments: Arc<PaymentConfirmationHandler>,
    pub templates: Arc<Tera>,
    pub jwt_decoding_key: DecodingKey,
}

impl AppState {
    pub fn new(
        config: Config,
        backends: Backends,
        email_service: Arc<dyn EmailService>,
        payment_provider: Arc<dyn PaymentProvider>,
        templates: Arc<Tera>,
    ) -> Result<Self, AppError> {
        let jwt_decoding_key = DecodingKey::from_ed_pem(config.jwt_public_key.as_bytes())
            .map_err(|e| AppError::Config(format!("JWT_PUBLIC_KEY is not a valid Ed25519 PEM key: {}", e)))?;

        let allocator = Arc::new(SlotAllocator::new(
            backends.product_repo.clone(),
            backends.slot_store.clone(),
            config.reservation_ttl(),
        ));
        let promoter = Arc::new(WaitlistPromoter::new(
            backends.product_repo.clone(),
            backends.slot_store.clone(),
            backends.lease_repo.clone(),
            config.instance_id.clone(),
            config.lease_ttl(),
            config.reservation_ttl(),
        ));
        let payments = Arc::new(PaymentConfirmationHandler::new(
            backends.product_repo.clone(),
            backends.slot_store.clone(),
            payment_provider,
            config.payment_currency.clone(),
        ));

        Ok(Self {
            config,
            product_repo: backends.product_repo,
            user_repo: backends.user_repo,
            slot_store: backends.slot_store,
            lease_repo: backends.lease_repo,
            job_repo: backends.job_repo,
            email_service,
            allocator,
            promoter,
            payments,
            templates,
            jwt_decoding_key,
        })
    }
}
