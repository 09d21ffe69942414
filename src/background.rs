use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{error, info, warn, info_span, Instrument};
use crate::state::AppState;
use crate::domain::models::job::{Job, PAYMENT_FAILED, PAYMENT_SUCCEEDED, SLOT_OFFERED};
use crate::error::AppError;
use crate::infra::factory::{PAYMENT_FAILED_TEMPLATE, PAYMENT_SUCCEEDED_TEMPLATE, SLOT_OFFERED_TEMPLATE};

const JOB_BATCH_SIZE: i32 = 10;

pub async fn start_background_worker(state: Arc<AppState>) {
    info!("Starting background job worker...");

    loop {
        if let Err(e) = run_job_batch(&state).await {
            error!("Failed to fetch pending jobs: {:?}", e);
        }
        sleep(Duration::from_secs(5)).await;
    }
}

/// Claims one batch of due jobs and delivers them. Returns how many were claimed.
pub async fn run_job_batch(state: &AppState) -> Result<usize, AppError> {
    let jobs = state.job_repo.find_pending(JOB_BATCH_SIZE).await?;
    let claimed = jobs.len();

    for job in jobs {
        let span = info_span!(
            "background_job",
            job_id = %job.id,
            job_type = %job.job_type,
            user_id = %job.payload.user_id
        );

        async {
            info!("Processing job: {}", job.job_type);
            match process_job(state, &job).await {
                Ok(_) => {
                    info!("Job completed successfully");
                    if let Err(e) = state.job_repo.update_status(&job.id, "COMPLETED", None).await {
                        error!("Failed to mark job as completed: {:?}", e);
                    }
                }
                Err(e) => {
                    let err_msg = format!("{}", e);
                    error!("Job failed with error: {}", err_msg);
                    if let Err(up_err) = state.job_repo.update_status(&job.id, "FAILED", Some(err_msg)).await {
                        error!("Failed to mark job as failed: {:?}", up_err);
                    }
                }
            }
        }
            .instrument(span)
            .await;
    }

    Ok(claimed)
}

pub async fn start_promoter(state: Arc<AppState>) {
    info!("Starting waitlist promoter (every {}s)...", state.config.promoter_interval_secs);

    let mut ticker = interval(Duration::from_secs(state.config.promoter_interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let span = info_span!("promoter_cycle", owner = %state.config.instance_id);
        async {
            match state.promoter.run_cycle().await {
                Ok(Some(report)) => info!(
                    products = report.products,
                    released = report.released,
                    promoted = report.promoted,
                    opened = report.opened,
                    "Promoter cycle finished"
                ),
                Ok(None) => {}
                Err(e) => error!("Promoter cycle failed: {:?}", e),
            }
        }
            .instrument(span)
            .await;
    }
}

async fn process_job(state: &AppState, job: &Job) -> Result<(), AppError> {
    let payload = &job.payload;

    let user = state.user_repo.find_by_id(&payload.user_id).await?
        .ok_or(AppError::NotFound(format!("User {} not found", payload.user_id)))?;
    let product = state.product_repo.find_by_id(&payload.product_id).await?
        .ok_or(AppError::NotFound(format!("Product {} not found", payload.product_id)))?;

    let mut context = tera::Context::new();
    context.insert("user_name", &user.name);
    context.insert("product_name", &product.name);

    let (template, subject) = match job.job_type.as_str() {
        SLOT_OFFERED | PAYMENT_FAILED => {
            let slot = state.slot_store.find_by_id(&payload.slot_id).await?
                .ok_or(AppError::NotFound(format!("Slot {} not found", payload.slot_id)))?;
            context.insert("reserved_until", &slot.reserved_until.format("%Y-%m-%d %H:%M UTC").to_string());
            context.insert("pay_link", &format!("{}/slots/{}/pay", state.config.frontend_url, slot.key));

            if job.job_type == SLOT_OFFERED {
                (SLOT_OFFERED_TEMPLATE, format!("A spot in {} is ready for you", product.name))
            } else {
                (PAYMENT_FAILED_TEMPLATE, format!("Payment for {} failed", product.name))
            }
        }
        PAYMENT_SUCCEEDED => {
            let member = state.slot_store.list_members_by_user(&user.id).await?
                .into_iter()
                .find(|m| m.product_id == product.id);
            context.insert("amount", &format!(
                "{}.{:02} {}",
                product.price_cents / 100,
                product.price_cents % 100,
                state.config.payment_currency.to_uppercase()
            ));
            context.insert("date_end", &member.map(|m| m.date_end.to_string()));
            context.insert("door_access", &product.grants_door_access());
            (PAYMENT_SUCCEEDED_TEMPLATE, format!("Payment received for {}", product.name))
        }
        other => {
            warn!("No handler for job type {}. Skipping.", other);
            return Ok(());
        }
    };

    let body = state.templates.render(template, &context).map_err(|e| {
        error!("Tera render error: {:?}", e);
        AppError::InternalWithMsg(format!("Tera render error: {:?}", e))
    })?;

    info!("Sending {} email to {}", job.job_type, user.email);
    state.email_service.send(&user.email, &subject, &body).await
}
