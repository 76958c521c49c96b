//! Post-payment fulfillment: quota credits and subscription activation.
//!
//! Fulfillment runs through a durable outbox rather than fire-and-forget:
//! the settlement transaction enqueues a job, the callback path attempts it
//! inline, and a background worker retries anything that did not complete.
//! Errors here never affect the order's `paid` status or the gateway ack.

use std::sync::Arc;
use std::time::Duration;

use crate::db::{
    Database, FulfillmentJob, Order, Product, ProductType, FULFILLMENT_RETRY_DELAY_SECS,
};
use crate::error::ServerError;
use crate::metrics;

/// Seconds between outbox scans.
const WORKER_INTERVAL_SECS: u64 = 30;

/// Jobs picked up per scan.
const WORKER_BATCH_SIZE: u32 = 50;

/// Apply the business effect of a freshly paid order.
///
/// Invoked only through the outbox, at least once per settled order.
pub fn fulfill(db: &Database, order: &Order, product: &Product) -> Result<(), ServerError> {
    match ProductType::parse(&product.product_type) {
        Some(ProductType::Quota) => {
            db.credit_quota(order.user_id, product.quota_amount)?;
            tracing::info!(
                order = %order.order_number,
                user = order.user_id,
                amount = product.quota_amount,
                "credited quota"
            );
        }
        Some(ProductType::CustomDomain) | Some(ProductType::CustomDomainYearly) => {
            let days = product.subscription_duration_days.ok_or_else(|| {
                ServerError::Internal(format!(
                    "product {} has no subscription duration",
                    product.id
                ))
            })?;
            let start = chrono::Utc::now();
            let end = start + chrono::Duration::days(days);
            db.insert_subscription(
                order.user_id,
                &product.product_type,
                start.timestamp(),
                end.timestamp(),
            )?;
            tracing::info!(
                order = %order.order_number,
                user = order.user_id,
                days,
                "opened subscription"
            );
        }
        None => {
            tracing::warn!(
                order = %order.order_number,
                product_type = %product.product_type,
                "unexpected product type, nothing to fulfill"
            );
        }
    }
    Ok(())
}

/// Execute one queued job. A failure reschedules the job for the worker and
/// is never propagated: the gateway ack must not depend on fulfillment.
pub fn run_job(db: &Database, job: &FulfillmentJob) {
    match try_run_job(db, job) {
        Ok(()) => {
            if let Err(e) = db.mark_job_done(job.id) {
                tracing::error!(job = job.id, error = %e, "failed to mark fulfillment job done");
            }
            metrics::FULFILLMENT_JOBS
                .with_label_values(&["fulfilled"])
                .inc();
        }
        Err(e) => {
            let attempt = job.attempts + 1;
            tracing::warn!(
                job = job.id,
                order_id = job.order_id,
                attempt,
                error = %e,
                "fulfillment failed, leaving job queued for retry"
            );
            let next = chrono::Utc::now().timestamp() + FULFILLMENT_RETRY_DELAY_SECS;
            if let Err(e) = db.reschedule_job(job.id, next) {
                tracing::error!(job = job.id, error = %e, "failed to reschedule fulfillment job");
            }
            metrics::FULFILLMENT_JOBS
                .with_label_values(&["retried"])
                .inc();
        }
    }
}

fn try_run_job(db: &Database, job: &FulfillmentJob) -> Result<(), ServerError> {
    let order = db
        .get_order(job.order_id)?
        .ok_or_else(|| ServerError::Internal(format!("order {} missing", job.order_id)))?;
    let product = db
        .get_product(order.product_id)?
        .ok_or_else(|| ServerError::Internal(format!("product {} missing", order.product_id)))?;
    fulfill(db, &order, &product)
}

/// Attempt the queued job for a freshly settled order, so the common case
/// fulfills before the gateway ack goes out. Failures stay queued.
pub fn attempt_now(db: &Database, order_id: i64) {
    match db.job_for_order(order_id) {
        Ok(Some(job)) if job.completed_at.is_none() => run_job(db, &job),
        Ok(_) => {}
        Err(e) => {
            tracing::error!(order_id, error = %e, "failed to load fulfillment job");
        }
    }
}

/// Spawn the background outbox worker. Scans for due jobs on an interval and
/// retries until each one completes; incomplete jobs survive restarts.
pub fn spawn_worker(db: Arc<Database>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(WORKER_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let now = chrono::Utc::now().timestamp();
            let due = match db.due_fulfillment_jobs(now, WORKER_BATCH_SIZE) {
                Ok(jobs) => jobs,
                Err(e) => {
                    tracing::error!(error = %e, "failed to scan fulfillment outbox");
                    continue;
                }
            };
            for job in due {
                run_job(&db, &job);
            }
        }
    });
}
