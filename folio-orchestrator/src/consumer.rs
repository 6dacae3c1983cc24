//! The work queue consumer loop.

use std::sync::Arc;

use folio_core::Delivery;
use tokio::sync::Semaphore;
use tracing::{error, warn};

use crate::context::AppContext;
use crate::metrics_constants::*;
use crate::orchestrator::{process_delivery, OrchestratorError};

/// Wait until a delivery is available, reporting liveness on every poll and
/// sweeping exhausted messages to the dead letter on a coarser cadence.
async fn wait_for_delivery(context: &AppContext) -> Result<Delivery, OrchestratorError> {
    let mut poll = tokio::time::interval(context.config.poll_interval);
    let mut sweep = tokio::time::interval(context.config.dead_letter_sweep_interval);

    loop {
        tokio::select! {
            _ = poll.tick() => {
                context.liveness.report_healthy().await;
                if let Some(delivery) = context.queue.receive().await? {
                    metrics::counter!(DELIVERIES_RECEIVED).increment(1);
                    return Ok(delivery);
                }
            }
            _ = sweep.tick() => {
                let moved = context.queue.sweep_dead_letters().await?;
                if moved > 0 {
                    warn!("dead lettered {} exhausted deliveries", moved);
                    metrics::counter!(DEAD_LETTERS_SWEPT).increment(moved);
                }
            }
        }
    }
}

/// Run the consumer until an unrecoverable queue or store error.
///
/// One message is pulled at a time; each job runs on its own task, bounded by
/// `max_concurrent_jobs`. A job task that fails - or panics - never acks its
/// delivery, so the queue redelivers the message after the visibility
/// timeout, and a job that was already brought to a terminal state turns the
/// redelivery into a no-op acknowledgment.
pub async fn run(context: Arc<AppContext>) -> Result<(), OrchestratorError> {
    let semaphore = Arc::new(Semaphore::new(context.config.max_concurrent_jobs));

    loop {
        metrics::gauge!(CONSUMER_SATURATION).set(
            1f64 - semaphore.available_permits() as f64 / context.config.max_concurrent_jobs as f64,
        );

        let delivery = wait_for_delivery(&context).await?;
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore has been closed");

        let context = context.clone();
        tokio::spawn(async move {
            let result = process_delivery(context, delivery).await;
            drop(permit);
            if let Err(error) = result {
                error!("failed to process delivery: {}", error);
            }
        });
    }
}
