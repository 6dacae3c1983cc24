//! # WorkQueue
//!
//! The durable submission channel, implemented on top of the
//! `analysis_queue` PostgreSQL table. Delivery is at-least-once: a received
//! message stays invisible for the visibility timeout and becomes deliverable
//! again if the consumer never acknowledges it. Messages that exhaust their
//! receive budget are parked as dead letters; consuming those is not the
//! core's job.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;

use crate::config::PoolConfig;
use crate::error::QueueError;
use crate::types::SubmissionEnvelope;

fn query_error(command: &str) -> impl FnOnce(sqlx::Error) -> QueueError + '_ {
    move |error| QueueError::QueryError {
        command: command.to_owned(),
        error,
    }
}

/// Enumeration of possible statuses for a queued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "delivery_status", rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Waiting to be received, or received and inside its visibility window.
    Queued,
    /// Acknowledged by a consumer after the job reached a decision.
    Acked,
    /// Exhausted its receive budget without an acknowledgment.
    DeadLettered,
}

/// One received message. Ownership is handed to the consumer; `ack` consumes
/// the delivery so a message cannot be acknowledged twice.
#[derive(Debug, sqlx::FromRow)]
pub struct Delivery {
    pub id: i64,
    /// The raw submission envelope. Parsing (and rejecting) it is the
    /// consumer's concern; the queue carries it opaquely.
    pub payload: Value,
    pub status: DeliveryStatus,
    /// How many times this message has been handed out, this time included.
    pub receive_count: i32,
    pub enqueued_at: DateTime<Utc>,
}

pub struct WorkQueue {
    pool: PgPool,
    visibility_timeout: Duration,
    max_receives: i32,
}

impl WorkQueue {
    pub async fn new(
        config: &PoolConfig,
        visibility_timeout: Duration,
        max_receives: i32,
    ) -> Result<Self, QueueError> {
        let pool = config
            .connect()
            .await
            .map_err(|error| QueueError::PoolCreationError { error })?;
        Ok(Self::from_pool(pool, visibility_timeout, max_receives))
    }

    pub fn from_pool(pool: PgPool, visibility_timeout: Duration, max_receives: i32) -> Self {
        Self {
            pool,
            visibility_timeout,
            max_receives,
        }
    }

    /// Enqueue a submission envelope. The submitter's side of the contract.
    pub async fn enqueue(&self, envelope: &SubmissionEnvelope) -> Result<(), QueueError> {
        let payload = serde_json::to_value(envelope)
            .map_err(|error| QueueError::SerializationError { error })?;
        sqlx::query(
            r#"
INSERT INTO analysis_queue (payload, status, receive_count, visible_at, created_at)
VALUES ($1, $2, 0, NOW(), NOW())
            "#,
        )
        .bind(&payload)
        .bind(DeliveryStatus::Queued)
        .execute(&self.pool)
        .await
        .map_err(query_error("INSERT"))?;
        Ok(())
    }

    /// Receive at most one message. The message becomes invisible to other
    /// receivers until its visibility timeout expires; an unacknowledged
    /// message is redelivered after that.
    ///
    /// The query uses FOR UPDATE SKIP LOCKED so concurrent receivers never
    /// hand out the same message twice inside one visibility window.
    pub async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let delivery = sqlx::query_as::<_, Delivery>(
            r#"
WITH next_delivery AS (
    SELECT id
    FROM analysis_queue
    WHERE
        status = $3
        AND visible_at <= NOW()
        AND receive_count < $1
    ORDER BY id
    LIMIT 1
    FOR UPDATE SKIP LOCKED
)
UPDATE analysis_queue
SET
    receive_count = analysis_queue.receive_count + 1,
    visible_at = NOW() + make_interval(secs => $2::double precision),
    last_received_at = NOW()
FROM next_delivery
WHERE analysis_queue.id = next_delivery.id
RETURNING
    analysis_queue.id,
    analysis_queue.payload,
    analysis_queue.status,
    analysis_queue.receive_count,
    analysis_queue.created_at AS enqueued_at
            "#,
        )
        .bind(self.max_receives)
        .bind(self.visibility_timeout.as_secs_f64())
        .bind(DeliveryStatus::Queued)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error("UPDATE"))?;

        Ok(delivery)
    }

    /// Acknowledge a delivery. Consuming the `Delivery` enforces a single
    /// acknowledgment per receive. Acking a message another receiver has
    /// since been handed is harmless: the row is still `queued`, and the
    /// duplicate consumer will observe the job's terminal status and no-op.
    pub async fn ack(&self, delivery: Delivery) -> Result<(), QueueError> {
        sqlx::query(
            r#"
UPDATE analysis_queue
SET status = $2, acked_at = NOW()
WHERE id = $1 AND status = $3
            "#,
        )
        .bind(delivery.id)
        .bind(DeliveryStatus::Acked)
        .bind(DeliveryStatus::Queued)
        .execute(&self.pool)
        .await
        .map_err(query_error("UPDATE"))?;
        Ok(())
    }

    /// Park messages that have exhausted their receive budget. Run
    /// periodically by the consumer loop; returns how many were moved.
    pub async fn sweep_dead_letters(&self) -> Result<u64, QueueError> {
        let result = sqlx::query(
            r#"
UPDATE analysis_queue
SET status = $2
WHERE
    status = $3
    AND visible_at <= NOW()
    AND receive_count >= $1
            "#,
        )
        .bind(self.max_receives)
        .bind(DeliveryStatus::DeadLettered)
        .bind(DeliveryStatus::Queued)
        .execute(&self.pool)
        .await
        .map_err(query_error("UPDATE"))?;
        Ok(result.rows_affected())
    }

    /// Number of messages currently awaiting delivery (visible or not).
    pub async fn queued_len(&self) -> Result<i64, QueueError> {
        self.count_with_status(DeliveryStatus::Queued).await
    }

    /// Number of dead-lettered messages.
    pub async fn dead_letter_len(&self) -> Result<i64, QueueError> {
        self.count_with_status(DeliveryStatus::DeadLettered).await
    }

    async fn count_with_status(&self, status: DeliveryStatus) -> Result<i64, QueueError> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM analysis_queue WHERE status = $1")
            .bind(status)
            .fetch_one(&self.pool)
            .await
            .map_err(query_error("SELECT"))
    }
}
