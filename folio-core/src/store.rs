//! # JobStore
//!
//! Durable persistence for analysis jobs, backed by the `analysis_jobs`
//! PostgreSQL table. Every mutation is a single-row, single-statement update,
//! so writers on distinct fields never serialize each other, and a reader
//! observes each field's latest committed value.

use std::collections::HashSet;
use std::future::Future;
use std::time::Instant;

use serde_json::Value;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::error::StoreError;
use crate::retry::StoreRetryPolicy;
use crate::types::{AgentName, AnalysisJob, AnalysisSummary, JobInit, JobStatus};

fn query_error(command: &str) -> impl FnOnce(sqlx::Error) -> StoreError + '_ {
    move |error| StoreError::QueryError {
        command: command.to_owned(),
        error,
    }
}

pub struct JobStore {
    pool: PgPool,
    retry_policy: StoreRetryPolicy,
}

impl JobStore {
    pub async fn new(
        config: &PoolConfig,
        retry_policy: StoreRetryPolicy,
    ) -> Result<Self, StoreError> {
        let pool = config
            .connect()
            .await
            .map_err(|error| StoreError::PoolCreationError { error })?;
        Ok(Self { pool, retry_policy })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            retry_policy: StoreRetryPolicy::default(),
        }
    }

    /// Create a PENDING job row. This is the submitter's side of the
    /// contract; the orchestrator never creates jobs, only mutates them.
    pub async fn create_job(&self, init: &JobInit) -> Result<(), StoreError> {
        self.with_retries(|| async {
            sqlx::query(
                r#"
INSERT INTO analysis_jobs
    (id, owner, kind, status, request_payload, created_at, updated_at)
VALUES
    ($1, $2, $3, 'pending'::job_status, $4, NOW(), NOW())
                "#,
            )
            .bind(init.id)
            .bind(&init.owner)
            .bind(&init.kind)
            .bind(&init.request_payload)
            .execute(&self.pool)
            .await
            .map_err(query_error("INSERT"))?;
            Ok(())
        })
        .await
    }

    /// Return the current snapshot of a job.
    pub async fn get(&self, job_id: Uuid) -> Result<AnalysisJob, StoreError> {
        self.with_retries(|| async {
            sqlx::query_as::<_, AnalysisJob>("SELECT * FROM analysis_jobs WHERE id = $1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(query_error("SELECT"))?
                .ok_or(StoreError::NotFound(job_id))
        })
        .await
    }

    /// Atomically transition a job's status, returning the updated row.
    ///
    /// The WHERE clause encodes the legal transitions: PENDING -> RUNNING,
    /// RUNNING -> RUNNING (idempotent refresh on redelivery), and RUNNING ->
    /// COMPLETED | FAILED. `started_at` is stamped on the first transition
    /// out of PENDING, `completed_at` on terminal entry. A terminal row
    /// matches nothing, so at most one writer ever wins the terminal
    /// transition.
    pub async fn set_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<AnalysisJob, StoreError> {
        self.with_retries(|| async {
            let updated = sqlx::query_as::<_, AnalysisJob>(
                r#"
UPDATE analysis_jobs
SET
    status = $2,
    error_message = $3,
    started_at = CASE WHEN started_at IS NULL THEN NOW() ELSE started_at END,
    completed_at = CASE
        WHEN $2 IN ('completed'::job_status, 'failed'::job_status) THEN NOW()
        ELSE completed_at
    END,
    updated_at = NOW()
WHERE
    id = $1
    AND (
        (status = 'pending'::job_status AND $2 = 'running'::job_status)
        OR (status = 'running'::job_status AND $2 != 'pending'::job_status)
    )
RETURNING *
                "#,
            )
            .bind(job_id)
            .bind(status)
            .bind(error_message)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error("UPDATE"))?;

            match updated {
                Some(job) => Ok(job),
                None => {
                    // Zero rows: the job is missing, or the transition is not
                    // legal from its current status. Look again to tell apart.
                    let current = sqlx::query_scalar::<_, JobStatus>(
                        "SELECT status FROM analysis_jobs WHERE id = $1",
                    )
                    .bind(job_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(query_error("SELECT"))?;
                    match current {
                        None => Err(StoreError::NotFound(job_id)),
                        Some(from) => Err(StoreError::IllegalTransition {
                            job: job_id,
                            from,
                            to: status,
                        }),
                    }
                }
            }
        })
        .await
    }

    /// Write one agent's payload slot. First write wins: a slot already
    /// populated (by the agent itself, or by a previous delivery attempt of
    /// the same job) is left untouched, which makes redelivery idempotent.
    pub async fn set_worker_payload(
        &self,
        job_id: Uuid,
        agent: AgentName,
        payload: &Value,
    ) -> Result<(), StoreError> {
        // The column name comes from the closed agent set, never from input.
        let query = format!(
            "UPDATE analysis_jobs SET {0} = COALESCE({0}, $2), updated_at = NOW() WHERE id = $1",
            agent.payload_column()
        );
        self.with_retries(|| async {
            let result = sqlx::query(&query)
                .bind(job_id)
                .bind(payload)
                .execute(&self.pool)
                .await
                .map_err(query_error("UPDATE"))?;
            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound(job_id));
            }
            Ok(())
        })
        .await
    }

    /// Write the summary payload. Called once per job attempt, always before
    /// the terminal status transition.
    pub async fn set_summary(
        &self,
        job_id: Uuid,
        summary: &AnalysisSummary,
    ) -> Result<(), StoreError> {
        let summary = serde_json::to_value(summary)
            .map_err(|error| StoreError::SerializationError { error })?;
        self.with_retries(|| async {
            let result = sqlx::query(
                "UPDATE analysis_jobs SET summary_payload = $2, updated_at = NOW() WHERE id = $1",
            )
            .bind(job_id)
            .bind(&summary)
            .execute(&self.pool)
            .await
            .map_err(query_error("UPDATE"))?;
            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound(job_id));
            }
            Ok(())
        })
        .await
    }

    /// Return the subset of `symbols` already present in the instrument
    /// reference set. The prerequisite resolver uses this to decide whether
    /// the classifier must run before fan-out.
    pub async fn known_instruments(
        &self,
        symbols: &[String],
    ) -> Result<HashSet<String>, StoreError> {
        if symbols.is_empty() {
            return Ok(HashSet::new());
        }
        self.with_retries(|| async {
            let known = sqlx::query_scalar::<_, String>(
                "SELECT symbol FROM instrument_reference WHERE symbol = ANY($1)",
            )
            .bind(symbols)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error("SELECT"))?;
            Ok(known.into_iter().collect())
        })
        .await
    }

    /// Add symbols to the instrument reference set. The classifier agent owns
    /// this data; the primitive exists as its write surface.
    pub async fn register_instruments(&self, symbols: &[String]) -> Result<(), StoreError> {
        self.with_retries(|| async {
            sqlx::query(
                "INSERT INTO instrument_reference (symbol) SELECT UNNEST($1::text[]) ON CONFLICT (symbol) DO NOTHING",
            )
            .bind(symbols)
            .execute(&self.pool)
            .await
            .map_err(query_error("INSERT"))?;
            Ok(())
        })
        .await
    }

    /// Run a store operation, retrying transient backend errors with backoff.
    /// Bounded by the policy's attempt cap and total time budget.
    async fn with_retries<T, F, Fut>(&self, operation: F) -> Result<T, StoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let started = Instant::now();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match operation().await {
                Err(error) if error.is_transient() && attempt < self.retry_policy.max_attempts => {
                    let backoff = self.retry_policy.interval(attempt);
                    if started.elapsed() + backoff > self.retry_policy.max_total {
                        return Err(error);
                    }
                    warn!(attempt, "transient job store error, retrying: {}", error);
                    tokio::time::sleep(backoff).await;
                }
                result => return result,
            }
        }
    }
}
