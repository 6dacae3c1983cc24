//! The orchestrator: owns a job from dequeue to terminal transition.
//!
//! Per delivery, the state machine is PENDING -> RUNNING -> (COMPLETED |
//! FAILED). Prerequisites run sequentially and are fatal on failure; the
//! fan-out set runs in parallel and individual failures are recorded but
//! never fail the job. The summary is always written before the terminal
//! status, so a poller that observes a terminal status also observes a
//! consistent summary.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use folio_core::{
    AgentExecution, AgentName, AnalysisJob, AnalysisSummary, Delivery, ExecutionStatus, JobStatus,
    QueueError, StoreError, SubmissionEnvelope,
};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::context::AppContext;
use crate::dispatch::spec_for_kind;
use crate::fanout::run_fan_out;
use crate::metrics_constants::*;
use crate::prereq::resolve_prerequisites;
use crate::timing::timed_invoke;

pub const DEADLINE_EXCEEDED_ERROR: &str = "orchestrator deadline exceeded";

/// Errors in the orchestrator itself. These mean the current delivery could
/// not be brought to a decision; the message stays unacked and the queue
/// redelivers it after the visibility timeout.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("error during startup: {0}")]
    Startup(String),
}

/// Handle one delivery end to end: parse the envelope, load the job, dedupe
/// against terminal state, drive the job, acknowledge.
///
/// Validation problems (malformed envelope, unknown job id) are acked without
/// touching any job: requeueing them can never succeed, and they are
/// submitter bugs, not job failures.
#[instrument(skip_all, fields(delivery_id = delivery.id))]
pub async fn process_delivery(
    context: Arc<AppContext>,
    delivery: Delivery,
) -> Result<(), OrchestratorError> {
    let envelope: SubmissionEnvelope = match serde_json::from_value(delivery.payload.clone()) {
        Ok(envelope) => envelope,
        Err(parse_error) => {
            warn!("acking malformed submission envelope: {}", parse_error);
            metrics::counter!(ENVELOPES_MALFORMED).increment(1);
            context.queue.ack(delivery).await?;
            return Ok(());
        }
    };

    let job = match context.store.get(envelope.job_id).await {
        Ok(job) => job,
        Err(StoreError::NotFound(job_id)) => {
            warn!(%job_id, "acking envelope for unknown job");
            metrics::counter!(JOBS_UNKNOWN).increment(1);
            context.queue.ack(delivery).await?;
            return Ok(());
        }
        Err(other) => return Err(other.into()),
    };

    if job.status.is_terminal() {
        info!(job_id = %job.id, status = %job.status, "job already terminal, acking redelivery");
        metrics::counter!(TERMINAL_REDELIVERIES).increment(1);
        context.queue.ack(delivery).await?;
        return Ok(());
    }

    drive_job(&context, job).await?;
    context.queue.ack(delivery).await?;
    Ok(())
}

/// Drive one job from RUNNING to a terminal state.
///
/// Every `Ok` return has written a summary and taken (or lost a benign race
/// for) the terminal transition; every `Err` return leaves the job
/// non-terminal for the redelivery path to resume.
#[instrument(skip_all, fields(job_id = %job.id, kind = %job.kind))]
async fn drive_job(context: &AppContext, job: AnalysisJob) -> Result<(), OrchestratorError> {
    // On redelivery the job may already be RUNNING; the refresh is legal and
    // keeps the original started_at, which anchors the total duration.
    let job = match context.store.set_status(job.id, JobStatus::Running, None).await {
        Ok(job) => job,
        Err(StoreError::IllegalTransition { from, .. }) if from.is_terminal() => {
            info!("job finished by another consumer before we started");
            return Ok(());
        }
        Err(other) => return Err(other.into()),
    };

    let deadline = tokio::time::Instant::now() + context.config.orchestrator_timeout;
    let outcome = run_analysis(context, &job, deadline).await;

    context.store.set_summary(job.id, &outcome.summary).await?;

    match outcome.failure {
        None => {
            take_terminal_transition(context, job.id, JobStatus::Completed, None).await?;
            metrics::counter!(JOBS_COMPLETED).increment(1);
            metrics::histogram!(JOB_TOTAL_TIME).record(outcome.summary.total_duration_seconds);
            info!(
                "analysis completed in {:.1}s",
                outcome.summary.total_duration_seconds
            );
        }
        Some(error_message) => {
            take_terminal_transition(context, job.id, JobStatus::Failed, Some(&error_message))
                .await?;
            metrics::counter!(JOBS_FAILED).increment(1);
            warn!("analysis failed: {}", error_message);
        }
    }

    Ok(())
}

struct RunOutcome {
    summary: AnalysisSummary,
    /// Present when the job must be FAILED; becomes its `error_message`.
    failure: Option<String>,
}

/// Run prerequisites and fan-out for one job, producing the summary and the
/// job-level verdict. Store problems inside the run are folded into the
/// verdict rather than returned: the job still gets a summary and a terminal
/// state, with the backend error as its message.
async fn run_analysis(
    context: &AppContext,
    job: &AnalysisJob,
    deadline: tokio::time::Instant,
) -> RunOutcome {
    let mut agents_invoked: Vec<String> = Vec::new();
    let mut agent_executions: HashMap<String, AgentExecution> = HashMap::new();

    let Some(kind_spec) = spec_for_kind(&job.kind) else {
        return finish(
            job,
            agents_invoked,
            agent_executions,
            Some(format!("unknown job kind: {}", job.kind)),
        );
    };

    let prerequisites =
        match resolve_prerequisites(&context.store, kind_spec.prerequisite, job).await {
            Ok(prerequisites) => prerequisites,
            Err(store_error) => {
                return finish(
                    job,
                    agents_invoked,
                    agent_executions,
                    Some(store_error.to_string()),
                );
            }
        };

    // Prerequisites run sequentially, in order; the first failure is fatal
    // and nothing fans out. The failing agent's own error becomes the job's.
    for agent in prerequisites {
        agents_invoked.push(agent.to_string());
        let invocation_deadline = invocation_deadline(deadline, context.config.worker_timeout);
        let (execution, output) =
            timed_invoke(&context.invoker, agent, job.id, invocation_deadline).await;
        let (execution, _store_failure) = match output {
            Some(output) => persist_output(context, job.id, agent, execution, &output).await,
            None => (execution, None),
        };
        let failure = match execution.status {
            ExecutionStatus::Completed => None,
            ExecutionStatus::Failed => Some(
                execution
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("prerequisite {} failed", agent)),
            ),
        };
        agent_executions.insert(agent.to_string(), execution);
        if failure.is_some() {
            return finish(job, agents_invoked, agent_executions, failure);
        }
    }

    // Fan-out. Slots already filled by a previous delivery attempt are
    // skipped, not re-invoked; their original payload stays untouched.
    let mut to_run: Vec<AgentName> = Vec::new();
    for &agent in kind_spec.fan_out {
        agents_invoked.push(agent.to_string());
        if job.worker_payload(agent).is_some() {
            info!(agent = %agent, "payload slot already filled, skipping re-invocation");
            agent_executions.insert(agent.to_string(), skipped_execution());
        } else {
            to_run.push(agent);
        }
    }

    let mut store_failure: Option<String> = None;
    if !to_run.is_empty() {
        let invocation_deadline = invocation_deadline(deadline, context.config.worker_timeout);
        let outcomes =
            run_fan_out(context.invoker.clone(), job.id, &to_run, invocation_deadline).await;
        for (agent, outcome) in outcomes {
            let (execution, failure) = match outcome.output {
                Some(output) => {
                    persist_output(context, job.id, agent, outcome.execution, &output).await
                }
                None => (outcome.execution, None),
            };
            agent_executions.insert(agent.to_string(), execution);
            store_failure = store_failure.or(failure);
        }
    }

    // Individual fan-out failures are recorded but not fatal. The job only
    // fails here if the overall deadline lapsed (every outstanding agent has
    // settled as a timeout by now) or an output could not be persisted.
    let failure = if tokio::time::Instant::now() >= deadline {
        Some(DEADLINE_EXCEEDED_ERROR.to_string())
    } else {
        store_failure
    };

    finish(job, agents_invoked, agent_executions, failure)
}

/// Bound one invocation by the earlier of the per-worker timeout and the
/// overall job deadline.
fn invocation_deadline(
    job_deadline: tokio::time::Instant,
    worker_timeout: Duration,
) -> tokio::time::Instant {
    std::cmp::min(job_deadline, tokio::time::Instant::now() + worker_timeout)
}

/// Write a successful invocation's output into the agent's slot. A store
/// failure here downgrades the execution record - an output we could not
/// persist is not a completed execution - and escalates to the job level.
async fn persist_output(
    context: &AppContext,
    job_id: Uuid,
    agent: AgentName,
    execution: AgentExecution,
    output: &Value,
) -> (AgentExecution, Option<String>) {
    match context.store.set_worker_payload(job_id, agent, output).await {
        Ok(()) => (execution, None),
        Err(store_error) => {
            let message = store_error.to_string();
            error!(%job_id, agent = %agent, "failed to persist agent output: {}", message);
            (
                AgentExecution {
                    status: ExecutionStatus::Failed,
                    error: Some(message.clone()),
                    ..execution
                },
                Some(message),
            )
        }
    }
}

// A fan-out agent whose slot was filled by a previous attempt. Completed with
// zero duration; the payload invariant holds because the slot is non-null by
// definition.
fn skipped_execution() -> AgentExecution {
    AgentExecution {
        status: ExecutionStatus::Completed,
        started_at: Utc::now(),
        duration_seconds: 0.0,
        error: None,
    }
}

fn finish(
    job: &AnalysisJob,
    agents_invoked: Vec<String>,
    agent_executions: HashMap<String, AgentExecution>,
    failure: Option<String>,
) -> RunOutcome {
    let completion_time = Utc::now();
    // Total duration spans from the stored RUNNING entry, which survives
    // redeliveries; completed_at gets stamped within the same write window.
    let total_duration_seconds = match job.started_at {
        Some(started_at) => (completion_time - started_at).num_milliseconds() as f64 / 1000.0,
        None => 0.0,
    };

    RunOutcome {
        summary: AnalysisSummary {
            total_duration_seconds,
            completion_time,
            agents_invoked,
            agent_executions,
        },
        failure,
    }
}

/// Take the terminal transition, tolerating a lost race: if another consumer
/// got there first the job is terminal either way, and the delivery can be
/// acked.
async fn take_terminal_transition(
    context: &AppContext,
    job_id: Uuid,
    status: JobStatus,
    error_message: Option<&str>,
) -> Result<(), OrchestratorError> {
    match context.store.set_status(job_id, status, error_message).await {
        Ok(_) => Ok(()),
        Err(StoreError::IllegalTransition { from, .. }) if from.is_terminal() => {
            info!(%job_id, "terminal transition already taken by another consumer");
            Ok(())
        }
        Err(other) => Err(other.into()),
    }
}
