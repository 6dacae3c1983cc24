//! Per-invocation timing capture.
//!
//! Every dispatched agent gets exactly one execution record in the summary,
//! no matter how the invocation ends. The timer is a scope: started before
//! the invocation, consumed into a record on every exit path, including the
//! deadline path where the in-flight request future is simply dropped.

use std::time::Instant;

use chrono::{DateTime, Utc};
use folio_core::{AgentExecution, AgentName, ExecutionStatus};
use serde_json::Value;
use uuid::Uuid;

use crate::invoker::{AgentInvoker, InvocationError};
use crate::metrics_constants::AGENT_INVOCATION_TIME;

pub struct InvocationTimer {
    started_at: DateTime<Utc>,
    clock: Instant,
}

impl InvocationTimer {
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            clock: Instant::now(),
        }
    }

    /// Consume the timer into the execution record for one settled invocation.
    pub fn finish(self, result: &Result<Value, InvocationError>) -> AgentExecution {
        let duration_seconds = self.clock.elapsed().as_secs_f64();
        match result {
            Ok(_) => AgentExecution {
                status: ExecutionStatus::Completed,
                started_at: self.started_at,
                duration_seconds,
                error: None,
            },
            Err(error) => AgentExecution {
                status: ExecutionStatus::Failed,
                started_at: self.started_at,
                duration_seconds,
                error: Some(error.to_string()),
            },
        }
    }
}

/// Invoke one agent inside a timing scope, bounded by `deadline` - the
/// earlier of the per-worker timeout and the overall job deadline.
/// Cancellation at the deadline is cooperative: the request future is dropped
/// and the record reports a timed-out, failed execution.
pub async fn timed_invoke(
    invoker: &AgentInvoker,
    agent: AgentName,
    job_id: Uuid,
    deadline: tokio::time::Instant,
) -> (AgentExecution, Option<Value>) {
    let timer = InvocationTimer::start();
    let result = match tokio::time::timeout_at(deadline, invoker.invoke(agent, job_id)).await {
        Ok(result) => result,
        Err(_) => Err(InvocationError::Timeout),
    };
    let execution = timer.finish(&result);

    let labels = [
        ("agent", agent.to_string()),
        ("outcome", execution.status.as_str().to_string()),
    ];
    metrics::histogram!(AGENT_INVOCATION_TIME, &labels).record(execution.duration_seconds);

    (execution, result.ok())
}
