//! Parallel fan-out over the agents declared for a job kind.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use folio_core::{AgentExecution, AgentName, ExecutionStatus};
use serde_json::Value;
use tracing::error;
use uuid::Uuid;

use crate::invoker::AgentInvoker;
use crate::timing::timed_invoke;

/// Everything the orchestrator needs to know about one settled invocation.
#[derive(Debug)]
pub struct AgentOutcome {
    pub execution: AgentExecution,
    /// Present iff the invocation succeeded.
    pub output: Option<Value>,
}

/// Invoke `agents` in parallel and wait for every invocation to settle.
///
/// One task per agent, all spawned up front. A failure in one agent never
/// cancels the others, and the result map always contains an entry for every
/// input agent - even a panicked task yields a failed execution record. The
/// deadline applies to each invocation individually, so when the overall job
/// deadline fires, every still-outstanding agent settles as a timeout.
pub async fn run_fan_out(
    invoker: Arc<AgentInvoker>,
    job_id: Uuid,
    agents: &[AgentName],
    deadline: tokio::time::Instant,
) -> HashMap<AgentName, AgentOutcome> {
    let handles: Vec<_> = agents
        .iter()
        .map(|&agent| {
            let invoker = invoker.clone();
            let handle = tokio::spawn(async move {
                let (execution, output) = timed_invoke(&invoker, agent, job_id, deadline).await;
                AgentOutcome { execution, output }
            });
            (agent, handle)
        })
        .collect();

    let mut outcomes = HashMap::with_capacity(handles.len());
    for (agent, handle) in handles {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(join_error) => {
                // A panicked task still gets a summary entry; dropping it
                // would leave the agent unaccounted for in the summary.
                error!(%job_id, agent = %agent, "agent invocation task panicked: {}", join_error);
                AgentOutcome {
                    execution: AgentExecution {
                        status: ExecutionStatus::Failed,
                        started_at: Utc::now(),
                        duration_seconds: 0.0,
                        error: Some(format!("invocation task panicked: {}", join_error)),
                    },
                    output: None,
                }
            }
        };
        outcomes.insert(agent, outcome);
    }

    outcomes
}
