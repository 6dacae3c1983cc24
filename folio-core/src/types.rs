use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle state of an analysis job. Transitions are monotone: PENDING ->
/// RUNNING -> (COMPLETED | FAILED), and a terminal job never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
pub enum JobStatus {
    /// Created by a submitter, not yet picked up by an orchestrator.
    Pending,
    /// Owned by an orchestrator; agents may be in flight.
    Running,
    /// Terminal. The summary payload is written and authoritative.
    Completed,
    /// Terminal. `error_message` holds the reason.
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            invalid => Err(format!("{} is not a valid JobStatus", invalid)),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// The fixed set of worker agents the orchestrator can dispatch. Each agent
/// owns exactly one payload slot on the job record, so the set is closed at
/// compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentName {
    Classifier,
    Analyzer,
    Visualizer,
    Projector,
}

impl AgentName {
    pub const ALL: [AgentName; 4] = [
        AgentName::Classifier,
        AgentName::Analyzer,
        AgentName::Visualizer,
        AgentName::Projector,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentName::Classifier => "classifier",
            AgentName::Analyzer => "analyzer",
            AgentName::Visualizer => "visualizer",
            AgentName::Projector => "projector",
        }
    }

    /// Column on `analysis_jobs` holding this agent's authoritative output.
    pub fn payload_column(&self) -> &'static str {
        match self {
            AgentName::Classifier => "classifier_payload",
            AgentName::Analyzer => "analyzer_payload",
            AgentName::Visualizer => "visualizer_payload",
            AgentName::Projector => "projector_payload",
        }
    }
}

impl FromStr for AgentName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "classifier" => Ok(AgentName::Classifier),
            "analyzer" => Ok(AgentName::Analyzer),
            "visualizer" => Ok(AgentName::Visualizer),
            "projector" => Ok(AgentName::Projector),
            invalid => Err(format!("{} is not a valid AgentName", invalid)),
        }
    }
}

impl fmt::Display for AgentName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The chunk of data an external submitter provides to create a job row.
/// Submitters own job creation; the orchestrator only ever mutates.
#[derive(Debug, Clone)]
pub struct JobInit {
    pub id: Uuid,
    pub owner: String,
    pub kind: String,
    pub request_payload: Value,
}

/// One end-to-end analysis request, as stored in `analysis_jobs`. This row is
/// the source of truth external pollers read; the request payload and the
/// per-agent payload slots are opaque to the orchestration core.
#[derive(Debug, sqlx::FromRow)]
pub struct AnalysisJob {
    pub id: Uuid,
    pub owner: String,
    pub kind: String,
    pub status: JobStatus,
    pub request_payload: Value,
    pub classifier_payload: Option<Value>,
    pub analyzer_payload: Option<Value>,
    pub visualizer_payload: Option<Value>,
    pub projector_payload: Option<Value>,
    pub summary_payload: Option<Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisJob {
    pub fn worker_payload(&self, agent: AgentName) -> Option<&Value> {
        match agent {
            AgentName::Classifier => self.classifier_payload.as_ref(),
            AgentName::Analyzer => self.analyzer_payload.as_ref(),
            AgentName::Visualizer => self.visualizer_payload.as_ref(),
            AgentName::Projector => self.projector_payload.as_ref(),
        }
    }
}

/// The message carried on the work queue. Submitters may attach extra fields;
/// only `job_id` is meaningful, the rest are ignored on parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionEnvelope {
    pub job_id: Uuid,
}

/// Outcome of a single agent invocation, as recorded in the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }
}

/// Timing and status for one agent invocation. `error` is present iff the
/// invocation failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentExecution {
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The aggregate written to `summary_payload` exactly once, just before the
/// terminal status transition. Pollers must ignore it unless the job status
/// is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub total_duration_seconds: f64,
    pub completion_time: DateTime<Utc>,
    /// Agents actually dispatched: prerequisites first, in dispatch order,
    /// then the fan-out set in declaration order.
    pub agents_invoked: Vec<String>,
    pub agent_executions: HashMap<String, AgentExecution>,
}
