// We do this pattern (privately use a module, then re-export parts of it) so we can
// refactor the internals without breaking the public API.

mod types;
pub use types::AgentExecution;
pub use types::AgentName;
pub use types::AnalysisJob;
pub use types::AnalysisSummary;
pub use types::ExecutionStatus;
pub use types::JobInit;
pub use types::JobStatus;
pub use types::SubmissionEnvelope;

mod error;
// Errors about the job store - missing rows, illegal transitions, backend failures
pub use error::StoreError;
// Errors about the work queue itself - postgres/network errors
pub use error::QueueError;

mod retry;
pub use retry::StoreRetryPolicy;

mod config;
pub use config::PoolConfig;

mod store;
pub use store::JobStore;

mod queue;
pub use queue::Delivery;
pub use queue::DeliveryStatus;
pub use queue::WorkQueue;
