// Metric names for the orchestrator service

pub const DELIVERIES_RECEIVED: &str = "orchestrator_deliveries_received_total";
pub const ENVELOPES_MALFORMED: &str = "orchestrator_envelopes_malformed_total";
pub const JOBS_UNKNOWN: &str = "orchestrator_unknown_jobs_total";
pub const TERMINAL_REDELIVERIES: &str = "orchestrator_terminal_redeliveries_total";

pub const JOBS_COMPLETED: &str = "orchestrator_jobs_completed_total";
pub const JOBS_FAILED: &str = "orchestrator_jobs_failed_total";
pub const JOB_TOTAL_TIME: &str = "orchestrator_job_duration_seconds";

pub const AGENT_INVOCATION_TIME: &str = "orchestrator_agent_invocation_duration_seconds";

pub const CONSUMER_SATURATION: &str = "orchestrator_consumer_saturation_percent";
pub const DEAD_LETTERS_SWEPT: &str = "orchestrator_dead_letters_swept_total";
