//! Prerequisite resolution: which setup agents must succeed before fan-out.

use folio_core::{AgentName, AnalysisJob, JobStore, StoreError};
use serde::Deserialize;
use serde_json::Value;

/// Per-kind policy deciding the prerequisite list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrerequisitePolicy {
    /// No setup step.
    None,
    /// Dispatch the classifier exactly once when the snapshot references
    /// instrument symbols missing from the reference set. The classifier owns
    /// populating the set; the resolver only decides whether it must run.
    ClassifyUnknownInstruments,
}

// The portfolio snapshot as embedded in the request payload. The payload is
// otherwise opaque to the core, so parsing is tolerant: unknown fields are
// ignored, and a snapshot that doesn't parse yields no symbols.
#[derive(Debug, Default, Deserialize)]
struct PortfolioSnapshot {
    #[serde(default)]
    positions: Vec<Position>,
}

#[derive(Debug, Deserialize)]
struct Position {
    symbol: String,
}

/// Extract the instrument symbols a request references, deduplicated.
pub fn snapshot_symbols(request_payload: &Value) -> Vec<String> {
    let snapshot: PortfolioSnapshot =
        serde_json::from_value(request_payload.clone()).unwrap_or_default();
    let mut symbols: Vec<String> = snapshot
        .positions
        .into_iter()
        .map(|position| position.symbol)
        .collect();
    symbols.sort();
    symbols.dedup();
    symbols
}

/// Produce the ordered list of prerequisite invocations for a job.
pub async fn resolve_prerequisites(
    store: &JobStore,
    policy: PrerequisitePolicy,
    job: &AnalysisJob,
) -> Result<Vec<AgentName>, StoreError> {
    match policy {
        PrerequisitePolicy::None => Ok(vec![]),
        PrerequisitePolicy::ClassifyUnknownInstruments => {
            let symbols = snapshot_symbols(&job.request_payload);
            if symbols.is_empty() {
                return Ok(vec![]);
            }
            let known = store.known_instruments(&symbols).await?;
            if symbols.iter().any(|symbol| !known.contains(symbol)) {
                Ok(vec![AgentName::Classifier])
            } else {
                Ok(vec![])
            }
        }
    }
}
