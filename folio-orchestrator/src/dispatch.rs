//! The dispatch table: job kind -> prerequisite policy + fan-out set.
//!
//! Orchestration behavior is fully determined by the job's kind. Adding a
//! kind means adding an entry here; there is no runtime discovery.

use folio_core::AgentName;

use crate::prereq::PrerequisitePolicy;

#[derive(Debug, Clone, Copy)]
pub struct KindSpec {
    pub kind: &'static str,
    pub prerequisite: PrerequisitePolicy,
    /// Agents dispatched in parallel after prerequisites succeed. Declaration
    /// order is the order `agents_invoked` reports.
    pub fan_out: &'static [AgentName],
}

pub const KINDS: &[KindSpec] = &[KindSpec {
    kind: "portfolio_analysis",
    prerequisite: PrerequisitePolicy::ClassifyUnknownInstruments,
    fan_out: &[
        AgentName::Analyzer,
        AgentName::Visualizer,
        AgentName::Projector,
    ],
}];

pub fn spec_for_kind(kind: &str) -> Option<&'static KindSpec> {
    KINDS.iter().find(|spec| spec.kind == kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_portfolio_analysis_is_dispatchable() {
        let spec = spec_for_kind("portfolio_analysis").expect("kind must be registered");
        assert_eq!(spec.prerequisite, PrerequisitePolicy::ClassifyUnknownInstruments);
        assert_eq!(
            spec.fan_out,
            [
                AgentName::Analyzer,
                AgentName::Visualizer,
                AgentName::Projector
            ]
        );
    }

    #[test]
    fn test_unknown_kind_has_no_spec() {
        assert!(spec_for_kind("tax_report").is_none());
    }

    #[test]
    fn test_classifier_is_never_in_a_fan_out() {
        // The classifier is a prerequisite-only agent; fanning it out would
        // race its reference-set writes against its consumers.
        for spec in KINDS {
            assert!(!spec.fan_out.contains(&AgentName::Classifier));
        }
    }
}
