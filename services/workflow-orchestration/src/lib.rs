//! Procura Workflow Orchestration
//!
//! Runs a BOM through parsing, catalog matching, an optional human review
//! pause and purchase-order generation, reporting progress as it goes.

pub mod bootstrap;
pub mod embedding;
pub mod engine;
pub mod grouping;
pub mod matching;
pub mod progress;
pub mod review_gate;
pub mod service;

pub use bootstrap::build_service;
pub use embedding::OpenAiEmbedder;
pub use engine::{CancelFlag, EngineSettings, WorkflowEngine, CANCELLED};
pub use grouping::GroupingEngine;
pub use matching::{DegradeToEmpty, MatchEngine, MatchError, MatchSettings};
pub use progress::ProgressReporter;
pub use review_gate::{GateDecision, ReviewGate};
pub use service::{RunService, RunSnapshot};

use procura_utils::AppConfig;

impl From<&AppConfig> for EngineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            confidence_threshold: config.matching.confidence_threshold,
            max_concurrent_matches: config.matching.max_concurrent_matches,
            po_approval_threshold: config.purchasing.po_approval_threshold,
            po_number_prefix: config.purchasing.po_number_prefix.clone(),
        }
    }
}
