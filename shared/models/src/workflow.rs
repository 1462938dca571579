//! Run state models.
//!
//! `RunState` is the orchestration's own record of a single BOM run. Stage
//! changes go through pure methods that return a new state, so progress can
//! only move forward and only the transitions below are reachable:
//!
//! ```text
//! parsing -> matching -> awaiting_review -> generating -> completed
//!                     \___________________/
//! any non-terminal stage -> failed
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::bom::BomId;

/// Stages of a BOM run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Parsing,
    Matching,
    AwaitingReview,
    Generating,
    Completed,
    Failed,
}

impl RunStage {
    pub fn can_transition_to(&self, target: RunStage) -> bool {
        use RunStage::*;

        match (self, target) {
            (Parsing, Matching) => true,

            (Matching, AwaitingReview) => true,
            (Matching, Generating) => true,

            (AwaitingReview, Generating) => true,

            (Generating, Completed) => true,

            // Terminal states cannot transition
            (Completed, _) => false,
            (Failed, _) => false,

            (_, Failed) => true,

            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStage::Completed | RunStage::Failed)
    }

    /// Task status mirrored for external observers.
    pub fn task_status(&self) -> TaskStatus {
        match self {
            Self::Parsing | Self::Matching | Self::Generating => TaskStatus::Running,
            Self::AwaitingReview => TaskStatus::Paused,
            Self::Completed => TaskStatus::Completed,
            Self::Failed => TaskStatus::Failed,
        }
    }

    /// The agent responsible for the stage.
    pub fn agent(&self) -> AgentRole {
        match self {
            Self::Parsing => AgentRole::Parser,
            Self::Matching => AgentRole::Matcher,
            Self::AwaitingReview => AgentRole::Reviewer,
            Self::Generating => AgentRole::PoGenerator,
            Self::Completed | Self::Failed => AgentRole::Orchestrator,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "parsing" => Some(Self::Parsing),
            "matching" => Some(Self::Matching),
            "awaiting_review" => Some(Self::AwaitingReview),
            "generating" => Some(Self::Generating),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parsing => write!(f, "parsing"),
            Self::Matching => write!(f, "matching"),
            Self::AwaitingReview => write!(f, "awaiting_review"),
            Self::Generating => write!(f, "generating"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Paused,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Orchestrator,
    Parser,
    Matcher,
    Reviewer,
    PoGenerator,
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Orchestrator => write!(f, "orchestrator"),
            Self::Parser => write!(f, "parser"),
            Self::Matcher => write!(f, "matcher"),
            Self::Reviewer => write!(f, "reviewer"),
            Self::PoGenerator => write!(f, "po_generator"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("Invalid run transition from {from} to {to}")]
    InvalidTransition { from: RunStage, to: RunStage },
}

/// Counters accumulated over a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub parsed_items: usize,
    pub matched_items: usize,
    pub unmatched_items: usize,
    pub review_requests: usize,
    pub draft_pos: usize,
    pub total_cost: Decimal,
    pub warnings: Vec<String>,
}

/// State of one BOM run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunState {
    pub run_id: Uuid,
    pub bom_id: BomId,
    pub bom_name: String,
    pub stage: RunStage,
    /// Within [0, 100] and never decreasing.
    pub progress: f64,
    pub step: String,
    pub error: Option<String>,
    pub summary: RunSummary,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    pub fn new(run_id: Uuid, bom_id: BomId, bom_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            bom_id,
            bom_name: bom_name.into(),
            stage: RunStage::Parsing,
            progress: 0.0,
            step: "Starting".to_string(),
            error: None,
            summary: RunSummary::default(),
            started_at: now,
            updated_at: now,
        }
    }

    /// Moves to `stage`. Staying in the current stage is allowed for progress
    /// checkpoints; a lower `progress` than the current one is ignored.
    pub fn transition(&self, stage: RunStage, progress: f64, step: impl Into<String>) -> Result<Self, StateError> {
        if stage != self.stage && !self.stage.can_transition_to(stage) {
            return Err(StateError::InvalidTransition { from: self.stage, to: stage });
        }
        if stage == self.stage && self.stage.is_terminal() {
            return Err(StateError::InvalidTransition { from: self.stage, to: stage });
        }

        let mut next = self.clone();
        next.stage = stage;
        next.progress = self.progress.max(progress.clamp(0.0, 100.0));
        next.step = step.into();
        next.updated_at = Utc::now();
        Ok(next)
    }

    /// Checkpoint within the current stage.
    pub fn checkpoint(&self, progress: f64, step: impl Into<String>) -> Result<Self, StateError> {
        self.transition(self.stage, progress, step)
    }

    /// Absorbs the run into `failed`. Terminal states are returned unchanged.
    pub fn fail(&self, error: impl Into<String>) -> Self {
        if self.stage.is_terminal() {
            return self.clone();
        }

        let error = error.into();
        let mut next = self.clone();
        next.stage = RunStage::Failed;
        next.step = format!("Failed during {}", self.stage);
        next.error = Some(error);
        next.updated_at = Utc::now();
        next
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

/// Task record kept for status APIs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRecord {
    pub run_id: Uuid,
    pub status: TaskStatus,
    pub progress: f64,
    pub current_step: String,
    pub current_agent: AgentRole,
    pub error_message: Option<String>,
    pub output: Option<RunSummary>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One progress write, mirrored into the task and BOM records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressUpdate {
    pub run_id: Uuid,
    pub bom_id: BomId,
    pub stage: RunStage,
    pub progress: f64,
    pub step: String,
    pub agent: AgentRole,
    pub task_status: TaskStatus,
    pub error: Option<String>,
    pub summary: Option<RunSummary>,
    pub at: DateTime<Utc>,
}

impl ProgressUpdate {
    pub fn from_state(state: &RunState) -> Self {
        Self {
            run_id: state.run_id,
            bom_id: state.bom_id,
            stage: state.stage,
            progress: state.progress,
            step: state.step.clone(),
            agent: state.stage.agent(),
            task_status: state.stage.task_status(),
            error: state.error.clone(),
            summary: state.stage.is_terminal().then(|| state.summary.clone()),
            at: state.updated_at,
        }
    }
}
