//! Per-node generation outcome

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::graph::ModuleId;
use crate::verify::{CheckKind, Finding, LoopOutcome, LoopState};

/// Lifecycle of one node within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationState {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    /// Never dispatched because the run was cancelled
    Cancelled,
}

impl GenerationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// Everything recorded about one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub module_id: ModuleId,
    pub state: GenerationState,
    /// Accepted artifact, or the last rejected one for failed nodes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    pub generations: usize,
    pub repair_attempts: usize,
    pub warnings: Vec<Finding>,
    pub errors: Vec<Finding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl GenerationResult {
    pub fn pending(module_id: ModuleId) -> Self {
        Self {
            module_id,
            state: GenerationState::Pending,
            artifact: None,
            generations: 0,
            repair_attempts: 0,
            warnings: Vec::new(),
            errors: Vec::new(),
            output_path: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Mark dispatched
    pub fn start(module_id: ModuleId) -> Self {
        Self {
            state: GenerationState::InProgress,
            started_at: Some(Utc::now()),
            ..Self::pending(module_id)
        }
    }

    pub fn cancelled(module_id: ModuleId) -> Self {
        Self {
            state: GenerationState::Cancelled,
            finished_at: Some(Utc::now()),
            ..Self::pending(module_id)
        }
    }

    /// Task ended without reporting back (panic or abort)
    pub fn aborted(module_id: ModuleId, reason: impl Into<String>) -> Self {
        Self {
            state: GenerationState::Failed,
            errors: vec![Finding::hard(CheckKind::Transport, reason)],
            finished_at: Some(Utc::now()),
            ..Self::pending(module_id)
        }
    }

    /// Fold a finished repair loop into this in-progress result
    pub fn finish(mut self, outcome: LoopOutcome) -> Self {
        self.state = match outcome.state {
            LoopState::Accepted => GenerationState::Succeeded,
            _ => GenerationState::Failed,
        };
        self.artifact = outcome.artifact;
        self.generations = outcome.generations;
        self.repair_attempts = outcome.repair_attempts;
        self.warnings = outcome.warnings;
        self.errors = outcome.errors;
        self.finished_at = Some(Utc::now());
        self
    }

    /// The artifact was accepted but could not be persisted
    pub fn write_failed(&mut self, reason: impl Into<String>) {
        self.state = GenerationState::Failed;
        self.errors.push(Finding::hard(CheckKind::Output, reason));
    }

    pub fn succeeded(&self) -> bool {
        self.state == GenerationState::Succeeded
    }

    /// Accepted artifact only
    pub fn accepted_artifact(&self) -> Option<&str> {
        if self.succeeded() {
            self.artifact.as_deref()
        } else {
            None
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}
