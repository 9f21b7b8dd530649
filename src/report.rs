//! Run reports
//!
//! A [`RunReport`] is the single record of a generation run: the plan that was
//! executed and the terminal result of every node. Reporters turn it into log
//! lines or a JSON file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::error::{GraphBuildError, Result};
use crate::graph::ModuleId;
use crate::language::Language;
use crate::schedule::{GenerationResult, GenerationState};

/// Outcome of one scheduler run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub language: Language,
    pub bundle_hash: String,
    /// Module ids per level, in dispatch order
    pub levels: Vec<Vec<ModuleId>>,
    /// Members of every collapsed cycle
    pub collapsed_units: Vec<Vec<ModuleId>>,
    pub results: BTreeMap<ModuleId, GenerationResult>,
    /// Cancellation was requested during the run
    pub cancelled: bool,
    /// Highest number of concurrent generator calls observed
    pub peak_concurrency: usize,
}

impl RunReport {
    pub fn count(&self, state: GenerationState) -> usize {
        self.results.values().filter(|r| r.state == state).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(GenerationState::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(GenerationState::Failed)
    }

    pub fn cancelled_nodes(&self) -> usize {
        self.count(GenerationState::Cancelled)
    }

    /// Every node succeeded and the run was not cancelled
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.results.values().all(|r| r.succeeded())
    }

    pub fn get(&self, module: &str) -> Option<&GenerationResult> {
        self.results.get(module)
    }

    pub fn total_warnings(&self) -> usize {
        self.results.values().map(|r| r.warnings.len()).sum()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Sink for run-level events
pub trait Reporter {
    /// The graph was rejected before scheduling
    fn graph_failed(&self, error: &GraphBuildError);

    fn run_finished(&self, report: &RunReport) -> Result<()>;
}

/// Logs a summary through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn graph_failed(&self, err: &GraphBuildError) {
        for item in err.diagnostics.errors() {
            error!(
                module = %item.module_id,
                code = item.code.as_str(),
                "{}",
                item.message
            );
        }
    }

    fn run_finished(&self, report: &RunReport) -> Result<()> {
        for result in report.results.values() {
            match result.state {
                GenerationState::Succeeded => info!(
                    module = %result.module_id,
                    repairs = result.repair_attempts,
                    warnings = result.warnings.len(),
                    "Generated"
                ),
                GenerationState::Failed => {
                    let reason = result
                        .errors
                        .first()
                        .map(|f| f.to_string())
                        .unwrap_or_default();
                    error!(
                        module = %result.module_id,
                        repairs = result.repair_attempts,
                        %reason,
                        "Generation failed"
                    )
                }
                GenerationState::Cancelled => warn!(module = %result.module_id, "Cancelled"),
                GenerationState::Pending | GenerationState::InProgress => {
                    warn!(module = %result.module_id, state = ?result.state, "Unfinished")
                }
            }
        }
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            cancelled = report.cancelled_nodes(),
            levels = report.levels.len(),
            peak_concurrency = report.peak_concurrency,
            "Run finished"
        );
        Ok(())
    }
}

/// Writes the report as pretty JSON
#[derive(Debug, Clone)]
pub struct JsonReporter {
    path: PathBuf,
}

impl JsonReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Serialize)]
struct GraphFailure<'a> {
    error_count: usize,
    diagnostics: &'a crate::graph::Diagnostics,
}

impl Reporter for JsonReporter {
    fn graph_failed(&self, err: &GraphBuildError) {
        let body = GraphFailure {
            error_count: err.diagnostics.error_count(),
            diagnostics: &err.diagnostics,
        };
        let written = serde_json::to_string_pretty(&body)
            .map_err(crate::error::ForgeError::from)
            .and_then(|json| Ok(fs::write(&self.path, json)?));
        if let Err(e) = written {
            warn!(path = %self.path.display(), error = %e, "Could not write graph failure report");
        }
    }

    fn run_finished(&self, report: &RunReport) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, report.to_json()?)?;
        info!(path = %self.path.display(), "Report written");
        Ok(())
    }
}
