//! Artifact Verification
//!
//! Three checks run against every generated artifact:
//!
//! 1. structure: the artifact is lexically well-formed for its language
//! 2. declared elements: names the blueprint declares appear in the artifact
//! 3. imports: project-local imports point at real modules and real symbols
//!
//! Structural and import failures are hard and trigger a repair. Missing
//! declared elements are soft and only reported, unless the verifier is
//! configured to repair on soft findings.

pub mod declared;
pub mod imports;
pub mod repair;
pub mod structure;

pub use declared::{declared_elements, DeclaredMatcher};
pub use imports::{check_imports, extract_imports, ImportStatement, ImportTarget};
pub use repair::{LoopOutcome, LoopState, RepairLoop, RepairPolicy};
pub use structure::check_structure;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::graph::ModuleId;
use crate::interface::ArtifactInterface;
use crate::language::Language;

// =============================================================================
// Findings
// =============================================================================

/// Which check produced a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Structure,
    DeclaredElement,
    Import,
    /// Generator failed or timed out
    Transport,
    /// Accepted artifact could not be persisted
    Output,
}

/// Hard findings reject the artifact; soft findings are warnings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingSeverity {
    Hard,
    Soft,
}

/// One verification observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub check: CheckKind,
    pub severity: FindingSeverity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl Finding {
    pub fn hard(check: CheckKind, message: impl Into<String>) -> Self {
        Self {
            check,
            severity: FindingSeverity::Hard,
            message: message.into(),
            line: None,
        }
    }

    pub fn soft(check: CheckKind, message: impl Into<String>) -> Self {
        Self {
            check,
            severity: FindingSeverity::Soft,
            message: message.into(),
            line: None,
        }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn is_hard(&self) -> bool {
        self.severity == FindingSeverity::Hard
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {}: {}", line, self.message),
            None => f.write_str(&self.message),
        }
    }
}

// =============================================================================
// Context & Report
// =============================================================================

/// Verifier settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VerifyConfig {
    /// Minimum fuzzy confidence (0..=1) for a declared element to count as present
    pub fuzzy_threshold: f64,
    pub check_declared: bool,
    pub check_imports: bool,
    /// Soft findings also reject the artifact
    pub repair_on_soft_findings: bool,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.8,
            check_declared: true,
            check_imports: true,
            repair_on_soft_findings: false,
        }
    }
}

/// What the verifier knows about the node being generated
#[derive(Debug, Clone)]
pub struct VerificationContext {
    pub module_id: ModuleId,
    pub language: Language,
    /// Element names the blueprint declares
    pub declared: Vec<String>,
    pub dependencies: BTreeSet<ModuleId>,
    /// Other members of this node's cycle
    pub peers: BTreeSet<ModuleId>,
    /// Every module in the project
    pub known_modules: Arc<BTreeSet<ModuleId>>,
    /// Symbols each dependency or peer is known to expose
    pub exposures: BTreeMap<ModuleId, BTreeSet<String>>,
}

impl VerificationContext {
    /// Context with no neighbours; dependencies are added with the builder methods
    pub fn new(
        module_id: ModuleId,
        language: Language,
        blueprint: &str,
        known_modules: Arc<BTreeSet<ModuleId>>,
    ) -> Self {
        Self {
            module_id,
            language,
            declared: declared_elements(blueprint),
            dependencies: BTreeSet::new(),
            peers: BTreeSet::new(),
            known_modules,
            exposures: BTreeMap::new(),
        }
    }

    pub fn with_dependency(mut self, module: ModuleId, exposed: BTreeSet<String>) -> Self {
        self.exposures.entry(module.clone()).or_default().extend(exposed);
        self.dependencies.insert(module);
        self
    }

    pub fn with_peer(mut self, module: ModuleId, exposed: BTreeSet<String>) -> Self {
        self.exposures.entry(module.clone()).or_default().extend(exposed);
        self.peers.insert(module);
        self
    }

    /// Dependency or cycle peer
    pub fn is_neighbour(&self, module: &ModuleId) -> bool {
        self.dependencies.contains(module) || self.peers.contains(module)
    }
}

/// Outcome of one verification pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub findings: Vec<Finding>,
}

impl VerificationReport {
    pub fn hard(&self) -> Vec<Finding> {
        self.findings.iter().filter(|f| f.is_hard()).cloned().collect()
    }

    pub fn soft(&self) -> Vec<Finding> {
        self.findings.iter().filter(|f| !f.is_hard()).cloned().collect()
    }

    pub fn has_hard(&self) -> bool {
        self.findings.iter().any(|f| f.is_hard())
    }
}

// =============================================================================
// Verifier
// =============================================================================

/// Runs the configured checks
#[derive(Debug, Clone, Default)]
pub struct Verifier {
    config: VerifyConfig,
}

impl Verifier {
    pub fn new(config: VerifyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VerifyConfig {
        &self.config
    }

    pub fn verify(&self, artifact: &str, ctx: &VerificationContext) -> VerificationReport {
        let mut findings = check_structure(ctx.language, artifact);
        // semantic checks on broken source only add noise
        if findings.iter().any(|f| f.is_hard()) {
            return VerificationReport { findings };
        }

        if self.config.check_declared && !ctx.declared.is_empty() {
            let interface = ArtifactInterface::extract(ctx.language, artifact);
            let matcher = DeclaredMatcher::new(self.config.fuzzy_threshold);
            findings.extend(matcher.check(&ctx.declared, artifact, &interface));
        }

        if self.config.check_imports {
            findings.extend(check_imports(ctx, artifact));
        }

        VerificationReport { findings }
    }

    /// Whether a report lets the artifact through
    pub fn accepts(&self, report: &VerificationReport) -> bool {
        if self.config.repair_on_soft_findings {
            report.findings.is_empty()
        } else {
            !report.has_hard()
        }
    }
}
