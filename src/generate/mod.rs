//! Code Generation
//!
//! The scheduler never talks to a model directly. It builds a
//! [`GenerationRequest`] and hands it to a [`CodeGenerator`]; any retry or
//! backoff for transport failures happens inside the generator.

pub mod command;

pub use command::{extract_code, CommandGenerator};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::error::TransportError;
use crate::graph::ModuleId;
use crate::language::Language;
use crate::verify::Finding;

/// What a dependency contributes to the prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextSource {
    /// Interface summary of an accepted artifact
    ArtifactSummary,
    /// Raw blueprint text, used when no accepted artifact exists
    Blueprint,
}

/// Context supplied for one dependency or cycle peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyContext {
    pub module_id: ModuleId,
    pub source: ContextSource,
    pub text: String,
    /// Symbols named in the reference, e.g. `@models.task[Task]`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requested_symbols: Vec<String>,
}

/// The rejected previous attempt, fed back for repair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorFailure {
    pub attempt: usize,
    pub artifact: String,
    pub findings: Vec<Finding>,
}

/// Everything a generator needs for one attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub module_id: ModuleId,
    pub language: Language,
    pub blueprint: String,
    pub dependencies: Vec<DependencyContext>,
    /// Other members of a collapsed cycle
    pub peers: Vec<DependencyContext>,
    /// Third-party packages from the project manifest
    #[serde(default)]
    pub dependency_versions: BTreeMap<String, String>,
    /// Zero-based generation attempt
    pub attempt: usize,
    pub prior_failure: Option<PriorFailure>,
}

impl GenerationRequest {
    pub fn new(module_id: ModuleId, language: Language, blueprint: impl Into<String>) -> Self {
        Self {
            module_id,
            language,
            blueprint: blueprint.into(),
            dependencies: Vec::new(),
            peers: Vec::new(),
            dependency_versions: BTreeMap::new(),
            attempt: 0,
            prior_failure: None,
        }
    }

    pub fn is_repair(&self) -> bool {
        self.prior_failure.is_some()
    }

    /// Plain-text prompt for text-in/text-out generators
    pub fn render_prompt(&self) -> String {
        let mut out = String::new();
        let lang = self.language;

        if !self.dependencies.is_empty() {
            out.push_str("You have access to the following dependency modules:\n\n");
            for dep in &self.dependencies {
                render_context(&mut out, "Module", dep);
            }
            out.push_str("=== END OF DEPENDENCIES ===\n\n");
        }

        if !self.peers.is_empty() {
            out.push_str(
                "The following modules form a cycle with this one and are generated alongside it. \
                 Refer to their names as written; do not redefine them:\n\n",
            );
            for peer in &self.peers {
                render_context(&mut out, "Peer", peer);
            }
            out.push_str("=== END OF PEERS ===\n\n");
        }

        if !self.dependency_versions.is_empty() {
            out.push_str("Third-party packages available:\n");
            for (name, version) in &self.dependency_versions {
                let _ = writeln!(out, "- {} {}", name, version);
            }
            out.push('\n');
        }

        let _ = writeln!(
            out,
            "Generate {} code for module `{}` from this blueprint:\n",
            lang, self.module_id
        );
        out.push_str(self.blueprint.trim());
        out.push_str("\n\n");

        if let Some(prior) = &self.prior_failure {
            let _ = writeln!(
                out,
                "Attempt {} was rejected by verification:",
                prior.attempt + 1
            );
            for finding in &prior.findings {
                let _ = writeln!(out, "- {}", finding);
            }
            let _ = writeln!(out, "\nRejected code:\n```{}\n{}\n```\n", lang.as_str(), prior.artifact.trim_end());
            out.push_str("Fix every listed problem and return the complete corrected module.\n");
        }

        let _ = writeln!(
            out,
            "Respond with a single ```{} code block containing the whole module.",
            lang.as_str()
        );
        out
    }
}

fn render_context(out: &mut String, label: &str, ctx: &DependencyContext) {
    let _ = writeln!(out, "=== {}: {} ===", label, ctx.module_id);
    if !ctx.requested_symbols.is_empty() {
        let _ = writeln!(out, "Used symbols: {}", ctx.requested_symbols.join(", "));
    }
    match ctx.source {
        ContextSource::ArtifactSummary => out.push_str("Generated interface:\n"),
        ContextSource::Blueprint => out.push_str("Blueprint:\n"),
    }
    out.push_str(ctx.text.trim());
    out.push_str("\n\n");
}

/// Produces source text for one request
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, TransportError>;
}
