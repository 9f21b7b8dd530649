//! Diagnostics
//!
//! Collects warnings and errors while the graph is built and planned.
//! Graph-fatal problems are gathered in one pass so a user sees all of them
//! at once instead of fixing one per run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use super::ModuleId;

// =============================================================================
// Diagnostic Codes
// =============================================================================

/// Diagnostic code for categorizing issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticCode {
    /// Two blueprint files produce the same module id
    DuplicateModule,
    /// Reference token does not follow the reference grammar
    MalformedReference,
    /// Reference target is not a known module
    UnresolvedReference,
    /// Blueprint references itself
    SelfReference,
    /// File path cannot be turned into a module id and there is no header
    InvalidModulePath,
    /// Strongly connected blueprints merged into one scheduling unit
    CycleCollapsed,
}

impl DiagnosticCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DuplicateModule => "E001",
            Self::MalformedReference => "E002",
            Self::UnresolvedReference => "E003",
            Self::SelfReference => "E004",
            Self::InvalidModulePath => "E005",
            Self::CycleCollapsed => "W001",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::DuplicateModule
            | Self::MalformedReference
            | Self::UnresolvedReference
            | Self::SelfReference
            | Self::InvalidModulePath => Severity::Error,

            Self::CycleCollapsed => Severity::Warning,
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Severity
// =============================================================================

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

// =============================================================================
// Diagnostic Item
// =============================================================================

/// A single diagnostic item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticItem {
    /// Module the diagnostic is reported against
    pub module_id: String,
    pub code: DiagnosticCode,
    pub message: String,
    /// Related paths, tokens, suggestions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
}

impl DiagnosticItem {
    pub fn new(module_id: impl Into<String>, code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            code,
            message: message.into(),
            context: Vec::new(),
        }
    }

    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context.push(ctx.into());
        self
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }
}

impl fmt::Display for DiagnosticItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {} ({})",
            self.code,
            self.code.severity(),
            self.message,
            self.module_id
        )?;

        for ctx in &self.context {
            write!(f, "\n  - {}", ctx)?;
        }

        Ok(())
    }
}

// =============================================================================
// Diagnostics Collection
// =============================================================================

/// Collection of diagnostics from build and planning passes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    items: Vec<DiagnosticItem>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: DiagnosticItem) {
        self.items.push(item);
    }

    /// Same module id declared by several files
    pub fn duplicate_module(&mut self, module_id: &ModuleId, paths: &[PathBuf]) {
        let mut item = DiagnosticItem::new(
            module_id.as_str(),
            DiagnosticCode::DuplicateModule,
            format!("Module '{}' is declared by {} files", module_id, paths.len()),
        );
        for path in paths {
            item = item.with_context(path.display().to_string());
        }
        self.push(item);
    }

    pub fn malformed_reference(&mut self, module_id: &ModuleId, token: &str, line: usize, reason: &str) {
        self.push(
            DiagnosticItem::new(
                module_id.as_str(),
                DiagnosticCode::MalformedReference,
                format!("Malformed reference '{}' on line {}", token, line),
            )
            .with_context(reason.to_string()),
        );
    }

    pub fn unresolved_reference(
        &mut self,
        module_id: &ModuleId,
        token: &str,
        target: &ModuleId,
        suggestion: Option<&ModuleId>,
    ) {
        let mut item = DiagnosticItem::new(
            module_id.as_str(),
            DiagnosticCode::UnresolvedReference,
            format!("Reference '{}' targets unknown module '{}'", token, target),
        );
        if let Some(suggestion) = suggestion {
            item = item.with_context(format!("did you mean '{}'?", suggestion));
        }
        self.push(item);
    }

    pub fn self_reference(&mut self, module_id: &ModuleId, token: &str) {
        self.push(DiagnosticItem::new(
            module_id.as_str(),
            DiagnosticCode::SelfReference,
            format!("Reference '{}' points back at its own blueprint", token),
        ));
    }

    pub fn invalid_module_path(&mut self, path: &Path) {
        self.push(
            DiagnosticItem::new(
                path.display().to_string(),
                DiagnosticCode::InvalidModulePath,
                "Blueprint has no '# module.name' header and its path is not a valid module id",
            )
            .with_context(path.display().to_string()),
        );
    }

    pub fn cycle_collapsed(&mut self, members: &[ModuleId]) {
        let names: Vec<&str> = members.iter().map(|m| m.as_str()).collect();
        let anchor = names.first().copied().unwrap_or("?");
        self.push(
            DiagnosticItem::new(
                anchor,
                DiagnosticCode::CycleCollapsed,
                format!("{} blueprints reference each other and will be generated together", names.len()),
            )
            .with_context(format!("Cycle: {}", names.join(" <-> "))),
        );
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|i| i.severity() == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter().filter(|i| i.severity() == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter().filter(|i| i.severity() == Severity::Warning)
    }

    pub fn with_code(&self, code: DiagnosticCode) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter().filter(move |i| i.code == code)
    }

    pub fn all(&self) -> &[DiagnosticItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn merge(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    /// Render every item, one block per diagnostic
    pub fn format_all(&self) -> String {
        self.items
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn format_errors(&self) -> String {
        self.errors()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_split() {
        let mut diags = Diagnostics::new();
        let a = ModuleId::parse("api.tasks").unwrap();
        let b = ModuleId::parse("api.users").unwrap();
        diags.cycle_collapsed(&[a.clone(), b.clone()]);
        assert!(!diags.has_errors());

        diags.unresolved_reference(&a, "@.missing", &ModuleId::parse("api.missing").unwrap(), Some(&b));
        assert!(diags.has_errors());
        assert_eq!(diags.error_count(), 1);
        assert_eq!(diags.warnings().count(), 1);
    }

    #[test]
    fn test_duplicate_lists_every_path() {
        let mut diags = Diagnostics::new();
        let id = ModuleId::parse("api.tasks").unwrap();
        diags.duplicate_module(&id, &[PathBuf::from("api/tasks.md"), PathBuf::from("other.md")]);

        let item = &diags.all()[0];
        assert_eq!(item.code.as_str(), "E001");
        assert_eq!(item.context, vec!["api/tasks.md", "other.md"]);

        let rendered = diags.format_all();
        assert!(rendered.contains("[E001] error"));
        assert!(rendered.contains("  - other.md"));
    }

    #[test]
    fn test_merge() {
        let id = ModuleId::parse("a").unwrap();
        let mut first = Diagnostics::new();
        first.self_reference(&id, "@a");
        let mut second = Diagnostics::new();
        second.malformed_reference(&id, "@.", 3, "empty module path");
        first.merge(second);
        assert_eq!(first.len(), 2);
        assert_eq!(first.with_code(DiagnosticCode::MalformedReference).count(), 1);
    }
}
