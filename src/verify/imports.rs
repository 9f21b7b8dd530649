//! Import sanity
//!
//! Extracts project-local imports from an artifact and checks them against
//! the module set: the target module must exist, should be a declared
//! dependency, and must expose the symbols pulled from it.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{CheckKind, Finding, VerificationContext};
use crate::graph::{is_valid_segment, ModuleId};
use crate::language::Language;

static PY_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*from[ \t]+(\.*)([\w.]*)[ \t]+import[ \t]+(\([^)]*\)|[^\n]*)")
        .expect("valid python from regex")
});

static PY_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*import[ \t]+([^\n]+)").expect("valid python import regex")
});

static RUST_USE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:pub(?:\([^)]*\))?[ \t]+)?use[ \t]+([^;]+);")
        .expect("valid rust use regex")
});

static SCRIPT_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*(?:import|export)[ \t]+(?:type[ \t]+)?([^;'"]*?)\s*from\s*['"]([^'"]+)['"]"#)
        .expect("valid script import regex")
});

static GO_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*import[ \t]+(?:[\w.]+[ \t]+)?"([^"]+)""#).expect("valid go import regex")
});

static GO_IMPORT_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?ms)^[ \t]*import[ \t]*\((.*?)\)").expect("valid go import block regex")
});

static GO_IMPORT_SPEC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*(?:[\w.]+[ \t]+)?"([^"]+)""#).expect("valid go import spec regex")
});

const SCRIPT_EXTENSIONS: &[&str] = &[".tsx", ".ts", ".jsx", ".js", ".mjs", ".cjs"];

/// Where an import points
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportTarget {
    /// Dotted path that may or may not belong to the project
    Absolute(Vec<String>),
    /// Always project-rooted (`crate::` in Rust)
    Crate(Vec<String>),
    /// `levels == 1` is the importing module's own package
    Relative { levels: usize, path: Vec<String> },
    /// Slash path whose project part follows an unknown module prefix (Go)
    Path(Vec<String>),
}

impl ImportTarget {
    /// Absolute segments as seen from `from`; `None` when climbing above the root
    pub fn resolve(&self, from: &ModuleId) -> Option<Vec<String>> {
        match self {
            Self::Absolute(path) | Self::Crate(path) | Self::Path(path) => Some(path.clone()),
            Self::Relative { levels, path } => {
                let package = from.package();
                let drop = levels.saturating_sub(1);
                if drop > package.len() {
                    return None;
                }
                let mut segments: Vec<String> = package[..package.len() - drop]
                    .iter()
                    .map(|s| s.to_string())
                    .collect();
                segments.extend(path.iter().cloned());
                Some(segments)
            }
        }
    }
}

/// One import statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStatement {
    pub target: ImportTarget,
    /// Names pulled out of the target (`from x import A, B`)
    pub symbols: Vec<String>,
    pub line: usize,
}

fn line_of(text: &str, offset: usize) -> usize {
    text[..offset].matches('\n').count() + 1
}

fn strip_alias(item: &str) -> &str {
    item.split(" as ").next().unwrap_or(item).trim()
}

fn dotted(path: &str) -> Vec<String> {
    path.split('.')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Project-candidate imports in source order
pub fn extract_imports(language: Language, text: &str) -> Vec<ImportStatement> {
    let mut imports = match language {
        Language::Python => python_imports(text),
        Language::Rust => rust_imports(text),
        Language::TypeScript | Language::JavaScript => script_imports(text),
        Language::Go => go_imports(text),
    };
    imports.sort_by_key(|i| i.line);
    imports
}

fn python_imports(text: &str) -> Vec<ImportStatement> {
    let mut imports = Vec::new();

    for caps in PY_FROM.captures_iter(text) {
        let (Some(whole), Some(dots), Some(path), Some(names)) =
            (caps.get(0), caps.get(1), caps.get(2), caps.get(3))
        else {
            continue;
        };
        let symbols = names
            .as_str()
            .trim_start_matches('(')
            .trim_end_matches(')')
            .lines()
            .map(|l| l.split('#').next().unwrap_or(""))
            .flat_map(|l| l.split(','))
            .map(strip_alias)
            .filter(|s| !s.is_empty() && *s != "*" && *s != "\\")
            .map(|s| s.to_string())
            .collect();

        let path = dotted(path.as_str());
        let levels = dots.as_str().len();
        let target = if levels > 0 {
            ImportTarget::Relative { levels, path }
        } else {
            ImportTarget::Absolute(path)
        };
        imports.push(ImportStatement {
            target,
            symbols,
            line: line_of(text, whole.start()),
        });
    }

    for caps in PY_IMPORT.captures_iter(text) {
        let (Some(whole), Some(list)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let list = list.as_str().split('#').next().unwrap_or("");
        for item in list.split(',') {
            let path = dotted(strip_alias(item));
            if path.is_empty() {
                continue;
            }
            imports.push(ImportStatement {
                target: ImportTarget::Absolute(path),
                symbols: Vec::new(),
                line: line_of(text, whole.start()),
            });
        }
    }

    imports
}

fn rust_imports(text: &str) -> Vec<ImportStatement> {
    let mut imports = Vec::new();

    for caps in RUST_USE.captures_iter(text) {
        let (Some(whole), Some(tree)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let tree: String = tree.as_str().split_whitespace().collect::<Vec<_>>().join(" ");

        let (head, group) = match tree.find('{') {
            Some(open) => (
                tree[..open].trim_end_matches("::").trim(),
                Some(tree[open + 1..].trim_end_matches('}')),
            ),
            None => (strip_alias(&tree), None),
        };

        let mut parts: Vec<&str> = head.split("::").map(str::trim).collect();
        let target = match parts.first().copied() {
            Some("crate") => {
                parts.remove(0);
                ImportTarget::Crate(parts.iter().map(|s| s.to_string()).collect())
            }
            Some("super") => {
                let levels = parts.iter().take_while(|p| **p == "super").count();
                ImportTarget::Relative {
                    levels,
                    path: parts[levels..].iter().map(|s| s.to_string()).collect(),
                }
            }
            _ => continue,
        };

        let symbols = match group {
            // nested groups are only checked at the path level
            Some(inner) if !inner.contains('{') => inner
                .split(',')
                .map(strip_alias)
                .filter(|s| !s.is_empty() && *s != "self" && *s != "*" && !s.contains("::"))
                .map(|s| s.to_string())
                .collect(),
            _ => Vec::new(),
        };

        imports.push(ImportStatement {
            target,
            symbols,
            line: line_of(text, whole.start()),
        });
    }

    imports
}

fn script_imports(text: &str) -> Vec<ImportStatement> {
    let mut imports = Vec::new();

    for caps in SCRIPT_IMPORT.captures_iter(text) {
        let (Some(whole), Some(clause), Some(spec)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            continue;
        };
        let spec = spec.as_str();
        if !spec.starts_with("./") && !spec.starts_with("../") {
            continue;
        }

        let mut rest = spec;
        let mut levels = 1;
        if let Some(stripped) = rest.strip_prefix("./") {
            rest = stripped;
        }
        while let Some(stripped) = rest.strip_prefix("../") {
            levels += 1;
            rest = stripped;
        }
        for ext in SCRIPT_EXTENSIONS {
            if let Some(stripped) = rest.strip_suffix(ext) {
                rest = stripped;
                break;
            }
        }
        let rest = rest.strip_suffix("/index").unwrap_or(rest);
        let path: Vec<String> = rest
            .split('/')
            .filter(|s| !s.is_empty() && *s != ".")
            .map(|s| s.to_string())
            .collect();

        let clause = clause.as_str();
        let symbols = match (clause.find('{'), clause.rfind('}')) {
            (Some(open), Some(close)) if open < close => clause[open + 1..close]
                .split(',')
                .map(|s| strip_alias(s.trim().trim_start_matches("type ")))
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect(),
            _ => Vec::new(),
        };

        imports.push(ImportStatement {
            target: ImportTarget::Relative { levels, path },
            symbols,
            line: line_of(text, whole.start()),
        });
    }

    imports
}

/// Go imports name package directories; symbols are used qualified and not listed
fn go_imports(text: &str) -> Vec<ImportStatement> {
    let mut imports = Vec::new();
    let mut push = |path: &str, offset: usize| {
        let segments: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();
        if !segments.is_empty() {
            imports.push(ImportStatement {
                target: ImportTarget::Path(segments),
                symbols: Vec::new(),
                line: line_of(text, offset),
            });
        }
    };

    for caps in GO_IMPORT.captures_iter(text) {
        if let Some(path) = caps.get(1) {
            push(path.as_str(), path.start());
        }
    }
    for block in GO_IMPORT_BLOCK.captures_iter(text) {
        let Some(body) = block.get(1) else {
            continue;
        };
        for spec in GO_IMPORT_SPEC.captures_iter(body.as_str()) {
            if let Some(path) = spec.get(1) {
                push(path.as_str(), body.start() + path.start());
            }
        }
    }

    imports
}

// =============================================================================
// Checking
// =============================================================================

fn module_of(segments: &[String]) -> Option<ModuleId> {
    if segments.iter().all(|s| is_valid_segment(s)) {
        ModuleId::from_segments(segments)
    } else {
        None
    }
}

/// Some known module lives under `prefix`
fn is_package_prefix(known: &BTreeSet<ModuleId>, prefix: &[String]) -> bool {
    if prefix.is_empty() {
        return false;
    }
    let dotted = format!("{}.", prefix.join("."));
    known.iter().any(|m| m.as_str().starts_with(&dotted))
}

fn is_module_or_package(known: &BTreeSet<ModuleId>, segments: &[String]) -> bool {
    module_of(segments).is_some_and(|m| known.contains(&m)) || is_package_prefix(known, segments)
}

/// Findings for every project-local import in `artifact`
pub fn check_imports(ctx: &VerificationContext, artifact: &str) -> Vec<Finding> {
    let known = ctx.known_modules.as_ref();
    let roots: BTreeSet<&str> = known.iter().map(|m| m.root()).collect();
    let mut findings = Vec::new();

    for import in extract_imports(ctx.language, artifact) {
        let target = match &import.target {
            ImportTarget::Absolute(path) => {
                if !path.first().is_some_and(|root| roots.contains(root.as_str())) {
                    continue;
                }
                import.target.clone()
            }
            // drop the module prefix up to the first project root
            ImportTarget::Path(path) => match path.iter().position(|s| roots.contains(s.as_str())) {
                Some(start) => ImportTarget::Absolute(path[start..].to_vec()),
                None => continue,
            },
            other => other.clone(),
        };

        let Some(full) = target.resolve(&ctx.module_id) else {
            findings.push(
                Finding::hard(
                    CheckKind::Import,
                    "relative import climbs above the project root",
                )
                .at_line(import.line),
            );
            continue;
        };

        let found = (1..=full.len()).rev().find_map(|k| {
            module_of(&full[..k])
                .filter(|m| known.contains(m))
                .map(|m| (m, &full[k..]))
        });

        let Some((module, leftover)) = found else {
            let shown = if full.is_empty() {
                "<package root>".to_string()
            } else {
                full.join(".")
            };
            if !full.is_empty() && !is_package_prefix(known, &full) {
                findings.push(
                    Finding::hard(
                        CheckKind::Import,
                        format!("import '{}' does not match any project module", shown),
                    )
                    .at_line(import.line),
                );
                continue;
            }
            if full.is_empty() && import.symbols.is_empty() {
                continue;
            }
            for symbol in &import.symbols {
                let mut candidate = full.clone();
                candidate.push(symbol.clone());
                if !is_module_or_package(known, &candidate) {
                    findings.push(
                        Finding::hard(
                            CheckKind::Import,
                            format!("package '{}' has no module '{}'", shown, symbol),
                        )
                        .at_line(import.line),
                    );
                }
            }
            continue;
        };

        if module == ctx.module_id {
            continue;
        }

        if !ctx.is_neighbour(&module) {
            findings.push(
                Finding::soft(
                    CheckKind::Import,
                    format!("imports '{}' which is not a declared dependency", module),
                )
                .at_line(import.line),
            );
            continue;
        }

        let Some(exposed) = ctx.exposures.get(&module).filter(|e| !e.is_empty()) else {
            continue;
        };
        let symbols: Vec<&String> = match leftover.first() {
            Some(first) => vec![first],
            None => import.symbols.iter().collect(),
        };
        for symbol in symbols {
            if exposed.contains(symbol.as_str()) {
                continue;
            }
            if module.child(symbol).is_some_and(|m| known.contains(&m)) {
                continue;
            }
            findings.push(
                Finding::hard(
                    CheckKind::Import,
                    format!("'{}' is not exposed by '{}'", symbol, module),
                )
                .at_line(import.line),
            );
        }
    }

    findings
}
