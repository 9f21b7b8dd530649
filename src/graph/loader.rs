//! Blueprint Loading
//!
//! Discovers blueprint files, derives module ids, resolves references and
//! builds the dependency graph. Graph-fatal problems are collected across all
//! files and returned together; no partial graph is ever produced.

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::diagnostics::Diagnostics;
use super::reference::scan_references;
use super::{BlueprintGraph, BlueprintNode, ModuleId};
use crate::error::{ForgeError, GraphBuildError, Result};

/// Configuration for blueprint discovery
#[derive(Debug, Clone)]
pub struct LoadConfig {
    /// Blueprint file extensions, with or without the leading dot
    pub extensions: Vec<String>,
    /// File names that are documentation rather than blueprints
    pub skip_files: Vec<String>,
    /// Skip files matching these relative path prefixes
    pub skip_prefixes: Vec<String>,
    /// Only load files matching these relative path prefixes
    pub include_prefixes: Vec<String>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            extensions: vec![".md".to_string()],
            skip_files: vec![
                "README.md".to_string(),
                "CLAUDE.md".to_string(),
                "BLUEPRINTS_SPEC.md".to_string(),
            ],
            skip_prefixes: vec![
                "target/".to_string(),
                ".git/".to_string(),
                "node_modules/".to_string(),
                ".venv/".to_string(),
                "__pycache__/".to_string(),
            ],
            include_prefixes: Vec::new(),
        }
    }
}

// =============================================================================
// Discovery
// =============================================================================

/// Raw blueprint text and its location relative to the project root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlueprintSource {
    pub path: PathBuf,
    pub content: String,
}

impl BlueprintSource {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Enumerates blueprint sources under a root
pub trait BlueprintDiscovery {
    /// Sources in a stable order, each path listed once
    fn discover(&self, root: &Path) -> Result<Vec<BlueprintSource>>;
}

/// Filesystem discovery backed by walkdir
#[derive(Debug, Clone, Default)]
pub struct FsDiscovery {
    config: LoadConfig,
}

impl FsDiscovery {
    pub fn new(config: LoadConfig) -> Self {
        Self { config }
    }

    fn accepts(&self, relative: &Path) -> bool {
        let relative_str = slash_path(relative);

        if !self.config.include_prefixes.is_empty()
            && !self
                .config
                .include_prefixes
                .iter()
                .any(|p| relative_str.starts_with(p.as_str()))
        {
            return false;
        }
        if self
            .config
            .skip_prefixes
            .iter()
            .any(|p| relative_str.starts_with(p.as_str()) || relative_str.contains(&format!("/{}", p)))
        {
            return false;
        }

        let file_name = relative.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if self.config.skip_files.iter().any(|s| s == file_name) {
            return false;
        }

        let extension = relative.extension().and_then(|e| e.to_str()).unwrap_or("");
        self.config
            .extensions
            .iter()
            .any(|ext| ext.trim_start_matches('.') == extension)
    }
}

impl BlueprintDiscovery for FsDiscovery {
    fn discover(&self, root: &Path) -> Result<Vec<BlueprintSource>> {
        if !root.is_dir() {
            return Err(ForgeError::RootNotFound(root.to_path_buf()));
        }

        let mut sources = Vec::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = match entry.path().strip_prefix(root) {
                Ok(relative) => relative.to_path_buf(),
                Err(_) => continue,
            };
            if !self.accepts(&relative) {
                continue;
            }

            let content = fs::read_to_string(entry.path())?;
            sources.push(BlueprintSource::new(relative, content));
        }

        sources.sort_by(|a, b| a.path.cmp(&b.path));
        sources.dedup_by(|a, b| a.path == b.path);
        debug!(root = %root.display(), count = sources.len(), "Discovered blueprints");
        Ok(sources)
    }
}

fn slash_path(path: &Path) -> String {
    path_segments(path).join("/")
}

// =============================================================================
// Module Ids
// =============================================================================

/// Module id from a `# a.b.c` first line, else from the relative path.
///
/// A single-segment header such as `# Users` is a title, not a declaration,
/// unless it equals the path-derived id. Returns the id and whether it came
/// from the header; `None` when neither yields a valid dotted id.
pub fn derive_module_id(source: &BlueprintSource) -> Option<(ModuleId, bool)> {
    let from_path = path_module_id(&source.path);
    let header = source
        .content
        .lines()
        .find(|l| !l.trim().is_empty())
        .and_then(|l| l.trim().strip_prefix("# "))
        .map(str::trim)
        .and_then(ModuleId::parse)
        .filter(|id| id.as_str().contains('.') || from_path.as_ref() == Some(id));

    match header {
        Some(id) => Some((id, true)),
        None => from_path.map(|id| (id, false)),
    }
}

fn path_segments(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

/// Directory segments of a root-relative blueprint path, `api/v1/tasks.md` -> `[api, v1]`
pub fn source_package(path: &Path) -> Vec<String> {
    let mut segments = path_segments(path);
    segments.pop();
    segments
}

fn path_module_id(path: &Path) -> Option<ModuleId> {
    let mut segments = path_segments(path);
    let file = segments.pop()?;
    let stem = Path::new(&file).file_stem()?.to_string_lossy().into_owned();
    segments.push(stem);
    ModuleId::from_segments(&segments)
}

// =============================================================================
// Graph Building
// =============================================================================

/// Turns discovered sources into a validated graph
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder;

impl GraphBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, mut sources: Vec<BlueprintSource>) -> std::result::Result<BlueprintGraph, GraphBuildError> {
        sources.sort_by(|a, b| a.path.cmp(&b.path));

        let mut diagnostics = Diagnostics::new();
        let mut hasher = Sha256::new();
        let mut by_id: BTreeMap<ModuleId, Vec<(BlueprintSource, bool)>> = BTreeMap::new();

        for source in sources {
            hasher.update(slash_path(&source.path).as_bytes());
            hasher.update([0u8]);
            hasher.update(source.content.as_bytes());

            match derive_module_id(&source) {
                Some((id, declared)) => by_id.entry(id).or_default().push((source, declared)),
                None => diagnostics.invalid_module_path(&source.path),
            }
        }

        for (id, claims) in &by_id {
            if claims.len() > 1 {
                let paths: Vec<PathBuf> = claims.iter().map(|(s, _)| s.path.clone()).collect();
                diagnostics.duplicate_module(id, &paths);
            }
        }
        if diagnostics.has_errors() {
            return Err(GraphBuildError::new(diagnostics));
        }

        let known: BTreeSet<ModuleId> = by_id.keys().cloned().collect();
        let mut nodes = BTreeMap::new();

        for (module_id, mut claims) in by_id {
            let Some((source, declared_header)) = claims.pop() else {
                continue;
            };
            let package = source_package(&source.path);
            let scan = scan_references(&package, &source.content);

            for (entry, err) in scan.failures() {
                diagnostics.malformed_reference(&module_id, &entry.token, entry.line, &err.to_string());
            }

            let mut references = Vec::new();
            let mut resolved_dependencies = BTreeSet::new();
            for resolved in scan.resolved() {
                if resolved.target == module_id {
                    diagnostics.self_reference(&module_id, &resolved.reference.token);
                    continue;
                }
                if !known.contains(&resolved.target) {
                    let suggestion = suggest(&resolved.target, &known);
                    diagnostics.unresolved_reference(
                        &module_id,
                        &resolved.reference.token,
                        &resolved.target,
                        suggestion,
                    );
                    continue;
                }
                resolved_dependencies.insert(resolved.target.clone());
                references.push(resolved.clone());
            }

            nodes.insert(
                module_id.clone(),
                BlueprintNode {
                    module_id,
                    source_path: source.path,
                    source_package: package,
                    raw_references: scan.tokens(),
                    references,
                    resolved_dependencies,
                    external_dependencies: scan.external_dependencies,
                    content: source.content,
                    declared_header,
                },
            );
        }

        if diagnostics.has_errors() {
            return Err(GraphBuildError::new(diagnostics));
        }

        let graph = BlueprintGraph::from_nodes(nodes, format!("{:x}", hasher.finalize()));
        info!(
            modules = graph.module_count(),
            edges = graph.edge_count(),
            "Blueprint graph built"
        );
        Ok(graph)
    }
}

/// Closest known module for an unresolved target
fn suggest<'a>(target: &ModuleId, known: &'a BTreeSet<ModuleId>) -> Option<&'a ModuleId> {
    let matcher = SkimMatcherV2::default();
    known
        .iter()
        .filter_map(|candidate| {
            matcher
                .fuzzy_match(candidate.as_str(), target.name())
                .map(|score| (score, candidate))
        })
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(a.1)))
        .map(|(_, candidate)| candidate)
}

/// Discover blueprints under `root` and build the graph
pub fn load_project(root: &Path, config: &LoadConfig) -> Result<BlueprintGraph> {
    let sources = FsDiscovery::new(config.clone()).discover(root)?;
    Ok(GraphBuilder::new().build(sources)?)
}
