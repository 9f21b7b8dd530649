//! Blueprint Dependency Graph
//!
//! Primary data structure using petgraph for blueprint-to-blueprint references.
//! Edges run from a dependent to its dependency. The graph is immutable once
//! built; generation state lives with the scheduler, never on the nodes.
//!
//! Consumed by:
//! - Cycle analysis and level ordering
//! - The scheduler (dependency context, peers)
//! - The verifier (module existence, exposed interfaces)

pub mod analysis;
pub mod diagnostics;
pub mod loader;
pub mod order;
pub mod reference;

pub use analysis::{analyze_cycles, CycleAnalysis, SchedulingUnit, UnitId};
pub use diagnostics::{DiagnosticCode, DiagnosticItem, Diagnostics, Severity};
pub use loader::{
    derive_module_id, load_project, source_package, BlueprintDiscovery, BlueprintSource,
    FsDiscovery, GraphBuilder, LoadConfig,
};
pub use order::{compute_order, GenerationOrder, GenerationPlan, Level};
pub use reference::{
    scan_references, BlueprintReference, ReferenceEntry, ReferenceError, ReferenceKind,
    ReferenceScan, ResolvedReference,
};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{ForgeError, Result};

// =============================================================================
// Module Identifier
// =============================================================================

/// Dotted, globally unique module path such as `api.tasks`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(String);

/// `[A-Za-z_][A-Za-z0-9_-]*`
pub fn is_valid_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl ModuleId {
    /// Parse a dotted path, rejecting empty or invalid segments
    pub fn parse(dotted: &str) -> Option<Self> {
        if dotted.is_empty() || !dotted.split('.').all(is_valid_segment) {
            return None;
        }
        Some(Self(dotted.to_string()))
    }

    /// Join segments; `None` when empty or any segment is invalid
    pub fn from_segments<I, S>(segments: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parts: Vec<String> = segments
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        if parts.is_empty() {
            return None;
        }
        Self::parse(&parts.join("."))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Every segment but the last; empty for top-level modules
    pub fn package(&self) -> Vec<&str> {
        let mut segments: Vec<&str> = self.segments().collect();
        segments.pop();
        segments
    }

    pub fn name(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    pub fn root(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }

    /// Append dotted segments, e.g. `api` + `tasks` = `api.tasks`
    pub fn child(&self, name: &str) -> Option<Self> {
        Self::parse(&format!("{}.{}", self.0, name))
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ModuleId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ModuleId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Nodes
// =============================================================================

/// One parsed blueprint
#[derive(Debug, Clone)]
pub struct BlueprintNode {
    /// Unique module path
    pub module_id: ModuleId,
    /// Path relative to the project root
    pub source_path: PathBuf,
    /// Directory segments of `source_path`; relative references resolve here
    pub source_package: Vec<String>,
    /// Full blueprint text
    pub content: String,
    /// Whether the id came from a `# module.name` header rather than the path
    pub declared_header: bool,
    /// Reference tokens in source order, duplicates included
    pub raw_references: Vec<String>,
    /// Parsed and resolved references in source order
    pub references: Vec<ResolvedReference>,
    /// Distinct dependency targets; never contains `module_id`
    pub resolved_dependencies: BTreeSet<ModuleId>,
    /// Non-reference entries of dependency declarations (third-party packages)
    pub external_dependencies: Vec<String>,
}

impl BlueprintNode {
    /// Symbols this blueprint asked for from `target`, in declaration order
    pub fn requested_symbols(&self, target: &ModuleId) -> Vec<String> {
        let mut seen = HashSet::new();
        self.references
            .iter()
            .filter(|r| &r.target == target)
            .flat_map(|r| r.reference.symbols.iter())
            .filter(|s| seen.insert(s.as_str()))
            .cloned()
            .collect()
    }
}

/// Node in a closure result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosureNode {
    pub id: ModuleId,
    pub depth: usize,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cycle_member: bool,
}

/// Search result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: ModuleId,
    pub path: PathBuf,
    pub score: i64,
}

// =============================================================================
// Graph
// =============================================================================

/// The blueprint dependency graph
#[derive(Debug, Clone)]
pub struct BlueprintGraph {
    /// Edges point from dependent to dependency
    pub(crate) graph: DiGraph<ModuleId, ()>,

    /// Node data indexed by module id
    pub(crate) nodes: BTreeMap<ModuleId, BlueprintNode>,

    /// Module id -> graph index
    pub(crate) node_indices: HashMap<ModuleId, NodeIndex>,

    /// SHA-256 over every blueprint's path and content
    pub(crate) bundle_hash: String,
}

impl BlueprintGraph {
    /// Assemble from nodes whose dependencies have all been validated
    pub(crate) fn from_nodes(nodes: BTreeMap<ModuleId, BlueprintNode>, bundle_hash: String) -> Self {
        let mut graph = DiGraph::with_capacity(nodes.len(), nodes.len() * 2);
        let mut node_indices = HashMap::with_capacity(nodes.len());

        for id in nodes.keys() {
            let idx = graph.add_node(id.clone());
            node_indices.insert(id.clone(), idx);
        }

        for node in nodes.values() {
            let from = node_indices[&node.module_id];
            for dep in &node.resolved_dependencies {
                if let Some(&to) = node_indices.get(dep) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        Self {
            graph,
            nodes,
            node_indices,
            bundle_hash,
        }
    }

    /// Discover and build from a directory with default settings
    pub fn from_directory(root: &Path) -> Result<Self> {
        load_project(root, &LoadConfig::default())
    }

    // ========== Public API ==========

    /// Number of blueprints
    pub fn module_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of dependency edges
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn bundle_hash(&self) -> &str {
        &self.bundle_hash
    }

    pub fn get(&self, id: &str) -> Option<&BlueprintNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// All nodes in module id order
    pub fn nodes(&self) -> impl Iterator<Item = &BlueprintNode> {
        self.nodes.values()
    }

    pub fn module_ids(&self) -> impl Iterator<Item = &ModuleId> {
        self.nodes.keys()
    }

    /// First segments of every module id
    pub fn root_packages(&self) -> BTreeSet<&str> {
        self.nodes.keys().map(|id| id.root()).collect()
    }

    /// Immediate dependencies (forward adjacency)
    pub fn dependencies(&self, id: &str) -> Vec<&ModuleId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Immediate dependents (reverse adjacency)
    pub fn dependents(&self, id: &str) -> Vec<&ModuleId> {
        self.neighbors(id, Direction::Incoming)
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<&ModuleId> {
        let Some(&node_idx) = self.node_indices.get(id) else {
            return Vec::new();
        };

        let mut out: Vec<&ModuleId> = self
            .graph
            .edges_directed(node_idx, direction)
            .filter_map(|e| {
                let other = match direction {
                    Direction::Outgoing => e.target(),
                    Direction::Incoming => e.source(),
                };
                self.graph.node_weight(other)
            })
            .collect();
        out.sort();
        out
    }

    /// Transitive dependencies (Outgoing) or dependents (Incoming)
    pub fn closure(
        &self,
        id: &str,
        direction: Direction,
        max_depth: Option<usize>,
    ) -> Vec<ClosureNode> {
        let Some(&start_idx) = self.node_indices.get(id) else {
            return Vec::new();
        };

        let analysis = analyze_cycles(self);
        let mut result = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = std::collections::VecDeque::from([(start_idx, 0usize)]);

        while let Some((node_idx, depth)) = queue.pop_front() {
            if let Some(max) = max_depth {
                if depth > max {
                    continue;
                }
            }

            if !visited.insert(node_idx) {
                continue;
            }

            if node_idx != start_idx {
                if let Some(node_id) = self.graph.node_weight(node_idx) {
                    result.push(ClosureNode {
                        id: node_id.clone(),
                        depth,
                        cycle_member: analysis.is_cyclic(node_id.as_str()),
                    });
                }
            }

            for edge in self.graph.edges_directed(node_idx, direction) {
                let next = match direction {
                    Direction::Outgoing => edge.target(),
                    Direction::Incoming => edge.source(),
                };
                queue.push_back((next, depth + 1));
            }
        }

        result.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.id.cmp(&b.id)));
        result
    }

    /// Sub-graph holding `targets` and everything they transitively depend on
    pub fn restrict_to<S: AsRef<str>>(&self, targets: &[S]) -> Result<Self> {
        let mut keep: BTreeSet<ModuleId> = BTreeSet::new();
        for target in targets {
            let target = target.as_ref();
            let Some(node) = self.nodes.get(target) else {
                return Err(ForgeError::UnknownModule(target.to_string()));
            };
            keep.insert(node.module_id.clone());
            for dep in self.closure(target, Direction::Outgoing, None) {
                keep.insert(dep.id);
            }
        }

        let nodes: BTreeMap<ModuleId, BlueprintNode> = self
            .nodes
            .iter()
            .filter(|(id, _)| keep.contains(*id))
            .map(|(id, node)| (id.clone(), node.clone()))
            .collect();

        Ok(Self::from_nodes(nodes, self.bundle_hash.clone()))
    }

    /// Search modules by id or file name (fuzzy)
    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchResult> {
        use fuzzy_matcher::skim::SkimMatcherV2;
        use fuzzy_matcher::FuzzyMatcher;

        let matcher = SkimMatcherV2::default();
        let mut results: Vec<(i64, &BlueprintNode)> = Vec::new();

        for node in self.nodes.values() {
            if let Some(score) = matcher.fuzzy_match(node.module_id.as_str(), query) {
                results.push((score, node));
                continue;
            }

            let filename = node
                .source_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("");
            if let Some(score) = matcher.fuzzy_match(filename, query) {
                results.push((score, node));
            }
        }

        results.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.module_id.cmp(&b.1.module_id)));

        results
            .into_iter()
            .take(limit)
            .map(|(score, node)| SearchResult {
                id: node.module_id.clone(),
                path: node.source_path.clone(),
                score,
            })
            .collect()
    }

    /// Export to GraphViz DOT; cycle-collapsed members are highlighted
    pub fn to_dot(&self) -> String {
        let analysis = analyze_cycles(self);
        let mut output = String::new();

        output.push_str("digraph BlueprintGraph {\n");
        output.push_str("  rankdir=LR;\n");
        output.push_str("  bgcolor=\"#1e1e1e\";\n");
        output.push_str("  node [shape=box, style=\"filled,rounded\", fontname=\"Helvetica\", fontsize=10, fontcolor=\"white\", color=\"#404040\"];\n");
        output.push_str("  edge [color=\"#808080\"];\n");
        output.push('\n');

        for id in self.nodes.keys() {
            let color = if analysis.is_cyclic(id.as_str()) {
                "#F44336"
            } else if self.dependencies(id.as_str()).is_empty() {
                "#4CAF50"
            } else {
                "#2196F3"
            };
            output.push_str(&format!(
                "  \"{}\" [label=\"{}\", fillcolor=\"{}\"];\n",
                dot_id(id),
                id,
                color
            ));
        }

        output.push('\n');

        for edge in self.graph.edge_references() {
            if let (Some(source), Some(target)) = (
                self.graph.node_weight(edge.source()),
                self.graph.node_weight(edge.target()),
            ) {
                output.push_str(&format!("  \"{}\" -> \"{}\";\n", dot_id(source), dot_id(target)));
            }
        }

        output.push_str("}\n");
        output
    }
}

fn dot_id(id: &ModuleId) -> String {
    id.as_str().replace(['.', '-'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(specs: &[(&str, &str)]) -> BlueprintGraph {
        let sources = specs
            .iter()
            .map(|(path, content)| BlueprintSource::new(*path, *content))
            .collect();
        GraphBuilder::new().build(sources).unwrap()
    }

    fn names(ids: Vec<&ModuleId>) -> Vec<&str> {
        ids.into_iter().map(|id| id.as_str()).collect()
    }

    #[test]
    fn test_module_id_parts() {
        let id = ModuleId::parse("pkg.sub.a").unwrap();
        assert_eq!(id.package(), vec!["pkg", "sub"]);
        assert_eq!(id.name(), "a");
        assert_eq!(id.root(), "pkg");
        assert!(ModuleId::parse("pkg..a").is_none());
        assert!(ModuleId::parse("1pkg").is_none());
        assert!(ModuleId::parse("").is_none());
        assert_eq!(ModuleId::parse("api").unwrap().child("tasks").unwrap().as_str(), "api.tasks");
    }

    #[test]
    fn test_adjacency() {
        let g = graph(&[
            ("a.md", "# a\n"),
            ("b.md", "# b\ndeps: @a\n"),
            ("c.md", "# c\ndeps: @a; @b\n"),
        ]);
        assert_eq!(g.module_count(), 3);
        assert_eq!(g.edge_count(), 3);
        assert_eq!(names(g.dependencies("c")), vec!["a", "b"]);
        assert_eq!(names(g.dependents("a")), vec!["b", "c"]);
        assert!(g.dependencies("missing").is_empty());
    }

    #[test]
    fn test_closure_depths() {
        let g = graph(&[
            ("a.md", "# a\n"),
            ("b.md", "# b\ndeps: @a\n"),
            ("c.md", "# c\ndeps: @b\n"),
        ]);
        let closure = g.closure("c", Direction::Outgoing, None);
        let ids: Vec<(&str, usize)> = closure.iter().map(|n| (n.id.as_str(), n.depth)).collect();
        assert_eq!(ids, vec![("b", 1), ("a", 2)]);

        let limited = g.closure("c", Direction::Outgoing, Some(1));
        assert_eq!(limited.len(), 1);

        let up = g.closure("a", Direction::Incoming, None);
        assert_eq!(up.len(), 2);
        assert!(up.iter().all(|n| !n.cycle_member));
    }

    #[test]
    fn test_closure_marks_cycle_members() {
        let g = graph(&[
            ("a.md", "# a\ndeps: @b\n"),
            ("b.md", "# b\ndeps: @a\n"),
            ("top.md", "# top\ndeps: @a\n"),
        ]);
        let closure = g.closure("top", Direction::Outgoing, None);
        let members: Vec<(&str, bool)> = closure
            .iter()
            .map(|n| (n.id.as_str(), n.cycle_member))
            .collect();
        assert_eq!(members, vec![("a", true), ("b", true)]);
    }

    #[test]
    fn test_restrict_to_keeps_dependency_closure() {
        let g = graph(&[
            ("a.md", "# a\n"),
            ("b.md", "# b\ndeps: @a\n"),
            ("c.md", "# c\n"),
        ]);
        let sub = g.restrict_to(&["b"]).unwrap();
        assert_eq!(sub.module_count(), 2);
        assert!(sub.contains("a"));
        assert!(!sub.contains("c"));
        assert!(g.restrict_to(&["zzz"]).is_err());
    }

    #[test]
    fn test_search_and_dot() {
        let g = graph(&[
            ("api/tasks.md", "deps: @.users\n"),
            ("api/users.md", "deps: @.tasks\n"),
        ]);
        let results = g.search("tasks", 5);
        assert_eq!(results[0].id.as_str(), "api.tasks");

        let dot = g.to_dot();
        assert!(dot.starts_with("digraph BlueprintGraph"));
        assert!(dot.contains("\"api_tasks\" -> \"api_users\""));
        assert!(dot.contains("#F44336"));
    }

    #[test]
    fn test_requested_symbols_are_merged() {
        let g = graph(&[
            ("models.md", "# models\n"),
            ("api.md", "# api\ndeps: @models[Task]; @models[User, Task]\n"),
        ]);
        let api = g.get("api").unwrap();
        assert_eq!(api.raw_references.len(), 2);
        assert_eq!(api.resolved_dependencies.len(), 1);
        let target = ModuleId::parse("models").unwrap();
        assert_eq!(api.requested_symbols(&target), vec!["Task", "User"]);
    }
}
