//! Graph loading and ordering against real directory trees

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use blueprint_forge::graph::{DiagnosticCode, GenerationPlan, LoadConfig};
use blueprint_forge::{load_project, BlueprintGraph, ForgeError, GraphBuildError, ProjectManifest};

fn fixture_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/task_api")
}

fn load_fixture() -> BlueprintGraph {
    load_project(&fixture_root(), &LoadConfig::default()).expect("fixture project loads")
}

/// Write `files` under a fresh temp dir and load it
fn load_tree(files: &[(&str, &str)]) -> (tempfile::TempDir, Result<BlueprintGraph, ForgeError>) {
    let dir = tempfile::tempdir().unwrap();
    for (path, content) in files {
        let full = dir.path().join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }
    let graph = load_project(dir.path(), &LoadConfig::default());
    (dir, graph)
}

fn graph_error(result: Result<BlueprintGraph, ForgeError>) -> GraphBuildError {
    match result {
        Err(ForgeError::Graph(err)) => err,
        Err(other) => panic!("expected graph error, got {}", other),
        Ok(_) => panic!("expected graph error, graph was built"),
    }
}

fn level_names(plan: &GenerationPlan) -> Vec<Vec<String>> {
    plan.order
        .module_levels()
        .into_iter()
        .map(|level| level.into_iter().map(|m| m.to_string()).collect())
        .collect()
}

fn assert_topological(graph: &BlueprintGraph, plan: &GenerationPlan) {
    let level: HashMap<String, usize> = plan
        .order
        .levels
        .iter()
        .flat_map(|l| l.modules().into_iter().map(move |m| (m.to_string(), l.index)))
        .collect();
    assert_eq!(level.len(), graph.module_count());
    for node in graph.nodes() {
        for dep in &node.resolved_dependencies {
            if plan.analysis.unit_of(dep.as_str()) == plan.analysis.unit_of(node.module_id.as_str()) {
                continue;
            }
            assert!(
                level[dep.as_str()] < level[node.module_id.as_str()],
                "{} must come after {}",
                node.module_id,
                dep
            );
        }
    }
}

// =============================================================================
// Fixture project
// =============================================================================

#[test]
fn test_fixture_levels() {
    let graph = load_fixture();
    assert_eq!(graph.module_count(), 5);
    assert_eq!(graph.edge_count(), 6);

    let plan = GenerationPlan::build(&graph);
    assert_eq!(
        level_names(&plan),
        vec![
            vec!["core.config"],
            vec!["core.db"],
            vec!["models.task"],
            vec!["api.tasks"],
            vec!["main"],
        ]
    );
    assert!(plan.warnings.is_empty());
    assert_topological(&graph, &plan);
}

#[test]
fn test_fixture_references() {
    let graph = load_fixture();

    let names: Vec<&str> = graph.dependencies("api.tasks").iter().map(|m| m.as_str()).collect();
    assert_eq!(names, vec!["core.db", "models.task"]);

    let api = graph.get("api.tasks").unwrap();
    assert!(api.declared_header);
    let models = api
        .resolved_dependencies
        .iter()
        .find(|m| m.as_str() == "models.task")
        .unwrap();
    assert_eq!(api.requested_symbols(models), vec!["Task", "TaskStatus"]);

    let dependents: Vec<&str> = graph.dependents("core.config").iter().map(|m| m.as_str()).collect();
    assert_eq!(dependents, vec!["core.db", "main"]);
    assert_eq!(graph.bundle_hash().len(), 64);
}

#[test]
fn test_fixture_restrict_keeps_dependencies() {
    let graph = load_fixture();
    let sub = graph.restrict_to(&["models.task"]).unwrap();
    let ids: Vec<&str> = sub.module_ids().map(|m| m.as_str()).collect();
    assert_eq!(ids, vec!["core.config", "core.db", "models.task"]);

    assert!(matches!(
        graph.restrict_to(&["nope"]),
        Err(ForgeError::UnknownModule(_))
    ));
}

#[test]
fn test_fixture_manifest() {
    let manifest = ProjectManifest::load(&fixture_root().join("main.md")).unwrap();
    assert_eq!(manifest.dependencies["fastapi"], ">=0.104.0");
    assert_eq!(manifest.dependencies["uvicorn"], "latest");
    assert_eq!(manifest.dev_dependencies["pytest"], "==7.4.3");
}

#[test]
fn test_fixture_dot_and_search() {
    let graph = load_fixture();
    let dot = graph.to_dot();
    assert!(dot.starts_with("digraph"));
    assert!(dot.contains("\"api_tasks\" -> \"models_task\""));

    let hits = graph.search("tasks", 3);
    assert_eq!(hits[0].id.as_str(), "api.tasks");
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_chain_scenario() {
    let (_dir, graph) = load_tree(&[("a.md", "# a\n"), ("b.md", "deps: @a\n"), ("c.md", "deps: @b\n")]);
    let graph = graph.unwrap();
    let plan = GenerationPlan::build(&graph);
    assert_eq!(level_names(&plan), vec![vec!["a"], vec!["b"], vec!["c"]]);
}

#[test]
fn test_mutual_reference_scenario() {
    let (_dir, graph) = load_tree(&[("a.md", "deps: @b\n"), ("b.md", "deps: @a\n")]);
    let graph = graph.unwrap();
    let plan = GenerationPlan::build(&graph);

    assert_eq!(plan.order.len(), 1);
    let level = &plan.order.levels[0];
    assert!(level.has_collapsed_unit());
    assert_eq!(level_names(&plan), vec![vec!["a", "b"]]);
    assert_eq!(plan.warnings.with_code(DiagnosticCode::CycleCollapsed).count(), 1);
    assert!(!plan.warnings.has_errors());
}

#[test]
fn test_cycle_leaves_other_levels_untouched() {
    let (_dir, acyclic) = load_tree(&[
        ("base.md", ""),
        ("a.md", "deps: @base\n"),
        ("b.md", "deps: @base\n"),
        ("top.md", "deps: @a\n"),
    ]);
    let (_dir2, cyclic) = load_tree(&[
        ("base.md", ""),
        ("a.md", "deps: @base; @b\n"),
        ("b.md", "deps: @base; @a\n"),
        ("top.md", "deps: @a\n"),
    ]);
    let acyclic = GenerationPlan::build(&acyclic.unwrap());
    let cyclic_graph = cyclic.unwrap();
    let cyclic = GenerationPlan::build(&cyclic_graph);

    for module in ["base", "a", "b", "top"] {
        assert_eq!(acyclic.order.level_of(module), cyclic.order.level_of(module), "{}", module);
    }
    assert_topological(&cyclic_graph, &cyclic);
}

#[test]
fn test_duplicate_module_scenario() {
    let (_dir, graph) = load_tree(&[
        ("api/tasks.md", "# api.tasks\n"),
        ("legacy/tasks.md", "# api.tasks\n\nOlder copy.\n"),
    ]);
    let err = graph_error(graph);
    let dups: Vec<_> = err.diagnostics.with_code(DiagnosticCode::DuplicateModule).collect();
    assert_eq!(dups.len(), 1);
    assert_eq!(dups[0].module_id, "api.tasks");
    let context = dups[0].context.join(" ");
    assert!(context.contains("api/tasks.md"), "{}", context);
    assert!(context.contains("legacy/tasks.md"), "{}", context);
}

#[test]
fn test_relative_reference_resolution() {
    let (_dir, graph) = load_tree(&[
        ("pkg/sub/a.md", "# pkg.sub.a\n\ndeps: @.x; @..y; @z\n"),
        ("pkg/sub/x.md", "# pkg.sub.x\n"),
        ("pkg/y.md", "# pkg.y\n"),
        ("z.md", "# z\n"),
    ]);
    let graph = graph.unwrap();
    let names: Vec<&str> = graph.dependencies("pkg.sub.a").iter().map(|m| m.as_str()).collect();
    assert_eq!(names, vec!["pkg.sub.x", "pkg.y", "z"]);
}

#[test]
fn test_relative_reference_ignores_header_id() {
    let (_dir, graph) = load_tree(&[
        ("legacy/notes.md", "# api.tasks\n\ndeps: @.helpers\n"),
        ("legacy/helpers.md", "# legacy.helpers\n"),
    ]);
    let graph = graph.unwrap();
    let names: Vec<&str> = graph.dependencies("api.tasks").iter().map(|m| m.as_str()).collect();
    assert_eq!(names, vec!["legacy.helpers"]);
}

#[test]
fn test_inline_declaration_ends_at_its_line() {
    let (_dir, graph) = load_tree(&[
        ("a.md", ""),
        (
            "svc.md",
            "# svc\ndeps: @a\n\n- cache results with @functools.lru_cache\n- log via @logger\n",
        ),
    ]);
    let graph = graph.unwrap();
    let names: Vec<&str> = graph.dependencies("svc").iter().map(|m| m.as_str()).collect();
    assert_eq!(names, vec!["a"]);
    assert_eq!(graph.get("svc").unwrap().raw_references, vec!["@a"]);
}

#[test]
fn test_unresolved_reference_blocks_plan() {
    let (_dir, graph) = load_tree(&[("a.md", "deps: @missing; @b\n"), ("b.md", "deps: @bb\n")]);
    let err = graph_error(graph);

    let unresolved: Vec<_> = err
        .diagnostics
        .with_code(DiagnosticCode::UnresolvedReference)
        .collect();
    // every failure is reported, not just the first
    assert_eq!(unresolved.len(), 2);
    assert!(err.to_string().contains("2 error(s)"));
}

#[test]
fn test_self_and_malformed_references() {
    let (_dir, graph) = load_tree(&[("a.md", "deps: @a; @pkg..x\n")]);
    let err = graph_error(graph);
    assert_eq!(err.diagnostics.with_code(DiagnosticCode::SelfReference).count(), 1);
    assert_eq!(err.diagnostics.with_code(DiagnosticCode::MalformedReference).count(), 1);
}

#[test]
fn test_missing_root() {
    let result = load_project(Path::new("/definitely/not/a/blueprint/root"), &LoadConfig::default());
    assert!(matches!(result, Err(ForgeError::RootNotFound(_))));
}
