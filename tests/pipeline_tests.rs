//! End-to-end runs of the scheduler with scripted in-memory generators

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use blueprint_forge::generate::ContextSource;
use blueprint_forge::graph::{GenerationPlan, GraphBuilder, BlueprintSource, LoadConfig};
use blueprint_forge::verify::{declared_elements, CheckKind};
use blueprint_forge::{
    load_project, BlueprintGraph, CancellationToken, CodeGenerator, FsArtifactWriter,
    GenerationRequest, GenerationState, JsonReporter, Language, Reporter, RunReport, Scheduler,
    SchedulerConfig, TransportError,
};

fn fixture_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/task_api")
}

fn graph(specs: &[(&str, &str)]) -> Arc<BlueprintGraph> {
    let sources = specs
        .iter()
        .map(|(path, content)| BlueprintSource::new(*path, *content))
        .collect();
    Arc::new(GraphBuilder::new().build(sources).unwrap())
}

fn config(max_concurrency: usize) -> SchedulerConfig {
    SchedulerConfig {
        language: Language::Python,
        max_concurrency,
        max_repairs: 2,
        attempt_timeout: Some(Duration::from_secs(5)),
        ..SchedulerConfig::default()
    }
}

/// Python source defining everything the blueprint declares
fn satisfy(request: &GenerationRequest) -> String {
    let names = declared_elements(&request.blueprint);
    if names.is_empty() {
        return format!("{} = 1\n", request.module_id.name().to_uppercase());
    }
    names
        .iter()
        .map(|name| {
            if name.starts_with(|c: char| c.is_ascii_uppercase()) {
                format!("class {}:\n    pass\n", name)
            } else {
                format!("def {}():\n    return None\n", name)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Satisfies every blueprint and records what it was asked
#[derive(Default)]
struct Recording {
    requests: Mutex<Vec<GenerationRequest>>,
}

impl Recording {
    fn request_for(&self, module: &str, attempt: usize) -> GenerationRequest {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.module_id.as_str() == module && r.attempt == attempt)
            .cloned()
            .unwrap_or_else(|| panic!("no request for {} attempt {}", module, attempt))
    }
}

#[async_trait]
impl CodeGenerator for Recording {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(satisfy(request))
    }
}

#[tokio::test]
async fn test_fixture_project_generates_in_order() {
    let g = Arc::new(load_project(&fixture_root(), &LoadConfig::default()).unwrap());
    let plan = GenerationPlan::build(&g);
    let out = tempfile::tempdir().unwrap();
    let generator = Arc::new(Recording::default());

    let writer = FsArtifactWriter::new(fixture_root(), Language::Python).with_output_dir(out.path());
    let scheduler = Scheduler::new(config(2), generator.clone()).with_writer(Arc::new(writer));
    let report = scheduler.run(g, &plan, &CancellationToken::new()).await;

    assert!(report.is_success(), "{:#?}", report.results);
    assert_eq!(report.succeeded(), 5);
    assert_eq!(report.levels.len(), 5);
    for result in report.results.values() {
        assert_eq!(result.repair_attempts, 0, "{}", result.module_id);
        assert!(result.warnings.is_empty(), "{}: {:?}", result.module_id, result.warnings);
    }

    let api = generator.request_for("api.tasks", 0);
    let models = api
        .dependencies
        .iter()
        .find(|d| d.module_id.as_str() == "models.task")
        .unwrap();
    assert_eq!(models.source, ContextSource::ArtifactSummary);
    assert!(models.text.contains("class Task:"));
    assert_eq!(models.requested_symbols, vec!["Task", "TaskStatus"]);

    let written = report.get("models.task").unwrap().output_path.clone().unwrap();
    assert_eq!(written, out.path().join("models").join("task.py"));
    assert!(fs::read_to_string(written).unwrap().contains("class TaskStatus:"));

    let report_path = out.path().join("run.json");
    JsonReporter::new(&report_path).run_finished(&report).unwrap();
    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(report_path).unwrap()).unwrap();
    assert_eq!(json["results"]["main"]["state"], "succeeded");
}

/// Always returns structurally broken code for one module
struct BreaksOne {
    broken: &'static str,
    inner: Recording,
}

#[async_trait]
impl CodeGenerator for BreaksOne {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, TransportError> {
        if request.module_id.as_str() == self.broken {
            self.inner.requests.lock().unwrap().push(request.clone());
            return Ok("class A:\n    def broken(self:\n".into());
        }
        self.inner.generate(request).await
    }
}

#[tokio::test]
async fn test_exhausted_repairs_fail_node_and_dependents_use_blueprint() {
    let g = graph(&[("a.md", "# a\n\nA(Base):\n"), ("b.md", "# b\n\ndeps: @a\n")]);
    let plan = GenerationPlan::build(&g);
    let generator = Arc::new(BreaksOne {
        broken: "a",
        inner: Recording::default(),
    });
    let scheduler = Scheduler::new(config(4), generator.clone());
    let report = scheduler.run(g, &plan, &CancellationToken::new()).await;

    let a = report.get("a").unwrap();
    assert_eq!(a.state, GenerationState::Failed);
    assert_eq!(a.generations, 3);
    assert_eq!(a.repair_attempts, 2);
    assert_eq!(a.artifact.as_deref(), Some("class A:\n    def broken(self:\n"));
    assert!(a.errors.iter().all(|f| f.check == CheckKind::Structure));
    assert!(a.output_path.is_none());

    // the dependent still runs, with the blueprint as context
    let b = report.get("b").unwrap();
    assert_eq!(b.state, GenerationState::Succeeded);
    let request = generator.inner.request_for("b", 0);
    assert_eq!(request.dependencies[0].source, ContextSource::Blueprint);
    assert!(request.dependencies[0].text.contains("A(Base):"));
    assert!(!report.is_success());
}

/// Sleeps through the first attempt of every module
#[derive(Default)]
struct SlowFirst {
    calls: Mutex<HashMap<String, usize>>,
}

#[async_trait]
impl CodeGenerator for SlowFirst {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, TransportError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(request.module_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        if call == 1 {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Ok(satisfy(request))
    }
}

#[tokio::test]
async fn test_timeout_consumes_an_attempt() {
    let g = graph(&[("slow.md", "# slow\n\nrun() -> None\n")]);
    let plan = GenerationPlan::build(&g);
    let scheduler = Scheduler::new(
        SchedulerConfig {
            attempt_timeout: Some(Duration::from_millis(50)),
            ..config(1)
        },
        Arc::new(SlowFirst::default()),
    );
    let report = scheduler.run(g, &plan, &CancellationToken::new()).await;

    let slow = report.get("slow").unwrap();
    assert_eq!(slow.state, GenerationState::Succeeded);
    assert_eq!(slow.generations, 2);
    assert_eq!(slow.repair_attempts, 1);
}

/// Tracks how many calls overlap
#[derive(Default)]
struct Overlap {
    current: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl CodeGenerator for Overlap {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, TransportError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(satisfy(request))
    }
}

#[tokio::test]
async fn test_concurrency_bound_holds() {
    let names: Vec<String> = (0..12).map(|i| format!("m{:02}.md", i)).collect();
    let specs: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), "")).collect();
    let g = graph(&specs);
    let plan = GenerationPlan::build(&g);
    assert_eq!(plan.order.len(), 1);

    let generator = Arc::new(Overlap::default());
    let scheduler = Scheduler::new(config(3), generator.clone());
    let report = scheduler.run(g, &plan, &CancellationToken::new()).await;

    assert_eq!(report.succeeded(), 12);
    assert!(report.peak_concurrency <= 3, "peak {}", report.peak_concurrency);
    assert!(generator.peak.load(Ordering::SeqCst) <= 3);
    assert!(generator.peak.load(Ordering::SeqCst) >= 1);
}

/// Requests cancellation from inside its first call
struct CancelOnFirstCall {
    token: CancellationToken,
    calls: AtomicUsize,
}

#[async_trait]
impl CodeGenerator for CancelOnFirstCall {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, TransportError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.token.cancel();
        }
        Ok(satisfy(request))
    }
}

#[tokio::test]
async fn test_cancellation_marks_unstarted_nodes() {
    let g = graph(&[
        ("a1.md", ""),
        ("a2.md", ""),
        ("a3.md", ""),
        ("b.md", "deps: @a1\n"),
    ]);
    let plan = GenerationPlan::build(&g);
    let token = CancellationToken::new();
    let generator = Arc::new(CancelOnFirstCall {
        token: token.clone(),
        calls: AtomicUsize::new(0),
    });
    // one slot: the remaining level-0 nodes queue behind the cancelling call
    let scheduler = Scheduler::new(config(1), generator.clone());
    let report = scheduler.run(g, &plan, &token).await;

    assert!(report.cancelled);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.cancelled_nodes(), 3);
    assert_eq!(report.get("b").unwrap().state, GenerationState::Cancelled);
    assert!(!report.is_success());
}

/// Imports a symbol its dependency lacks until told otherwise
#[derive(Default)]
struct BadImportFirst {
    prompts: Mutex<BTreeMap<usize, String>>,
}

#[async_trait]
impl CodeGenerator for BadImportFirst {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, TransportError> {
        if request.module_id.as_str() != "b" {
            return Ok(satisfy(request));
        }
        self.prompts
            .lock()
            .unwrap()
            .insert(request.attempt, request.render_prompt());
        let symbol = if request.attempt == 0 { "Missing" } else { "A" };
        Ok(format!("from a import {}\n\nVALUE = {}\n", symbol, symbol))
    }
}

#[tokio::test]
async fn test_import_of_unexposed_symbol_is_repaired() {
    let g = graph(&[("a.md", "# a\n\nA(Base):\n"), ("b.md", "# b\n\ndeps: @a\n")]);
    let plan = GenerationPlan::build(&g);
    let generator = Arc::new(BadImportFirst::default());
    let scheduler = Scheduler::new(config(2), generator.clone());
    let report = scheduler.run(g, &plan, &CancellationToken::new()).await;

    let b = report.get("b").unwrap();
    assert_eq!(b.state, GenerationState::Succeeded);
    assert_eq!(b.repair_attempts, 1);

    let prompts = generator.prompts.lock().unwrap();
    assert!(prompts[&1].contains("'Missing' is not exposed by 'a'"), "{}", prompts[&1]);
}

/// Fixed artifact per module
struct Canned(HashMap<&'static str, &'static str>);

#[async_trait]
impl CodeGenerator for Canned {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, TransportError> {
        self.0
            .get(request.module_id.as_str())
            .map(|code| code.to_string())
            .ok_or_else(|| TransportError::Other(format!("no artifact for {}", request.module_id)))
    }
}

/// Runs `a` then `b` (which depends on `a`) and returns b's dependency context
async fn run_pair(
    language: Language,
    a_blueprint: &str,
    artifacts: [(&'static str, &'static str); 2],
) -> (RunReport, String) {
    let g = graph(&[("a.md", a_blueprint), ("b.md", "# b\n\ndeps: @a\n")]);
    let plan = GenerationPlan::build(&g);
    let inner = Canned(artifacts.into_iter().collect());
    let generator = Arc::new(Logged {
        inner,
        seen: Mutex::new(Vec::new()),
    });
    let scheduler = Scheduler::new(SchedulerConfig { language, ..config(2) }, generator.clone());
    let report = scheduler.run(g, &plan, &CancellationToken::new()).await;

    let seen = generator.seen.lock().unwrap();
    let b = seen.iter().find(|r| r.module_id.as_str() == "b").unwrap();
    assert_eq!(b.dependencies[0].source, ContextSource::ArtifactSummary);
    let context = b.dependencies[0].text.clone();
    (report, context)
}

/// Records requests in front of a canned generator
struct Logged {
    inner: Canned,
    seen: Mutex<Vec<GenerationRequest>>,
}

#[async_trait]
impl CodeGenerator for Logged {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, TransportError> {
        self.seen.lock().unwrap().push(request.clone());
        self.inner.generate(request).await
    }
}

#[tokio::test]
async fn test_rust_dependency_gets_interface_summary() {
    let (report, context) = run_pair(
        Language::Rust,
        "# a\n\nstruct Task\n\nload() -> Task\n",
        [
            (
                "a",
                "use std::fmt;\n\npub struct Task {\n    pub id: u64,\n}\n\n\npub fn load() -> Task {\n    Task { id: 1 }\n}\n",
            ),
            (
                "b",
                "use crate::a::Task;\n\npub fn show(task: &Task) -> u64 {\n    task.id\n}\n",
            ),
        ],
    )
    .await;

    assert!(report.is_success(), "{:#?}", report.results);
    for result in report.results.values() {
        assert_eq!(result.repair_attempts, 0, "{}", result.module_id);
        assert!(result.warnings.is_empty(), "{}: {:?}", result.module_id, result.warnings);
    }
    assert_eq!(context, "Module a exposes:\n  pub struct Task\n  pub fn load() -> Task\n");
}

#[tokio::test]
async fn test_javascript_regex_literal_is_accepted() {
    let (report, context) = run_pair(
        Language::JavaScript,
        "# a\n\nescapeHtml(text) -> string\n",
        [
            (
                "a",
                "export function escapeHtml(text) {\n  return text.replace(/\"/g, '&quot;').replace(/[<(]/g, '');\n}\n",
            ),
            (
                "b",
                "import { escapeHtml } from './a';\n\nexport const render = (s) => `<p>${escapeHtml(s)}</p>`;\n",
            ),
        ],
    )
    .await;

    assert!(report.is_success(), "{:#?}", report.results);
    assert_eq!(report.get("a").unwrap().generations, 1);
    assert_eq!(report.get("b").unwrap().repair_attempts, 0);
    assert_eq!(context, "Module a exposes:\n  export function escapeHtml(text)\n");
}

#[tokio::test]
async fn test_existing_output_fails_node_without_overwrite() {
    let g = graph(&[("a.md", "# a\n")]);
    let plan = GenerationPlan::build(&g);
    let out = tempfile::tempdir().unwrap();
    let existing = out.path().join("a.py");
    fs::write(&existing, "# keep me\n").unwrap();

    let writer = FsArtifactWriter::new(out.path(), Language::Python).with_output_dir(out.path());
    let scheduler =
        Scheduler::new(config(1), Arc::new(Recording::default())).with_writer(Arc::new(writer));
    let report = scheduler.run(g, &plan, &CancellationToken::new()).await;

    let a = report.get("a").unwrap();
    assert_eq!(a.state, GenerationState::Failed);
    assert_eq!(a.artifact.as_deref(), Some("A = 1\n"));
    assert!(a.output_path.is_none());
    assert!(a.errors.iter().any(|f| f.check == CheckKind::Output));
    assert_eq!(fs::read_to_string(&existing).unwrap(), "# keep me\n");
    assert!(!report.is_success());
}
