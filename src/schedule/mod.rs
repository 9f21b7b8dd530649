//! Level Scheduler
//!
//! Runs a [`GenerationPlan`] level by level. Every member of a level is
//! dispatched at once as its own task; the next level starts only after all
//! of them have joined. Generator calls across the whole run share one
//! [`CallLimiter`], so at most `max_concurrency` are in flight.
//!
//! Tasks never see mutable shared state: each gets the read-only graph, an
//! immutable snapshot of earlier levels' results, and owns its own result.

pub mod cancel;
pub mod limiter;
pub mod result;

pub use cancel::CancellationToken;
pub use limiter::{CallLimiter, CallSlot};
pub use result::{GenerationResult, GenerationState};

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::generate::{CodeGenerator, ContextSource, DependencyContext, GenerationRequest};
use crate::graph::{BlueprintGraph, BlueprintNode, GenerationPlan, Level, ModuleId};
use crate::interface::ArtifactInterface;
use crate::language::Language;
use crate::report::RunReport;
use crate::verify::{declared_elements, RepairLoop, RepairPolicy, VerificationContext, Verifier, VerifyConfig};
use crate::writer::ArtifactWriter;

/// Results of finished levels, shared read-only with later tasks
pub type ResultSnapshot = Arc<BTreeMap<ModuleId, GenerationResult>>;

/// Scheduler settings
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub language: Language,
    /// Upper bound on concurrent generator calls
    pub max_concurrency: usize,
    pub max_repairs: usize,
    /// `None` disables the per-attempt timeout
    pub attempt_timeout: Option<Duration>,
    pub verify: VerifyConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            language: Language::default(),
            max_concurrency: 4,
            max_repairs: 2,
            attempt_timeout: Some(Duration::from_secs(300)),
            verify: VerifyConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn repair_policy(&self) -> RepairPolicy {
        RepairPolicy {
            max_repairs: self.max_repairs,
            attempt_timeout: self.attempt_timeout,
        }
    }
}

/// Per-run data every node task reads
struct RunShared {
    graph: Arc<BlueprintGraph>,
    known: Arc<BTreeSet<ModuleId>>,
    language: Language,
    dependency_versions: BTreeMap<String, String>,
}

/// Drives generation across a plan
pub struct Scheduler {
    config: SchedulerConfig,
    generator: Arc<dyn CodeGenerator>,
    verifier: Arc<Verifier>,
    limiter: Arc<CallLimiter>,
    writer: Option<Arc<dyn ArtifactWriter>>,
    dependency_versions: BTreeMap<String, String>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, generator: Arc<dyn CodeGenerator>) -> Self {
        let limiter = CallLimiter::shared(config.max_concurrency);
        let verifier = Arc::new(Verifier::new(config.verify));
        Self {
            config,
            generator,
            verifier,
            limiter,
            writer: None,
            dependency_versions: BTreeMap::new(),
        }
    }

    /// Persist accepted artifacts after each level
    pub fn with_writer(mut self, writer: Arc<dyn ArtifactWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Third-party packages passed to every request
    pub fn with_dependency_versions(mut self, versions: BTreeMap<String, String>) -> Self {
        self.dependency_versions = versions;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn limiter(&self) -> &Arc<CallLimiter> {
        &self.limiter
    }

    /// Generate every node of `plan`. Node failures are recorded, never raised.
    pub async fn run(
        &self,
        graph: Arc<BlueprintGraph>,
        plan: &GenerationPlan,
        cancel: &CancellationToken,
    ) -> RunReport {
        let started_at = Utc::now();
        let shared = Arc::new(RunShared {
            known: Arc::new(graph.module_ids().cloned().collect()),
            graph: Arc::clone(&graph),
            language: self.config.language,
            dependency_versions: self.dependency_versions.clone(),
        });

        info!(
            modules = graph.module_count(),
            levels = plan.order.len(),
            language = %self.config.language,
            max_concurrency = self.limiter.max(),
            "Starting generation"
        );

        let mut completed: BTreeMap<ModuleId, GenerationResult> = BTreeMap::new();

        for level in &plan.order.levels {
            if cancel.is_cancelled() {
                for module in level.modules() {
                    completed.insert(module.clone(), GenerationResult::cancelled(module.clone()));
                }
                continue;
            }

            let snapshot: ResultSnapshot = Arc::new(completed.clone());
            let span = info_span!("level", index = level.index, units = level.units.len());
            let results = self
                .run_level(&shared, plan, level, snapshot, cancel)
                .instrument(span)
                .await;
            completed.extend(results);
        }

        let report = RunReport {
            started_at,
            finished_at: Utc::now(),
            language: self.config.language,
            bundle_hash: graph.bundle_hash().to_string(),
            levels: plan.order.module_levels(),
            collapsed_units: plan
                .analysis
                .collapsed()
                .map(|u| u.members.clone())
                .collect(),
            results: completed,
            cancelled: cancel.is_cancelled(),
            peak_concurrency: self.limiter.peak(),
        };

        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            cancelled = report.cancelled_nodes(),
            "Generation finished"
        );
        report
    }

    async fn run_level(
        &self,
        shared: &Arc<RunShared>,
        plan: &GenerationPlan,
        level: &Level,
        snapshot: ResultSnapshot,
        cancel: &CancellationToken,
    ) -> BTreeMap<ModuleId, GenerationResult> {
        let mut tasks: JoinSet<(ModuleId, GenerationResult)> = JoinSet::new();
        let mut dispatched = Vec::new();

        for module in level.modules() {
            let Some(node) = shared.graph.get(module.as_str()) else {
                continue;
            };
            let peers: Vec<ModuleId> = plan.peers(module.as_str()).into_iter().cloned().collect();
            let request = build_request(shared, node, &peers, &snapshot);
            let ctx = build_context(shared, node, &peers, &snapshot);

            let generator = Arc::clone(&self.generator);
            let verifier = Arc::clone(&self.verifier);
            let limiter = Arc::clone(&self.limiter);
            let policy = self.config.repair_policy();
            let cancel = cancel.clone();
            let id = module.clone();
            let span = info_span!("node", module = %id, peers = peers.len());

            dispatched.push(id.clone());
            tasks.spawn(
                async move {
                    let started = GenerationResult::start(id.clone());
                    let outcome = RepairLoop::new(generator.as_ref(), &verifier, &limiter, policy)
                        .run(request, &ctx, &cancel)
                        .await;
                    let result = match outcome {
                        Some(outcome) => started.finish(outcome),
                        None => GenerationResult::cancelled(id.clone()),
                    };
                    debug!(state = ?result.state, repairs = result.repair_attempts, "Node finished");
                    (id, result)
                }
                .instrument(span),
            );
        }

        let mut results = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, result)) => {
                    results.insert(id, result);
                }
                Err(e) => warn!(error = %e, "Generation task did not complete"),
            }
        }

        for id in dispatched {
            if !results.contains_key(&id) {
                results.insert(
                    id.clone(),
                    GenerationResult::aborted(id, "generation task panicked or was aborted"),
                );
            }
        }

        if let Some(writer) = &self.writer {
            for result in results.values_mut() {
                let (Some(artifact), Some(node)) = (
                    result.accepted_artifact(),
                    shared.graph.get(result.module_id.as_str()),
                ) else {
                    continue;
                };
                match writer.write(node, artifact) {
                    Ok(path) => result.output_path = Some(path),
                    Err(e) => {
                        warn!(module = %result.module_id, error = %e, "Could not write artifact");
                        result.write_failed(e.to_string());
                    }
                }
            }
        }

        results
    }
}

/// Interface summary of an accepted artifact, else the raw blueprint
fn dependency_context(
    shared: &RunShared,
    node: &BlueprintNode,
    dep: &ModuleId,
    snapshot: &ResultSnapshot,
) -> Option<DependencyContext> {
    let dep_node = shared.graph.get(dep.as_str())?;
    let requested_symbols = node.requested_symbols(dep);

    let (source, text) = match snapshot.get(dep).and_then(|r| r.accepted_artifact()) {
        Some(artifact) => (
            ContextSource::ArtifactSummary,
            ArtifactInterface::extract(shared.language, artifact).summary(dep),
        ),
        None => (ContextSource::Blueprint, dep_node.content.clone()),
    };

    Some(DependencyContext {
        module_id: dep.clone(),
        source,
        text,
        requested_symbols,
    })
}

fn build_request(
    shared: &RunShared,
    node: &BlueprintNode,
    peers: &[ModuleId],
    snapshot: &ResultSnapshot,
) -> GenerationRequest {
    let mut request =
        GenerationRequest::new(node.module_id.clone(), shared.language, node.content.clone());
    request.dependency_versions = shared.dependency_versions.clone();

    for dep in &node.resolved_dependencies {
        if peers.contains(dep) {
            continue;
        }
        if let Some(ctx) = dependency_context(shared, node, dep, snapshot) {
            request.dependencies.push(ctx);
        }
    }

    for peer in peers {
        if let Some(peer_node) = shared.graph.get(peer.as_str()) {
            request.peers.push(DependencyContext {
                module_id: peer.clone(),
                source: ContextSource::Blueprint,
                text: peer_node.content.clone(),
                requested_symbols: node.requested_symbols(peer),
            });
        }
    }

    request
}

/// Names a module is known to offer: declared in its blueprint, plus what its
/// accepted artifact exposes
fn exposure(shared: &RunShared, module: &ModuleId, snapshot: &ResultSnapshot) -> BTreeSet<String> {
    let mut names: BTreeSet<String> = shared
        .graph
        .get(module.as_str())
        .map(|n| declared_elements(&n.content).into_iter().collect())
        .unwrap_or_default();
    if let Some(artifact) = snapshot.get(module).and_then(|r| r.accepted_artifact()) {
        names.extend(ArtifactInterface::extract(shared.language, artifact).exposed);
    }
    names
}

fn build_context(
    shared: &RunShared,
    node: &BlueprintNode,
    peers: &[ModuleId],
    snapshot: &ResultSnapshot,
) -> VerificationContext {
    let mut ctx = VerificationContext::new(
        node.module_id.clone(),
        shared.language,
        &node.content,
        Arc::clone(&shared.known),
    );
    for dep in &node.resolved_dependencies {
        if !peers.contains(dep) {
            ctx = ctx.with_dependency(dep.clone(), exposure(shared, dep, snapshot));
        }
    }
    for peer in peers {
        ctx = ctx.with_peer(peer.clone(), exposure(shared, peer, snapshot));
    }
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::graph::{BlueprintSource, GraphBuilder};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Emits `NAME = 1` for each module and records requests
    #[derive(Default)]
    struct Echo {
        seen: Mutex<Vec<GenerationRequest>>,
    }

    #[async_trait]
    impl CodeGenerator for Echo {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, TransportError> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(format!("{} = 1\n", request.module_id.name().to_uppercase()))
        }
    }

    fn graph(specs: &[(&str, &str)]) -> Arc<BlueprintGraph> {
        let sources = specs
            .iter()
            .map(|(path, content)| BlueprintSource::new(*path, *content))
            .collect();
        Arc::new(GraphBuilder::new().build(sources).unwrap())
    }

    #[tokio::test]
    async fn test_dependencies_see_interface_summaries() {
        let g = graph(&[("base.md", "# base\n"), ("top.md", "# top\n\ndeps: @base\n")]);
        let plan = GenerationPlan::build(&g);
        let echo = Arc::new(Echo::default());
        let scheduler = Scheduler::new(SchedulerConfig::default(), echo.clone());

        let report = scheduler.run(g, &plan, &CancellationToken::new()).await;
        assert!(report.is_success());
        assert_eq!(report.levels.len(), 2);

        let seen = echo.seen.lock().unwrap();
        let top = seen.iter().find(|r| r.module_id.as_str() == "top").unwrap();
        assert_eq!(top.dependencies.len(), 1);
        assert_eq!(top.dependencies[0].source, ContextSource::ArtifactSummary);
        assert!(top.dependencies[0].text.contains("BASE = 1"));
    }

    #[tokio::test]
    async fn test_cycle_members_get_peer_context() {
        let g = graph(&[("a.md", "deps: @b\n"), ("b.md", "deps: @a\n")]);
        let plan = GenerationPlan::build(&g);
        let echo = Arc::new(Echo::default());
        let scheduler = Scheduler::new(SchedulerConfig::default(), echo.clone());

        let report = scheduler.run(g, &plan, &CancellationToken::new()).await;
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.collapsed_units.len(), 1);

        let seen = echo.seen.lock().unwrap();
        for request in seen.iter() {
            assert!(request.dependencies.is_empty());
            assert_eq!(request.peers.len(), 1);
            assert_ne!(request.peers[0].module_id, request.module_id);
        }
    }

    #[tokio::test]
    async fn test_cancelled_run_dispatches_nothing() {
        let g = graph(&[("a.md", ""), ("b.md", "deps: @a\n")]);
        let plan = GenerationPlan::build(&g);
        let echo = Arc::new(Echo::default());
        let scheduler = Scheduler::new(SchedulerConfig::default(), echo.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = scheduler.run(g, &plan, &cancel).await;
        assert!(report.cancelled);
        assert_eq!(report.cancelled_nodes(), 2);
        assert!(echo.seen.lock().unwrap().is_empty());
    }
}
