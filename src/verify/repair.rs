//! Verify-repair loop
//!
//! A bounded state machine per node:
//!
//! ```text
//! Generating -> Verifying -> Accepted
//!     ^             |
//!     |             v
//!     +------- Repairing -> Rejected (attempts exhausted)
//! ```
//!
//! Transport failures and timeouts skip `Verifying` and count as a failed
//! attempt.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{CheckKind, Finding, VerificationContext, Verifier};
use crate::error::TransportError;
use crate::generate::{CodeGenerator, GenerationRequest, PriorFailure};
use crate::schedule::cancel::CancellationToken;
use crate::schedule::limiter::CallLimiter;

/// Loop position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Generating,
    Verifying,
    Repairing,
    Accepted,
    Rejected,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected)
    }
}

/// Attempt budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairPolicy {
    /// Generations after the first; a node gets at most `max_repairs + 1`
    pub max_repairs: usize,
    pub attempt_timeout: Option<Duration>,
}

impl Default for RepairPolicy {
    fn default() -> Self {
        Self {
            max_repairs: 2,
            attempt_timeout: Some(Duration::from_secs(300)),
        }
    }
}

/// How the loop ended
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    /// `Accepted` or `Rejected`
    pub state: LoopState,
    /// Last generated artifact, accepted or not
    pub artifact: Option<String>,
    pub generations: usize,
    pub repair_attempts: usize,
    /// Soft findings of the final verification
    pub warnings: Vec<Finding>,
    /// Findings that rejected the final attempt
    pub errors: Vec<Finding>,
    /// Every state visited, in order
    pub trace: Vec<LoopState>,
}

impl LoopOutcome {
    pub fn is_accepted(&self) -> bool {
        self.state == LoopState::Accepted
    }
}

/// Drives one node from first generation to a terminal state
pub struct RepairLoop<'a> {
    generator: &'a dyn CodeGenerator,
    verifier: &'a Verifier,
    limiter: &'a CallLimiter,
    policy: RepairPolicy,
}

impl<'a> RepairLoop<'a> {
    pub fn new(
        generator: &'a dyn CodeGenerator,
        verifier: &'a Verifier,
        limiter: &'a CallLimiter,
        policy: RepairPolicy,
    ) -> Self {
        Self {
            generator,
            verifier,
            limiter,
            policy,
        }
    }

    /// Returns `None` when cancellation was observed before the first call
    pub async fn run(
        &self,
        request: GenerationRequest,
        ctx: &VerificationContext,
        cancel: &CancellationToken,
    ) -> Option<LoopOutcome> {
        let module = request.module_id.clone();
        let mut state = LoopState::Generating;
        let mut trace = Vec::new();
        let mut attempt = 0usize;
        let mut generations = 0usize;
        let mut artifact: Option<String> = None;
        let mut prior: Option<PriorFailure> = None;
        let mut failures: Vec<Finding> = Vec::new();
        let mut warnings: Vec<Finding> = Vec::new();

        while !state.is_terminal() {
            trace.push(state);
            state = match state {
                LoopState::Generating => {
                    let slot = self.limiter.acquire().await;
                    if generations == 0 && cancel.is_cancelled() {
                        debug!(module = %module, "Cancelled before dispatch");
                        return None;
                    }

                    let mut attempt_request = request.clone();
                    attempt_request.attempt = attempt;
                    attempt_request.prior_failure = prior.clone();

                    let result = self.call(&attempt_request).await;
                    drop(slot);
                    generations += 1;

                    match result {
                        Ok(code) => {
                            artifact = Some(code);
                            LoopState::Verifying
                        }
                        Err(e) => {
                            warn!(module = %module, attempt, error = %e, "Generation attempt failed");
                            failures = vec![Finding::hard(CheckKind::Transport, e.to_string())];
                            warnings.clear();
                            self.after_failure(generations)
                        }
                    }
                }
                LoopState::Verifying => {
                    let code = artifact.as_deref().unwrap_or_default();
                    let report = self.verifier.verify(code, ctx);
                    warnings = report.soft();
                    if self.verifier.accepts(&report) {
                        failures.clear();
                        LoopState::Accepted
                    } else {
                        failures = if self.verifier.config().repair_on_soft_findings {
                            report.findings
                        } else {
                            report.hard()
                        };
                        debug!(
                            module = %module,
                            attempt,
                            findings = failures.len(),
                            "Artifact rejected"
                        );
                        self.after_failure(generations)
                    }
                }
                LoopState::Repairing => {
                    prior = Some(PriorFailure {
                        attempt,
                        artifact: artifact.clone().unwrap_or_default(),
                        findings: failures.clone(),
                    });
                    attempt += 1;
                    info!(module = %module, attempt, "Repairing");
                    LoopState::Generating
                }
                LoopState::Accepted | LoopState::Rejected => state,
            };
        }
        trace.push(state);

        Some(LoopOutcome {
            state,
            artifact,
            generations,
            repair_attempts: generations.saturating_sub(1),
            warnings,
            errors: if state == LoopState::Rejected {
                failures
            } else {
                Vec::new()
            },
            trace,
        })
    }

    async fn call(&self, request: &GenerationRequest) -> Result<String, TransportError> {
        match self.policy.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, self.generator.generate(request))
                .await
                .unwrap_or(Err(TransportError::Timeout(limit))),
            None => self.generator.generate(request).await,
        }
    }

    fn after_failure(&self, generations: usize) -> LoopState {
        if generations > self.policy.max_repairs {
            LoopState::Rejected
        } else {
            LoopState::Repairing
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ModuleId;
    use crate::language::Language;
    use async_trait::async_trait;
    use std::collections::{BTreeSet, VecDeque};
    use std::sync::{Arc, Mutex};

    /// Replays canned responses; `None` sleeps past any timeout
    struct Scripted {
        responses: Mutex<VecDeque<Option<Result<String, TransportError>>>>,
        seen: Mutex<Vec<GenerationRequest>>,
    }

    impl Scripted {
        fn new(responses: Vec<Option<Result<String, TransportError>>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CodeGenerator for Scripted {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, TransportError> {
            self.seen.lock().unwrap().push(request.clone());
            let next = self.responses.lock().unwrap().pop_front();
            match next {
                Some(Some(result)) => result,
                Some(None) => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Err(TransportError::Other("slept".into()))
                }
                None => Err(TransportError::Other("script exhausted".into())),
            }
        }
    }

    const GOOD: &str = "class TaskService:\n    def list(self):\n        return []\n";
    const BROKEN: &str = "class TaskService:\n    def list(self:\n";

    fn ctx() -> VerificationContext {
        let id = ModuleId::parse("api.tasks").unwrap();
        let known = Arc::new(BTreeSet::from([id.clone()]));
        VerificationContext::new(id, Language::Python, "TaskService:\n  list()\n", known)
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new(ModuleId::parse("api.tasks").unwrap(), Language::Python, "# api.tasks")
    }

    async fn run(
        generator: &Scripted,
        policy: RepairPolicy,
        cancel: &CancellationToken,
    ) -> Option<LoopOutcome> {
        let verifier = Verifier::default();
        let limiter = CallLimiter::new(1);
        RepairLoop::new(generator, &verifier, &limiter, policy)
            .run(request(), &ctx(), cancel)
            .await
    }

    #[tokio::test]
    async fn test_accepts_first_good_artifact() {
        let generator = Scripted::new(vec![Some(Ok(GOOD.into()))]);
        let outcome = run(&generator, RepairPolicy::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.is_accepted());
        assert_eq!(outcome.generations, 1);
        assert_eq!(outcome.repair_attempts, 0);
        assert_eq!(
            outcome.trace,
            vec![LoopState::Generating, LoopState::Verifying, LoopState::Accepted]
        );
    }

    #[tokio::test]
    async fn test_repair_feeds_back_prior_failure() {
        let generator = Scripted::new(vec![Some(Ok(BROKEN.into())), Some(Ok(GOOD.into()))]);
        let outcome = run(&generator, RepairPolicy::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.is_accepted());
        assert_eq!(outcome.repair_attempts, 1);

        let seen = generator.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].prior_failure.is_none());
        let prior = seen[1].prior_failure.as_ref().unwrap();
        assert_eq!(seen[1].attempt, 1);
        assert_eq!(prior.attempt, 0);
        assert_eq!(prior.artifact, BROKEN);
        assert!(prior.findings.iter().all(|f| f.check == CheckKind::Structure));
    }

    #[tokio::test]
    async fn test_exhaustion_rejects_and_keeps_artifact() {
        let generator = Scripted::new(vec![Some(Ok(BROKEN.into())); 3]);
        let outcome = run(&generator, RepairPolicy::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.state, LoopState::Rejected);
        assert_eq!(outcome.generations, 3);
        assert_eq!(outcome.repair_attempts, 2);
        assert_eq!(outcome.artifact.as_deref(), Some(BROKEN));
        assert!(!outcome.errors.is_empty());
        assert_eq!(outcome.trace.last(), Some(&LoopState::Rejected));
    }

    #[tokio::test]
    async fn test_timeout_consumes_attempt() {
        let generator = Scripted::new(vec![None, Some(Ok(GOOD.into()))]);
        let policy = RepairPolicy {
            max_repairs: 2,
            attempt_timeout: Some(Duration::from_millis(50)),
        };
        let outcome = run(&generator, policy, &CancellationToken::new()).await.unwrap();
        assert!(outcome.is_accepted());
        assert_eq!(outcome.repair_attempts, 1);

        let seen = generator.seen.lock().unwrap();
        let prior = seen[1].prior_failure.as_ref().unwrap();
        assert_eq!(prior.findings[0].check, CheckKind::Transport);
        assert!(prior.findings[0].message.contains("timed out"));
    }

    #[tokio::test]
    async fn test_transport_failure_without_repairs() {
        let generator = Scripted::new(vec![Some(Err(TransportError::EmptyResponse))]);
        let policy = RepairPolicy {
            max_repairs: 0,
            attempt_timeout: None,
        };
        let outcome = run(&generator, policy, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.state, LoopState::Rejected);
        assert_eq!(outcome.artifact, None);
        assert_eq!(outcome.errors[0].check, CheckKind::Transport);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let generator = Scripted::new(vec![Some(Ok(GOOD.into()))]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(run(&generator, RepairPolicy::default(), &cancel).await.is_none());
        assert!(generator.seen.lock().unwrap().is_empty());
    }
}
