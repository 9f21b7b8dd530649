//! Declared-element matching
//!
//! Blueprints are prose, so the names they promise are pulled out
//! heuristically and matched against the artifact with a fuzzy score.

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

use super::{CheckKind, Finding};
use crate::interface::ArtifactInterface;

/// `class Foo`, `def bar`, `fn baz`, `interface Qux` ...
static KEYWORD_DECLARATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^\s*(?:[-*+]\s+)?`?(?:pub\s+)?(?:export\s+)?(?:async\s+)?(?:class|def|fn|func|function|struct|enum|trait|interface|type)\s+([A-Za-z_]\w*)",
    )
    .expect("valid declaration regex")
});

/// `list_tasks(limit: int) -> list[Task]`
static SIGNATURE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:[-*+]\s+)?`?([A-Za-z_]\w*)\s*\([^)\n]*\)\s*(?:->|:|`|$)")
        .expect("valid signature regex")
});

/// `TaskService:` or `Task(BaseModel):`
static HEADER_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:[-*+]\s+)?`?([A-Z][A-Za-z0-9_]*)(\([^)\n]*\))?`?\s*:\s*$")
        .expect("valid header regex")
});

/// Capitalised words blueprints use as section labels
const HEADER_STOPWORDS: &[&str] = &[
    "API", "Behavior", "Behaviour", "Deps", "Dependencies", "Description", "Errors", "Example",
    "Examples", "Exports", "Fields", "Imports", "Inputs", "Methods", "Notes", "Outputs",
    "Overview", "Purpose", "Returns", "Signature", "Signatures", "Summary", "Tests", "TODO",
    "Types", "Usage",
];

fn uppercase_count(name: &str) -> usize {
    name.chars().filter(|c| c.is_ascii_uppercase()).count()
}

/// Element names a blueprint declares, in order of first appearance
pub fn declared_elements(blueprint: &str) -> Vec<String> {
    let mut hits: Vec<(usize, String)> = Vec::new();

    for caps in KEYWORD_DECLARATION.captures_iter(blueprint) {
        if let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) {
            hits.push((whole.start(), name.as_str().to_string()));
        }
    }

    for caps in SIGNATURE_LINE.captures_iter(blueprint) {
        if let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) {
            hits.push((whole.start(), name.as_str().to_string()));
        }
    }

    for caps in HEADER_LINE.captures_iter(blueprint) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let name = name.as_str();
        if HEADER_STOPWORDS.contains(&name) {
            continue;
        }
        let has_base = caps.get(2).is_some();
        if has_base || uppercase_count(name) >= 2 {
            hits.push((whole.start(), name.to_string()));
        }
    }

    hits.sort_by_key(|(pos, _)| *pos);
    let mut seen = BTreeSet::new();
    hits.into_iter()
        .filter_map(|(_, name)| seen.insert(name.clone()).then_some(name))
        .collect()
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Fuzzy presence test for declared names
pub struct DeclaredMatcher {
    threshold: f64,
    matcher: SkimMatcherV2,
}

impl DeclaredMatcher {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
            matcher: SkimMatcherV2::default(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Score in `0..=1`: skim score of `candidate` against `declared`,
    /// divided by the score `declared` gets against itself
    pub fn confidence(&self, declared: &str, candidate: &str) -> f64 {
        let declared = normalize(declared);
        let candidate = normalize(candidate);
        if declared.is_empty() || candidate.is_empty() {
            return 0.0;
        }
        if declared == candidate {
            return 1.0;
        }

        let Some(self_score) = self.matcher.fuzzy_match(&declared, &declared) else {
            return 0.0;
        };
        if self_score <= 0 {
            return 0.0;
        }
        self.matcher
            .fuzzy_match(&candidate, &declared)
            .map(|score| (score as f64 / self_score as f64).clamp(0.0, 1.0))
            .unwrap_or(0.0)
    }

    /// Best-scoring artifact definition for `declared`
    pub fn best_match<'a>(
        &self,
        declared: &str,
        interface: &'a ArtifactInterface,
    ) -> Option<(&'a str, f64)> {
        interface
            .definitions
            .iter()
            .map(|candidate| (candidate.as_str(), self.confidence(declared, candidate)))
            .filter(|(_, score)| *score > 0.0)
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Soft finding for every declared element absent from the artifact
    pub fn check(
        &self,
        declared: &[String],
        artifact: &str,
        interface: &ArtifactInterface,
    ) -> Vec<Finding> {
        let mut findings = Vec::new();

        for name in declared {
            if appears_as_word(artifact, name) {
                continue;
            }
            match self.best_match(name, interface) {
                Some((_, score)) if score >= self.threshold => {}
                Some((candidate, score)) => findings.push(Finding::soft(
                    CheckKind::DeclaredElement,
                    format!(
                        "declared element '{}' not found (closest: '{}' at {:.2})",
                        name, candidate, score
                    ),
                )),
                None => findings.push(Finding::soft(
                    CheckKind::DeclaredElement,
                    format!("declared element '{}' not found", name),
                )),
            }
        }

        findings
    }
}

fn appears_as_word(text: &str, word: &str) -> bool {
    Regex::new(&format!(r"\b{}\b", regex::escape(word)))
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}
