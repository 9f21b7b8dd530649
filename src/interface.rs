//! Artifact Interfaces
//!
//! Reads the symbols a generated artifact exposes. Dependents receive the
//! interface summary instead of the full artifact text, and the import check
//! uses the exposed symbols to validate `from x import Y` style imports.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::graph::ModuleId;
use crate::language::Language;

struct LanguagePatterns {
    /// Symbols visible to other modules
    exposed: Vec<Regex>,
    /// Every named definition, any nesting
    definitions: Vec<Regex>,
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("valid interface regex"))
        .collect()
}

static PYTHON: Lazy<LanguagePatterns> = Lazy::new(|| LanguagePatterns {
    exposed: compile(&[
        r"(?m)^(?:async\s+)?def\s+([A-Za-z_]\w*)",
        r"(?m)^class\s+([A-Za-z_]\w*)",
        r"(?m)^([A-Za-z_]\w*)\s*(?::[^=\n]+)?=[^=]",
    ]),
    definitions: compile(&[r"(?m)^[ \t]*(?:async\s+)?(?:def|class)\s+([A-Za-z_]\w*)"]),
});

static RUST: Lazy<LanguagePatterns> = Lazy::new(|| LanguagePatterns {
    exposed: compile(&[
        r"(?m)^[ \t]*pub(?:\([^)]*\))?\s+(?:async\s+)?(?:unsafe\s+)?(?:const\s+fn|fn|struct|enum|trait|type|const|static|mod|union)\s+([A-Za-z_]\w*)",
        r"(?m)^[ \t]*pub\s+use\s+[^;{]*?(\w+)\s*;",
    ]),
    definitions: compile(&[
        r"(?m)^[ \t]*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:unsafe\s+)?(?:fn|struct|enum|trait|type|const|static|mod|union)\s+([A-Za-z_]\w*)",
    ]),
});

static SCRIPT: Lazy<LanguagePatterns> = Lazy::new(|| LanguagePatterns {
    exposed: compile(&[
        r"(?m)^[ \t]*export\s+(?:default\s+)?(?:declare\s+)?(?:async\s+)?(?:abstract\s+)?(?:function\*?|class|const|let|var|interface|type|enum)\s+([A-Za-z_$][\w$]*)",
    ]),
    definitions: compile(&[
        r"(?m)^[ \t]*(?:export\s+)?(?:default\s+)?(?:async\s+)?(?:abstract\s+)?(?:function\*?|class|const|let|var|interface|type|enum)\s+([A-Za-z_$][\w$]*)",
        r"(?m)^[ \t]+(?:public\s+|private\s+|protected\s+|static\s+|async\s+)*([A-Za-z_$][\w$]*)\s*\([^)]*\)\s*(?::[^{]+)?\{",
    ]),
});

static GO: Lazy<LanguagePatterns> = Lazy::new(|| LanguagePatterns {
    exposed: compile(&[
        r"(?m)^func\s+(?:\([^)]*\)\s*)?([A-Z]\w*)",
        r"(?m)^type\s+([A-Z]\w*)",
        r"(?m)^(?:var|const)\s+([A-Z]\w*)",
    ]),
    definitions: compile(&[
        r"(?m)^func\s+(?:\([^)]*\)\s*)?([A-Za-z_]\w*)",
        r"(?m)^type\s+([A-Za-z_]\w*)",
    ]),
});

static EXPORT_LIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*export\s*\{([^}]*)\}").expect("valid export regex"));

fn patterns(language: Language) -> &'static LanguagePatterns {
    match language {
        Language::Python => &PYTHON,
        Language::Rust => &RUST,
        Language::TypeScript | Language::JavaScript => &SCRIPT,
        Language::Go => &GO,
    }
}

/// What an artifact offers to other modules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactInterface {
    /// Names importable by other modules
    pub exposed: BTreeSet<String>,
    /// Every named definition in the artifact, exposed or not
    pub definitions: BTreeSet<String>,
    /// Declaration lines of exposed symbols, in source order
    pub signatures: Vec<String>,
}

impl ArtifactInterface {
    pub fn extract(language: Language, text: &str) -> Self {
        let table = patterns(language);
        let mut interface = Self::default();
        let mut seen_lines = BTreeSet::new();

        let mut hits: Vec<(usize, String, String)> = Vec::new();
        for re in &table.exposed {
            for caps in re.captures_iter(text) {
                let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                    continue;
                };
                let line = line_at(text, whole.start());
                hits.push((whole.start(), name.as_str().to_string(), line));
            }
        }
        if matches!(language, Language::TypeScript | Language::JavaScript) {
            for caps in EXPORT_LIST.captures_iter(text) {
                let (Some(whole), Some(list)) = (caps.get(0), caps.get(1)) else {
                    continue;
                };
                for item in list.as_str().split(',') {
                    let name = item.split(" as ").last().unwrap_or("").trim();
                    if !name.is_empty() {
                        hits.push((whole.start(), name.to_string(), line_at(text, whole.start())));
                    }
                }
            }
        }
        hits.sort_by_key(|(pos, _, _)| *pos);

        for (pos, name, line) in hits {
            interface.exposed.insert(name.clone());
            interface.definitions.insert(name);
            if seen_lines.insert(pos) {
                interface.signatures.push(line);
            }
        }

        for re in &table.definitions {
            for caps in re.captures_iter(text) {
                if let Some(name) = caps.get(1) {
                    interface.definitions.insert(name.as_str().to_string());
                }
            }
        }

        interface
    }

    pub fn exposes(&self, name: &str) -> bool {
        self.exposed.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.exposed.is_empty()
    }

    /// Compact description handed to dependents in place of the full artifact
    pub fn summary(&self, module: &ModuleId) -> String {
        if self.signatures.is_empty() {
            return format!("Module {} exposes no recognizable top-level symbols.", module);
        }
        let mut out = format!("Module {} exposes:\n", module);
        for signature in &self.signatures {
            out.push_str("  ");
            out.push_str(signature);
            out.push('\n');
        }
        out
    }
}

/// Trimmed source line containing byte offset `pos`, without a trailing block opener
fn line_at(text: &str, pos: usize) -> String {
    let start = text[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let end = text[pos..].find('\n').map(|i| pos + i).unwrap_or(text.len());
    text[start..end]
        .trim()
        .trim_end_matches('{')
        .trim_end()
        .to_string()
}
