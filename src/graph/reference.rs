//! Reference Parsing
//!
//! Blueprints name their dependencies in a declaration such as
//!
//! ```text
//! deps: @.models[Task, TaskStatus]; @..core.db, fastapi>=0.104
//! ```
//!
//! or in a `## Dependencies` section of bullets. A reference starts with `@`,
//! followed by zero or more leading dots and a dotted module path:
//!
//! - no dot: absolute, resolves to the literal path
//! - one dot: sibling, resolves inside the referencing blueprint's directory
//! - N dots: walks up N-1 packages, then resolves the rest
//!
//! `@./models/task` and `@../core/db` are accepted as slash spellings of
//! `@.models.task` and `@..core.db`. An optional `[A, B]` suffix lists the
//! symbols the blueprint expects from that module; symbols never create edges.
//!
//! Entries without `@` are recorded as external (third-party) dependencies.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{is_valid_segment, ModuleId};

static INLINE_DECLARATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:[-*+]\s+)?(?:deps|dependencies|depends on|imports?)\s*:\s*(.*)$")
        .expect("valid declaration regex")
});

static HEADING_DECLARATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*#{1,6}\s*(?:blueprint\s+)?(?:deps|dependencies)\s*:?\s*$")
        .expect("valid heading regex")
});

static HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*#{1,6}\s").expect("valid heading regex"));

static BULLET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[-*+]\s+(.*)$").expect("valid bullet regex"));

// =============================================================================
// Errors
// =============================================================================

/// Why a reference token could not be turned into a module id
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceError {
    #[error("{reason}")]
    Malformed { reason: String },

    #[error("climbs {above} level(s) above the project root")]
    EscapesRoot { above: usize },
}

impl ReferenceError {
    fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Reference
// =============================================================================

/// How a reference path is anchored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceKind {
    /// No leading separator
    Absolute,
    /// `levels` leading separators (1 = sibling)
    Relative { levels: usize },
}

/// A syntactically valid reference token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlueprintReference {
    /// Token as written, including the marker
    pub token: String,
    pub kind: ReferenceKind,
    /// Path segments after the leading separators
    pub path: Vec<String>,
    /// Symbols listed in the optional bracket suffix
    pub symbols: Vec<String>,
}

impl BlueprintReference {
    /// Parse one `@...` token
    pub fn parse(token: &str) -> Result<Self, ReferenceError> {
        let body = token
            .strip_prefix('@')
            .ok_or_else(|| ReferenceError::malformed("reference must start with '@'"))?;

        let (path_part, symbols) = match body.find('[') {
            Some(open) => {
                let Some(inner) = body[open + 1..].strip_suffix(']') else {
                    return Err(ReferenceError::malformed(
                        "symbol list must be closed with ']' at the end of the reference",
                    ));
                };
                (&body[..open], parse_symbols(inner)?)
            }
            None if body.contains(']') => {
                return Err(ReferenceError::malformed("unexpected ']' without '['"));
            }
            None => (body, Vec::new()),
        };

        let (levels, dotted) = if path_part.starts_with("./") || path_part.starts_with("../") {
            split_slash_form(path_part)
        } else {
            let levels = path_part.chars().take_while(|c| *c == '.').count();
            (levels, path_part[levels..].to_string())
        };

        if dotted.is_empty() {
            return Err(ReferenceError::malformed("empty module path"));
        }

        let mut path = Vec::new();
        for segment in dotted.split('.') {
            if segment.is_empty() {
                return Err(ReferenceError::malformed("empty path segment"));
            }
            if !is_valid_segment(segment) {
                return Err(ReferenceError::malformed(format!(
                    "invalid path segment '{}'",
                    segment
                )));
            }
            path.push(segment.to_string());
        }

        let kind = match levels {
            0 => ReferenceKind::Absolute,
            n => ReferenceKind::Relative { levels: n },
        };

        Ok(Self {
            token: token.to_string(),
            kind,
            path,
            symbols,
        })
    }

    /// Resolve against `package`, the directory segments of the blueprint
    /// that wrote the reference
    pub fn resolve<S: AsRef<str>>(&self, package: &[S]) -> Result<ModuleId, ReferenceError> {
        let mut segments: Vec<String> = match self.kind {
            ReferenceKind::Absolute => Vec::new(),
            ReferenceKind::Relative { levels } => {
                let mut base: Vec<String> = package.iter().map(|s| s.as_ref().to_string()).collect();
                let up = levels - 1;
                if up > base.len() {
                    return Err(ReferenceError::EscapesRoot {
                        above: up - base.len(),
                    });
                }
                base.truncate(base.len() - up);
                base
            }
        };
        segments.extend(self.path.iter().cloned());

        ModuleId::from_segments(&segments)
            .ok_or_else(|| ReferenceError::malformed("resolved path is not a valid module id"))
    }
}

/// `./a/b` -> (1, "a.b"), `../../a` -> (3, "a")
fn split_slash_form(path: &str) -> (usize, String) {
    let mut levels = 1;
    let mut rest = path;
    loop {
        if let Some(r) = rest.strip_prefix("./") {
            rest = r;
        } else if let Some(r) = rest.strip_prefix("../") {
            levels += 1;
            rest = r;
        } else {
            break;
        }
    }
    let rest = rest.strip_suffix(".md").unwrap_or(rest);
    (levels, rest.replace('/', "."))
}

fn parse_symbols(inner: &str) -> Result<Vec<String>, ReferenceError> {
    let mut symbols = Vec::new();
    for raw in inner.split(',') {
        let symbol = raw.trim();
        if symbol.is_empty() {
            continue;
        }
        let valid = symbol
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false)
            && symbol.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(ReferenceError::malformed(format!("invalid symbol name '{}'", symbol)));
        }
        symbols.push(symbol.to_string());
    }
    Ok(symbols)
}

// =============================================================================
// Scanning
// =============================================================================

/// A reference that resolved to a module id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedReference {
    pub reference: BlueprintReference,
    pub target: ModuleId,
}

/// One reference token and its outcome
#[derive(Debug, Clone)]
pub struct ReferenceEntry {
    pub token: String,
    /// 1-based line in the blueprint
    pub line: usize,
    pub resolution: Result<ResolvedReference, ReferenceError>,
}

/// Everything the dependency declarations of one blueprint contain
#[derive(Debug, Clone, Default)]
pub struct ReferenceScan {
    /// Reference tokens in source order
    pub entries: Vec<ReferenceEntry>,
    /// Declaration entries without a marker
    pub external_dependencies: Vec<String>,
}

impl ReferenceScan {
    pub fn resolved(&self) -> impl Iterator<Item = &ResolvedReference> {
        self.entries.iter().filter_map(|e| e.resolution.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&ReferenceEntry, &ReferenceError)> {
        self.entries
            .iter()
            .filter_map(|e| e.resolution.as_ref().err().map(|err| (e, err)))
    }

    pub fn tokens(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.token.clone()).collect()
    }
}

/// Collect and resolve every reference in `text`'s dependency declarations.
///
/// Relative references resolve against `package`, the blueprint's directory.
/// Never fails: each token carries its own outcome so the caller can report
/// every problem in one pass.
pub fn scan_references<S: AsRef<str>>(package: &[S], text: &str) -> ReferenceScan {
    let mut scan = ReferenceScan::default();

    for (line, content) in declaration_lines(text) {
        for piece in split_outside_brackets(&content) {
            let tokens = reference_tokens(&piece);
            if tokens.is_empty() {
                if let Some(name) = external_name(&piece) {
                    scan.external_dependencies.push(name);
                }
                continue;
            }
            for token in tokens {
                let resolution = BlueprintReference::parse(&token).and_then(|reference| {
                    let target = reference.resolve(package)?;
                    Ok(ResolvedReference { reference, target })
                });
                scan.entries.push(ReferenceEntry {
                    token,
                    line,
                    resolution,
                });
            }
        }
    }

    scan
}

/// `(line number, declaration text)` for every dependency declaration line.
///
/// `deps: @a; @b` is complete on its own line. A bare `deps:` line or a
/// `## Dependencies` heading opens a bullet section, which ends at the next
/// heading, at a non-bullet line, or at a blank line once it has items.
fn declaration_lines(text: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut in_section = false;
    let mut section_items = 0usize;
    let mut in_fence = false;

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;

        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            in_section = false;
            continue;
        }
        if in_fence {
            continue;
        }

        if let Some(caps) = INLINE_DECLARATION.captures(line) {
            let rest = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
            in_section = rest.is_empty();
            section_items = 0;
            if !rest.is_empty() {
                out.push((line_no, rest.to_string()));
            }
            continue;
        }
        if HEADING_DECLARATION.is_match(line) {
            in_section = true;
            section_items = 0;
            continue;
        }
        if !in_section {
            continue;
        }

        if line.trim().is_empty() {
            in_section = section_items == 0;
            continue;
        }
        if HEADING.is_match(line) {
            in_section = false;
            continue;
        }
        if let Some(caps) = BULLET.captures(line) {
            let item = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
            if !item.is_empty() {
                out.push((line_no, item.to_string()));
                section_items += 1;
            }
            continue;
        }
        if section_items > 0 && line.starts_with(char::is_whitespace) {
            out.push((line_no, line.trim().to_string()));
            continue;
        }
        in_section = false;
    }

    out
}

/// Split on `;` and `,` unless inside `[...]`
fn split_outside_brackets(content: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;

    for c in content.chars() {
        match c {
            '[' => {
                depth += 1;
                current.push(c);
            }
            ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ';' | ',' if depth == 0 => {
                pieces.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    pieces.push(current);

    pieces
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Every `@` token in a piece. A marker counts at the start of the piece or
/// after whitespace or `(`; a token runs to whitespace or `)` outside brackets.
fn reference_tokens(piece: &str) -> Vec<String> {
    let chars: Vec<char> = piece.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let starts_token =
            chars[i] == '@' && (i == 0 || chars[i - 1].is_whitespace() || chars[i - 1] == '(');
        if !starts_token {
            i += 1;
            continue;
        }

        let mut token = String::new();
        let mut depth = 0usize;
        while i < chars.len() {
            let c = chars[i];
            if depth == 0 && (c.is_whitespace() || c == ')') {
                break;
            }
            match c {
                '[' => depth += 1,
                ']' => depth = depth.saturating_sub(1),
                _ => {}
            }
            token.push(c);
            i += 1;
        }
        tokens.push(token);
    }

    tokens
}

fn external_name(piece: &str) -> Option<String> {
    let word = piece.split_whitespace().next()?.trim_matches('`');
    if word.is_empty() || word.starts_with('#') {
        return None;
    }
    match word.to_ascii_lowercase().as_str() {
        "none" | "n/a" | "-" => None,
        _ => Some(word.to_string()),
    }
}
