//! Structural checks
//!
//! A lexical scan per language: delimiters must balance outside strings and
//! comments, strings and block comments must terminate, and no markdown fence
//! may survive in the artifact. TS/JS regex literals are skipped like strings.
//! Python additionally requires every block opener to be followed by an
//! indented line.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{CheckKind, Finding};
use crate::language::Language;

static PY_BLOCK_OPENER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:async\s+)?(?:def|class|if|elif|else|for|while|try|except|finally|with|match|case)\b")
        .expect("valid block regex")
});

/// Run all structural checks; any finding returned is hard
pub fn check_structure(language: Language, artifact: &str) -> Vec<Finding> {
    if artifact.trim().is_empty() {
        return vec![Finding::hard(CheckKind::Structure, "artifact is empty")];
    }

    if let Some(line) = artifact
        .lines()
        .position(|l| l.trim_start().starts_with("```"))
    {
        return vec![Finding::hard(
            CheckKind::Structure,
            "artifact still contains a markdown code fence",
        )
        .at_line(line + 1)];
    }

    let scan = Scanner::new(language, artifact).run();
    if !scan.findings.is_empty() {
        return scan.findings;
    }

    if language == Language::Python {
        return check_python_blocks(artifact, &scan.line_in_literal);
    }
    Vec::new()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Code,
    LineComment,
    BlockComment { line: usize },
    Str(StrState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrState {
    quote: char,
    triple: bool,
    /// Raw strings (`r#"..."#`, Go/JS backticks) take no escapes
    escapes: bool,
    raw_hashes: usize,
    multiline: bool,
    line: usize,
}

struct ScanResult {
    findings: Vec<Finding>,
    /// Index `n` is true when line `n + 1` starts inside a string or block comment
    line_in_literal: Vec<bool>,
}

struct Scanner {
    language: Language,
    chars: Vec<char>,
}

impl Scanner {
    fn new(language: Language, text: &str) -> Self {
        Self {
            language,
            chars: text.chars().collect(),
        }
    }

    fn at(&self, i: usize) -> Option<char> {
        self.chars.get(i).copied()
    }

    fn run(&self) -> ScanResult {
        let mut state = State::Code;
        let mut stack: Vec<(char, usize)> = Vec::new();
        let mut line = 1usize;
        let mut line_in_literal = vec![false];
        let mut i = 0usize;

        while i < self.chars.len() {
            let c = self.chars[i];

            if c == '\n' {
                if let State::Str(s) = state {
                    let continued = s.escapes && i > 0 && self.chars[i - 1] == '\\';
                    if !s.multiline && !continued {
                        return self.fail(
                            format!("unterminated string literal opened with {}", s.quote),
                            s.line,
                            line_in_literal,
                        );
                    }
                }
                if state == State::LineComment {
                    state = State::Code;
                }
                line += 1;
                line_in_literal.push(matches!(state, State::Str(_) | State::BlockComment { .. }));
                i += 1;
                continue;
            }

            match state {
                State::LineComment => {}
                State::BlockComment { .. } => {
                    if c == '*' && self.at(i + 1) == Some('/') {
                        state = State::Code;
                        i += 1;
                    }
                }
                State::Str(s) => {
                    if s.escapes && c == '\\' && self.at(i + 1) != Some('\n') {
                        i += 1;
                    } else if c == s.quote && self.closes(i, &s) {
                        i += if s.triple { 2 } else { s.raw_hashes };
                        state = State::Code;
                    }
                }
                State::Code => {
                    if let Some(next) = self.enter_literal(i, line) {
                        let (new_state, skip) = next;
                        state = new_state;
                        i += skip;
                        continue;
                    }
                    match c {
                        '(' | '[' | '{' => stack.push((c, line)),
                        ')' | ']' | '}' => {
                            let expected = match c {
                                ')' => '(',
                                ']' => '[',
                                _ => '{',
                            };
                            match stack.pop() {
                                Some((open, _)) if open == expected => {}
                                Some((open, open_line)) => {
                                    return self.fail(
                                        format!(
                                            "mismatched '{}' closes '{}' opened on line {}",
                                            c, open, open_line
                                        ),
                                        line,
                                        line_in_literal,
                                    );
                                }
                                None => {
                                    return self.fail(
                                        format!("unexpected closing '{}'", c),
                                        line,
                                        line_in_literal,
                                    );
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            i += 1;
        }

        match state {
            State::Str(s) => self.fail(
                format!("unterminated string literal opened with {}", s.quote),
                s.line,
                line_in_literal,
            ),
            State::BlockComment { line } => {
                self.fail("unterminated block comment".to_string(), line, line_in_literal)
            }
            _ => match stack.last() {
                Some(&(open, open_line)) => {
                    self.fail(format!("unclosed '{}'", open), open_line, line_in_literal)
                }
                None => ScanResult {
                    findings: Vec::new(),
                    line_in_literal,
                },
            },
        }
    }

    fn fail(&self, message: String, line: usize, line_in_literal: Vec<bool>) -> ScanResult {
        ScanResult {
            findings: vec![Finding::hard(CheckKind::Structure, message).at_line(line)],
            line_in_literal,
        }
    }

    fn closes(&self, i: usize, s: &StrState) -> bool {
        if s.triple {
            return self.at(i + 1) == Some(s.quote) && self.at(i + 2) == Some(s.quote);
        }
        (1..=s.raw_hashes).all(|k| self.at(i + k) == Some('#'))
    }

    /// Comment or string starting at `i`: the new state and how many chars to skip
    fn enter_literal(&self, i: usize, line: usize) -> Option<(State, usize)> {
        let c = self.chars[i];
        let next = self.at(i + 1);
        let plain = |quote: char, multiline: bool, escapes: bool| StrState {
            quote,
            triple: false,
            escapes,
            raw_hashes: 0,
            multiline,
            line,
        };

        match self.language {
            Language::Python => match c {
                '#' => Some((State::LineComment, 1)),
                '"' | '\'' => {
                    if next == Some(c) && self.at(i + 2) == Some(c) {
                        let s = StrState {
                            triple: true,
                            ..plain(c, true, true)
                        };
                        Some((State::Str(s), 3))
                    } else {
                        Some((State::Str(plain(c, false, true)), 1))
                    }
                }
                _ => None,
            },
            lang => {
                if c == '/' && next == Some('/') {
                    return Some((State::LineComment, 2));
                }
                if c == '/' && next == Some('*') {
                    return Some((State::BlockComment { line }, 2));
                }
                if c == '/' && matches!(lang, Language::TypeScript | Language::JavaScript) {
                    return self.script_regex(i);
                }
                match (lang, c) {
                    (Language::Rust, 'r') => self.rust_raw_string(i, line),
                    (Language::Rust, '\'') => self.rust_char(i),
                    (_, '"') => Some((State::Str(plain('"', lang == Language::Rust, true)), 1)),
                    (Language::Go, '\'') => Some((State::Str(plain('\'', false, true)), 1)),
                    (Language::Go, '`') => Some((State::Str(plain('`', true, false)), 1)),
                    (Language::TypeScript | Language::JavaScript, '\'') => {
                        Some((State::Str(plain('\'', false, true)), 1))
                    }
                    (Language::TypeScript | Language::JavaScript, '`') => {
                        Some((State::Str(plain('`', true, true)), 1))
                    }
                    _ => None,
                }
            }
        }
    }

    /// `r"..."`, `r#"..."#`; plain identifiers starting with `r` fall through
    fn rust_raw_string(&self, i: usize, line: usize) -> Option<(State, usize)> {
        if i > 0 {
            let prev = self.chars[i - 1];
            if prev.is_alphanumeric() || prev == '_' {
                return None;
            }
        }
        let mut j = i + 1;
        while self.at(j) == Some('#') {
            j += 1;
        }
        if self.at(j) != Some('"') {
            return None;
        }
        let s = StrState {
            quote: '"',
            triple: false,
            escapes: false,
            raw_hashes: j - i - 1,
            multiline: true,
            line,
        };
        Some((State::Str(s), j - i + 1))
    }

    /// A `/.../flags` regex literal starting at `i`, skipped whole. Only where
    /// an operand may start; after a value `/` is division.
    fn script_regex(&self, i: usize) -> Option<(State, usize)> {
        if !self.regex_allowed_before(i) {
            return None;
        }
        let mut j = i + 1;
        let mut in_class = false;
        while let Some(c) = self.at(j) {
            match c {
                '\n' => return None,
                '\\' => j += 1,
                '[' => in_class = true,
                ']' => in_class = false,
                '/' if !in_class => return Some((State::Code, j - i + 1)),
                _ => {}
            }
            j += 1;
        }
        None
    }

    fn regex_allowed_before(&self, i: usize) -> bool {
        let mut j = i;
        while j > 0 && self.chars[j - 1].is_whitespace() {
            j -= 1;
        }
        if j == 0 {
            return true;
        }
        let prev = self.chars[j - 1];
        if "(,=:[!&|?{};+-*%<>~^".contains(prev) {
            return true;
        }
        let is_word = |c: char| c.is_alphanumeric() || c == '_' || c == '$';
        if !is_word(prev) {
            return false;
        }
        let end = j;
        while j > 0 && is_word(self.chars[j - 1]) {
            j -= 1;
        }
        let word: String = self.chars[j..end].iter().collect();
        matches!(
            word.as_str(),
            "return" | "typeof" | "case" | "do" | "else" | "in" | "of" | "new" | "delete" | "void"
                | "throw" | "yield" | "await"
        )
    }

    /// Char literals are skipped whole; a lone quote is a lifetime
    fn rust_char(&self, i: usize) -> Option<(State, usize)> {
        match (self.at(i + 1), self.at(i + 2)) {
            (Some('\\'), _) => {
                let mut j = i + 3;
                while j < self.chars.len() && j < i + 12 {
                    if self.chars[j] == '\'' {
                        return Some((State::Code, j - i + 1));
                    }
                    j += 1;
                }
                Some((State::Code, 1))
            }
            (Some(_), Some('\'')) => Some((State::Code, 3)),
            _ => Some((State::Code, 1)),
        }
    }
}

fn indent_of(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

fn check_python_blocks(artifact: &str, line_in_literal: &[bool]) -> Vec<Finding> {
    let lines: Vec<&str> = artifact.lines().collect();
    let mut findings = Vec::new();

    for (idx, raw) in lines.iter().enumerate() {
        if line_in_literal.get(idx).copied().unwrap_or(false) {
            continue;
        }
        let trimmed = raw.trim();
        let code = trimmed.split(" #").next().unwrap_or(trimmed).trim_end();
        if !code.ends_with(':') || !PY_BLOCK_OPENER.is_match(code) {
            continue;
        }

        let body = lines
            .iter()
            .enumerate()
            .skip(idx + 1)
            .find(|(_, l)| {
                let t = l.trim();
                !t.is_empty() && !t.starts_with('#')
            });

        match body {
            Some((_, next)) if indent_of(next) > indent_of(raw) => {}
            Some(_) | None => {
                findings.push(
                    Finding::hard(
                        CheckKind::Structure,
                        format!("expected an indented block after '{}'", code),
                    )
                    .at_line(idx + 1),
                );
            }
        }
    }

    findings
}
