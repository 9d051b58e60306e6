//! Statement preprocessing.
//!
//! Drops statements that carry no effect inside an execution chunk and
//! normalizes the survivors.

use regex::Regex;
use std::sync::OnceLock;

use super::scanner::{code_view, Lexer, Statement};

fn session_noop_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)^SET\s+DEFINE\s+OFF\s*;?$").expect("valid regex"))
}

fn pure_read_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?is)^SELECT\b.*\bFROM\b").expect("valid regex"))
}

/// Returns true for the session no-op directive (`SET DEFINE OFF`).
///
/// `code` is expected to be a trimmed code view; the terminator is optional.
pub fn is_session_noop(code: &str) -> bool {
    session_noop_pattern().is_match(code.trim())
}

/// Returns true for a pure read (`SELECT ... FROM ...`).
pub fn is_pure_read(code: &str) -> bool {
    pure_read_pattern().is_match(code.trim())
}

/// Filters and normalizes a statement sequence, preserving order.
pub fn preprocess(statements: Vec<Statement>) -> Vec<Statement> {
    statements.into_iter().filter_map(normalize).collect()
}

fn normalize(statement: Statement) -> Option<Statement> {
    let body = collapse_blank_lines(statement.body());
    let code = code_view(&body);
    let code = code.trim();

    if code.is_empty() || is_session_noop(code) || is_pure_read(code) {
        return None;
    }

    Some(Statement::terminated(&body))
}

/// Collapses runs of blank lines into a single blank line.
///
/// Lines that start inside a quoted literal are literal data and are kept
/// untouched.
fn collapse_blank_lines(text: &str) -> String {
    let mut starts_quoted = vec![false];
    let mut lexer = Lexer::new(text);
    while let Some(token) = lexer.next() {
        if token.ch == '\n' {
            starts_quoted.push(lexer.state().is_quoted());
        }
    }

    let mut lines = Vec::with_capacity(starts_quoted.len());
    let mut previous_blank = false;
    for (line, quoted) in text.split('\n').zip(starts_quoted) {
        let blank = !quoted && line.trim().is_empty();
        if blank && previous_blank {
            continue;
        }
        lines.push(if blank { "" } else { line });
        previous_blank = blank;
    }
    lines.join("\n")
}
