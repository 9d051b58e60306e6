//! Character-level statement scanner.
//!
//! A five-state machine walks the script one character at a time. A `;` only
//! separates statements in `Normal` state, so terminators inside quoted
//! literals or comments never split a statement.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

/// Statement terminator.
pub const TERMINATOR: char = ';';

/// Lexical state of the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanState {
    #[default]
    Normal,
    InSingleQuoted,
    InDoubleQuoted,
    InLineComment,
    InBlockComment,
}

impl ScanState {
    /// Returns true while inside a single- or double-quoted literal.
    pub fn is_quoted(&self) -> bool {
        matches!(self, Self::InSingleQuoted | Self::InDoubleQuoted)
    }
}

/// What role a single character plays in the script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharClass {
    /// Ordinary SQL text outside literals and comments.
    Code,
    /// A significant statement terminator.
    Terminator,
    /// An opening or closing quote character.
    Quote,
    /// Content of a quoted literal, including doubled-quote escapes.
    Literal,
    /// Part of a line or block comment, markers included.
    Comment,
}

/// One classified character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    /// Byte offset of the character in the source text.
    pub offset: usize,
    pub ch: char,
    pub class: CharClass,
}

/// Follow-up owed to the next character after a two-character construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Carry {
    None,
    /// The `*` of an opening `/*`.
    BlockOpen,
    /// The `/` of a closing `*/`.
    BlockClose,
    /// The second quote of a doubled-quote escape.
    Escape,
}

/// Iterator that classifies every character of a SQL text.
pub struct Lexer<'a> {
    chars: Peekable<CharIndices<'a>>,
    state: ScanState,
    carry: Carry,
}

impl<'a> Lexer<'a> {
    /// Creates a lexer positioned at the start of `text`.
    pub fn new(text: &'a str) -> Self {
        Self {
            chars: text.char_indices().peekable(),
            state: ScanState::Normal,
            carry: Carry::None,
        }
    }

    /// The state the next character will be read in.
    pub fn state(&self) -> ScanState {
        self.state
    }

    fn peek_is(&mut self, expected: char) -> bool {
        self.chars.peek().map(|&(_, c)| c) == Some(expected)
    }

    fn normal(&mut self, ch: char) -> CharClass {
        match ch {
            TERMINATOR => CharClass::Terminator,
            '\'' => {
                self.state = ScanState::InSingleQuoted;
                CharClass::Quote
            }
            '"' => {
                self.state = ScanState::InDoubleQuoted;
                CharClass::Quote
            }
            '-' if self.peek_is('-') => {
                self.state = ScanState::InLineComment;
                CharClass::Comment
            }
            '/' if self.peek_is('*') => {
                self.state = ScanState::InBlockComment;
                self.carry = Carry::BlockOpen;
                CharClass::Comment
            }
            _ => CharClass::Code,
        }
    }

    fn quoted(&mut self, ch: char, quote: char) -> CharClass {
        if ch != quote {
            return CharClass::Literal;
        }
        if self.peek_is(quote) {
            self.carry = Carry::Escape;
            return CharClass::Literal;
        }
        self.state = ScanState::Normal;
        CharClass::Quote
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        let (offset, ch) = self.chars.next()?;
        let carry = std::mem::replace(&mut self.carry, Carry::None);

        let class = match (self.state, carry) {
            (ScanState::InBlockComment, Carry::BlockOpen) => CharClass::Comment,
            (ScanState::InBlockComment, Carry::BlockClose) => {
                self.state = ScanState::Normal;
                CharClass::Comment
            }
            (_, Carry::Escape) => CharClass::Literal,
            (ScanState::Normal, _) => self.normal(ch),
            (ScanState::InSingleQuoted, _) => self.quoted(ch, '\''),
            (ScanState::InDoubleQuoted, _) => self.quoted(ch, '"'),
            (ScanState::InLineComment, _) => {
                if ch == '\n' {
                    self.state = ScanState::Normal;
                    CharClass::Code
                } else {
                    CharClass::Comment
                }
            }
            (ScanState::InBlockComment, _) => {
                if ch == '*' && self.peek_is('/') {
                    self.carry = Carry::BlockClose;
                }
                CharClass::Comment
            }
        };

        Some(Token { offset, ch, class })
    }
}

/// A single terminated SQL statement.
///
/// Always trimmed and always ends with exactly one trailing `;`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Statement(String);

impl Statement {
    /// Builds a statement from an unterminated body, appending the terminator.
    ///
    /// The terminator must stay significant, so whatever the body leaves open
    /// is closed first: a line comment gets a newline, a block comment gets
    /// `*/`, and a quoted literal or identifier gets its closing quote.
    pub fn terminated(body: &str) -> Self {
        let body = body.trim();
        let mut lexer = Lexer::new(body);
        lexer.by_ref().for_each(drop);
        let mut text = String::with_capacity(body.len() + 4);
        text.push_str(body);
        match lexer.state() {
            ScanState::Normal => {}
            ScanState::InLineComment => text.push('\n'),
            ScanState::InBlockComment => text.push_str("*/"),
            ScanState::InSingleQuoted => text.push('\''),
            ScanState::InDoubleQuoted => text.push('"'),
        }
        text.push(TERMINATOR);
        Self(text)
    }

    /// The full statement text, terminator included.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The statement text without its trailing terminator.
    pub fn body(&self) -> &str {
        self.0
            .strip_suffix(TERMINATOR)
            .unwrap_or(&self.0)
            .trim_end()
    }

    /// UTF-8 byte length of the statement, terminator included.
    pub fn byte_len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Statement {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Splits a SQL script into statements.
///
/// Never fails. A trailing fragment without a terminator becomes a final
/// statement with one synthesized. A trailing fragment holding only
/// whitespace and comments is discarded.
pub fn scan(text: &str) -> Vec<Statement> {
    let mut statements = Vec::new();
    let mut start = 0;

    for token in Lexer::new(text) {
        if token.class == CharClass::Terminator {
            let end = token.offset + TERMINATOR.len_utf8();
            statements.push(Statement(text[start..end].trim().to_string()));
            start = end;
        }
    }

    let tail = &text[start..];
    if !code_view(tail).trim().is_empty() {
        statements.push(Statement::terminated(tail));
    }

    statements
}

/// Returns `text` with literal contents and comments blanked out.
///
/// Quote characters survive so literals stay visible as `'   '`; every
/// literal or comment character becomes a space. Keyword checks run on this
/// view to avoid matching inside strings or comments.
pub fn code_view(text: &str) -> String {
    Lexer::new(text)
        .map(|token| match token.class {
            CharClass::Code | CharClass::Terminator | CharClass::Quote => token.ch,
            CharClass::Literal | CharClass::Comment => ' ',
        })
        .collect()
}
