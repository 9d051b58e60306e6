//! Greedy bin-packing of statements into chunks.

use serde::Serialize;
use std::fmt;

use crate::sql::Statement;

use super::DEFAULT_SESSION_HEADER;

/// Separator written after every statement in a chunk body.
const STATEMENT_SEPARATOR: &str = "\n";

/// One self-contained payload for the remote runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// Zero-based position of the chunk in its plan.
    pub index: usize,
    /// Statements in execution order; never empty.
    pub statements: Vec<Statement>,
    /// Header followed by every statement and its separator.
    pub text: String,
    /// UTF-8 byte length of `text`.
    pub size_bytes: usize,
}

impl Chunk {
    fn build(index: usize, header: &str, statements: Vec<Statement>) -> Self {
        let mut text = String::from(header);
        for statement in &statements {
            text.push_str(statement.as_str());
            text.push_str(STATEMENT_SEPARATOR);
        }
        let size_bytes = text.len();
        Self {
            index,
            statements,
            text,
            size_bytes,
        }
    }
}

/// A statement that cannot fit in any chunk, even alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OversizeStatement {
    /// Zero-based position in the preprocessed statement list.
    pub index: usize,
    /// Size of header plus this statement alone.
    pub size_bytes: usize,
    /// The budget it was measured against.
    pub max_bytes: usize,
    pub statement: Statement,
}

impl fmt::Display for OversizeStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "statement {} is {} bytes with header, over the {} byte chunk limit",
            self.index + 1,
            self.size_bytes,
            self.max_bytes
        )
    }
}

impl std::error::Error for OversizeStatement {}

/// Packs statements using the default session header.
pub fn pack(statements: &[Statement], max_bytes: usize) -> Result<Vec<Chunk>, OversizeStatement> {
    pack_with_header(statements, DEFAULT_SESSION_HEADER, max_bytes)
}

/// Packs statements into chunks of at most `max_bytes`, header included.
///
/// Fails on the first statement that does not fit alone; no partial plan
/// is returned.
pub fn pack_with_header(
    statements: &[Statement],
    header: &str,
    max_bytes: usize,
) -> Result<Vec<Chunk>, OversizeStatement> {
    let mut chunks = Vec::new();
    let mut body: Vec<Statement> = Vec::new();
    let mut body_bytes = 0;

    for (index, statement) in statements.iter().enumerate() {
        let statement_bytes = statement.byte_len() + STATEMENT_SEPARATOR.len();

        if header.len() + body_bytes + statement_bytes <= max_bytes {
            body.push(statement.clone());
            body_bytes += statement_bytes;
            continue;
        }

        let alone = header.len() + statement_bytes;
        if alone > max_bytes {
            return Err(OversizeStatement {
                index,
                size_bytes: alone,
                max_bytes,
                statement: statement.clone(),
            });
        }

        let full = std::mem::replace(&mut body, vec![statement.clone()]);
        chunks.push(Chunk::build(chunks.len(), header, full));
        body_bytes = statement_bytes;
    }

    if !body.is_empty() {
        chunks.push(Chunk::build(chunks.len(), header, body));
    }

    Ok(chunks)
}
