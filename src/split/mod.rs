//! Chunk packing.
//!
//! Greedily packs validated statements into ordered chunks that each fit
//! the remote runner's payload budget, every chunk prefixed with the
//! session header.

mod packer;

pub use packer::{pack, pack_with_header, Chunk, OversizeStatement};

use crate::safety::{SqlValidator, Violation};
use crate::sql::{preprocess, scan, Statement};
use serde::Serialize;
use std::fmt;

/// Header prepended to every chunk.
pub const DEFAULT_SESSION_HEADER: &str = "SET DEFINE OFF;\n";

/// Default payload budget per chunk (90 KiB).
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 90 * 1024;

/// Why a script could not be turned into a chunk plan.
///
/// All of these are raised before any network activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitError {
    /// Nothing left to execute after preprocessing.
    Empty,
    /// A statement failed safety validation.
    Unsafe(Violation),
    /// A single statement does not fit in a chunk on its own.
    Oversize(OversizeStatement),
}

impl SplitError {
    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Empty => "Empty Script",
            Self::Unsafe(_) => "Unsafe Statement",
            Self::Oversize(_) => "Oversize Statement",
        }
    }
}

impl fmt::Display for SplitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "script contains no executable statements"),
            Self::Unsafe(violation) => write!(f, "{violation}"),
            Self::Oversize(oversize) => write!(f, "{oversize}"),
        }
    }
}

impl std::error::Error for SplitError {}

/// The ordered chunks produced for one script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkPlan {
    pub chunks: Vec<Chunk>,
    pub max_bytes: usize,
}

impl ChunkPlan {
    /// Number of chunks in the plan.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total number of statements across all chunks.
    pub fn statement_count(&self) -> usize {
        self.chunks.iter().map(|c| c.statements.len()).sum()
    }

    /// All statements in execution order.
    pub fn statements(&self) -> impl Iterator<Item = &Statement> {
        self.chunks.iter().flat_map(|c| c.statements.iter())
    }
}

/// Scans, preprocesses, and validates a script without packing it.
pub fn prepare(sql: &str) -> Result<Vec<Statement>, SplitError> {
    let statements = preprocess(scan(sql));
    if statements.is_empty() {
        return Err(SplitError::Empty);
    }
    SqlValidator::new()
        .validate(&statements)
        .map_err(SplitError::Unsafe)?;
    Ok(statements)
}

/// Runs the full pure pipeline: scan, preprocess, validate, pack.
pub fn plan(sql: &str, header: &str, max_bytes: usize) -> Result<ChunkPlan, SplitError> {
    let statements = prepare(sql)?;
    let chunks = pack_with_header(&statements, header, max_bytes).map_err(SplitError::Oversize)?;
    Ok(ChunkPlan { chunks, max_bytes })
}
