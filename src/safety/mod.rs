//! Statement safety validation.
//!
//! Rejects destructive or unguarded statements before any chunk reaches the
//! remote job runner.

mod validator;

pub use validator::{validate, SqlValidator};

use crate::sql::Statement;
use serde::Serialize;
use std::fmt;

/// Why a statement was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Schema removal (`DROP`) anywhere in the statement.
    Destructive,
    /// `UPDATE` without a `WHERE` after its `SET` clause.
    UnguardedUpdate,
    /// `DELETE` without a `WHERE` clause.
    UnguardedDelete,
}

impl ViolationKind {
    /// Returns the user-facing reason for this kind of violation.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Destructive => "destructive operation not allowed",
            Self::UnguardedUpdate => "UPDATE requires a WHERE clause after SET",
            Self::UnguardedDelete => "DELETE requires a WHERE clause",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// The first unsafe statement found in a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// What rule was broken.
    pub kind: ViolationKind,
    /// Zero-based position in the preprocessed statement list.
    pub index: usize,
    /// The offending statement.
    pub statement: Statement,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "statement {}: {}", self.index + 1, self.kind)
    }
}

impl std::error::Error for Violation {}
