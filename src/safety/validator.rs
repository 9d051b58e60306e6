//! Keyword-based statement validation.
//!
//! Works on the scanner's code view, so keywords inside string literals,
//! quoted identifiers, or comments never trigger a violation.

use regex::Regex;

use crate::sql::{code_view, Statement};

use super::{Violation, ViolationKind};

/// Validator holding the compiled keyword patterns.
#[derive(Debug)]
pub struct SqlValidator {
    drop_keyword: Regex,
    update_start: Regex,
    delete_start: Regex,
    set_keyword: Regex,
    where_keyword: Regex,
}

impl Default for SqlValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlValidator {
    /// Creates a new validator.
    pub fn new() -> Self {
        Self {
            drop_keyword: keyword(r"\bDROP\b"),
            update_start: keyword(r"^UPDATE\b"),
            delete_start: keyword(r"^DELETE\b"),
            set_keyword: keyword(r"\bSET\b"),
            where_keyword: keyword(r"\bWHERE\b"),
        }
    }

    /// Validates statements in order and stops at the first violation.
    pub fn validate(&self, statements: &[Statement]) -> Result<(), Violation> {
        for (index, statement) in statements.iter().enumerate() {
            if let Some(kind) = self.check(statement) {
                return Err(Violation {
                    kind,
                    index,
                    statement: statement.clone(),
                });
            }
        }
        Ok(())
    }

    /// Checks a single statement.
    pub fn check(&self, statement: &Statement) -> Option<ViolationKind> {
        let view = code_view(statement.as_str());
        let code = view.trim();

        if self.drop_keyword.is_match(code) {
            return Some(ViolationKind::Destructive);
        }

        if self.update_start.is_match(code) {
            let guarded = self
                .set_keyword
                .find(code)
                .is_some_and(|set| self.where_keyword.is_match(&code[set.end()..]));
            if !guarded {
                return Some(ViolationKind::UnguardedUpdate);
            }
        }

        if self.delete_start.is_match(code) && !self.where_keyword.is_match(code) {
            return Some(ViolationKind::UnguardedDelete);
        }

        None
    }
}

fn keyword(pattern: &str) -> Regex {
    Regex::new(&format!("(?i){pattern}")).expect("valid keyword regex")
}

/// Convenience function to validate without creating a validator instance.
pub fn validate(statements: &[Statement]) -> Result<(), Violation> {
    SqlValidator::new().validate(statements)
}
