//! SQL script handling.
//!
//! Splits raw script text into discrete statements and normalizes them
//! before validation and chunking. Everything here is pure and synchronous.

mod preprocess;
mod scanner;

pub use preprocess::{is_pure_read, is_session_noop, preprocess};
pub use scanner::{code_view, scan, CharClass, Lexer, ScanState, Statement, Token};
