//! Integration tests for sqlsplit.

pub mod execution_test;
pub mod history_test;
pub mod pipeline_test;
