//! Integration tests for the scan, preprocess, validate, and pack pipeline.

use pretty_assertions::assert_eq;
use sqlsplit::safety::ViolationKind;
use sqlsplit::split::{self, SplitError, DEFAULT_MAX_CHUNK_BYTES, DEFAULT_SESSION_HEADER};
use sqlsplit::sql::{preprocess, scan, Statement};

fn bodies(statements: &[Statement]) -> Vec<String> {
    statements.iter().map(|s| s.as_str().to_string()).collect()
}

#[test]
fn test_guarded_update_and_delete_fit_one_chunk() {
    let plan = split::plan(
        "UPDATE t SET a=1 WHERE id=1; DELETE FROM t WHERE id=2;",
        DEFAULT_SESSION_HEADER,
        DEFAULT_MAX_CHUNK_BYTES,
    )
    .unwrap();

    assert_eq!(plan.len(), 1);
    assert_eq!(
        bodies(&plan.chunks[0].statements),
        vec![
            "UPDATE t SET a=1 WHERE id=1;".to_string(),
            "DELETE FROM t WHERE id=2;".to_string(),
        ]
    );
}

#[test]
fn test_drop_is_rejected() {
    match split::plan("DROP TABLE x;", DEFAULT_SESSION_HEADER, DEFAULT_MAX_CHUNK_BYTES) {
        Err(SplitError::Unsafe(violation)) => {
            assert_eq!(violation.kind, ViolationKind::Destructive);
            assert_eq!(violation.index, 0);
        }
        other => panic!("Expected Unsafe, got {other:?}"),
    }
}

#[test]
fn test_validation_stops_at_first_violation() {
    let sql = "INSERT INTO t VALUES (1); UPDATE t SET a = 2; DROP TABLE t;";
    match split::prepare(sql) {
        Err(SplitError::Unsafe(violation)) => {
            assert_eq!(violation.kind, ViolationKind::UnguardedUpdate);
            assert_eq!(violation.index, 1);
        }
        other => panic!("Expected Unsafe, got {other:?}"),
    }
}

#[test]
fn test_200kb_insert_is_oversize_at_90kb() {
    let sql = format!(
        "INSERT INTO blobs VALUES ('{}');",
        "a".repeat(200 * 1024)
    );
    match split::plan(&sql, DEFAULT_SESSION_HEADER, DEFAULT_MAX_CHUNK_BYTES) {
        Err(SplitError::Oversize(oversize)) => {
            assert_eq!(oversize.index, 0);
            assert_eq!(oversize.max_bytes, 90 * 1024);
            assert!(oversize.statement.as_str().starts_with("INSERT INTO blobs"));
        }
        other => panic!("Expected Oversize, got {other:?}"),
    }
}

#[test]
fn test_terminators_in_literals_and_comments_do_not_split() {
    let sql = "INSERT INTO t VALUES ('a;b', 'it''s; fine');\n\
               -- comment; not a boundary\n\
               INSERT INTO \"odd;name\" VALUES (1) /* ; */;";
    let statements = scan(sql);

    assert_eq!(statements.len(), 2);
    assert_eq!(
        statements[0].as_str(),
        "INSERT INTO t VALUES ('a;b', 'it''s; fine');"
    );
    assert!(statements[1].as_str().ends_with("/* ; */;"));
}

#[test]
fn test_plain_scripts_match_naive_split() {
    let sql = "INSERT INTO a VALUES (1);\nUPDATE a SET x = 1 WHERE y = 2;\n DELETE FROM a WHERE z = 3;";
    let naive: Vec<String> = sql
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("{s};"))
        .collect();

    assert_eq!(bodies(&scan(sql)), naive);
}

#[test]
fn test_preprocess_drops_session_noops_and_reads() {
    let sql = "set define   off;\nSELECT * FROM dual;\n;\nINSERT INTO t VALUES (1);";
    let statements = preprocess(scan(sql));
    assert_eq!(bodies(&statements), vec!["INSERT INTO t VALUES (1);".to_string()]);
}

#[test]
fn test_chunks_partition_statements_within_budget() {
    let sql: String = (0..400)
        .map(|i| format!("INSERT INTO t (id, note) VALUES ({i}, '{}');\n", "n".repeat(i % 37)))
        .collect();
    let max_bytes = 2048;

    let statements = split::prepare(&sql).unwrap();
    let plan = split::plan(&sql, DEFAULT_SESSION_HEADER, max_bytes).unwrap();

    assert!(plan.len() > 1);
    for (i, chunk) in plan.chunks.iter().enumerate() {
        assert_eq!(chunk.index, i);
        assert!(chunk.size_bytes <= max_bytes);
        assert_eq!(chunk.size_bytes, chunk.text.len());
        assert!(chunk.text.starts_with(DEFAULT_SESSION_HEADER));
        assert!(!chunk.statements.is_empty());
    }
    let packed: Vec<Statement> = plan.statements().cloned().collect();
    assert_eq!(packed, statements);
}

#[test]
fn test_script_of_only_comments_is_empty() {
    assert_eq!(
        split::prepare("-- nothing here\n/* or here */"),
        Err(SplitError::Empty)
    );
}
