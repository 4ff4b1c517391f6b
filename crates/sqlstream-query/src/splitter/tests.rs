//! Tests for statement splitting

use pretty_assertions::assert_eq;
use sqlstream_core::Dialect;

use super::*;

fn texts(sql: &str, dialect: Dialect) -> Vec<String> {
    split_statements(sql, dialect)
        .into_iter()
        .map(|s| s.text)
        .collect()
}

// =============================================================================
// Semicolon splitting
// =============================================================================

#[test]
fn test_two_statements_on_one_line() {
    let statements = split_statements("SELECT 1; SELECT 2", Dialect::Sqlite);

    assert_eq!(statements.len(), 2);
    assert_eq!(statements[0].text, "SELECT 1");
    assert_eq!(statements[1].text, "SELECT 2");
    for statement in &statements {
        assert_eq!((statement.line_start, statement.line_end), (1, 1));
        assert!(statement.is_select);
    }
}

#[test]
fn test_line_ranges_span_multiline_statements() {
    let sql = "CREATE TABLE t (\n  id INTEGER\n);\n\nINSERT INTO t VALUES (1);\nSELECT *\nFROM t;\n";
    let statements = split_statements(sql, Dialect::Sqlite);

    let ranges: Vec<(usize, usize)> = statements
        .iter()
        .map(|s| (s.line_start, s.line_end))
        .collect();
    assert_eq!(ranges, vec![(1, 3), (5, 5), (6, 7)]);
}

#[test]
fn test_semicolons_in_literals_and_comments_do_not_split() {
    let sql = "SELECT 'a;b' AS x; -- trailing; comment\nSELECT \"c;d\" /* ; */ FROM t";
    assert_eq!(
        texts(sql, Dialect::PostgreSql),
        vec!["SELECT 'a;b' AS x", "SELECT \"c;d\" /* ; */ FROM t"]
    );
}

#[test]
fn test_comment_only_and_empty_fragments_are_dropped() {
    let sql = ";;\n-- nothing here\n;\n/* or here */;SELECT 1;;";
    assert_eq!(texts(sql, Dialect::Sqlite), vec!["SELECT 1"]);
    assert!(split_statements("  \n-- only a comment\n", Dialect::Sqlite).is_empty());
    assert!(split_statements("", Dialect::MySql).is_empty());
}

#[test]
fn test_leading_comment_is_not_part_of_statement() {
    let sql = "-- count the rows\nSELECT COUNT(*) FROM t";
    let statements = split_statements(sql, Dialect::Sqlite);

    assert_eq!(statements[0].text, "SELECT COUNT(*) FROM t");
    assert_eq!(statements[0].line_start, 2);
    assert!(statements[0].is_select);
}

#[test]
fn test_dialect_specific_quoting() {
    let mysql = "SELECT `a;b` FROM t # note; here\n; SELECT 'it\\'s;'";
    assert_eq!(
        texts(mysql, Dialect::MySql),
        vec!["SELECT `a;b` FROM t", "SELECT 'it\\'s;'"]
    );

    let tsql = "SELECT [a;b] FROM t; SELECT 2";
    assert_eq!(texts(tsql, Dialect::SqlServer), vec!["SELECT [a;b] FROM t", "SELECT 2"]);

    let pg = "CREATE FUNCTION f() RETURNS int AS $$ SELECT 1; $$ LANGUAGE sql; SELECT f()";
    assert_eq!(
        texts(pg, Dialect::PostgreSql),
        vec![
            "CREATE FUNCTION f() RETURNS int AS $$ SELECT 1; $$ LANGUAGE sql",
            "SELECT f()"
        ]
    );
}

// =============================================================================
// Routine bodies
// =============================================================================

#[test]
fn test_sqlite_trigger_body_stays_whole() {
    let sql = "CREATE TRIGGER audit AFTER INSERT ON t\nBEGIN\n  INSERT INTO log VALUES (new.id);\n  UPDATE stats SET n = CASE WHEN n IS NULL THEN 1 ELSE n + 1 END;\nEND;\nSELECT 1;";
    let statements = split_statements(sql, Dialect::Sqlite);

    assert_eq!(statements.len(), 2);
    assert!(statements[0].text.starts_with("CREATE TRIGGER audit"));
    assert!(statements[0].text.ends_with("END"));
    assert_eq!((statements[0].line_start, statements[0].line_end), (1, 5));
    assert!(!statements[0].is_select);
    assert_eq!(statements[1].text, "SELECT 1");
}

#[test]
fn test_mysql_procedure_with_if_blocks() {
    let sql = "CREATE DEFINER = admin@localhost PROCEDURE p()\nBEGIN\n  IF 1 THEN\n    SELECT 1;\n  END IF;\n  SELECT 2;\nEND;\nCALL p();";
    let statements = split_statements(sql, Dialect::MySql);

    assert_eq!(statements.len(), 2);
    assert_eq!(statements[0].line_end, 7);
    assert_eq!(statements[1].text, "CALL p()");
}

#[test]
fn test_create_table_named_like_a_routine_is_split_normally() {
    let sql = "CREATE TABLE proc (id INT); CREATE TABLE trigger_log (id INT)";
    assert_eq!(split_statements(sql, Dialect::MySql).len(), 2);
}

#[test]
fn test_bare_begin_is_a_transaction() {
    let sql = "BEGIN; INSERT INTO t VALUES (1); COMMIT;";
    assert_eq!(
        texts(sql, Dialect::Sqlite),
        vec!["BEGIN", "INSERT INTO t VALUES (1)", "COMMIT"]
    );
}

// =============================================================================
// T-SQL batches
// =============================================================================

#[test]
fn test_go_separates_batches() {
    let sql = "PRINT 'a'\nGO\nSELECT 1\nGO";
    let batches = split_batches(sql, Dialect::SqlServer);

    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].statements[0].text, "PRINT 'a'");
    assert_eq!((batches[0].line_start, batches[0].line_end), (1, 1));
    assert!(!batches[0].statements[0].is_select);
    assert_eq!(batches[1].index, 1);
    assert_eq!(batches[1].statements[0].text, "SELECT 1");
    assert_eq!(batches[1].statements[0].line_start, 3);
    assert_eq!(batches[1].statements[0].batch, 1);
    assert!(batches[1].statements[0].is_select);
}

#[test]
fn test_go_is_case_insensitive_and_trimmed() {
    let sql = "SELECT 1\n  go  \nSELECT 2\nGo\n\nGO\nSELECT 3";
    let batches = split_batches(sql, Dialect::SqlServer);

    assert_eq!(batches.len(), 3);
    assert_eq!(batches[2].statements[0].line_start, 7);
}

#[test]
fn test_go_is_only_special_for_tsql() {
    let statements = split_statements("SELECT 1\nGO\nSELECT 2", Dialect::PostgreSql);
    assert_eq!(statements.len(), 1);
    assert_eq!(statements[0].line_end, 3);
}

#[test]
fn test_tsql_procedure_runs_to_end_of_batch() {
    let sql = "CREATE PROCEDURE dbo.p AS\n  SELECT 1;\n  SELECT 2;\nGO\nEXEC dbo.p;";
    let batches = split_batches(sql, Dialect::SqlServer);

    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].statements.len(), 1);
    assert_eq!(batches[0].statements[0].line_end, 3);
    assert!(batches[1].statements[0].is_select);
}

#[test]
fn test_tsql_begin_end_block_is_not_split() {
    let sql = "IF 1 = 1\nBEGIN\n  SELECT 1;\n  SELECT 2;\nEND;\nBEGIN TRAN; SELECT 3; COMMIT;";
    assert_eq!(
        texts(sql, Dialect::SqlServer),
        vec![
            "IF 1 = 1\nBEGIN\n  SELECT 1;\n  SELECT 2;\nEND",
            "BEGIN TRAN",
            "SELECT 3",
            "COMMIT"
        ]
    );
}

// =============================================================================
// Classification
// =============================================================================

#[test]
fn test_select_classification() {
    for sql in [
        "select 1",
        "WITH x AS (SELECT 1) SELECT * FROM x",
        "EXEC sp_who",
        "SHOW TABLES",
        "DESCRIBE t",
        "EXPLAIN SELECT 1",
        "PRAGMA table_info(t)",
        "VALUES (1), (2)",
        "(SELECT 1) UNION (SELECT 2)",
    ] {
        assert!(is_select_statement(sql, Dialect::MySql), "{sql}");
    }
    for sql in ["INSERT INTO t VALUES (1)", "UPDATE t SET a = 1", "CREATE TABLE t (a INT)", "DELETE FROM t", ""] {
        assert!(!is_select_statement(sql, Dialect::MySql), "{sql}");
    }
}

#[test]
fn test_procedure_calls_may_return_several_sets() {
    let statements = split_statements(
        "EXEC sp_who;\nexecute dbo.report 1;\nSELECT 1;\nEXPLAIN SELECT 1",
        Dialect::SqlServer,
    );
    let several: Vec<bool> = statements.iter().map(Statement::may_return_several_sets).collect();
    assert_eq!(several, vec![true, true, false, false]);
}

#[test]
fn test_preview_shortens_long_statements() {
    let statement = split_statements("SELECT a, b, c FROM some_table\nWHERE a = 1", Dialect::Sqlite)
        .remove(0);
    assert_eq!(statement.preview(12), "SELECT a, b,...");
    assert_eq!(statement.preview(200), "SELECT a, b, c FROM some_table...");

    let short = split_statements("SELECT 1", Dialect::Sqlite).remove(0);
    assert_eq!(short.preview(20), "SELECT 1");
}

// =============================================================================
// Idempotence
// =============================================================================

#[test]
fn test_joining_and_resplitting_is_stable() {
    let cases = [
        (
            "SELECT 'x;y';\n-- note\nINSERT INTO t VALUES (1); /* c */ UPDATE t SET a = 2",
            Dialect::Sqlite,
        ),
        (
            "CREATE TRIGGER tr AFTER INSERT ON t BEGIN SELECT 1; END; SELECT 2",
            Dialect::Sqlite,
        ),
        ("SELECT `a` FROM t; DELETE FROM t WHERE b = 'c\\';'", Dialect::MySql),
        ("SELECT $q$;$q$; SELECT E'\\';'", Dialect::PostgreSql),
        ("SELECT [x;] FROM t\nGO\nUPDATE t SET a = 1; SELECT 2", Dialect::SqlServer),
    ];

    for (sql, dialect) in cases {
        let first = texts(sql, dialect);
        let joined = first.join(";\n");
        assert_eq!(texts(&joined, dialect), first, "{sql}");
    }
}
