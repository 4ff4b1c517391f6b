//! The thread that owns a rusqlite connection
//!
//! rusqlite statements borrow their connection, so an open result set cannot
//! be parked in a struct and fetched from later. Each SQLite connection
//! instead lives on its own thread. The thread keeps the current statement's
//! `Rows` on its stack and serves fetch requests from it until a command
//! arrives that ends the result set.

use std::collections::HashSet;
use std::sync::mpsc::Receiver;

use rusqlite::types::ValueRef;
use sqlstream_core::{ColumnMeta, EngineError, Result, Row, Value};
use tokio::sync::oneshot;

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

/// Result of executing one statement
#[derive(Debug)]
pub(crate) struct ExecuteOutcome {
    pub columns: Option<Vec<ColumnMeta>>,
    pub rowcount: i64,
}

pub(crate) enum Command {
    Execute {
        cursor: u64,
        sql: String,
        reply: Reply<ExecuteOutcome>,
    },
    Fetch {
        cursor: u64,
        max: usize,
        reply: Reply<Vec<Row>>,
    },
    /// The cursor was closed; drop its result set
    Release { cursor: u64 },
    Commit { reply: Reply<()> },
    Rollback { reply: Reply<()> },
    Close { reply: Reply<()> },
}

pub(crate) fn run(conn: rusqlite::Connection, commands: Receiver<Command>) {
    // Cursors whose result set was cut short by another cursor's statement
    let mut invalidated = HashSet::new();
    let mut closing = None;

    let mut pending = commands.recv().ok();
    while let Some(command) = pending.take() {
        pending = match command {
            Command::Execute { cursor, sql, reply } => {
                invalidated.remove(&cursor);
                serve_statement(&conn, &commands, &mut invalidated, cursor, &sql, reply)
            }
            Command::Fetch { cursor, reply, .. } => {
                let _ = reply.send(fetch_without_result_set(&invalidated, cursor));
                commands.recv().ok()
            }
            Command::Release { cursor } => {
                invalidated.remove(&cursor);
                commands.recv().ok()
            }
            Command::Commit { reply } => {
                let _ = reply.send(end_transaction(&conn, "COMMIT"));
                commands.recv().ok()
            }
            Command::Rollback { reply } => {
                let _ = reply.send(end_transaction(&conn, "ROLLBACK"));
                commands.recv().ok()
            }
            Command::Close { reply } => {
                closing = Some(reply);
                None
            }
        };
    }

    let result = conn.close().map_err(|(_, e)| sqlite_error(e));
    if let Err(e) = &result {
        tracing::warn!(error = %e, "failed to close SQLite connection cleanly");
    }
    if let Some(reply) = closing {
        let _ = reply.send(result);
    }
    tracing::debug!("SQLite worker stopped");
}

/// Run one statement and, if it returns rows, serve fetches until some other
/// command ends the result set. Returns that command.
fn serve_statement(
    conn: &rusqlite::Connection,
    commands: &Receiver<Command>,
    invalidated: &mut HashSet<u64>,
    owner: u64,
    sql: &str,
    reply: Reply<ExecuteOutcome>,
) -> Option<Command> {
    let mut stmt = match conn.prepare(sql) {
        Ok(stmt) => stmt,
        Err(e) => {
            let _ = reply.send(Err(sqlite_error(e)));
            return commands.recv().ok();
        }
    };

    if stmt.column_count() == 0 {
        let outcome = stmt
            .raw_execute()
            .map(|changed| ExecuteOutcome {
                columns: None,
                rowcount: changed as i64,
            })
            .map_err(sqlite_error);
        let _ = reply.send(outcome);
        return commands.recv().ok();
    }

    let columns = describe(&stmt);
    let width = columns.len();
    let _ = reply.send(Ok(ExecuteOutcome {
        columns: Some(columns),
        rowcount: -1,
    }));

    let mut rows = stmt.raw_query();
    loop {
        let command = commands.recv().ok()?;
        match command {
            Command::Fetch { cursor, max, reply } if cursor == owner => {
                let _ = reply.send(read_rows(&mut rows, width, max));
            }
            Command::Fetch { cursor, reply, .. } => {
                let _ = reply.send(fetch_without_result_set(invalidated, cursor));
            }
            Command::Commit { reply } => {
                let _ = reply.send(end_transaction(conn, "COMMIT"));
            }
            Command::Rollback { reply } => {
                let _ = reply.send(end_transaction(conn, "ROLLBACK"));
            }
            Command::Release { cursor } if cursor == owner => {
                return commands.recv().ok();
            }
            Command::Release { cursor } => {
                invalidated.remove(&cursor);
            }
            Command::Execute { cursor, sql, reply } => {
                if cursor != owner {
                    invalidated.insert(owner);
                }
                return Some(Command::Execute { cursor, sql, reply });
            }
            Command::Close { reply } => return Some(Command::Close { reply }),
        }
    }
}

fn fetch_without_result_set(invalidated: &HashSet<u64>, cursor: u64) -> Result<Vec<Row>> {
    if invalidated.contains(&cursor) {
        Err(EngineError::InvalidState(
            "result set was discarded by another statement on this connection".into(),
        ))
    } else {
        Err(EngineError::InvalidState(
            "no results: previous statement did not return rows".into(),
        ))
    }
}

fn read_rows(rows: &mut rusqlite::Rows<'_>, width: usize, max: usize) -> Result<Vec<Row>> {
    let mut batch = Vec::with_capacity(max.min(1024));
    while batch.len() < max {
        match rows.next().map_err(sqlite_error)? {
            Some(row) => {
                let values = (0..width)
                    .map(|idx| sqlite_to_value(row, idx))
                    .collect::<Result<Vec<_>>>()?;
                batch.push(Row::new(values));
            }
            None => break,
        }
    }
    Ok(batch)
}

fn describe(stmt: &rusqlite::Statement<'_>) -> Vec<ColumnMeta> {
    stmt.columns()
        .iter()
        .enumerate()
        .map(|(ordinal, column)| {
            ColumnMeta::new(column.name(), column.decl_type().unwrap_or(""), ordinal)
        })
        .collect()
}

fn end_transaction(conn: &rusqlite::Connection, verb: &str) -> Result<()> {
    // Autocommit mode means there is no open transaction to end
    if conn.is_autocommit() {
        return Ok(());
    }
    conn.execute_batch(verb).map_err(sqlite_error)
}

fn sqlite_to_value(row: &rusqlite::Row<'_>, idx: usize) -> Result<Value> {
    let value = match row.get_ref(idx).map_err(sqlite_error)? {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    };
    Ok(value)
}

pub(crate) fn sqlite_error(err: rusqlite::Error) -> EngineError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, message) => EngineError::driver_with_code(
            format!("{:?}", failure.code),
            message.clone().unwrap_or_else(|| failure.to_string()),
        ),
        // Prepare errors carry the offending SQL and offset alongside the code
        rusqlite::Error::SqlInputError { error, msg, .. } => {
            EngineError::driver_with_code(format!("{:?}", error.code), msg.clone())
        }
        _ => EngineError::driver(err.to_string()),
    }
}
