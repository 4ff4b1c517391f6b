//! SQLite connection and cursor handles

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::OpenFlags;
use sqlstream_core::{
    ColumnMeta, Connection, ConnectionId, Cursor, Dialect, EngineError, Result, Row,
};
use tokio::sync::oneshot;

use super::worker::{self, Command, ExecuteOutcome, Reply, sqlite_error};

/// Sending half of a connection's worker channel
#[derive(Clone)]
struct WorkerHandle {
    commands: mpsc::Sender<Command>,
    closed: Arc<AtomicBool>,
}

impl WorkerHandle {
    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Connection("connection is closed".into()));
        }
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| worker_gone())?;
        response.await.map_err(|_| worker_gone())?
    }
}

fn worker_gone() -> EngineError {
    EngineError::ConnectionLost("SQLite worker thread is no longer running".into())
}

/// SQLite connection backed by a dedicated worker thread
pub struct SqliteConnection {
    id: ConnectionId,
    path: String,
    worker: WorkerHandle,
    next_cursor: AtomicU64,
}

impl SqliteConnection {
    /// Open a SQLite database
    pub async fn open(path: &str) -> Result<Self> {
        tracing::info!(path = %path, "opening SQLite database");
        let expanded_path = expand_path(path)?;
        let id = ConnectionId::new();

        let (commands, receiver) = mpsc::channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let thread_path = expanded_path.clone();
        std::thread::Builder::new()
            .name(format!("sqlite-{}", &id.to_string()[..8]))
            .spawn(move || match open_database(&thread_path) {
                Ok(conn) => {
                    let _ = ready_tx.send(Ok(()));
                    worker::run(conn, receiver);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        ready_rx
            .await
            .map_err(|_| EngineError::Connection("SQLite worker exited while opening".into()))??;

        tracing::info!(path = %expanded_path, connection_id = %id, "SQLite database connection established");
        Ok(Self {
            id,
            path: expanded_path,
            worker: WorkerHandle {
                commands,
                closed: Arc::new(AtomicBool::new(false)),
            },
            next_cursor: AtomicU64::new(1),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

fn open_database(path: &str) -> Result<rusqlite::Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;

    let conn = if path == ":memory:" {
        rusqlite::Connection::open_in_memory().map_err(|e| {
            EngineError::Connection(format!("Failed to open in-memory database: {}", e))
        })?
    } else {
        if !path.starts_with("file:")
            && let Some(parent) = Path::new(path).parent()
            && !parent.exists()
        {
            return Err(EngineError::Connection(format!(
                "Parent directory does not exist: {}",
                parent.display()
            )));
        }
        rusqlite::Connection::open_with_flags(path, flags).map_err(|e| {
            EngineError::Connection(format!(
                "Failed to open SQLite database at '{}': {}",
                path, e
            ))
        })?
    };

    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| EngineError::Connection(format!("Failed to enable foreign keys: {}", e)))?;
    // WAL lets dedicated reader connections stream while the session writes
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| EngineError::Connection(format!("Failed to set journal mode: {}", e)))?;
    conn.busy_timeout(Duration::from_secs(5))
        .map_err(sqlite_error)?;

    Ok(conn)
}

/// Expand `~/` and make relative paths absolute
fn expand_path(path: &str) -> Result<String> {
    if path.is_empty() {
        return Ok(":memory:".to_string());
    }
    if path == ":memory:" || path.starts_with("file:") {
        return Ok(path.to_string());
    }

    let expanded = if let Some(rest) = path.strip_prefix("~/") {
        let home = std::env::var_os("HOME").ok_or_else(|| {
            EngineError::Configuration("Unable to determine HOME directory".into())
        })?;
        PathBuf::from(home).join(rest)
    } else if path.starts_with('~') {
        return Err(EngineError::Configuration(
            "User-specific home directories (~user) are not supported".into(),
        ));
    } else {
        PathBuf::from(path)
    };

    let absolute = if expanded.is_relative() {
        std::env::current_dir()?.join(expanded)
    } else {
        expanded
    };
    Ok(absolute.to_string_lossy().to_string())
}

#[async_trait]
impl Connection for SqliteConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn cursor(&self) -> Result<Box<dyn Cursor>> {
        if self.is_closed() {
            return Err(EngineError::Connection("connection is closed".into()));
        }
        let id = self.next_cursor.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(SqliteCursor {
            id,
            worker: self.worker.clone(),
            description: None,
            rowcount: -1,
            released: false,
        }))
    }

    async fn commit(&self) -> Result<()> {
        self.worker.request(|reply| Command::Commit { reply }).await
    }

    async fn rollback(&self) -> Result<()> {
        self.worker.request(|reply| Command::Rollback { reply }).await
    }

    async fn close(&self) -> Result<()> {
        if self.worker.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::debug!(connection_id = %self.id, "closing SQLite connection");
        let (reply, response) = oneshot::channel();
        if self.worker.commands.send(Command::Close { reply }).is_err() {
            return Ok(());
        }
        response.await.unwrap_or(Ok(()))
    }

    fn is_closed(&self) -> bool {
        self.worker.closed.load(Ordering::Acquire)
    }
}

/// Cursor over a SQLite connection
///
/// Only the most recently executed cursor of a connection holds an open
/// result set; executing on another cursor discards it.
pub struct SqliteCursor {
    id: u64,
    worker: WorkerHandle,
    description: Option<Vec<ColumnMeta>>,
    rowcount: i64,
    released: bool,
}

impl SqliteCursor {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            let _ = self.worker.commands.send(Command::Release { cursor: self.id });
        }
    }
}

#[async_trait]
impl Cursor for SqliteCursor {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        let cursor = self.id;
        let sql = sql.to_string();
        self.description = None;
        self.rowcount = -1;
        self.released = false;
        let ExecuteOutcome { columns, rowcount } = self
            .worker
            .request(|reply| Command::Execute { cursor, sql, reply })
            .await?;
        self.description = columns;
        self.rowcount = rowcount;
        Ok(())
    }

    async fn fetch_many(&mut self, size: usize) -> Result<Vec<Row>> {
        if self.description.is_none() {
            return Err(EngineError::InvalidState(
                "no results: previous statement did not return rows".into(),
            ));
        }
        let cursor = self.id;
        self.worker
            .request(|reply| Command::Fetch {
                cursor,
                max: size,
                reply,
            })
            .await
    }

    fn description(&self) -> Option<&[ColumnMeta]> {
        self.description.as_deref()
    }

    fn rowcount(&self) -> i64 {
        self.rowcount
    }

    async fn close(&mut self) -> Result<()> {
        self.release();
        Ok(())
    }
}

impl Drop for SqliteCursor {
    fn drop(&mut self) {
        self.release();
    }
}
