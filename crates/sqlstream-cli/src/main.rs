//! sqlstream - run SQL scripts with incremental result streaming

mod logging;
mod output;

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use sqlstream_connection::{
    AdapterConnectionFactory, ConnectionPool, PoolConfig, ReconnectionManager,
};
use sqlstream_core::{ConnectionConfig, Dialect, EngineConfig, EngineError};
use sqlstream_drivers::AdapterRegistry;
use sqlstream_query::{
    ExecutionCoordinator, ExecutionEvent, ExecutionMode, FixedAnswer, split_batches,
};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::logging::LoggingConfig;
use crate::output::{EventPrinter, Line, OutputFormat};

/// How long to keep printing events after the engine has shut down
const PRINTER_DRAIN: Duration = Duration::from_secs(2);

/// sqlstream - run SQL with incremental result streaming
#[derive(Parser, Debug)]
#[command(name = "sqlstream", version)]
#[command(about = "Run SQL scripts against a database, streaming results as they arrive", long_about = None)]
struct Args {
    /// SQLite database file, or ":memory:" for a private in-memory database
    #[arg(short, long, env = "SQLSTREAM_DATABASE", default_value = ":memory:")]
    database: String,

    /// TOML connection definition for a server backend (overrides --database)
    #[arg(long, env = "SQLSTREAM_CONNECTION")]
    connection: Option<PathBuf>,

    /// SQL file to run; stdin is read when neither --file nor --sql is given
    #[arg(short, long, conflicts_with = "sql")]
    file: Option<PathBuf>,

    /// SQL text to run
    #[arg(short = 'e', long)]
    sql: Option<String>,

    #[arg(short, long, value_enum, default_value_t = Mode::Query)]
    mode: Mode,

    /// Print the statements the input splits into and exit
    #[arg(long)]
    split_only: bool,

    /// Dialect used by --split-only (defaults to the connection's)
    #[arg(long, value_parser = parse_dialect)]
    dialect: Option<Dialect>,

    /// Engine config file (defaults to <config dir>/sqlstream/engine.toml)
    #[arg(long, env = "SQLSTREAM_CONFIG")]
    config: Option<PathBuf>,

    /// Rows fetched per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Pool size
    #[arg(long)]
    max_connections: Option<usize>,

    /// Ask before streaming results estimated above this many rows
    #[arg(long)]
    large_threshold: Option<u64>,

    /// Stream results above --large-threshold without asking
    #[arg(long)]
    confirm_large: bool,

    /// Rows printed per result set
    #[arg(long, default_value_t = 50)]
    max_rows: u64,

    /// Print every event as a JSON line instead of text
    #[arg(long)]
    json: bool,

    /// Reconnect and run the batch again once when the connection is lost
    #[arg(long)]
    reconnect: bool,

    /// More logging (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Also write JSON logs to a daily file
    #[arg(long)]
    log_json: bool,

    /// Directory for JSON log files
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Independent statements; SELECTs stream side by side
    Query,
    /// One connection, strictly in order
    Script,
}

impl From<Mode> for ExecutionMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Query => ExecutionMode::Query,
            Mode::Script => ExecutionMode::Script,
        }
    }
}

fn parse_dialect(s: &str) -> std::result::Result<Dialect, String> {
    s.parse().map_err(|e: EngineError| e.to_string())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let mut logging_config = LoggingConfig::for_verbosity(args.verbose).with_json_logs(args.log_json);
    if let Some(dir) = &args.log_dir {
        logging_config = logging_config.with_log_dir(dir.clone());
    }
    let _log_guard = logging::init(logging_config)?;

    let sql = read_input(&args)?;
    let connection = connection_config(&args)?;

    if args.split_only {
        print_statements(&sql, args.dialect.unwrap_or(connection.dialect));
        return Ok(ExitCode::SUCCESS);
    }

    let config = engine_config(&args)?;
    run(&args, &sql, connection, config).await
}

fn read_input(args: &Args) -> Result<String> {
    if let Some(sql) = &args.sql {
        return Ok(sql.clone());
    }
    if let Some(path) = &args.file {
        return std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()));
    }
    let mut sql = String::new();
    std::io::stdin()
        .read_to_string(&mut sql)
        .context("Failed to read SQL from stdin")?;
    Ok(sql)
}

fn connection_config(args: &Args) -> Result<ConnectionConfig> {
    match &args.connection {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            toml::from_str(&text)
                .with_context(|| format!("Invalid connection definition in {}", path.display()))
        }
        None => Ok(ConnectionConfig::new_sqlite(&args.database)),
    }
}

fn engine_config(args: &Args) -> Result<EngineConfig> {
    let path = match &args.config {
        Some(path) => path.clone(),
        None => EngineConfig::default_path()?,
    };
    let mut config = EngineConfig::load_or_default(&path)
        .with_context(|| format!("Failed to load engine config from {}", path.display()))?;

    if let Some(batch_size) = args.batch_size {
        config = config.with_batch_size(batch_size);
    }
    if let Some(max_connections) = args.max_connections {
        config = config.with_max_connections(max_connections);
    }
    if let Some(threshold) = args.large_threshold {
        config = config.with_large_dataset_threshold(threshold);
    }
    config.validate()?;
    Ok(config)
}

fn print_statements(sql: &str, dialect: Dialect) {
    let batches = split_batches(sql, dialect);
    for (position, batch) in batches.iter().enumerate() {
        for statement in &batch.statements {
            println!(
                "-- lines {}-{}{}",
                statement.line_start,
                statement.line_end,
                if statement.is_select { " (select)" } else { "" }
            );
            println!("{};", statement.text);
        }
        if dialect == Dialect::SqlServer && position + 1 < batches.len() {
            println!("GO");
        }
    }
}

async fn run(
    args: &Args,
    sql: &str,
    connection: ConnectionConfig,
    config: EngineConfig,
) -> Result<ExitCode> {
    let registry = AdapterRegistry::with_defaults();
    let adapter = registry.for_config(&connection)?;
    let factory = AdapterConnectionFactory::new(adapter.clone(), connection.clone());
    let pool = ConnectionPool::new(PoolConfig::from_engine(&config), factory);
    let reconnector = Arc::new(ReconnectionManager::for_pool(&pool, adapter.clone()));

    let (coordinator, events) =
        ExecutionCoordinator::new(pool.clone(), adapter, reconnector, connection, config);
    let mut coordinator = coordinator.with_gate(Arc::new(FixedAnswer(args.confirm_large)));

    let format = if args.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };
    let printer = tokio::spawn(print_events(events, EventPrinter::new(format, args.max_rows)));

    let cancel = coordinator.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("cancelling...");
            cancel.cancel();
        }
    });

    let mut summary = coordinator.execute(sql, args.mode.into()).await?;
    if summary.connection_lost() && args.reconnect {
        tracing::warn!("connection lost, reconnecting");
        if let Some(rerun) = coordinator.reconnect(true).await?.summary {
            summary = rerun;
        }
    }
    coordinator.wait_for_streams().await;

    interrupt.abort();
    coordinator.shutdown().await;
    pool.close_all().await;

    // The channel closes once every stream and task holding a sender is gone
    if tokio::time::timeout(PRINTER_DRAIN, printer).await.is_err() {
        tracing::debug!("event printer still running at exit");
    }

    if !args.json {
        println!("{}", output::summary_table(&summary));
        eprintln!("{}", summary);
    }
    Ok(if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn print_events(mut events: UnboundedReceiver<ExecutionEvent>, mut printer: EventPrinter) {
    while let Some(event) = events.recv().await {
        match printer.render(&event) {
            Ok(lines) => {
                for line in lines {
                    match line {
                        Line::Data(text) => println!("{}", text),
                        Line::Progress(text) => eprintln!("{}", text),
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to render event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_to_query_mode_on_memory_database() {
        let args = Args::try_parse_from(["sqlstream", "-e", "SELECT 1"]).unwrap();
        assert_eq!(args.database, ":memory:");
        assert_eq!(ExecutionMode::from(args.mode), ExecutionMode::Query);
        assert_eq!(read_input(&args).unwrap(), "SELECT 1");
        assert_eq!(connection_config(&args).unwrap().dialect, Dialect::Sqlite);
    }

    #[test]
    fn test_file_and_sql_conflict() {
        let result = Args::try_parse_from(["sqlstream", "-e", "SELECT 1", "-f", "x.sql"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_flags_override_engine_config() {
        let dir = std::env::temp_dir().join("sqlstream-cli-test-missing-config");
        let config_path = dir.join("engine.toml");
        let args = Args::try_parse_from([
            "sqlstream",
            "-e",
            "SELECT 1",
            "--mode",
            "script",
            "--batch-size",
            "10",
            "--large-threshold",
            "500",
            "--config",
            config_path.to_str().unwrap(),
        ])
        .unwrap();

        let config = engine_config(&args).unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.large_dataset_threshold, Some(500));
        assert_eq!(ExecutionMode::from(args.mode), ExecutionMode::Script);
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let args = Args::try_parse_from([
            "sqlstream",
            "-e",
            "SELECT 1",
            "--batch-size",
            "0",
            "--config",
            "/nonexistent/sqlstream/engine.toml",
        ])
        .unwrap();
        assert!(engine_config(&args).is_err());
    }

    #[test]
    fn test_dialect_flag_parses_aliases() {
        let args =
            Args::try_parse_from(["sqlstream", "--split-only", "--dialect", "mssql", "-e", "GO"])
                .unwrap();
        assert_eq!(args.dialect, Some(Dialect::SqlServer));
        assert!(
            Args::try_parse_from(["sqlstream", "--dialect", "oracle", "-e", "SELECT 1"]).is_err()
        );
    }
}
