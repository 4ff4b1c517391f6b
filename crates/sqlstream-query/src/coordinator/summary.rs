//! Execution modes and batch summaries

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlstream_core::EngineError;
use uuid::Uuid;

use crate::splitter::Statement;
use crate::stream::StreamId;

/// How a batch of statements is run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Statements are independent: SELECTs get their own connections and
    /// stream in the background
    #[default]
    Query,
    /// One session cursor, strictly in order, every result drained before
    /// the next statement
    Script,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Query => f.write_str("query"),
            ExecutionMode::Script => f.write_str("script"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "query" | "independent" => Ok(ExecutionMode::Query),
            "script" | "sequential" => Ok(ExecutionMode::Script),
            other => Err(EngineError::Configuration(format!(
                "unknown execution mode: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementStatus {
    Succeeded,
    Failed,
    /// Not run because an earlier statement failed or the batch was cancelled
    Skipped,
    Cancelled,
}

/// What happened to one statement
#[derive(Debug, Clone, Serialize)]
pub struct StatementReport {
    pub index: usize,
    pub line_start: usize,
    pub line_end: usize,
    pub is_select: bool,
    pub status: StatementStatus,
    /// Summed over every update count the statement produced
    pub rows_affected: Option<u64>,
    pub result_sets: Vec<StreamId>,
    pub duration: Duration,
    pub error: Option<String>,
}

impl StatementReport {
    pub(crate) fn new(index: usize, statement: &Statement, status: StatementStatus) -> Self {
        Self {
            index,
            line_start: statement.line_start,
            line_end: statement.line_end,
            is_select: statement.is_select,
            status,
            rows_affected: None,
            result_sets: Vec::new(),
            duration: Duration::ZERO,
            error: None,
        }
    }

    pub(crate) fn add_rows_affected(&mut self, rows: u64) {
        self.rows_affected = Some(self.rows_affected.unwrap_or(0) + rows);
    }
}

/// How a batch ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchOutcome {
    Completed,
    Failed {
        statement_index: usize,
        message: String,
        connection_lost: bool,
    },
    Cancelled {
        statement_index: usize,
    },
}

/// Returned by `execute` and carried by the final `BatchFinished` event
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSummary {
    pub execution_id: Uuid,
    pub mode: ExecutionMode,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub statements: Vec<StatementReport>,
    pub outcome: BatchOutcome,
}

impl ExecutionSummary {
    pub fn is_success(&self) -> bool {
        self.outcome == BatchOutcome::Completed
    }

    pub fn connection_lost(&self) -> bool {
        matches!(
            self.outcome,
            BatchOutcome::Failed {
                connection_lost: true,
                ..
            }
        )
    }

    pub fn count(&self, status: StatementStatus) -> usize {
        self.statements
            .iter()
            .filter(|report| report.status == status)
            .count()
    }

    pub fn rows_affected(&self) -> u64 {
        self.statements
            .iter()
            .filter_map(|report| report.rows_affected)
            .sum()
    }

    pub fn result_sets(&self) -> Vec<StreamId> {
        self.statements
            .iter()
            .flat_map(|report| report.result_sets.iter().copied())
            .collect()
    }

    pub fn failed_statement(&self) -> Option<&StatementReport> {
        self.statements
            .iter()
            .find(|report| report.status == StatementStatus::Failed)
    }
}

impl fmt::Display for ExecutionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} statement(s): {} succeeded, {} failed, {} skipped in {}ms",
            self.statements.len(),
            self.count(StatementStatus::Succeeded),
            self.count(StatementStatus::Failed),
            self.count(StatementStatus::Skipped) + self.count(StatementStatus::Cancelled),
            self.duration.as_millis()
        )?;
        if let BatchOutcome::Cancelled { statement_index } = &self.outcome {
            write!(f, " (cancelled at statement {})", statement_index + 1)?;
        }
        Ok(())
    }
}
