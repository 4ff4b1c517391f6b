//! Rendering of engine events for the terminal

use std::collections::HashMap;

use comfy_table::{
    Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_FULL,
};
use sqlstream_core::Row;
use sqlstream_query::{ExecutionEvent, ExecutionSummary, StatementStatus, StreamId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Tab-separated rows on stdout, progress on stderr
    Text,
    /// One JSON object per event on stdout
    Json,
}

/// A rendered line and where it goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Data(String),
    Progress(String),
}

/// Turns events into output lines, printing at most `row_limit` rows per
/// result set in text mode
pub struct EventPrinter {
    format: OutputFormat,
    row_limit: u64,
    printed: HashMap<StreamId, u64>,
}

impl EventPrinter {
    pub fn new(format: OutputFormat, row_limit: u64) -> Self {
        Self {
            format,
            row_limit,
            printed: HashMap::new(),
        }
    }

    pub fn render(&mut self, event: &ExecutionEvent) -> anyhow::Result<Vec<Line>> {
        if self.format == OutputFormat::Json {
            return Ok(vec![Line::Data(serde_json::to_string(event)?)]);
        }

        let lines = match event {
            ExecutionEvent::ResultSetOpened {
                stream_id, columns, ..
            } => {
                self.printed.insert(*stream_id, 0);
                let header = columns
                    .iter()
                    .map(|column| column.name.as_str())
                    .collect::<Vec<_>>()
                    .join("\t");
                vec![Line::Progress(event.to_string()), Line::Data(header)]
            }
            ExecutionEvent::RowBatch {
                stream_id, rows, ..
            } => self.render_rows(*stream_id, rows),
            // Shown as a table once the batch is done
            ExecutionEvent::BatchFinished(_) => Vec::new(),
            _ => vec![Line::Progress(event.to_string())],
        };
        Ok(lines)
    }

    fn render_rows(&mut self, stream_id: StreamId, rows: &[Row]) -> Vec<Line> {
        let printed = self.printed.entry(stream_id).or_insert(0);
        let room = self.row_limit.saturating_sub(*printed);
        let shown = (rows.len() as u64).min(room) as usize;

        let mut lines: Vec<Line> = rows[..shown]
            .iter()
            .map(|row| Line::Data(format_row(row)))
            .collect();
        if shown < rows.len() && *printed + shown as u64 == self.row_limit {
            lines.push(Line::Progress(format!(
                "{}: more than {} row(s), the rest are counted but not printed",
                stream_id, self.row_limit
            )));
        }
        *printed += rows.len() as u64;
        lines
    }
}

fn format_row(row: &Row) -> String {
    row.values
        .iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join("\t")
}

fn status_label(status: StatementStatus) -> &'static str {
    match status {
        StatementStatus::Succeeded => "ok",
        StatementStatus::Failed => "failed",
        StatementStatus::Skipped => "skipped",
        StatementStatus::Cancelled => "cancelled",
    }
}

/// One row per statement of the batch
pub fn summary_table(summary: &ExecutionSummary) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["#", "Lines", "Status", "Rows", "Time", "Error"]);

    for report in &summary.statements {
        let status = Cell::new(status_label(report.status)).fg(match report.status {
            StatementStatus::Succeeded => Color::Green,
            StatementStatus::Failed => Color::Red,
            StatementStatus::Skipped | StatementStatus::Cancelled => Color::Yellow,
        });
        let rows = match (report.rows_affected, report.result_sets.len()) {
            (Some(rows), _) => format!("{} affected", rows),
            (None, 0) => String::new(),
            (None, sets) => format!("{} result set(s)", sets),
        };
        table.add_row(vec![
            Cell::new(report.index + 1).set_alignment(CellAlignment::Right),
            Cell::new(format!("{}-{}", report.line_start, report.line_end)),
            status,
            Cell::new(rows),
            Cell::new(format!("{}ms", report.duration.as_millis()))
                .set_alignment(CellAlignment::Right),
            Cell::new(report.error.as_deref().unwrap_or("")),
        ]);
    }
    table
}
