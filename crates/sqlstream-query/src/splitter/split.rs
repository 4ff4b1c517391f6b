//! Batch and statement splitting

use serde::{Deserialize, Serialize};
use sqlstream_core::Dialect;
use sqlstream_core::lexer::{Token, TokenKind, tokenize};

/// Leading keywords of statements expected to produce a result set
const ROW_RETURNING_KEYWORDS: &[&str] = &[
    "SELECT", "WITH", "EXEC", "EXECUTE", "SHOW", "DESCRIBE", "DESC", "EXPLAIN", "PRAGMA",
    "VALUES",
];

/// Leading keywords of procedure calls, which may produce several result sets
const PROCEDURE_CALL_KEYWORDS: &[&str] = &["EXEC", "EXECUTE"];

/// Objects whose body may contain semicolons
const ROUTINE_KINDS: &[&str] = &["PROCEDURE", "PROC", "FUNCTION", "TRIGGER"];

/// Words allowed between CREATE/ALTER and the routine kind
const ROUTINE_MODIFIERS: &[&str] = &[
    "OR",
    "REPLACE",
    "ALTER",
    "TEMP",
    "TEMPORARY",
    "AGGREGATE",
    "CONSTRAINT",
];

/// Words after END that close a block this splitter does not count
const UNCOUNTED_BLOCK_ENDS: &[&str] = &["IF", "LOOP", "WHILE", "REPEAT"];

/// Words after BEGIN that start a transaction instead of a block
const TRANSACTION_WORDS: &[&str] = &[
    "TRAN",
    "TRANSACTION",
    "WORK",
    "DISTRIBUTED",
    "DIALOG",
    "CONVERSATION",
];

/// How many leading words are inspected for CREATE ... PROCEDURE and friends
const ROUTINE_LOOKAHEAD: usize = 8;

/// One executable statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    /// Text without the terminating semicolon or surrounding comments
    pub text: String,
    /// 1-based, inclusive
    pub line_start: usize,
    pub line_end: usize,
    /// Leading keyword suggests a result set
    pub is_select: bool,
    /// Index of the batch the statement belongs to
    pub batch: usize,
}

impl Statement {
    /// First line of the statement, shortened to `max_chars`
    pub fn preview(&self, max_chars: usize) -> String {
        let first_line = self.text.lines().next().unwrap_or_default().trim();
        if first_line.chars().count() <= max_chars && !self.text.contains('\n') {
            return first_line.to_string();
        }
        let short: String = first_line.chars().take(max_chars).collect();
        format!("{}...", short.trim_end())
    }

    /// Whether the statement calls a procedure, which may return any number
    /// of result sets
    pub fn may_return_several_sets(&self) -> bool {
        self.text
            .split(|c: char| c.is_whitespace() || c == '(')
            .find(|word| !word.is_empty())
            .is_some_and(|word| {
                PROCEDURE_CALL_KEYWORDS
                    .iter()
                    .any(|kw| word.eq_ignore_ascii_case(kw))
            })
    }
}

/// A group of statements sent together; only T-SQL scripts have more than one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub index: usize,
    pub line_start: usize,
    pub line_end: usize,
    pub statements: Vec<Statement>,
}

/// Split a script into batches. Batches without code are dropped.
pub fn split_batches(sql: &str, dialect: Dialect) -> Vec<Batch> {
    let segments = if dialect.is_tsql() {
        go_segments(sql)
    } else {
        vec![Segment {
            text: sql,
            first_line: 1,
        }]
    };

    let mut batches: Vec<Batch> = Vec::new();
    for segment in segments {
        let index = batches.len();
        let statements = split_segment(segment.text, segment.first_line, dialect, index);
        let (Some(first), Some(last)) = (statements.first(), statements.last()) else {
            continue;
        };
        batches.push(Batch {
            index,
            line_start: first.line_start,
            line_end: last.line_end,
            statements,
        });
    }
    batches
}

/// Split a script into statements, in source order across all batches
pub fn split_statements(sql: &str, dialect: Dialect) -> Vec<Statement> {
    split_batches(sql, dialect)
        .into_iter()
        .flat_map(|batch| batch.statements)
        .collect()
}

/// Whether the first keyword of `sql` suggests a result set
pub fn is_select_statement(sql: &str, dialect: Dialect) -> bool {
    let tokens = tokenize(sql, dialect);
    leading_keyword_returns_rows(&tokens)
}

struct Segment<'a> {
    text: &'a str,
    first_line: usize,
}

/// Cut at lines that consist of `GO` alone, ignoring case and whitespace
fn go_segments(sql: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut first_line = 1;
    let mut offset = 0;

    for (index, line) in sql.split_inclusive('\n').enumerate() {
        if line.trim().eq_ignore_ascii_case("GO") {
            segments.push(Segment {
                text: &sql[start..offset],
                first_line,
            });
            start = offset + line.len();
            first_line = index + 2;
        }
        offset += line.len();
    }
    segments.push(Segment {
        text: &sql[start..],
        first_line,
    });
    segments
}

fn split_segment(text: &str, first_line: usize, dialect: Dialect, batch: usize) -> Vec<Statement> {
    let tokens = tokenize(text, dialect);
    let line_offset = first_line - 1;
    let mut statements = Vec::new();
    let mut shape = StatementShape::default();
    let mut span: Option<(usize, usize)> = None;

    for (index, token) in tokens.iter().enumerate() {
        if token.kind == TokenKind::Semicolon && !shape.holds_semicolon(dialect) {
            if let Some((first, last)) = span.take() {
                statements.push(build_statement(text, &tokens[first..=last], line_offset, batch));
            }
            shape = StatementShape::default();
            continue;
        }
        if !token.is_code() {
            continue;
        }
        shape.observe(token, dialect);
        span = match span {
            Some((first, _)) => Some((first, index)),
            None => Some((index, index)),
        };
    }
    if let Some((first, last)) = span {
        statements.push(build_statement(text, &tokens[first..=last], line_offset, batch));
    }
    statements
}

fn build_statement(source: &str, tokens: &[Token<'_>], line_offset: usize, batch: usize) -> Statement {
    // Callers pass a non-empty range that starts and ends on code
    let first = &tokens[0];
    let last = &tokens[tokens.len() - 1];
    Statement {
        text: source[first.start..last.end].to_string(),
        line_start: first.line + line_offset,
        line_end: last.end_line + line_offset,
        is_select: leading_keyword_returns_rows(tokens),
        batch,
    }
}

fn leading_keyword_returns_rows(tokens: &[Token<'_>]) -> bool {
    tokens
        .iter()
        .find(|t| t.kind == TokenKind::Word)
        .is_some_and(|word| ROW_RETURNING_KEYWORDS.iter().any(|kw| word.is_keyword(kw)))
}

/// Tracks whether the statement being scanned is a routine definition and how
/// deep inside BEGIN/CASE ... END blocks the scanner is. Blocks are counted in
/// routine bodies and, for T-SQL, everywhere.
#[derive(Default)]
struct StatementShape {
    words: usize,
    creating: bool,
    definer: bool,
    routine: bool,
    depth: usize,
    pending_begin: bool,
    pending_end: bool,
}

impl StatementShape {
    fn observe(&mut self, token: &Token<'_>, dialect: Dialect) {
        if token.kind != TokenKind::Word {
            self.resolve_pending(None);
            return;
        }
        let word = token.text.to_ascii_uppercase();
        self.words += 1;
        let closed_block = self.resolve_pending(Some(&word));

        if !self.routine {
            self.observe_leading(&word);
        }
        if !(self.routine || dialect.is_tsql()) {
            return;
        }
        match word.as_str() {
            "BEGIN" => self.pending_begin = true,
            "CASE" if !closed_block => self.depth += 1,
            "END" => self.pending_end = true,
            _ => {}
        }
    }

    fn observe_leading(&mut self, word: &str) {
        if self.words == 1 {
            self.creating = word == "CREATE" || word == "ALTER";
            return;
        }
        if !self.creating || self.words > ROUTINE_LOOKAHEAD {
            self.creating = false;
            return;
        }
        if ROUTINE_KINDS.contains(&word) {
            self.routine = true;
        } else if word == "DEFINER" {
            // DEFINER = user@host takes a few words of its own
            self.definer = true;
        } else if !ROUTINE_MODIFIERS.contains(&word) && !self.definer {
            self.creating = false;
        }
    }

    /// Settle a BEGIN or END seen on the previous word. Returns true when an
    /// END closed a construct named by the next word (`END CASE`, `END IF`).
    fn resolve_pending(&mut self, next_word: Option<&str>) -> bool {
        if self.pending_begin {
            self.pending_begin = false;
            // BEGIN TRANSACTION and a bare BEGIN; open no block
            if next_word.is_some_and(|w| !TRANSACTION_WORDS.contains(&w)) {
                self.depth += 1;
            }
            return false;
        }
        if !self.pending_end {
            return false;
        }
        self.pending_end = false;
        if let Some(word) = next_word
            && UNCOUNTED_BLOCK_ENDS.contains(&word)
        {
            return true;
        }
        self.depth = self.depth.saturating_sub(1);
        next_word == Some("CASE")
    }

    fn holds_semicolon(&mut self, dialect: Dialect) -> bool {
        self.resolve_pending(None);
        // T-SQL routine bodies run to the end of their batch
        (self.routine && dialect.is_tsql()) || self.depth > 0
    }
}
