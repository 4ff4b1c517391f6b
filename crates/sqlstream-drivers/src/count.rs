//! Advisory row-count queries
//!
//! A plain SELECT is wrapped as `SELECT COUNT(*) FROM (<select>) AS alias`
//! with its trailing top-level ORDER BY removed. Anything the wrapper could
//! change the meaning of is refused: CTEs, multiple statements, row-limiting
//! clauses and `SELECT ... INTO`.

use sqlstream_core::Dialect;
use sqlstream_core::lexer::{Token, TokenKind, tokenize};

const COUNT_ALIAS: &str = "sqlstream_count";

/// Top-level keywords that make a SELECT unsafe to wrap
const REFUSED_KEYWORDS: &[&str] = &["TOP", "LIMIT", "OFFSET", "FETCH", "INTO", "FOR"];

pub fn build_count_wrapper(sql: &str, dialect: Dialect) -> Option<String> {
    let tokens = tokenize(sql, dialect);
    let code: Vec<&Token<'_>> = tokens.iter().filter(|t| t.is_code()).collect();

    // Drop trailing semicolons; any other semicolon means several statements
    let end = code
        .iter()
        .rposition(|t| t.kind != TokenKind::Semicolon)
        .map(|i| i + 1)?;
    let code = &code[..end];
    if code.iter().any(|t| t.kind == TokenKind::Semicolon) {
        return None;
    }

    if !code.first()?.is_keyword("SELECT") {
        return None;
    }

    let mut depth = 0usize;
    let mut order_by_start = None;
    for (i, token) in code.iter().enumerate() {
        match token.kind {
            TokenKind::OpenParen => depth += 1,
            TokenKind::CloseParen => depth = depth.saturating_sub(1),
            TokenKind::Word if depth == 0 => {
                if REFUSED_KEYWORDS.iter().any(|kw| token.is_keyword(kw)) {
                    return None;
                }
                if token.is_keyword("ORDER") && code.get(i + 1).is_some_and(|t| t.is_keyword("BY")) {
                    order_by_start = Some(token.start);
                }
            }
            _ => {}
        }
    }

    let body_start = code[0].start;
    let body_end = order_by_start.unwrap_or(code[code.len() - 1].end);
    let inner = sql[body_start..body_end].trim_end();
    Some(format!("SELECT COUNT(*) FROM ({}) AS {}", inner, COUNT_ALIAS))
}
