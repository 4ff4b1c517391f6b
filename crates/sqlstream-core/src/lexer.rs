//! Dialect-aware SQL token scanner
//!
//! The scanner only knows enough SQL to find statement boundaries and the
//! leading keyword of a statement: quoted literals and identifiers,
//! comments, semicolons and parentheses. Everything else is a `Word` or a
//! single `Punct` character. Unterminated quotes and comments run to the end
//! of the input.

use crate::Dialect;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Keyword, identifier, number or variable
    Word,
    /// String literal, including dollar-quoted bodies
    Literal,
    /// `"ident"`, `[ident]` or `` `ident` ``
    QuotedIdentifier,
    LineComment,
    BlockComment,
    Semicolon,
    OpenParen,
    CloseParen,
    Whitespace,
    Punct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    /// Byte offset of the first character
    pub start: usize,
    /// Byte offset one past the last character
    pub end: usize,
    /// 1-based line of the first character
    pub line: usize,
    /// 1-based line of the last character
    pub end_line: usize,
}

impl Token<'_> {
    /// Anything other than whitespace and comments
    pub fn is_code(&self) -> bool {
        !matches!(
            self.kind,
            TokenKind::Whitespace | TokenKind::LineComment | TokenKind::BlockComment
        )
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }
}

/// Scan `sql` into tokens; concatenating every token's text yields `sql`
pub fn tokenize(sql: &str, dialect: Dialect) -> Vec<Token<'_>> {
    Lexer::new(sql, dialect).collect()
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: usize,
    dialect: Dialect,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str, dialect: Dialect) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            line: 1,
            dialect,
        }
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn advance_char(&mut self) {
        if let Some(&b) = self.bytes.get(self.pos) {
            self.pos = (self.pos + utf8_len(b)).min(self.bytes.len());
        }
    }

    fn eat_while(&mut self, pred: impl Fn(u8) -> bool) {
        while let Some(b) = self.peek(0) {
            if !pred(b) {
                break;
            }
            self.pos += 1;
        }
    }

    fn scan(&mut self) -> TokenKind {
        let b = self.bytes[self.pos];
        match b {
            b' ' | b'\t' | b'\r' | b'\n' | 0x0b | 0x0c => {
                self.eat_while(|c| c.is_ascii_whitespace() || c == 0x0b);
                TokenKind::Whitespace
            }
            b';' => {
                self.pos += 1;
                TokenKind::Semicolon
            }
            b'(' => {
                self.pos += 1;
                TokenKind::OpenParen
            }
            b')' => {
                self.pos += 1;
                TokenKind::CloseParen
            }
            b'-' if self.peek(1) == Some(b'-') => {
                self.skip_line();
                TokenKind::LineComment
            }
            b'#' if self.dialect == Dialect::MySql => {
                self.skip_line();
                TokenKind::LineComment
            }
            b'/' if self.peek(1) == Some(b'*') => {
                self.skip_block_comment();
                TokenKind::BlockComment
            }
            b'\'' => {
                self.skip_quoted(b'\'', self.dialect == Dialect::MySql);
                TokenKind::Literal
            }
            b'"' => {
                self.skip_quoted(b'"', self.dialect == Dialect::MySql);
                TokenKind::QuotedIdentifier
            }
            b'`' if self.dialect == Dialect::MySql => {
                self.skip_quoted(b'`', false);
                TokenKind::QuotedIdentifier
            }
            b'[' if self.dialect.uses_bracket_identifiers() => {
                self.skip_quoted(b']', false);
                TokenKind::QuotedIdentifier
            }
            b'$' if self.dialect == Dialect::PostgreSql => match self.dollar_tag_end() {
                Some(tag_end) => {
                    self.skip_dollar_quoted(tag_end);
                    TokenKind::Literal
                }
                None => {
                    self.pos += 1;
                    TokenKind::Punct
                }
            },
            c if self.is_word_start(c) => {
                let start = self.pos;
                self.pos += 1;
                self.eat_while(is_word_char);
                let escape_string = self.dialect == Dialect::PostgreSql
                    && self.pos - start == 1
                    && matches!(b, b'E' | b'e')
                    && self.peek(0) == Some(b'\'');
                if escape_string {
                    self.skip_quoted(b'\'', true);
                    TokenKind::Literal
                } else {
                    TokenKind::Word
                }
            }
            _ => {
                self.advance_char();
                TokenKind::Punct
            }
        }
    }

    fn is_word_start(&self, c: u8) -> bool {
        c.is_ascii_alphanumeric()
            || c == b'_'
            || c == b'@'
            || c >= 0x80
            || (c == b'#' && self.dialect != Dialect::MySql)
    }

    fn skip_line(&mut self) {
        self.eat_while(|c| c != b'\n');
    }

    fn skip_block_comment(&mut self) {
        let nested = self.dialect == Dialect::PostgreSql;
        self.pos += 2;
        let mut depth = 1usize;
        while self.pos < self.bytes.len() {
            if self.peek(0) == Some(b'*') && self.peek(1) == Some(b'/') {
                self.pos += 2;
                depth -= 1;
                if depth == 0 {
                    return;
                }
            } else if nested && self.peek(0) == Some(b'/') && self.peek(1) == Some(b'*') {
                self.pos += 2;
                depth += 1;
            } else {
                self.pos += 1;
            }
        }
    }

    /// Consume a quoted run opened at `pos`; a doubled closing quote is an escape
    fn skip_quoted(&mut self, close: u8, backslash_escapes: bool) {
        self.pos += 1;
        while let Some(c) = self.peek(0) {
            if backslash_escapes && c == b'\\' {
                self.pos += 1;
                self.advance_char();
                continue;
            }
            if c == close {
                if self.peek(1) == Some(close) {
                    self.pos += 2;
                    continue;
                }
                self.pos += 1;
                return;
            }
            self.pos += 1;
        }
    }

    /// End offset of a `$tag$` opener at `pos`, if there is one
    fn dollar_tag_end(&self) -> Option<usize> {
        let mut i = self.pos + 1;
        if self.bytes.get(i).is_some_and(u8::is_ascii_digit) {
            return None;
        }
        while let Some(&c) = self.bytes.get(i) {
            if c == b'$' {
                return Some(i + 1);
            }
            if !(c.is_ascii_alphanumeric() || c == b'_') {
                return None;
            }
            i += 1;
        }
        None
    }

    fn skip_dollar_quoted(&mut self, tag_end: usize) {
        let delimiter = &self.src[self.pos..tag_end];
        self.pos = match self.src[tag_end..].find(delimiter) {
            Some(offset) => tag_end + offset + delimiter.len(),
            None => self.bytes.len(),
        };
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        if self.pos >= self.bytes.len() {
            return None;
        }
        let start = self.pos;
        let kind = self.scan();
        let text = &self.src[start..self.pos];
        let line = self.line;
        let newlines = text.bytes().filter(|&b| b == b'\n').count();
        self.line += newlines;
        let end_line = if text.ends_with('\n') {
            self.line - 1
        } else {
            self.line
        };
        Some(Token {
            kind,
            text,
            start,
            end: self.pos,
            line,
            end_line: end_line.max(line),
        })
    }
}

fn is_word_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, b'_' | b'$' | b'@' | b'#') || c >= 0x80
}

fn utf8_len(lead: u8) -> usize {
    match lead {
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf7 => 4,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(sql: &str, dialect: Dialect) -> Vec<(TokenKind, &str)> {
        tokenize(sql, dialect)
            .into_iter()
            .filter(|t| t.kind != TokenKind::Whitespace)
            .map(|t| (t.kind, t.text))
            .collect()
    }

    #[test]
    fn test_tokens_cover_input() {
        let sql = "SELECT 'a;b' -- c;\n/* d; */ FROM [t];";
        let joined: String = tokenize(sql, Dialect::SqlServer)
            .iter()
            .map(|t| t.text)
            .collect();
        assert_eq!(joined, sql);
    }

    #[test]
    fn test_semicolons_inside_quotes_and_comments() {
        let tokens = kinds("SELECT 'x;y', \"a;b\" -- z;\n/* ; */;", Dialect::Sqlite);
        let semicolons = tokens
            .iter()
            .filter(|(k, _)| *k == TokenKind::Semicolon)
            .count();
        assert_eq!(semicolons, 1);
    }

    #[test]
    fn test_doubled_quote_escape() {
        let tokens = kinds("'it''s' x", Dialect::Sqlite);
        assert_eq!(tokens[0], (TokenKind::Literal, "'it''s'"));
        assert_eq!(tokens[1], (TokenKind::Word, "x"));
    }

    #[test]
    fn test_bracket_identifiers_only_for_tsql_and_access() {
        let tsql = kinds("[a;b]", Dialect::SqlServer);
        assert_eq!(tsql, vec![(TokenKind::QuotedIdentifier, "[a;b]")]);

        let sqlite = kinds("[a;b]", Dialect::Sqlite);
        assert!(sqlite.iter().any(|(k, _)| *k == TokenKind::Semicolon));
    }

    #[test]
    fn test_mysql_backticks_hash_comments_and_backslashes() {
        let tokens = kinds("`a;b` # note;\n'x\\';y'", Dialect::MySql);
        assert_eq!(
            tokens,
            vec![
                (TokenKind::QuotedIdentifier, "`a;b`"),
                (TokenKind::LineComment, "# note;"),
                (TokenKind::Literal, "'x\\';y'"),
            ]
        );
    }

    #[test]
    fn test_postgres_dollar_quoting_and_nested_comments() {
        let tokens = kinds(
            "$body$ BEGIN; END; $body$ /* a /* b */ ; */ $1",
            Dialect::PostgreSql,
        );
        assert_eq!(tokens[0], (TokenKind::Literal, "$body$ BEGIN; END; $body$"));
        assert_eq!(tokens[1], (TokenKind::BlockComment, "/* a /* b */ ; */"));
        assert_eq!(tokens[2], (TokenKind::Punct, "$"));
        assert_eq!(tokens[3], (TokenKind::Word, "1"));
    }

    #[test]
    fn test_line_numbers() {
        let tokens: Vec<_> = tokenize("SELECT\n  'a\nb'\nFROM t", Dialect::Sqlite)
            .into_iter()
            .filter(|t| t.is_code())
            .collect();
        assert_eq!((tokens[0].line, tokens[0].end_line), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].end_line), (2, 3));
        assert_eq!(tokens[2].line, 4);
    }

    #[test]
    fn test_unterminated_runs_to_end() {
        let tokens = kinds("SELECT 'abc; DROP", Dialect::Sqlite);
        assert_eq!(tokens.last().unwrap(), &(TokenKind::Literal, "'abc; DROP"));

        let tokens = kinds("SELECT /* open", Dialect::Sqlite);
        assert_eq!(tokens.last().unwrap(), &(TokenKind::BlockComment, "/* open"));
    }

    #[test]
    fn test_non_ascii_words() {
        let tokens = kinds("SELECT naïve, 'é' FROM données", Dialect::Sqlite);
        assert!(tokens.contains(&(TokenKind::Word, "naïve")));
        assert!(tokens.contains(&(TokenKind::Word, "données")));
    }
}
