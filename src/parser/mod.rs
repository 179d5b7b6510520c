//! DDL text → Schema Model (C2).
//!
//! Understands the DDL subset named in spec.md §4.1: `CREATE TABLE` (with
//! inline column/constraint clauses) and standalone `CREATE [UNIQUE] INDEX`.
//! Anything else produces a warning and is skipped — the parser's job is to
//! understand an authored schema file, not to validate arbitrary SQL.

mod lexer;

pub use lexer::{split_parenthesized, Spanned};

use std::collections::HashSet;

use thiserror::Error;

use crate::schema_model::{
    normalize_default, normalize_type, Column, Constraint, ConstraintKind, ForeignKeyAction,
    ForeignKeyRef, Index, Schema, Table,
};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("statement {statement_index} (byte offset {byte_offset}): {message}")]
    Malformed {
        statement_index: usize,
        byte_offset: usize,
        message: String,
    },
}

/// Non-fatal issues found while parsing: unsupported DDL skipped, orphan
/// indexes dropped, duplicate names normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseWarning {
    pub statement_index: usize,
    pub message: String,
}

pub struct ParseOutcome {
    pub schema: Schema,
    pub warnings: Vec<ParseWarning>,
}

/// Parse a UTF-8 DDL text into a `Schema`. Reserved words that begin a
/// constraint clause inside a `CREATE TABLE` body, so a "column" whose name
/// collides with one of these is instead classified as a constraint — this
/// matches real DDL, where an unquoted column can never be named `PRIMARY`.
const CONSTRAINT_LEADERS: &[&str] = &["PRIMARY", "FOREIGN", "UNIQUE", "CHECK", "CONSTRAINT"];

pub fn parse(sql: &str) -> Result<ParseOutcome, ParseError> {
    let stripped = lexer::strip_comments(sql);
    let statements = lexer::split_statements(&stripped);

    let mut tables: Vec<Table> = Vec::new();
    let mut pending_indexes: Vec<(String, Index)> = Vec::new();
    let mut warnings = Vec::new();

    for (idx, stmt) in statements.iter().enumerate() {
        let upper = stmt.text.to_uppercase();
        if let Some(rest) = strip_keyword_sequence(&upper, &stmt.text, "CREATE TABLE") {
            let (rest_upper, rest_text) = rest;
            let (rest_upper, rest_text) = skip_if_not_exists(&rest_upper, &rest_text);
            let table = parse_create_table(idx, &rest_upper, &rest_text)?;
            if tables.iter().any(|t| t.name == table.name) {
                warnings.push(ParseWarning {
                    statement_index: idx,
                    message: format!("duplicate table '{}' ignored", table.name),
                });
                continue;
            }
            tables.push(table);
        } else if let Some((table_name, index)) = try_parse_create_index(idx, &upper, &stmt.text)?
        {
            pending_indexes.push((table_name, index));
        } else if upper.starts_with("CREATE ") || upper.starts_with("ALTER ") {
            warnings.push(ParseWarning {
                statement_index: idx,
                message: format!(
                    "unsupported DDL statement skipped: {}",
                    first_words(&stmt.text, 4)
                ),
            });
        } else {
            warnings.push(ParseWarning {
                statement_index: idx,
                message: format!("unrecognized statement skipped: {}", first_words(&stmt.text, 4)),
            });
        }
    }

    for (table_name, index) in pending_indexes {
        match tables.iter_mut().find(|t| t.name == table_name) {
            Some(table) => table.indexes.push(index),
            None => warnings.push(ParseWarning {
                statement_index: 0,
                message: format!(
                    "orphan index '{}' targets unknown table '{}', dropped",
                    index.name, table_name
                ),
            }),
        }
    }

    let schema = Schema::new(1, chrono::Utc::now(), tables);
    Ok(ParseOutcome { schema, warnings })
}

fn first_words(s: &str, n: usize) -> String {
    s.split_whitespace().take(n).collect::<Vec<_>>().join(" ")
}

/// If `upper` starts with `keyword` (case-insensitive, whitespace-normalized
/// single spaces assumed), return the remainder of both the uppercased and
/// original-case text after the keyword.
fn strip_keyword_sequence(upper: &str, original: &str, keyword: &str) -> Option<(String, String)> {
    if upper.starts_with(keyword) {
        let rest_upper = upper[keyword.len()..].to_string();
        let rest_orig = original[keyword.len()..].to_string();
        Some((rest_upper, rest_orig))
    } else {
        None
    }
}

fn skip_if_not_exists(upper: &str, original: &str) -> (String, String) {
    let trimmed_upper = upper.trim_start();
    if trimmed_upper.starts_with("IF NOT EXISTS") {
        let skip = upper.len() - trimmed_upper.len() + "IF NOT EXISTS".len();
        (upper[skip..].to_string(), original[skip..].to_string())
    } else {
        (upper.to_string(), original.to_string())
    }
}

fn parse_create_table(
    statement_index: usize,
    rest_upper: &str,
    rest_text: &str,
) -> Result<Table, ParseError> {
    let rest_text_trimmed = rest_text.trim_start();
    let skip = rest_text.len() - rest_text_trimmed.len();
    let rest_upper_trimmed = &rest_upper[skip..];

    let name_end = rest_upper_trimmed
        .find(|c: char| c.is_whitespace() || c == '(')
        .ok_or_else(|| ParseError::Malformed {
            statement_index,
            byte_offset: 0,
            message: "CREATE TABLE missing table name".to_string(),
        })?;
    let raw_name = rest_text_trimmed[..name_end].trim();
    let name = unquote_ident(raw_name);

    let (_, body, _) = lexer::split_parenthesized(rest_text_trimmed).ok_or_else(|| {
        ParseError::Malformed {
            statement_index,
            byte_offset: skip,
            message: "CREATE TABLE missing parenthesized body".to_string(),
        }
    })?;

    let mut table = Table::new(name);
    let items = lexer::split_top_level_commas(body);

    for item in &items {
        classify_table_item(statement_index, &mut table, item)?;
    }

    Ok(table)
}

fn classify_table_item(
    statement_index: usize,
    table: &mut Table,
    item: &Spanned<String>,
) -> Result<(), ParseError> {
    let upper = item.text.to_uppercase();
    let first_word = upper.split_whitespace().next().unwrap_or("");

    if CONSTRAINT_LEADERS.contains(&first_word) {
        if let Some(constraint) = parse_constraint_item(statement_index, &upper, &item.text)? {
            apply_constraint_to_columns(table, &constraint);
            table.constraints.push(constraint);
        }
    } else {
        let column = parse_column_item(statement_index, &upper, &item.text)?;
        table.columns.push(column);
    }
    Ok(())
}

fn apply_constraint_to_columns(table: &mut Table, constraint: &Constraint) {
    if constraint.kind == ConstraintKind::PrimaryKey {
        for col_name in &constraint.columns {
            if let Some(col) = table.columns.iter_mut().find(|c| &c.name == col_name) {
                col.primary_key = true;
                col.nullable = false;
            }
        }
    }
}

fn parse_column_item(
    statement_index: usize,
    upper: &str,
    original: &str,
) -> Result<Column, ParseError> {
    let mut tokens = TokenCursor::new(upper, original);
    let name_tok = tokens.next_token().ok_or_else(|| ParseError::Malformed {
        statement_index,
        byte_offset: 0,
        message: "column item missing name".to_string(),
    })?;
    let name = unquote_ident(&name_tok.orig);

    let type_tok = tokens.next_type_token().ok_or_else(|| ParseError::Malformed {
        statement_index,
        byte_offset: name_tok.offset,
        message: format!("column '{name}' missing a type"),
    })?;

    let mut column = Column::new(name, type_tok.orig.clone());
    if normalize_type(&type_tok.orig)
        != column.sql_type
    {
        // normalize_type is already applied in Column::new; nothing else to do.
    }
    if crate::schema_model::normalize::is_serial_alias(&type_tok.orig) {
        column.default = Some("nextval".to_string());
        column.nullable = false;
    }

    loop {
        let Some(word) = tokens.peek_upper() else {
            break;
        };
        match word.as_str() {
            "NOT" => {
                tokens.next_token();
                tokens.expect_word(statement_index, "NULL")?;
                column.nullable = false;
            }
            "NULL" => {
                tokens.next_token();
                column.nullable = true;
            }
            "PRIMARY" => {
                tokens.next_token();
                tokens.expect_word(statement_index, "KEY")?;
                column.primary_key = true;
                column.nullable = false;
            }
            "UNIQUE" => {
                tokens.next_token();
            }
            "DEFAULT" => {
                tokens.next_token();
                let expr = tokens.rest_until_top_level_comma_or_keyword();
                column.default = Some(normalize_default(&expr));
            }
            "REFERENCES" => {
                tokens.next_token();
                // Inline REFERENCES is recorded informally; the authoritative
                // foreign key comes from an explicit table-level constraint
                // in well-formed schemas. Consume the clause so it doesn't
                // get reinterpreted as another column.
                tokens.consume_references_clause();
            }
            "CHECK" => {
                tokens.next_token();
                tokens.consume_parenthesized();
            }
            _ => break,
        }
    }

    Ok(column)
}

fn parse_constraint_item(
    statement_index: usize,
    upper: &str,
    original: &str,
) -> Result<Option<Constraint>, ParseError> {
    let mut tokens = TokenCursor::new(upper, original);
    let first = tokens.peek_upper().unwrap_or_default();

    let explicit_name = if first == "CONSTRAINT" {
        tokens.next_token();
        let name_tok = tokens.next_token().ok_or_else(|| ParseError::Malformed {
            statement_index,
            byte_offset: 0,
            message: "CONSTRAINT missing name".to_string(),
        })?;
        Some(unquote_ident(&name_tok.orig))
    } else {
        None
    };

    let kind_word = tokens.peek_upper().unwrap_or_default();
    match kind_word.as_str() {
        "PRIMARY" => {
            tokens.next_token();
            tokens.expect_word(statement_index, "KEY")?;
            let cols = tokens.consume_column_list(statement_index)?;
            let name = explicit_name.unwrap_or_else(|| format!("pk_{}", cols.join("_")));
            Ok(Some(Constraint::primary_key(name, cols)))
        }
        "UNIQUE" => {
            tokens.next_token();
            let cols = tokens.consume_column_list(statement_index)?;
            let name = explicit_name.unwrap_or_else(|| format!("uq_{}", cols.join("_")));
            Ok(Some(Constraint::unique(name, cols)))
        }
        "CHECK" => {
            tokens.next_token();
            let expr = tokens.consume_parenthesized().unwrap_or_default();
            let name = explicit_name.unwrap_or_else(|| "chk_anonymous".to_string());
            Ok(Some(Constraint::check(name, Vec::new(), expr.trim().to_string())))
        }
        "FOREIGN" => {
            tokens.next_token();
            tokens.expect_word(statement_index, "KEY")?;
            let cols = tokens.consume_column_list(statement_index)?;
            tokens.expect_word(statement_index, "REFERENCES")?;
            let target_table = tokens
                .next_token()
                .map(|t| unquote_ident(&t.orig))
                .ok_or_else(|| ParseError::Malformed {
                    statement_index,
                    byte_offset: 0,
                    message: "FOREIGN KEY missing referenced table".to_string(),
                })?;
            let target_cols = tokens
                .consume_column_list(statement_index)
                .unwrap_or_default();
            let (on_update, on_delete) = tokens.consume_referential_actions();
            let name = explicit_name.unwrap_or_else(|| format!("fk_{}", cols.join("_")));
            Ok(Some(Constraint::foreign_key(
                name,
                cols,
                ForeignKeyRef {
                    target_table,
                    target_columns: target_cols,
                    on_update,
                    on_delete,
                },
            )))
        }
        _ => Ok(None),
    }
}

fn try_parse_create_index(
    statement_index: usize,
    upper: &str,
    original: &str,
) -> Result<Option<(String, Index)>, ParseError> {
    let is_unique = upper.starts_with("CREATE UNIQUE INDEX");
    if !(upper.starts_with("CREATE INDEX") || is_unique) {
        return Ok(None);
    }
    let keyword = if is_unique {
        "CREATE UNIQUE INDEX"
    } else {
        "CREATE INDEX"
    };
    let rest = original[keyword.len()..].trim_start();
    let rest_upper = upper[keyword.len()..].trim_start();

    let (rest_upper, rest) = if rest_upper.starts_with("IF NOT EXISTS") {
        (
            rest_upper["IF NOT EXISTS".len()..].trim_start(),
            rest["IF NOT EXISTS".len()..].trim_start(),
        )
    } else {
        (rest_upper, rest)
    };

    let name_end = rest
        .find(char::is_whitespace)
        .ok_or_else(|| ParseError::Malformed {
            statement_index,
            byte_offset: 0,
            message: "CREATE INDEX missing index name".to_string(),
        })?;
    let index_name = unquote_ident(rest[..name_end].trim());
    let after_name = rest_upper[name_end..].trim_start();
    if !after_name.starts_with("ON") {
        return Err(ParseError::Malformed {
            statement_index,
            byte_offset: name_end,
            message: "CREATE INDEX missing ON clause".to_string(),
        });
    }
    let after_on = rest[rest.len() - after_name.len() + 2..].trim_start();
    let table_end = after_on
        .find(|c: char| c.is_whitespace() || c == '(')
        .ok_or_else(|| ParseError::Malformed {
            statement_index,
            byte_offset: 0,
            message: "CREATE INDEX missing target table".to_string(),
        })?;
    let table_name = unquote_ident(after_on[..table_end].trim());

    let (_, cols_body, _) = lexer::split_parenthesized(after_on).ok_or_else(|| {
        ParseError::Malformed {
            statement_index,
            byte_offset: 0,
            message: "CREATE INDEX missing column list".to_string(),
        }
    })?;
    let columns: Vec<String> = lexer::split_top_level_commas(cols_body)
        .into_iter()
        .map(|c| unquote_ident(c.text.split_whitespace().next().unwrap_or("")))
        .collect();

    Ok(Some((
        table_name,
        Index {
            name: index_name,
            columns,
            unique: is_unique,
        },
    )))
}

fn unquote_ident(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches(',');
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}

/// A minimal whitespace/paren-aware token cursor over a single table item
/// (column or constraint clause), tracking both the uppercased and
/// original-case text so identifiers/expressions keep their casing.
struct TokenCursor {
    upper: Vec<char>,
    orig: Vec<char>,
    pos: usize,
}

struct Token {
    orig: String,
    offset: usize,
}

impl TokenCursor {
    fn new(upper: &str, orig: &str) -> Self {
        Self {
            upper: upper.chars().collect(),
            orig: orig.chars().collect(),
            pos: 0,
        }
    }

    fn skip_ws(&mut self) {
        while self.pos < self.upper.len() && self.upper[self.pos].is_whitespace() {
            self.pos += 1;
        }
    }

    fn peek_upper(&mut self) -> Option<String> {
        self.skip_ws();
        if self.pos >= self.upper.len() {
            return None;
        }
        let start = self.pos;
        let mut end = start;
        while end < self.upper.len() && !self.upper[end].is_whitespace() && self.upper[end] != '(' {
            end += 1;
        }
        if end == start {
            end = start + 1;
        }
        Some(self.upper[start..end].iter().collect())
    }

    fn next_token(&mut self) -> Option<Token> {
        self.skip_ws();
        if self.pos >= self.upper.len() {
            return None;
        }
        let start = self.pos;
        if self.orig[self.pos] == '"' {
            self.pos += 1;
            while self.pos < self.orig.len() && self.orig[self.pos] != '"' {
                self.pos += 1;
            }
            self.pos += 1;
        } else {
            while self.pos < self.upper.len()
                && !self.upper[self.pos].is_whitespace()
                && self.upper[self.pos] != '('
            {
                self.pos += 1;
            }
        }
        if self.pos == start {
            self.pos += 1;
        }
        Some(Token {
            orig: self.orig[start..self.pos].iter().collect(),
            offset: start,
        })
    }

    /// A type token is a name optionally followed by a parenthesized
    /// parameter list, e.g. `VARCHAR(255)` or `NUMERIC(10,2)`, captured as
    /// one token.
    fn next_type_token(&mut self) -> Option<Token> {
        let base = self.next_token()?;
        self.skip_ws();
        // Two-word types: "CHARACTER VARYING", "DOUBLE PRECISION", "TIMESTAMP WITH TIME ZONE"
        let mut text = base.orig.clone();
        if let Some(next_word) = self.peek_upper() {
            let combinable = matches!(
                (base.orig.to_uppercase().as_str(), next_word.as_str()),
                ("CHARACTER", "VARYING")
                    | ("DOUBLE", "PRECISION")
                    | ("TIMESTAMP", "WITH")
                    | ("TIMESTAMP", "WITHOUT")
                    | ("TIME", "WITH")
                    | ("TIME", "WITHOUT")
            );
            if combinable {
                while let Some(w) = self.peek_upper() {
                    if matches!(w.as_str(), "WITH" | "WITHOUT" | "TIME" | "ZONE" | "VARYING" | "PRECISION") {
                        let t = self.next_token().unwrap();
                        text.push(' ');
                        text.push_str(&t.orig);
                    } else {
                        break;
                    }
                }
            }
        }
        if self.pos < self.upper.len() && self.upper[self.pos] == '(' {
            if let Some(params) = self.consume_parenthesized() {
                text.push('(');
                text.push_str(&params);
                text.push(')');
            }
        }
        Some(Token {
            orig: text,
            offset: base.offset,
        })
    }

    fn consume_parenthesized(&mut self) -> Option<String> {
        self.skip_ws();
        if self.pos >= self.upper.len() || self.upper[self.pos] != '(' {
            return None;
        }
        let start = self.pos;
        let mut depth = 0i32;
        let mut in_quote = false;
        while self.pos < self.upper.len() {
            let c = self.orig[self.pos];
            if in_quote {
                if c == '\'' {
                    in_quote = false;
                }
            } else {
                match c {
                    '\'' => in_quote = true,
                    '(' => depth += 1,
                    ')' => {
                        depth -= 1;
                        if depth == 0 {
                            self.pos += 1;
                            break;
                        }
                    }
                    _ => {}
                }
            }
            self.pos += 1;
        }
        let inside: String = self.orig[start + 1..self.pos - 1].iter().collect();
        Some(inside)
    }

    fn expect_word(&mut self, statement_index: usize, word: &str) -> Result<(), ParseError> {
        match self.next_token() {
            Some(t) if t.orig.to_uppercase() == word => Ok(()),
            Some(t) => Err(ParseError::Malformed {
                statement_index,
                byte_offset: t.offset,
                message: format!("expected '{word}', found '{}'", t.orig),
            }),
            None => Err(ParseError::Malformed {
                statement_index,
                byte_offset: self.pos,
                message: format!("expected '{word}', found end of clause"),
            }),
        }
    }

    fn consume_column_list(&mut self, statement_index: usize) -> Result<Vec<String>, ParseError> {
        let inside = self.consume_parenthesized().ok_or_else(|| ParseError::Malformed {
            statement_index,
            byte_offset: self.pos,
            message: "expected parenthesized column list".to_string(),
        })?;
        Ok(lexer::split_top_level_commas(&inside)
            .into_iter()
            .map(|c| unquote_ident(&c.text))
            .collect())
    }

    fn consume_references_clause(&mut self) {
        self.next_token(); // target table
        self.consume_parenthesized(); // target column(s)
        self.consume_referential_actions();
    }

    fn consume_referential_actions(&mut self) -> (ForeignKeyAction, ForeignKeyAction) {
        let mut on_update = ForeignKeyAction::NoAction;
        let mut on_delete = ForeignKeyAction::NoAction;
        loop {
            let Some(word) = self.peek_upper() else { break };
            if word != "ON" {
                break;
            }
            self.next_token();
            let which = self.next_token().map(|t| t.orig.to_uppercase());
            let action = self.consume_action();
            match which.as_deref() {
                Some("UPDATE") => on_update = action,
                Some("DELETE") => on_delete = action,
                _ => {}
            }
        }
        (on_update, on_delete)
    }

    fn consume_action(&mut self) -> ForeignKeyAction {
        match self.peek_upper().as_deref() {
            Some("CASCADE") => {
                self.next_token();
                ForeignKeyAction::Cascade
            }
            Some("RESTRICT") => {
                self.next_token();
                ForeignKeyAction::Restrict
            }
            Some("SET") => {
                self.next_token();
                match self.peek_upper().as_deref() {
                    Some("NULL") => {
                        self.next_token();
                        ForeignKeyAction::SetNull
                    }
                    Some("DEFAULT") => {
                        self.next_token();
                        ForeignKeyAction::SetDefault
                    }
                    _ => ForeignKeyAction::NoAction,
                }
            }
            Some("NO") => {
                self.next_token();
                self.next_token(); // ACTION
                ForeignKeyAction::NoAction
            }
            _ => ForeignKeyAction::NoAction,
        }
    }

    /// Consume the remainder of the clause as a raw expression (used for
    /// `DEFAULT <expr>`), stopping only at end of input — a column item has
    /// already been isolated by the top-level comma splitter, so nothing
    /// short of the end of the item can terminate a default expression.
    fn rest_until_top_level_comma_or_keyword(&mut self) -> String {
        self.skip_ws();
        let start = self.pos;

        // If the default value is itself parenthesized or a quoted literal,
        // consume it as one atom, then continue consuming trailing
        // modifiers are handled by the caller's loop on the next pass.
        if self.pos < self.upper.len() && self.orig[self.pos] == '\'' {
            self.pos += 1;
            while self.pos < self.upper.len() {
                if self.orig[self.pos] == '\'' {
                    self.pos += 1;
                    break;
                }
                self.pos += 1;
            }
            // allow a trailing cast, e.g. 'x'::text
            if self.pos + 1 < self.upper.len() && self.orig[self.pos] == ':' && self.orig[self.pos + 1] == ':'
            {
                self.pos += 2;
                while self.pos < self.upper.len()
                    && !self.upper[self.pos].is_whitespace()
                {
                    self.pos += 1;
                }
            }
            return self.orig[start..self.pos].iter().collect();
        }

        // Otherwise consume a single token/function-call atom (e.g. NOW(),
        // a bare numeric/keyword literal).
        while self.pos < self.upper.len() && !self.upper[self.pos].is_whitespace() {
            if self.orig[self.pos] == '(' {
                self.consume_parenthesized();
                continue;
            }
            self.pos += 1;
        }
        self.orig[start..self.pos].iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(sql: &str) -> ParseOutcome {
        parse(sql).expect("parse should succeed")
    }

    #[test]
    fn empty_to_one_table() {
        let outcome =
            parse_ok("CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL);");
        assert_eq!(outcome.warnings, vec![]);
        let table = outcome.schema.table("users").unwrap();
        assert_eq!(table.columns.len(), 2);
        let id = table.column("id").unwrap();
        assert!(id.primary_key);
        assert!(!id.nullable);
        let email = table.column("email").unwrap();
        assert!(!email.nullable);
        assert_eq!(email.sql_type, "TEXT");
    }

    #[test]
    fn default_and_type_params_are_captured() {
        let outcome = parse_ok(
            "CREATE TABLE products (id INTEGER PRIMARY KEY, price NUMERIC(10,2) DEFAULT 0, name VARCHAR(50));",
        );
        let table = outcome.schema.table("products").unwrap();
        let price = table.column("price").unwrap();
        assert_eq!(price.sql_type, "NUMERIC(10,2)");
        assert_eq!(price.default.as_deref(), Some("0"));
        let name = table.column("name").unwrap();
        assert_eq!(name.sql_type, "VARCHAR(50)");
    }

    #[test]
    fn table_level_primary_key_constraint_sets_column_flags() {
        let outcome = parse_ok(
            "CREATE TABLE memberships (user_id INTEGER, org_id INTEGER, PRIMARY KEY (user_id, org_id));",
        );
        let table = outcome.schema.table("memberships").unwrap();
        assert!(table.column("user_id").unwrap().primary_key);
        assert!(table.column("org_id").unwrap().primary_key);
        let pk = table.primary_key().unwrap();
        assert_eq!(pk.columns, vec!["user_id", "org_id"]);
    }

    #[test]
    fn foreign_key_constraint_with_actions() {
        let outcome = parse_ok(
            "CREATE TABLE posts (id INTEGER PRIMARY KEY, author_id INTEGER, \
             CONSTRAINT fk_author FOREIGN KEY (author_id) REFERENCES users(id) \
             ON DELETE CASCADE ON UPDATE RESTRICT);",
        );
        let table = outcome.schema.table("posts").unwrap();
        let fk = table.constraint("fk_author").unwrap();
        assert_eq!(fk.kind, ConstraintKind::ForeignKey);
        let fkref = fk.foreign_key.as_ref().unwrap();
        assert_eq!(fkref.target_table, "users");
        assert_eq!(fkref.target_columns, vec!["id"]);
        assert!(matches!(fkref.on_delete, ForeignKeyAction::Cascade));
        assert!(matches!(fkref.on_update, ForeignKeyAction::Restrict));
    }

    #[test]
    fn standalone_index_attaches_to_table() {
        let outcome = parse_ok(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT); \
             CREATE UNIQUE INDEX idx_users_email ON users (email);",
        );
        let table = outcome.schema.table("users").unwrap();
        let idx = table.index("idx_users_email").unwrap();
        assert!(idx.unique);
        assert_eq!(idx.columns, vec!["email"]);
    }

    #[test]
    fn orphan_index_produces_warning_and_is_dropped() {
        let outcome = parse_ok("CREATE UNIQUE INDEX idx_ghost ON ghosts (id);");
        assert!(outcome.schema.tables().is_empty());
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].message.contains("orphan index"));
    }

    #[test]
    fn unsupported_statement_is_skipped_with_warning() {
        let outcome = parse_ok(
            "CREATE TABLE t (id INTEGER); CREATE TYPE mood AS ENUM ('happy', 'sad');",
        );
        assert_eq!(outcome.schema.tables().len(), 1);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].message.contains("unsupported"));
    }

    #[test]
    fn comments_are_ignored() {
        let outcome = parse_ok(
            "-- comment\nCREATE TABLE t (\n  id INTEGER PRIMARY KEY, /* inline */\n  name TEXT\n);",
        );
        let table = outcome.schema.table("t").unwrap();
        assert_eq!(table.columns.len(), 2);
    }

    #[test]
    fn quoted_identifiers_are_unquoted() {
        let outcome = parse_ok("CREATE TABLE \"Users\" (\"Id\" INTEGER PRIMARY KEY);");
        let table = outcome.schema.table("Users").unwrap();
        assert!(table.column("Id").is_some());
    }
}
