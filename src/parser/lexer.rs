//! Comment stripping and depth-aware statement/item splitting.
//!
//! Shared by the top-level statement splitter (used by both the DDL parser
//! and, per spec.md §4.6, the executor's per-statement `PREPARE` validation)
//! and the column/constraint item splitter used inside a `CREATE TABLE` body.

/// A substring of the original text plus the byte offset it started at,
/// so callers can report parse errors pinned to a location in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub offset: usize,
    pub text: T,
}

/// Strip `--` line comments and `/* ... */` block comments, respecting
/// single-quoted strings and double-quoted identifiers. Comment markers are
/// replaced with a single space each so the resulting byte offsets of
/// non-comment text are unchanged.
pub fn strip_comments(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;
    let mut in_single = false;
    let mut in_double = false;

    while i < bytes.len() {
        let c = bytes[i] as char;
        if in_single {
            out.push(c);
            if c == '\'' {
                in_single = false;
            }
            i += 1;
            continue;
        }
        if in_double {
            out.push(c);
            if c == '"' {
                in_double = false;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' => {
                in_single = true;
                out.push(c);
                i += 1;
            }
            '"' => {
                in_double = true;
                out.push(c);
                i += 1;
            }
            '-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    out.push(' ');
                    i += 1;
                }
            }
            '/' if bytes.get(i + 1) == Some(&b'*') => {
                out.push(' ');
                out.push(' ');
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    out.push(if bytes[i] == b'\n' { '\n' } else { ' ' });
                    i += 1;
                }
                if i < bytes.len() {
                    out.push(' ');
                    out.push(' ');
                    i += 2;
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Split `text` on top-level `;` characters, respecting quoted strings and
/// balanced parentheses. Empty (whitespace-only) segments are dropped.
pub fn split_statements(text: &str) -> Vec<Spanned<String>> {
    split_on(text, ';', true)
}

/// Split `text` on top-level `,` characters, respecting quoted strings and
/// balanced parentheses. Used to split a `CREATE TABLE` body into column and
/// constraint items.
pub fn split_top_level_commas(text: &str) -> Vec<Spanned<String>> {
    split_on(text, ',', false)
}

fn split_on(text: &str, sep: char, keep_offsets_from_zero: bool) -> Vec<Spanned<String>> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut in_single = false;
    let mut in_double = false;
    let mut start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        let c = bytes[i] as char;
        if in_single {
            if c == '\'' {
                in_single = false;
            }
            i += 1;
            continue;
        }
        if in_double {
            if c == '"' {
                in_double = false;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' => in_single = true,
            '"' => in_double = true,
            '(' => depth += 1,
            ')' => depth -= 1,
            _ if c == sep && depth == 0 => {
                push_segment(&mut out, text, start, i, keep_offsets_from_zero);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    push_segment(&mut out, text, start, bytes.len(), keep_offsets_from_zero);
    out
}

fn push_segment(
    out: &mut Vec<Spanned<String>>,
    text: &str,
    start: usize,
    end: usize,
    _keep_offsets_from_zero: bool,
) {
    if start >= end {
        return;
    }
    let raw = &text[start..end];
    let leading_ws = raw.len() - raw.trim_start().len();
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return;
    }
    out.push(Spanned {
        offset: start + leading_ws,
        text: trimmed.to_string(),
    });
}

/// Extract the substring inside the outermost balanced parentheses starting
/// at the first `(` found, respecting quotes. Returns `(before, inside,
/// after)`.
pub fn split_parenthesized(s: &str) -> Option<(&str, &str, &str)> {
    let open = s.find('(')?;
    let bytes = s.as_bytes();
    let mut depth = 0i32;
    let mut in_single = false;
    let mut in_double = false;
    let mut close = None;
    let mut i = open;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if in_single {
            if c == '\'' {
                in_single = false;
            }
        } else if in_double {
            if c == '"' {
                in_double = false;
            }
        } else {
            match c {
                '\'' => in_single = true,
                '"' => in_double = true,
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(i);
                        break;
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    let close = close?;
    Some((&s[..open], &s[open + 1..close], &s[close + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_line_and_block_comments_but_not_quoted_text() {
        let sql = "CREATE TABLE t (a INT); -- trailing comment\n/* block */ CREATE TABLE u (b TEXT DEFAULT '--not a comment');";
        let stripped = strip_comments(sql);
        assert!(!stripped.contains("trailing comment"));
        assert!(!stripped.contains("block"));
        assert!(stripped.contains("'--not a comment'"));
    }

    #[test]
    fn splits_statements_respecting_parens_and_quotes() {
        let sql = "CREATE TABLE t (a INT, b TEXT DEFAULT 'x;y'); CREATE TABLE u (c INT);";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].text.starts_with("CREATE TABLE t"));
        assert!(stmts[1].text.starts_with("CREATE TABLE u"));
    }

    #[test]
    fn splits_top_level_commas_inside_body() {
        let body = "a INT, b VARCHAR(10,2) DEFAULT 'x,y', c TEXT";
        let items = split_top_level_commas(body);
        assert_eq!(items.len(), 3);
        assert_eq!(items[1].text, "b VARCHAR(10,2) DEFAULT 'x,y'");
    }

    #[test]
    fn extracts_parenthesized_body() {
        let (before, inside, after) = split_parenthesized("users (id INT, name TEXT);").unwrap();
        assert_eq!(before, "users ");
        assert_eq!(inside, "id INT, name TEXT");
        assert_eq!(after, ";");
    }
}
