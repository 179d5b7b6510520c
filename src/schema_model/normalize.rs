//! Type and default-expression normalization shared by the parser and the
//! introspector (spec.md §4.2, §9 "Default-value comparison").
//!
//! Both sides of a diff must agree on a canonical form or every column would
//! show up as spuriously modified.

/// Normalize a SQL type token sequence: uppercase the base type, preserve any
/// parameter list verbatim, and map well-known aliases to a single form.
pub fn normalize_type(raw: &str) -> String {
    let trimmed = raw.trim();
    let (base, params) = match trimmed.find('(') {
        Some(idx) => (&trimmed[..idx], &trimmed[idx..]),
        None => (trimmed, ""),
    };
    let base_upper = base.trim().to_uppercase();
    let canonical_base = match base_upper.as_str() {
        "INT" | "INT4" => "INTEGER",
        "INT2" | "SMALLINT" => "SMALLINT",
        "INT8" | "BIGINT" => "BIGINT",
        "BOOL" => "BOOLEAN",
        "SERIAL" | "SERIAL4" => "INTEGER",
        "BIGSERIAL" | "SERIAL8" => "BIGINT",
        "SMALLSERIAL" | "SERIAL2" => "SMALLINT",
        "VARCHAR" | "CHARACTER VARYING" => "VARCHAR",
        "CHAR" | "CHARACTER" => "CHAR",
        "DECIMAL" => "NUMERIC",
        "TIMESTAMP WITHOUT TIME ZONE" => "TIMESTAMP",
        "TIMESTAMP WITH TIME ZONE" | "TIMESTAMPTZ" => "TIMESTAMPTZ",
        "DOUBLE PRECISION" => "DOUBLE PRECISION",
        other => other,
    };
    format!("{canonical_base}{params}")
}

/// Whether the base type name implies an identity/serial default (nextval).
pub fn is_serial_alias(raw: &str) -> bool {
    matches!(
        raw.trim().to_uppercase().as_str(),
        "SERIAL" | "SERIAL4" | "BIGSERIAL" | "SERIAL8" | "SMALLSERIAL" | "SERIAL2"
    )
}

/// Normalize a default-value expression: strip redundant casts introduced by
/// Postgres's catalog round-trip (`'x'::text` -> `'x'`), collapse whitespace,
/// and lowercase common keyword functions for comparison stability.
pub fn normalize_default(raw: &str) -> String {
    let collapsed = collapse_whitespace(raw.trim());
    let stripped = strip_redundant_cast(&collapsed);
    lowercase_known_functions(&stripped)
}

fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_space = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    out
}

/// Strip a single trailing `::typename` cast, repeatedly, so
/// `'x'::character varying::text` reduces to `'x'`.
fn strip_redundant_cast(s: &str) -> String {
    let mut current = s.to_string();
    loop {
        match find_top_level_cast(&current) {
            Some(idx) => current.truncate(idx),
            None => break,
        }
    }
    current
}

/// Find the byte offset of a `::` that is not inside a quoted string.
fn find_top_level_cast(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut in_quote = false;
    let mut i = 0;
    let mut last_cast = None;
    while i + 1 < bytes.len() {
        match bytes[i] {
            b'\'' => in_quote = !in_quote,
            b':' if !in_quote && bytes[i + 1] == b':' => {
                last_cast = Some(i);
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }
    last_cast
}

fn lowercase_known_functions(s: &str) -> String {
    const KNOWN: &[&str] = &["NOW()", "CURRENT_TIMESTAMP", "CURRENT_DATE", "CURRENT_TIME"];
    let upper = s.to_uppercase();
    for f in KNOWN {
        if upper == *f {
            return f.to_lowercase();
        }
    }
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_map_to_canonical_form() {
        assert_eq!(normalize_type("int"), "INTEGER");
        assert_eq!(normalize_type("bool"), "BOOLEAN");
        assert_eq!(normalize_type("serial"), "INTEGER");
        assert_eq!(normalize_type("VARCHAR(255)"), "VARCHAR(255)");
        assert_eq!(normalize_type("numeric(10,2)"), "NUMERIC(10,2)");
    }

    #[test]
    fn redundant_cast_is_stripped() {
        assert_eq!(normalize_default("'x'::text"), "'x'");
        assert_eq!(normalize_default("'active'::character varying"), "'active'");
    }

    #[test]
    fn whitespace_is_collapsed() {
        assert_eq!(normalize_default("  'x'   ::text "), "'x'");
    }

    #[test]
    fn known_functions_are_lowercased() {
        assert_eq!(normalize_default("NOW()"), "now()");
        assert_eq!(normalize_default("now()"), "now()");
    }

    #[test]
    fn serial_alias_detection() {
        assert!(is_serial_alias("serial"));
        assert!(is_serial_alias("BIGSERIAL"));
        assert!(!is_serial_alias("integer"));
    }
}
