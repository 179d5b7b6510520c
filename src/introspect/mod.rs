//! Live-catalog introspection (C3): read the current shape of a PostgreSQL
//! database out of `information_schema` and `pg_catalog` and assemble it
//! into the same `Schema` shape the DDL parser produces.
//!
//! Grounded on the `introspect_tables`/`introspect_indexes`/
//! `introspect_constraints` queries in the waypoint schema module, adapted
//! to populate `schema_model::Table` instead of a standalone snapshot type.
//! Runs entirely inside one `REPEATABLE READ` transaction so every catalog
//! query sees the same point-in-time view of the database.

use std::collections::HashMap;

use tracing::debug;

use crate::schema_model::{
    Column, Constraint, ForeignKeyAction, ForeignKeyRef, Index, Schema, Table,
};

/// Introspect the `public` schema of the database reachable through `client`,
/// opening a `REPEATABLE READ` transaction for the duration so concurrent DDL
/// elsewhere can't produce an inconsistent snapshot.
pub async fn introspect(
    client: &mut tokio_postgres::Client,
) -> Result<Schema, tokio_postgres::Error> {
    let tx = client.transaction().await?;
    tx.batch_execute("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
        .await?;

    let mut tables = introspect_tables(&tx).await?;
    introspect_columns(&tx, &mut tables).await?;
    introspect_indexes(&tx, &mut tables).await?;
    introspect_constraints(&tx, &mut tables).await?;

    tx.commit().await?;

    debug!(table_count = tables.len(), "introspection complete");
    Ok(Schema::new(1, chrono::Utc::now(), tables))
}

async fn introspect_tables(
    tx: &tokio_postgres::Transaction<'_>,
) -> Result<Vec<Table>, tokio_postgres::Error> {
    let rows = tx
        .query(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = 'public' AND table_type = 'BASE TABLE'",
            &[],
        )
        .await?;

    Ok(rows
        .iter()
        .map(|row| Table::new(row.get::<_, String>("table_name")))
        .collect())
}

async fn introspect_columns(
    tx: &tokio_postgres::Transaction<'_>,
    tables: &mut [Table],
) -> Result<(), tokio_postgres::Error> {
    let rows = tx
        .query(
            "SELECT table_name, column_name, data_type, udt_name, \
                    character_maximum_length, numeric_precision, numeric_scale, \
                    is_nullable, column_default \
             FROM information_schema.columns \
             WHERE table_schema = 'public' \
             ORDER BY table_name, ordinal_position",
            &[],
        )
        .await?;

    let mut by_table: HashMap<String, Vec<Column>> = HashMap::new();

    for row in &rows {
        let table_name: String = row.get("table_name");
        let column_name: String = row.get("column_name");
        let data_type: String = row.get("data_type");
        let udt_name: String = row.get("udt_name");
        let max_len: Option<i32> = row.get("character_maximum_length");
        let precision: Option<i32> = row.get("numeric_precision");
        let scale: Option<i32> = row.get("numeric_scale");
        let is_nullable: String = row.get("is_nullable");
        let default: Option<String> = row.get("column_default");

        let sql_type = render_sql_type(&data_type, &udt_name, max_len, precision, scale);

        let mut column = Column::new(column_name, sql_type);
        column.nullable = is_nullable == "YES";
        column.default = default.map(|d| crate::schema_model::normalize_default(&d));

        by_table.entry(table_name).or_default().push(column);
    }

    for table in tables.iter_mut() {
        if let Some(cols) = by_table.remove(&table.name) {
            table.columns = cols;
        }
    }
    Ok(())
}

/// `information_schema.columns.data_type` is a human-readable description
/// ("character varying") rather than the short form a schema author would
/// write; `udt_name` carries the short Postgres-internal name instead
/// (`varchar`, `int4`, ...). Prefer `udt_name` and reattach size/precision
/// parameters so the result matches what `normalize_type` produces for
/// parsed DDL.
fn render_sql_type(
    data_type: &str,
    udt_name: &str,
    max_len: Option<i32>,
    precision: Option<i32>,
    scale: Option<i32>,
) -> String {
    let base = match udt_name {
        "varchar" => "VARCHAR".to_string(),
        "bpchar" => "CHAR".to_string(),
        "int2" => "SMALLINT".to_string(),
        "int4" => "INTEGER".to_string(),
        "int8" => "BIGINT".to_string(),
        "bool" => "BOOLEAN".to_string(),
        "numeric" => "NUMERIC".to_string(),
        "timestamp" => "TIMESTAMP".to_string(),
        "timestamptz" => "TIMESTAMPTZ".to_string(),
        _ => data_type
            .to_uppercase()
            .replace("WITHOUT TIME ZONE", "")
            .trim()
            .to_string(),
    };

    match (base.as_str(), max_len, precision, scale) {
        ("VARCHAR", Some(len), _, _) | ("CHAR", Some(len), _, _) => format!("{base}({len})"),
        ("NUMERIC", _, Some(p), Some(s)) if s != 0 => format!("{base}({p},{s})"),
        ("NUMERIC", _, Some(p), _) => format!("{base}({p})"),
        _ => base,
    }
}

async fn introspect_indexes(
    tx: &tokio_postgres::Transaction<'_>,
    tables: &mut [Table],
) -> Result<(), tokio_postgres::Error> {
    let rows = tx
        .query(
            "SELECT t.relname AS table_name, i.relname AS index_name, \
                    ix.indisunique AS is_unique, ix.indisprimary AS is_primary, \
                    array_agg(a.attname ORDER BY array_position(ix.indkey, a.attnum)) AS columns \
             FROM pg_index ix \
             JOIN pg_class t ON t.oid = ix.indrelid \
             JOIN pg_class i ON i.oid = ix.indexrelid \
             JOIN pg_namespace n ON n.oid = t.relnamespace \
             JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey) \
             WHERE n.nspname = 'public' \
             GROUP BY t.relname, i.relname, ix.indisunique, ix.indisprimary",
            &[],
        )
        .await?;

    let mut by_table: HashMap<String, Vec<Index>> = HashMap::new();
    for row in &rows {
        let is_primary: bool = row.get("is_primary");
        if is_primary {
            // Primary key indexes are represented as constraints, not
            // standalone indexes.
            continue;
        }
        let table_name: String = row.get("table_name");
        let index = Index {
            name: row.get("index_name"),
            columns: row.get("columns"),
            unique: row.get("is_unique"),
        };
        by_table.entry(table_name).or_default().push(index);
    }

    for table in tables.iter_mut() {
        if let Some(indexes) = by_table.remove(&table.name) {
            table.indexes = indexes;
        }
    }
    Ok(())
}

async fn introspect_constraints(
    tx: &tokio_postgres::Transaction<'_>,
    tables: &mut [Table],
) -> Result<(), tokio_postgres::Error> {
    let rows = tx
        .query(
            "SELECT c.conname AS name, c.contype AS kind, t.relname AS table_name, \
                    array_agg(DISTINCT a.attname) FILTER (WHERE a.attname IS NOT NULL) AS columns, \
                    ft.relname AS target_table, \
                    array_agg(DISTINCT fa.attname) FILTER (WHERE fa.attname IS NOT NULL) AS target_columns, \
                    c.confupdtype AS on_update, c.confdeltype AS on_delete, \
                    pg_get_constraintdef(c.oid) AS definition \
             FROM pg_constraint c \
             JOIN pg_class t ON t.oid = c.conrelid \
             JOIN pg_namespace n ON n.oid = t.relnamespace \
             LEFT JOIN pg_class ft ON ft.oid = c.confrelid \
             LEFT JOIN unnest(c.conkey) WITH ORDINALITY AS ck(attnum, ord) ON true \
             LEFT JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ck.attnum \
             LEFT JOIN unnest(c.confkey) WITH ORDINALITY AS fck(attnum, ord) ON true \
             LEFT JOIN pg_attribute fa ON fa.attrelid = c.confrelid AND fa.attnum = fck.attnum \
             WHERE n.nspname = 'public' AND c.contype IN ('p', 'f', 'u', 'c') \
             GROUP BY c.conname, c.contype, t.relname, ft.relname, c.confupdtype, c.confdeltype, c.oid",
            &[],
        )
        .await?;

    let mut by_table: HashMap<String, Vec<Constraint>> = HashMap::new();
    for row in &rows {
        let kind: i8 = row.get::<_, i8>("kind");
        let kind = kind as u8 as char;
        let table_name: String = row.get("table_name");
        let name: String = row.get("name");
        let columns: Vec<String> = row.get::<_, Option<Vec<String>>>("columns").unwrap_or_default();

        let constraint = match kind {
            'p' => Constraint::primary_key(name, columns),
            'u' => Constraint::unique(name, columns),
            'c' => {
                let def: String = row.get("definition");
                let expr = extract_check_expr(&def);
                Constraint::check(name, columns, expr)
            }
            'f' => {
                let target_table: String = row.get("target_table");
                let target_columns: Vec<String> =
                    row.get::<_, Option<Vec<String>>>("target_columns").unwrap_or_default();
                let on_update: i8 = row.get("on_update");
                let on_delete: i8 = row.get("on_delete");
                Constraint::foreign_key(
                    name,
                    columns,
                    ForeignKeyRef {
                        target_table,
                        target_columns,
                        on_update: ForeignKeyAction::from_catalog_code(&(on_update as u8 as char).to_string()),
                        on_delete: ForeignKeyAction::from_catalog_code(&(on_delete as u8 as char).to_string()),
                    },
                )
            }
            _ => continue,
        };

        by_table.entry(table_name).or_default().push(constraint);
    }

    for table in tables.iter_mut() {
        if let Some(constraints) = by_table.remove(&table.name) {
            for constraint in &constraints {
                if constraint.kind == crate::schema_model::ConstraintKind::PrimaryKey {
                    for col_name in &constraint.columns {
                        if let Some(col) = table.columns.iter_mut().find(|c| &c.name == col_name) {
                            col.primary_key = true;
                        }
                    }
                }
            }
            table.constraints = constraints;
        }
    }
    Ok(())
}

/// `pg_get_constraintdef` renders a check constraint as `CHECK (<expr>)`;
/// pull the inner expression back out.
fn extract_check_expr(definition: &str) -> String {
    if let Some((_, inside, _)) = crate::parser::split_parenthesized(definition) {
        inside.trim().to_string()
    } else {
        definition.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_sql_type_prefers_udt_name_and_reattaches_params() {
        assert_eq!(
            render_sql_type("character varying", "varchar", Some(50), None, None),
            "VARCHAR(50)"
        );
        assert_eq!(
            render_sql_type("numeric", "numeric", None, Some(10), Some(2)),
            "NUMERIC(10,2)"
        );
        assert_eq!(
            render_sql_type("numeric", "numeric", None, Some(10), Some(0)),
            "NUMERIC(10)"
        );
        assert_eq!(
            render_sql_type("integer", "int4", None, None, None),
            "INTEGER"
        );
    }

    #[test]
    fn extract_check_expr_strips_wrapping_parens() {
        assert_eq!(extract_check_expr("CHECK ((price > (0)::numeric))"), "(price > (0)::numeric)");
    }
}
