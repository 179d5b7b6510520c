//! Pure schema comparison (C4): `current` (what introspection found) versus
//! `desired` (what the DDL parser produced) in, out comes a `Diff` plus a
//! list of non-blocking warnings.
//!
//! Grounded on the `diff`/`diff_columns` shape in the waypoint schema module:
//! independent added/dropped/modified buckets per object kind, computed by
//! name-keyed set comparison rather than a generic tree diff.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::schema_model::{Column, Constraint, Index, Schema, Table};

#[derive(Debug, Error)]
pub enum DestructiveChangeError {
    #[error("dropping table '{0}' requires --allow-destructive")]
    TableDrop(String),
    #[error("dropping column '{table}.{column}' requires --allow-destructive")]
    ColumnDrop { table: String, column: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    TableDropped,
    ColumnDropped,
    UnsafeTypeWidening,
    NullabilityTightened,
    NonUniqueForeignKeyTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ColumnChange {
    pub table: String,
    pub added: Vec<Column>,
    pub dropped: Vec<Column>,
    pub modified: Vec<(Column, Column)>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct IndexChange {
    pub table: String,
    pub added: Vec<Index>,
    pub dropped: Vec<Index>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ConstraintChange {
    pub table: String,
    pub added: Vec<Constraint>,
    pub dropped: Vec<Constraint>,
}

/// A table present on both sides whose columns, indexes, or constraints
/// differ.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModifiedTable {
    pub name: String,
    pub columns: ColumnChange,
    pub indexes: IndexChange,
    pub constraints: ConstraintChange,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Diff {
    pub added_tables: Vec<Table>,
    pub dropped_tables: Vec<Table>,
    pub modified_tables: Vec<ModifiedTable>,
    pub warnings: Vec<Warning>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.added_tables.is_empty() && self.dropped_tables.is_empty() && self.modified_tables.is_empty()
    }
}

/// Compare `current` (the live database) against `desired` (the authored
/// schema file) and produce the changes required to reconcile the former
/// into the latter.
pub fn diff(current: &Schema, desired: &Schema) -> Diff {
    let mut result = Diff::default();

    let current_by_name: BTreeMap<&str, &Table> =
        current.tables().iter().map(|t| (t.name.as_str(), t)).collect();
    let desired_by_name: BTreeMap<&str, &Table> =
        desired.tables().iter().map(|t| (t.name.as_str(), t)).collect();

    for (name, table) in &desired_by_name {
        if !current_by_name.contains_key(name) {
            result.added_tables.push((*table).clone());
        }
    }

    for (name, table) in &current_by_name {
        if !desired_by_name.contains_key(name) {
            result.dropped_tables.push((*table).clone());
            result.warnings.push(Warning {
                kind: WarningKind::TableDropped,
                message: format!("table '{name}' is present in the database but not in the desired schema and will be dropped"),
            });
        }
    }

    for (name, desired_table) in &desired_by_name {
        let Some(current_table) = current_by_name.get(name) else {
            continue;
        };
        let columns = diff_columns(name, current_table, desired_table, &mut result.warnings);
        let indexes = diff_indexes(name, current_table, desired_table);
        let constraints = diff_constraints(name, current_table, desired_table, &mut result.warnings);

        let changed = !columns.added.is_empty()
            || !columns.dropped.is_empty()
            || !columns.modified.is_empty()
            || !indexes.added.is_empty()
            || !indexes.dropped.is_empty()
            || !constraints.added.is_empty()
            || !constraints.dropped.is_empty();

        if changed {
            result.modified_tables.push(ModifiedTable {
                name: (*name).to_string(),
                columns,
                indexes,
                constraints,
            });
        }
    }

    result.added_tables.sort_by(|a, b| a.name.cmp(&b.name));
    result.dropped_tables.sort_by(|a, b| a.name.cmp(&b.name));
    result.modified_tables.sort_by(|a, b| a.name.cmp(&b.name));

    result
}

fn diff_columns(
    table_name: &str,
    current: &Table,
    desired: &Table,
    warnings: &mut Vec<Warning>,
) -> ColumnChange {
    let mut change = ColumnChange {
        table: table_name.to_string(),
        ..Default::default()
    };

    let current_by_name: BTreeMap<&str, &Column> =
        current.columns.iter().map(|c| (c.name.as_str(), c)).collect();
    let desired_by_name: BTreeMap<&str, &Column> =
        desired.columns.iter().map(|c| (c.name.as_str(), c)).collect();

    for (name, col) in &desired_by_name {
        if !current_by_name.contains_key(name) {
            change.added.push((*col).clone());
        }
    }

    for (name, col) in &current_by_name {
        if !desired_by_name.contains_key(name) {
            change.dropped.push((*col).clone());
            warnings.push(Warning {
                kind: WarningKind::ColumnDropped,
                message: format!("column '{table_name}.{name}' will be dropped"),
            });
        }
    }

    for (name, desired_col) in &desired_by_name {
        if let Some(current_col) = current_by_name.get(name) {
            if current_col != desired_col {
                if is_unsafe_type_widening(&current_col.sql_type, &desired_col.sql_type) {
                    warnings.push(Warning {
                        kind: WarningKind::UnsafeTypeWidening,
                        message: format!(
                            "column '{table_name}.{name}' changes type from {} to {}, which may fail on existing data",
                            current_col.sql_type, desired_col.sql_type
                        ),
                    });
                }
                if current_col.nullable && !desired_col.nullable {
                    warnings.push(Warning {
                        kind: WarningKind::NullabilityTightened,
                        message: format!(
                            "column '{table_name}.{name}' becomes NOT NULL; existing NULL values will cause the migration to fail"
                        ),
                    });
                }
                change.modified.push(((*current_col).clone(), (*desired_col).clone()));
            }
        }
    }

    change.added.sort_by(|a, b| a.name.cmp(&b.name));
    change.dropped.sort_by(|a, b| a.name.cmp(&b.name));
    change.modified.sort_by(|a, b| a.0.name.cmp(&b.0.name));
    change
}

/// A type change is "unsafe widening" when narrowing the reverse direction
/// could lose data: e.g. VARCHAR(50) -> VARCHAR(10), or a wholesale type
/// family change. Same-family growth (VARCHAR(10) -> VARCHAR(50)) is safe.
/// Integer widening chain where a later type is a strict superset of an
/// earlier one's range: moving right is always safe.
const INTEGER_WIDENING_CHAIN: &[&str] = &["SMALLINT", "INTEGER", "BIGINT"];

fn is_unsafe_type_widening(current: &str, desired: &str) -> bool {
    if current == desired {
        return false;
    }
    let (current_base, current_len) = split_type_param(current);
    let (desired_base, desired_len) = split_type_param(desired);

    if current_base != desired_base {
        if is_safe_cross_base_widening(current_base, desired_base) {
            return false;
        }
        return true;
    }
    match (current_len, desired_len) {
        (Some(c), Some(d)) => d < c,
        (Some(_), None) => false,
        (None, Some(_)) => false,
        (None, None) => false,
    }
}

/// Cross-base transitions known to never truncate existing data:
/// `SMALLINT -> INTEGER -> BIGINT` and `VARCHAR(n) -> TEXT`.
fn is_safe_cross_base_widening(current_base: &str, desired_base: &str) -> bool {
    if current_base == "VARCHAR" && desired_base == "TEXT" {
        return true;
    }
    let current_rank = INTEGER_WIDENING_CHAIN.iter().position(|b| *b == current_base);
    let desired_rank = INTEGER_WIDENING_CHAIN.iter().position(|b| *b == desired_base);
    matches!((current_rank, desired_rank), (Some(c), Some(d)) if d >= c)
}

fn split_type_param(sql_type: &str) -> (&str, Option<u32>) {
    match sql_type.find('(') {
        Some(idx) => {
            let base = &sql_type[..idx];
            let inside = sql_type[idx + 1..].trim_end_matches(')');
            let first_param = inside.split(',').next().unwrap_or("");
            (base, first_param.trim().parse::<u32>().ok())
        }
        None => (sql_type, None),
    }
}

fn diff_indexes(table_name: &str, current: &Table, desired: &Table) -> IndexChange {
    let mut change = IndexChange {
        table: table_name.to_string(),
        ..Default::default()
    };

    let current_by_name: BTreeMap<&str, &Index> =
        current.indexes.iter().map(|i| (i.name.as_str(), i)).collect();
    let desired_by_name: BTreeMap<&str, &Index> =
        desired.indexes.iter().map(|i| (i.name.as_str(), i)).collect();

    for (name, idx) in &desired_by_name {
        match current_by_name.get(name) {
            Some(current_idx) if *current_idx == *idx => {}
            Some(_) => {
                // Changed definition: drop and recreate under the same name.
                change.dropped.push((*current_by_name[name]).clone());
                change.added.push((*idx).clone());
            }
            None => change.added.push((*idx).clone()),
        }
    }
    for (name, idx) in &current_by_name {
        if !desired_by_name.contains_key(name) {
            change.dropped.push((*idx).clone());
        }
    }

    change.added.sort_by(|a, b| a.name.cmp(&b.name));
    change.dropped.sort_by(|a, b| a.name.cmp(&b.name));
    change
}

fn diff_constraints(
    table_name: &str,
    current: &Table,
    desired: &Table,
    warnings: &mut Vec<Warning>,
) -> ConstraintChange {
    let mut change = ConstraintChange {
        table: table_name.to_string(),
        ..Default::default()
    };

    let current_by_name: BTreeMap<&str, &Constraint> =
        current.constraints.iter().map(|c| (c.name.as_str(), c)).collect();
    let desired_by_name: BTreeMap<&str, &Constraint> =
        desired.constraints.iter().map(|c| (c.name.as_str(), c)).collect();

    for (name, constraint) in &desired_by_name {
        match current_by_name.get(name) {
            Some(current_constraint) if *current_constraint == *constraint => {}
            Some(_) => {
                change.dropped.push((*current_by_name[name]).clone());
                change.added.push((*constraint).clone());
            }
            None => {
                if let Some(fk) = &constraint.foreign_key {
                    if !target_is_unique(desired, &fk.target_table, &fk.target_columns) {
                        warnings.push(Warning {
                            kind: WarningKind::NonUniqueForeignKeyTarget,
                            message: format!(
                                "foreign key '{table_name}.{name}' references {}({}) which is not unique",
                                fk.target_table,
                                fk.target_columns.join(", ")
                            ),
                        });
                    }
                }
                change.added.push((*constraint).clone());
            }
        }
    }
    for (name, constraint) in &current_by_name {
        if !desired_by_name.contains_key(name) {
            change.dropped.push((*constraint).clone());
        }
    }

    change.added.sort_by(|a, b| a.name.cmp(&b.name));
    change.dropped.sort_by(|a, b| a.name.cmp(&b.name));
    change
}

fn target_is_unique(schema: &Schema, table_name: &str, columns: &[String]) -> bool {
    let Some(table) = schema.table(table_name) else {
        return false;
    };
    table.constraints.iter().any(|c| {
        matches!(
            c.kind,
            crate::schema_model::ConstraintKind::PrimaryKey | crate::schema_model::ConstraintKind::Unique
        ) && c.columns == columns
    })
}

/// Reject a diff containing any destructive change unless explicitly
/// allowed. Called by the generator/executor before DDL is emitted for an
/// interactive or unattended run (spec.md §4.3, "Non-goals" carve-out for
/// `--allow-destructive`).
pub fn reject_destructive(diff: &Diff, allow_destructive: bool) -> Result<(), DestructiveChangeError> {
    if allow_destructive {
        return Ok(());
    }
    if let Some(table) = diff.dropped_tables.first() {
        return Err(DestructiveChangeError::TableDrop(table.name.clone()));
    }
    for modified in &diff.modified_tables {
        if let Some(col) = modified.columns.dropped.first() {
            return Err(DestructiveChangeError::ColumnDrop {
                table: modified.name.clone(),
                column: col.name.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn schema(tables: Vec<Table>) -> Schema {
        Schema::new(1, Utc::now(), tables)
    }

    #[test]
    fn new_table_is_added() {
        let current = schema(vec![]);
        let mut t = Table::new("users");
        t.columns.push(Column::new("id", "integer"));
        let desired = schema(vec![t]);

        let d = diff(&current, &desired);
        assert_eq!(d.added_tables.len(), 1);
        assert_eq!(d.added_tables[0].name, "users");
        assert!(d.dropped_tables.is_empty());
    }

    #[test]
    fn missing_table_is_dropped_with_warning() {
        let mut t = Table::new("legacy");
        t.columns.push(Column::new("id", "integer"));
        let current = schema(vec![t]);
        let desired = schema(vec![]);

        let d = diff(&current, &desired);
        assert_eq!(d.dropped_tables.len(), 1);
        assert!(d.warnings.iter().any(|w| w.kind == WarningKind::TableDropped));
    }

    #[test]
    fn added_and_dropped_and_modified_columns() {
        let mut current_table = Table::new("users");
        current_table.columns.push(Column::new("id", "integer"));
        current_table.columns.push(Column::new("legacy_flag", "boolean"));
        let mut desired_table = Table::new("users");
        desired_table.columns.push(Column::new("id", "bigint"));
        desired_table.columns.push(Column::new("email", "text"));

        let current = schema(vec![current_table]);
        let desired = schema(vec![desired_table]);

        let d = diff(&current, &desired);
        assert_eq!(d.modified_tables.len(), 1);
        let m = &d.modified_tables[0];
        assert_eq!(m.columns.added.len(), 1);
        assert_eq!(m.columns.added[0].name, "email");
        assert_eq!(m.columns.dropped.len(), 1);
        assert_eq!(m.columns.dropped[0].name, "legacy_flag");
        assert_eq!(m.columns.modified.len(), 1);
        assert_eq!(m.columns.modified[0].0.name, "id");
    }

    #[test]
    fn narrowing_varchar_is_unsafe_widening_warning() {
        let mut current_table = Table::new("t");
        current_table.columns.push(Column::new("name", "varchar(50)"));
        let mut desired_table = Table::new("t");
        desired_table.columns.push(Column::new("name", "varchar(10)"));

        let d = diff(&schema(vec![current_table]), &schema(vec![desired_table]));
        assert!(d.warnings.iter().any(|w| w.kind == WarningKind::UnsafeTypeWidening));
    }

    #[test]
    fn integer_and_varchar_to_text_widening_is_safe() {
        assert!(!is_unsafe_type_widening("SMALLINT", "INTEGER"));
        assert!(!is_unsafe_type_widening("SMALLINT", "BIGINT"));
        assert!(!is_unsafe_type_widening("INTEGER", "BIGINT"));
        assert!(!is_unsafe_type_widening("VARCHAR(50)", "TEXT"));
        assert!(is_unsafe_type_widening("BIGINT", "SMALLINT"));
        assert!(is_unsafe_type_widening("INTEGER", "BOOLEAN"));
    }

    #[test]
    fn safe_widening_columns_produce_no_warning() {
        let mut current_table = Table::new("t");
        current_table.columns.push(Column::new("count", "smallint"));
        let mut desired_table = Table::new("t");
        desired_table.columns.push(Column::new("count", "bigint"));

        let d = diff(&schema(vec![current_table]), &schema(vec![desired_table]));
        assert!(!d.warnings.iter().any(|w| w.kind == WarningKind::UnsafeTypeWidening));
    }

    #[test]
    fn tightening_nullability_warns() {
        let mut current_table = Table::new("t");
        let mut col = Column::new("name", "text");
        col.nullable = true;
        current_table.columns.push(col);
        let mut desired_table = Table::new("t");
        let mut col2 = Column::new("name", "text");
        col2.nullable = false;
        desired_table.columns.push(col2);

        let d = diff(&schema(vec![current_table]), &schema(vec![desired_table]));
        assert!(d
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::NullabilityTightened));
    }

    #[test]
    fn reject_destructive_blocks_table_drop_by_default() {
        let mut t = Table::new("legacy");
        t.columns.push(Column::new("id", "integer"));
        let d = diff(&schema(vec![t]), &schema(vec![]));
        assert!(reject_destructive(&d, false).is_err());
        assert!(reject_destructive(&d, true).is_ok());
    }

    #[test]
    fn identical_schemas_produce_empty_diff() {
        let mut t = Table::new("users");
        t.columns.push(Column::new("id", "integer"));
        let d = diff(&schema(vec![t.clone()]), &schema(vec![t]));
        assert!(d.is_empty());
        assert!(d.warnings.is_empty());
    }
}
