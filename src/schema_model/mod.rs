//! Canonical in-memory representation of a PostgreSQL schema (C1).
//!
//! Both the DDL parser (`parser`) and the live-catalog introspector
//! (`introspect`) produce this same shape, so the differ never has to know
//! which side of a diff came from disk and which came from the database.

mod normalize;

pub use normalize::{normalize_default, normalize_type};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A full schema snapshot: an ordered set of tables plus provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub version: u32,
    pub captured_at: DateTime<Utc>,
    tables: Vec<Table>,
}

impl Schema {
    pub fn new(version: u32, captured_at: DateTime<Utc>, mut tables: Vec<Table>) -> Self {
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            version,
            captured_at,
            tables,
        }
    }

    /// Tables in deterministic (name-ascending) emission order.
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }
}

/// Equality ignores `captured_at` and table order — only the structural
/// content of the schema matters (spec.md §3: "Table order is irrelevant
/// for equality").
impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version && self.tables == other.tables
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub indexes: Vec<Index>,
    pub constraints: Vec<Constraint>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            constraints: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn constraint(&self, name: &str) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.name == name)
    }

    pub fn primary_key(&self) -> Option<&Constraint> {
        self.constraints
            .iter()
            .find(|c| c.kind == ConstraintKind::PrimaryKey)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Normalized uppercase type token sequence, e.g. `VARCHAR(255)`.
    pub sql_type: String,
    pub nullable: bool,
    pub primary_key: bool,
    /// Normalized default expression text, if any.
    pub default: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: normalize_type(&sql_type.into()),
            nullable: true,
            primary_key: false,
            default: None,
        }
    }
}

/// Two columns are equal iff every field spec.md §4.3 lists as
/// modification-triggering is equal: normalized type, nullability,
/// normalized default, primary-key flag.
impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.sql_type == other.sql_type
            && self.nullable == other.nullable
            && self.primary_key == other.primary_key
            && self.default == other.default
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintKind {
    PrimaryKey,
    ForeignKey,
    Unique,
    Check,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForeignKeyAction {
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ForeignKeyAction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }

    pub fn from_catalog_code(code: &str) -> Self {
        match code {
            "c" => Self::Cascade,
            "n" => Self::SetNull,
            "d" => Self::SetDefault,
            "r" => Self::Restrict,
            _ => Self::NoAction,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    pub target_table: String,
    pub target_columns: Vec<String>,
    pub on_update: ForeignKeyAction,
    pub on_delete: ForeignKeyAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub name: String,
    pub kind: ConstraintKind,
    pub columns: Vec<String>,
    pub foreign_key: Option<ForeignKeyRef>,
    /// Raw expression text for `CHECK` constraints.
    pub check_expr: Option<String>,
}

impl Constraint {
    pub fn primary_key(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            kind: ConstraintKind::PrimaryKey,
            columns,
            foreign_key: None,
            check_expr: None,
        }
    }

    pub fn foreign_key(name: impl Into<String>, columns: Vec<String>, fk: ForeignKeyRef) -> Self {
        Self {
            name: name.into(),
            kind: ConstraintKind::ForeignKey,
            columns,
            foreign_key: Some(fk),
            check_expr: None,
        }
    }

    pub fn unique(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            kind: ConstraintKind::Unique,
            columns,
            foreign_key: None,
            check_expr: None,
        }
    }

    pub fn check(name: impl Into<String>, columns: Vec<String>, expr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ConstraintKind::Check,
            columns,
            foreign_key: None,
            check_expr: Some(expr.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_equality_ignores_table_order_and_timestamp() {
        let t1 = Table::new("a");
        let t2 = Table::new("b");
        let s1 = Schema::new(1, Utc::now(), vec![t1.clone(), t2.clone()]);
        let s2 = Schema::new(1, Utc::now(), vec![t2, t1]);
        assert_eq!(s1, s2);
    }

    #[test]
    fn tables_are_emitted_name_ascending() {
        let s = Schema::new(
            1,
            Utc::now(),
            vec![Table::new("zebra"), Table::new("apple")],
        );
        let names: Vec<&str> = s.tables().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["apple", "zebra"]);
    }

    #[test]
    fn column_equality_is_structural() {
        let mut a = Column::new("id", "integer");
        let mut b = Column::new("id", "INTEGER");
        assert_eq!(a, b);
        a.nullable = false;
        assert_ne!(a, b);
        b.nullable = false;
        assert_eq!(a, b);
    }
}
