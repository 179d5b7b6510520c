//! Diff → ordered DDL text (C5).
//!
//! Statement order follows spec.md §4.4 exactly, because getting this wrong
//! produces DDL that fails against a live database even though every
//! individual statement is correct in isolation:
//!
//!   1. Drop foreign keys that reference a column or table being dropped
//!   2. Drop indexes on columns being dropped
//!   3. Drop tables, in reverse topological (dependent-first) order
//!   4. Create new tables, without their foreign key constraints — so two
//!      new tables with a forward or cyclic reference never require one to
//!      exist before the other, and no topological sort is needed among them
//!   5. Per modified table: add columns, alter columns (type, then default,
//!      then nullability), add indexes, add non-FK constraints, then drop
//!      non-FK constraints, indexes, and columns
//!   6. Add every new foreign key — for both newly created and modified
//!      tables — last, once every table and column it references exists

use std::collections::{HashMap, HashSet};

use crate::differ::{Diff, ModifiedTable};
use crate::schema_model::{Column, Constraint, ConstraintKind, Index, Table};

/// Render a `Diff` as a single ordered DDL script, with a leading summary
/// comment describing the change in human terms (mirrors waypoint's
/// `to_ddl`, which prefixes generated output with a description of intent).
pub fn generate_ddl(diff: &Diff) -> String {
    let mut out = String::new();

    if diff.is_empty() {
        out.push_str("-- no changes\n");
        return out;
    }

    out.push_str(&summary_comment(diff));
    out.push('\n');

    for stmt in drop_foreign_keys(diff) {
        emit(&mut out, &stmt);
    }
    for stmt in drop_indexes_on_dropped_columns(diff) {
        emit(&mut out, &stmt);
    }
    for stmt in drop_tables(diff) {
        emit(&mut out, &stmt);
    }
    for stmt in create_tables(diff) {
        emit(&mut out, &stmt);
    }
    for modified in &diff.modified_tables {
        for stmt in alter_table(modified) {
            emit(&mut out, &stmt);
        }
    }
    for stmt in add_foreign_keys(diff) {
        emit(&mut out, &stmt);
    }

    out
}

fn emit(out: &mut String, stmt: &str) {
    out.push_str(stmt);
    out.push_str(";\n");
}

fn summary_comment(diff: &Diff) -> String {
    format!(
        "-- {} table(s) added, {} dropped, {} modified\n",
        diff.added_tables.len(),
        diff.dropped_tables.len(),
        diff.modified_tables.len()
    )
}

fn quote_ident(name: &str) -> String {
    format!("\"{name}\"")
}

// Step 1: drop foreign keys on dropped tables/columns, and foreign keys
// being replaced on modified tables, before anything they reference is
// removed.
fn drop_foreign_keys(diff: &Diff) -> Vec<String> {
    let mut stmts = Vec::new();
    for table in &diff.dropped_tables {
        for c in table.constraints.iter().filter(|c| c.kind == ConstraintKind::ForeignKey) {
            stmts.push(format!(
                "ALTER TABLE {} DROP CONSTRAINT {}",
                quote_ident(&table.name),
                quote_ident(&c.name)
            ));
        }
    }
    for modified in &diff.modified_tables {
        for c in modified
            .constraints
            .dropped
            .iter()
            .filter(|c| c.kind == ConstraintKind::ForeignKey)
        {
            stmts.push(format!(
                "ALTER TABLE {} DROP CONSTRAINT {}",
                quote_ident(&modified.name),
                quote_ident(&c.name)
            ));
        }
    }
    stmts
}

// Step 2: drop any index that lives on a column being dropped, so the
// column drop in step 5 doesn't fail on a dependent index.
fn drop_indexes_on_dropped_columns(diff: &Diff) -> Vec<String> {
    let mut stmts = Vec::new();
    for modified in &diff.modified_tables {
        let dropped_cols: HashSet<&str> =
            modified.columns.dropped.iter().map(|c| c.name.as_str()).collect();
        for idx in &modified.indexes.dropped {
            if idx.columns.iter().any(|c| dropped_cols.contains(c.as_str())) {
                stmts.push(format!("DROP INDEX {}", quote_ident(&idx.name)));
            }
        }
    }
    stmts
}

// Step 3: drop tables in reverse dependency order, so a table is dropped
// only after anything that references it.
fn drop_tables(diff: &Diff) -> Vec<String> {
    let order = topological_order(&diff.dropped_tables, |t| t.name.clone());
    order
        .into_iter()
        .rev()
        .map(|name| format!("DROP TABLE {}", quote_ident(&name)))
        .collect()
}

// Step 4: create new tables. Foreign keys are deferred to step 6, so there
// is no creation-order dependency between new tables; sorted by name for
// deterministic output.
fn create_tables(diff: &Diff) -> Vec<String> {
    let mut tables: Vec<&Table> = diff.added_tables.iter().collect();
    tables.sort_by(|a, b| a.name.cmp(&b.name));
    tables.into_iter().map(create_table_statement).collect()
}

fn create_table_statement(table: &Table) -> String {
    let mut parts: Vec<String> = table.columns.iter().map(column_definition).collect();

    for c in table.constraints.iter().filter(|c| c.kind != ConstraintKind::ForeignKey) {
        parts.push(constraint_definition(c));
    }

    format!(
        "CREATE TABLE {} (\n  {}\n)",
        quote_ident(&table.name),
        parts.join(",\n  ")
    )
}

fn column_definition(col: &Column) -> String {
    let mut def = format!("{} {}", quote_ident(&col.name), col.sql_type);
    if !col.nullable {
        def.push_str(" NOT NULL");
    }
    match col.default.as_deref() {
        // Sentinel the parser sets for a SERIAL-typed column (see
        // parser::parse_column): the actual auto-increment mechanism, not a
        // literal default value.
        Some("nextval") => def.push_str(" GENERATED BY DEFAULT AS IDENTITY"),
        Some(default) => def.push_str(&format!(" DEFAULT {default}")),
        None => {}
    }
    def
}

fn constraint_definition(c: &Constraint) -> String {
    match c.kind {
        ConstraintKind::PrimaryKey => format!(
            "CONSTRAINT {} PRIMARY KEY ({})",
            quote_ident(&c.name),
            quoted_column_list(&c.columns)
        ),
        ConstraintKind::Unique => format!(
            "CONSTRAINT {} UNIQUE ({})",
            quote_ident(&c.name),
            quoted_column_list(&c.columns)
        ),
        ConstraintKind::Check => format!(
            "CONSTRAINT {} CHECK ({})",
            quote_ident(&c.name),
            c.check_expr.as_deref().unwrap_or("true")
        ),
        ConstraintKind::ForeignKey => foreign_key_definition(c),
    }
}

fn foreign_key_definition(c: &Constraint) -> String {
    let fk = c
        .foreign_key
        .as_ref()
        .expect("ForeignKey constraint missing ForeignKeyRef");
    format!(
        "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON UPDATE {} ON DELETE {}",
        quote_ident(&c.name),
        quoted_column_list(&c.columns),
        quote_ident(&fk.target_table),
        quoted_column_list(&fk.target_columns),
        fk.on_update.as_sql(),
        fk.on_delete.as_sql(),
    )
}

fn quoted_column_list(columns: &[String]) -> String {
    columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ")
}

// Step 5: per modified table, add columns, alter columns, add indexes, add
// non-FK constraints, then drop non-FK constraints, indexes, and columns.
// Foreign keys are deferred to step 6.
fn alter_table(modified: &ModifiedTable) -> Vec<String> {
    let mut stmts = Vec::new();
    let table_ref = quote_ident(&modified.name);

    for col in &modified.columns.added {
        stmts.push(format!(
            "ALTER TABLE {table_ref} ADD COLUMN {}",
            column_definition(col)
        ));
    }

    for (before, after) in &modified.columns.modified {
        stmts.extend(alter_column(&table_ref, before, after));
    }

    for idx in &modified.indexes.added {
        stmts.push(create_index_statement(&modified.name, idx));
    }

    for c in modified
        .constraints
        .added
        .iter()
        .filter(|c| c.kind != ConstraintKind::ForeignKey)
    {
        stmts.push(format!(
            "ALTER TABLE {table_ref} ADD {}",
            constraint_definition(c)
        ));
    }

    for c in modified
        .constraints
        .dropped
        .iter()
        .filter(|c| c.kind != ConstraintKind::ForeignKey)
    {
        stmts.push(format!("ALTER TABLE {table_ref} DROP CONSTRAINT {}", quote_ident(&c.name)));
    }
    for idx in &modified.indexes.dropped {
        stmts.push(format!("DROP INDEX {}", quote_ident(&idx.name)));
    }
    for col in &modified.columns.dropped {
        stmts.push(format!("ALTER TABLE {table_ref} DROP COLUMN {}", quote_ident(&col.name)));
    }

    stmts
}

fn alter_column(table_ref: &str, before: &Column, after: &Column) -> Vec<String> {
    let mut stmts = Vec::new();
    let col_ref = quote_ident(&after.name);

    if before.sql_type != after.sql_type {
        stmts.push(format!(
            "ALTER TABLE {table_ref} ALTER COLUMN {col_ref} TYPE {} USING {col_ref}::{}",
            after.sql_type, after.sql_type
        ));
    }
    if before.default != after.default {
        match &after.default {
            Some(d) => stmts.push(format!(
                "ALTER TABLE {table_ref} ALTER COLUMN {col_ref} SET DEFAULT {d}"
            )),
            None => stmts.push(format!("ALTER TABLE {table_ref} ALTER COLUMN {col_ref} DROP DEFAULT")),
        }
    }
    if before.nullable != after.nullable {
        if after.nullable {
            stmts.push(format!("ALTER TABLE {table_ref} ALTER COLUMN {col_ref} DROP NOT NULL"));
        } else {
            stmts.push(format!("ALTER TABLE {table_ref} ALTER COLUMN {col_ref} SET NOT NULL"));
        }
    }
    stmts
}

fn create_index_statement(table_name: &str, idx: &Index) -> String {
    let unique = if idx.unique { "UNIQUE " } else { "" };
    format!(
        "CREATE {unique}INDEX {} ON {} ({})",
        quote_ident(&idx.name),
        quote_ident(table_name),
        quoted_column_list(&idx.columns)
    )
}

// Step 6: add new foreign keys last, for both newly created and modified
// tables, after every table/column they could reference has been created
// or altered into place.
fn add_foreign_keys(diff: &Diff) -> Vec<String> {
    let mut stmts = Vec::new();
    for table in &diff.added_tables {
        for c in table.constraints.iter().filter(|c| c.kind == ConstraintKind::ForeignKey) {
            stmts.push(format!(
                "ALTER TABLE {} ADD {}",
                quote_ident(&table.name),
                foreign_key_definition(c)
            ));
        }
    }
    for modified in &diff.modified_tables {
        for c in modified
            .constraints
            .added
            .iter()
            .filter(|c| c.kind == ConstraintKind::ForeignKey)
        {
            stmts.push(format!(
                "ALTER TABLE {} ADD {}",
                quote_ident(&modified.name),
                foreign_key_definition(c)
            ));
        }
    }
    stmts
}

/// Order tables so that any table referenced by another table's foreign key
/// comes before it. Tables with no inter-dependency keep their original
/// (name-ascending) relative order, via a stable topological sort. Used for
/// drop ordering; new-table creation no longer needs this once foreign keys
/// are deferred to a separate pass (see `create_tables`/`add_foreign_keys`).
fn topological_order(tables: &[Table], name_of: impl Fn(&Table) -> String) -> Vec<String> {
    let names: Vec<String> = tables.iter().map(&name_of).collect();
    let name_set: HashSet<&str> = names.iter().map(|s| s.as_str()).collect();

    let mut deps: HashMap<&str, HashSet<&str>> = HashMap::new();
    for table in tables {
        let mut d = HashSet::new();
        for c in &table.constraints {
            if let Some(fk) = &c.foreign_key {
                if name_set.contains(fk.target_table.as_str()) && fk.target_table != table.name {
                    d.insert(fk.target_table.as_str());
                }
            }
        }
        deps.insert(table.name.as_str(), d);
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut order: Vec<String> = Vec::new();

    fn visit<'a>(
        name: &'a str,
        deps: &HashMap<&'a str, HashSet<&'a str>>,
        visited: &mut HashSet<&'a str>,
        order: &mut Vec<String>,
    ) {
        if visited.contains(name) {
            return;
        }
        visited.insert(name);
        if let Some(d) = deps.get(name) {
            let mut sorted_deps: Vec<&&str> = d.iter().collect();
            sorted_deps.sort();
            for dep in sorted_deps {
                visit(dep, deps, visited, order);
            }
        }
        order.push(name.to_string());
    }

    for name in &names {
        visit(name.as_str(), &deps, &mut visited, &mut order);
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::differ::diff;
    use chrono::Utc;

    fn schema(tables: Vec<Table>) -> crate::schema_model::Schema {
        crate::schema_model::Schema::new(1, Utc::now(), tables)
    }

    #[test]
    fn no_changes_emits_comment_only() {
        let t = Table::new("users");
        let d = diff(&schema(vec![t.clone()]), &schema(vec![t]));
        let ddl = generate_ddl(&d);
        assert_eq!(ddl, "-- no changes\n");
    }

    #[test]
    fn new_tables_defer_foreign_keys_to_a_separate_pass() {
        let mut orgs = Table::new("orgs");
        orgs.columns.push(Column::new("id", "integer"));
        orgs.constraints.push(Constraint::primary_key("pk_orgs", vec!["id".into()]));

        let mut users = Table::new("users");
        users.columns.push(Column::new("id", "integer"));
        users.columns.push(Column::new("org_id", "integer"));
        users.constraints.push(Constraint::foreign_key(
            "fk_users_org",
            vec!["org_id".into()],
            crate::schema_model::ForeignKeyRef {
                target_table: "orgs".into(),
                target_columns: vec!["id".into()],
                on_update: crate::schema_model::ForeignKeyAction::NoAction,
                on_delete: crate::schema_model::ForeignKeyAction::Cascade,
            },
        ));

        // Declared users-first: a forward reference to a table that hasn't
        // been created yet must still produce valid DDL.
        let d = diff(&schema(vec![]), &schema(vec![users, orgs]));
        let ddl = generate_ddl(&d);

        let create_users = ddl.find("CREATE TABLE \"users\" (").unwrap();
        let create_users_end = ddl[create_users..].find(");\n").unwrap() + create_users;
        assert!(
            !ddl[create_users..create_users_end].contains("REFERENCES"),
            "new-table CREATE TABLE must not embed the foreign key"
        );

        let create_orgs = ddl.find("CREATE TABLE \"orgs\"").unwrap();
        let add_fk = ddl.find("ADD CONSTRAINT \"fk_users_org\"").unwrap();
        assert!(add_fk > create_users && add_fk > create_orgs, "FK must be added after both tables exist");
    }

    #[test]
    fn dropped_foreign_key_precedes_table_drop() {
        let mut posts = Table::new("posts");
        posts.columns.push(Column::new("id", "integer"));
        posts.constraints.push(Constraint::foreign_key(
            "fk_posts_author",
            vec!["author_id".into()],
            crate::schema_model::ForeignKeyRef {
                target_table: "users".into(),
                target_columns: vec!["id".into()],
                on_update: crate::schema_model::ForeignKeyAction::NoAction,
                on_delete: crate::schema_model::ForeignKeyAction::NoAction,
            },
        ));

        let d = diff(&schema(vec![posts]), &schema(vec![]));
        let ddl = generate_ddl(&d);
        let drop_fk_pos = ddl.find("DROP CONSTRAINT \"fk_posts_author\"").unwrap();
        let drop_table_pos = ddl.find("DROP TABLE \"posts\"").unwrap();
        assert!(drop_fk_pos < drop_table_pos);
    }

    #[test]
    fn added_column_is_altered_in() {
        let before = Table::new("users");
        let mut after = Table::new("users");
        after.columns.push(Column::new("email", "text"));

        let d = diff(&schema(vec![before]), &schema(vec![after]));
        let ddl = generate_ddl(&d);
        assert!(ddl.contains("ALTER TABLE \"users\" ADD COLUMN \"email\" TEXT"));
    }

    #[test]
    fn new_foreign_key_on_modified_table_is_added_last() {
        let mut orgs = Table::new("orgs");
        orgs.columns.push(Column::new("id", "integer"));

        let mut users_before = Table::new("users");
        users_before.columns.push(Column::new("id", "integer"));
        let mut users_after = Table::new("users");
        users_after.columns.push(Column::new("id", "integer"));
        users_after.columns.push(Column::new("org_id", "integer"));
        users_after.constraints.push(Constraint::foreign_key(
            "fk_users_org",
            vec!["org_id".into()],
            crate::schema_model::ForeignKeyRef {
                target_table: "orgs".into(),
                target_columns: vec!["id".into()],
                on_update: crate::schema_model::ForeignKeyAction::NoAction,
                on_delete: crate::schema_model::ForeignKeyAction::NoAction,
            },
        ));

        let d = diff(
            &schema(vec![users_before.clone()]),
            &schema(vec![users_after]),
        );
        let ddl = generate_ddl(&d);
        let add_col_pos = ddl.find("ADD COLUMN \"org_id\"").unwrap();
        let add_fk_pos = ddl.find("ADD CONSTRAINT \"fk_users_org\"").unwrap();
        assert!(add_col_pos < add_fk_pos);
    }

    #[test]
    fn serial_sentinel_default_emits_identity_not_a_literal_default() {
        let mut col = Column::new("id", "integer");
        col.default = Some("nextval".to_string());
        let def = column_definition(&col);
        assert!(def.contains("GENERATED BY DEFAULT AS IDENTITY"));
        assert!(!def.contains("DEFAULT nextval"));
    }

    #[test]
    fn modified_table_add_and_drop_are_ordered_per_spec() {
        let mut before = Table::new("users");
        before.columns.push(Column::new("legacy_flag", "integer"));

        let mut after = Table::new("users");
        after.columns.push(Column::new("email", "text"));

        let d = diff(&schema(vec![before]), &schema(vec![after]));
        let ddl = generate_ddl(&d);

        let add_pos = ddl.find("ADD COLUMN \"email\"").unwrap();
        let drop_pos = ddl.find("DROP COLUMN \"legacy_flag\"").unwrap();
        assert!(add_pos < drop_pos, "adds must precede drops within a modified table");
    }
}
