//! The history table (C7): a ledger living inside the target database that
//! records which migrations have been applied.
//!
//! Schema: `(name text primary key, checksum text not null, applied_at
//! timestamptz not null default now())`. `name` is the migration stem
//! (`<version>_<name>`) rather than a bare integer, so the table is
//! self-describing when inspected by hand.

use deadpool_postgres::GenericClient;

pub const TABLE_NAME: &str = "schema_migrations";

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub name: String,
    pub checksum: String,
    pub applied_at: chrono::DateTime<chrono::Utc>,
}

/// Create the history table if it does not already exist. Safe to call on
/// every run.
pub async fn ensure_table(client: &impl GenericClient) -> Result<(), tokio_postgres::Error> {
    client
        .batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS {TABLE_NAME} (\n\
               name text PRIMARY KEY,\n\
               checksum text NOT NULL,\n\
               applied_at timestamptz NOT NULL DEFAULT now()\n\
             )"
        ))
        .await
}

/// All applied migrations, ordered by application time.
pub async fn all(client: &impl GenericClient) -> Result<Vec<HistoryEntry>, tokio_postgres::Error> {
    let rows = client
        .query(
            &format!("SELECT name, checksum, applied_at FROM {TABLE_NAME} ORDER BY applied_at"),
            &[],
        )
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| HistoryEntry {
            name: row.get("name"),
            checksum: row.get("checksum"),
            applied_at: row.get("applied_at"),
        })
        .collect())
}

/// Record a migration as applied. Called inside the same transaction that
/// executed the migration's DDL, so a crash between the two never happens.
pub async fn record(
    client: &impl GenericClient,
    name: &str,
    checksum: &str,
) -> Result<(), tokio_postgres::Error> {
    client
        .execute(
            &format!("INSERT INTO {TABLE_NAME} (name, checksum) VALUES ($1, $2)"),
            &[&name, &checksum],
        )
        .await?;
    Ok(())
}

/// Remove a migration's history entry. Called after its down migration has
/// been executed successfully.
pub async fn remove(client: &impl GenericClient, name: &str) -> Result<(), tokio_postgres::Error> {
    client
        .execute(&format!("DELETE FROM {TABLE_NAME} WHERE name = $1"), &[&name])
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_name_is_stable() {
        assert_eq!(TABLE_NAME, "schema_migrations");
    }
}
