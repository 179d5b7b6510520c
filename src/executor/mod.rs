//! Migration execution (C8): advisory-locked, transactional apply/rollback
//! against a live database, plus read-only status/plan queries.
//!
//! The advisory lock and per-migration transaction pattern is grounded on
//! the teacher's `transaction::TransactionConfig` (one unit of work per
//! transaction, rolled back wholesale on any failure) generalized from a
//! local filesystem transaction to a remote database one. Drift detection
//! (missing file, checksum mismatch, out-of-order application) follows the
//! `DriftReport`/`DriftEntry` shape in the waypoint drift command, adapted
//! to compare the history table against the migration store rather than two
//! introspected schemas.

use std::collections::HashMap;

use deadpool_postgres::Pool;
use serde::Serialize;
use thiserror::Error;
use tokio_postgres::error::SqlState;
use tracing::{info, warn};

use crate::history;
use crate::parser::split_statements;
use crate::store::{MigrationFile, MigrationStore, StoreError};

#[derive(Debug, Error)]
pub enum DriftError {
    #[error("migration '{0}' is recorded as applied but its file is missing from the store")]
    MissingFile(String),

    #[error("migration '{0}' has been modified since it was applied (checksum mismatch)")]
    ChecksumMismatch(String),

    #[error("migration '{applied}' was applied before '{missing}', but '{missing}' has a lower version and has not been applied")]
    OutOfOrder { applied: String, missing: String },
}

/// Whether rollback refuses to proceed (strict) or skips and warns
/// (permissive) when a migration being rolled back has no down file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RollbackMode {
    #[default]
    Permissive,
    Strict,
}

pub struct ExecutorConfig {
    /// Key passed to `pg_advisory_lock`, shared by every invocation against
    /// the same database so concurrent `migrate`/`rollback` runs serialize.
    pub lock_key: i64,
    /// How long to wait for the advisory lock before giving up with
    /// `ExecutorError::LockBusy`.
    pub lock_timeout: std::time::Duration,
    pub rollback_mode: RollbackMode,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            lock_key: 0x70_67_72_65, // "pgre", arbitrary but stable across versions
            lock_timeout: std::time::Duration::from_secs(30),
            rollback_mode: RollbackMode::default(),
        }
    }
}

pub struct Executor {
    pool: Pool,
    store: MigrationStore,
    config: ExecutorConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplyResult {
    pub applied: Vec<String>,
    pub duration: std::time::Duration,
    pub success: bool,
    /// Set when this result came from a `dryRun` call: nothing was executed.
    pub dry_run: bool,
    /// The DDL that would run, populated only on a `dryRun` call.
    pub ddl_preview: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RollbackResult {
    /// Names of migrations actually rolled back, newest first.
    pub rolled_back: Vec<String>,
    pub skipped_no_down_file: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    Applied,
    Pending,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusEntry {
    pub name: String,
    pub state: MigrationState,
    pub applied_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub pending: Vec<String>,
}

impl Executor {
    pub fn new(pool: Pool, store: MigrationStore, config: ExecutorConfig) -> Self {
        Self { pool, store, config }
    }

    /// Apply every pending migration, in version order, each inside its own
    /// transaction. Stops (without rolling back already-applied migrations)
    /// on the first failure.
    ///
    /// `dry_run` computes the pending list and the DDL that would run
    /// without acquiring the lock or executing anything. `force` downgrades
    /// a drift-detection failure to a warning instead of aborting.
    pub async fn apply(&self, dry_run: bool, force: bool) -> Result<ApplyResult, ExecutorError> {
        if dry_run {
            return self.apply_preview(force).await;
        }

        let started = std::time::Instant::now();
        let mut client = self.pool.get().await.map_err(ExecutorError::Pool)?;
        acquire_lock(&client, self.config.lock_key, self.config.lock_timeout).await?;

        let result = self.apply_locked(&mut client, force).await;

        release_lock(&client, self.config.lock_key).await.ok();
        result.map(|mut r| {
            r.duration = started.elapsed();
            r
        })
    }

    async fn apply_locked(
        &self,
        client: &mut deadpool_postgres::Client,
        force: bool,
    ) -> Result<ApplyResult, ExecutorError> {
        history::ensure_table(&*client).await?;

        let outcome = self.store.load_all()?;
        for warning in &outcome.warnings {
            warn!("{warning}");
        }
        let applied_entries = history::all(&*client).await?;
        check_drift(&outcome.migrations, &applied_entries, force)?;

        let applied_names: std::collections::HashSet<&str> =
            applied_entries.iter().map(|e| e.name.as_str()).collect();
        let pending: Vec<&MigrationFile> = outcome
            .migrations
            .iter()
            .filter(|f| !applied_names.contains(f.stem().as_str()))
            .collect();

        let mut applied = Vec::new();
        for migration in pending {
            self.apply_one(client, migration).await?;
            applied.push(migration.stem());
        }

        Ok(ApplyResult {
            applied,
            duration: std::time::Duration::default(),
            success: true,
            dry_run: false,
            ddl_preview: None,
        })
    }

    /// `dryRun` path: report what `apply` would do without taking the lock
    /// or running any statement.
    async fn apply_preview(&self, force: bool) -> Result<ApplyResult, ExecutorError> {
        let client = self.pool.get().await.map_err(ExecutorError::Pool)?;
        history::ensure_table(&*client).await?;

        let outcome = self.store.load_all()?;
        for warning in &outcome.warnings {
            warn!("{warning}");
        }
        let applied_entries = history::all(&*client).await?;
        check_drift(&outcome.migrations, &applied_entries, force)?;

        let applied_names: std::collections::HashSet<&str> =
            applied_entries.iter().map(|e| e.name.as_str()).collect();
        let pending: Vec<&MigrationFile> = outcome
            .migrations
            .iter()
            .filter(|f| !applied_names.contains(f.stem().as_str()))
            .collect();

        let ddl_preview = pending
            .iter()
            .map(|f| format!("-- {}\n{}", f.stem(), f.up_sql))
            .collect::<Vec<_>>()
            .join("\n\n");

        info!(count = pending.len(), "dry run: no changes applied");
        Ok(ApplyResult {
            applied: pending.iter().map(|f| f.stem()).collect(),
            duration: std::time::Duration::default(),
            success: true,
            dry_run: true,
            ddl_preview: Some(ddl_preview),
        })
    }

    async fn apply_one(
        &self,
        client: &mut deadpool_postgres::Client,
        migration: &MigrationFile,
    ) -> Result<(), ExecutorError> {
        let stem = migration.stem();
        validate_statements(&*client, &stem, &migration.up_sql).await?;

        let tx = client
            .build_transaction()
            .isolation_level(deadpool_postgres::tokio_postgres::IsolationLevel::ReadCommitted)
            .start()
            .await
            .map_err(ExecutorError::Database)?;

        for stmt in split_statements(&migration.up_sql) {
            tx.batch_execute(&stmt.text)
                .await
                .map_err(|source| ExecutorError::Execution {
                    migration: stem.clone(),
                    reason: source.to_string(),
                })?;
        }
        history::record(&tx, &stem, &migration.checksum)
            .await
            .map_err(ExecutorError::Database)?;

        tx.commit().await.map_err(ExecutorError::Database)?;
        info!(migration = %stem, "applied migration");
        Ok(())
    }

    /// Roll back the last `n` applied migrations, newest first, each using
    /// its own down file and transaction. `force` downgrades a
    /// drift-detection failure to a warning instead of aborting.
    pub async fn rollback(&self, n: u32, force: bool) -> Result<RollbackResult, ExecutorError> {
        let mut client = self.pool.get().await.map_err(ExecutorError::Pool)?;
        acquire_lock(&client, self.config.lock_key, self.config.lock_timeout).await?;

        let result = self.rollback_locked(&mut client, n, force).await;

        release_lock(&client, self.config.lock_key).await.ok();
        result
    }

    async fn rollback_locked(
        &self,
        client: &mut deadpool_postgres::Client,
        n: u32,
        force: bool,
    ) -> Result<RollbackResult, ExecutorError> {
        history::ensure_table(&*client).await?;

        let outcome = self.store.load_all()?;
        for warning in &outcome.warnings {
            warn!("{warning}");
        }
        let applied_entries = history::all(&*client).await?;
        check_drift(&outcome.migrations, &applied_entries, force)?;

        let mut rolled_back = Vec::new();
        let mut skipped_no_down_file = false;

        // `history::all` returns rows oldest first; reverse to roll back
        // newest-first, then take the last n.
        let targets: Vec<&history::HistoryEntry> =
            applied_entries.iter().rev().take(n as usize).collect();

        for entry in targets {
            let migration = outcome
                .migrations
                .iter()
                .find(|f| f.stem() == entry.name)
                .ok_or_else(|| ExecutorError::Drift(DriftError::MissingFile(entry.name.clone())))?;

            let Some(down_sql) = &migration.down_sql else {
                match self.config.rollback_mode {
                    RollbackMode::Strict => {
                        return Err(ExecutorError::Execution {
                            migration: entry.name.clone(),
                            reason: "no down migration file present".to_string(),
                        })
                    }
                    RollbackMode::Permissive => {
                        warn!(migration = %entry.name, "skipping rollback: no down file");
                        skipped_no_down_file = true;
                        break;
                    }
                }
            };

            validate_statements(&*client, &entry.name, down_sql).await?;

            let tx = client
                .build_transaction()
                .isolation_level(deadpool_postgres::tokio_postgres::IsolationLevel::ReadCommitted)
                .start()
                .await
                .map_err(ExecutorError::Database)?;

            for stmt in split_statements(down_sql) {
                tx.batch_execute(&stmt.text)
                    .await
                    .map_err(|source| ExecutorError::Execution {
                        migration: entry.name.clone(),
                        reason: source.to_string(),
                    })?;
            }
            history::remove(&tx, &entry.name).await.map_err(ExecutorError::Database)?;
            tx.commit().await.map_err(ExecutorError::Database)?;

            info!(migration = %entry.name, "rolled back migration");
            rolled_back.push(entry.name.clone());
        }

        Ok(RollbackResult {
            rolled_back,
            skipped_no_down_file,
        })
    }

    /// Read-only: which migrations have been applied, and when.
    pub async fn status(&self) -> Result<Vec<StatusEntry>, ExecutorError> {
        let client = self.pool.get().await.map_err(ExecutorError::Pool)?;
        history::ensure_table(&*client).await?;

        let outcome = self.store.load_all()?;
        for warning in &outcome.warnings {
            warn!("{warning}");
        }
        let applied_entries = history::all(&*client).await?;
        let applied_by_name: HashMap<&str, &history::HistoryEntry> =
            applied_entries.iter().map(|e| (e.name.as_str(), e)).collect();

        Ok(outcome
            .migrations
            .iter()
            .map(|f| {
                let stem = f.stem();
                match applied_by_name.get(stem.as_str()) {
                    Some(entry) => StatusEntry {
                        name: stem,
                        state: MigrationState::Applied,
                        applied_at: Some(entry.applied_at),
                    },
                    None => StatusEntry {
                        name: stem,
                        state: MigrationState::Pending,
                        applied_at: None,
                    },
                }
            })
            .collect())
    }

    /// Read-only: which migrations would run on the next `apply`, without
    /// running them.
    pub async fn plan(&self) -> Result<PlanSummary, ExecutorError> {
        let client = self.pool.get().await.map_err(ExecutorError::Pool)?;
        history::ensure_table(&*client).await?;

        let outcome = self.store.load_all()?;
        for warning in &outcome.warnings {
            warn!("{warning}");
        }
        let applied_entries = history::all(&*client).await?;
        check_drift(&outcome.migrations, &applied_entries, false)?;

        let applied_names: std::collections::HashSet<&str> =
            applied_entries.iter().map(|e| e.name.as_str()).collect();
        let pending = outcome
            .migrations
            .iter()
            .filter(|f| !applied_names.contains(f.stem().as_str()))
            .map(|f| f.stem())
            .collect();

        Ok(PlanSummary { pending })
    }
}

/// Statements PostgreSQL's `PREPARE` actually accepts. DDL (the bulk of a
/// migration) cannot be prepared at all and is left to real execution
/// inside the migration's own transaction.
const PREPARABLE_KEYWORDS: &[&str] = &["SELECT", "INSERT", "UPDATE", "DELETE", "VALUES", "WITH"];

/// Validate a migration's statements by issuing a real `PREPARE`/
/// `DEALLOCATE` round trip for each one the database can actually prepare,
/// reusing the same paren-and-quote-aware splitter the parser uses to find
/// statement boundaries. A `PREPARE` failure (bad syntax, an unresolvable
/// table/column reference) surfaces here as `ExecutorError::Validation`
/// instead of only showing up mid-transaction during real execution.
async fn validate_statements(
    client: &deadpool_postgres::Client,
    migration: &str,
    sql: &str,
) -> Result<(), ExecutorError> {
    for (i, stmt) in split_statements(sql).into_iter().enumerate() {
        let text = stmt.text.trim();
        if text.is_empty() {
            continue;
        }
        let keyword = text
            .split(|c: char| c.is_whitespace() || c == '(')
            .next()
            .unwrap_or("")
            .to_uppercase();
        if !PREPARABLE_KEYWORDS.contains(&keyword.as_str()) {
            continue;
        }

        let plan_name = format!("pgreconcile_validate_{i}");
        if let Err(source) = client
            .batch_execute(&format!("PREPARE {plan_name} AS {text}"))
            .await
        {
            return Err(ExecutorError::Validation {
                migration: migration.to_string(),
                reason: source.to_string(),
            });
        }
        client
            .batch_execute(&format!("DEALLOCATE {plan_name}"))
            .await
            .map_err(ExecutorError::Database)?;
    }
    Ok(())
}

fn check_drift(
    files: &[MigrationFile],
    applied: &[history::HistoryEntry],
    force: bool,
) -> Result<(), ExecutorError> {
    match check_drift_strict(files, applied) {
        Ok(()) => Ok(()),
        Err(e) if force => {
            warn!("drift check failed but continuing under force: {e}");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn check_drift_strict(
    files: &[MigrationFile],
    applied: &[history::HistoryEntry],
) -> Result<(), ExecutorError> {
    let files_by_stem: HashMap<String, &MigrationFile> =
        files.iter().map(|f| (f.stem(), f)).collect();

    for entry in applied {
        match files_by_stem.get(&entry.name) {
            None => return Err(ExecutorError::Drift(DriftError::MissingFile(entry.name.clone()))),
            Some(file) if file.checksum != entry.checksum => {
                return Err(ExecutorError::Drift(DriftError::ChecksumMismatch(entry.name.clone())))
            }
            Some(_) => {}
        }
    }

    let max_applied_version = applied
        .iter()
        .filter_map(|e| files_by_stem.get(&e.name))
        .map(|f| f.version)
        .max();

    if let Some(max_version) = max_applied_version {
        let applied_names: std::collections::HashSet<&str> =
            applied.iter().map(|e| e.name.as_str()).collect();
        for file in files {
            if file.version < max_version && !applied_names.contains(file.stem().as_str()) {
                let applied_after = applied
                    .iter()
                    .find(|e| files_by_stem.get(&e.name).map(|f| f.version) == Some(max_version))
                    .map(|e| e.name.clone())
                    .unwrap_or_default();
                return Err(ExecutorError::Drift(DriftError::OutOfOrder {
                    applied: applied_after,
                    missing: file.stem(),
                }));
            }
        }
    }

    Ok(())
}

/// Block on `pg_advisory_lock`, but give up with `ExecutorError::LockBusy`
/// if it isn't granted within `timeout` (spec default: 30s), rather than
/// waiting forever for a stuck concurrent invocation.
async fn acquire_lock(
    client: &deadpool_postgres::Client,
    key: i64,
    timeout: std::time::Duration,
) -> Result<(), ExecutorError> {
    let timeout_ms = timeout.as_millis().max(1);
    client
        .batch_execute(&format!("SET statement_timeout = {timeout_ms}"))
        .await
        .map_err(ExecutorError::Database)?;

    let locked = client
        .batch_execute(&format!("SELECT pg_advisory_lock({key})"))
        .await;

    client
        .batch_execute("SET statement_timeout = 0")
        .await
        .map_err(ExecutorError::Database)?;

    match locked {
        Ok(()) => Ok(()),
        Err(source) if source.code() == Some(&SqlState::QUERY_CANCELED) => Err(ExecutorError::LockBusy),
        Err(source) => Err(ExecutorError::Database(source)),
    }
}

async fn release_lock(client: &deadpool_postgres::Client, key: i64) -> Result<(), ExecutorError> {
    client
        .batch_execute(&format!("SELECT pg_advisory_unlock({key})"))
        .await
        .map_err(ExecutorError::Database)
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("migration store error: {0}")]
    Store(#[from] StoreError),

    #[error("drift detected: {0}")]
    Drift(#[from] DriftError),

    #[error("database error: {0}")]
    Database(#[source] tokio_postgres::Error),

    #[error("connection pool error: {0}")]
    Pool(#[source] deadpool_postgres::PoolError),

    #[error("execution failed for migration {migration}: {reason}")]
    Execution { migration: String, reason: String },

    #[error("DDL validation failed for migration {migration}: {reason}")]
    Validation { migration: String, reason: String },

    #[error("advisory lock busy: lock not granted within the configured wait")]
    LockBusy,
}

impl From<tokio_postgres::Error> for ExecutorError {
    fn from(e: tokio_postgres::Error) -> Self {
        ExecutorError::Database(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MigrationFile;
    use std::path::PathBuf;

    fn file(version: u32, name: &str, checksum: &str) -> MigrationFile {
        MigrationFile {
            version,
            name: name.to_string(),
            up_path: PathBuf::new(),
            down_path: None,
            up_sql: String::new(),
            down_sql: None,
            checksum: checksum.to_string(),
        }
    }

    fn entry(name: &str, checksum: &str) -> history::HistoryEntry {
        history::HistoryEntry {
            name: name.to_string(),
            checksum: checksum.to_string(),
            applied_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn no_drift_when_history_matches_files() {
        let files = vec![file(1, "a", "sum1")];
        let applied = vec![entry("0001_a", "sum1")];
        assert!(check_drift(&files, &applied, false).is_ok());
    }

    #[test]
    fn missing_file_is_drift() {
        let files = vec![];
        let applied = vec![entry("0001_a", "sum1")];
        assert!(matches!(
            check_drift(&files, &applied, false),
            Err(ExecutorError::Drift(DriftError::MissingFile(_)))
        ));
    }

    #[test]
    fn checksum_mismatch_is_drift() {
        let files = vec![file(1, "a", "sum-changed")];
        let applied = vec![entry("0001_a", "sum1")];
        assert!(matches!(
            check_drift(&files, &applied, false),
            Err(ExecutorError::Drift(DriftError::ChecksumMismatch(_)))
        ));
    }

    #[test]
    fn out_of_order_application_is_drift() {
        let files = vec![file(1, "a", "sum1"), file(2, "b", "sum2")];
        let applied = vec![entry("0002_b", "sum2")];
        assert!(matches!(
            check_drift(&files, &applied, false),
            Err(ExecutorError::Drift(DriftError::OutOfOrder { .. }))
        ));
    }

    #[test]
    fn forced_drift_check_downgrades_to_warning() {
        let files = vec![];
        let applied = vec![entry("0001_a", "sum1")];
        assert!(check_drift(&files, &applied, true).is_ok());
    }
}
