//! Schema-as-code reconciliation engine for PostgreSQL.
//!
//! Given a declarative SQL schema file and a live database, this crate
//! derives the minimal ordered DDL that reconciles the latter with the
//! former (`diff` + `generate_ddl`), persists it as a versioned migration
//! (`store`), and applies/rolls back/reports on migrations with
//! transactional safety and drift detection (`executor`).
//!
//! [`MigrationEngine`] is the single entry point command surfaces (a CLI, a
//! CI step, an admin tool) are expected to drive; everything underneath it
//! is usable standalone for callers that want only the pure parts (parsing
//! and diffing a schema file, say, with no database in the loop).

pub mod config;
pub mod differ;
pub mod error;
pub mod executor;
pub mod generator;
pub mod history;
pub mod introspect;
pub mod parser;
pub mod schema_model;
pub mod store;

pub use config::{EnvironmentConfig, GlobalOptions};
pub use error::{Error, Result};
pub use executor::{ApplyResult, Executor, ExecutorConfig, MigrationState, RollbackResult, StatusEntry};
pub use schema_model::Schema;
pub use store::{MigrationFile, MigrationStore};

use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use serde::Serialize;
use tracing::info;

use crate::differ::{diff as diff_schemas, reject_destructive, Diff};
use crate::generator::generate_ddl;

/// A schema diff together with the DDL that would implement it, produced by
/// [`MigrationEngine::plan`] without touching the migration store or the
/// database beyond a read-only introspection.
#[derive(Debug, Clone, Serialize)]
pub struct DiffPreview {
    pub diff: Diff,
    pub ddl: String,
}

/// The single entry point for the reconcile/migrate workflow: holds a
/// connection pool and a migration store, and exposes the top-level
/// operations (`plan`, `gen`, `migrate`, `rollback`, `status`) as inherent
/// methods, mirroring the config-holding-struct-with-methods shape the
/// teacher uses for its transaction engine.
pub struct MigrationEngine {
    pool: Pool,
    store: MigrationStore,
    options: GlobalOptions,
    executor: Executor,
}

impl MigrationEngine {
    /// Build the connection pool and wire up the migration store described
    /// by `env`. Does not touch the database until an operation is called.
    pub fn connect(env: EnvironmentConfig, options: GlobalOptions) -> Result<Self> {
        let mut pool_config = PoolConfig::new();
        pool_config.host = Some(env.host.clone());
        pool_config.port = Some(env.port);
        pool_config.user = Some(env.user.clone());
        pool_config.password = env.password.clone();
        pool_config.dbname = Some(env.database.clone());
        pool_config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1), tokio_postgres::NoTls)
            .map_err(|e| Error::Other(e.to_string()))?;

        let store = MigrationStore::new(env.migrations_dir.clone());
        let executor = Executor::new(pool.clone(), MigrationStore::new(env.migrations_dir), ExecutorConfig::default());

        Ok(Self {
            pool,
            store,
            options,
            executor,
        })
    }

    /// Compare the live database against `desired_schema_sql` and return the
    /// diff plus the DDL that would apply it, without writing anything.
    pub async fn plan(&self, desired_schema_sql: &str) -> Result<DiffPreview> {
        let outcome = parser::parse(desired_schema_sql)?;
        for warning in &outcome.warnings {
            tracing::warn!(statement = warning.statement_index, "{}", warning.message);
        }

        let mut client = self.pool.get().await.map_err(Error::Pool)?;
        let current = introspect::introspect(&mut client).await?;

        let diff = diff_schemas(&current, &outcome.schema);
        if self.options.check_for_data_loss {
            reject_destructive(&diff, false)?;
        }
        let ddl = generate_ddl(&diff);

        Ok(DiffPreview { diff, ddl })
    }

    /// Diff the live database against `desired_schema_sql` and persist the
    /// result as a new migration file pair under the configured store.
    pub async fn gen(&self, name: &str, desired_schema_sql: &str) -> Result<MigrationFile> {
        let preview = self.plan(desired_schema_sql).await?;
        if preview.diff.is_empty() {
            info!("no changes to generate");
        }
        let file = self.store.create(name, &preview.ddl, None)?;
        Ok(file)
    }

    /// Apply every pending migration in the store. `dry_run` reports the
    /// pending list and the DDL that would run without executing anything;
    /// `force` downgrades a drift-detection failure to a warning.
    pub async fn migrate(&self, dry_run: bool, force: bool) -> Result<ApplyResult> {
        self.executor.apply(dry_run, force).await.map_err(map_executor_err)
    }

    /// Roll back the last `n` applied migrations, newest first. `force`
    /// downgrades a drift-detection failure to a warning.
    pub async fn rollback(&self, n: u32, force: bool) -> Result<RollbackResult> {
        self.executor.rollback(n, force).await.map_err(map_executor_err)
    }

    /// Every migration in the store, annotated with whether it has been
    /// applied.
    pub async fn status(&self) -> Result<Vec<StatusEntry>> {
        self.executor.status().await.map_err(|e| Error::Other(e.to_string()))
    }
}

/// Map an executor-level error onto the crate-wide error type, preserving
/// the variants callers are expected to branch on (`LockBusy`, drift,
/// validation) instead of collapsing everything into `Error::Other`.
fn map_executor_err(e: executor::ExecutorError) -> Error {
    match e {
        executor::ExecutorError::LockBusy => Error::LockBusy,
        executor::ExecutorError::Validation { migration, reason } => Error::Validation { migration, reason },
        executor::ExecutorError::Execution { migration, reason } => Error::Execution { migration, reason },
        executor::ExecutorError::Drift(d) => Error::Drift(d),
        executor::ExecutorError::Store(s) => Error::Store(s),
        other => Error::Other(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_preview_serializes_for_external_reporting() {
        let preview = DiffPreview {
            diff: crate::differ::Diff::default(),
            ddl: "-- no changes\n".to_string(),
        };
        let json = serde_json::to_string(&preview).unwrap();
        assert!(json.contains("no changes"));
    }
}
