//! Crate-wide error type.
//!
//! Each component defines its own small error enum (see `parser::ParseError`,
//! `introspect::IntrospectionError`, `executor::DriftError`, ...); this module
//! aggregates them behind a single type so callers crossing component
//! boundaries don't have to match on five different error types.

use thiserror::Error;

use crate::differ::DestructiveChangeError;
use crate::executor::DriftError;
use crate::parser::ParseError;
use crate::store::StoreError;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("introspection error: {0}")]
    Introspection(#[from] tokio_postgres::Error),

    #[error("drift detected: {0}")]
    Drift(#[from] DriftError),

    #[error("destructive change rejected: {0}")]
    DestructiveChange(#[from] DestructiveChangeError),

    #[error("migration store error: {0}")]
    Store(#[from] StoreError),

    #[error("DDL validation failed for migration {migration}: {reason}")]
    Validation { migration: String, reason: String },

    #[error("execution failed for migration {migration}: {reason}")]
    Execution { migration: String, reason: String },

    #[error("advisory lock busy: another invocation is applying migrations")]
    LockBusy,

    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("{0}")]
    Other(String),
}
