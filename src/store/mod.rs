//! Filesystem-backed migration store (C6).
//!
//! Migration files live as `<version>_<name>.sql` (up) with an optional
//! sibling `<version>_<name>.down.sql` (down). Writes are atomic: content is
//! written to a temp file in the same directory, fsynced, then renamed into
//! place, so a crash mid-write never leaves a half-written migration file
//! for the executor to pick up. The rename-with-fallback pattern is
//! grounded on `transaction::move_file_atomic` in the teacher: rename first,
//! and on `EXDEV` (temp dir on a different filesystem than the store) fall
//! back to copy-then-delete.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("migration directory '{0}' does not exist")]
    MissingDirectory(PathBuf),

    #[error("io error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("migration version {0} already exists")]
    DuplicateVersion(u32),
}

/// A single versioned migration on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationFile {
    pub version: u32,
    pub name: String,
    pub up_path: PathBuf,
    pub down_path: Option<PathBuf>,
    pub up_sql: String,
    pub down_sql: Option<String>,
    pub checksum: String,
}

impl MigrationFile {
    /// Filename stem shared by the up/down pair, e.g. `0003_add_users`.
    pub fn stem(&self) -> String {
        format!("{:04}_{}", self.version, self.name)
    }
}

/// The result of enumerating the store: the migrations that parsed
/// successfully, plus a human-readable warning for each file that didn't
/// (spec.md §4.5: "files failing to parse produce a warning and are
/// skipped," not a fatal error for the whole store).
#[derive(Debug, Clone, Default)]
pub struct LoadOutcome {
    pub migrations: Vec<MigrationFile>,
    pub warnings: Vec<String>,
}

pub struct MigrationStore {
    dir: PathBuf,
}

impl MigrationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load every migration file in the store, in ascending version order.
    /// A file whose name doesn't match `<version>_<name>.sql` is skipped
    /// with a warning rather than aborting the whole load.
    pub fn load_all(&self) -> Result<LoadOutcome, StoreError> {
        if !self.dir.exists() {
            return Err(StoreError::MissingDirectory(self.dir.clone()));
        }

        let mut outcome = LoadOutcome::default();
        let mut up_files: Vec<(u32, String, PathBuf)> = Vec::new();

        for entry in fs::read_dir(&self.dir).map_err(|e| self.io_err(e))? {
            let entry = entry.map_err(|e| self.io_err(e))?;
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !file_name.ends_with(".sql") || file_name.ends_with(".down.sql") {
                continue;
            }
            match parse_filename(file_name) {
                Ok((version, name)) => up_files.push((version, name, path)),
                Err(message) => {
                    warn!(file = file_name, "{message}");
                    outcome.warnings.push(message);
                }
            }
        }
        up_files.sort_by_key(|(version, _, _)| *version);

        let mut seen_versions = std::collections::HashSet::new();
        for (version, name, up_path) in up_files {
            if !seen_versions.insert(version) {
                return Err(StoreError::DuplicateVersion(version));
            }
            let up_sql = fs::read_to_string(&up_path).map_err(|e| self.io_err_at(&up_path, e))?;
            let down_path = up_path.with_extension("").with_extension("down.sql");
            let down_sql = if down_path.exists() {
                Some(fs::read_to_string(&down_path).map_err(|e| self.io_err_at(&down_path, e))?)
            } else {
                None
            };
            let checksum = checksum(&up_sql);

            outcome.migrations.push(MigrationFile {
                version,
                name,
                up_path,
                down_path: down_sql.as_ref().map(|_| down_path.clone()),
                up_sql,
                down_sql,
                checksum,
            });
        }

        debug!(
            count = outcome.migrations.len(),
            skipped = outcome.warnings.len(),
            dir = %self.dir.display(),
            "loaded migration files"
        );
        Ok(outcome)
    }

    /// The version number the next created migration should use: one past
    /// the highest version currently on disk, or 1 if the store is empty.
    pub fn next_version(&self) -> Result<u32, StoreError> {
        if !self.dir.exists() {
            return Ok(1);
        }
        let outcome = self.load_all()?;
        Ok(outcome.migrations.iter().map(|m| m.version).max().unwrap_or(0) + 1)
    }

    /// Write a new migration file pair to disk. `down_sql` is optional: a
    /// migration with no down file cannot be rolled back.
    pub fn create(
        &self,
        name: &str,
        up_sql: &str,
        down_sql: Option<&str>,
    ) -> Result<MigrationFile, StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| self.io_err(e))?;
        let version = self.next_version()?;
        let stem = format!("{version:04}_{name}");
        let up_path = self.dir.join(format!("{stem}.sql"));
        let down_path = self.dir.join(format!("{stem}.down.sql"));

        atomic_write(&up_path, up_sql)?;
        if let Some(down) = down_sql {
            atomic_write(&down_path, down)?;
        }

        info!(version, name, "created migration");
        Ok(MigrationFile {
            version,
            name: name.to_string(),
            up_path,
            down_path: down_sql.map(|_| down_path),
            up_sql: up_sql.to_string(),
            down_sql: down_sql.map(str::to_string),
            checksum: checksum(up_sql),
        })
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.dir.clone(),
            source,
        }
    }

    fn io_err_at(&self, path: &Path, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// `<version>_<name>.sql` -> (version, name). The version is a fixed- or
/// variable-width decimal prefix; names may contain underscores. Returns a
/// human-readable message (not `StoreError`) on failure, since a malformed
/// filename is a per-file warning, not a reason to fail the whole load.
fn parse_filename(file_name: &str) -> Result<(u32, String), String> {
    let stem = file_name.strip_suffix(".sql").unwrap_or(file_name);
    let (version_str, name) = stem.split_once('_').ok_or_else(|| {
        format!("malformed migration filename '{file_name}': expected '<version>_<name>.sql', skipped")
    })?;
    let version: u32 = version_str.parse().map_err(|_| {
        format!("malformed migration filename '{file_name}': version prefix is not a number, skipped")
    })?;
    if name.is_empty() {
        return Err(format!(
            "malformed migration filename '{file_name}': missing name after version, skipped"
        ));
    }
    Ok((version, name.to_string()))
}

pub fn checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Write `content` to `path` atomically: write to a sibling temp file in the
/// same directory, fsync it, then rename over the destination. Falls back to
/// copy-then-delete if the rename crosses a filesystem boundary.
fn atomic_write(path: &Path, content: &str) -> Result<(), StoreError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| StoreError::Io {
        path: parent.to_path_buf(),
        source: e,
    })?;
    tmp.write_all(content.as_bytes()).map_err(|e| StoreError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    tmp.as_file().sync_all().map_err(|e| StoreError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    match tmp.persist(path) {
        Ok(_) => Ok(()),
        Err(err) if err.error.raw_os_error() == Some(libc::EXDEV) => {
            fs::copy(err.file.path(), path).map_err(|e| StoreError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
            Ok(())
        }
        Err(err) => Err(StoreError::Io {
            path: path.to_path_buf(),
            source: err.error,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn create_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = MigrationStore::new(dir.path());

        let m1 = store
            .create("add_users", "CREATE TABLE users (id INTEGER);", Some("DROP TABLE users;"))
            .unwrap();
        assert_eq!(m1.version, 1);

        let m2 = store
            .create("add_posts", "CREATE TABLE posts (id INTEGER);", None)
            .unwrap();
        assert_eq!(m2.version, 2);

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.migrations.len(), 2);
        assert!(loaded.warnings.is_empty());
        assert_eq!(loaded.migrations[0].name, "add_users");
        assert!(loaded.migrations[0].down_sql.is_some());
        assert_eq!(loaded.migrations[1].name, "add_posts");
        assert!(loaded.migrations[1].down_sql.is_none());
    }

    #[test]
    fn checksum_is_stable_for_identical_content() {
        assert_eq!(checksum("CREATE TABLE t (id INTEGER);"), checksum("CREATE TABLE t (id INTEGER);"));
        assert_ne!(checksum("a"), checksum("b"));
    }

    #[test]
    fn next_version_accounts_for_existing_files() {
        let dir = TempDir::new().unwrap();
        let store = MigrationStore::new(dir.path());
        assert_eq!(store.next_version().unwrap(), 1);
        store.create("first", "SELECT 1;", None).unwrap();
        assert_eq!(store.next_version().unwrap(), 2);
    }

    #[test]
    fn malformed_filename_is_skipped_with_warning_not_fatal() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("not_versioned.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("0001_a.sql"), "SELECT 1;").unwrap();
        let store = MigrationStore::new(dir.path());
        let outcome = store.load_all().unwrap();
        assert_eq!(outcome.migrations.len(), 1);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("not_versioned.sql"));
    }

    #[test]
    fn duplicate_version_is_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("0001_a.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("0001_b.sql"), "SELECT 2;").unwrap();
        let store = MigrationStore::new(dir.path());
        assert!(matches!(store.load_all(), Err(StoreError::DuplicateVersion(1))));
    }
}
