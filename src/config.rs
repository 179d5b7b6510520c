//! Configuration structs the core accepts from its caller.
//!
//! Loading these from a TOML/YAML file or the environment is explicitly out
//! of scope for this crate (that's the CLI layer's job); these types are
//! plain data the CLI layer is expected to populate and hand in.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Everything needed to reach the target database and the migration store
/// on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    pub database: String,
    pub migrations_dir: PathBuf,
}

fn default_port() -> u16 {
    5432
}

impl EnvironmentConfig {
    pub fn connection_string(&self) -> String {
        let mut s = format!(
            "host={} port={} user={} dbname={}",
            self.host, self.port, self.user, self.database
        );
        if let Some(password) = &self.password {
            s.push_str(&format!(" password={password}"));
        }
        s
    }
}

/// Behavioral switches that apply across `plan`/`migrate`/`rollback`, set
/// once per invocation by the caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GlobalOptions {
    /// Reject destructive changes (dropped tables/columns) unless true.
    #[serde(default)]
    pub check_for_data_loss: bool,
    /// Reserved for an interactive caller to gate `migrate` behind an
    /// explicit confirmation step; the core does not prompt itself.
    #[serde(default)]
    pub require_approval: bool,
}

impl Default for GlobalOptions {
    fn default() -> Self {
        Self {
            check_for_data_loss: true,
            require_approval: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_string_omits_password_when_absent() {
        let cfg = EnvironmentConfig {
            host: "localhost".into(),
            port: 5432,
            user: "postgres".into(),
            password: None,
            database: "app".into(),
            migrations_dir: "migrations".into(),
        };
        assert_eq!(cfg.connection_string(), "host=localhost port=5432 user=postgres dbname=app");
    }

    #[test]
    fn default_global_options_reject_destructive_changes() {
        let opts = GlobalOptions::default();
        assert!(opts.check_for_data_loss);
        assert!(!opts.require_approval);
    }
}
