//! Command line configuration for the tenancy admin tool.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `TENANCY_DATA_DIR` | data | Directory holding the tenant databases |
//! | `TENANCY_REGISTRY_TABLE` | | Baseline table listing tenant names |
//! | `TENANCY_CONFIG` | | JSON file with tenancy settings |
//! | `TENANCY_LOG_LEVEL` | info | Log level |

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use helios_tenancy::TenancyConfig;

/// Admin tool for SQLite database-per-tenant data directories.
#[derive(Debug, Clone, Parser)]
#[command(name = "helios-tenancy")]
#[command(about = "Manage tenant databases")]
pub struct Cli {
    /// Directory holding one database file per tenant.
    #[arg(long, env = "TENANCY_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Table in the baseline database listing tenant names. When unset,
    /// every database file in the data directory is a tenant.
    #[arg(long, env = "TENANCY_REGISTRY_TABLE")]
    pub registry_table: Option<String>,

    /// JSON file with tenancy settings.
    #[arg(long, env = "TENANCY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Schema definition loaded into new tenants.
    #[arg(long)]
    pub schema_file: Option<PathBuf>,

    /// Seed data run in new tenants.
    #[arg(long, requires = "seed")]
    pub seed_file: Option<PathBuf>,

    /// Run the seed file after creating a tenant.
    #[arg(long)]
    pub seed: bool,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "TENANCY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// List registered tenants.
    List,
    /// Create tenant databases.
    Create {
        /// Tenant names.
        #[arg(required = true)]
        tenants: Vec<String>,
    },
    /// Drop tenant databases.
    Drop {
        /// Tenant names.
        #[arg(required = true)]
        tenants: Vec<String>,
    },
    /// Exit 0 if the tenant database exists, 1 otherwise.
    Exists {
        /// Tenant name.
        tenant: String,
    },
    /// Run a SQL file in every tenant.
    Exec {
        /// SQL file to run.
        file: PathBuf,
        /// Tenants to run at once (0 runs one after another).
        #[arg(long)]
        threads: Option<usize>,
    },
}

impl Cli {
    /// Builds the tenancy configuration from the config file and flags.
    /// Flags win over the file.
    pub fn tenancy_config(&self) -> anyhow::Result<TenancyConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
            None => TenancyConfig::new(),
        };

        if let Some(path) = &self.schema_file {
            config.set_database_schema_file(path);
        }
        if let Some(path) = &self.seed_file {
            config.set_seed_data_file(path);
        }
        if self.seed {
            config.set_seed_after_create(true);
        }
        if let Command::Exec {
            threads: Some(threads),
            ..
        } = &self.command
        {
            config.set_parallel_migration_threads(*threads);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_create() {
        let cli = Cli::try_parse_from(["helios-tenancy", "--data-dir", "/tmp/t", "create", "acme", "globex"])
            .unwrap();
        assert_eq!(cli.data_dir, PathBuf::from("/tmp/t"));
        match cli.command {
            Command::Create { tenants } => assert_eq!(tenants, ["acme", "globex"]),
            other => panic!("expected create, got {other:?}"),
        }
    }

    #[test]
    fn test_create_requires_a_tenant() {
        assert!(Cli::try_parse_from(["helios-tenancy", "create"]).is_err());
    }

    #[test]
    fn test_seed_file_requires_seed_flag() {
        assert!(Cli::try_parse_from(["helios-tenancy", "--seed-file", "s.sql", "list"]).is_err());
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"seed_after_create": false, "parallel_migration_threads": 2}}"#).unwrap();

        let cli = Cli::try_parse_from([
            "helios-tenancy",
            "--config",
            file.path().to_str().unwrap(),
            "--seed",
            "--seed-file",
            "seeds.sql",
            "exec",
            "migrate.sql",
            "--threads",
            "4",
        ])
        .unwrap();

        let config = cli.tenancy_config().unwrap();
        assert!(config.seed_after_create());
        assert_eq!(config.seed_data_file(), std::path::Path::new("seeds.sql"));
        assert_eq!(config.parallel_migration_threads(), 4);
    }

    #[test]
    fn test_unknown_config_key_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"no_such_setting": true}}"#).unwrap();

        let cli = Cli::try_parse_from([
            "helios-tenancy",
            "--config",
            file.path().to_str().unwrap(),
            "list",
        ])
        .unwrap();
        assert!(cli.tenancy_config().is_err());
    }
}
