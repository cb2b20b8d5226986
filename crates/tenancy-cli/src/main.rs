//! Helios Tenancy admin tool
//!
//! Lists, creates, drops and checks tenant databases in a SQLite data
//! directory, and runs SQL files across every tenant.

mod cli;

use std::sync::Arc;

use clap::Parser;
use helios_tenancy::store::{SqliteConnector, SqliteStoreConfig};
use helios_tenancy::{ConnectionParams, StoreError, Tenancy, TenantRegistry, TenantSource};
use tracing::info;

use crate::cli::{Cli, Command};

/// Initializes tracing with an env filter, defaulting to `level` for this tool
/// and the tenancy library.
fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "helios_tenancy={},helios_tenancy_cli={}",
            level, level
        ))
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Builds the registry: the registry table when one is named, otherwise the
/// database files currently in the data directory.
fn build_registry(cli: &Cli, connector: &SqliteConnector) -> anyhow::Result<TenantRegistry> {
    let source = match &cli.registry_table {
        Some(table) => TenantSource::provider(connector.tenant_provider(table.clone())),
        None => TenantSource::list(connector.list_stores()?)?,
    };
    let baseline = ConnectionParams::new()
        .with("database", connector.config().baseline.clone())
        .with("data_dir", connector.config().data_dir.display().to_string());
    Ok(TenantRegistry::new(source, baseline))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = cli.tenancy_config()?;
    helios_tenancy::config::replace(config);

    let connector = SqliteConnector::new(SqliteStoreConfig::new(&cli.data_dir))?;
    let registry = build_registry(&cli, &connector)?;
    info!(
        data_dir = %cli.data_dir.display(),
        registry = ?registry,
        "Starting tenancy admin"
    );
    let tenancy = Tenancy::new(connector, registry);

    match cli.command {
        Command::List => {
            for tenant in tenancy.tenants().await? {
                println!("{tenant}");
            }
        }
        Command::Create { tenants } => {
            let mut session = tenancy.session().await?;
            for tenant in &tenants {
                session.create(tenant).await?;
                println!("created {tenant}");
            }
        }
        Command::Drop { tenants } => {
            let mut session = tenancy.session().await?;
            for tenant in &tenants {
                session.drop(tenant).await?;
                println!("dropped {tenant}");
            }
        }
        Command::Exists { tenant } => {
            let mut session = tenancy.session().await?;
            if !session.exists(&tenant).await? {
                std::process::exit(1);
            }
        }
        Command::Exec { file, .. } => {
            let sql = Arc::new(std::fs::read_to_string(&file)?);
            let outcomes = tenancy
                .each_tenant(move |session| {
                    let sql = Arc::clone(&sql);
                    Box::pin(async move {
                        session
                            .store()
                            .connection()
                            .execute_batch(&sql)
                            .map_err(StoreError::from)?;
                        Ok(())
                    })
                })
                .await?;

            let mut failed = 0;
            for (tenant, result) in &outcomes {
                match result {
                    Ok(()) => println!("ok     {tenant}"),
                    Err(err) => {
                        failed += 1;
                        println!("failed {tenant}: {err}");
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{failed} of {} tenants failed", outcomes.len());
            }
        }
    }

    Ok(())
}
