//! statusd: status page sync daemon and operator CLI.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rusqlite::Connection;
use serde::Serialize;
use sp_core::cache::OverviewCache;
use sp_core::db;
use sp_core::domain::ProviderKind;
use sp_core::error::AppError;
use sp_core::overview::{compute_status_overview, OverviewSettings};
use sp_core::repo::datasources::{
    create_datasource, get_datasource, list_datasources, update_datasource, DatasourcePatch,
    NewDatasource,
};
use sp_sync::scheduler;
use sp_sync::{run_sync, test_connection};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "statusd")]
#[command(about = "Status page aggregation and incident provider sync")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON config file (defaults to ./statusd.json when present)
    #[arg(long, env = "STATUSPAGE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// SQLite database path, overriding the config file
    #[arg(long, env = "STATUSPAGE_DB", global = true)]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    Migrate,
    /// Load the demo components, incidents, and maintenance windows
    SeedDemo,
    /// Print the public status overview
    Overview,
    /// Sync one datasource now
    Sync { datasource_id: i64 },
    /// Test a datasource's provider credentials
    Test { datasource_id: i64 },
    /// Manage datasources
    #[command(subcommand)]
    Datasource(DatasourceCommand),
    /// Run the sync scheduler until Ctrl-C
    Run,
}

#[derive(Subcommand)]
enum DatasourceCommand {
    /// Register a provider integration (created disabled)
    Add {
        #[arg(long)]
        name: String,
        /// pagerduty or mock
        #[arg(long, default_value = "pagerduty")]
        provider: String,
        #[arg(long, env = "STATUSPAGE_API_KEY", hide_env_values = true)]
        api_key: String,
        #[arg(long)]
        base_url: Option<String>,
        /// Restrict to these provider service ids (repeatable)
        #[arg(long = "service-id")]
        service_ids: Vec<String>,
        #[arg(long)]
        interval: Option<i64>,
        /// Enable immediately
        #[arg(long)]
        enable: bool,
    },
    /// List datasources and their sync bookkeeping
    List,
    Enable { id: i64 },
    Disable { id: i64 },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("STATUSPAGE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| {
        AppError::new("CLI_OUTPUT_FAILED", "Failed to encode output").with_details(e.to_string())
    })?;
    println!("{text}");
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config, AppError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        config.database.path = db.clone();
    }
    config.validate()?;
    Ok(config)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(code = %e.code, details = ?e.details, "{}", e.message);
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the command succeeded; failures already reported as output yield `false`.
fn run(cli: Cli) -> Result<bool, AppError> {
    let config = load_config(&cli)?;
    let db_path = config.database.path.clone();

    match cli.command {
        Commands::Migrate => {
            db::open_and_migrate(&db_path)?;
            tracing::info!(path = %db_path.display(), "database ready");
            Ok(true)
        }
        Commands::SeedDemo => {
            let mut conn = db::open_and_migrate(&db_path)?;
            let summary = sp_core::demo::seed_demo_dataset(&mut conn)?;
            print_json(&summary)?;
            Ok(true)
        }
        Commands::Overview => {
            let conn = db::open_and_migrate(&db_path)?;
            print_json(&compute_status_overview(&conn, &config.overview_settings())?)?;
            Ok(true)
        }
        Commands::Sync { datasource_id } => {
            let mut conn = db::open_and_migrate(&db_path)?;
            let result = run_sync(
                &mut conn,
                &config.connector(),
                &config.sync_settings(),
                datasource_id,
            )?;
            print_json(&result)?;
            Ok(result.success)
        }
        Commands::Test { datasource_id } => {
            let conn = db::open_and_migrate(&db_path)?;
            let outcome = test_connection(&conn, &config.connector(), datasource_id)?;
            print_json(&outcome)?;
            Ok(outcome.success)
        }
        Commands::Datasource(command) => {
            let conn = db::open_and_migrate(&db_path)?;
            run_datasource_command(&conn, command)?;
            Ok(true)
        }
        Commands::Run => run_scheduler(&config),
    }
}

fn run_datasource_command(
    conn: &Connection,
    command: DatasourceCommand,
) -> Result<(), AppError> {
    match command {
        DatasourceCommand::Add {
            name,
            provider,
            api_key,
            base_url,
            service_ids,
            interval,
            enable,
        } => {
            let provider_type: ProviderKind = provider.parse()?;
            let id = create_datasource(
                conn,
                &NewDatasource {
                    name,
                    provider_type,
                    api_key,
                    base_url,
                    service_ids,
                    sync_interval_seconds: interval,
                },
            )?;
            let datasource = if enable {
                set_enabled(conn, id, true)?
            } else {
                get_datasource(conn, id)?
            };
            print_json(&datasource)
        }
        DatasourceCommand::List => print_json(&list_datasources(conn)?),
        DatasourceCommand::Enable { id } => print_json(&set_enabled(conn, id, true)?),
        DatasourceCommand::Disable { id } => print_json(&set_enabled(conn, id, false)?),
    }
}

fn set_enabled(
    conn: &Connection,
    id: i64,
    enabled: bool,
) -> Result<sp_core::domain::Datasource, AppError> {
    update_datasource(
        conn,
        id,
        &DatasourcePatch {
            enabled: Some(enabled),
            ..Default::default()
        },
    )
}

fn run_scheduler(config: &Config) -> Result<bool, AppError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            AppError::new("RUNTIME_START_FAILED", "Failed to start async runtime")
                .with_details(e.to_string())
        })?;

    runtime.block_on(async {
        let cache = Arc::new(OverviewCache::with_ttl(config.overview.cache_ttl_secs));
        let handle = scheduler::start(config.scheduler(), config.connector(), Arc::clone(&cache))?;
        tracing::info!(db = %config.database.path.display(), "statusd running; Ctrl-C to stop");

        let mut heartbeat =
            tokio::time::interval(Duration::from_secs(config.overview.cache_ttl_secs));
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    log_global_status(config, Arc::clone(&cache)).await;
                }
                signal = &mut ctrl_c => {
                    if let Err(e) = signal {
                        tracing::error!(error = %e, "failed to listen for Ctrl-C; shutting down");
                    }
                    break;
                }
            }
        }

        tracing::info!("shutdown requested");
        handle.shutdown().await;
        Ok(true)
    })
}

/// Serve the overview through the cache and log the headline status.
async fn log_global_status(config: &Config, cache: Arc<OverviewCache>) {
    let db_path = config.database.path.clone();
    let settings: OverviewSettings = config.overview_settings();
    let computed = tokio::task::spawn_blocking(move || {
        cache.get_or_compute(|| {
            let conn = db::open(&db_path)?;
            compute_status_overview(&conn, &settings)
        })
    })
    .await;

    match computed {
        Ok(Ok(overview)) => tracing::info!(
            global_status = %overview.global_status,
            active_incidents = overview.active_incidents.len(),
            "status overview"
        ),
        Ok(Err(e)) => tracing::warn!(code = %e.code, error = %e, "overview unavailable"),
        Err(e) => tracing::error!(error = %e, "overview task panicked"),
    }
}
