//! Chain monitor CLI.
//!
//! Entry point for the monitor binary. Provides subcommands for:
//! - `run` - start the monitor (API server + one worker task per chain)
//! - `migrate` - run database migrations
//! - `version` - print the build version

use std::sync::Arc;

use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use chain_monitor::api::{router, ApiState};
use chain_monitor::config::{LoggingSettings, Settings};
use chain_monitor::engine::{run_chain_workers, AdmissionController, ChainWorkerDeps};
use chain_monitor::store::PostgresStore;
use chain_monitor::streaming::IggyPublisher;

/// Chain activity monitor.
#[derive(Parser, Debug)]
#[command(name = "chain-monitor")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,

    /// Environment name, selects `config/{name}.toml` over `config/default.toml`.
    #[arg(short, long, default_value = "development")]
    environment: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the monitor: one worker per configured chain, plus the API server.
    Run,

    /// Run pending database migrations.
    Migrate,

    /// Show version information.
    Version,
}

fn init_tracing(settings: &LoggingSettings) {
    let filter = tracing_subscriber::EnvFilter::try_new(&settings.level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if settings.format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn connect_db(settings: &chain_monitor::config::DatabaseSettings) -> eyre::Result<PostgresStore> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(settings.connect_timeout())
        .idle_timeout(settings.idle_timeout())
        .connect(&settings.url)
        .await?;
    Ok(PostgresStore::new(pool))
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    let _ = dotenvy::dotenv();

    let settings = Settings::load(&cli.environment)?;

    if matches!(cli.command, Commands::Version) {
        println!("chain-monitor {}", chain_monitor::VERSION);
        return Ok(());
    }

    init_tracing(&settings.logging);

    if matches!(cli.command, Commands::Migrate) {
        let store = connect_db(&settings.database).await?;
        store.run_migrations().await?;
        info!("migrations complete");
        return Ok(());
    }

    info!(version = chain_monitor::VERSION, chains = settings.chains.len(), "starting chain monitor");

    if let Err(errors) = settings.validate() {
        for err in &errors {
            error!(error = %err, "invalid configuration");
        }
        eyre::bail!("configuration validation failed");
    }

    let store = Arc::new(connect_db(&settings.database).await?);

    let publisher = IggyPublisher::new(&settings.iggy)?;
    publisher.connect().await?;

    let deps = Arc::new(ChainWorkerDeps {
        wallet_store: store.clone(),
        activity_store: store.clone(),
        chain_state_store: store.clone(),
        publisher: Arc::new(publisher),
        engine: settings.engine.clone(),
        withdrawal: settings.withdrawal.clone(),
    });

    let shutdown = CancellationToken::new();
    let admission = Arc::new(AdmissionController::new(
        settings.engine.max_concurrent,
        settings.engine.min_headblock_spacing(),
    ));

    let (handles, supervisor) =
        run_chain_workers(settings.chains.clone(), deps, admission, shutdown.clone()).await?;

    let api_state = Arc::new(ApiState::new(handles));
    let app = router(api_state);
    let listener = tokio::net::TcpListener::bind((settings.api.host.as_str(), settings.api.port)).await?;
    info!(host = %settings.api.host, port = settings.api.port, "api server listening");

    let api_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { api_shutdown.cancelled().await })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        result = supervisor => {
            match result {
                Ok(Err(err)) => error!(error = %err, "chain worker supervisor exited early"),
                Err(err) => error!(error = %err, "chain worker supervisor task panicked"),
                Ok(Ok(())) => {}
            }
        }
    }

    shutdown.cancel();
    let _ = server.await;

    Ok(())
}
