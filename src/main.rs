use clap::{Parser, Subcommand};
use crawl_orchestrator::{Config, Result, init_logging};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "crawl-orchestrator", version, about = "Distributed browser-driven crawl orchestrator", long_about = None)]
struct Cli {
    /// Path to a TOML config file; defaults to ~/.config/crawl-orchestrator/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs the manager tick loop and the HTTP API together.
    Serve,
    /// Configuration inspection.
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Prints the resolved configuration (file + env overrides).
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref())?;

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Config(ConfigCommands::Show) => {
            print!("{}", config.show());
            Ok(())
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    info!(bind_addr = %config.server.bind_addr, "starting crawl orchestrator");

    let store = crawl_orchestrator::store::redis_store::RedisStore::connect(
        &config.store.redis_url,
        &config.store.key_prefix,
    )
    .await?;
    let store = std::sync::Arc::new(store);

    let manager = crawl_orchestrator::manager::Manager::new(store.clone(), config.clone());
    let manager_handle = tokio::spawn(async move { manager.run().await });

    let app = crawl_orchestrator::api::build_router(store, config.clone());
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(err) = result {
                tracing::error!(%err, "HTTP server exited with error");
            }
        }
        result = manager_handle => {
            if let Err(err) = result {
                tracing::error!(%err, "manager task panicked");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}
