use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::cli::{CommonArgs, CommonCommands, utils};
use deletes::{DeleteStore, TombstonesLoader};
use router::{DeletesStateImpl, create_router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(Parser)]
#[command(name = "purger")]
#[command(about = "Purger - delete request store and tombstones service for time series")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Option<PurgerCommands>,
}

#[derive(Subcommand)]
enum PurgerCommands {
    #[command(flatten)]
    Common(CommonCommands),
}

impl Default for PurgerCommands {
    fn default() -> Self {
        Self::Common(CommonCommands::Start)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    utils::init_logging(&cli.common);

    let config = utils::load_config(cli.common.config.as_ref())?;

    let command = cli.command.unwrap_or_default();
    let PurgerCommands::Common(ref common_cmd) = command;
    if utils::handle_common_command(common_cmd, &config)? {
        return Ok(());
    }

    utils::validate_config(&config)?;

    log::info!("Loaded configuration:");
    log::info!("  Index backend: {}", config.index.backend);
    log::info!(
        "  Tombstones reload interval: {:?}",
        config.deletes.tombstones_reload_interval
    );

    let http_addr: SocketAddr = config
        .http
        .listen
        .parse()
        .with_context(|| format!("Invalid HTTP listen address {:?}", config.http.listen))?;

    let index = deletes::index::connect(&config.index)
        .await
        .context("Failed to open index backend")?;
    let store = DeleteStore::with_index(index, &config.deletes);
    let tombstones = Arc::new(TombstonesLoader::new(store.clone(), &config.deletes));

    let app = create_router(DeletesStateImpl::new(store, tombstones.clone()));
    let listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("Failed to bind HTTP API on {http_addr}"))?;

    let (http_shutdown_tx, http_shutdown_rx) = oneshot::channel::<()>();
    let http_handle = tokio::spawn(async move {
        log::info!("Starting HTTP API on {http_addr}");
        let result = axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async {
                http_shutdown_rx.await.ok();
                log::info!("HTTP API shutting down gracefully");
            })
            .await;
        if let Err(e) = result {
            log::error!("HTTP API error: {e}");
        }
    });

    log::info!("Purger started successfully");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c signal")?;

    log::info!("Shutting down purger...");

    let _ = http_shutdown_tx.send(());
    let _ = http_handle.await;

    tombstones.stop().await;

    log::info!("Purger stopped gracefully");

    Ok(())
}
