mod cli;
mod config;
mod server;
mod setup;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use config::BotConfig;
use server::{HttpConfig, HttpServer, WebhookState};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(&cli)?;

    let mut config = BotConfig::load(cli.config.as_deref())?;
    config.apply_env();
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    config.validate()?;

    let dispatcher = setup::build_dispatcher(&config)?;

    let cancel = CancellationToken::new();
    let background = dispatcher.spawn_background_tasks(cancel.clone());

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown requested");
        let _ = shutdown_tx.send(());
    });

    let server = HttpServer::new(
        HttpConfig {
            host: config.server.host.clone(),
            port: config.server.port,
        },
        WebhookState { dispatcher },
    );
    let result = server.run(shutdown_rx).await;

    cancel.cancel();
    for handle in background {
        let _ = handle.await;
    }
    info!("ReelTalk stopped");
    result
}

/// Console logging, plus a daily rolling file when `--log-dir` is given.
/// The returned guard flushes the file writer and must outlive `main`.
fn init_logging(cli: &Cli) -> Result<Option<WorkerGuard>> {
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into());

    let (file_layer, guard) = match &cli.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, "reeltalk.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    Ok(guard)
}
