//! Long-running trader: trading cycle, balance tracker, status and dashboard.

use super::account::fetch_account;
use super::source::{ConfigSource, Connection};
use anyhow::{bail, Context, Result};
use clap::Args;
use qtrade_bot_orchestrator::{
    spawn_status_aggregator, BalancePoller, TradingCycle, EVENT_CHANNEL_CAPACITY,
};
use qtrade_web_api::{ApiServer, AppState};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: ConfigSource,

    /// Do not start the dashboard API
    #[arg(long)]
    pub no_server: bool,
}

pub async fn run_trader(args: RunArgs) -> Result<()> {
    let mut config = args.source.load()?;
    if args.no_server {
        config.server.enabled = false;
    }
    config.validate()?;

    tracing::info!(
        broker = ?config.broker.kind,
        symbols = ?config.trading.symbols,
        epsilon = config.agent.epsilon,
        "Starting Q-learning trader"
    );

    let (trigger, shutdown) = qtrade_core::shutdown::channel();
    let connection = Connection::open(&config, shutdown.clone())?;

    let account = fetch_account(&connection).await?;
    if !account.is_active() {
        bail!("account is not active (status {})", account.status);
    }
    tracing::info!(status = %account.status, equity = %account.equity, "account verified");

    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    let (status_rx, status_handle) =
        spawn_status_aggregator(event_tx.subscribe(), shutdown.clone());

    let mut background: Vec<JoinHandle<()>> = vec![status_handle];

    if config.server.enabled {
        let server = ApiServer::new(AppState {
            status: status_rx,
            events: event_tx.clone(),
            executor: connection.executor.clone(),
            shutdown: shutdown.clone(),
        });
        let addr = config.server.addr();
        background.push(tokio::spawn(async move {
            if let Err(e) = server.serve(&addr).await {
                tracing::error!("Server error: {}", e);
            }
        }));
    }

    if config.balance.enabled {
        let poller = BalancePoller::new(
            connection.broker.clone(),
            connection.executor.clone(),
            config.balance.poll_interval(),
            event_tx.clone(),
            shutdown.clone(),
        );
        background.push(tokio::spawn(poller.run()));
    }

    let cycle = TradingCycle::new(
        &config,
        connection.broker.clone(),
        connection.executor.clone(),
        event_tx,
        shutdown,
    );
    let mut trading = tokio::spawn(cycle.run());

    let finished = tokio::select! {
        () = wait_for_signal() => None,
        result = &mut trading => Some(result),
    };

    tracing::info!("Shutting down...");
    trigger.trigger();

    let result = match finished {
        Some(result) => result,
        None => trading.await,
    };

    for handle in background {
        if let Err(e) = handle.await {
            tracing::error!("Background task failed: {}", e);
        }
    }

    result.context("trading task panicked")??;
    tracing::info!(
        executor = ?connection.executor.stats(),
        "Trader stopped"
    );
    Ok(())
}

/// Resolves on SIGINT or, on unix, SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to create SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown"),
        () = terminate => tracing::info!("Received SIGTERM, initiating graceful shutdown"),
    }
}
