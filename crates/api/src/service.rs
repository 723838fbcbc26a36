//! Service wiring and task supervision.
//!
//! Builds the chain client, the watcher, the four projections, and the
//! HTTP server, then runs them as one task group: the first task to fail
//! cancels the rest and its error becomes the service's exit error.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use gauntlet_indexer::{
    AgentBalanceIndexer, AgentIndexer, AgentUsageIndexer, BalanceIndexerConfig, ChainReader,
    Config, EventWatcher, RpcPool, StaticPriceFeed, TokenIndexer, UsageIndexerConfig,
    WatcherConfig,
};

use crate::server::{self, AppState};

/// Run the full service until shutdown or first task failure.
pub async fn run(config: Config) -> Result<()> {
    let registry_address = config.network.registry_address;
    let reader: Arc<dyn ChainReader> = Arc::new(
        RpcPool::new(&config.network.rpc_urls).context("failed to build RPC pool")?,
    );
    let price_feed = Arc::new(StaticPriceFeed::new(
        config.token_rates().context("failed to parse token rates")?,
    ));

    let watcher = Arc::new(EventWatcher::new(
        reader.clone(),
        WatcherConfig {
            registry_address,
            starting_block: config.indexer.starting_block,
            safe_block_delta: config.indexer.safe_block_delta,
            chunk_size: config.indexer.chunk_size,
            tick_rate: config.event_tick_rate(),
            startup_tick_rate: config.event_startup_tick_rate(),
        },
    ));
    let tokens = Arc::new(TokenIndexer::new(
        registry_address,
        price_feed,
        config.price_tick_rate(),
    ));
    let agents = Arc::new(AgentIndexer::new(registry_address, reader.clone()));
    let usages = Arc::new(AgentUsageIndexer::new(UsageIndexerConfig {
        registry_address,
        max_prompts: config.indexer.max_prompts,
        prompt_cache_size: config.indexer.prompt_cache_size,
        prompt_cache_ttl: config.prompt_cache_ttl(),
    }));
    let balances = Arc::new(AgentBalanceIndexer::new(
        reader,
        agents.clone(),
        tokens.clone(),
        BalanceIndexerConfig {
            registry_address,
            tick_rate: config.balance_tick_rate(),
            workers: config.indexer.balance_workers,
        },
    ));

    let cancel = CancellationToken::new();
    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    {
        let watcher = watcher.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move { watcher.run(cancel).await.context("event watcher failed") });
    }
    {
        let tokens = tokens.clone();
        let watcher = watcher.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            tokens
                .run(cancel, &watcher)
                .await
                .context("token indexer failed")
        });
    }
    {
        let agents = agents.clone();
        let watcher = watcher.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            agents
                .run(cancel, &watcher)
                .await
                .context("agent indexer failed")
        });
    }
    {
        let usages = usages.clone();
        let watcher = watcher.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            usages
                .run(cancel, &watcher)
                .await
                .context("usage indexer failed")
        });
    }
    {
        let balances = balances.clone();
        let watcher = watcher.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            balances
                .run(cancel, &watcher)
                .await
                .context("balance indexer failed")
        });
    }
    {
        let state = AppState {
            agents,
            balances,
            usages,
            page_size: config.server.page_size,
        };
        let addr = config.server.addr.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move { serve(addr, state, cancel).await });
    }

    supervise(tasks, cancel).await
}

async fn serve(addr: String, state: AppState, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "http server listening");

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("http server failed")
}

/// First failure cancels everything; a shutdown signal cancels cleanly.
async fn supervise(mut tasks: JoinSet<Result<()>>, cancel: CancellationToken) -> Result<()> {
    let mut first_error: Option<anyhow::Error> = None;

    loop {
        tokio::select! {
            _ = shutdown_signal(), if !cancel.is_cancelled() => {
                info!("shutdown signal received");
                cancel.cancel();
            }
            joined = tasks.join_next() => {
                let Some(result) = joined else { break };
                let task_result = match result {
                    Ok(task_result) => task_result,
                    Err(e) => Err(anyhow::anyhow!("task panicked: {e}")),
                };
                if let Err(e) = task_result {
                    if first_error.is_none() {
                        error!(error = %format!("{e:#}"), "supervised task failed, shutting down");
                        first_error = Some(e);
                    }
                    cancel.cancel();
                }
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
