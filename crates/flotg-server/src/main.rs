mod config;
mod serve;
mod tls;

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

use flotg_api::{AppStateInner, router};
use flotg_db::Database;
use flotg_ingest::{Converter, EventFeed, Ingestor, PeerDirectory};
use flotg_queue::{CancellationToken, Queue};
use flotg_types::Logger;

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flotg=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let logger = Logger::tracing();
    let shutdown = CancellationToken::new();

    // Storage must be reachable before anything is served
    let db = Database::open(&config.db_path)
        .with_context(|| format!("failed to open storage at {}", config.db_path.display()))?;
    db.ping().context("storage did not answer")?;
    let db = Arc::new(db);

    let tls = tls::load_server_config(&config.tls_authority)?;
    let acceptor = TlsAcceptor::from(Arc::new(tls));

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    // Queue worker
    let queue = Queue::new(config.queue_backlog, logger.clone());
    queue.initialize(&shutdown)?;
    let worker = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.run().await })
    };

    // Optional JSONL ingestion feed
    let feed = config.event_feed.clone().map(|path| {
        let directory = Arc::new(PeerDirectory::new());
        let ingestor = Ingestor::new(
            queue.clone(),
            db.clone(),
            directory.clone(),
            Converter::new(config.profile.clone()),
            logger.clone(),
        );
        let feed = EventFeed::new(path, directory, ingestor, logger.clone());
        let cancel = shutdown.clone();
        tokio::spawn(async move {
            match feed.run(cancel).await {
                Ok(stats) => info!(
                    "Event feed done: {} peers, {} stored, {} dropped, {} malformed",
                    stats.peers, stats.stored, stats.dropped, stats.malformed
                ),
                Err(e) => error!("Event feed failed: {}", e),
            }
        })
    });

    let state = Arc::new(AppStateInner {
        queue: queue.clone(),
        db,
        logger,
        submit_timeout: config.submit_timeout,
        rpc_wait: config.rpc_wait,
        shutdown: shutdown.clone(),
    });
    let app = router(state);

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    info!("flotg query service listening on {} (mTLS)", addr);
    serve::serve(listener, acceptor, app, shutdown.clone()).await;

    queue.stop();
    match worker.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Queue worker did not start: {}", e),
        Err(e) => error!("Queue worker task failed: {}", e),
    }
    if let Some(feed) = feed {
        let _ = feed.await;
    }

    info!("flotg stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
