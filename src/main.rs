use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::info;

use roomledger::config::Config;
use roomledger::notify::NotifyHub;
use roomledger::{reaper, LedgerBuilder};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    roomledger::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;

    let notify = Arc::new(NotifyHub::new());
    let ledger = Arc::new(LedgerBuilder::from_config(&config).notify(notify.clone()).open()?);

    info!("roomledger running");
    info!("  wal: {}", config.wal_path().display());
    info!("  creation policy: {:?}", config.creation_policy);
    info!("  pending hold ttl: {}s", config.pending_hold_ttl.as_secs());
    info!(
        "  refunds: full >= {}d, {}% >= {}d",
        config.refund.full_refund_days, config.refund.partial_percent, config.refund.partial_refund_days
    );

    tokio::spawn(reaper::run_reaper(ledger.clone(), config.sweep_interval));
    tokio::spawn(reaper::run_compactor(ledger.clone(), config.compact_threshold));

    // Lifecycle events go to the log until a real consumer subscribes.
    let mut events = notify.subscribe_all();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::debug!(target: "roomledger::events", "{}", event.payload()),
                Err(RecvError::Lagged(n)) => tracing::warn!("event log lagged by {n} events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("SIGTERM handler unavailable: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    shutdown.await;

    info!("shutdown signal received, compacting WAL");
    if let Err(e) = ledger.compact_wal().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("roomledger stopped");
    Ok(())
}
