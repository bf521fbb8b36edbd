//! Serve mode: wires every subsystem together and runs until Ctrl-C.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use steward_api::{ApiState, build_router};
use steward_controller::Controller;
use steward_core::StewardConfig;
use steward_health::HttpProbe;
use steward_longpoll::LongPollHost;
use steward_metrics::MetricsAggregator;
use steward_state::{CheckpointStore, VersionedKeyStore};

pub async fn run(config: StewardConfig, data_dir: Option<PathBuf>) -> anyhow::Result<()> {
    info!("Steward daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    let store = VersionedKeyStore::new();
    let long_poll = LongPollHost::new(store.clone());
    let metrics = MetricsAggregator::new(config.metrics.retention_s);
    info!(retention_s = config.metrics.retention_s, "metrics aggregator initialized");

    let mut builder = Controller::builder(store, metrics).config(config.control.clone());

    if let Some(data_dir) = &data_dir {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("steward.redb");
        builder = builder.checkpoint(CheckpointStore::open(&db_path)?);
        info!(path = ?db_path, "checkpoint store opened");
    } else {
        warn!("no data directory; applications will not survive a restart");
    }

    if config.health.probes_enabled {
        builder = builder.health_probe(Arc::new(HttpProbe::new(config.health.probe_path.clone())));
        info!(path = %config.health.probe_path, "replica health probes enabled");
    }

    let controller = builder.build();
    controller.recover().await?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let control_handle = {
        let controller = controller.clone();
        let interval = config.reconcile_interval();
        tokio::spawn(async move {
            controller.run(interval, shutdown_rx).await;
        })
    };

    // ── Start API server ───────────────────────────────────────

    let router = build_router(ApiState {
        controller,
        long_poll,
        long_poll_config: config.long_poll.clone(),
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl-C; shutting down");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = control_handle.await;

    info!("Steward daemon stopped");
    Ok(())
}
