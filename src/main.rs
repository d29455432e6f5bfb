use std::sync::Arc;

use tracing::info;

use innkeep::config::Config;
use innkeep::engine::Engine;
use innkeep::mailer::LogMailer;
use innkeep::outbox::{self, Outbox};
use innkeep::scheduler::{self, Scheduler};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    innkeep::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;
    let wal_path = config.data_dir.join("innkeep.wal");

    let (outbox, outbox_rx) = Outbox::channel();
    let engine = Arc::new(Engine::new(wal_path.clone(), config.engine.clone(), outbox)?);

    let dispatcher = tokio::spawn(outbox::run_dispatcher(
        engine.clone(),
        Arc::new(LogMailer),
        outbox_rx,
    ));
    let compactor = tokio::spawn(scheduler::run_compactor(
        engine.clone(),
        config.compact_threshold,
    ));

    let scheduler = Scheduler::new(engine.clone(), config.jobs.clone());
    scheduler.start_all();

    info!("innkeep running");
    info!("  wal: {}", wal_path.display());
    info!("  timezone: {}", config.timezone);
    info!("  test_mode: {}", config.engine.test_mode);
    info!(
        "  gateway: {} ({})",
        config.engine.gateway_provider,
        if config.engine.gateway_server_key.is_some() { "configured" } else { "no server key" }
    );
    let metrics_url = config
        .metrics_port
        .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"));
    info!("  metrics: {metrics_url}");
    for job in &config.jobs {
        info!("  job {}: {}", job.kind(), job.expression());
    }

    // Graceful shutdown: stop timers on SIGTERM/ctrl-c, let in-flight sweeps finish
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    info!("shutdown signal received");
    scheduler.shutdown().await;
    compactor.abort();
    dispatcher.abort();

    info!("innkeep stopped");
    Ok(())
}
