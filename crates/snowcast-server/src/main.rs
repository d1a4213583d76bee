use std::sync::Arc;

use clap::Parser;
use snowcast::{InMemoryLeaseStore, LeaseTable, disconnect_channel};
use snowcast_server::server::{
    AppState,
    config::{CliArgs, ServerConfig},
    create_router,
    session::{SessionRegistry, run_reaper},
    telemetry::init_telemetry,
};
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    init_telemetry(config.log_format)?;

    let table = LeaseTable::new(Arc::new(InMemoryLeaseStore::new(config.backup_capacity)));
    let (notifier, listener) = disconnect_channel();
    let sessions = Arc::new(SessionRegistry::new(config.session_ttl, notifier));
    let cancel = CancellationToken::new();

    let disconnects = tokio::spawn(listener.run(table.clone(), cancel.clone()));
    let reaper = tokio::spawn(run_reaper(
        sessions.clone(),
        config.reap_interval,
        cancel.clone(),
    ));

    let state = Arc::new(AppState {
        table,
        sessions,
        default_max_logical_node_count: config.default_max_logical_node_count,
        default_backup_count: config.default_backup_count,
    });

    let tcp = TcpListener::bind(&config.server_addr).await?;
    log_startup_info(&config);

    axum::serve(tcp, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    reaper.await?;
    let released = disconnects.await?;
    tracing::info!(released, "Service shut down successfully");
    Ok(())
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting lease service on {} with full config: {:#?}",
            config.server_addr,
            config
        );
    } else {
        tracing::info!(
            "Starting lease service on {} with backup capacity {}",
            config.server_addr,
            config.backup_capacity
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");
}
