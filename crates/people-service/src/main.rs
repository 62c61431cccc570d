use anyhow::Result;
use people_service::{api, PeopleServiceConfig, PeopleServiceState};
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = telemetry::init_with_service("people-service");

    info!("Starting People Service...");

    let config = PeopleServiceConfig::from_env()?;
    info!(
        bind = %config.bind_addr,
        upload_dir = %config.upload_dir.display(),
        results_dir = %config.results_dir.display(),
        second_backend = %config.second_backend_url,
        "People Service configuration"
    );

    config.ensure_directories().await?;

    let bind_addr = config.bind_addr.clone();
    let state = PeopleServiceState::from_config(config)?;
    let app = api::router(state);

    info!("Binding to {}", bind_addr);
    let listener = TcpListener::bind(&bind_addr).await?;
    info!("People Service listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("People Service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }

    info!("Shutting down gracefully...");
}
