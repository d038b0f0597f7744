use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::info;

use marketplace_api::config;
use marketplace_api::db;
use marketplace_api::events::{self, EventSender};
use marketplace_api::services::checkout::Capabilities;
use marketplace_api::{app_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = config::load_config()?;
    config::init_tracing(&cfg.log_level, cfg.log_json);
    info!(environment = %cfg.environment, "starting marketplace-api");

    let db = Arc::new(db::establish_connection(&cfg).await?);
    db::ensure_schema(&db).await?;

    let (tx, rx) = mpsc::channel(cfg.event_channel_capacity);
    tokio::spawn(events::process_events(rx));
    let event_sender = Arc::new(EventSender::new(tx));

    let state = Arc::new(AppState::new(
        Arc::clone(&db),
        cfg.clone(),
        event_sender,
        Capabilities::default(),
    ));

    // Bootstrap runs in the background; the API serves non-federated until
    // (and unless) it completes.
    let federation = state.services.federation.clone();
    tokio::spawn(async move { federation.bootstrap().await });

    let addr = cfg.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, app_router(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
