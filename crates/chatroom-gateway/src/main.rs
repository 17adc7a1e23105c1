use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

mod app;
mod convert;
mod http;
mod ws;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatroom_gateway=info,tower_http=debug".into()),
        )
        .init();

    let config_path = std::env::var("ROOM_CONFIG").ok();
    let config = chatroom_core::config::RoomConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "config load failed, using defaults");
        chatroom_core::config::RoomConfig::default()
    });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    let state = Arc::new(app::AppState::new(config));
    let router = app::build_router(state.clone());

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!(%addr, "room orchestrator gateway listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;

    Ok(())
}

/// Waits for SIGINT/SIGTERM, then cancels every in-flight LLM task and
/// awaits their completion with errors suppressed, before letting
/// `axum::serve` return.
async fn shutdown_signal(state: Arc<app::AppState>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received, cancelling in-flight LLM tasks");
    state.dispatcher.shutdown().await;
}
