use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::api::{self, AppState, SharedState};
use super::embedded;
use crate::config::PployConfig;
use crate::workdir::Workdir;

/// Build the full application router: API, streaming endpoints and the UI.
pub fn build_router(state: SharedState) -> Router {
    let prefix = state.path_prefix().to_string();
    let mut router = api::api_router(&prefix)
        .route(&format!("{}assets/{{*path}}", prefix), get(embedded::asset))
        .route(&prefix, get(embedded::index))
        .route(&format!("{}{{project}}", prefix), get(embedded::index));

    // `/pploy` → `/pploy/`, relative URLs in the UI need the slash
    if prefix != "/" {
        let target = prefix.clone();
        router = router.route(
            prefix.trim_end_matches('/'),
            get(move || {
                let target = target.clone();
                async move { (StatusCode::FOUND, [(header::LOCATION, target)]) }
            }),
        );
    }

    router
        .fallback(|| async { (StatusCode::NOT_FOUND, "not found").into_response() })
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl+C or SIGTERM.
pub async fn start_server(config: PployConfig, workdir: Workdir) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let dev_mode = config.server.dev;
    let state = Arc::new(AppState::new(config, workdir));

    let mut app = build_router(Arc::clone(&state));
    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(
        address = %local_addr,
        prefix = state.path_prefix(),
        workdir = %state.workdir.root().display(),
        "pploy listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for Ctrl+C: {}", e);
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
                tracing::warn!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutting down, waiting for open responses");
}
