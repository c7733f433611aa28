use crate::api;
use crate::config::AppConfig;
use crate::store::ScriptStore;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{Method, header};
use axum::routing::{get, post};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<ScriptStore>,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<ScriptStore>) -> Self {
        Self { config, store }
    }
}

pub fn build_router(state: AppState) -> Router {
    let public_dir = state.config.public_dir.clone();
    let enable_cors = state.config.enable_cors;
    let max_body_bytes = state.config.max_body_bytes;

    let api_routes = Router::new()
        .route("/version", get(api::get_version))
        .route("/update-system", post(api::update_system))
        .route("/rollback", post(api::rollback))
        .route("/history", get(api::get_history));

    let static_files = ServeDir::new(public_dir).append_index_html_on_directories(true);

    let mut router = Router::new()
        .nest("/api", api_routes)
        .fallback_service(static_files)
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE]),
        );
    }

    router
}

/// Bind the listener and serve until ctrl-c.
pub async fn run(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
