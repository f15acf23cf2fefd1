//! Composition root for the HTTP surface: explicit handler registration,
//! no discovery.

use axum::routing::{get, post};
use axum::Router;
use codemend_common::Result;
use codemend_orchestrator::{Services, WorkflowSupervisor};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::routes;

#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
    pub supervisor: Arc<WorkflowSupervisor>,
}

pub fn build_router(services: Arc<Services>, supervisor: Arc<WorkflowSupervisor>) -> Router {
    let state = AppState {
        services,
        supervisor,
    };
    Router::new()
        .route("/health", get(routes::conversations::health))
        .route(
            "/conversations",
            post(routes::conversations::create_conversation),
        )
        .route(
            "/conversations/:id",
            get(routes::conversations::get_conversation),
        )
        .route(
            "/conversations/:id/messages",
            post(routes::conversations::post_message),
        )
        .route(
            "/conversations/:id/cancel",
            post(routes::conversations::cancel_conversation),
        )
        .route(
            "/conversations/:id/stream",
            get(routes::stream::stream_conversation),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(services: Arc<Services>) -> Result<()> {
    let address = format!(
        "{}:{}",
        services.config.server.host, services.config.server.port
    );
    let supervisor = Arc::new(WorkflowSupervisor::new(services.clone()));
    let router = build_router(services, supervisor);

    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(%address, "server listening");
    axum::serve(listener, router).await?;
    Ok(())
}
