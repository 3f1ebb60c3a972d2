pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

pub async fn serve(state: ApiState, port: u16) -> anyhow::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/pairing/begin", post(handlers::handle_pairing_begin))
        .route("/pairing/stop", post(handlers::handle_pairing_stop))
        .route("/pairing/status", get(handlers::handle_pairing_status))
        .route("/pairing/events", get(handlers::handle_pairing_events))
        .route("/ota/progress", post(handlers::handle_ota_progress))
        .with_state(state);

    let app = Router::new().nest("/api", api_routes).layer(cors);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{port}")).await?;
    tracing::info!(port, "control API listening on 127.0.0.1");
    axum::serve(listener, app).await?;
    Ok(())
}
