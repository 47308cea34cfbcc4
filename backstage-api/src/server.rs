use anyhow::Result;
use axum::{
    extract::Extension,
    http::HeaderValue,
    middleware,
    routing::{get, post},
    Router,
};
use backstage_core::config::ServerConfig;
use std::env;
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::handlers::{self, conversations, notifications, tokens};
use crate::state::ApiState;
use crate::websocket;

fn cors_layer() -> CorsLayer {
    match env::var("CORS_ORIGINS") {
        Ok(origins) => {
            let mut cors = CorsLayer::new();
            for origin in origins.split(',').map(str::trim).filter(|o| !o.is_empty()) {
                match origin.parse::<HeaderValue>() {
                    Ok(parsed) => cors = cors.allow_origin(parsed),
                    Err(_) => tracing::warn!("Ignoring invalid CORS origin: {}", origin),
                }
            }
            cors.allow_methods(Any).allow_headers(Any)
        }
        Err(_) => {
            tracing::warn!("CORS_ORIGINS not set, using permissive CORS. Set CORS_ORIGINS for production!");
            CorsLayer::permissive()
        }
    }
}

/// Builds the HTTP surface. Auth runs inside CORS so preflight requests are
/// answered without a token.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/notifications/send", post(notifications::send_notification))
        .route(
            "/api/notifications/reactivate-tokens",
            post(notifications::reactivate_tokens),
        )
        .route("/api/v1/device-tokens", post(tokens::register_device_token))
        .route("/api/v1/device-tokens/disable", post(tokens::disable_device_token))
        .route(
            "/api/v1/conversations",
            get(conversations::list_conversations).post(conversations::start_conversation),
        )
        .route(
            "/api/v1/conversations/:id/messages",
            get(conversations::get_messages).post(conversations::send_message),
        )
        .route("/api/v1/conversations/:id/open", post(conversations::open_conversation))
        .route("/api/v1/conversations/:id/status", post(conversations::set_status))
        .route("/ws/conversations/:id", get(websocket::websocket_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer())
                .layer(Extension(state))
                .layer(middleware::from_fn(auth::auth_middleware)),
        )
}

pub async fn run(state: ApiState, config: &ServerConfig) -> Result<()> {
    let ip = config.host.parse::<std::net::IpAddr>()?;
    let addr = SocketAddr::from((ip, config.api_port));
    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}
