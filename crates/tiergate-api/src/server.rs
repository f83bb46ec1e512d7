//! HTTP server configuration and request routing.
//!
//! Requests flow through middleware in order:
//! 1. Request ID generation
//! 2. Request/response logging
//! 3. Timeout enforcement
//! 4. Operator authentication (operator routes only)
//! 5. Handler execution
//!
//! # Graceful Shutdown
//!
//! On SIGTERM or Ctrl+C the server stops accepting connections and waits
//! for in-flight requests. Draining the pipeline is the caller's job, via
//! [`Gateway::shutdown`].

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{DefaultBodyLimit, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tiergate_pipeline::MAX_PAYLOAD_SIZE;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    handlers,
    middleware::auth::{operator_auth, token_digest},
    Gateway,
};

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The gateway behind the HTTP surface.
    pub gateway: Arc<Gateway>,
    /// SHA-256 of the operator token; `None` disables operator routes.
    pub operator_token_digest: Option<Arc<[u8]>>,
}

impl AppState {
    /// State for `gateway`, guarding operator routes with `operator_token`.
    pub fn new(gateway: Arc<Gateway>, operator_token: Option<&str>) -> Self {
        Self {
            gateway,
            operator_token_digest: operator_token
                .filter(|token| !token.is_empty())
                .map(|token| Arc::from(token_digest(token))),
        }
    }
}

/// Creates the Axum router with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use std::{sync::Arc, time::Duration};
///
/// use tiergate_api::{create_router, AppState, Gateway};
///
/// fn app(gateway: Arc<Gateway>) -> axum::Router {
///     create_router(AppState::new(gateway, Some("operator-token")), Duration::from_secs(30))
/// }
/// ```
pub fn create_router(state: AppState, request_timeout: Duration) -> Router {
    let health_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check));

    let webhook_routes = Router::new()
        .route("/webhooks/{source}", post(handlers::receive_webhook))
        .layer(DefaultBodyLimit::max(MAX_PAYLOAD_SIZE));

    let operator_routes = Router::new()
        .route("/operations", post(handlers::execute_operation))
        .route("/dead-letters", get(handlers::list_dead_letters))
        .route("/dead-letters/{event_id}", get(handlers::get_dead_letter))
        .route("/dead-letters/{event_id}/replay", post(handlers::replay_dead_letter))
        .route("/circuits", get(handlers::list_circuits))
        .layer(middleware::from_fn_with_state(state.clone(), operator_auth));

    Router::new()
        .merge(health_routes)
        .merge(webhook_routes)
        .merge(operator_routes)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Middleware to inject request ID into all responses.
///
/// Reuses an incoming `X-Request-Id` so ids survive across services.
async fn inject_request_id(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);

    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;

    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert("X-Request-Id", header_value);
    }

    response
}

/// Starts the HTTP server with graceful shutdown support.
///
/// Binds to `addr` and serves requests until a shutdown signal arrives.
///
/// # Errors
///
/// Returns `std::io::Error` if the address cannot be bound or serving fails.
pub async fn start_server(
    state: AppState,
    addr: SocketAddr,
    request_timeout: Duration,
) -> Result<(), std::io::Error> {
    let app = create_router(state, request_timeout);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (SIGTERM or Ctrl+C).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, starting graceful shutdown"),
        () = terminate => info!("Received SIGTERM, starting graceful shutdown"),
    }
}
