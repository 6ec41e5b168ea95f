//! HTTP ingress server.
//!
//! # Responsibilities
//! - Create the Axum router with the single relay handler
//! - Wire up middleware (request id, tracing, body limit)
//! - Hand descriptors to the multiplexer and map outcomes to responses
//! - Stop accepting on the shutdown broadcast

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use bytes::Bytes;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::RelayConfig;
use crate::http::request::{IngressRequest, X_REQUEST_ID};
use crate::http::response::{error_response, relay_response};
use crate::mux::Multiplexer;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub mux: Arc<Multiplexer>,
}

/// HTTP ingress for the relay.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &RelayConfig, mux: Arc<Multiplexer>) -> Self {
        let router = Self::build_router(config, AppState { mux });
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &RelayConfig, state: AppState) -> Router {
        Router::new()
            .route("/", post(relay_handler))
            .with_state(state)
            .layer(DefaultBodyLimit::disable())
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(RequestBodyLimitLayer::new(config.listener.max_body_bytes)),
            )
    }

    /// Serve on `listener` until the shutdown broadcast fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Relay one JSON-described request upstream.
///
/// The body is parsed as JSON whatever `content-type` says.
async fn relay_handler(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let request_id = headers.get(X_REQUEST_ID).and_then(|v| v.to_str().ok());

    let request: IngressRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(request_id = ?request_id, error = %e, "Rejected ingress body");
            return (StatusCode::BAD_REQUEST, format!("invalid JSON body: {e}")).into_response();
        }
    };

    let descriptor = match request.into_descriptor(request_id) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            tracing::warn!(request_id = ?request_id, error = %e, "Malformed request");
            return error_response(&e);
        }
    };

    let id = descriptor.id;
    tracing::debug!(
        request_id = %id,
        method = %descriptor.method,
        authority = %descriptor.url.authority,
        path = %descriptor.url.path_and_query,
        "Relaying request"
    );

    let outcome = state.mux.submit(descriptor).await;
    match &outcome {
        Ok(record) => tracing::debug!(request_id = %id, status = record.status, "Relay complete"),
        Err(e) => tracing::warn!(request_id = %id, error = %e, "Relay failed"),
    }
    relay_response(outcome)
}
