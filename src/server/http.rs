//! HTTP surface
//!
//! | Path | Description |
//! |------|-------------|
//! | `GET /audio` | Live encoded stream (chunked), one frame per body chunk |
//! | anything else | `404` with a short HTML body |
//!
//! The response body owns the [`ClientSession`](crate::relay::ClientSession).
//! When the client disconnects or a write fails, the body is dropped and the
//! session finishes: the demand lease is released and the queue is drained.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use futures::StreamExt;
use tokio::sync::Semaphore;

use crate::engine::OutputSpec;
use crate::relay::RelayHandle;
use crate::supervisor::SupervisorHandle;

const CACHE_CONTROL: &str = "no-cache, no-store, must-revalidate";

/// Shared state of the HTTP handlers
#[derive(Debug, Clone)]
pub struct AppState {
    relay: RelayHandle,
    supervisor: SupervisorHandle,
    mime_type: &'static str,
    connections: Option<Arc<Semaphore>>,
}

impl AppState {
    pub fn new(
        relay: RelayHandle,
        supervisor: SupervisorHandle,
        output: &OutputSpec,
        max_connections: usize,
    ) -> Self {
        let connections = if max_connections > 0 {
            Some(Arc::new(Semaphore::new(max_connections)))
        } else {
            None
        };

        Self {
            relay,
            supervisor,
            mime_type: output.codec.mime_type(),
            connections,
        }
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/audio",
            get(stream_audio).head(not_found).fallback(not_found),
        )
        .fallback(not_found)
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

async fn stream_audio(State(state): State<AppState>) -> Response {
    let permit = match &state.connections {
        Some(connections) => match Arc::clone(connections).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                tracing::warn!("Listener rejected: limit reached");
                return unavailable();
            }
        },
        None => None,
    };

    let mut session = match state.relay.subscribe().await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(error = %e, "Listener rejected");
            return unavailable();
        }
    };
    session.attach_lease(state.supervisor.join());

    tracing::info!(session_id = session.id(), "Listener connected");

    // The permit lives as long as the body
    let stream = session.map(move |chunk| {
        let _permit = &permit;
        chunk
    });

    (
        [
            (header::CONTENT_TYPE, state.mime_type),
            (header::CACHE_CONTROL, CACHE_CONTROL),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

async fn not_found() -> (StatusCode, Html<&'static str>) {
    (StatusCode::NOT_FOUND, Html("<h1>404 Not found</h1>"))
}

fn unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Html("<h1>503 Service Unavailable</h1>"),
    )
        .into_response()
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        path = %path,
        peer = ?peer,
        status = response.status().as_u16(),
        "Request"
    );
    response
}
