//! Health check, metrics, and webhook endpoints for Kubernetes
//!
//! - `/healthz` - Liveness: Is the process alive?
//! - `/readyz` - Readiness: Is the webhook ready to admit pods?
//! - `/metrics` - Prometheus metrics in text format
//! - `/mutate--v1-pod` - Pod mutating admission webhook

use crate::admission::PodDefaulter;
use crate::server::metrics::SharedMetrics;
use crate::server::shutdown::ShutdownSignal;
use crate::server::webhook::{handle_mutate, MUTATE_POD_PATH};
use axum::{
    extract::{FromRef, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

/// Shared state for readiness tracking
///
/// Set to ready once the mutation strategy is bound and the server task is running.
#[derive(Debug, Clone)]
pub struct ReadinessState {
    ready: Arc<AtomicBool>,
}

impl ReadinessState {
    /// Create a new readiness state (initially not ready)
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark as not ready (e.g., during shutdown)
    ///
    /// The readiness probe then returns 503 and the pod is taken out of the
    /// webhook Service endpoints.
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

impl Default for ReadinessState {
    fn default() -> Self {
        Self::new()
    }
}

/// Combined server state for all endpoints
#[derive(Clone)]
pub struct ServerState {
    readiness: ReadinessState,
    metrics: SharedMetrics,
    defaulter: PodDefaulter,
}

impl ServerState {
    pub fn new(readiness: ReadinessState, metrics: SharedMetrics, defaulter: PodDefaulter) -> Self {
        Self {
            readiness,
            metrics,
            defaulter,
        }
    }
}

impl FromRef<ServerState> for PodDefaulter {
    fn from_ref(state: &ServerState) -> Self {
        state.defaulter.clone()
    }
}

/// Liveness probe handler
///
/// Always returns 200 OK - if this responds, the process is alive.
async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe handler
async fn readyz(State(state): State<ServerState>) -> StatusCode {
    if state.readiness.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Prometheus metrics handler
async fn metrics(State(state): State<ServerState>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

/// How long in-flight admission requests may take after shutdown starts
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the router for health, metrics, and webhook endpoints
pub fn build_router(state: ServerState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(self::metrics))
        .route(MUTATE_POD_PATH, post(handle_mutate))
        .with_state(state)
}

/// Run the server on the specified port (HTTP, no TLS)
///
/// The API server only calls webhooks over HTTPS, so this mode is for local
/// development and for probes when TLS is terminated elsewhere.
///
/// # Returns
/// Runs until `shutdown` fires and in-flight requests are done
pub async fn run_server(
    port: u16,
    state: ServerState,
    shutdown: ShutdownSignal,
) -> Result<(), std::io::Error> {
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    // Log after successful bind - server is actually listening
    info!(port = %port, "Webhook server listening (HTTP)");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.wait())
        .await
        .map_err(std::io::Error::other)
}

/// Run the server with TLS (HTTPS)
///
/// # Arguments
/// * `port` - The port to listen on (typically 9443 for the webhook)
/// * `state` - Readiness, metrics, and the bound defaulter
/// * `tls_config` - rustls ServerConfig for TLS
/// * `shutdown` - Stops accepting connections and drains for up to `DRAIN_TIMEOUT`
pub async fn run_server_tls(
    port: u16,
    state: ServerState,
    tls_config: Arc<rustls::ServerConfig>,
    shutdown: ShutdownSignal,
) -> Result<(), std::io::Error> {
    use axum_server::tls_rustls::RustlsConfig;
    use axum_server::Handle;

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let config = RustlsConfig::from_config(tls_config);

    info!(port = %port, "Webhook server listening (HTTPS)");

    let handle = Handle::new();
    let drain = handle.clone();
    tokio::spawn(async move {
        shutdown.wait().await;
        drain.graceful_shutdown(Some(DRAIN_TIMEOUT));
    });

    axum_server::bind_rustls(addr, config)
        .handle(handle)
        .serve(app.into_make_service())
        .await
}
