//! HTTP server for the webhook, health, and metrics endpoints
//!
//! Provides:
//! - `/mutate--v1-pod` - Pod mutating admission webhook
//! - `/healthz`, `/readyz` - Kubernetes probes
//! - `/metrics` - Prometheus counters for applied strategies
//!
//! Also provides TLS bootstrap for the webhook and graceful shutdown handling.

mod health;
pub mod metrics;
pub mod shutdown;
pub mod tls;
pub mod webhook;

pub use health::{build_router, run_server, run_server_tls, ReadinessState, ServerState};
pub use metrics::{create_metrics, SharedMetrics, WebhookMetrics};
pub use shutdown::{shutdown_channel, wait_for_signal, ShutdownController, ShutdownSignal};
pub use tls::{build_rustls_config, initialize_tls, DEFAULT_TLS_SECRET_NAME};

#[cfg(test)]
#[path = "health_test.rs"]
mod health_tests;

#[cfg(test)]
#[path = "metrics_test.rs"]
mod metrics_tests;

#[cfg(test)]
#[path = "shutdown_test.rs"]
mod shutdown_tests;

#[cfg(test)]
#[path = "tls_test.rs"]
mod tls_tests;
