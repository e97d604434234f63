//! Pod mutating admission webhook that steers pods toward a worker pool
//!
//! - `admission`: mutation strategies and the panic-safe defaulting entry point
//! - `server`: webhook transport, probes, metrics, TLS bootstrap, shutdown
//! - `config`: environment configuration

pub mod admission;
pub mod config;
pub mod server;
