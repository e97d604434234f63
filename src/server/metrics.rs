//! Prometheus counters for applied mutation strategies
//!
//! Counts how often the default strategy (node affinity injected) and the
//! fallback strategy (pool annotation only) were applied. Counters are
//! label-free and only ever increase.

use crate::admission::StrategyKind;
use prometheus::{Encoder, IntCounter, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Metric subsystem shared by all counters
pub const METRICS_SUBSYSTEM: &str = "kim_snatch";

/// Metrics registry shared between the webhook and the `/metrics` endpoint
pub type SharedMetrics = Arc<WebhookMetrics>;

/// Counters for the webhook
pub struct WebhookMetrics {
    registry: Registry,
    shoots_default: IntCounter,
    shoots_fallback: IntCounter,
}

impl WebhookMetrics {
    /// Create and register all counters in a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let shoots_default = IntCounter::with_opts(
            Opts::new(
                "shoots_default",
                "Indicates the number of Shoots with NodeAffinity",
            )
            .subsystem(METRICS_SUBSYSTEM),
        )?;
        let shoots_fallback = IntCounter::with_opts(
            Opts::new(
                "shoots_fallback",
                "Indicates the number of Shoots with missing NodeAffinity",
            )
            .subsystem(METRICS_SUBSYSTEM),
        )?;

        registry.register(Box::new(shoots_default.clone()))?;
        registry.register(Box::new(shoots_fallback.clone()))?;

        Ok(Self {
            registry,
            shoots_default,
            shoots_fallback,
        })
    }

    /// The default strategy was applied
    pub fn record_default_shoot(&self) {
        self.shoots_default.inc();
    }

    /// The fallback strategy was applied
    pub fn record_fallback_shoot(&self) {
        self.shoots_fallback.inc();
    }

    /// Record the counter matching an applied strategy
    pub fn record(&self, kind: StrategyKind) {
        match kind {
            StrategyKind::Default => self.record_default_shoot(),
            StrategyKind::Fallback => self.record_fallback_shoot(),
        }
    }

    pub fn default_shoots(&self) -> u64 {
        self.shoots_default.get()
    }

    pub fn fallback_shoots(&self) -> u64 {
        self.shoots_fallback.get()
    }

    /// Encode all metrics in Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Create the shared metrics registry
pub fn create_metrics() -> Result<SharedMetrics, prometheus::Error> {
    Ok(Arc::new(WebhookMetrics::new()?))
}
