//! Pod mutation strategies
//!
//! Two ways of steering a pod toward a node pool:
//! - `DefaultStrategy`: appends a preferred node affinity term for the pool
//! - `FallbackStrategy`: stamps the pool annotation when the pool could not be resolved
//!
//! Which one is bound is decided once at startup by `select_strategy`.

use k8s_openapi::api::core::v1::{
    Affinity, NodeAffinity, NodeSelectorRequirement, NodeSelectorTerm, Pod,
    PreferredSchedulingTerm,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

/// Label key on nodes (and annotation key on pods) identifying the worker pool
pub const NODE_SELECTOR_KEY: &str = "worker.gardener.cloud/pool";

/// Weight of the injected preferred scheduling term
pub const PREFERENCE_WEIGHT: i32 = 10;

/// Node selector operator for the injected match expression
pub const NODE_SELECTOR_OP_IN: &str = "In";

/// Errors reported (logged, never returned) by the strategies
#[derive(Debug, Error)]
pub enum NodeSelectorError {
    #[error("node selector not found")]
    NotFound,
}

/// Which strategy produced a mutation
///
/// Used to pick the counter that records the applied strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Default,
    Fallback,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Default => "default",
            StrategyKind::Fallback => "fallback",
        }
    }
}

/// A pod mutation bound at startup and applied on every admission call
///
/// Mutation is infallible: there is no return value and no error.
pub trait PodMutator: Send + Sync {
    /// Mutate the pod in place
    fn mutate(&self, pod: &mut Pod);

    /// Strategy identity, for metrics
    fn kind(&self) -> StrategyKind;
}

/// Injects a preferred node affinity toward the resolved pool
#[derive(Debug, Clone)]
pub struct DefaultStrategy {
    node_selector_value: String,
    omitted_namespaces: Vec<String>,
}

impl DefaultStrategy {
    pub fn new(node_selector_value: impl Into<String>, omitted_namespaces: Vec<String>) -> Self {
        Self {
            node_selector_value: node_selector_value.into(),
            omitted_namespaces,
        }
    }

    fn is_omitted(&self, namespace: Option<&str>) -> bool {
        let namespace = namespace.unwrap_or_default();
        self.omitted_namespaces.iter().any(|ns| ns == namespace)
    }

    fn preferred_term(&self) -> PreferredSchedulingTerm {
        PreferredSchedulingTerm {
            weight: PREFERENCE_WEIGHT,
            preference: NodeSelectorTerm {
                match_expressions: Some(vec![NodeSelectorRequirement {
                    key: NODE_SELECTOR_KEY.to_string(),
                    operator: NODE_SELECTOR_OP_IN.to_string(),
                    values: Some(vec![self.node_selector_value.clone()]),
                }]),
                ..Default::default()
            },
        }
    }
}

impl PodMutator for DefaultStrategy {
    fn mutate(&self, pod: &mut Pod) {
        let namespace = pod.metadata.namespace.as_deref();
        if self.is_omitted(namespace) {
            info!(
                namespace = namespace.unwrap_or_default(),
                "Omitting affinity injection: forbidden namespace"
            );
            return;
        }

        // Each level is created only when absent; existing terms are kept in order
        let terms = pod
            .spec
            .get_or_insert_with(Default::default)
            .affinity
            .get_or_insert_with(Affinity::default)
            .node_affinity
            .get_or_insert_with(NodeAffinity::default)
            .preferred_during_scheduling_ignored_during_execution
            .get_or_insert_with(Vec::new);

        terms.push(self.preferred_term());
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Default
    }
}

/// Marks the pod with the pool annotation when no pool could be resolved
#[derive(Debug, Clone)]
pub struct FallbackStrategy {
    node_selector_value: String,
}

impl FallbackStrategy {
    pub fn new(node_selector_value: impl Into<String>) -> Self {
        Self {
            node_selector_value: node_selector_value.into(),
        }
    }
}

impl PodMutator for FallbackStrategy {
    fn mutate(&self, pod: &mut Pod) {
        pod.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(
                NODE_SELECTOR_KEY.to_string(),
                self.node_selector_value.clone(),
            );

        error!(
            error = %NodeSelectorError::NotFound,
            node_selector_value = %self.node_selector_value,
            "Unable to set node selector"
        );
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Fallback
    }
}

/// Outcome of the upstream node pool lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeSelector {
    /// A node pool with this value exists
    Resolved(String),
    /// No safe pool was found; carries the attempted value
    Unresolved(String),
}

/// Bind the strategy matching the node selector lookup
///
/// The returned mutator reports its own `StrategyKind`, so whoever applies it
/// records the matching counter.
pub fn select_strategy(
    selector: NodeSelector,
    omitted_namespaces: Vec<String>,
) -> Arc<dyn PodMutator> {
    match selector {
        NodeSelector::Resolved(value) => {
            info!(node_selector_value = %value, "Binding default strategy");
            Arc::new(DefaultStrategy::new(value, omitted_namespaces))
        }
        NodeSelector::Unresolved(value) => {
            info!(node_selector_value = %value, "Binding fallback strategy");
            Arc::new(FallbackStrategy::new(value))
        }
    }
}

#[cfg(test)]
#[path = "strategy_test.rs"]
mod tests;
