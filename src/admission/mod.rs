//! Pod defaulting core
//!
//! - `strategy`: the Default and Fallback pod mutations and their selection
//! - `defaulter`: the panic-safe admission entry point that applies them

pub mod defaulter;
pub mod strategy;

pub use defaulter::{
    install_panic_hook, panic_message, panic_with_error, DefaultingError, PodDefaulter,
};
pub use strategy::{
    select_strategy, DefaultStrategy, FallbackStrategy, NodeSelector, NodeSelectorError,
    PodMutator, StrategyKind, NODE_SELECTOR_KEY, PREFERENCE_WEIGHT,
};
