//! Admission entry point for Pod defaulting
//!
//! `PodDefaulter` receives the object decoded by the webhook transport, checks
//! that it is a Pod, and applies the bound `PodMutator`. The mutator runs under
//! `catch_unwind`, so a panicking strategy becomes an ordinary error instead of
//! taking down the webhook server.
//!
//! Recognized panic payloads:
//! * `&'static str` and `String` become [`DefaultingError::Panic`]
//! * `Box<dyn Error + Send + Sync>`, `Arc<dyn Error + Send + Sync>`,
//!   `anyhow::Error` and `std::io::Error` become [`DefaultingError::PanicError`]
//!   with the error kept as the source
//! * anything else is kept inside [`DefaultingError::UnknownPanic`]
//!
//! A strategy failing with its own error type should use [`panic_with_error`],
//! which boxes the error so it comes back unchanged.

use crate::admission::strategy::PodMutator;
use crate::server::metrics::SharedMetrics;
use k8s_openapi::api::core::v1::Pod;
use kube::core::DynamicObject;
use std::any::Any;
use std::error::Error as StdError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Errors surfaced to the admission transport
#[derive(Debug, Error)]
pub enum DefaultingError {
    #[error("expected a Pod object but got {actual}")]
    TypeMismatch { actual: String },

    #[error("failed to decode Pod: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to apply Pod changes: {0}")]
    Apply(#[from] json_patch::PatchError),

    /// Panic carrying a text payload; the message is the payload itself
    #[error("{0}")]
    Panic(String),

    /// Panic carrying an error value
    #[error("{0}")]
    PanicError(#[source] Box<dyn StdError + Send + Sync>),

    /// Panic with an unrecognized payload, kept as raised
    #[error("unknown defaulting function panic")]
    UnknownPanic(Box<dyn Any + Send>),
}

impl DefaultingError {
    /// Translate a panic payload into an error
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<&'static str>() {
            Ok(text) => return DefaultingError::Panic((*text).to_string()),
            Err(payload) => payload,
        };
        let payload = match payload.downcast::<String>() {
            Ok(text) => return DefaultingError::Panic(*text),
            Err(payload) => payload,
        };
        let payload = match payload.downcast::<Box<dyn StdError + Send + Sync>>() {
            Ok(err) => return DefaultingError::PanicError(*err),
            Err(payload) => payload,
        };
        let payload = match payload.downcast::<Arc<dyn StdError + Send + Sync>>() {
            Ok(err) => return DefaultingError::PanicError(Box::new(*err)),
            Err(payload) => payload,
        };
        let payload = match payload.downcast::<anyhow::Error>() {
            Ok(err) => return DefaultingError::PanicError((*err).into()),
            Err(payload) => payload,
        };
        match payload.downcast::<std::io::Error>() {
            Ok(err) => DefaultingError::PanicError(err),
            Err(payload) => DefaultingError::UnknownPanic(payload),
        }
    }

    /// Raw payload of a panic that was not recognized
    pub fn unknown_payload(&self) -> Option<&(dyn Any + Send)> {
        match self {
            DefaultingError::UnknownPanic(payload) => Some(&**payload),
            _ => None,
        }
    }

    pub fn is_type_mismatch(&self) -> bool {
        matches!(self, DefaultingError::TypeMismatch { .. })
    }

    pub fn is_panic(&self) -> bool {
        matches!(
            self,
            DefaultingError::Panic(_)
                | DefaultingError::PanicError(_)
                | DefaultingError::UnknownPanic(_)
        )
    }
}

/// Applies the bound mutation strategy to admitted Pods
#[derive(Clone)]
pub struct PodDefaulter {
    mutator: Arc<dyn PodMutator>,
    metrics: Option<SharedMetrics>,
}

impl PodDefaulter {
    pub fn new(mutator: Arc<dyn PodMutator>) -> Self {
        Self {
            mutator,
            metrics: None,
        }
    }

    /// Record a counter for every successfully applied strategy
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Default the admitted object in place
    ///
    /// # Errors
    /// * `TypeMismatch` - the object is not a `v1/Pod`; nothing is logged or mutated
    /// * `Decode` - the object claims to be a Pod but does not decode as one
    /// * `Apply` - the mutated Pod could not be written back into `object`
    /// * `Panic`, `PanicError`, `UnknownPanic` - the strategy panicked; `object` is unchanged
    pub fn default(&self, object: &mut DynamicObject) -> Result<(), DefaultingError> {
        check_pod_type(object)?;

        let original = serde_json::to_value(&*object)?;
        let mut pod: Pod = serde_json::from_value(original.clone())?;
        let decoded = serde_json::to_value(&pod)?;

        info!(
            name = pod.metadata.name.as_deref().unwrap_or_default(),
            namespace = pod.metadata.namespace.as_deref().unwrap_or_default(),
            uid = pod.metadata.uid.as_deref().unwrap_or_default(),
            labels = ?pod.metadata.labels,
            "Injecting node affinity"
        );

        let mutator = &self.mutator;
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| mutator.mutate(&mut pod))) {
            let err = DefaultingError::from_panic(payload);
            warn!(error = %err, strategy = mutator.kind().as_str(), "Defaulting function panicked");
            return Err(err);
        }

        // Replay only the strategy's changes so fields unknown to the Pod schema survive
        let changes = json_patch::diff(&decoded, &serde_json::to_value(&pod)?);
        let mut updated = original;
        json_patch::patch(&mut updated, &changes.0)?;
        *object = serde_json::from_value(updated)?;

        if let Some(ref metrics) = self.metrics {
            metrics.record(self.mutator.kind());
        }

        Ok(())
    }
}

/// Panic with `err` so the defaulter returns it unchanged as `PanicError`
pub fn panic_with_error<E>(err: E) -> !
where
    E: StdError + Send + Sync + 'static,
{
    let boxed: Box<dyn StdError + Send + Sync> = Box::new(err);
    panic::panic_any(boxed)
}

/// Text of a `&str` or `String` panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> Option<&str> {
    if let Some(text) = payload.downcast_ref::<&'static str>() {
        return Some(*text);
    }
    payload.downcast_ref::<String>().map(String::as_str)
}

/// Report panics through `tracing` instead of the default stderr hook
///
/// Contained strategy panics are logged here with their location, then again
/// by the defaulter with the resulting error.
pub fn install_panic_hook() {
    panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        error!(
            panic = panic_message(info.payload()).unwrap_or("<non-text payload>"),
            location = %location,
            "Panic raised"
        );
    }));
}

/// Reject anything that is not exactly `v1/Pod`
fn check_pod_type(object: &DynamicObject) -> Result<(), DefaultingError> {
    use k8s_openapi::Resource;

    match object.types.as_ref() {
        Some(types) if types.api_version == Pod::API_VERSION && types.kind == Pod::KIND => Ok(()),
        Some(types) => Err(DefaultingError::TypeMismatch {
            actual: format!("{}/{}", types.api_version, types.kind),
        }),
        None => Err(DefaultingError::TypeMismatch {
            actual: "<unknown>".to_string(),
        }),
    }
}

#[cfg(test)]
#[path = "defaulter_test.rs"]
mod tests;
