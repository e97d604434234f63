//! Mutating admission webhook for Pods
//!
//! Kubernetes calls this webhook on Pod creation. The admitted object is run
//! through the `PodDefaulter` and any change is returned as a JSON patch.
//!
//! ## Endpoints
//! - POST /mutate--v1-pod - Kubernetes AdmissionReview webhook
//!
//! ## Responses
//! - Defaulting succeeded: allowed, with a patch when the Pod changed
//! - Defaulting failed (not a Pod, strategy panic): denied with the error text
//! - Malformed review: invalid

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use kube::core::admission::{
    AdmissionRequest, AdmissionResponse, AdmissionReview, SerializePatchError,
};
use kube::core::DynamicObject;
use kube::ResourceExt;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::admission::{DefaultingError, PodDefaulter};

/// Path the MutatingWebhookConfiguration points at
pub const MUTATE_POD_PATH: &str = "/mutate--v1-pod";

/// Errors that turn into a denied admission
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error(transparent)]
    Defaulting(#[from] DefaultingError),

    #[error("failed to serialize object: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to serialize patch: {0}")]
    Patch(#[from] SerializePatchError),
}

/// Default the admitted object and build the patch for the response
fn mutate(
    defaulter: &PodDefaulter,
    res: AdmissionResponse,
    obj: &DynamicObject,
) -> Result<AdmissionResponse, WebhookError> {
    let mut mutated = obj.clone();
    defaulter.default(&mut mutated)?;

    let patch = json_patch::diff(&serde_json::to_value(obj)?, &serde_json::to_value(&mutated)?);
    if patch.0.is_empty() {
        return Ok(res);
    }

    Ok(res.with_patch(patch)?)
}

/// Build the admission response for a single request
pub fn mutate_pod(
    defaulter: &PodDefaulter,
    req: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    let res = AdmissionResponse::from(req);

    // Only CREATE is registered, so the object is always present in practice
    let Some(obj) = req.object.as_ref() else {
        return res;
    };

    let name = obj.name_any();
    match mutate(defaulter, res.clone(), obj) {
        Ok(res) => {
            info!(
                uid = %req.uid,
                operation = ?req.operation,
                name = %name,
                patched = res.patch.is_some(),
                "Admitted pod"
            );
            res
        }
        Err(err) => {
            warn!(
                uid = %req.uid,
                operation = ?req.operation,
                name = %name,
                error = %err,
                "Denied pod"
            );
            res.deny(err.to_string())
        }
    }
}

/// Handle a full AdmissionReview
pub fn review_pod(
    defaulter: &PodDefaulter,
    review: AdmissionReview<DynamicObject>,
) -> AdmissionReview<DynamicObject> {
    let req: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(req) => req,
        Err(err) => {
            error!(error = %err, "Invalid admission review");
            return AdmissionResponse::invalid(err.to_string()).into_review();
        }
    };

    mutate_pod(defaulter, &req).into_review()
}

/// Axum handler for the /mutate--v1-pod endpoint
pub async fn handle_mutate(
    State(defaulter): State<PodDefaulter>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> impl IntoResponse {
    (StatusCode::OK, Json(review_pod(&defaulter, review)))
}

#[cfg(test)]
#[path = "webhook_test.rs"]
mod tests;
