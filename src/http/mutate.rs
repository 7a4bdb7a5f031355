//! Admission review endpoint.
//!
//! Decoding and encoding of `admission.k8s.io/v1` reviews lives here; what to
//! patch is the [`Mutator`]'s business.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::server::AppState;

const ADMISSION_API_VERSION: &str = "admission.k8s.io/v1";
const ADMISSION_KIND: &str = "AdmissionReview";

/// Incoming review envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    pub request: Option<AdmissionRequest>,
}

/// The part of a review the mutator inspects.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    pub uid: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub object: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AdmissionReviewResponse {
    api_version: &'static str,
    kind: &'static str,
    response: AdmissionResponse,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AdmissionResponse {
    uid: String,
    allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    patch_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    patch: Option<String>,
}

/// Decides the JSONPatch operations for an admission request.
#[async_trait]
pub trait Mutator: Send + Sync {
    /// Operations to apply, or `None` to admit the object unchanged.
    async fn patch(&self, request: &AdmissionRequest) -> Option<Vec<Value>>;
}

/// Admits everything unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMutator;

#[async_trait]
impl Mutator for NoopMutator {
    async fn patch(&self, _request: &AdmissionRequest) -> Option<Vec<Value>> {
        None
    }
}

pub(crate) async fn mutate_handler(
    State(state): State<AppState>,
    body: axum::body::Bytes,
) -> axum::response::Response {
    let review: AdmissionReview = match serde_json::from_slice(&body) {
        Ok(review) => review,
        Err(e) => {
            tracing::warn!(error = %e, "Malformed admission review");
            return (StatusCode::BAD_REQUEST, format!("malformed admission review: {e}")).into_response();
        }
    };
    let Some(request) = review.request else {
        return (StatusCode::BAD_REQUEST, "admission review has no request").into_response();
    };

    let response = review_response(&state.mutator, &request).await;
    Json(response).into_response()
}

async fn review_response(mutator: &Arc<dyn Mutator>, request: &AdmissionRequest) -> AdmissionReviewResponse {
    let patch = mutator
        .patch(request)
        .await
        .filter(|ops| !ops.is_empty())
        .and_then(|ops| serde_json::to_vec(&ops).ok())
        .map(|bytes| STANDARD.encode(bytes));

    tracing::debug!(
        uid = %request.uid,
        namespace = ?request.namespace,
        patched = patch.is_some(),
        "Admission request reviewed"
    );

    AdmissionReviewResponse {
        api_version: ADMISSION_API_VERSION,
        kind: ADMISSION_KIND,
        response: AdmissionResponse {
            uid: request.uid.clone(),
            allowed: true,
            patch_type: patch.as_ref().map(|_| "JSONPatch"),
            patch,
        },
    }
}
