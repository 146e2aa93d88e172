//! Admission webhook HTTP handlers.
//!
//! Every registered kind gets its own route serving
//! `AdmissionReview` requests, decoded into the kind's Rust type and run
//! through its policy.

use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post};
use kube::Resource;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use crate::health::HealthState;
use crate::webhooks::policies::{ValidationContext, ValidationResult};

/// Default webhook server port
pub const WEBHOOK_PORT: u16 = 9443;

/// A kind's validation policy
pub type Validator<K> = fn(&ValidationContext<'_, K>) -> ValidationResult;

/// Shared state for one kind's webhook handler
pub struct WebhookState<K> {
    kind: String,
    validator: Validator<K>,
    health: Arc<HealthState>,
}

impl<K> WebhookState<K> {
    pub fn new(kind: impl Into<String>, validator: Validator<K>, health: Arc<HealthState>) -> Self {
        Self {
            kind: kind.into(),
            validator,
            health,
        }
    }
}

/// Create a denial response with reason embedded in message.
/// kube-rs deny() only sets status.message, so we format as "[reason] message"
fn deny_with_reason<T: Resource<DynamicType = ()>>(
    request: &AdmissionRequest<T>,
    message: &str,
    reason: &str,
) -> AdmissionReview<DynamicObject> {
    let full_message = format!("[{}] {}", reason, message);
    AdmissionResponse::from(request)
        .deny(full_message)
        .into_review()
}

fn operation_name(operation: &Operation) -> &'static str {
    match operation {
        Operation::Create => "CREATE",
        Operation::Update => "UPDATE",
        Operation::Delete => "DELETE",
        Operation::Connect => "CONNECT",
    }
}

/// Router serving a single kind's validation path
pub fn validation_router<K>(path: &str, state: Arc<WebhookState<K>>) -> Router
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Send + Sync + 'static,
{
    Router::new()
        .route(path, post(validate::<K>))
        .with_state(state)
}

/// Validating admission handler, generic over the resource kind
async fn validate<K>(
    State(state): State<Arc<WebhookState<K>>>,
    Json(review): Json<AdmissionReview<K>>,
) -> impl IntoResponse
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Send + Sync + 'static,
{
    let request: AdmissionRequest<K> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(kind = %state.kind, error = %e, "Failed to extract admission request");
            state.health.metrics.record_error(&state.kind);
            return (
                StatusCode::BAD_REQUEST,
                Json(
                    AdmissionResponse::invalid(format!("Invalid AdmissionReview: {}", e))
                        .into_review(),
                ),
            );
        }
    };

    let uid = &request.uid;
    let operation = operation_name(&request.operation);
    debug!(
        uid = %uid,
        kind = %state.kind,
        operation,
        namespace = ?request.namespace,
        name = ?request.name,
        "Processing admission request"
    );

    if request.operation == Operation::Delete {
        state
            .health
            .metrics
            .record_admission(&state.kind, operation, true, 0.0);
        return (
            StatusCode::OK,
            Json(AdmissionResponse::from(&request).into_review()),
        );
    }

    let Some(resource) = request.object.as_ref() else {
        error!(uid = %uid, "Missing object in request");
        state.health.metrics.record_error(&state.kind);
        return (
            StatusCode::OK,
            Json(deny_with_reason(
                &request,
                "Missing object in request",
                "InvalidRequest",
            )),
        );
    };

    let ctx = ValidationContext {
        resource,
        old_resource: request.old_object.as_ref(),
        dry_run: request.dry_run,
        namespace: request.namespace.as_deref(),
    };

    let started = Instant::now();
    let result = (state.validator)(&ctx);
    state.health.metrics.record_admission(
        &state.kind,
        operation,
        result.allowed,
        started.elapsed().as_secs_f64(),
    );

    if !result.allowed {
        let reason = result
            .reason
            .unwrap_or_else(|| "ValidationFailed".to_string());
        let message = result
            .message
            .unwrap_or_else(|| "Validation failed".to_string());
        warn!(uid = %uid, kind = %state.kind, reason = %reason, message = %message, "Admission request denied");
        return (
            StatusCode::OK,
            Json(deny_with_reason(&request, &message, &reason)),
        );
    }

    info!(uid = %uid, kind = %state.kind, operation, "Admission request allowed");
    (
        StatusCode::OK,
        Json(AdmissionResponse::from(&request).into_review()),
    )
}
