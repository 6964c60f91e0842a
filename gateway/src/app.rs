//! Axum app: state, router and handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use axum::body::Bytes;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use warung::bus::TaskPublisher;
use warung::jobs::JobService;

use crate::webhook;

pub struct AppState {
    pub webhook_secret: Option<String>,
    pub crm_tasks: Arc<TaskPublisher>,
    pub ai_tasks: Arc<TaskPublisher>,
    pub jobs: Arc<JobService>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/webhook/whatsapp/:tenant_id",
            post(whatsapp_webhook).get(whatsapp_challenge),
        )
        .route("/webhook/payments/:provider", post(payment_webhook))
        .route("/v1/jobs", post(submit_job))
        .route("/v1/jobs/:id", get(get_job))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Verification challenge echo used by bridges that probe the endpoint.
async fn whatsapp_challenge(
    Path(_tenant_id): Path<String>,
    Query(params): Query<std::collections::HashMap<String, String>>,
) -> impl IntoResponse {
    match params.get("challenge") {
        Some(challenge) => (StatusCode::OK, challenge.clone()),
        None => (StatusCode::OK, "ok".to_string()),
    }
}

/// WhatsApp webhook: authenticate, parse, publish exactly one task message.
async fn whatsapp_webhook(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if !webhook::verify_hmac(state.webhook_secret.as_deref(), &headers, &body) {
        warn!(%tenant_id, "webhook signature rejected");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"status": "rejected", "reason": "invalid signature"})),
        );
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"status": "rejected", "reason": format!("invalid json: {e}")})),
            )
        }
    };

    match webhook::parse_wa_event(&payload, &tenant_id) {
        webhook::WebhookDecision::Ignore(reason) => {
            (StatusCode::OK, Json(json!({"status": "ignored", "reason": reason})))
        }
        webhook::WebhookDecision::Queue(task) => match state.crm_tasks.publish(&task).await {
            Ok(()) => {
                info!(%tenant_id, chat_id = %task["chat_id"], "webhook queued");
                (StatusCode::OK, Json(json!({"status": "queued"})))
            }
            Err(e) => {
                error!(%tenant_id, error = %e, "task publish failed");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({"status": "error", "reason": "queue unavailable"})),
                )
            }
        },
    }
}

/// Payment webhook: fast 200 before gateway-side verification; the worker
/// verifies the signature against the provider before trusting the status.
async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if provider != "midtrans" && provider != "xendit" {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"status": "rejected", "reason": "unknown provider"})),
        );
    }

    let mut payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"status": "rejected", "reason": format!("invalid json: {e}")})),
            )
        }
    };

    let order_id = payload["order_id"]
        .as_str()
        .or_else(|| payload["external_id"].as_str())
        .unwrap_or_default()
        .to_string();

    // Xendit authenticates with a callback token header; fold it into the
    // payload so the worker-side verification can see it.
    if let Some(token) = headers
        .get("x-callback-token")
        .and_then(|v| v.to_str().ok())
    {
        payload["callback_token"] = json!(token);
    }

    let task = json!({
        "type": "payment_webhook",
        "webhook_type": "payment",
        "provider": provider,
        "order_id": order_id,
        "body": payload,
    });

    match state.ai_tasks.publish(&task).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({"status": "queued", "provider": provider, "order_id": order_id})),
        ),
        Err(e) => {
            error!(%provider, error = %e, "payment task publish failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "error", "reason": "queue unavailable"})),
            )
        }
    }
}

async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let tenant_id = match payload["tenant_id"].as_str() {
        Some(tenant_id) if !tenant_id.is_empty() => tenant_id.to_string(),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "tenant_id is required"})),
            )
        }
    };

    let mut task = payload;
    if let Some(map) = task.as_object_mut() {
        map.insert("type".into(), json!("ai_job"));
    }

    match state.jobs.submit(&tenant_id, task).await {
        Ok(job) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "job_id": job.id,
                "status": job.status.as_str(),
            })),
        ),
        Err(e) => {
            error!(error = %e, "job submit failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "job submission failed"})),
            )
        }
    }
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.jobs.get(&id).await {
        Ok(Some(job)) => (
            StatusCode::OK,
            Json(json!({
                "job_id": job.id,
                "status": job.status.as_str(),
                "result": job.result,
                "error": job.error,
                "retry_count": job.retry_count,
                "next_retry_at": job.next_retry_at,
            })),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "job not found"})),
        ),
        Err(e) => {
            error!(error = %e, "job lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "job lookup failed"})),
            )
        }
    }
}
