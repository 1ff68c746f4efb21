//! The webhook HTTP server.
//!
//! One endpoint per CI provider. Every delivery is verified, normalized,
//! stored idempotently, and dispatched; the response never waits for the
//! pipeline itself.
//!
//! Response codes: `202` accepted, `200` ignored, `400` invalid payload,
//! `401` bad signature, `503` transient storage failure (with
//! `Retry-After: 60`).

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use pipeline::EventStore;
use schemas::{CiProvider, EventStatus};

use crate::config::Settings;
use crate::dispatch::Dispatcher;
use crate::normalize::{normalize, NormalizeOutcome};
use crate::verify::WebhookSecrets;

/// Shared server state.
pub struct ServerState {
    /// Idempotent event storage
    pub event_store: Arc<dyn EventStore>,
    /// Worker dispatch
    pub dispatcher: Arc<Dispatcher>,
    /// Webhook shared secrets
    pub secrets: WebhookSecrets,
    /// Process settings
    pub settings: Settings,
}

/// Response body for every webhook endpoint.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// `accepted`, `ignored`, or `error`
    pub status: &'static str,
    /// Human-readable detail
    pub message: String,
    /// Stored event id, when one exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Uuid>,
    /// Delivery/correlation id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Health payload.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Build the HTTP router.
pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/webhooks/{provider}", post(webhook_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the server.
pub async fn run_server(state: Arc<ServerState>, addr: &str) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Remedy webhook server listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn provider_from_path(path: &str) -> Option<CiProvider> {
    match path {
        "github" => Some(CiProvider::Github),
        "gitlab" => Some(CiProvider::Gitlab),
        "circleci" => Some(CiProvider::Circleci),
        "jenkins" => Some(CiProvider::Jenkins),
        "azure-devops" => Some(CiProvider::AzureDevops),
        _ => None,
    }
}

fn delivery_id(provider: CiProvider, headers: &HeaderMap) -> String {
    let header = match provider {
        CiProvider::Github => "x-github-delivery",
        CiProvider::Gitlab => "x-gitlab-event-uuid",
        CiProvider::Circleci => "circleci-event-id",
        CiProvider::Jenkins | CiProvider::AzureDevops => "x-request-id",
    };
    headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| Uuid::new_v4().to_string(), String::from)
}

/// Bot senders and skip markers suppress processing at the door.
fn should_skip(payload: &serde_json::Value) -> Option<String> {
    let sender = payload
        .get("sender")
        .and_then(|s| s.get("login"))
        .and_then(serde_json::Value::as_str)
        .unwrap_or("");
    if sender.ends_with("[bot]") {
        return Some(format!("Sender '{sender}' is a bot"));
    }
    let commit_message = payload
        .get("workflow_job")
        .and_then(|j| j.get("head_commit"))
        .and_then(|c| c.get("message"))
        .and_then(serde_json::Value::as_str)
        .unwrap_or("");
    if commit_message.contains("[skip-remedy]") {
        return Some("Commit opted out of remediation".to_string());
    }
    None
}

fn respond(
    code: StatusCode,
    status: &'static str,
    message: String,
    event_id: Option<Uuid>,
    correlation_id: Option<String>,
) -> Response {
    (
        code,
        Json(WebhookResponse {
            status,
            message,
            event_id,
            correlation_id,
        }),
    )
        .into_response()
}

async fn webhook_handler(
    State(state): State<Arc<ServerState>>,
    Path(provider_path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(provider) = provider_from_path(&provider_path) else {
        return respond(
            StatusCode::NOT_FOUND,
            "error",
            format!("Unknown provider '{provider_path}'"),
            None,
            None,
        );
    };
    let correlation_id = delivery_id(provider, &headers);

    if let Err(e) = state.secrets.verify(provider, &headers, &body) {
        warn!(provider = provider.name(), error = %e, "Webhook verification failed");
        return respond(
            StatusCode::UNAUTHORIZED,
            "error",
            "Webhook verification failed".to_string(),
            None,
            Some(correlation_id),
        );
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            return respond(
                StatusCode::BAD_REQUEST,
                "error",
                format!("Invalid JSON payload: {e}"),
                None,
                Some(correlation_id),
            );
        }
    };

    if state.settings.skip_bot_senders {
        if let Some(reason) = should_skip(&payload) {
            return respond(
                StatusCode::OK,
                "ignored",
                reason,
                None,
                Some(correlation_id),
            );
        }
    }

    let normalized = match normalize(provider, &payload, Some(&correlation_id)) {
        Ok(NormalizeOutcome::Accepted(event)) => *event,
        Ok(NormalizeOutcome::Ignored(reason)) => {
            return respond(
                StatusCode::OK,
                "ignored",
                reason,
                None,
                Some(correlation_id),
            );
        }
        Err(e) => {
            return respond(
                StatusCode::BAD_REQUEST,
                "error",
                e.to_string(),
                None,
                Some(correlation_id),
            );
        }
    };

    let (stored, is_new) = match state.event_store.store_event(normalized).await {
        Ok(result) => result,
        Err(e) => {
            warn!(error = %e, "Event storage unavailable");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                [("Retry-After", "60")],
                Json(WebhookResponse {
                    status: "error",
                    message: "Storage temporarily unavailable".to_string(),
                    event_id: None,
                    correlation_id: Some(correlation_id),
                }),
            )
                .into_response();
        }
    };

    if !is_new {
        info!(
            event_id = %stored.id,
            idempotency_key = %stored.idempotency_key,
            "Duplicate event"
        );
        return respond(
            StatusCode::OK,
            "ignored",
            "Duplicate event".to_string(),
            Some(stored.id),
            Some(correlation_id),
        );
    }

    let _ = state
        .event_store
        .update_status(stored.id, EventStatus::Dispatched)
        .await;
    if let Err(e) = state.dispatcher.dispatch(&stored).await {
        // The event is stored; it can be re-dispatched later
        warn!(event_id = %stored.id, error = %e, "Dispatch failed");
    } else {
        info!(
            event_id = %stored.id,
            repo = %stored.repo,
            "Event dispatched for processing"
        );
    }

    respond(
        StatusCode::ACCEPTED,
        "accepted",
        "Event accepted and queued for processing".to_string(),
        Some(stored.id),
        Some(correlation_id),
    )
}
