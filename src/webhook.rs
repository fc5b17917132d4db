//! Webhook HTTP surface.
//!
//! `POST /webhooks/{provider}` takes the provider's native payload (JSON,
//! form-encoded, multipart, or raw RFC 822 text) and always answers 200 once the
//! provider tag is known, so providers never retry a message we already
//! logged. An unknown tag is a 400.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Path, Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde_json::{Map, Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::parsers::ProviderKind;
use crate::pipeline::{InboundOutcome, InboundProcessor};

const EMPTY_TWIML: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Response></Response>"#;

/// Shared state for webhook handlers.
#[derive(Clone)]
pub struct WebhookState {
    pub processor: Arc<InboundProcessor>,
}

/// Build the webhook router.
pub fn webhook_routes(processor: Arc<InboundProcessor>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/{provider}", post(receive))
        .with_state(WebhookState { processor })
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

// ── Health ──────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "switchboard"
    }))
}

// ── Inbound ─────────────────────────────────────────────────────────

async fn receive(State(state): State<WebhookState>, Path(provider): Path<String>, request: Request) -> Response {
    let kind = match provider.parse::<ProviderKind>() {
        Ok(kind) => kind,
        Err(e) => {
            warn!(provider = %provider, "Webhook for unsupported provider");
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response();
        }
    };

    let outcome = match read_payload(request).await {
        Ok(raw) => state.processor.handle_as(kind, &raw).await,
        Err(reason) => {
            warn!(provider = kind.as_str(), reason = %reason, "Unreadable webhook body");
            InboundOutcome::rejected(kind.as_str(), reason)
        }
    };
    acknowledge(kind, &outcome)
}

/// Decode the body by content type into the JSON shape the parsers expect.
async fn read_payload(request: Request) -> Result<Value, String> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("application/x-www-form-urlencoded") {
        let Form(fields) = Form::<HashMap<String, String>>::from_request(request, &())
            .await
            .map_err(|e| e.body_text())?;
        return serde_json::to_value(fields).map_err(|e| e.to_string());
    }

    if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, &()).await.map_err(|e| e.body_text())?;
        return multipart_fields(multipart).await.map(Value::Object);
    }

    let body = Bytes::from_request(request, &()).await.map_err(|e| e.body_text())?;
    if content_type.starts_with("message/rfc822") || content_type.starts_with("text/plain") {
        return Ok(Value::String(String::from_utf8_lossy(&body).into_owned()));
    }
    serde_json::from_slice(&body).map_err(|e| format!("invalid JSON body: {e}"))
}

/// Text parts of a multipart form (SendGrid Inbound Parse). File parts are
/// skipped; their metadata arrives in the `attachment-info` text field.
async fn multipart_fields(mut multipart: Multipart) -> Result<Map<String, Value>, String> {
    let mut fields = Map::new();
    while let Some(field) = multipart.next_field().await.map_err(|e| e.body_text())? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if field.file_name().is_some() {
            continue;
        }
        let text = field.text().await.map_err(|e| e.body_text())?;
        fields.insert(name, Value::String(text));
    }
    Ok(fields)
}

fn acknowledge(kind: ProviderKind, outcome: &InboundOutcome) -> Response {
    match kind {
        ProviderKind::Twilio | ProviderKind::TwilioVoice => {
            ([(header::CONTENT_TYPE, "text/xml")], EMPTY_TWIML).into_response()
        }
        _ => Json(outcome).into_response(),
    }
}
