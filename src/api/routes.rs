//! Axum routes.
//!
//! Three surfaces: manual agent triggers for operators, a site status
//! read for the review UI, and the inbound email webhook. The webhook is
//! the only outside-facing route and carries a shared-secret header.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::TickRunner;
use crate::email::{InboundEmail, parse_rfc822};
use crate::error::Error;
use crate::model::TickUsage;
use crate::outreach::OutreachSequencer;
use crate::reply::ReplyMatcher;
use crate::sites::SiteGenerator;
use crate::store::Database;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<dyn Database>,
    pub runner: Arc<TickRunner>,
    pub sequencer: Arc<OutreachSequencer>,
    pub matcher: Arc<ReplyMatcher>,
    /// None when no deployment platform is configured.
    pub generator: Option<Arc<SiteGenerator>>,
    /// Shared secret for `/webhooks/email`. None leaves the webhook open
    /// (local development only).
    pub webhook_secret: Option<String>,
}

/// Build the router.
pub fn api_routes(state: ApiState) -> Router {
    if state.webhook_secret.is_none() {
        warn!("VENDORA_WEBHOOK_SECRET not set, email webhook is unauthenticated");
    }
    Router::new()
        .route("/health", get(health))
        .route("/api/agent/trigger", post(trigger))
        .route("/api/sites/{id}/status", get(site_status))
        .route("/webhooks/email", post(email_webhook))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler-level error: client errors keep their status, everything else
/// maps to 500 with the message in the body.
struct ApiError(StatusCode, String);

impl ApiError {
    fn bad_request(msg: impl Into<String>) -> Self {
        Self(StatusCode::BAD_REQUEST, msg.into())
    }

    fn not_found(msg: impl Into<String>) -> Self {
        Self(StatusCode::NOT_FOUND, msg.into())
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({"error": self.1}))).into_response()
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "vendora",
    }))
}

// ── Manual triggers ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TriggerRequest {
    action: String,
    /// Required by `generate_site`.
    prospect_id: Option<Uuid>,
    /// `simulate_reply` fields.
    from: Option<String>,
    subject: Option<String>,
    body: Option<String>,
    in_reply_to: Option<String>,
}

async fn trigger(
    State(state): State<ApiState>,
    Json(req): Json<TriggerRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    info!(action = %req.action, "Manual trigger");
    let mut usage = TickUsage::default();

    let result = match req.action.as_str() {
        "discover_prospects" => {
            let discovered = state.runner.discover_prospects(&mut usage).await?;
            serde_json::json!({"discovered": discovered})
        }
        "send_outreach" => {
            let report = state.sequencer.run(&mut usage).await?;
            serde_json::json!({"selected": report.selected, "sent": report.sent, "failed": report.failed})
        }
        "run_followups" => {
            let report = state.sequencer.run_followups(&mut usage).await?;
            serde_json::json!({"selected": report.selected, "sent": report.sent, "failed": report.failed})
        }
        "generate_site" => {
            let Some(generator) = &state.generator else {
                return Err(ApiError::bad_request("no deployment platform configured"));
            };
            let prospect_id = req
                .prospect_id
                .ok_or_else(|| ApiError::bad_request("generate_site requires prospect_id"))?;
            let site = generator.generate_site_for_prospect(prospect_id).await?;
            serde_json::json!({"site_id": site.id, "deployment_id": site.deployment_id})
        }
        "run_full_tick" => {
            let tick = state.runner.run_full_tick().await?;
            serde_json::json!({
                "tick_id": tick.id,
                "discovered": tick.discovered,
                "emails_sent": tick.emails_sent,
                "followups_sent": tick.followups_sent,
                "detail": tick.detail,
            })
        }
        "simulate_reply" => {
            let (Some(from), Some(subject), Some(body)) = (req.from, req.subject, req.body)
            else {
                return Err(ApiError::bad_request(
                    "simulate_reply requires from, subject, and body",
                ));
            };
            let email = InboundEmail {
                from,
                to: String::new(),
                subject,
                body,
                message_id: None,
                in_reply_to: req.in_reply_to,
            };
            reply_response(&state, &email, &mut usage).await?
        }
        other => return Err(ApiError::bad_request(format!("unknown action: '{other}'"))),
    };

    Ok(Json(result))
}

// ── Site status ─────────────────────────────────────────────────────────

async fn site_status(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let site = state
        .db
        .get_site(id)
        .await
        .map_err(Error::from)?
        .ok_or_else(|| ApiError::not_found(format!("no site {id}")))?;

    Ok(Json(serde_json::json!({
        "id": site.id,
        "prospect_id": site.prospect_id,
        "status": site.status.as_str(),
        "url": site.url,
        "deployment_status": site.deployment_status,
        "build_error": site.build_error,
        "published_at": site.published_at,
        "updated_at": site.updated_at,
    })))
}

// ── Email webhook ───────────────────────────────────────────────────────

/// JSON push payload from an inbound email provider.
#[derive(Debug, Deserialize)]
struct WebhookPayload {
    from: String,
    #[serde(default)]
    to: String,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    in_reply_to: Option<String>,
}

async fn email_webhook(
    State(state): State<ApiState>,
    headers: HeaderMap,
    raw: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(secret) = &state.webhook_secret {
        let presented = headers
            .get("x-webhook-secret")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !constant_time_eq(presented.as_bytes(), secret.as_bytes()) {
            warn!("Email webhook rejected: bad secret");
            return Err(ApiError(StatusCode::UNAUTHORIZED, "bad secret".into()));
        }
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let email = if content_type.starts_with("message/rfc822") {
        parse_rfc822(&raw).map_err(|e| ApiError::bad_request(e.to_string()))?
    } else {
        let payload: WebhookPayload = serde_json::from_slice(&raw)
            .map_err(|e| ApiError::bad_request(format!("invalid payload: {e}")))?;
        InboundEmail {
            from: payload.from,
            to: payload.to,
            subject: payload.subject,
            body: payload.body,
            message_id: payload.message_id,
            in_reply_to: payload.in_reply_to,
        }
    };

    let mut usage = TickUsage::default();
    Ok(Json(reply_response(&state, &email, &mut usage).await?))
}

/// Run the reply matcher and shape the shared response body. An unmatched
/// or already-claimed reply is a normal 200 with `matched: false`.
async fn reply_response(
    state: &ApiState,
    email: &InboundEmail,
    usage: &mut TickUsage,
) -> Result<serde_json::Value, ApiError> {
    match state.matcher.match_reply(email, usage).await? {
        Some(outcome) => Ok(serde_json::json!({
            "matched": true,
            "prospect_id": outcome.prospect_id,
            "email_log_id": outcome.email_log_id,
            "intent": outcome.intent.as_str(),
            "dispatched": outcome.dispatched,
        })),
        None => Ok(serde_json::json!({"matched": false})),
    }
}

/// Length-safe byte comparison without early exit on mismatch.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
