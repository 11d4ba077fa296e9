//! Webhook relay for Vapi server messages
//!
//! Receives provider notifications over HTTP, authenticates them with an
//! HMAC signature when a secret is configured, and hands them to the
//! handlers registered on an [`EventBus`].
//!
//! Routes:
//! - `GET /health` - liveness, unauthenticated
//! - `POST /vapi/webhook` - event envelope `{"message": {"type": ...}}`
//! - anything else - 404

mod events;
mod signature;

pub use events::{EventBus, EventHandler, EventType, HandlerFuture, WebhookEvent};
pub use signature::{sign, verify_signature};

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::config::WebhookConfig;
use crate::{Error, Result};

/// Header carrying the hex HMAC-SHA256 of the body
pub const SIGNATURE_HEADER: &str = "x-vapi-signature";

/// Path Vapi posts events to
pub const WEBHOOK_PATH: &str = "/vapi/webhook";

/// Shared state for relay handlers
struct RelayState {
    bus: EventBus,
    secret: Option<SecretString>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
}

/// HTTP listener that relays provider events to registered handlers
#[derive(Debug, Clone)]
pub struct WebhookRelay {
    port: u16,
    bus: EventBus,
    secret: Option<SecretString>,
}

impl WebhookRelay {
    /// Create a relay for a port; `secret` enables signature checks
    #[must_use]
    pub fn new(port: u16, secret: Option<SecretString>) -> Self {
        Self {
            port,
            bus: EventBus::new(),
            secret,
        }
    }

    /// Create a relay from configuration
    #[must_use]
    pub fn from_config(config: &WebhookConfig) -> Self {
        Self::new(config.port, config.secret.clone())
    }

    /// Handler registry shared with the running server
    #[must_use]
    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Build the relay router
    pub fn router(&self) -> Router {
        router(self.bus.clone(), self.secret.clone())
    }

    /// Bind the listening socket and serve in a background task
    ///
    /// Each call binds a new socket; call it once per relay.
    ///
    /// # Errors
    ///
    /// Returns error if the port cannot be bound
    pub async fn start(&self) -> Result<RunningRelay> {
        if self.secret.is_none() {
            tracing::warn!(
                "WEBHOOK_SECRET is not set: webhook signature verification is disabled"
            );
        }

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            Error::Config(format!("failed to bind webhook relay on {addr}: {e}"))
        })?;
        let local_addr = listener.local_addr()?;

        tracing::info!(port = local_addr.port(), path = WEBHOOK_PATH, "webhook relay listening");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = self.router();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await?;
            Ok::<(), Error>(())
        });

        Ok(RunningRelay {
            local_addr,
            shutdown: shutdown_tx,
            task,
        })
    }
}

/// Handle to a started relay
#[derive(Debug)]
pub struct RunningRelay {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl RunningRelay {
    /// Address the socket is bound to
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for in-flight requests
    ///
    /// # Errors
    ///
    /// Returns error if the server task failed
    pub async fn stop(self) -> Result<()> {
        self.shutdown.send(()).ok();
        match self.task.await {
            Ok(result) => result?,
            Err(e) => return Err(Error::Config(format!("webhook relay task failed: {e}"))),
        }
        tracing::info!("webhook relay stopped");
        Ok(())
    }
}

/// Build the relay router over a handler registry
pub fn router(bus: EventBus, secret: Option<SecretString>) -> Router {
    let state = Arc::new(RelayState { bus, secret });

    Router::new()
        .route("/health", get(health).fallback(not_found))
        .route(WEBHOOK_PATH, post(handle_webhook).fallback(not_found))
        .fallback(not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Liveness probe
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    })
}

async fn not_found() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "Not found" })),
    )
}

/// Authenticate, parse and dispatch one provider event
async fn handle_webhook(
    State(state): State<Arc<RelayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = &state.secret {
        let valid = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|sig| verify_signature(secret.expose_secret().as_bytes(), &body, sig));

        if !valid {
            tracing::error!("invalid webhook signature");
            return (StatusCode::UNAUTHORIZED, "Invalid signature").into_response();
        }
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "webhook body is not JSON");
            return (StatusCode::BAD_REQUEST, "Invalid JSON").into_response();
        }
    };

    let Some(event) = WebhookEvent::from_body(payload) else {
        tracing::warn!("received webhook event without message.type");
        return StatusCode::OK.into_response();
    };

    log_event(&event);

    let handlers = state.bus.dispatch(&event);
    tracing::debug!(event_type = %event.event_type(), handlers, "webhook event dispatched");

    StatusCode::OK.into_response()
}

/// Log the fields worth seeing for common event types
fn log_event(event: &WebhookEvent) {
    let message = event.message();
    let text = |v: &Value, key: &str| v.get(key).and_then(Value::as_str).unwrap_or("").to_string();

    match event.event_type() {
        EventType::Transcript => {
            let said = message
                .get("transcript")
                .or_else(|| message.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("");
            tracing::info!(role = %text(message, "role"), text = %said, "transcript");
        }
        EventType::FunctionCall => {
            let call = message.get("functionCall").unwrap_or(&Value::Null);
            let parameters = call.get("parameters").unwrap_or(&Value::Null);
            tracing::info!(
                function = %text(call, "name"),
                parameters = %parameters,
                "function call requested"
            );
        }
        EventType::EndOfCallReport => {
            let call = message.get("call").unwrap_or(&Value::Null);
            let ended_reason = message
                .get("endedReason")
                .or_else(|| call.get("endedReason"))
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            tracing::info!(
                call_id = event.call_id().unwrap_or("unknown"),
                ended_reason,
                duration = ?message.get("durationSeconds").or_else(|| call.get("duration")),
                cost = ?message.get("cost").or_else(|| call.get("cost")),
                "call ended"
            );
        }
        EventType::StatusUpdate => {
            tracing::info!(
                call_id = event.call_id().unwrap_or("unknown"),
                status = %text(message, "status"),
                "call status update"
            );
        }
        other => {
            tracing::debug!(event_type = %other, "webhook event");
        }
    }
}
