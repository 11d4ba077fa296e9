//! Call orchestration
//!
//! [`CallOrchestrator`] is the facade over the whole flow: it validates a
//! call request, resolves the call script, creates the assistant and call
//! with the provider, and keeps in-memory tracking of the calls it placed.
//! Completion and function-call webhooks update the same state.
//!
//! Local state only ever moves `initiated` -> `completed`, and only on the
//! end-of-call report. Richer provider statuses are surfaced by
//! [`CallOrchestrator::get_call_status`] without being tracked.

mod functions;
pub mod phone;

pub use functions::{CallFunction, FunctionFuture, FunctionRegistry};

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::RwLock;

use crate::config::Config;
use crate::provider::{Analysis, Artifact, CallRecord, CreateCallRequest, VapiClient, VoiceProvider};
use crate::templates::{ContextValue, TemplateCatalog, TemplateContext};
use crate::webhook::{EventBus, EventType, RunningRelay, WebhookEvent, WebhookRelay};
use crate::{Error, Result};

/// Template used when none is named
pub const DEFAULT_TEMPLATE: &str = "default";

/// Call length cap used when none is given
pub const DEFAULT_MAX_DURATION_SECS: u32 = 600;

/// A request to place one outbound call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    /// Destination in E.164; spaces and hyphens are allowed
    pub phone_number: String,
    /// Catalog name of the call script
    pub template: String,
    /// Variables substituted into the script
    pub context: TemplateContext,
    /// Hard cap on call length
    pub max_duration: u32,
}

impl CallRequest {
    /// Request a call using the default template and limits
    #[must_use]
    pub fn new(phone_number: impl Into<String>) -> Self {
        Self {
            phone_number: phone_number.into(),
            template: DEFAULT_TEMPLATE.to_string(),
            context: TemplateContext::new(),
            max_duration: DEFAULT_MAX_DURATION_SECS,
        }
    }

    /// Use a different template
    #[must_use]
    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    /// Replace the whole context
    #[must_use]
    pub fn context(mut self, context: TemplateContext) -> Self {
        self.context = context;
        self
    }

    /// Add one context variable
    #[must_use]
    pub fn var(mut self, key: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Set the call length cap in seconds
    #[must_use]
    pub const fn max_duration(mut self, seconds: u32) -> Self {
        self.max_duration = seconds;
        self
    }
}

/// Locally tracked call state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Initiated,
    Completed,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initiated => write!(f, "initiated"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Returned when a call has been placed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallPlacement {
    pub call_id: String,
    pub status: CallState,
    pub assistant_id: String,
}

/// A call placed by this orchestrator
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedCall {
    /// Provider-assigned call ID
    pub call_id: String,
    pub phone_number: String,
    pub template: String,
    pub context: TemplateContext,
    pub assistant_id: String,
    pub status: CallState,
    pub started_at: DateTime<Utc>,
    /// Set when the end-of-call report arrives
    pub ended_at: Option<DateTime<Utc>>,
}

/// Outcome delivered by the end-of-call report
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResult {
    pub transcript: Option<String>,
    pub messages: Vec<Value>,
    pub structured_data: Option<Value>,
    pub summary: Option<String>,
    /// Seconds
    pub duration: Option<f64>,
    pub cost: Option<f64>,
    pub ended_reason: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Live call status merged with local tracking
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStatus {
    pub call_id: String,
    /// Provider status (queued, ringing, in-progress, ended, ...)
    pub status: Option<String>,
    /// Whole seconds; `None` until the call has ended
    pub duration: Option<i64>,
    pub cost: Option<f64>,
    pub ended_reason: Option<String>,
    pub template: Option<String>,
    pub phone_number: Option<String>,
}

/// Call transcript
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub call_id: String,
    pub transcript: String,
    pub messages: Vec<Value>,
}

/// Data extracted from a call by the provider's analysis
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredData {
    pub call_id: String,
    pub structured_data: Value,
    pub summary: Option<String>,
}

/// `message` payload of an end-of-call report
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndOfCallReport {
    call: Option<ReportCall>,
    artifact: Option<Artifact>,
    analysis: Option<Analysis>,
    ended_reason: Option<String>,
    cost: Option<f64>,
    duration_seconds: Option<f64>,
    transcript: Option<String>,
    summary: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportCall {
    duration: Option<f64>,
    cost: Option<f64>,
    ended_reason: Option<String>,
}

/// Places calls and tracks them for the lifetime of the instance
pub struct CallOrchestrator {
    provider: Arc<dyn VoiceProvider>,
    templates: TemplateCatalog,
    phone_number_id: Option<String>,
    functions: FunctionRegistry,
    calls: RwLock<HashMap<String, TrackedCall>>,
    results: RwLock<HashMap<String, CallResult>>,
}

impl CallOrchestrator {
    /// Create an orchestrator over a provider and template catalog
    #[must_use]
    pub fn new(
        provider: Arc<dyn VoiceProvider>,
        templates: TemplateCatalog,
        phone_number_id: Option<String>,
    ) -> Self {
        Self {
            provider,
            templates,
            phone_number_id,
            functions: FunctionRegistry::default(),
            calls: RwLock::new(HashMap::new()),
            results: RwLock::new(HashMap::new()),
        }
    }

    /// Create an orchestrator backed by the Vapi API
    ///
    /// # Errors
    ///
    /// Returns error if the Vapi API key is missing
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = VapiClient::from_config(&config.vapi)?;
        Ok(Self::new(
            Arc::new(client),
            TemplateCatalog::new(&config.templates_dir),
            config.vapi.phone_number_id.clone(),
        ))
    }

    /// Replace the functions exposed to assistants
    #[must_use]
    pub fn with_functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = functions;
        self
    }

    /// Start the webhook relay if this deployment is reachable by Vapi
    ///
    /// Returns `None` when `WEBHOOK_URL` is unset or points at localhost.
    ///
    /// # Errors
    ///
    /// Returns error if the relay cannot bind its port
    pub async fn initialize(self: &Arc<Self>, config: &Config) -> Result<Option<RunningRelay>> {
        tracing::info!("initializing voice calling");

        if !config.server_mode() {
            tracing::info!("webhook relay not started: no public WEBHOOK_URL");
            return Ok(None);
        }

        let relay = WebhookRelay::from_config(&config.webhook);
        self.attach(relay.bus());
        let running = relay.start().await?;

        tracing::info!(port = running.local_addr().port(), "voice calling initialized");
        Ok(Some(running))
    }

    /// Register the completion and function-call handlers on a bus
    pub fn attach(self: &Arc<Self>, bus: &EventBus) {
        let this = Arc::clone(self);
        bus.on(EventType::EndOfCallReport, move |event| {
            let this = Arc::clone(&this);
            async move { this.handle_call_complete(&event).await }
        });

        let this = Arc::clone(self);
        bus.on(EventType::FunctionCall, move |event| {
            let this = Arc::clone(&this);
            async move { this.handle_function_call(&event).await }
        });
    }

    /// Place an outbound call
    ///
    /// If the provider rejects the call after the assistant was created, or
    /// accepts it without returning a call ID, the assistant is deleted
    /// best-effort and the call error is returned.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPhoneNumber`, `TemplateNotFound`, or any provider
    /// error unchanged
    pub async fn make_call(&self, request: CallRequest) -> Result<CallPlacement> {
        tracing::info!(
            phone_number = %request.phone_number,
            template = %request.template,
            "initiating call"
        );

        self.place_call(request)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "error making call"))
    }

    async fn place_call(&self, request: CallRequest) -> Result<CallPlacement> {
        let number = phone::validate(&request.phone_number)?;

        let mut assistant_config = self.templates.resolve(&request.template, &request.context)?;
        let Value::Object(fields) = &mut assistant_config else {
            return Err(Error::Template(format!(
                "template {} must be a JSON object",
                request.template
            )));
        };
        fields.insert("maxDurationSeconds".to_string(), json!(request.max_duration));

        let assistant = self.provider.create_assistant(&assistant_config).await?;
        let assistant_id = id_of(&assistant, "assistant")?;
        tracing::info!(assistant_id = %assistant_id, "created assistant");

        let call_request =
            CreateCallRequest::new(assistant_id.clone(), number, self.phone_number_id.clone());
        let placed = async {
            let call = self.provider.create_call(&call_request).await?;
            id_of(&call, "call")
        };
        let call_id = match placed.await {
            Ok(call_id) => call_id,
            Err(e) => {
                self.discard_assistant(&assistant_id).await;
                return Err(e);
            }
        };

        let tracked = TrackedCall {
            call_id: call_id.clone(),
            phone_number: request.phone_number,
            template: request.template,
            context: request.context,
            assistant_id: assistant_id.clone(),
            status: CallState::Initiated,
            started_at: Utc::now(),
            ended_at: None,
        };
        self.calls.write().await.insert(call_id.clone(), tracked);

        tracing::info!(call_id = %call_id, "call initiated");

        Ok(CallPlacement {
            call_id,
            status: CallState::Initiated,
            assistant_id,
        })
    }

    /// Delete an assistant whose call never started
    async fn discard_assistant(&self, assistant_id: &str) {
        match self.provider.delete_assistant(assistant_id).await {
            Ok(_) => tracing::info!(assistant_id = %assistant_id, "deleted unused assistant"),
            Err(e) => tracing::warn!(
                assistant_id = %assistant_id,
                error = %e,
                "failed to delete unused assistant"
            ),
        }
    }

    /// Live status from the provider, with template and number from tracking
    ///
    /// # Errors
    ///
    /// Returns the provider error if the lookup fails
    pub async fn get_call_status(&self, call_id: &str) -> Result<CallStatus> {
        let record = self
            .fetch_call(call_id)
            .await
            .inspect_err(|e| tracing::error!(call_id, error = %e, "error getting call status"))?;

        let tracked = self.calls.read().await.get(call_id).cloned();

        Ok(CallStatus {
            call_id: record_id(&record, call_id),
            status: record.status,
            duration: duration_secs(record.started_at.as_deref(), record.ended_at.as_deref()),
            cost: record.cost,
            ended_reason: record.ended_reason,
            template: tracked.as_ref().map(|t| t.template.clone()),
            phone_number: tracked.map(|t| t.phone_number),
        })
    }

    /// Transcript of a call
    ///
    /// Falls back to the end-of-call report when the provider's call
    /// record has no transcript yet.
    ///
    /// # Errors
    ///
    /// Returns `TranscriptUnavailable` while the call is in progress; poll
    /// again later
    pub async fn get_transcript(&self, call_id: &str) -> Result<Transcript> {
        let record = self
            .fetch_call(call_id)
            .await
            .inspect_err(|e| tracing::error!(call_id, error = %e, "error getting transcript"))?;

        if let Some(transcript) = record.transcript() {
            return Ok(Transcript {
                call_id: record_id(&record, call_id),
                transcript: transcript.to_string(),
                messages: record
                    .artifact
                    .as_ref()
                    .map(|a| a.messages.clone())
                    .unwrap_or_default(),
            });
        }

        let results = self.results.read().await;
        if let Some(result) = results.get(call_id) {
            if let Some(transcript) = result.transcript.as_ref().filter(|t| !t.is_empty()) {
                return Ok(Transcript {
                    call_id: record_id(&record, call_id),
                    transcript: transcript.clone(),
                    messages: result.messages.clone(),
                });
            }
        }

        Err(Error::TranscriptUnavailable(call_id.to_string()))
    }

    /// Structured data and summary extracted from a call
    ///
    /// Falls back to the end-of-call report when the provider's call
    /// record has no analysis yet.
    ///
    /// # Errors
    ///
    /// Returns `StructuredDataUnavailable` until analysis has run; poll
    /// again later
    pub async fn get_structured_data(&self, call_id: &str) -> Result<StructuredData> {
        let record = self.fetch_call(call_id).await.inspect_err(
            |e| tracing::error!(call_id, error = %e, "error getting structured data"),
        )?;

        if let Some(data) = record.structured_data() {
            return Ok(StructuredData {
                call_id: record_id(&record, call_id),
                structured_data: data.clone(),
                summary: record.analysis.as_ref().and_then(|a| a.summary.clone()),
            });
        }

        let results = self.results.read().await;
        if let Some(result) = results.get(call_id) {
            if let Some(data) = result.structured_data.as_ref().filter(|v| !v.is_null()) {
                return Ok(StructuredData {
                    call_id: record_id(&record, call_id),
                    structured_data: data.clone(),
                    summary: result.summary.clone(),
                });
            }
        }

        Err(Error::StructuredDataUnavailable(call_id.to_string()))
    }

    /// List calls on the provider account
    ///
    /// # Errors
    ///
    /// Returns the provider error if the request fails
    pub async fn list_calls(&self, query: &BTreeMap<String, String>) -> Result<Value> {
        self.provider.list_calls(query).await
    }

    /// Snapshot of a tracked call
    pub async fn tracked_call(&self, call_id: &str) -> Option<TrackedCall> {
        self.calls.read().await.get(call_id).cloned()
    }

    /// Snapshot of every tracked call
    pub async fn tracked_calls(&self) -> Vec<TrackedCall> {
        let mut calls: Vec<TrackedCall> = self.calls.read().await.values().cloned().collect();
        calls.sort_by_key(|c| c.started_at);
        calls
    }

    /// Result stored from the end-of-call report
    pub async fn call_result(&self, call_id: &str) -> Option<CallResult> {
        self.results.read().await.get(call_id).cloned()
    }

    /// Record the end-of-call report and mark the call completed
    ///
    /// A repeated report for the same call replaces the earlier result.
    ///
    /// # Errors
    ///
    /// Returns error if the report payload has fields of the wrong shape
    pub async fn handle_call_complete(&self, event: &WebhookEvent) -> Result<()> {
        let Some(call_id) = event.call_id() else {
            tracing::warn!("end-of-call report without call id");
            return Ok(());
        };

        let report = EndOfCallReport::deserialize(event.message())?;
        let call = report.call.unwrap_or_default();
        let artifact = report.artifact.unwrap_or_default();
        let analysis = report.analysis.unwrap_or_default();

        let now = Utc::now();
        let result = CallResult {
            transcript: artifact.transcript.or(report.transcript),
            messages: artifact.messages,
            structured_data: analysis.structured_data,
            summary: analysis.summary.or(report.summary),
            duration: call.duration.or(report.duration_seconds),
            cost: call.cost.or(report.cost),
            ended_reason: call.ended_reason.or(report.ended_reason),
            received_at: now,
        };

        tracing::info!(call_id, "call completed");

        if self
            .results
            .write()
            .await
            .insert(call_id.to_string(), result)
            .is_some()
        {
            tracing::debug!(call_id, "replaced earlier end-of-call result");
        }

        if let Some(tracked) = self.calls.write().await.get_mut(call_id) {
            tracked.status = CallState::Completed;
            tracked.ended_at = Some(now);
        }

        tracing::info!(call_id, "call results stored");
        Ok(())
    }

    /// Run a function the assistant asked for and return its result
    ///
    /// Function failures are logged and not reported to the provider.
    ///
    /// # Errors
    ///
    /// Returns error if the result cannot be sent back to the provider
    pub async fn handle_function_call(&self, event: &WebhookEvent) -> Result<()> {
        let message = event.message();
        let Some(name) = message
            .get("functionCall")
            .and_then(|f| f.get("name"))
            .and_then(Value::as_str)
        else {
            tracing::warn!("function-call event without function name");
            return Ok(());
        };
        let Some(call_id) = event.call_id() else {
            tracing::warn!(function = %name, "function-call event without call id");
            return Ok(());
        };

        let parameters = message["functionCall"]
            .get("parameters")
            .cloned()
            .unwrap_or_else(|| json!({}));

        tracing::info!(call_id, function = %name, "function call");

        match self.functions.execute(name, parameters).await {
            Ok(result) => {
                self.provider
                    .update_call(call_id, &json!({ "functionReturn": result }))
                    .await?;
                tracing::debug!(call_id, function = %name, "function result returned");
            }
            Err(e) => {
                tracing::error!(call_id, function = %name, error = %e, "error executing function");
            }
        }

        Ok(())
    }

    async fn fetch_call(&self, call_id: &str) -> Result<CallRecord> {
        let raw = self.provider.get_call(call_id).await?;
        CallRecord::from_value(&raw)
    }
}

/// Extract the `id` of a created resource
fn id_of(value: &Value, resource: &str) -> Result<String> {
    value
        .get("id")
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| Error::UnexpectedResponse(format!("created {resource} has no id")))
}

fn record_id(record: &CallRecord, requested: &str) -> String {
    if record.id.is_empty() {
        requested.to_string()
    } else {
        record.id.clone()
    }
}

/// Whole seconds between two ISO 8601 timestamps, rounded half up
///
/// `None` unless both are present and parse
#[must_use]
pub fn duration_secs(started_at: Option<&str>, ended_at: Option<&str>) -> Option<i64> {
    let parse = |s: &str| DateTime::parse_from_rfc3339(s).ok();
    let ended = parse(ended_at?)?;
    let started = parse(started_at?)?;
    let millis = (ended - started).num_milliseconds();
    Some((millis + 500).div_euclid(1000))
}
