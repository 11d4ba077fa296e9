//! Shared test utilities

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use voice_calling::provider::CreateCallRequest;
use voice_calling::{
    CallOrchestrator, Error, FunctionRegistry, Result, TemplateCatalog, VoiceProvider, WebhookEvent,
};

/// One request seen by [`MockProvider`]
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    CreateAssistant(Value),
    DeleteAssistant(String),
    CreateCall(CreateCallRequest),
    GetCall(String),
    UpdateCall(String, Value),
}

/// In-memory provider that records requests and serves canned calls
#[derive(Default)]
pub struct MockProvider {
    pub requests: Mutex<Vec<Recorded>>,
    /// Call objects returned by `get_call`, keyed by id
    pub calls: Mutex<BTreeMap<String, Value>>,
    pub fail_create_call: bool,
    /// Answer `create_call` with a body that has no `id`
    pub call_without_id: bool,
    pub fail_delete_assistant: bool,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create_call` fail with a 400
    pub fn failing_calls() -> Self {
        Self {
            fail_create_call: true,
            ..Self::default()
        }
    }

    /// Set the call object `get_call` returns
    pub fn set_call(&self, call_id: &str, call: Value) {
        self.calls.lock().unwrap().insert(call_id.to_string(), call);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    fn record(&self, request: Recorded) {
        self.requests.lock().unwrap().push(request);
    }
}

#[async_trait]
impl VoiceProvider for MockProvider {
    async fn create_assistant(&self, config: &Value) -> Result<Value> {
        self.record(Recorded::CreateAssistant(config.clone()));
        Ok(json!({ "id": "A1" }))
    }

    async fn get_assistant(&self, assistant_id: &str) -> Result<Value> {
        Ok(json!({ "id": assistant_id }))
    }

    async fn delete_assistant(&self, assistant_id: &str) -> Result<Value> {
        self.record(Recorded::DeleteAssistant(assistant_id.to_string()));
        if self.fail_delete_assistant {
            return Err(api_error("Failed to delete assistant", 500, "boom"));
        }
        Ok(Value::Null)
    }

    async fn create_call(&self, request: &CreateCallRequest) -> Result<Value> {
        self.record(Recorded::CreateCall(request.clone()));
        if self.fail_create_call {
            return Err(api_error("Failed to make call", 400, "Invalid number"));
        }
        if self.call_without_id {
            return Ok(json!({ "status": "queued" }));
        }
        Ok(json!({ "id": "C1", "status": "queued" }))
    }

    async fn get_call(&self, call_id: &str) -> Result<Value> {
        self.record(Recorded::GetCall(call_id.to_string()));
        self.calls
            .lock()
            .unwrap()
            .get(call_id)
            .cloned()
            .ok_or_else(|| api_error("Failed to get call", 404, "Couldn't Find Call"))
    }

    async fn list_calls(&self, _query: &BTreeMap<String, String>) -> Result<Value> {
        Ok(Value::Array(self.calls.lock().unwrap().values().cloned().collect()))
    }

    async fn update_call(&self, call_id: &str, updates: &Value) -> Result<Value> {
        self.record(Recorded::UpdateCall(call_id.to_string(), updates.clone()));
        Ok(json!({ "id": call_id }))
    }
}

pub fn api_error(context: &'static str, status: u16, message: &str) -> Error {
    Error::Api {
        context,
        status,
        message: message.to_string(),
        payload: json!({ "message": message }),
    }
}

/// Orchestrator over a mock provider and the embedded templates
pub fn orchestrator(provider: &Arc<MockProvider>) -> Arc<CallOrchestrator> {
    orchestrator_with(provider, FunctionRegistry::default())
}

/// Orchestrator with a custom function registry
pub fn orchestrator_with(
    provider: &Arc<MockProvider>,
    functions: FunctionRegistry,
) -> Arc<CallOrchestrator> {
    let dir = std::env::temp_dir().join("voice-calling-no-templates");
    Arc::new(
        CallOrchestrator::new(
            Arc::clone(provider) as Arc<dyn VoiceProvider>,
            TemplateCatalog::new(dir),
            Some("PN1".to_string()),
        )
        .with_functions(functions),
    )
}

/// Webhook event from a JSON envelope
pub fn event(body: Value) -> WebhookEvent {
    WebhookEvent::from_body(body).expect("event has message.type")
}

/// End-of-call report envelope
pub fn end_of_call_report(call_id: &str, transcript: &str, data: Value) -> WebhookEvent {
    event(json!({
        "message": {
            "type": "end-of-call-report",
            "endedReason": "customer-ended-call",
            "call": { "id": call_id },
            "artifact": { "transcript": transcript, "messages": [] },
            "analysis": { "structuredData": data, "summary": "done" }
        }
    }))
}
