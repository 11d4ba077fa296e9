//! Voice-AI provider integration
//!
//! [`VoiceProvider`] is the seam between the orchestrator and the hosted
//! call pipeline; [`VapiClient`] talks to the Vapi REST API.

mod types;
mod vapi;

pub use types::{Analysis, Artifact, CallRecord, CreateCallRequest, Customer};
pub use vapi::VapiClient;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::Result;

/// Resource actions offered by a voice-AI provider
///
/// Responses are returned exactly as the provider sent them
#[async_trait]
pub trait VoiceProvider: Send + Sync {
    /// Create an assistant from a resolved call script
    async fn create_assistant(&self, config: &Value) -> Result<Value>;

    /// Fetch an assistant by ID
    async fn get_assistant(&self, assistant_id: &str) -> Result<Value>;

    /// Delete an assistant by ID
    async fn delete_assistant(&self, assistant_id: &str) -> Result<Value>;

    /// Place an outbound call
    async fn create_call(&self, request: &CreateCallRequest) -> Result<Value>;

    /// Fetch live call state
    async fn get_call(&self, call_id: &str) -> Result<Value>;

    /// List calls; query parameters are passed through untouched
    async fn list_calls(&self, query: &BTreeMap<String, String>) -> Result<Value>;

    /// Patch a running call (e.g. return a function result)
    async fn update_call(&self, call_id: &str, updates: &Value) -> Result<Value>;
}
