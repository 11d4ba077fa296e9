//! Vapi REST API client
//!
//! Thin wrapper over <https://api.vapi.ai>. One attempt per request, no
//! retries; transport failures and API errors are kept distinct.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use super::{CreateCallRequest, VoiceProvider};
use crate::config::VapiConfig;
use crate::{Error, Result};

/// Client for the Vapi REST API
#[derive(Debug, Clone)]
pub struct VapiClient {
    /// HTTP client
    client: Client,
    /// REST root
    base_url: Url,
    /// Bearer token
    api_key: SecretString,
}

impl VapiClient {
    /// Create a new Vapi client
    ///
    /// # Arguments
    ///
    /// * `api_key` - Vapi private API key
    /// * `base_url` - REST root (e.g., <https://api.vapi.ai>)
    ///
    /// # Errors
    ///
    /// Returns error if `base_url` is not an absolute http(s) URL
    pub fn new(api_key: SecretString, base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .ok()
            .filter(|u| !u.cannot_be_a_base())
            .ok_or_else(|| Error::Config(format!("invalid Vapi base URL: {base_url}")))?;

        Ok(Self {
            client: Client::new(),
            base_url,
            api_key,
        })
    }

    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns error if no API key is configured or the base URL is invalid
    pub fn from_config(config: &VapiConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| Error::Config("Vapi API key is required".to_string()))?;
        Self::new(api_key, &config.base_url)
    }

    /// Collection URL, e.g. `/call`
    fn url(&self, collection: &str) -> Url {
        self.url_with(&[collection])
    }

    /// Resource URL with each ID percent-encoded as one path segment
    fn resource_url(&self, collection: &str, id: &str) -> Result<Url> {
        if id.is_empty() || id == "." || id == ".." {
            return Err(Error::InvalidId(id.to_string()));
        }
        Ok(self.url_with(&[collection, id]))
    }

    fn url_with(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Send a request and decode the JSON response
    async fn execute(&self, request: RequestBuilder, context: &'static str) -> Result<Value> {
        let response = request
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
            .map_err(|source| Error::Connection { context, source })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| Error::Connection { context, source })?;

        if !status.is_success() {
            let err = api_error(context, status, &body);
            tracing::debug!(status = status.as_u16(), error = %err, "Vapi API error");
            return Err(err);
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        Ok(serde_json::from_str(&body)?)
    }
}

/// Build an API error from a non-success response
fn api_error(context: &'static str, status: StatusCode, body: &str) -> Error {
    let payload =
        serde_json::from_str::<Value>(body).unwrap_or_else(|_| Value::String(body.to_string()));

    let message = match payload.get("message") {
        Some(Value::String(m)) if !m.is_empty() => Some(m.clone()),
        Some(Value::Array(parts)) if !parts.is_empty() => Some(
            parts
                .iter()
                .map(|p| p.as_str().map_or_else(|| p.to_string(), String::from))
                .collect::<Vec<_>>()
                .join("; "),
        ),
        _ => None,
    }
    .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown Error").to_string());

    Error::Api {
        context,
        status: status.as_u16(),
        message,
        payload,
    }
}

#[async_trait]
impl VoiceProvider for VapiClient {
    async fn create_assistant(&self, config: &Value) -> Result<Value> {
        let req = self.client.post(self.url("assistant")).json(config);
        self.execute(req, "Failed to create assistant").await
    }

    async fn get_assistant(&self, assistant_id: &str) -> Result<Value> {
        let req = self.client.get(self.resource_url("assistant", assistant_id)?);
        self.execute(req, "Failed to get assistant").await
    }

    async fn delete_assistant(&self, assistant_id: &str) -> Result<Value> {
        let req = self
            .client
            .delete(self.resource_url("assistant", assistant_id)?);
        self.execute(req, "Failed to delete assistant").await
    }

    async fn create_call(&self, request: &CreateCallRequest) -> Result<Value> {
        let req = self.client.post(self.url("call")).json(request);
        self.execute(req, "Failed to make call").await
    }

    async fn get_call(&self, call_id: &str) -> Result<Value> {
        let req = self.client.get(self.resource_url("call", call_id)?);
        self.execute(req, "Failed to get call").await
    }

    async fn list_calls(&self, query: &BTreeMap<String, String>) -> Result<Value> {
        let req = self.client.get(self.url("call")).query(query);
        self.execute(req, "Failed to list calls").await
    }

    async fn update_call(&self, call_id: &str, updates: &Value) -> Result<Value> {
        let req = self
            .client
            .patch(self.resource_url("call", call_id)?)
            .json(updates);
        self.execute(req, "Failed to update call").await
    }
}
