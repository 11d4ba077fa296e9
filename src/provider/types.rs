//! Request bodies and read-only views over Vapi responses

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body for `POST /call`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCallRequest {
    /// Assistant that will run the conversation
    pub assistant_id: String,
    /// Party being called
    pub customer: Customer,
    /// Outbound number registered with Vapi
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number_id: Option<String>,
}

impl CreateCallRequest {
    /// Build a call request for an assistant and destination number
    #[must_use]
    pub fn new(
        assistant_id: impl Into<String>,
        number: impl Into<String>,
        phone_number_id: Option<String>,
    ) -> Self {
        Self {
            assistant_id: assistant_id.into(),
            customer: Customer {
                number: number.into(),
            },
            phone_number_id,
        }
    }
}

/// Called party
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    /// E.164 phone number
    pub number: String,
}

/// Fields of a Vapi call object used locally
///
/// Every field is optional so partial payloads still decode
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    #[serde(default)]
    pub id: String,
    pub status: Option<String>,
    /// ISO 8601 timestamp
    pub started_at: Option<String>,
    /// ISO 8601 timestamp
    pub ended_at: Option<String>,
    pub cost: Option<f64>,
    pub ended_reason: Option<String>,
    pub artifact: Option<Artifact>,
    pub analysis: Option<Analysis>,
}

impl CallRecord {
    /// Decode the fields we need from a raw call object
    ///
    /// # Errors
    ///
    /// Returns error if a present field has the wrong shape
    pub fn from_value(value: &Value) -> crate::Result<Self> {
        Ok(Self::deserialize(value)?)
    }

    /// Transcript text, if the provider has produced a non-empty one
    #[must_use]
    pub fn transcript(&self) -> Option<&str> {
        self.artifact
            .as_ref()
            .and_then(|a| a.transcript.as_deref())
            .filter(|t| !t.is_empty())
    }

    /// Structured analysis output, if present
    #[must_use]
    pub fn structured_data(&self) -> Option<&Value> {
        self.analysis
            .as_ref()
            .and_then(|a| a.structured_data.as_ref())
            .filter(|v| !v.is_null())
    }
}

/// Recording artifacts produced after a call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub transcript: Option<String>,
    /// Per-turn messages in call order
    #[serde(default)]
    pub messages: Vec<Value>,
}

/// Post-call analysis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    /// Template-defined extraction schema output
    pub structured_data: Option<Value>,
    pub summary: Option<String>,
}
