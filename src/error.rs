//! Error types for the voice calling service

use thiserror::Error;

/// Result type alias for voice calling operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while placing calls or relaying webhooks
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Phone number is not valid E.164 after normalization
    #[error("Invalid phone number format: {0}. Use E.164 format: +81-90-1234-5678")]
    InvalidPhoneNumber(String),

    /// No catalog entry exists for the template name
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    /// Template exists but cannot be used
    #[error("template error: {0}")]
    Template(String),

    /// Vapi never answered the request
    #[error("{context}: No response from Vapi API")]
    Connection {
        /// Operation that was being attempted
        context: &'static str,
        /// Underlying transport failure
        #[source]
        source: reqwest::Error,
    },

    /// Vapi answered with a non-success status
    #[error("{context}: {message}")]
    Api {
        /// Operation that was being attempted
        context: &'static str,
        /// HTTP status code returned by Vapi
        status: u16,
        /// Provider message, or the status reason phrase
        message: String,
        /// Raw error body for inspection
        payload: serde_json::Value,
    },

    /// Resource ID that cannot name a single resource
    #[error("invalid resource id: {0:?}")]
    InvalidId(String),

    /// Vapi answered successfully but without a field we rely on
    #[error("unexpected Vapi response: {0}")]
    UnexpectedResponse(String),

    /// Transcript has not been produced yet
    #[error("Transcript not available yet for call {0}")]
    TranscriptUnavailable(String),

    /// Analysis has not been produced yet
    #[error("Structured data not available for call {0}")]
    StructuredDataUnavailable(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// HTTP status code for provider API errors
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Raw error body for provider API errors
    #[must_use]
    pub const fn payload(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Api { payload, .. } => Some(payload),
            _ => None,
        }
    }

    /// Whether the caller should poll again instead of giving up
    #[must_use]
    pub const fn is_retryable_later(&self) -> bool {
        matches!(
            self,
            Self::TranscriptUnavailable(_) | Self::StructuredDataUnavailable(_)
        )
    }
}
