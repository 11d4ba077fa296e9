//! Voice Calling - outbound AI phone calls through Vapi
//!
//! This library places scripted outbound calls and collects their results:
//! - Vapi REST client behind a provider trait
//! - JSON call-script templates with `{{placeholder}}` substitution
//! - Webhook relay that authenticates and dispatches provider events
//! - Call orchestrator tracking calls from placement to end-of-call report
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │                  CLI                       │
//! └─────────────────────┬─────────────────────┘
//!                       │
//! ┌─────────────────────▼─────────────────────┐
//! │             CallOrchestrator               │
//! │  Templates  │  Functions  │  Call state    │
//! └──────┬──────────────────────────▲─────────┘
//!        │                          │
//! ┌──────▼─────────┐       ┌────────┴─────────┐
//! │  VoiceProvider │       │  WebhookRelay    │
//! │  (Vapi REST)   │       │  (HTTP events)   │
//! └────────────────┘       └──────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod provider;
pub mod templates;
pub mod webhook;

pub use config::Config;
pub use error::{Error, Result};
pub use orchestrator::{
    CallOrchestrator, CallPlacement, CallRequest, CallResult, CallState, CallStatus,
    FunctionRegistry, StructuredData, TrackedCall, Transcript,
};
pub use provider::{VapiClient, VoiceProvider};
pub use templates::{ContextValue, TemplateCatalog, TemplateContext};
pub use webhook::{EventBus, EventType, RunningRelay, WebhookEvent, WebhookRelay};
