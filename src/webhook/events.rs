//! Webhook event types and handler registry

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::Result;

/// Vapi server message types
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    /// One transcribed turn
    Transcript,
    /// Assistant asks the server to run a function
    FunctionCall,
    /// Assistant asks the server to run tools
    ToolCalls,
    /// Final report with artifacts and analysis
    EndOfCallReport,
    /// Call status changed (ringing, in-progress, ended)
    StatusUpdate,
    /// Assistant did not respond in time
    Hang,
    /// Speech started or stopped
    SpeechUpdate,
    /// Conversation history changed
    ConversationUpdate,
    /// Any type this crate does not name
    Other(String),
}

impl EventType {
    /// Parse from the wire tag (e.g. `end-of-call-report`)
    #[must_use]
    pub fn parse(tag: &str) -> Self {
        match tag {
            "transcript" => Self::Transcript,
            "function-call" => Self::FunctionCall,
            "tool-calls" => Self::ToolCalls,
            "end-of-call-report" => Self::EndOfCallReport,
            "status-update" => Self::StatusUpdate,
            "hang" => Self::Hang,
            "speech-update" => Self::SpeechUpdate,
            "conversation-update" => Self::ConversationUpdate,
            other => Self::Other(other.to_string()),
        }
    }

    /// Wire tag
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Transcript => "transcript",
            Self::FunctionCall => "function-call",
            Self::ToolCalls => "tool-calls",
            Self::EndOfCallReport => "end-of-call-report",
            Self::StatusUpdate => "status-update",
            Self::Hang => "hang",
            Self::SpeechUpdate => "speech-update",
            Self::ConversationUpdate => "conversation-update",
            Self::Other(tag) => tag,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inbound provider notification
///
/// Wraps the whole envelope `{"message": {"type": ..., ...}}`
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    event_type: EventType,
    body: Arc<Value>,
}

static NULL: Value = Value::Null;

impl WebhookEvent {
    /// Wrap an envelope; `None` when `message.type` is missing
    #[must_use]
    pub fn from_body(body: Value) -> Option<Self> {
        let tag = body
            .get("message")
            .and_then(|m| m.get("type"))
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())?;

        Some(Self {
            event_type: EventType::parse(tag),
            body: Arc::new(body),
        })
    }

    /// Event type discriminator
    #[must_use]
    pub const fn event_type(&self) -> &EventType {
        &self.event_type
    }

    /// Whole envelope as received
    #[must_use]
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Type-specific payload under `message`
    #[must_use]
    pub fn message(&self) -> &Value {
        self.body.get("message").unwrap_or(&NULL)
    }

    /// Call this event belongs to, from `message.call.id`
    #[must_use]
    pub fn call_id(&self) -> Option<&str> {
        self.message()
            .get("call")
            .and_then(|c| c.get("id"))
            .and_then(Value::as_str)
    }
}

/// Future returned by an event handler
pub type HandlerFuture = BoxFuture<'static, Result<()>>;

/// Registered event handler
pub type EventHandler = Arc<dyn Fn(WebhookEvent) -> HandlerFuture + Send + Sync>;

#[derive(Default)]
struct Registry {
    by_type: HashMap<EventType, Vec<EventHandler>>,
    wildcard: Vec<EventHandler>,
}

/// Registry of handlers keyed by event type, plus wildcard handlers
///
/// Events are handled one at a time, in the order they were dispatched, by
/// a single background task. For each event, type-specific handlers run in
/// registration order, then wildcard handlers. Failures are logged.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<RwLock<Registry>>,
    queue: Arc<OnceLock<mpsc::UnboundedSender<Delivery>>>,
}

/// An event paired with the handlers matched when it was dispatched
struct Delivery {
    event: WebhookEvent,
    handlers: Vec<EventHandler>,
}

impl EventBus {
    /// Create an empty bus
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event type
    pub fn on<F, Fut>(&self, event_type: EventType, handler: F)
    where
        F: Fn(WebhookEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler = boxed(handler);
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .by_type
            .entry(event_type)
            .or_default()
            .push(handler);
    }

    /// Register a handler that receives every event
    pub fn on_any<F, Fut>(&self, handler: F)
    where
        F: Fn(WebhookEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler = boxed(handler);
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .wildcard
            .push(handler);
    }

    /// Number of handlers an event of this type reaches, wildcards included
    #[must_use]
    pub fn handler_count(&self, event_type: &EventType) -> usize {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry.by_type.get(event_type).map_or(0, Vec::len) + registry.wildcard.len()
    }

    /// Queue an event for its handlers and return how many will run
    ///
    /// Does not wait for handlers to finish. Must be called inside a
    /// Tokio runtime.
    pub fn dispatch(&self, event: &WebhookEvent) -> usize {
        let handlers: Vec<EventHandler> = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            registry
                .by_type
                .get(event.event_type())
                .into_iter()
                .flatten()
                .chain(registry.wildcard.iter())
                .cloned()
                .collect()
        };

        let count = handlers.len();
        if count == 0 {
            return 0;
        }

        let delivery = Delivery {
            event: event.clone(),
            handlers,
        };
        if self.sender().send(delivery).is_err() {
            tracing::error!(event_type = %event.event_type(), "webhook dispatcher is gone");
            return 0;
        }

        count
    }

    /// Sender to the dispatcher task, started on first use
    fn sender(&self) -> &mpsc::UnboundedSender<Delivery> {
        self.queue.get_or_init(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_dispatcher(rx));
            tx
        })
    }
}

/// Run queued deliveries until every bus clone is dropped
async fn run_dispatcher(mut rx: mpsc::UnboundedReceiver<Delivery>) {
    while let Some(Delivery { event, handlers }) = rx.recv().await {
        let event_type = event.event_type();
        for handler in &handlers {
            match AssertUnwindSafe(handler(event.clone())).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(event_type = %event_type, error = %e, "webhook handler failed");
                }
                Err(_) => {
                    tracing::error!(event_type = %event_type, "webhook handler panicked");
                }
            }
        }
    }
    tracing::debug!("webhook dispatcher stopped");
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("EventBus")
            .field("event_types", &registry.by_type.len())
            .field("wildcard", &registry.wildcard.len())
            .finish()
    }
}

fn boxed<F, Fut>(handler: F) -> EventHandler
where
    F: Fn(WebhookEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |event: WebhookEvent| -> HandlerFuture { Box::pin(handler(event)) })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn event(tag: &str) -> WebhookEvent {
        WebhookEvent::from_body(json!({ "message": { "type": tag, "call": { "id": "c1" } } }))
            .unwrap()
    }

    /// Register a handler that forwards a label on every invocation
    fn recorder(
        bus: &EventBus,
        event_type: Option<EventType>,
        label: &'static str,
        tx: &mpsc::UnboundedSender<(&'static str, String)>,
    ) {
        let tx = tx.clone();
        let handler = move |event: WebhookEvent| {
            let tx = tx.clone();
            async move {
                tx.send((label, event.event_type().to_string())).ok();
                Ok(())
            }
        };
        match event_type {
            Some(t) => bus.on(t, handler),
            None => bus.on_any(handler),
        }
    }

    async fn drain(
        rx: &mut mpsc::UnboundedReceiver<(&'static str, String)>,
    ) -> Vec<(&'static str, String)> {
        let mut seen = Vec::new();
        while let Ok(Some(item)) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
            seen.push(item);
        }
        seen
    }

    #[test]
    fn test_event_type_round_trips_known_tags() {
        for tag in [
            "transcript",
            "function-call",
            "tool-calls",
            "end-of-call-report",
            "status-update",
            "hang",
            "speech-update",
            "conversation-update",
        ] {
            let parsed = EventType::parse(tag);
            assert!(!matches!(parsed, EventType::Other(_)), "{tag} should be known");
            assert_eq!(parsed.as_str(), tag);
        }
        assert_eq!(
            EventType::parse("model-output"),
            EventType::Other("model-output".to_string())
        );
    }

    #[test]
    fn test_event_without_type_is_rejected() {
        assert!(WebhookEvent::from_body(json!({})).is_none());
        assert!(WebhookEvent::from_body(json!({ "message": {} })).is_none());
        assert!(WebhookEvent::from_body(json!({ "message": { "type": 5 } })).is_none());
        assert!(WebhookEvent::from_body(json!({ "type": "transcript" })).is_none());
    }

    #[test]
    fn test_event_accessors() {
        let event = event("status-update");
        assert_eq!(event.event_type(), &EventType::StatusUpdate);
        assert_eq!(event.call_id(), Some("c1"));
        assert_eq!(event.message()["type"], "status-update");
    }

    #[tokio::test]
    async fn test_both_type_handlers_receive_event() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        recorder(&bus, Some(EventType::Transcript), "first", &tx);
        recorder(&bus, Some(EventType::Transcript), "second", &tx);

        assert_eq!(bus.dispatch(&event("transcript")), 2);

        let seen = drain(&mut rx).await;
        assert_eq!(
            seen,
            vec![
                ("first", "transcript".to_string()),
                ("second", "transcript".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_wildcard_receives_every_type_once() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        recorder(&bus, Some(EventType::EndOfCallReport), "typed", &tx);
        recorder(&bus, None, "any", &tx);

        bus.dispatch(&event("end-of-call-report"));
        bus.dispatch(&event("status-update"));
        bus.dispatch(&event("something-new"));

        let seen = drain(&mut rx).await;
        assert_eq!(
            seen,
            vec![
                ("typed", "end-of-call-report".to_string()),
                ("any", "end-of-call-report".to_string()),
                ("any", "status-update".to_string()),
                ("any", "something-new".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_stop_others() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.on(EventType::Hang, |_| async {
            Err(crate::Error::Config("boom".to_string()))
        });
        recorder(&bus, Some(EventType::Hang), "ok", &tx);

        assert_eq!(bus.dispatch(&event("hang")), 2);
        assert_eq!(drain(&mut rx).await, vec![("ok", "hang".to_string())]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_events_handled_in_dispatch_order() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        // The typed handler yields so a concurrent runner would interleave
        let typed_tx = tx.clone();
        bus.on(EventType::StatusUpdate, move |event: WebhookEvent| {
            let tx = typed_tx.clone();
            async move {
                tokio::task::yield_now().await;
                tx.send(("typed", event.message()["seq"].to_string())).ok();
                Ok(())
            }
        });
        let any_tx = tx.clone();
        bus.on_any(move |event: WebhookEvent| {
            let tx = any_tx.clone();
            async move {
                tx.send(("any", event.message()["seq"].to_string())).ok();
                Ok(())
            }
        });

        for seq in 0..200 {
            let event = WebhookEvent::from_body(
                json!({ "message": { "type": "status-update", "seq": seq } }),
            )
            .unwrap();
            assert_eq!(bus.dispatch(&event), 2);
        }

        let seen = drain(&mut rx).await;
        let expected: Vec<(&'static str, String)> = (0..200)
            .flat_map(|seq| [("typed", seq.to_string()), ("any", seq.to_string())])
            .collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_stop_dispatch() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.on(EventType::Hang, |_| async {
            let missing: Option<()> = None;
            missing.expect("handler bug");
            Ok(())
        });
        recorder(&bus, None, "any", &tx);

        bus.dispatch(&event("hang"));
        bus.dispatch(&event("transcript"));

        assert_eq!(
            drain(&mut rx).await,
            vec![
                ("any", "hang".to_string()),
                ("any", "transcript".to_string())
            ]
        );
    }

    #[test]
    fn test_dispatch_without_handlers_needs_no_runtime() {
        assert_eq!(EventBus::new().dispatch(&event("hang")), 0);
    }

    #[test]
    fn test_handler_count() {
        let bus = EventBus::new();
        bus.on(EventType::Transcript, |_| async { Ok(()) });
        bus.on_any(|_| async { Ok(()) });

        assert_eq!(bus.handler_count(&EventType::Transcript), 2);
        assert_eq!(bus.handler_count(&EventType::Hang), 1);
    }
}
