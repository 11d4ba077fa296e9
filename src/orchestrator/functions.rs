//! Functions the assistant can ask the server to run mid-call

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Value, json};

use crate::Result;

/// Future returned by a call function
pub type FunctionFuture = BoxFuture<'static, Result<Value>>;

/// A named side effect invoked with the assistant-supplied parameters
pub type CallFunction = Arc<dyn Fn(Value) -> FunctionFuture + Send + Sync>;

/// Registry of functions exposed to assistants
#[derive(Clone)]
pub struct FunctionRegistry {
    functions: HashMap<String, CallFunction>,
}

impl FunctionRegistry {
    /// Create a registry with no functions
    #[must_use]
    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Create a registry with the appointment-booking functions
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();

        // Stand-ins until a calendar backend is wired in
        registry.register("checkAvailability", |_params| async {
            Ok(json!({ "available": true, "slots": ["10:00", "14:00", "16:00"] }))
        });
        registry.register("confirmAppointment", |_params| async {
            Ok(json!({ "confirmed": true, "confirmationNumber": "APT-12345" }))
        });

        registry
    }

    /// Register or replace a function
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let function: CallFunction =
            Arc::new(move |params: Value| -> FunctionFuture { Box::pin(function(params)) });
        self.functions.insert(name.into(), function);
    }

    /// Whether a function is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered function names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run a function
    ///
    /// Unknown names produce an error object for the assistant rather
    /// than a failure, so the call can continue.
    ///
    /// # Errors
    ///
    /// Returns whatever error the function itself returns
    pub async fn execute(&self, name: &str, parameters: Value) -> Result<Value> {
        let Some(function) = self.functions.get(name) else {
            tracing::warn!(function = %name, "unknown function");
            return Ok(json!({ "error": "Function not found" }));
        };

        function(parameters).await
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}
