//! Error types for pantry.
//!
//! Every fallible store operation returns [`StoreError`]. Failures raised by
//! user actions travel as [`ActionFailure`] so the same reason can be handed
//! to `on_error` hooks and to the caller.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by the store runtime.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store definition is missing an id")]
    MissingId,

    #[error("store id '{given}' conflicts with the id '{declared}' declared in its options")]
    ConflictingId { declared: String, given: String },

    #[error("state of store '{id}' must be an object, got {found}")]
    InvalidState { id: String, found: &'static str },

    #[error("no active registry: call Registry::install, set_active_registry or Registry::provide first")]
    NoActiveRegistry,

    #[error("store '{store}' has no action named '{action}'")]
    UnknownAction { store: String, action: String },

    #[error("action '{action}' of store '{store}' is async; use dispatch instead of call")]
    AsyncAction { store: String, action: String },

    #[error("action '{action}' of store '{store}' failed: {source}")]
    ActionFailed {
        store: String,
        action: String,
        #[source]
        source: ActionFailure,
    },

    #[error("patch for store '{id}' must be an object, got {found}")]
    InvalidPatch { id: String, found: &'static str },

    #[error("store '{store}' has no state field named '{field}'")]
    UnknownField { store: String, field: String },

    #[error("store '{id}' is a setup store and cannot be reset")]
    ResetUnsupported { id: String },

    #[error("effect scope of store '{id}' is no longer active")]
    ScopeStopped { id: String },

    #[error("serialization error: {0}")]
    Serialization(Arc<serde_json::Error>),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(Arc::new(err))
    }
}

impl StoreError {
    /// The action failure behind this error, if it came from an action body.
    pub fn action_failure(&self) -> Option<&ActionFailure> {
        match self {
            StoreError::ActionFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Result type used throughout pantry.
pub type Result<T> = std::result::Result<T, StoreError>;

/// The reason an action body failed.
///
/// Cheap to clone; every clone refers to the same underlying error.
#[derive(Clone)]
pub struct ActionFailure(Arc<dyn std::error::Error + Send + Sync>);

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Message {}

impl ActionFailure {
    /// Wrap any error.
    pub fn new<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self(Arc::new(err))
    }

    /// A failure carrying only a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self(Arc::new(Message(message.into())))
    }

    /// Whether two failures share the same underlying error.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// The wrapped error.
    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.0
    }
}

impl fmt::Debug for ActionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ActionFailure").field(&self.0.to_string()).finish()
    }
}

impl fmt::Display for ActionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for ActionFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl From<StoreError> for ActionFailure {
    fn from(err: StoreError) -> Self {
        ActionFailure::new(err)
    }
}

impl From<serde_json::Error> for ActionFailure {
    fn from(err: serde_json::Error) -> Self {
        ActionFailure::new(err)
    }
}

/// Short name of a JSON value's kind, used in error messages.
pub(crate) fn kind_of(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_failure_keeps_message_and_identity() {
        let failure = ActionFailure::msg("out of stock");
        let copy = failure.clone();

        assert_eq!(failure.to_string(), "out of stock");
        assert!(failure.ptr_eq(&copy));

        let err = StoreError::ActionFailed {
            store: "cart".into(),
            action: "checkout".into(),
            source: copy,
        };
        assert_eq!(
            err.to_string(),
            "action 'checkout' of store 'cart' failed: out of stock"
        );
        assert!(err.action_failure().is_some_and(|f| f.ptr_eq(&failure)));
    }

    #[test]
    fn store_errors_convert_into_failures() {
        let failure: ActionFailure = StoreError::MissingId.into();
        assert_eq!(failure.to_string(), "store definition is missing an id");
    }
}
