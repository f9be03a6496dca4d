use std::time::Duration;
use thiserror::Error;

use crate::listener::SubscriptionId;

/// Result type alias for bus operations
pub type Result<T> = std::result::Result<T, EventError>;

/// Errors produced by the event bus
#[derive(Error, Debug)]
pub enum EventError {
    /// The event is structurally invalid (empty name, source or id, or a payload
    /// that rejected itself). Fatal to the `emit` call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A middleware stage failed. Fatal to the `emit` call; no listener runs.
    #[error("Middleware '{stage}' rejected event '{event}': {source}")]
    Middleware {
        stage: String,
        event: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A listener failed or panicked. Isolated and reported, never returned from `emit`.
    #[error("Listener {subscription} (owner '{owner}') failed on '{event}': {reason}")]
    Listener {
        subscription: SubscriptionId,
        owner: String,
        event: String,
        reason: String,
    },

    /// `wait_for_event` gave up.
    #[error("Timed out after {timeout:?} waiting for event '{event}'")]
    Timeout { event: String, timeout: Duration },

    /// The temporary listener of a `wait_for_event` call was removed before
    /// the event arrived (for example by `shutdown`).
    #[error("Wait for event '{event}' was cancelled")]
    Cancelled { event: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EventError {
    /// Whether this error aborted a publication before dispatch.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EventError::Validation(_) | EventError::Middleware { .. })
    }
}

impl From<config::ConfigError> for EventError {
    fn from(err: config::ConfigError) -> Self {
        EventError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for EventError {
    fn from(err: toml::de::Error) -> Self {
        EventError::Config(err.to_string())
    }
}

/// Text carried by a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_extracts_text() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
