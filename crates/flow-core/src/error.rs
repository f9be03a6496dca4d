use event_core::EventError;
use thiserror::Error;

/// Result type alias for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;

/// Errors produced by the flow router
#[derive(Error, Debug)]
pub enum FlowError {
    /// A handler of a running flow failed. Recorded in the flow metrics,
    /// never returned to the publisher of the trigger event.
    #[error("Flow '{flow}' handler for feature '{feature}' failed: {reason}")]
    FlowHandler {
        flow: String,
        feature: String,
        reason: String,
    },

    #[error("Flow '{0}' is already registered")]
    DuplicateFlow(String),

    #[error("Flow '{0}' not found")]
    FlowNotFound(String),

    /// The flow definition cannot be installed (empty id or trigger name).
    #[error("Invalid flow '{flow}': {reason}")]
    InvalidFlow { flow: String, reason: String },

    #[error(transparent)]
    Bus(#[from] EventError),
}
