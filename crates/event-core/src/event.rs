//! Event records carried by the bus.
//!
//! An [`Event`] is created once per `emit` call and shared immutably with every
//! listener behind an `Arc`. The payload type is a generic parameter so that
//! feature modules can describe their events as a tagged enum; the default is
//! a dynamic `serde_json::Value`.

use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Free-form metadata attached to an event by producers and middleware.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Payload carried by an event.
///
/// `validate` runs inside the built-in validation middleware, so a typed
/// payload can reject itself before any listener sees it.
pub trait Payload: Clone + Send + Sync + fmt::Debug + Serialize + 'static {
    /// Check the payload against the name it is being published under.
    fn validate(&self, _event_name: &str) -> Result<(), String> {
        Ok(())
    }
}

impl Payload for serde_json::Value {}

/// A payload that knows which event name it belongs to.
///
/// Implemented by tagged unions so that `EventBus::publish` can derive the
/// event name from the variant.
pub trait NamedEvent: Payload {
    fn event_name(&self) -> Cow<'static, str>;
}

/// Unique identifier of one emission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Time-based id with a random suffix: `evt_<unix-millis>_<9 alphanumerics>`.
    pub fn generate() -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(9)
            .map(char::from)
            .collect();
        EventId(format!("evt_{}_{}", Utc::now().timestamp_millis(), suffix.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for EventId {
    fn from(value: String) -> Self {
        EventId(value)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named message with payload, source, timestamp and unique id.
#[derive(Debug, Clone, Serialize)]
pub struct Event<P = serde_json::Value> {
    pub name: String,
    pub payload: P,
    /// Feature that produced the event.
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub id: EventId,
    pub metadata: Metadata,
}

impl<P: Payload> Event<P> {
    /// Create a new event with a freshly generated id.
    pub fn new(name: impl Into<String>, payload: P, source: impl Into<String>) -> Self {
        Event {
            name: name.into(),
            payload,
            source: source.into(),
            timestamp: Utc::now(),
            id: EventId::generate(),
            metadata: Metadata::new(),
        }
    }

    /// Attach metadata supplied by the producer.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata.extend(metadata);
        self
    }

    /// Read a metadata entry.
    pub fn meta(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }
}
