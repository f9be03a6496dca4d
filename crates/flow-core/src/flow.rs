//! Declarative flow definitions.
//!
//! A flow maps one trigger event to a list of handler actions. Each handler
//! targets a feature by name and either calls one of its methods or
//! re-publishes the (optionally transformed) payload as a new event.
//!
//! ```rust
//! use flow_core::{EventFlow, FlowHandler, FlowTrigger};
//! use serde_json::{json, Value};
//!
//! let flow: EventFlow<Value> = EventFlow::new(
//!     "kill-rewards",
//!     "Reward enemy kills",
//!     FlowTrigger::new("combat.enemy.killed").from_sources(["combat"]),
//! )
//! .handler(
//!     FlowHandler::call_method("progression", "award_experience")
//!         .transform(|data: &Value| json!({ "amount": data["experience"] })),
//! )
//! .handler(FlowHandler::emit_event("statistics", "statistics.enemy.defeated"));
//!
//! assert_eq!(flow.handlers.len(), 2);
//! ```

use std::fmt;
use std::sync::Arc;

use event_core::{Event, Payload};
use serde::Serialize;
use serde_json::Value;

use crate::error::{FlowError, Result};

/// Predicate over an event payload.
pub type DataFilter<P> = Arc<dyn Fn(&P) -> bool + Send + Sync>;

/// Maps a trigger payload to the payload a handler forwards.
pub type DataTransform<P> = Arc<dyn Fn(&P) -> P + Send + Sync>;

/// What starts a flow.
pub struct FlowTrigger<P: Payload = Value> {
    pub event_name: String,
    /// Only events published by one of these sources start the flow.
    pub source_filter: Option<Vec<String>>,
    pub data_filter: Option<DataFilter<P>>,
}

impl<P: Payload> Clone for FlowTrigger<P> {
    fn clone(&self) -> Self {
        FlowTrigger {
            event_name: self.event_name.clone(),
            source_filter: self.source_filter.clone(),
            data_filter: self.data_filter.clone(),
        }
    }
}

impl<P: Payload> fmt::Debug for FlowTrigger<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowTrigger")
            .field("event_name", &self.event_name)
            .field("source_filter", &self.source_filter)
            .field("data_filter", &self.data_filter.is_some())
            .finish()
    }
}

impl<P: Payload> FlowTrigger<P> {
    pub fn new(event_name: impl Into<String>) -> Self {
        FlowTrigger {
            event_name: event_name.into(),
            source_filter: None,
            data_filter: None,
        }
    }

    pub fn from_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source_filter = Some(sources.into_iter().map(Into::into).collect());
        self
    }

    pub fn when(mut self, filter: impl Fn(&P) -> bool + Send + Sync + 'static) -> Self {
        self.data_filter = Some(Arc::new(filter));
        self
    }

    /// Whether `event` passes the source and data filters.
    pub fn accepts(&self, event: &Event<P>) -> bool {
        if let Some(sources) = &self.source_filter {
            if !sources.iter().any(|source| *source == event.source) {
                return false;
            }
        }
        match &self.data_filter {
            Some(filter) => filter(&event.payload),
            None => true,
        }
    }
}

/// The downstream effect of a handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "target", rename_all = "snake_case")]
pub enum FlowAction {
    /// Call a method on the target feature.
    Method(String),
    /// Re-publish the payload under this event name.
    Event(String),
}

impl fmt::Display for FlowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowAction::Method(method) => write!(f, "method {}", method),
            FlowAction::Event(event) => write!(f, "event {}", event),
        }
    }
}

/// One action of a flow.
pub struct FlowHandler<P: Payload = Value> {
    pub target_feature: String,
    pub action: FlowAction,
    pub data_transform: Option<DataTransform<P>>,
    pub condition: Option<DataFilter<P>>,
    /// Higher priorities are launched first.
    pub priority: i32,
}

impl<P: Payload> Clone for FlowHandler<P> {
    fn clone(&self) -> Self {
        FlowHandler {
            target_feature: self.target_feature.clone(),
            action: self.action.clone(),
            data_transform: self.data_transform.clone(),
            condition: self.condition.clone(),
            priority: self.priority,
        }
    }
}

impl<P: Payload> fmt::Debug for FlowHandler<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowHandler")
            .field("target_feature", &self.target_feature)
            .field("action", &self.action)
            .field("data_transform", &self.data_transform.is_some())
            .field("condition", &self.condition.is_some())
            .field("priority", &self.priority)
            .finish()
    }
}

impl<P: Payload> FlowHandler<P> {
    pub fn new(target_feature: impl Into<String>, action: FlowAction) -> Self {
        FlowHandler {
            target_feature: target_feature.into(),
            action,
            data_transform: None,
            condition: None,
            priority: 0,
        }
    }

    pub fn call_method(target_feature: impl Into<String>, method: impl Into<String>) -> Self {
        Self::new(target_feature, FlowAction::Method(method.into()))
    }

    pub fn emit_event(target_feature: impl Into<String>, event_name: impl Into<String>) -> Self {
        Self::new(target_feature, FlowAction::Event(event_name.into()))
    }

    pub fn transform(mut self, transform: impl Fn(&P) -> P + Send + Sync + 'static) -> Self {
        self.data_transform = Some(Arc::new(transform));
        self
    }

    pub fn when(mut self, condition: impl Fn(&P) -> bool + Send + Sync + 'static) -> Self {
        self.condition = Some(Arc::new(condition));
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Whether the handler's condition holds for `data`.
    pub fn applies(&self, data: &P) -> bool {
        self.condition.as_ref().map_or(true, |condition| condition(data))
    }

    /// The payload this handler forwards.
    pub fn prepare(&self, data: &P) -> P {
        match &self.data_transform {
            Some(transform) => transform(data),
            None => data.clone(),
        }
    }
}

/// A trigger and the handlers it fans out to.
pub struct EventFlow<P: Payload = Value> {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub trigger: FlowTrigger<P>,
    pub handlers: Vec<FlowHandler<P>>,
    pub enabled: bool,
}

impl<P: Payload> Clone for EventFlow<P> {
    fn clone(&self) -> Self {
        EventFlow {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            trigger: self.trigger.clone(),
            handlers: self.handlers.clone(),
            enabled: self.enabled,
        }
    }
}

impl<P: Payload> fmt::Debug for EventFlow<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventFlow")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("trigger", &self.trigger)
            .field("handlers", &self.handlers)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl<P: Payload> EventFlow<P> {
    /// An enabled flow without handlers.
    pub fn new(id: impl Into<String>, name: impl Into<String>, trigger: FlowTrigger<P>) -> Self {
        EventFlow {
            id: id.into(),
            name: name.into(),
            description: None,
            trigger,
            handlers: Vec::new(),
            enabled: true,
        }
    }

    pub fn handler(mut self, handler: FlowHandler<P>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| FlowError::InvalidFlow {
            flow: self.id.clone(),
            reason: reason.to_string(),
        };
        if self.id.trim().is_empty() {
            return Err(invalid("flow id must not be empty"));
        }
        if self.trigger.event_name.trim().is_empty() {
            return Err(invalid("trigger event name must not be empty"));
        }
        if self.handlers.iter().any(|h| h.target_feature.trim().is_empty()) {
            return Err(invalid("every handler needs a target feature"));
        }
        Ok(())
    }

    /// Sort handlers by descending priority, keeping declaration order for ties.
    pub(crate) fn order_handlers(&mut self) {
        self.handlers.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn info(&self, enabled: bool) -> FlowInfo {
        FlowInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            trigger_event: self.trigger.event_name.clone(),
            source_filter: self.trigger.source_filter.clone(),
            handlers: self
                .handlers
                .iter()
                .map(|h| HandlerInfo {
                    target_feature: h.target_feature.clone(),
                    action: h.action.clone(),
                    priority: h.priority,
                })
                .collect(),
            enabled,
        }
    }
}

/// Serializable description of a registered flow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowInfo {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub trigger_event: String,
    pub source_filter: Option<Vec<String>>,
    pub handlers: Vec<HandlerInfo>,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerInfo {
    pub target_feature: String,
    pub action: FlowAction,
    pub priority: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trigger_filters() {
        let trigger: FlowTrigger<Value> = FlowTrigger::new("combat.enemy.killed")
            .from_sources(["combat"])
            .when(|data: &Value| data["boss"] == json!(true));

        assert!(trigger.accepts(&Event::new("combat.enemy.killed", json!({"boss": true}), "combat")));
        assert!(!trigger.accepts(&Event::new("combat.enemy.killed", json!({"boss": true}), "cheats")));
        assert!(!trigger.accepts(&Event::new("combat.enemy.killed", json!({"boss": false}), "combat")));
    }

    #[test]
    fn test_handler_condition_and_transform() {
        let handler: FlowHandler<Value> = FlowHandler::call_method("inventory", "add_loot")
            .when(|data: &Value| data["loot"].is_array())
            .transform(|data: &Value| json!({ "items": data["loot"] }));

        let data = json!({"loot": ["gold"]});
        assert!(handler.applies(&data));
        assert_eq!(handler.prepare(&data), json!({"items": ["gold"]}));
        assert!(!handler.applies(&json!({})));

        let passthrough: FlowHandler<Value> = FlowHandler::emit_event("ui", "ui.refresh");
        assert_eq!(passthrough.prepare(&data), data);
    }

    #[test]
    fn test_order_handlers_is_stable() {
        let mut flow: EventFlow<Value> = EventFlow::new("f", "F", FlowTrigger::new("x"))
            .handler(FlowHandler::call_method("a", "m"))
            .handler(FlowHandler::call_method("b", "m").with_priority(5))
            .handler(FlowHandler::call_method("c", "m"));
        flow.order_handlers();
        let order: Vec<&str> = flow.handlers.iter().map(|h| h.target_feature.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_validate_rejects_empty_trigger() {
        let flow: EventFlow<Value> = EventFlow::new("f", "F", FlowTrigger::new(""));
        assert!(matches!(flow.validate(), Err(FlowError::InvalidFlow { .. })));
        let flow: EventFlow<Value> = EventFlow::new(" ", "F", FlowTrigger::new("x"));
        assert!(flow.validate().is_err());
    }

    #[test]
    fn test_action_serializes_tagged() {
        let action = FlowAction::Method("award_experience".into());
        assert_eq!(
            serde_json::to_value(&action).unwrap(),
            json!({"type": "method", "target": "award_experience"})
        );
    }
}
