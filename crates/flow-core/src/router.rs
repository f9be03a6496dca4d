//! # Event flow router
//!
//! [`EventFlowRouter`] turns declarative [`EventFlow`]s into bus
//! subscriptions. Every registered flow owns exactly one listener on its
//! trigger event (owner [`INTEGRATION_OWNER`]). When the trigger fires:
//!
//! ```text
//! trigger event
//!   ├─► source filter / data filter / enabled flag ── no ─► skip silently
//!   ├─► triggered_count += 1
//!   ├─► every handler concurrently (launched by descending priority)
//!   │     condition ─► transform ─► resolve feature ─► call method | re-emit
//!   └─► join ─► success_count + mean time | error_count + last_error
//! ```
//!
//! Missing features and methods are logged and skipped. Handler failures
//! never reach the publisher of the trigger event; they only show up in the
//! flow metrics and the logs.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use event_core::{
    Event, EventBus, EventListener, ListenerOptions, Metadata, Payload, SubscriptionId,
    WeakEventBus,
};
use futures::future::join_all;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use crate::error::{FlowError, Result};
use crate::flow::{EventFlow, FlowAction, FlowHandler, FlowInfo};
use crate::metrics::{FlowMetrics, FlowMetricsTracker};
use crate::registry::FeatureRegistry;

/// Owner of the router's bus subscriptions and source of re-emitted events.
pub const INTEGRATION_OWNER: &str = "event-integration-system";

struct RegisteredFlow<P: Payload> {
    flow: Arc<EventFlow<P>>,
    enabled: Arc<AtomicBool>,
    subscription: SubscriptionId,
}

/// Routes trigger events to feature methods and follow-up events.
pub struct EventFlowRouter<P: Payload = Value> {
    bus: EventBus<P>,
    features: Arc<dyn FeatureRegistry<P>>,
    flows: DashMap<String, RegisteredFlow<P>>,
    metrics: Arc<FlowMetricsTracker>,
}

impl<P: Payload> EventFlowRouter<P> {
    pub fn new(bus: EventBus<P>, features: Arc<dyn FeatureRegistry<P>>) -> Self {
        EventFlowRouter {
            bus,
            features,
            flows: DashMap::new(),
            metrics: Arc::new(FlowMetricsTracker::new()),
        }
    }

    pub fn bus(&self) -> &EventBus<P> {
        &self.bus
    }

    /// Install `flow` on the bus. Fails if a flow with the same id exists.
    pub fn register_flow(&self, mut flow: EventFlow<P>) -> Result<()> {
        flow.validate()?;
        flow.order_handlers();

        match self.flows.entry(flow.id.clone()) {
            Entry::Occupied(_) => Err(FlowError::DuplicateFlow(flow.id)),
            Entry::Vacant(slot) => {
                let flow = Arc::new(flow);
                let enabled = Arc::new(AtomicBool::new(flow.enabled));
                self.metrics.register(&flow.id);

                let listener = FlowListener {
                    flow: Arc::clone(&flow),
                    enabled: Arc::clone(&enabled),
                    features: Arc::clone(&self.features),
                    metrics: Arc::clone(&self.metrics),
                    bus: self.bus.downgrade(),
                };
                let subscription = self.bus.subscribe(
                    flow.trigger.event_name.clone(),
                    Arc::new(listener),
                    INTEGRATION_OWNER,
                    ListenerOptions::default(),
                );

                info!(
                    flow = %flow.id,
                    trigger = %flow.trigger.event_name,
                    handlers = flow.handlers.len(),
                    "registered event flow"
                );
                slot.insert(RegisteredFlow {
                    flow,
                    enabled,
                    subscription,
                });
                Ok(())
            }
        }
    }

    /// Register several flows, stopping at the first failure.
    pub fn register_flows(&self, flows: impl IntoIterator<Item = EventFlow<P>>) -> Result<usize> {
        let mut registered = 0;
        for flow in flows {
            self.register_flow(flow)?;
            registered += 1;
        }
        Ok(registered)
    }

    pub fn enable_flow(&self, flow_id: &str) -> Result<()> {
        self.set_enabled(flow_id, true)
    }

    pub fn disable_flow(&self, flow_id: &str) -> Result<()> {
        self.set_enabled(flow_id, false)
    }

    fn set_enabled(&self, flow_id: &str, enabled: bool) -> Result<()> {
        let registered = self
            .flows
            .get(flow_id)
            .ok_or_else(|| FlowError::FlowNotFound(flow_id.to_string()))?;
        registered.enabled.store(enabled, Ordering::Release);
        debug!(flow = %flow_id, enabled, "flow toggled");
        Ok(())
    }

    /// Remove the flow's bus subscription and its metrics entry.
    pub fn remove_flow(&self, flow_id: &str) -> Result<()> {
        let (_, registered) = self
            .flows
            .remove(flow_id)
            .ok_or_else(|| FlowError::FlowNotFound(flow_id.to_string()))?;
        self.bus.unsubscribe(registered.subscription);
        self.metrics.remove(flow_id);
        info!(flow = %flow_id, "removed event flow");
        Ok(())
    }

    pub fn get_flow(&self, flow_id: &str) -> Option<FlowInfo> {
        self.flows
            .get(flow_id)
            .map(|registered| registered.flow.info(registered.enabled.load(Ordering::Acquire)))
    }

    /// Every registered flow, ordered by id.
    pub fn list_flows(&self) -> Vec<FlowInfo> {
        let mut flows: Vec<FlowInfo> = self
            .flows
            .iter()
            .map(|registered| registered.flow.info(registered.enabled.load(Ordering::Acquire)))
            .collect();
        flows.sort_by(|a, b| a.id.cmp(&b.id));
        flows
    }

    pub fn is_enabled(&self, flow_id: &str) -> Option<bool> {
        self.flows
            .get(flow_id)
            .map(|registered| registered.enabled.load(Ordering::Acquire))
    }

    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    pub fn get_flow_metrics(&self) -> Vec<FlowMetrics> {
        self.metrics.all()
    }

    pub fn get_flow_metrics_by_id(&self, flow_id: &str) -> Option<FlowMetrics> {
        self.metrics.get(flow_id)
    }

    /// Publish a trigger event on the router's bus.
    pub async fn trigger(
        &self,
        event_name: impl Into<String>,
        payload: P,
        source: impl Into<String>,
    ) -> Result<()> {
        self.bus.emit(event_name, payload, source, None).await?;
        Ok(())
    }

    /// Remove every flow this router installed.
    pub fn shutdown(&self) {
        let ids: Vec<String> = self.flows.iter().map(|r| r.key().clone()).collect();
        for id in &ids {
            if let Some((_, registered)) = self.flows.remove(id) {
                self.bus.unsubscribe(registered.subscription);
            }
        }
        self.metrics.clear();
        info!(flows = ids.len(), "event flow router shut down");
    }
}

/// The bus listener installed for one flow.
struct FlowListener<P: Payload> {
    flow: Arc<EventFlow<P>>,
    enabled: Arc<AtomicBool>,
    features: Arc<dyn FeatureRegistry<P>>,
    metrics: Arc<FlowMetricsTracker>,
    bus: WeakEventBus<P>,
}

#[async_trait]
impl<P: Payload> EventListener<P> for FlowListener<P> {
    async fn handle(&self, event: Arc<Event<P>>) -> anyhow::Result<()> {
        let flow = &self.flow;
        if !flow.trigger.accepts(&event) {
            trace!(flow = %flow.id, source = %event.source, "trigger filtered out");
            return Ok(());
        }
        if !self.enabled.load(Ordering::Acquire) {
            trace!(flow = %flow.id, "flow disabled, skipping");
            return Ok(());
        }

        self.metrics.record_trigger(&flow.id);
        let started = Instant::now();

        let trigger: &Event<P> = &event;
        let outcomes = join_all(flow.handlers.iter().map(|handler| async move {
            match AssertUnwindSafe(self.run_handler(handler, trigger)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => Err(FlowError::FlowHandler {
                    flow: flow.id.clone(),
                    feature: handler.target_feature.clone(),
                    reason: "handler panicked".to_string(),
                }),
            }
        }))
        .await;

        let failures: Vec<FlowError> = outcomes.into_iter().filter_map(|o| o.err()).collect();
        if failures.is_empty() {
            self.metrics.record_success(&flow.id, started.elapsed());
        } else {
            for failure in &failures {
                error!(flow = %flow.id, event = %event.name, error = %failure, "flow handler failed");
            }
            let summary = failures
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            self.metrics.record_error(&flow.id, summary);
        }
        Ok(())
    }
}

impl<P: Payload> FlowListener<P> {
    async fn run_handler(&self, handler: &FlowHandler<P>, event: &Event<P>) -> Result<()> {
        let flow = &self.flow;
        if !handler.applies(&event.payload) {
            trace!(flow = %flow.id, feature = %handler.target_feature, "handler condition not met");
            return Ok(());
        }
        let data = handler.prepare(&event.payload);

        let Some(feature) = self.features.get_feature(&handler.target_feature) else {
            warn!(flow = %flow.id, feature = %handler.target_feature, "target feature not available, skipping");
            return Ok(());
        };

        match &handler.action {
            FlowAction::Method(method) => {
                if !feature.has_method(method) {
                    warn!(
                        flow = %flow.id,
                        feature = %handler.target_feature,
                        method = %method,
                        "target method not found, skipping"
                    );
                    return Ok(());
                }
                feature.call(method, data).await.map_err(|err| FlowError::FlowHandler {
                    flow: flow.id.clone(),
                    feature: handler.target_feature.clone(),
                    reason: format!("{}: {:#}", method, err),
                })
            }
            FlowAction::Event(target) => {
                let Some(bus) = self.bus.upgrade() else {
                    warn!(flow = %flow.id, event = %target, "event bus dropped, not re-emitting");
                    return Ok(());
                };
                let mut metadata = Metadata::new();
                metadata.insert("flowId".to_string(), flow.id.clone().into());
                metadata.insert("triggerEventId".to_string(), event.id.as_str().into());
                debug!(flow = %flow.id, event = %target, "re-emitting");
                // detached: the result is logged by the bus
                drop(bus.emit_sync(target.clone(), data, INTEGRATION_OWNER, Some(metadata)));
                Ok(())
            }
        }
    }
}
