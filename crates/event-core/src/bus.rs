//! # In-process event bus
//!
//! [`EventBus`] connects independently developed feature modules. Features
//! subscribe to event names with a priority and an owner, producers `emit`
//! events, and the bus dispatches each event to every matching listener.
//!
//! ## Emit pipeline
//! ```text
//! emit(name, payload, source)
//!   ├─► build Event { id, timestamp, metadata }
//!   ├─► middleware (ascending priority) ── Err ─► caller + global error handler
//!   ├─► append to bounded log (oldest entries dropped)
//!   ├─► snapshot listeners (exact name + matching wildcards)
//!   ├─► claim and unregister `once` listeners
//!   ├─► dispatch concurrently, each failure/panic isolated and reported
//!   └─► record metrics, resolve
//! ```
//!
//! ## Rules
//! - Dispatch always iterates a snapshot; `on`/`off` during a dispatch never
//!   affects the emission already in flight.
//! - Listeners run in descending priority order, ties in registration order.
//! - A failing listener never fails its siblings or the `emit` call.
//! - Wildcards: `"*"` matches every event, `"combat.*"` matches every event
//!   whose name starts with `"combat."`.

use std::collections::{BTreeMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::EventBusConfig;
use crate::error::{panic_message, EventError, Result};
use crate::event::{Event, Metadata, NamedEvent, Payload};
use crate::health::{HealthReport, HealthStatus};
use crate::listener::{
    insert_sorted, EventListener, FnListener, ListenerEntry, ListenerInfo, ListenerOptions,
    SubscriptionId,
};
use crate::metrics::{BusMetrics, MetricsCollector};
use crate::middleware::{Middleware, MiddlewarePipeline};

/// Default timeout used by [`EventBus::wait_for_event_default`].
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Owner recorded for the temporary listeners installed by `wait_for_event`.
pub const WAIT_FOR_EVENT_OWNER: &str = "event-bus-wait";

/// Callback receiving every isolated or fatal error together with the event.
pub type ErrorHandler<P> = Arc<dyn Fn(&EventError, &Event<P>) + Send + Sync>;

type ListenerTable<P> = DashMap<String, Vec<Arc<ListenerEntry<P>>>>;

struct Inner<P: Payload> {
    config: EventBusConfig,
    listeners: ListenerTable<P>,
    wildcards: ListenerTable<P>,
    middleware: RwLock<MiddlewarePipeline<P>>,
    log: Mutex<VecDeque<Arc<Event<P>>>>,
    metrics: MetricsCollector,
    error_handler: RwLock<Option<ErrorHandler<P>>>,
    next_subscription: AtomicU64,
}

impl<P: Payload> Inner<P> {
    fn table_for(&self, name: &str) -> &ListenerTable<P> {
        if is_wildcard(name) {
            &self.wildcards
        } else {
            &self.listeners
        }
    }
}

/// Whether a subscription name is a wildcard pattern.
pub fn is_wildcard(name: &str) -> bool {
    name == "*" || name.ends_with(".*")
}

/// Whether a wildcard pattern matches a concrete event name.
pub fn pattern_matches(pattern: &str, name: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => name.len() > prefix.len() && name.starts_with(prefix),
        None => pattern == name,
    }
}

/// Handle to an event bus. Cheap to clone; all clones share the same state.
pub struct EventBus<P: Payload = Value> {
    inner: Arc<Inner<P>>,
}

impl<P: Payload> Clone for EventBus<P> {
    fn clone(&self) -> Self {
        EventBus {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Payload> Default for EventBus<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Payload> EventBus<P> {
    /// Bus with default configuration and only the built-in middleware.
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    pub fn with_config(config: EventBusConfig) -> Self {
        EventBusBuilder::new().config(config).build()
    }

    pub fn builder() -> EventBusBuilder<P> {
        EventBusBuilder::new()
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.inner.config
    }

    /// Non-owning handle, for listeners that need to reach the bus they are
    /// registered on.
    pub fn downgrade(&self) -> WeakEventBus<P> {
        WeakEventBus {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // ---- Subscriptions ----

    /// Register an async closure for `event_name`.
    pub fn on<F, Fut>(
        &self,
        event_name: impl Into<String>,
        handler: F,
        owner: impl Into<String>,
        options: ListenerOptions,
    ) -> SubscriptionId
    where
        F: Fn(Arc<Event<P>>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.subscribe(event_name, Arc::new(FnListener::new(handler)), owner, options)
    }

    /// Register a closure that is removed after its first dispatch.
    pub fn once<F, Fut>(
        &self,
        event_name: impl Into<String>,
        handler: F,
        owner: impl Into<String>,
        priority: i32,
    ) -> SubscriptionId
    where
        F: Fn(Arc<Event<P>>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on(event_name, handler, owner, ListenerOptions::once().with_priority(priority))
    }

    /// Register a listener object for `event_name`.
    pub fn subscribe(
        &self,
        event_name: impl Into<String>,
        handler: Arc<dyn EventListener<P>>,
        owner: impl Into<String>,
        options: ListenerOptions,
    ) -> SubscriptionId {
        let event_name = event_name.into();
        let owner = owner.into();
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed) + 1);

        if self.inner.config.enable_debug_logging {
            debug!(
                event = %event_name,
                owner = %owner,
                priority = options.priority,
                once = options.once,
                "registering listener {}",
                id
            );
        }

        let entry = Arc::new(ListenerEntry::new(id, handler, owner, options));
        let table = self.inner.table_for(&event_name);
        let mut list = table.entry(event_name).or_default();
        insert_sorted(&mut list, entry);
        id
    }

    /// Remove listeners for `event_name`: only `owner`'s when given, otherwise all.
    /// Returns the number of listeners removed.
    pub fn off(&self, event_name: &str, owner: Option<&str>) -> usize {
        let table = self.inner.table_for(event_name);
        let removed = match owner {
            None => table.remove(event_name).map(|(_, list)| list.len()).unwrap_or(0),
            Some(owner) => {
                let removed = match table.get_mut(event_name) {
                    Some(mut list) => {
                        let before = list.len();
                        list.retain(|entry| entry.owner != owner);
                        before - list.len()
                    }
                    None => 0,
                };
                table.remove_if(event_name, |_, list| list.is_empty());
                removed
            }
        };
        if removed > 0 {
            debug!(event = %event_name, owner = ?owner, removed, "listeners removed");
        }
        removed
    }

    /// Remove one subscription. Returns whether it was still registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        for table in [&self.inner.listeners, &self.inner.wildcards] {
            let mut emptied = None;
            let mut found = false;
            for mut list in table.iter_mut() {
                if let Some(pos) = list.iter().position(|entry| entry.id == id) {
                    list.remove(pos);
                    found = true;
                    if list.is_empty() {
                        emptied = Some(list.key().clone());
                    }
                    break;
                }
            }
            if let Some(key) = emptied {
                table.remove_if(&key, |_, list| list.is_empty());
            }
            if found {
                return true;
            }
        }
        false
    }

    /// Remove every listener owned by `owner`, across all event names.
    pub fn off_owner(&self, owner: &str) -> usize {
        let mut removed = 0;
        for table in [&self.inner.listeners, &self.inner.wildcards] {
            table.retain(|_, list| {
                let before = list.len();
                list.retain(|entry| entry.owner != owner);
                removed += before - list.len();
                !list.is_empty()
            });
        }
        if removed > 0 {
            info!(owner, removed, "removed all listeners for owner");
        }
        removed
    }

    /// Listeners registered directly on `event_name` (wildcards not included).
    pub fn listener_count(&self, event_name: &str) -> usize {
        self.inner
            .table_for(event_name)
            .get(event_name)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    /// Whether an emission of `event_name` would reach at least one listener.
    pub fn has_listeners(&self, event_name: &str) -> bool {
        !self.snapshot(event_name).is_empty()
    }

    /// All registered listeners keyed by event name or wildcard pattern.
    pub fn get_active_listeners(&self) -> BTreeMap<String, Vec<ListenerInfo>> {
        let mut active = BTreeMap::new();
        for table in [&self.inner.listeners, &self.inner.wildcards] {
            for list in table.iter() {
                let infos = list.iter().map(|entry| entry.info(list.key())).collect();
                active.insert(list.key().clone(), infos);
            }
        }
        active
    }

    fn total_listeners(&self) -> usize {
        [&self.inner.listeners, &self.inner.wildcards]
            .iter()
            .map(|table| table.iter().map(|list| list.len()).sum::<usize>())
            .sum()
    }

    /// Listeners that an emission of `event_name` would reach, in dispatch order.
    fn snapshot(&self, event_name: &str) -> Vec<Arc<ListenerEntry<P>>> {
        let mut snapshot = self
            .inner
            .listeners
            .get(event_name)
            .map(|list| list.clone())
            .unwrap_or_default();

        let mut merged = false;
        for list in self.inner.wildcards.iter() {
            if pattern_matches(list.key(), event_name) {
                snapshot.extend(list.iter().cloned());
                merged = true;
            }
        }
        if merged {
            snapshot.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        }
        snapshot
    }

    // ---- Middleware ----

    pub fn add_middleware(&self, middleware: Arc<dyn Middleware<P>>) {
        debug!(name = middleware.name(), priority = middleware.priority(), "adding middleware");
        self.inner.middleware.write().add(middleware);
    }

    pub fn remove_middleware(&self, name: &str) -> bool {
        self.inner.middleware.write().remove(name)
    }

    pub fn middleware_names(&self) -> Vec<String> {
        self.inner.middleware.read().names()
    }

    // ---- Publication ----

    /// Publish an event and wait until every listener has settled.
    ///
    /// Fails only when the middleware pipeline rejects the event; listener
    /// failures are reported through logging, metrics and the global error
    /// handler.
    pub async fn emit(
        &self,
        event_name: impl Into<String>,
        payload: P,
        source: impl Into<String>,
        metadata: Option<Metadata>,
    ) -> Result<()> {
        let mut event = Event::new(event_name, payload, source);
        if let Some(metadata) = metadata {
            event = event.with_metadata(metadata);
        }
        self.emit_event(event).await
    }

    /// Publish a typed payload under the name it reports for itself.
    pub async fn publish(&self, payload: P, source: impl Into<String>) -> Result<()>
    where
        P: NamedEvent,
    {
        let name = payload.event_name();
        self.emit(name.into_owned(), payload, source, None).await
    }

    /// Publish an already constructed event.
    pub async fn emit_event(&self, event: Event<P>) -> Result<()> {
        let started = Instant::now();

        let pipeline = self.inner.middleware.read().clone();
        let event = match pipeline.run(event.clone()).await {
            Ok(event) => Arc::new(event),
            Err(err) => {
                warn!(event = %event.name, source = %event.source, error = %err, "event rejected");
                self.inner.metrics.record_error();
                self.report(&err, &event);
                return Err(err);
            }
        };

        self.append_log(Arc::clone(&event));

        let listeners = self.snapshot(&event.name);
        if self.inner.config.enable_debug_logging {
            debug!(
                event = %event.name,
                id = %event.id,
                source = %event.source,
                listeners = listeners.len(),
                "dispatching event"
            );
        }

        let claimed: Vec<Arc<ListenerEntry<P>>> =
            listeners.into_iter().filter(|listener| listener.claim()).collect();
        // a claimed `once` entry can never fire again
        for listener in claimed.iter().filter(|listener| listener.once) {
            self.unsubscribe(listener.id);
        }

        join_all(
            claimed
                .iter()
                .map(|listener| self.invoke(Arc::clone(listener), Arc::clone(&event))),
        )
        .await;

        self.inner.metrics.record_event(&event.name, started.elapsed());
        Ok(())
    }

    /// Fire-and-forget publication on a detached task. Failures are logged
    /// and never reach the caller.
    pub fn emit_sync(
        &self,
        event_name: impl Into<String>,
        payload: P,
        source: impl Into<String>,
        metadata: Option<Metadata>,
    ) -> JoinHandle<()> {
        let bus = self.clone();
        let event_name = event_name.into();
        let source = source.into();
        tokio::spawn(async move {
            if let Err(err) = bus.emit(event_name.clone(), payload, source, metadata).await {
                warn!(event = %event_name, error = %err, "detached emit failed");
            }
        })
    }

    async fn invoke(&self, listener: Arc<ListenerEntry<P>>, event: Arc<Event<P>>) {
        let outcome = AssertUnwindSafe(listener.handler.handle(Arc::clone(&event)))
            .catch_unwind()
            .await;

        let reason = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(err)) => format!("{:#}", err),
            Err(panic) => format!("listener panicked: {}", panic_message(panic.as_ref())),
        };

        let err = EventError::Listener {
            subscription: listener.id,
            owner: listener.owner.clone(),
            event: event.name.clone(),
            reason,
        };
        error!(error = %err, "listener failed");
        self.inner.metrics.record_error();
        self.report(&err, &event);
    }

    fn report(&self, err: &EventError, event: &Event<P>) {
        let handler = self.inner.error_handler.read().clone();
        if let Some(handler) = handler {
            if std::panic::catch_unwind(AssertUnwindSafe(|| handler(err, event))).is_err() {
                error!(event = %event.name, "global error handler panicked");
            }
        }
    }

    /// Replace the global error handler.
    pub fn set_error_handler(&self, handler: impl Fn(&EventError, &Event<P>) + Send + Sync + 'static) {
        *self.inner.error_handler.write() = Some(Arc::new(handler));
    }

    pub fn clear_error_handler(&self) {
        *self.inner.error_handler.write() = None;
    }

    // ---- Waiting ----

    /// Resolve with the next `event_name` emission, or fail after `timeout`.
    /// The temporary listener is removed either way, and also when the
    /// returned future is dropped before it resolves.
    pub async fn wait_for_event(
        &self,
        event_name: impl Into<String>,
        timeout: Duration,
    ) -> Result<Arc<Event<P>>> {
        let event_name = event_name.into();
        let (tx, rx) = oneshot::channel::<Arc<Event<P>>>();
        let tx = Mutex::new(Some(tx));

        let id = self.on(
            event_name.clone(),
            move |event: Arc<Event<P>>| {
                let sender = tx.lock().take();
                async move {
                    if let Some(sender) = sender {
                        let _ = sender.send(event);
                    }
                    Ok::<(), anyhow::Error>(())
                }
            },
            WAIT_FOR_EVENT_OWNER,
            ListenerOptions::once(),
        );

        let guard = SubscriptionGuard {
            bus: self.downgrade(),
            id,
        };
        let outcome = tokio::time::timeout(timeout, rx).await;
        drop(guard);

        match outcome {
            Ok(Ok(event)) => Ok(event),
            Ok(Err(_)) => Err(EventError::Cancelled { event: event_name }),
            Err(_) => {
                debug!(event = %event_name, ?timeout, "wait_for_event timed out");
                Err(EventError::Timeout {
                    event: event_name,
                    timeout,
                })
            }
        }
    }

    /// [`wait_for_event`](Self::wait_for_event) with the default 10 second timeout.
    pub async fn wait_for_event_default(&self, event_name: impl Into<String>) -> Result<Arc<Event<P>>> {
        self.wait_for_event(event_name, DEFAULT_WAIT_TIMEOUT).await
    }

    // ---- Event log ----

    fn append_log(&self, event: Arc<Event<P>>) {
        let mut log = self.inner.log.lock();
        log.push_back(event);
        while log.len() > self.inner.config.max_log_size {
            log.pop_front();
        }
    }

    /// The most recent `limit` events (all when `None`), oldest first.
    pub fn get_event_log(&self, limit: Option<usize>) -> Vec<Arc<Event<P>>> {
        let log = self.inner.log.lock();
        let skip = limit.map(|limit| log.len().saturating_sub(limit)).unwrap_or(0);
        log.iter().skip(skip).cloned().collect()
    }

    pub fn clear_event_log(&self) {
        self.inner.log.lock().clear();
    }

    // ---- Observability ----

    pub fn get_metrics(&self) -> BusMetrics {
        self.inner.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.inner.metrics.reset();
    }

    pub fn get_health_status(&self) -> HealthReport {
        let metrics = self.inner.metrics.snapshot();
        let status = HealthStatus::from_error_rate(metrics.error_rate);
        let message = match status {
            HealthStatus::Healthy => None,
            _ => Some(format!(
                "{} errors across {} events (error rate {:.2})",
                metrics.error_count, metrics.total_events, metrics.error_rate
            )),
        };

        HealthReport {
            status,
            message,
            total_listeners: self.total_listeners(),
            event_names: self.inner.listeners.len() + self.inner.wildcards.len(),
            middleware_count: self.inner.middleware.read().len(),
            log_size: self.inner.log.lock().len(),
            max_log_size: self.inner.config.max_log_size,
            total_events: metrics.total_events,
            error_rate: metrics.error_rate,
            uptime_seconds: metrics.uptime_seconds,
        }
    }

    /// Drop every listener and the event log. Middleware and metrics stay.
    pub fn shutdown(&self) {
        let listeners = self.total_listeners();
        self.inner.listeners.clear();
        self.inner.wildcards.clear();
        self.clear_event_log();
        info!(listeners, "event bus shut down");
    }
}

/// Removes a temporary subscription when dropped, so a cancelled waiter
/// leaves nothing behind.
struct SubscriptionGuard<P: Payload> {
    bus: WeakEventBus<P>,
    id: SubscriptionId,
}

impl<P: Payload> Drop for SubscriptionGuard<P> {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

/// Non-owning reference to an [`EventBus`].
pub struct WeakEventBus<P: Payload = Value> {
    inner: Weak<Inner<P>>,
}

impl<P: Payload> Clone for WeakEventBus<P> {
    fn clone(&self) -> Self {
        WeakEventBus {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<P: Payload> WeakEventBus<P> {
    /// The bus, if it is still alive.
    pub fn upgrade(&self) -> Option<EventBus<P>> {
        self.inner.upgrade().map(|inner| EventBus { inner })
    }
}

/// Builder for configuring and creating an [`EventBus`].
pub struct EventBusBuilder<P: Payload = Value> {
    config: EventBusConfig,
    middleware: Vec<Arc<dyn Middleware<P>>>,
    error_handler: Option<ErrorHandler<P>>,
}

impl<P: Payload> Default for EventBusBuilder<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Payload> EventBusBuilder<P> {
    pub fn new() -> Self {
        EventBusBuilder {
            config: EventBusConfig::default(),
            middleware: Vec::new(),
            error_handler: None,
        }
    }

    pub fn config(mut self, config: EventBusConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_log_size(mut self, max_log_size: usize) -> Self {
        self.config.max_log_size = max_log_size.max(1);
        self
    }

    pub fn debug_logging(mut self, enabled: bool) -> Self {
        self.config.enable_debug_logging = enabled;
        self
    }

    pub fn performance_metrics(mut self, enabled: bool) -> Self {
        self.config.enable_performance_metrics = enabled;
        self
    }

    /// Add a middleware stage on top of the built-ins.
    pub fn middleware(mut self, middleware: Arc<dyn Middleware<P>>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn error_handler(mut self, handler: impl Fn(&EventError, &Event<P>) + Send + Sync + 'static) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> EventBus<P> {
        let mut pipeline = MiddlewarePipeline::new();
        for stage in self.middleware {
            pipeline.add(stage);
        }

        let max_log_size = self.config.max_log_size.max(1);
        let config = EventBusConfig {
            max_log_size,
            ..self.config
        };

        EventBus {
            inner: Arc::new(Inner {
                metrics: MetricsCollector::new(config.enable_performance_metrics),
                log: Mutex::new(VecDeque::with_capacity(max_log_size.min(1024))),
                config,
                listeners: DashMap::new(),
                wildcards: DashMap::new(),
                middleware: RwLock::new(pipeline),
                error_handler: RwLock::new(self.error_handler),
                next_subscription: AtomicU64::new(0),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_patterns() {
        assert!(is_wildcard("*"));
        assert!(is_wildcard("combat.*"));
        assert!(!is_wildcard("combat.enemy.killed"));

        assert!(pattern_matches("*", "anything"));
        assert!(pattern_matches("combat.*", "combat.enemy.killed"));
        assert!(!pattern_matches("combat.*", "combat."));
        assert!(!pattern_matches("combat.*", "combatant.hit"));
        assert!(!pattern_matches("combat.*", "inventory.item.added"));
    }
}
