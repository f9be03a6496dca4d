use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::event::{Event, Payload};

/// Handle returned by every subscription, used for precise removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Receives events of one name.
#[async_trait]
pub trait EventListener<P: Payload>: Send + Sync {
    async fn handle(&self, event: Arc<Event<P>>) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into an [`EventListener`].
pub struct FnListener<F> {
    f: F,
}

impl<F> FnListener<F> {
    pub fn new(f: F) -> Self {
        FnListener { f }
    }
}

#[async_trait]
impl<P, F, Fut> EventListener<P> for FnListener<F>
where
    P: Payload,
    F: Fn(Arc<Event<P>>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, event: Arc<Event<P>>) -> anyhow::Result<()> {
        (self.f)(event).await
    }
}

/// Options accepted by `EventBus::on`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerOptions {
    /// Higher priorities run first.
    pub priority: i32,
    /// Remove the listener after its first dispatch attempt.
    pub once: bool,
}

impl ListenerOptions {
    pub fn priority(priority: i32) -> Self {
        ListenerOptions { priority, once: false }
    }

    pub fn once() -> Self {
        ListenerOptions { priority: 0, once: true }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// A registered listener as stored by the bus.
pub(crate) struct ListenerEntry<P: Payload> {
    pub id: SubscriptionId,
    pub handler: Arc<dyn EventListener<P>>,
    pub owner: String,
    pub priority: i32,
    pub once: bool,
    pub registered_at: DateTime<Utc>,
    /// Set when a `once` listener has been claimed by a dispatch.
    fired: AtomicBool,
}

impl<P: Payload> ListenerEntry<P> {
    pub fn new(
        id: SubscriptionId,
        handler: Arc<dyn EventListener<P>>,
        owner: String,
        options: ListenerOptions,
    ) -> Self {
        ListenerEntry {
            id,
            handler,
            owner,
            priority: options.priority,
            once: options.once,
            registered_at: Utc::now(),
            fired: AtomicBool::new(false),
        }
    }

    /// Claim this listener for a dispatch. Always true for regular listeners;
    /// true exactly once for `once` listeners.
    pub fn claim(&self) -> bool {
        !self.once || !self.fired.swap(true, Ordering::AcqRel)
    }

    pub fn info(&self, pattern: &str) -> ListenerInfo {
        ListenerInfo {
            id: self.id,
            event: pattern.to_string(),
            owner: self.owner.clone(),
            priority: self.priority,
            once: self.once,
            registered_at: self.registered_at,
        }
    }
}

/// Insert keeping descending priority; equal priorities stay in registration order.
pub(crate) fn insert_sorted<P: Payload>(list: &mut Vec<Arc<ListenerEntry<P>>>, entry: Arc<ListenerEntry<P>>) {
    let pos = list
        .iter()
        .position(|existing| existing.priority < entry.priority)
        .unwrap_or(list.len());
    list.insert(pos, entry);
}

/// Read-only view of a registered listener.
#[derive(Debug, Clone, Serialize)]
pub struct ListenerInfo {
    pub id: SubscriptionId,
    /// Event name or wildcard pattern the listener is registered on.
    pub event: String,
    pub owner: String,
    pub priority: i32,
    pub once: bool,
    pub registered_at: DateTime<Utc>,
}
