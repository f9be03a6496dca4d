//! Middleware pipeline run before every dispatch.
//!
//! Stages are ordered by ascending priority (lower runs first) and each one
//! receives the event produced by the previous stage. A stage that fails
//! aborts the publication: no listener sees the event and the error is
//! returned to the caller of `emit`.
//!
//! Two stages are installed on every bus:
//! - [`PerformanceMiddleware`] (priority 1000) stamps processing metadata.
//! - [`ValidationMiddleware`] (priority 2000) rejects malformed events.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use tracing::trace;

use crate::error::{panic_message, EventError, Result};
use crate::event::{Event, Payload};

pub const PERFORMANCE_MIDDLEWARE_PRIORITY: i32 = 1000;
pub const VALIDATION_MIDDLEWARE_PRIORITY: i32 = 2000;
/// Priority given to closure middleware unless one is set explicitly.
pub const DEFAULT_MIDDLEWARE_PRIORITY: i32 = 5000;

/// A transform/validate stage of the pipeline.
#[async_trait]
pub trait Middleware<P: Payload>: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> i32 {
        DEFAULT_MIDDLEWARE_PRIORITY
    }

    async fn process(&self, event: Event<P>) -> anyhow::Result<Event<P>>;
}

/// Synchronous closure middleware.
pub struct MiddlewareFn<F> {
    name: String,
    priority: i32,
    f: F,
}

impl<F> MiddlewareFn<F> {
    pub fn new<P>(name: impl Into<String>, f: F) -> Self
    where
        P: Payload,
        F: Fn(Event<P>) -> anyhow::Result<Event<P>> + Send + Sync,
    {
        MiddlewareFn {
            name: name.into(),
            priority: DEFAULT_MIDDLEWARE_PRIORITY,
            f,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl<P, F> Middleware<P> for MiddlewareFn<F>
where
    P: Payload,
    F: Fn(Event<P>) -> anyhow::Result<Event<P>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn process(&self, event: Event<P>) -> anyhow::Result<Event<P>> {
        (self.f)(event)
    }
}

/// Stamps `processingStarted` (epoch millis) into the event metadata.
#[derive(Debug, Default)]
pub struct PerformanceMiddleware;

#[async_trait]
impl<P: Payload> Middleware<P> for PerformanceMiddleware {
    fn name(&self) -> &str {
        "performance"
    }

    fn priority(&self) -> i32 {
        PERFORMANCE_MIDDLEWARE_PRIORITY
    }

    async fn process(&self, mut event: Event<P>) -> anyhow::Result<Event<P>> {
        event
            .metadata
            .insert("processingStarted".to_string(), Utc::now().timestamp_millis().into());
        Ok(event)
    }
}

/// Rejects events without a name, source or id, and payloads that fail
/// their own [`Payload::validate`].
#[derive(Debug, Default)]
pub struct ValidationMiddleware;

#[async_trait]
impl<P: Payload> Middleware<P> for ValidationMiddleware {
    fn name(&self) -> &str {
        "validation"
    }

    fn priority(&self) -> i32 {
        VALIDATION_MIDDLEWARE_PRIORITY
    }

    async fn process(&self, event: Event<P>) -> anyhow::Result<Event<P>> {
        if event.name.is_empty() {
            return Err(EventError::Validation("event name must not be empty".into()).into());
        }
        if event.source.is_empty() {
            return Err(EventError::Validation(format!(
                "event '{}' has no source",
                event.name
            ))
            .into());
        }
        if event.id.is_empty() {
            return Err(EventError::Validation(format!("event '{}' has no id", event.name)).into());
        }
        event
            .payload
            .validate(&event.name)
            .map_err(|reason| EventError::Validation(format!("payload of '{}': {}", event.name, reason)))?;
        Ok(event)
    }
}

/// Ordered list of middleware stages.
pub struct MiddlewarePipeline<P: Payload> {
    stages: Vec<Arc<dyn Middleware<P>>>,
}

impl<P: Payload> Clone for MiddlewarePipeline<P> {
    fn clone(&self) -> Self {
        MiddlewarePipeline {
            stages: self.stages.clone(),
        }
    }
}

impl<P: Payload> Default for MiddlewarePipeline<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Payload> MiddlewarePipeline<P> {
    /// Pipeline holding only the built-in stages.
    pub fn new() -> Self {
        let mut pipeline = MiddlewarePipeline { stages: Vec::new() };
        pipeline.add(Arc::new(PerformanceMiddleware));
        pipeline.add(Arc::new(ValidationMiddleware));
        pipeline
    }

    /// Insert keeping ascending priority; equal priorities keep insertion order.
    pub fn add(&mut self, stage: Arc<dyn Middleware<P>>) {
        let pos = self
            .stages
            .iter()
            .position(|existing| existing.priority() > stage.priority())
            .unwrap_or(self.stages.len());
        self.stages.insert(pos, stage);
    }

    /// Remove every stage with the given name.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.stages.len();
        self.stages.retain(|stage| stage.name() != name);
        self.stages.len() != before
    }

    pub fn names(&self) -> Vec<String> {
        self.stages.iter().map(|stage| stage.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run the event through every stage in order. A stage that panics is
    /// reported as a failure of that stage.
    pub async fn run(&self, mut event: Event<P>) -> Result<Event<P>> {
        for stage in &self.stages {
            let event_name = event.name.clone();
            trace!(stage = stage.name(), event = %event_name, "running middleware");
            event = match AssertUnwindSafe(stage.process(event)).catch_unwind().await {
                Ok(Ok(event)) => event,
                Ok(Err(err)) => return Err(stage_error(stage.name(), event_name, err)),
                Err(panic) => {
                    return Err(EventError::Middleware {
                        stage: stage.name().to_string(),
                        event: event_name,
                        source: format!("middleware panicked: {}", panic_message(panic.as_ref())).into(),
                    });
                }
            };
        }
        Ok(event)
    }
}

/// Validation errors pass through untouched, everything else names the stage.
fn stage_error(stage: &str, event: String, err: anyhow::Error) -> EventError {
    match err.downcast::<EventError>() {
        Ok(EventError::Validation(reason)) => EventError::Validation(reason),
        Ok(other) => EventError::Middleware {
            stage: stage.to_string(),
            event,
            source: other.into(),
        },
        Err(err) => EventError::Middleware {
            stage: stage.to_string(),
            event,
            source: err.into(),
        },
    }
}
