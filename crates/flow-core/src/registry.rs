//! Feature lookup used by the flow router.
//!
//! Features are independently developed modules the router treats as black
//! boxes: it only asks whether a feature exists, whether it exposes a method,
//! and calls that method with a payload.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use event_core::Payload;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tracing::debug;

/// A module the router can call into.
#[async_trait]
pub trait Feature<P: Payload = Value>: Send + Sync {
    fn name(&self) -> &str;

    fn has_method(&self, method: &str) -> bool;

    async fn call(&self, method: &str, payload: P) -> anyhow::Result<()>;
}

/// Resolves features by name.
pub trait FeatureRegistry<P: Payload = Value>: Send + Sync {
    fn has_feature(&self, name: &str) -> bool;

    fn get_feature(&self, name: &str) -> Option<Arc<dyn Feature<P>>>;
}

/// In-memory registry backed by a concurrent map.
pub struct MemoryFeatureRegistry<P: Payload = Value> {
    features: DashMap<String, Arc<dyn Feature<P>>>,
}

impl<P: Payload> Default for MemoryFeatureRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Payload> MemoryFeatureRegistry<P> {
    pub fn new() -> Self {
        MemoryFeatureRegistry {
            features: DashMap::new(),
        }
    }

    /// Register a feature under its own name, replacing any previous one.
    pub fn register(&self, feature: Arc<dyn Feature<P>>) -> Option<Arc<dyn Feature<P>>> {
        let name = feature.name().to_string();
        debug!(feature = %name, "registering feature");
        self.features.insert(name, feature)
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.features.remove(name).is_some()
    }

    /// Registered feature names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.features.iter().map(|f| f.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl<P: Payload> FeatureRegistry<P> for MemoryFeatureRegistry<P> {
    fn has_feature(&self, name: &str) -> bool {
        self.features.contains_key(name)
    }

    fn get_feature(&self, name: &str) -> Option<Arc<dyn Feature<P>>> {
        self.features.get(name).map(|f| Arc::clone(f.value()))
    }
}

type MethodFn<P> = Arc<dyn Fn(P) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A feature assembled from named async closures.
pub struct MethodFeature<P: Payload = Value> {
    name: String,
    methods: HashMap<String, MethodFn<P>>,
}

impl<P: Payload> fmt::Debug for MethodFeature<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<&String> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("MethodFeature")
            .field("name", &self.name)
            .field("methods", &methods)
            .finish()
    }
}

impl<P: Payload> MethodFeature<P> {
    pub fn new(name: impl Into<String>) -> Self {
        MethodFeature {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    pub fn method<F, Fut>(mut self, method: impl Into<String>, f: F) -> Self
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.methods
            .insert(method.into(), Arc::new(move |payload: P| f(payload).boxed()));
        self
    }
}

#[async_trait]
impl<P: Payload> Feature<P> for MethodFeature<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    async fn call(&self, method: &str, payload: P) -> anyhow::Result<()> {
        let Some(f) = self.methods.get(method).cloned() else {
            anyhow::bail!("feature '{}' has no method '{}'", self.name, method);
        };
        f(payload).await
    }
}
