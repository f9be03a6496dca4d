/*!
Event Core

In-process event bus that lets independently developed feature modules talk
to each other without holding references to one another. It includes:

- An explicitly constructed, cloneable [`EventBus`] with priority-ordered
  listeners, `once` subscriptions and wildcard patterns
- A middleware pipeline that can enrich or reject events before dispatch
- Failure isolation: a broken listener never affects its siblings
- Fire-and-forget publication on detached tasks
- Metrics, a bounded event log and health reporting
- Configuration loading and logging setup

```rust,no_run
use std::sync::Arc;
use event_core::{Event, EventBus, ListenerOptions};
use serde_json::{json, Value};

# async fn demo() -> event_core::Result<()> {
let bus: EventBus = EventBus::new();
bus.on(
    "inventory.item.added",
    |event: Arc<Event<Value>>| async move {
        println!("added {}", event.payload["item"]);
        Ok(())
    },
    "ui",
    ListenerOptions::priority(10),
);
bus.emit("inventory.item.added", json!({"item": "sword"}), "inventory", None).await?;
# Ok(())
# }
```
*/

pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod health;
pub mod listener;
pub mod logging;
pub mod metrics;
pub mod middleware;

pub use bus::{
    is_wildcard, pattern_matches, ErrorHandler, EventBus, EventBusBuilder, WeakEventBus,
    DEFAULT_WAIT_TIMEOUT, WAIT_FOR_EVENT_OWNER,
};
pub use config::EventBusConfig;
pub use error::{EventError, Result};
pub use event::{Event, EventId, Metadata, NamedEvent, Payload};
pub use health::{HealthReport, HealthStatus};
pub use listener::{EventListener, FnListener, ListenerInfo, ListenerOptions, SubscriptionId};
pub use logging::{parse_log_level, setup_logging, LogFormat, LoggingConfig};
pub use metrics::{BusMetrics, EventPerformance, MetricsCollector};
pub use middleware::{
    Middleware, MiddlewareFn, MiddlewarePipeline, PerformanceMiddleware, ValidationMiddleware,
};
