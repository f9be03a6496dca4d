/*!
Flow Core

Declarative routing between gameplay feature modules, built on top of the
[`event_core`] bus:

- [`EventFlow`] maps a trigger event to a list of handler actions
- [`EventFlowRouter`] installs one bus subscription per flow and fans each
  trigger out to feature methods or follow-up events
- [`FeatureRegistry`] resolves the target features by name
- Per-flow metrics: trigger, success and error counts plus mean duration

```rust,no_run
use std::sync::Arc;
use event_core::EventBus;
use flow_core::{presets, EventFlowRouter, MemoryFeatureRegistry, MethodFeature};
use serde_json::{json, Value};

# async fn demo() -> flow_core::Result<()> {
let bus: EventBus = EventBus::new();
let features: Arc<MemoryFeatureRegistry> = Arc::new(MemoryFeatureRegistry::new());
features.register(Arc::new(MethodFeature::<Value>::new("progression").method(
    "award_experience",
    |payload: Value| async move {
        println!("+{} xp", payload["amount"]);
        Ok(())
    },
)));

let router = EventFlowRouter::new(bus.clone(), features);
presets::register_game_flows(&router)?;
router
    .trigger(presets::ENEMY_KILLED, json!({"enemyType": "orc", "experience": 25}), "combat")
    .await?;
# Ok(())
# }
```
*/

pub mod error;
pub mod flow;
pub mod metrics;
pub mod presets;
pub mod registry;
pub mod router;

pub use error::{FlowError, Result};
pub use flow::{
    DataFilter, DataTransform, EventFlow, FlowAction, FlowHandler, FlowInfo, FlowTrigger,
    HandlerInfo,
};
pub use metrics::{FlowMetrics, FlowMetricsTracker};
pub use registry::{Feature, FeatureRegistry, MemoryFeatureRegistry, MethodFeature};
pub use router::{EventFlowRouter, INTEGRATION_OWNER};
