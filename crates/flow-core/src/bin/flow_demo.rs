//! Flow router demo
//!
//! Registers the standard gameplay flows against in-memory features, plays a
//! few gameplay events and prints the resulting metrics.
//!
//! ```bash
//! RUST_LOG=debug cargo run -p flow-core --bin flow_demo
//! ```

use std::sync::Arc;
use std::time::Duration;

use event_core::{Event, EventBus, ListenerOptions, LoggingConfig, setup_logging};
use flow_core::{presets, EventFlowRouter, MemoryFeatureRegistry, MethodFeature};
use serde_json::{json, Value};
use tracing::{info, Level};

/// A feature whose methods just log what they receive.
fn logging_feature(name: &'static str, methods: &[&'static str]) -> MethodFeature<Value> {
    methods.iter().fold(MethodFeature::new(name), |feature, &method| {
        feature.method(method, move |payload: Value| async move {
            info!(feature = name, method, %payload, "feature called");
            Ok(())
        })
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logging(LoggingConfig::new(Level::INFO, "flow-demo"))?;

    let bus: EventBus = EventBus::builder().debug_logging(false).build();
    bus.set_error_handler(|err, event| {
        tracing::warn!(event = %event.name, error = %err, "bus error");
    });
    bus.on(
        "ui.*",
        |event: Arc<Event<Value>>| async move {
            info!(event = %event.name, source = %event.source, payload = %event.payload, "ui received");
            Ok(())
        },
        "ui",
        ListenerOptions::default(),
    );

    let features: Arc<MemoryFeatureRegistry> = Arc::new(MemoryFeatureRegistry::new());
    features.register(Arc::new(logging_feature("progression", &["award_experience"])));
    features.register(Arc::new(logging_feature("inventory", &["add_loot", "add_item", "add_items"])));
    features.register(Arc::new(logging_feature("campaign", &["track_kill", "unlock_content"])));
    features.register(Arc::new(logging_feature("skills", &["grant_points"])));
    features.register(Arc::new(logging_feature("ui", &[])));
    features.register(Arc::new(logging_feature("statistics", &[])));

    let router = EventFlowRouter::new(bus.clone(), features);
    let registered = presets::register_game_flows(&router)?;
    info!(registered, "flows ready");

    router
        .trigger(
            presets::ENEMY_KILLED,
            json!({"enemyType": "goblin", "experience": 15, "loot": ["rusty dagger"], "location": "cave"}),
            "combat",
        )
        .await?;
    router
        .trigger(presets::ITEM_CRAFTED, json!({"itemId": "iron_sword", "quantity": 1}), "crafting")
        .await?;
    router
        .trigger(
            presets::QUEST_COMPLETED,
            json!({"questId": "q-7", "questName": "Rat Problem", "rewards": {"experience": 120, "items": ["cheese"]}}),
            "campaign",
        )
        .await?;
    router
        .trigger(presets::LEVEL_UP, json!({"newLevel": 5, "skillPoints": 2}), "progression")
        .await?;

    // re-emitted events run on detached tasks
    tokio::time::sleep(Duration::from_millis(50)).await;

    println!("{}", serde_json::to_string_pretty(&bus.get_metrics())?);
    println!("{}", serde_json::to_string_pretty(&router.get_flow_metrics())?);
    println!("{}", serde_json::to_string_pretty(&bus.get_health_status())?);

    router.shutdown();
    bus.shutdown();
    Ok(())
}
