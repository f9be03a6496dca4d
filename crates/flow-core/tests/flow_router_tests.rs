//! Tests for EventFlowRouter
//!
//! These tests verify:
//! - Fan-out to feature methods with transformed payloads
//! - Enable/disable, source and data filters and their effect on metrics
//! - Missing features and methods are skipped, failures land in flow metrics
//! - Flow removal, duplicate ids and shutdown
//! - Re-emitted events carry the integration source

use std::sync::Arc;
use std::time::Duration;

use event_core::{EventBus, EventError};
use flow_core::{
    presets, EventFlow, EventFlowRouter, FlowError, FlowHandler, FlowTrigger, MemoryFeatureRegistry,
    MethodFeature, INTEGRATION_OWNER,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

type Calls = Arc<Mutex<Vec<(String, Value)>>>;

fn recording_feature(name: &'static str, methods: &[&'static str], calls: &Calls) -> Arc<MethodFeature<Value>> {
    let feature = methods.iter().fold(MethodFeature::new(name), |feature, &method| {
        let calls = Arc::clone(calls);
        feature.method(method, move |payload: Value| {
            calls.lock().push((format!("{name}.{method}"), payload));
            async { Ok(()) }
        })
    });
    Arc::new(feature)
}

struct Harness {
    bus: EventBus,
    router: EventFlowRouter,
    features: Arc<MemoryFeatureRegistry>,
    calls: Calls,
}

fn harness() -> Harness {
    let bus: EventBus = EventBus::builder().debug_logging(false).build();
    let calls: Calls = Arc::default();
    let features: Arc<MemoryFeatureRegistry> = Arc::new(MemoryFeatureRegistry::new());
    features.register(recording_feature("progression", &["award_experience"], &calls));
    features.register(recording_feature("inventory", &["add_loot", "add_item", "add_items"], &calls));
    features.register(recording_feature("campaign", &["track_kill", "unlock_content"], &calls));
    features.register(recording_feature("statistics", &[], &calls));

    let router = EventFlowRouter::new(bus.clone(), features.clone());
    Harness {
        bus,
        router,
        features,
        calls,
    }
}

fn kill_flow() -> EventFlow<Value> {
    EventFlow::new("kills", "Kill rewards", FlowTrigger::new("combat.enemy.killed"))
        .handler(
            FlowHandler::call_method("progression", "award_experience")
                .transform(|data: &Value| json!({ "amount": data["xp"] })),
        )
        .handler(
            FlowHandler::call_method("inventory", "add_loot")
                .transform(|data: &Value| json!({ "items": data["loot"] })),
        )
        .handler(
            FlowHandler::call_method("campaign", "track_kill")
                .transform(|data: &Value| json!({ "enemy": data["enemy"] })),
        )
}

fn sorted(calls: &Calls) -> Vec<(String, Value)> {
    let mut calls = calls.lock().clone();
    calls.sort_by(|a, b| a.0.cmp(&b.0));
    calls
}

#[tokio::test]
async fn test_three_handlers_three_invocations() {
    let h = harness();
    h.router.register_flow(kill_flow()).unwrap();

    h.router
        .trigger("combat.enemy.killed", json!({"xp": 25, "loot": ["fang"], "enemy": "wolf"}), "combat")
        .await
        .unwrap();

    assert_eq!(
        sorted(&h.calls),
        vec![
            ("campaign.track_kill".to_string(), json!({"enemy": "wolf"})),
            ("inventory.add_loot".to_string(), json!({"items": ["fang"]})),
            ("progression.award_experience".to_string(), json!({"amount": 25})),
        ]
    );

    let metrics = h.router.get_flow_metrics_by_id("kills").unwrap();
    assert_eq!(metrics.triggered_count, 1);
    assert_eq!(metrics.success_count, 1);
    assert_eq!(metrics.error_count, 0);
    assert!(metrics.last_triggered.is_some());
}

#[tokio::test]
async fn test_handlers_launch_by_priority() {
    let h = harness();
    let flow = EventFlow::new("ordered", "Ordered", FlowTrigger::new("tick"))
        .handler(FlowHandler::call_method("campaign", "track_kill").with_priority(1))
        .handler(FlowHandler::call_method("progression", "award_experience").with_priority(10))
        .handler(FlowHandler::call_method("inventory", "add_loot").with_priority(5));
    h.router.register_flow(flow).unwrap();

    h.router.trigger("tick", json!({}), "clock").await.unwrap();

    let order: Vec<String> = h.calls.lock().iter().map(|(name, _)| name.clone()).collect();
    assert_eq!(
        order,
        vec!["progression.award_experience", "inventory.add_loot", "campaign.track_kill"]
    );
}

#[tokio::test]
async fn test_disabled_flow_does_nothing() {
    let h = harness();
    h.router.register_flow(kill_flow()).unwrap();
    h.router.disable_flow("kills").unwrap();
    assert_eq!(h.router.is_enabled("kills"), Some(false));

    h.router.trigger("combat.enemy.killed", json!({"xp": 1}), "combat").await.unwrap();

    assert!(h.calls.lock().is_empty());
    let metrics = h.router.get_flow_metrics_by_id("kills").unwrap();
    assert_eq!(metrics.triggered_count, 0);
    assert_eq!(metrics.success_count, 0);

    // toggling never resubscribes
    assert_eq!(h.bus.listener_count("combat.enemy.killed"), 1);
    h.router.enable_flow("kills").unwrap();
    h.router.trigger("combat.enemy.killed", json!({"xp": 1}), "combat").await.unwrap();
    assert_eq!(h.calls.lock().len(), 3);
    assert_eq!(h.router.get_flow_metrics_by_id("kills").unwrap().triggered_count, 1);
}

#[tokio::test]
async fn test_flow_registered_disabled() {
    let h = harness();
    h.router.register_flow(kill_flow().enabled(false)).unwrap();
    h.router.trigger("combat.enemy.killed", json!({}), "combat").await.unwrap();
    assert!(h.calls.lock().is_empty());
    assert_eq!(h.router.get_flow("kills").map(|f| f.enabled), Some(false));
}

#[tokio::test]
async fn test_source_and_data_filters() {
    let h = harness();
    let flow = EventFlow::new(
        "boss-kills",
        "Boss kills",
        FlowTrigger::new("combat.enemy.killed")
            .from_sources(["combat"])
            .when(|data: &Value| data["boss"] == json!(true)),
    )
    .handler(FlowHandler::call_method("progression", "award_experience"));
    h.router.register_flow(flow).unwrap();

    h.router.trigger("combat.enemy.killed", json!({"boss": true}), "debug-console").await.unwrap();
    h.router.trigger("combat.enemy.killed", json!({"boss": false}), "combat").await.unwrap();
    assert!(h.calls.lock().is_empty());
    assert_eq!(h.router.get_flow_metrics_by_id("boss-kills").unwrap().triggered_count, 0);

    h.router.trigger("combat.enemy.killed", json!({"boss": true}), "combat").await.unwrap();
    assert_eq!(h.calls.lock().len(), 1);
    assert_eq!(h.router.get_flow_metrics_by_id("boss-kills").unwrap().triggered_count, 1);
}

#[tokio::test]
async fn test_handler_condition_skips_only_that_handler() {
    let h = harness();
    let flow = EventFlow::new("loot", "Loot", FlowTrigger::new("combat.enemy.killed"))
        .handler(FlowHandler::call_method("progression", "award_experience"))
        .handler(
            FlowHandler::call_method("inventory", "add_loot")
                .when(|data: &Value| data["loot"].as_array().is_some_and(|l| !l.is_empty())),
        );
    h.router.register_flow(flow).unwrap();

    h.router.trigger("combat.enemy.killed", json!({"loot": []}), "combat").await.unwrap();

    let calls = sorted(&h.calls);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "progression.award_experience");
    assert_eq!(h.router.get_flow_metrics_by_id("loot").unwrap().success_count, 1);
}

#[tokio::test]
async fn test_missing_feature_or_method_is_skipped() {
    let h = harness();
    let flow = EventFlow::new("partial", "Partial", FlowTrigger::new("crafting.item.crafted"))
        .handler(FlowHandler::call_method("blacksmith", "repair"))
        .handler(FlowHandler::call_method("inventory", "teleport"))
        .handler(FlowHandler::call_method("inventory", "add_item"));
    h.router.register_flow(flow).unwrap();

    h.router.trigger("crafting.item.crafted", json!({"itemId": "axe"}), "crafting").await.unwrap();

    assert_eq!(sorted(&h.calls), vec![("inventory.add_item".to_string(), json!({"itemId": "axe"}))]);
    let metrics = h.router.get_flow_metrics_by_id("partial").unwrap();
    assert_eq!(metrics.success_count, 1);
    assert_eq!(metrics.error_count, 0);
}

#[tokio::test]
async fn test_handler_failure_recorded_in_metrics() {
    let h = harness();
    h.features.register(Arc::new(MethodFeature::<Value>::new("broken").method(
        "explode",
        |_payload: Value| async { Err(anyhow::anyhow!("kaboom")) },
    )));
    let flow = EventFlow::new("fragile", "Fragile", FlowTrigger::new("combat.enemy.killed"))
        .handler(FlowHandler::call_method("broken", "explode"))
        .handler(FlowHandler::call_method("progression", "award_experience"));
    h.router.register_flow(flow).unwrap();

    let errors: Arc<Mutex<usize>> = Arc::default();
    let seen = Arc::clone(&errors);
    h.bus.set_error_handler(move |_err, _event| *seen.lock() += 1);

    // the publisher never sees flow failures
    h.router.trigger("combat.enemy.killed", json!({}), "combat").await.unwrap();

    assert_eq!(h.calls.lock().len(), 1);
    let metrics = h.router.get_flow_metrics_by_id("fragile").unwrap();
    assert_eq!(metrics.triggered_count, 1);
    assert_eq!(metrics.error_count, 1);
    assert_eq!(metrics.success_count, 0);
    let last_error = metrics.last_error.unwrap();
    assert!(last_error.contains("kaboom"), "{last_error}");
    assert!(last_error.contains("broken"), "{last_error}");
    assert_eq!(*errors.lock(), 0);
}

#[tokio::test]
async fn test_panicking_transform_is_isolated() {
    let h = harness();
    let flow = EventFlow::new("panicky", "Panicky", FlowTrigger::new("combat.enemy.killed"))
        .handler(FlowHandler::call_method("progression", "award_experience").transform(
            |_data: &Value| -> Value { panic!("bad transform") },
        ))
        .handler(FlowHandler::call_method("campaign", "track_kill"));
    h.router.register_flow(flow).unwrap();

    h.router.trigger("combat.enemy.killed", json!({}), "combat").await.unwrap();

    assert_eq!(sorted(&h.calls).len(), 1);
    let metrics = h.router.get_flow_metrics_by_id("panicky").unwrap();
    assert_eq!(metrics.error_count, 1);
    assert!(metrics.last_error.unwrap().contains("panicked"));
}

#[tokio::test]
async fn test_remove_flow_removes_exactly_its_subscription() {
    let h = harness();
    h.router.register_flow(kill_flow()).unwrap();
    let other = EventFlow::new("kill-stats", "Kill stats", FlowTrigger::new("combat.enemy.killed"))
        .handler(FlowHandler::call_method("campaign", "track_kill"));
    h.router.register_flow(other).unwrap();
    h.bus.on(
        "combat.enemy.killed",
        |_event: Arc<event_core::Event<Value>>| async { Ok(()) },
        "achievements",
        event_core::ListenerOptions::default(),
    );
    assert_eq!(h.bus.listener_count("combat.enemy.killed"), 3);

    h.router.remove_flow("kills").unwrap();

    assert_eq!(h.bus.listener_count("combat.enemy.killed"), 2);
    assert!(h.router.get_flow("kills").is_none());
    assert!(h.router.get_flow_metrics_by_id("kills").is_none());
    assert!(h.router.get_flow_metrics_by_id("kill-stats").is_some());

    h.router.trigger("combat.enemy.killed", json!({}), "combat").await.unwrap();
    assert_eq!(sorted(&h.calls), vec![("campaign.track_kill".to_string(), json!({}))]);

    assert!(matches!(h.router.remove_flow("kills"), Err(FlowError::FlowNotFound(_))));
}

#[tokio::test]
async fn test_duplicate_flow_id_rejected() {
    let h = harness();
    tokio_test::assert_ok!(h.router.register_flow(kill_flow()));
    let err = tokio_test::assert_err!(h.router.register_flow(kill_flow()));
    assert!(matches!(err, FlowError::DuplicateFlow(ref id) if id == "kills"));
    assert_eq!(h.bus.listener_count("combat.enemy.killed"), 1);
    assert_eq!(h.router.flow_count(), 1);
}

#[tokio::test]
async fn test_unknown_flow_operations_fail() {
    let h = harness();
    assert!(matches!(h.router.enable_flow("ghost"), Err(FlowError::FlowNotFound(_))));
    assert!(matches!(h.router.disable_flow("ghost"), Err(FlowError::FlowNotFound(_))));
    assert!(h.router.get_flow("ghost").is_none());
}

#[tokio::test]
async fn test_trigger_validation_error_surfaces() {
    let h = harness();
    let err = h.router.trigger("combat.enemy.killed", json!({}), "").await.unwrap_err();
    assert!(matches!(err, FlowError::Bus(EventError::Validation(_))));
}

#[tokio::test]
async fn test_target_event_reemitted_with_integration_source() {
    let h = harness();
    let flow = EventFlow::new("stats", "Stats", FlowTrigger::new("combat.enemy.killed")).handler(
        FlowHandler::emit_event("statistics", "statistics.enemy.defeated")
            .transform(|data: &Value| json!({ "enemy": data["enemy"] })),
    );
    h.router.register_flow(flow).unwrap();

    let waiter = {
        let bus = h.bus.clone();
        tokio::spawn(async move { bus.wait_for_event("statistics.enemy.defeated", Duration::from_secs(2)).await })
    };
    while h.bus.listener_count("statistics.enemy.defeated") == 0 {
        tokio::task::yield_now().await;
    }

    h.router.trigger("combat.enemy.killed", json!({"enemy": "troll"}), "combat").await.unwrap();

    let event = waiter.await.unwrap().unwrap();
    assert_eq!(event.source, INTEGRATION_OWNER);
    assert_eq!(event.payload, json!({"enemy": "troll"}));
    assert_eq!(event.meta("flowId"), Some(&json!("stats")));
}

#[tokio::test]
async fn test_list_flows_and_shutdown() {
    let h = harness();
    let registered = presets::register_game_flows(&h.router).unwrap();
    assert_eq!(registered, 4);

    let ids: Vec<String> = h.router.list_flows().into_iter().map(|f| f.id).collect();
    assert_eq!(
        ids,
        vec!["enemy-killed-rewards", "item-crafted", "player-level-up", "quest-completed"]
    );
    assert_eq!(h.router.get_flow_metrics().len(), 4);
    assert_eq!(h.bus.get_active_listeners()[presets::LEVEL_UP][0].owner, INTEGRATION_OWNER);

    h.router.shutdown();

    assert_eq!(h.router.flow_count(), 0);
    assert!(h.router.get_flow_metrics().is_empty());
    assert!(h.bus.get_active_listeners().is_empty());
}

#[tokio::test]
async fn test_enemy_killed_preset() {
    let h = harness();
    presets::register_game_flows(&h.router).unwrap();

    h.router
        .trigger(
            presets::ENEMY_KILLED,
            json!({"enemyType": "orc", "experience": 30, "loot": ["axe"], "location": "ruins"}),
            "combat",
        )
        .await
        .unwrap();

    assert_eq!(
        sorted(&h.calls),
        vec![
            ("campaign.track_kill".to_string(), json!({"enemyType": "orc", "location": "ruins"})),
            ("inventory.add_loot".to_string(), json!({"items": ["axe"], "source": "enemy_drop"})),
            (
                "progression.award_experience".to_string(),
                json!({"amount": 30, "reason": "enemy_killed", "enemyType": "orc"})
            ),
        ]
    );
    let metrics = h.router.get_flow_metrics_by_id("enemy-killed-rewards").unwrap();
    assert_eq!(metrics.success_count, 1);
}
