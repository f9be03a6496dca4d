//! Standard gameplay integrations.
//!
//! | flow id                | trigger                    | handlers                                              |
//! |------------------------|----------------------------|-------------------------------------------------------|
//! | `enemy-killed-rewards` | `combat.enemy.killed`      | progression XP, inventory loot, campaign kill, stats   |
//! | `item-crafted`         | `crafting.item.crafted`    | inventory add, progression XP, achievements progress   |
//! | `quest-completed`      | `campaign.quest.completed` | progression XP, inventory rewards, ui notification     |
//! | `player-level-up`      | `progression.level.up`     | skills points, ui notification, campaign unlocks       |

use serde_json::{json, Value};

use crate::error::Result;
use crate::flow::{EventFlow, FlowHandler, FlowTrigger};
use crate::router::EventFlowRouter;

pub const ENEMY_KILLED: &str = "combat.enemy.killed";
pub const ITEM_CRAFTED: &str = "crafting.item.crafted";
pub const QUEST_COMPLETED: &str = "campaign.quest.completed";
pub const LEVEL_UP: &str = "progression.level.up";

/// Experience granted when a payload does not carry its own amount.
const DEFAULT_KILL_EXPERIENCE: i64 = 10;
const DEFAULT_CRAFT_EXPERIENCE: i64 = 5;

fn int_or(data: &Value, key: &str, default: i64) -> i64 {
    data.get(key).and_then(Value::as_i64).unwrap_or(default)
}

fn non_empty_array(value: &Value) -> bool {
    value.as_array().is_some_and(|items| !items.is_empty())
}

pub fn enemy_killed_flow() -> EventFlow<Value> {
    EventFlow::new("enemy-killed-rewards", "Enemy kill rewards", FlowTrigger::new(ENEMY_KILLED))
        .describe("Award experience and loot and track kills for quests")
        .handler(
            FlowHandler::call_method("progression", "award_experience")
                .transform(|data: &Value| {
                    json!({
                        "amount": int_or(data, "experience", DEFAULT_KILL_EXPERIENCE),
                        "reason": "enemy_killed",
                        "enemyType": data["enemyType"],
                    })
                })
                .with_priority(10),
        )
        .handler(
            FlowHandler::call_method("inventory", "add_loot")
                .when(|data: &Value| non_empty_array(&data["loot"]))
                .transform(|data: &Value| json!({ "items": data["loot"], "source": "enemy_drop" })),
        )
        .handler(FlowHandler::call_method("campaign", "track_kill").transform(|data: &Value| {
            json!({ "enemyType": data["enemyType"], "location": data["location"] })
        }))
        .handler(
            FlowHandler::emit_event("statistics", "statistics.enemy.defeated")
                .with_priority(-10),
        )
}

pub fn item_crafted_flow() -> EventFlow<Value> {
    EventFlow::new("item-crafted", "Crafted item delivery", FlowTrigger::new(ITEM_CRAFTED))
        .describe("Deliver crafted items and grant crafting experience")
        .handler(
            FlowHandler::call_method("inventory", "add_item")
                .transform(|data: &Value| {
                    json!({
                        "itemId": data["itemId"],
                        "quantity": int_or(data, "quantity", 1),
                    })
                })
                .with_priority(10),
        )
        .handler(FlowHandler::call_method("progression", "award_experience").transform(
            |data: &Value| {
                json!({
                    "amount": int_or(data, "experience", DEFAULT_CRAFT_EXPERIENCE),
                    "reason": "item_crafted",
                })
            },
        ))
        .handler(
            FlowHandler::emit_event("achievements", "achievements.progress").transform(
                |data: &Value| json!({ "achievement": "master_crafter", "itemId": data["itemId"] }),
            ),
        )
}

pub fn quest_completed_flow() -> EventFlow<Value> {
    EventFlow::new("quest-completed", "Quest completion rewards", FlowTrigger::new(QUEST_COMPLETED))
        .describe("Grant quest rewards and notify the player")
        .handler(
            FlowHandler::call_method("progression", "award_experience")
                .when(|data: &Value| data["rewards"]["experience"].is_i64())
                .transform(|data: &Value| {
                    json!({
                        "amount": data["rewards"]["experience"],
                        "reason": "quest_completed",
                        "questId": data["questId"],
                    })
                }),
        )
        .handler(
            FlowHandler::call_method("inventory", "add_items")
                .when(|data: &Value| non_empty_array(&data["rewards"]["items"]))
                .transform(|data: &Value| json!({ "items": data["rewards"]["items"] })),
        )
        .handler(
            FlowHandler::emit_event("ui", "ui.notification.show").transform(|data: &Value| {
                json!({
                    "kind": "quest_completed",
                    "title": data["questName"],
                })
            }),
        )
}

pub fn level_up_flow() -> EventFlow<Value> {
    EventFlow::new("player-level-up", "Level up unlocks", FlowTrigger::new(LEVEL_UP))
        .describe("Grant skill points, notify the player and unlock content")
        .handler(FlowHandler::call_method("skills", "grant_points").transform(|data: &Value| {
            json!({ "points": int_or(data, "skillPoints", 1), "level": data["newLevel"] })
        }))
        .handler(
            FlowHandler::emit_event("ui", "ui.notification.show").transform(|data: &Value| {
                json!({ "kind": "level_up", "level": data["newLevel"] })
            }),
        )
        .handler(
            FlowHandler::call_method("campaign", "unlock_content")
                .when(|data: &Value| data["newLevel"].as_i64().is_some_and(|level| level % 5 == 0))
                .transform(|data: &Value| json!({ "level": data["newLevel"] })),
        )
}

/// Every standard gameplay flow.
pub fn game_flows() -> Vec<EventFlow<Value>> {
    vec![
        enemy_killed_flow(),
        item_crafted_flow(),
        quest_completed_flow(),
        level_up_flow(),
    ]
}

/// Register [`game_flows`] on `router`, returning how many were installed.
pub fn register_game_flows(router: &EventFlowRouter<Value>) -> Result<usize> {
    router.register_flows(game_flows())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_flows_are_valid_and_unique() {
        let flows = game_flows();
        let mut ids: Vec<&str> = flows.iter().map(|f| f.id.as_str()).collect();
        for flow in &flows {
            flow.validate().unwrap();
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), flows.len());
    }

    #[test]
    fn test_kill_experience_defaults() {
        let flow = enemy_killed_flow();
        let award = &flow.handlers[0];
        assert_eq!(award.prepare(&json!({"enemyType": "orc"}))["amount"], json!(10));
        assert_eq!(award.prepare(&json!({"experience": 40}))["amount"], json!(40));
    }

    #[test]
    fn test_loot_handler_requires_items() {
        let flow = enemy_killed_flow();
        let loot = &flow.handlers[1];
        assert!(!loot.applies(&json!({"loot": []})));
        assert!(loot.applies(&json!({"loot": ["bone"]})));
    }
}
