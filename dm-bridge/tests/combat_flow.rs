//! End-to-end combat through the orchestrator.

use dm_bridge::combat::CombatState;
use dm_bridge::testing::{
    assert_hp, assert_in_combat, assert_not_in_combat, assert_result, TestHarness,
};
use dm_bridge::ResultType;

const AMBUSH: &str = "A goblin lunges at you from the bushes! Roll for initiative!";

async fn start_fight(harness: &TestHarness) {
    harness.expect_narration(AMBUSH);
    let result = harness.input("I walk down the forest path").await;
    assert_result(&result, ResultType::CombatInitiated);
}

#[tokio::test]
async fn test_ambush_starts_combat() {
    let harness = TestHarness::new();
    assert_not_in_combat(&harness);

    harness.expect_narration(AMBUSH);
    let result = harness.input("I walk down the forest path").await;

    assert_result(&result, ResultType::CombatInitiated);
    assert_eq!(result.combat_state, Some(CombatState::InProgress));
    assert_in_combat(&harness);

    let session = harness.session().unwrap();
    let encounter = session.encounter.unwrap();
    assert_eq!(encounter.participants.len(), 2);
    let goblin = encounter.find_by_name("goblin").unwrap();
    assert_eq!(goblin.name, "Goblin");
    assert_eq!(goblin.max_hp, 7);
    assert_eq!(goblin.armor_class, 15);
    assert_eq!(encounter.initiative_order.len(), 2);
    assert!(!encounter.log().is_empty());

    // Equal rolls and DEX: the hero was added first and acts first.
    assert_eq!(encounter.current_participant().unwrap().name, "Test Hero");
    assert!(result.next_actions.contains(&"Attack the Goblin".to_string()));
}

#[tokio::test]
async fn test_second_ambush_does_not_restart_combat() {
    let harness = TestHarness::new();
    start_fight(&harness).await;
    let encounter_id = harness.session().unwrap().encounter.unwrap().id;

    harness.expect_narration("Combat begins anew as the goblin circles you.");
    let result = harness.input("I hold my ground").await;

    assert_ne!(result.result_type, ResultType::CombatInitiated);
    assert_eq!(harness.session().unwrap().encounter.unwrap().id, encounter_id);
}

#[tokio::test]
async fn test_turn_advances_and_status_applies() {
    let harness = TestHarness::new();
    start_fight(&harness).await;

    harness.expect_narration("You feint left. The goblin is now poisoned for 3 rounds.");
    let result = harness.input("I throw a vial at it").await;
    assert!(result.success);

    let encounter = harness.session().unwrap().encounter.unwrap();
    assert_eq!(encounter.current_participant().unwrap().name, "Goblin");
    assert!(encounter.find_by_name("goblin").unwrap().has_condition("poisoned"));
    assert!(result.next_actions.contains(&"Wait for Goblin to act".to_string()));
}

#[tokio::test]
async fn test_victory_awards_xp_and_loot() {
    let harness = TestHarness::new();
    start_fight(&harness).await;

    harness.expect_narration("Your blade finds its mark. The goblin takes 9 slashing damage.");
    let result = harness.input("I attack the goblin").await;

    assert!(result.success);
    assert_eq!(result.combat_state, Some(CombatState::Victory));
    assert!(result.narrative_text.contains("Victory! You earn 50 XP."));
    assert_not_in_combat(&harness);

    let encounter = harness.session().unwrap().encounter.unwrap();
    let rewards = encounter.rewards.unwrap();
    assert_eq!(rewards.xp, 50);
    // Scripted dice roll 1 on every percentile check.
    assert_eq!(rewards.loot, vec!["Scimitar", "Pouch of copper"]);
    assert_eq!(harness.character().unwrap().experience, 50);
}

#[tokio::test]
async fn test_defeat_when_hero_falls() {
    let harness = TestHarness::new();
    start_fight(&harness).await;

    harness.expect_narration("The goblin slashes you. You take 20 slashing damage.");
    let result = harness.input("I stumble").await;

    assert_eq!(result.combat_state, Some(CombatState::Defeat));
    assert!(result.narrative_text.ends_with("You have fallen."));
    assert_hp(&harness, 0, 12);
    assert_eq!(harness.character().unwrap().experience, 0);
}

#[tokio::test]
async fn test_enemy_damage_outside_combat_is_ignored() {
    let harness = TestHarness::new();
    harness.expect_narration("Far below, the goblin loses 8 hit points in a rockslide.");

    let result = harness.input("I watch from the cliff").await;

    assert_result(&result, ResultType::Success);
    assert!(result.state_changes.is_empty());
    assert!(result.errors.is_empty());
    assert_not_in_combat(&harness);
}
