//! End-to-end turns outside combat.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dm_bridge::orchestrator::{SessionState, FAILURE_NARRATIVE};
use dm_bridge::store::StoreError;
use dm_bridge::testing::{assert_hp, assert_result, MockResponse, ScriptedDice, TestHarness};
use dm_bridge::world::create_sample_fighter;
use dm_bridge::{
    roll, Character, EngineConfig, EnemyTemplate, GameStore, MemoryCache, MemoryStore,
    MockNarrator, ResultType, SessionId, TurnOrchestrator, TurnRequest,
};

#[tokio::test]
async fn test_empty_action_requires_input() {
    let harness = TestHarness::new();

    let result = harness.input("   ").await;

    assert_result(&result, ResultType::RequiresInput);
    assert!(result.success);
    assert_eq!(harness.narrator.calls(), 0);
}

#[tokio::test]
async fn test_damage_and_healing_clamp() {
    let harness = TestHarness::new();
    harness
        .expect_narration("A loose stone tumbles from the ceiling. You take 5 bludgeoning damage.")
        .expect_narration("The ceiling gives way entirely. You take 50 bludgeoning damage.")
        .expect_narration("A warm light washes over you. You regain 20 hit points.");

    let result = harness.input("I walk under the arch").await;
    assert_result(&result, ResultType::Success);
    assert_eq!(result.state_changes.len(), 1);
    assert_hp(&harness, 7, 12);

    harness.input("I keep going").await;
    assert_hp(&harness, 0, 12);

    harness.input("I pray").await;
    assert_hp(&harness, 12, 12);
    assert_eq!(harness.session().map(|s| s.turn_count), Some(3));
}

#[tokio::test]
async fn test_dice_request_then_resume() {
    let harness = TestHarness::new();
    harness.expect_narration(
        "The ledge crumbles beneath you. Make a Dexterity saving throw (DC 13).",
    );

    let result = harness.input("I cross the ledge").await;
    assert_result(&result, ResultType::RequiresDice);
    assert!(result.needs_dice());
    assert_eq!(result.dice_required.len(), 1);
    assert_eq!(result.dice_required[0].skill.as_deref(), Some("Dexterity"));
    assert_eq!(result.dice_required[0].dc, Some(13));

    let session = harness.session().unwrap();
    assert!(session.pending.is_some());
    assert_eq!(session.turn_count, 0);

    let save = roll("1d20+2").unwrap();
    let resumed = harness.roll("", vec![save]).await;
    assert_ne!(resumed.result_type, ResultType::RequiresDice);
    assert!(resumed.success);
    assert_eq!(harness.narrator.calls(), 1);

    let session = harness.session().unwrap();
    assert!(session.pending.is_none());
    assert_eq!(session.turn_count, 1);
}

#[tokio::test]
async fn test_auto_roll_skips_the_pause() {
    let harness = TestHarness::build(
        create_sample_fighter("Test Hero"),
        EngineConfig::default().with_auto_roll_dice(true),
        ScriptedDice::new([17]),
    );
    harness.expect_narration("The door is stuck fast. Make a Strength check (DC 10).");

    let result = harness.input("I shoulder the door").await;

    assert_result(&result, ResultType::Success);
    assert!(result.dice_required.is_empty());
    assert!(harness.session().unwrap().pending.is_none());
}

#[tokio::test]
async fn test_narrator_failure_falls_back() {
    let harness = TestHarness::new();
    harness.expect_response(MockResponse::Fail("backend offline".to_string()));

    let result = harness.input("I search the room").await;

    assert_result(&result, ResultType::PartialSuccess);
    assert!(result.success);
    assert!(!result.narrative_text.is_empty());
    assert!(result.state_changes.is_empty());
    assert_hp(&harness, 12, 12);
}

#[tokio::test]
async fn test_narrator_timeout_falls_back() {
    let harness = TestHarness::build(
        create_sample_fighter("Test Hero"),
        EngineConfig::default().with_narration_timeout(Duration::from_millis(50)),
        ScriptedDice::default(),
    );
    harness.expect_response(MockResponse::Delayed(
        Duration::from_secs(5),
        "You take 5 fire damage.".to_string(),
    ));

    let result = harness.input("I open the chest").await;

    assert_result(&result, ResultType::PartialSuccess);
    assert_hp(&harness, 12, 12);
}

#[tokio::test]
async fn test_unknown_session_fails_cleanly() {
    let harness = TestHarness::new();

    let result = harness
        .orchestrator
        .process_turn(TurnRequest::new(SessionId::from("ghost"), "hello?"))
        .await;

    assert_result(&result, ResultType::Failure);
    assert!(!result.success);
    assert_eq!(result.narrative_text, FAILURE_NARRATIVE);
    assert_eq!(harness.narrator.calls(), 0);
}

#[tokio::test]
async fn test_story_and_objectives() {
    let harness = TestHarness::new();
    harness.expect_narration(
        "You find a hidden map behind the painting.\nSTORY:\nnew_objective: Reach the ruined tower",
    );

    let result = harness.input("I look behind the painting").await;

    assert_result(&result, ResultType::StoryAdvanced);
    assert!(result
        .next_actions
        .contains(&"Pursue your objective: Reach the ruined tower".to_string()));

    let session = harness.session().unwrap();
    assert_eq!(session.objectives, vec!["Reach the ruined tower"]);
    assert_eq!(session.story_history.len(), 2);

    harness.expect_narration("The wind picks up.");
    harness.input("I head for the tower").await;
    let request = harness.narrator.last_request().unwrap();
    assert!(request.context.contains("Objectives: Reach the ruined tower"));
    assert_eq!(request.recent_story.len(), 2);
}

#[tokio::test]
async fn test_turns_on_one_session_serialize() {
    let harness = TestHarness::new();
    for _ in 0..2 {
        harness.expect_response(MockResponse::Delayed(
            Duration::from_millis(30),
            "You take 1 cold damage.".to_string(),
        ));
    }

    let (first, second) = tokio::join!(harness.input("I wait"), harness.input("I wait again"));

    assert!(first.success && second.success);
    assert_eq!(harness.session().map(|s| s.turn_count), Some(2));
    assert_hp(&harness, 10, 12);
}

#[tokio::test]
async fn test_huge_healing_is_clamped() {
    let harness = TestHarness::new();
    harness
        .expect_narration("You take 5 fire damage.")
        .expect_narration("A miracle! You regain 2147483647 hit points.");

    harness.input("I touch the brazier").await;
    assert_hp(&harness, 7, 12);

    let result = harness.input("I pray to the old gods").await;
    assert_result(&result, ResultType::Success);
    assert_hp(&harness, 12, 12);
}

#[tokio::test]
async fn test_huge_armor_class_is_clamped() {
    let harness = TestHarness::new();
    harness.expect_narration("STATE_CHANGES:\nplayer.armor_class: 0 -> 2147483647");

    let result = harness.input("I don the enchanted plate").await;

    assert!(result.success, "{:?}", result.errors);
    assert_ne!(result.result_type, ResultType::Failure);
    assert_eq!(harness.character().unwrap().armor_class, i32::MAX);
}

#[tokio::test]
async fn test_out_of_range_dice_do_not_abort_the_turn() {
    let harness = TestHarness::build(
        create_sample_fighter("Test Hero"),
        EngineConfig::default().with_auto_roll_dice(true),
        ScriptedDice::default(),
    );
    harness.expect_narration("DICE_ROLLS:\nstrength check: 1d20+2147483647");

    let result = harness.input("I lift the portcullis").await;

    assert!(result.success, "{:?}", result.errors);
    assert_ne!(result.result_type, ResultType::Failure);
}

/// Memory store whose session writes always fail.
struct FailingSessionStore(MemoryStore);

#[async_trait]
impl GameStore for FailingSessionStore {
    async fn load_character(&self, session_id: &SessionId) -> Result<Option<Character>, StoreError> {
        self.0.load_character(session_id).await
    }

    async fn save_character(
        &self,
        session_id: &SessionId,
        character: &Character,
    ) -> Result<(), StoreError> {
        self.0.save_character(session_id, character).await
    }

    async fn load_session(&self, session_id: &SessionId) -> Result<Option<SessionState>, StoreError> {
        self.0.load_session(session_id).await
    }

    async fn save_session(&self, _state: &SessionState) -> Result<(), StoreError> {
        Err(StoreError::Backend("disk full".to_string()))
    }

    async fn find_enemy_template(&self, name: &str) -> Result<Option<EnemyTemplate>, StoreError> {
        self.0.find_enemy_template(name).await
    }
}

#[tokio::test]
async fn test_failed_save_leaves_character_untouched() {
    let session_id = SessionId::from("fragile");
    let store = Arc::new(FailingSessionStore(
        MemoryStore::new().with_character(session_id.clone(), create_sample_fighter("Test Hero")),
    ));
    let narrator = Arc::new(MockNarrator::new(vec![MockResponse::text(
        "A trap springs. You take 5 piercing damage.",
    )]));
    let orchestrator = TurnOrchestrator::new(
        EngineConfig::default(),
        narrator.clone(),
        Arc::new(MemoryCache::new()),
        store.clone(),
    );

    let result = orchestrator
        .process_turn(TurnRequest::new(session_id.clone(), "I open the chest"))
        .await;

    assert_result(&result, ResultType::Failure);
    assert_eq!(narrator.calls(), 1);
    let stored = store.0.character(&session_id).unwrap();
    assert_eq!(stored.hit_points.current, 12);
    assert!(store.0.session(&session_id).is_none());
}
