//! Testing utilities for the bridge.
//!
//! This module provides tools for deterministic tests:
//! - `ScriptedDice` for fixed die faces
//! - `MockNarrator` for scripted narration without API calls
//! - `TestHarness` for running turns against in-memory collaborators
//! - Assertion helpers for verifying turn results and character state

use crate::cache::MemoryCache;
use crate::config::EngineConfig;
use crate::dice::{DiceRollResult, DiceSource};
use crate::narration::{Narration, NarrationError, NarrationRequest, NarrationService};
use crate::orchestrator::{
    OrchestrationResult, ResultType, SessionState, TurnOrchestrator, TurnRequest,
};
use crate::store::MemoryStore;
use crate::world::{create_sample_fighter, Character, EnemyTemplate, SessionId};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Dice that return scripted faces in order.
///
/// Faces are clamped to the die's range. Once the script runs out every roll
/// is a 1.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDice {
    faces: VecDeque<u32>,
}

impl ScriptedDice {
    pub fn new(faces: impl IntoIterator<Item = u32>) -> Self {
        Self {
            faces: faces.into_iter().collect(),
        }
    }

    /// Faces not yet rolled.
    pub fn remaining(&self) -> usize {
        self.faces.len()
    }
}

impl DiceSource for ScriptedDice {
    fn roll_die(&mut self, sides: u32) -> u32 {
        self.faces.pop_front().unwrap_or(1).clamp(1, sides.max(1))
    }
}

/// A scripted narration from the mock narrator.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Narrate this text.
    Text(String),
    /// Fail as an unreachable backend would.
    Fail(String),
    /// Narrate after a delay, for timeout tests.
    Delayed(Duration, String),
}

impl MockResponse {
    pub fn text(text: impl Into<String>) -> Self {
        MockResponse::Text(text.into())
    }
}

/// A narrator that returns scripted responses in order.
///
/// Use this for deterministic tests without API calls.
#[derive(Debug, Default)]
pub struct MockNarrator {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<NarrationRequest>>,
    calls: AtomicUsize,
}

impl MockNarrator {
    pub const MODEL: &'static str = "mock";

    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    /// Add a response to the queue.
    pub fn queue(&self, response: MockResponse) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(response);
        }
    }

    /// Number of `generate` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The most recent request, if any.
    pub fn last_request(&self) -> Option<NarrationRequest> {
        self.requests.lock().ok()?.last().cloned()
    }
}

#[async_trait]
impl NarrationService for MockNarrator {
    async fn generate(&self, request: &NarrationRequest) -> Result<Narration, NarrationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut responses| responses.pop_front());

        match next {
            Some(MockResponse::Text(text)) => Ok(Narration::new(text, Self::MODEL)),
            Some(MockResponse::Fail(reason)) => Err(NarrationError::Unavailable(reason)),
            Some(MockResponse::Delayed(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(Narration::new(text, Self::MODEL))
            }
            None => Ok(Narration::new(
                "The DM has no more scripted responses.",
                Self::MODEL,
            )),
        }
    }
}

/// Test harness for running turns against in-memory collaborators.
pub struct TestHarness {
    pub orchestrator: Arc<TurnOrchestrator>,
    pub narrator: Arc<MockNarrator>,
    pub store: Arc<MemoryStore>,
    pub cache: Arc<MemoryCache>,
    pub session_id: SessionId,
}

impl TestHarness {
    pub const SESSION: &'static str = "test-session";

    /// A harness with a sample fighter, the goblin template and dice that
    /// always roll 1.
    pub fn new() -> Self {
        Self::build(
            create_sample_fighter("Test Hero"),
            EngineConfig::default(),
            ScriptedDice::default(),
        )
    }

    pub fn with_character(character: Character) -> Self {
        Self::build(character, EngineConfig::default(), ScriptedDice::default())
    }

    pub fn build(character: Character, config: EngineConfig, dice: ScriptedDice) -> Self {
        let session_id = SessionId::from(Self::SESSION);
        let narrator = Arc::new(MockNarrator::default());
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(
            MemoryStore::new()
                .with_character(session_id.clone(), character)
                .with_enemy_template(EnemyTemplate::goblin()),
        );
        let orchestrator = TurnOrchestrator::new(
            config,
            narrator.clone(),
            cache.clone(),
            store.clone(),
        )
        .with_dice(dice);

        Self {
            orchestrator: Arc::new(orchestrator),
            narrator,
            store,
            cache,
            session_id,
        }
    }

    /// Queue a narration.
    pub fn expect_narration(&self, text: impl Into<String>) -> &Self {
        self.narrator.queue(MockResponse::text(text));
        self
    }

    pub fn expect_response(&self, response: MockResponse) -> &Self {
        self.narrator.queue(response);
        self
    }

    /// Run a turn for the player.
    pub async fn input(&self, action: &str) -> OrchestrationResult {
        self.orchestrator
            .process_turn(TurnRequest::new(self.session_id.clone(), action))
            .await
    }

    /// Answer a pending dice request.
    pub async fn roll(&self, action: &str, dice: Vec<DiceRollResult>) -> OrchestrationResult {
        self.orchestrator
            .process_turn(TurnRequest::new(self.session_id.clone(), action).with_dice_results(dice))
            .await
    }

    /// The stored character.
    pub fn character(&self) -> Option<Character> {
        self.store.character(&self.session_id)
    }

    /// The stored session.
    pub fn session(&self) -> Option<SessionState> {
        self.store.session(&self.session_id)
    }

    /// Current player HP as (current, max).
    pub fn player_hp(&self) -> (i32, i32) {
        self.character()
            .map(|c| (c.hit_points.current, c.hit_points.maximum))
            .unwrap_or_default()
    }

    pub fn in_combat(&self) -> bool {
        self.session().is_some_and(|s| s.in_combat())
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert a turn ended with the expected result type.
#[track_caller]
pub fn assert_result(result: &OrchestrationResult, expected: ResultType) {
    assert_eq!(
        result.result_type, expected,
        "Expected {expected}, got {} (errors: {:?})",
        result.result_type, result.errors
    );
}

/// Assert player HP is at expected values.
#[track_caller]
pub fn assert_hp(harness: &TestHarness, current: i32, max: i32) {
    let (actual_current, actual_max) = harness.player_hp();
    assert_eq!(
        (actual_current, actual_max),
        (current, max),
        "Expected HP {current}/{max}, got {actual_current}/{actual_max}"
    );
}

#[track_caller]
pub fn assert_in_combat(harness: &TestHarness) {
    assert!(harness.in_combat(), "Expected to be in combat");
}

#[track_caller]
pub fn assert_not_in_combat(harness: &TestHarness) {
    assert!(!harness.in_combat(), "Expected to NOT be in combat");
}
