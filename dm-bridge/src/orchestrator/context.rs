//! Session context: what a turn reads before narration and writes back after.

use super::OrchestratorError;
use crate::cache::{self, GameCache, TtlClass};
use crate::combat::{CombatEncounter, CombatState};
use crate::parser::{DiceRequirement, ParseContext, StoryEvent};
use crate::store::GameStore;
use crate::world::{Character, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// A narration held back until the player supplies dice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTurn {
    pub player_action: String,
    pub narration: String,
    pub dice_required: Vec<DiceRequirement>,
}

/// Everything about a session except the character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: SessionId,
    /// Bounded ring of story beats, oldest first.
    pub story_history: VecDeque<StoryEvent>,
    pub objectives: Vec<String>,
    pub completed_objectives: Vec<String>,
    pub turn_count: u32,
    pub last_turn_at: Option<DateTime<Utc>>,
    pub encounter: Option<CombatEncounter>,
    pub pending: Option<PendingTurn>,
}

impl SessionState {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            story_history: VecDeque::new(),
            objectives: Vec::new(),
            completed_objectives: Vec::new(),
            turn_count: 0,
            last_turn_at: None,
            encounter: None,
            pending: None,
        }
    }

    /// Append a story beat, dropping the oldest beyond `limit`.
    pub fn push_story(&mut self, event: StoryEvent, limit: usize) {
        self.story_history.push_back(event);
        while self.story_history.len() > limit.max(1) {
            self.story_history.pop_front();
        }
    }

    /// Track objective updates carried by a story event.
    pub fn track_objectives(&mut self, event: &StoryEvent) {
        if let Some(objective) = &event.new_objective {
            let known = self
                .objectives
                .iter()
                .any(|o| o.eq_ignore_ascii_case(objective));
            if !known {
                self.objectives.push(objective.clone());
            }
        }
        if let Some(done) = &event.completed_objective {
            self.objectives.retain(|o| !o.eq_ignore_ascii_case(done));
            if !self
                .completed_objectives
                .iter()
                .any(|o| o.eq_ignore_ascii_case(done))
            {
                self.completed_objectives.push(done.clone());
            }
        }
    }

    /// Descriptions of the last `count` story beats, oldest first.
    pub fn recent_story(&self, count: usize) -> Vec<String> {
        let skip = self.story_history.len().saturating_sub(count);
        self.story_history
            .iter()
            .skip(skip)
            .map(|e| e.description.clone())
            .collect()
    }

    /// The encounter, if one is running.
    pub fn active_encounter(&self) -> Option<&CombatEncounter> {
        self.encounter.as_ref().filter(|e| !e.state.is_terminal())
    }

    pub fn active_encounter_mut(&mut self) -> Option<&mut CombatEncounter> {
        self.encounter.as_mut().filter(|e| !e.state.is_terminal())
    }

    pub fn in_combat(&self) -> bool {
        self.active_encounter()
            .is_some_and(|e| e.state == CombatState::InProgress)
    }
}

/// Working copy of a session for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnContext {
    pub character: Character,
    pub session: SessionState,
}

impl TurnContext {
    /// Hints for subject resolution in the narration.
    pub fn parse_context(&self) -> ParseContext {
        let enemies = self
            .session
            .active_encounter()
            .map(|e| {
                e.participants
                    .iter()
                    .filter(|p| p.is_enemy())
                    .map(|p| p.name.clone())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        ParseContext::for_character(self.character.name.clone(), self.character.id.to_string())
            .with_enemies(enemies)
    }

    /// Plain-text state for the narrator.
    pub fn render(&self) -> String {
        let c = &self.character;
        let mut lines = vec![
            format!(
                "{} (level {}): {}/{} HP, AC {}",
                c.name, c.level, c.hit_points.current, c.hit_points.maximum, c.armor_class
            ),
            format!("Location: {}", c.location),
        ];
        if !c.conditions.is_empty() {
            lines.push(format!("Conditions: {}", c.conditions.join(", ")));
        }
        if !self.session.objectives.is_empty() {
            lines.push(format!("Objectives: {}", self.session.objectives.join("; ")));
        }
        if let Some(encounter) = self.session.active_encounter() {
            lines.push(encounter.ai_summary());
        }
        lines.join("\n")
    }
}

/// Load a session's context, cache first, store on a miss.
///
/// Cache failures are logged and treated as misses.
pub async fn load(
    cache: &dyn GameCache,
    store: &dyn GameStore,
    session_id: &SessionId,
) -> Result<TurnContext, OrchestratorError> {
    let character_key = cache::character_key(session_id);
    let character = match cached::<Character>(cache, &character_key).await {
        Some(character) => character,
        None => {
            let character = store
                .load_character(session_id)
                .await?
                .ok_or_else(|| OrchestratorError::CharacterNotFound(session_id.clone()))?;
            warm(cache, &character_key, &character).await;
            character
        }
    };

    let session_key = cache::session_key(session_id);
    let session = match cached::<SessionState>(cache, &session_key).await {
        Some(session) => session,
        None => {
            let session = store
                .load_session(session_id)
                .await?
                .unwrap_or_else(|| SessionState::new(session_id.clone()));
            warm(cache, &session_key, &session).await;
            session
        }
    };

    Ok(TurnContext { character, session })
}

/// Persist the context: store first, then refresh the cache.
pub async fn save(
    cache: &dyn GameCache,
    store: &dyn GameStore,
    context: &TurnContext,
) -> Result<(), OrchestratorError> {
    let session_id = &context.session.session_id;
    store.save_turn(&context.character, &context.session).await?;

    warm(cache, &cache::character_key(session_id), &context.character).await;
    warm(cache, &cache::session_key(session_id), &context.session).await;
    Ok(())
}

async fn cached<T: serde::de::DeserializeOwned>(cache: &dyn GameCache, key: &str) -> Option<T> {
    match cache::get_json(cache, key).await {
        Ok(Some(value)) => {
            debug!(key, "Cache hit");
            Some(value)
        }
        Ok(None) => None,
        Err(e) => {
            warn!(key, error = %e, "Cache read failed; falling back to store");
            None
        }
    }
}

async fn warm<T: Serialize>(cache: &dyn GameCache, key: &str, value: &T) {
    if let Err(e) = cache::set_json(cache, key, value, TtlClass::Session).await {
        warn!(key, error = %e, "Cache write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::parser::StoryEventType;
    use crate::store::MemoryStore;
    use crate::world::create_sample_fighter;

    fn story(text: &str) -> StoryEvent {
        StoryEvent::new(StoryEventType::Discovery, text)
    }

    #[test]
    fn test_story_ring_drops_oldest() {
        let mut state = SessionState::new(SessionId::from("s1"));
        for beat in ["one", "two", "three", "four"] {
            state.push_story(story(beat), 3);
        }
        assert_eq!(state.story_history.len(), 3);
        assert_eq!(state.recent_story(2), vec!["three", "four"]);
        assert_eq!(state.recent_story(10), vec!["two", "three", "four"]);
    }

    #[test]
    fn test_objectives() {
        let mut state = SessionState::new(SessionId::from("s1"));
        state.track_objectives(&StoryEvent::new(StoryEventType::NewObjective, "Find the heir"));
        state.track_objectives(&StoryEvent::new(StoryEventType::NewObjective, "find the heir"));
        assert_eq!(state.objectives, vec!["Find the heir"]);

        state.track_objectives(&StoryEvent::new(
            StoryEventType::CompletedObjective,
            "Find the heir",
        ));
        assert!(state.objectives.is_empty());
        assert_eq!(state.completed_objectives, vec!["Find the heir"]);
    }

    #[tokio::test]
    async fn test_load_falls_back_to_store_and_warms_cache() {
        let session_id = SessionId::from("s1");
        let cache = MemoryCache::new();
        let store = MemoryStore::new().with_character(session_id.clone(), create_sample_fighter("Aria"));

        let context = load(&cache, &store, &session_id).await.unwrap();
        assert_eq!(context.character.name, "Aria");
        assert_eq!(context.session.turn_count, 0);

        let cached: Option<Character> = cache::get_json(&cache, &cache::character_key(&session_id))
            .await
            .unwrap();
        assert_eq!(cached.map(|c| c.name), Some("Aria".to_string()));
    }

    #[tokio::test]
    async fn test_cache_wins_over_store() {
        let session_id = SessionId::from("s1");
        let cache = MemoryCache::new();
        let store = MemoryStore::new().with_character(session_id.clone(), create_sample_fighter("Stored"));
        cache::set_json(
            &cache,
            &cache::character_key(&session_id),
            &create_sample_fighter("Cached"),
            TtlClass::Short,
        )
        .await
        .unwrap();

        let context = load(&cache, &store, &session_id).await.unwrap();
        assert_eq!(context.character.name, "Cached");
    }

    #[tokio::test]
    async fn test_missing_character_is_an_error() {
        let result = load(&MemoryCache::new(), &MemoryStore::new(), &SessionId::from("nobody")).await;
        assert!(matches!(result, Err(OrchestratorError::CharacterNotFound(_))));
    }

    #[test]
    fn test_render_includes_objectives() {
        let mut context = TurnContext {
            character: create_sample_fighter("Aria"),
            session: SessionState::new(SessionId::from("s1")),
        };
        context.session.objectives.push("Reach the tower".to_string());
        let rendered = context.render();
        assert!(rendered.starts_with("Aria (level 1): 12/12 HP, AC 16"));
        assert!(rendered.contains("Objectives: Reach the tower"));
    }
}
