//! Persistence port.
//!
//! The durable record behind the cache: characters and session state by
//! session id, plus the enemy templates combat is built from.

use crate::orchestrator::SessionState;
use crate::world::{Character, EnemyTemplate, SessionId};
use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait GameStore: Send + Sync {
    async fn load_character(&self, session_id: &SessionId) -> Result<Option<Character>, StoreError>;

    async fn save_character(
        &self,
        session_id: &SessionId,
        character: &Character,
    ) -> Result<(), StoreError>;

    async fn load_session(&self, session_id: &SessionId) -> Result<Option<SessionState>, StoreError>;

    async fn save_session(&self, state: &SessionState) -> Result<(), StoreError>;

    /// Persist the outcome of a turn as one unit.
    ///
    /// Backends that can write both records in a transaction should override
    /// this. The default writes the character, then the session, and puts the
    /// previous character back if the session write fails.
    async fn save_turn(&self, character: &Character, session: &SessionState) -> Result<(), StoreError> {
        let session_id = &session.session_id;
        let previous = self.load_character(session_id).await?;
        self.save_character(session_id, character).await?;

        if let Err(e) = self.save_session(session).await {
            if let Some(previous) = previous {
                if let Err(restore) = self.save_character(session_id, &previous).await {
                    warn!(session = %session_id, error = %restore, "Could not restore character after failed session save");
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Look a template up by enemy name, case-insensitively.
    async fn find_enemy_template(&self, name: &str) -> Result<Option<EnemyTemplate>, StoreError>;
}

/// Store held entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    characters: DashMap<SessionId, Character>,
    sessions: DashMap<SessionId, SessionState>,
    templates: DashMap<String, EnemyTemplate>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_character(self, session_id: SessionId, character: Character) -> Self {
        self.characters.insert(session_id, character);
        self
    }

    pub fn with_enemy_template(self, template: EnemyTemplate) -> Self {
        self.add_enemy_template(template);
        self
    }

    pub fn add_enemy_template(&self, template: EnemyTemplate) {
        self.templates.insert(template.name.to_lowercase(), template);
    }

    pub fn character(&self, session_id: &SessionId) -> Option<Character> {
        self.characters.get(session_id).map(|c| c.clone())
    }

    pub fn session(&self, session_id: &SessionId) -> Option<SessionState> {
        self.sessions.get(session_id).map(|s| s.clone())
    }
}

#[async_trait]
impl GameStore for MemoryStore {
    async fn load_character(&self, session_id: &SessionId) -> Result<Option<Character>, StoreError> {
        Ok(self.character(session_id))
    }

    async fn save_character(
        &self,
        session_id: &SessionId,
        character: &Character,
    ) -> Result<(), StoreError> {
        self.characters.insert(session_id.clone(), character.clone());
        Ok(())
    }

    async fn load_session(&self, session_id: &SessionId) -> Result<Option<SessionState>, StoreError> {
        Ok(self.session(session_id))
    }

    async fn save_session(&self, state: &SessionState) -> Result<(), StoreError> {
        self.sessions.insert(state.session_id.clone(), state.clone());
        Ok(())
    }

    async fn save_turn(&self, character: &Character, session: &SessionState) -> Result<(), StoreError> {
        self.characters.insert(session.session_id.clone(), character.clone());
        self.sessions.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn find_enemy_template(&self, name: &str) -> Result<Option<EnemyTemplate>, StoreError> {
        let wanted = name.trim().to_lowercase();
        if wanted.is_empty() {
            return Ok(None);
        }
        if let Some(template) = self.templates.get(&wanted) {
            return Ok(Some(template.clone()));
        }
        // "goblin archer" finds "goblin"; "orc" finds "orc chieftain".
        Ok(self
            .templates
            .iter()
            .find(|entry| wanted.contains(entry.key().as_str()) || entry.key().contains(&wanted))
            .map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::create_sample_fighter;

    #[tokio::test]
    async fn test_character_round_trip() {
        let store = MemoryStore::new();
        let id = SessionId::from("s1");
        assert!(store.load_character(&id).await.unwrap().is_none());

        let hero = create_sample_fighter("Aria");
        store.save_character(&id, &hero).await.unwrap();
        assert_eq!(store.load_character(&id).await.unwrap(), Some(hero));
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let store = MemoryStore::new();
        let mut state = SessionState::new(SessionId::from("s1"));
        state.turn_count = 3;
        store.save_session(&state).await.unwrap();
        let loaded = store.load_session(&state.session_id).await.unwrap().unwrap();
        assert_eq!(loaded.turn_count, 3);
    }

    /// Delegates to a memory store but refuses every session write.
    struct ReadOnlySessions(MemoryStore);

    #[async_trait]
    impl GameStore for ReadOnlySessions {
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
            Err(StoreError::Backend("read-only".to_string()))
        }

        async fn find_enemy_template(&self, name: &str) -> Result<Option<EnemyTemplate>, StoreError> {
            self.0.find_enemy_template(name).await
        }
    }

    #[tokio::test]
    async fn test_save_turn_writes_both() {
        let store = MemoryStore::new();
        let mut state = SessionState::new(SessionId::from("s1"));
        state.turn_count = 1;
        store
            .save_turn(&create_sample_fighter("Aria"), &state)
            .await
            .unwrap();
        assert_eq!(store.character(&state.session_id).map(|c| c.name), Some("Aria".to_string()));
        assert_eq!(store.session(&state.session_id).map(|s| s.turn_count), Some(1));
    }

    #[tokio::test]
    async fn test_failed_session_write_restores_character() {
        let id = SessionId::from("s1");
        let store = ReadOnlySessions(MemoryStore::new().with_character(id.clone(), create_sample_fighter("Aria")));

        let mut hurt = create_sample_fighter("Aria");
        hurt.hit_points.current = 2;
        let result = store.save_turn(&hurt, &SessionState::new(id.clone())).await;

        assert!(matches!(result, Err(StoreError::Backend(_))));
        assert_eq!(store.0.character(&id).map(|c| c.hit_points.current), Some(12));
        assert!(store.0.session(&id).is_none());
    }

    #[tokio::test]
    async fn test_template_lookup() {
        let store = MemoryStore::new().with_enemy_template(EnemyTemplate::goblin());
        let exact = store.find_enemy_template("GOBLIN").await.unwrap();
        assert_eq!(exact.map(|t| t.name), Some("Goblin".to_string()));

        let partial = store.find_enemy_template("goblin archer").await.unwrap();
        assert!(partial.is_some());

        assert!(store.find_enemy_template("dragon").await.unwrap().is_none());
        assert!(store.find_enemy_template("  ").await.unwrap().is_none());
    }
}
