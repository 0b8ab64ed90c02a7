//! Narrative-to-game-state bridge for an AI Dungeon Master.
//!
//! This crate provides:
//! - D&D dice notation parsing and rolling
//! - Attack resolution and a turn-based combat state machine
//! - Extraction of game events from free-form narration
//! - A turn orchestrator that ties narration, dice, combat and story together
//!
//! # Quick Start
//!
//! ```ignore
//! use dm_bridge::{EngineConfig, MemoryCache, MemoryStore, SessionId, TemplateNarrator};
//! use dm_bridge::{TurnOrchestrator, TurnRequest};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let session = SessionId::from("demo");
//!     let store = MemoryStore::new()
//!         .with_character(session.clone(), dm_bridge::world::create_sample_fighter("Thorin"));
//!     let orchestrator = TurnOrchestrator::new(
//!         EngineConfig::default(),
//!         Arc::new(TemplateNarrator),
//!         Arc::new(MemoryCache::new()),
//!         Arc::new(store),
//!     );
//!
//!     let result = orchestrator
//!         .process_turn(TurnRequest::new(session, "I look around the tavern"))
//!         .await;
//!     println!("{}", result.narrative_text);
//! }
//! ```

pub mod attack;
pub mod cache;
pub mod combat;
pub mod config;
pub mod dice;
pub mod logging;
pub mod narration;
pub mod orchestrator;
pub mod parser;
pub mod store;
pub mod testing;
pub mod world;

// Primary public API
pub use attack::{resolve_attack, Attack, AttackRollResult};
pub use cache::{GameCache, MemoryCache, TtlClass};
pub use combat::{CombatEncounter, CombatOutcome, CombatParticipant, CombatState};
pub use config::{EngineConfig, ParserConfig};
pub use dice::{roll, Advantage, DiceError, DiceExpression, DiceRollResult, DiceSource};
pub use narration::{ClaudeNarrator, NarrationService, TemplateNarrator};
pub use orchestrator::{
    OrchestrationResult, OrchestratorError, ResultType, TurnOrchestrator, TurnRequest,
};
pub use parser::{ParsedResponse, ResponseParser};
pub use store::{GameStore, MemoryStore};
pub use testing::{MockNarrator, MockResponse, ScriptedDice, TestHarness};
pub use world::{Character, EnemyTemplate, SessionId};
