//! Turn orchestration.
//!
//! One call to [`TurnOrchestrator::process_turn`] runs a player turn end to
//! end: load context, narrate, extract events, pause for dice if the
//! narration asks for them, apply changes, run the combat round, fold story
//! events into the session, and save. A turn never returns an error; failures
//! become a [`ResultType::Failure`] result and leave the stored session
//! untouched.

pub mod apply;
pub mod context;
pub mod locks;
pub mod turn;

pub use context::{PendingTurn, SessionState, TurnContext};
pub use locks::SessionLocks;
pub use turn::{GameTurn, OrchestrationResult, ResultType, TurnError, TurnPhase};

use crate::cache::{CacheError, GameCache};
use crate::combat::{CombatEncounter, CombatError, CombatOutcome, CombatParticipant, CombatRewards};
use crate::config::EngineConfig;
use crate::dice::{Advantage, DiceExpression, DiceRollResult, DiceSource};
use crate::narration::{fallback_narration, Narration, NarrationRequest, NarrationService};
use crate::parser::{
    CombatEvent, CombatEventType, DiceRequirement, EntityType, ParsedResponse, ResponseParser,
    StateChange, StoryEventType,
};
use crate::store::{GameStore, StoreError};
use crate::world::{Character, EnemyTemplate, SessionId};
use apply::ApplyError;
use chrono::Utc;
use futures::FutureExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Narrative shown when a turn fails.
pub const FAILURE_NARRATIVE: &str =
    "The world seems to hold still for a moment. Something went wrong behind the scenes; please try your action again.";

/// Name given to a foe the narration never names.
pub const UNKNOWN_FOE: &str = "Hostile creature";

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("No character for session {0}")]
    CharacterNotFound(SessionId),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Combat error: {0}")]
    Combat(#[from] CombatError),

    #[error("Turn error: {0}")]
    Turn(#[from] TurnError),
}

/// A player's turn input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    pub session_id: SessionId,
    pub player_action: String,
    /// Rolls answering a previous `RequiresDice` result.
    #[serde(default)]
    pub dice_results: Vec<DiceRollResult>,
}

impl TurnRequest {
    pub fn new(session_id: SessionId, player_action: impl Into<String>) -> Self {
        Self {
            session_id,
            player_action: player_action.into(),
            dice_results: Vec::new(),
        }
    }

    pub fn with_dice_results(mut self, results: Vec<DiceRollResult>) -> Self {
        self.dice_results = results;
        self
    }
}

/// Runs player turns against injected collaborators.
pub struct TurnOrchestrator {
    config: EngineConfig,
    parser: ResponseParser,
    narrator: Arc<dyn NarrationService>,
    cache: Arc<dyn GameCache>,
    store: Arc<dyn GameStore>,
    locks: SessionLocks,
    dice: Mutex<Box<dyn DiceSource + Send>>,
}

impl TurnOrchestrator {
    pub fn new(
        config: EngineConfig,
        narrator: Arc<dyn NarrationService>,
        cache: Arc<dyn GameCache>,
        store: Arc<dyn GameStore>,
    ) -> Self {
        Self {
            parser: ResponseParser::new(config.parser.clone()),
            config,
            narrator,
            cache,
            store,
            locks: SessionLocks::new(),
            dice: Mutex::new(Box::new(StdRng::from_entropy())),
        }
    }

    /// Replace the engine's dice, for replays and tests.
    pub fn with_dice(mut self, dice: impl DiceSource + Send + 'static) -> Self {
        self.dice = Mutex::new(Box::new(dice));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn parser(&self) -> &ResponseParser {
        &self.parser
    }

    pub fn locks(&self) -> &SessionLocks {
        &self.locks
    }

    /// Create or reset a session around `character`.
    pub async fn start_session(
        &self,
        session_id: SessionId,
        character: Character,
    ) -> Result<(), OrchestratorError> {
        let _guard = self.locks.acquire(&session_id).await;
        let context = TurnContext {
            character,
            session: SessionState::new(session_id),
        };
        context::save(self.cache.as_ref(), self.store.as_ref(), &context).await?;
        info!(session_id = %context.session.session_id, "Session started");
        Ok(())
    }

    /// Current character and session state.
    pub async fn load_context(&self, session_id: &SessionId) -> Result<TurnContext, OrchestratorError> {
        context::load(self.cache.as_ref(), self.store.as_ref(), session_id).await
    }

    /// Run one player turn. Never fails; see [`ResultType::Failure`].
    #[tracing::instrument(
        skip(self, request),
        fields(session_id = %request.session_id, turn_id = tracing::field::Empty)
    )]
    pub async fn process_turn(&self, request: TurnRequest) -> OrchestrationResult {
        let _guard = self.locks.acquire(&request.session_id).await;

        let action = request.player_action.trim();
        let mut turn = GameTurn::new(
            request.session_id.clone(),
            (!action.is_empty()).then(|| action.to_string()),
        );
        tracing::Span::current().record("turn_id", tracing::field::display(turn.turn_id));

        let outcome = AssertUnwindSafe(self.run_turn(&request, &mut turn))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!(error = %e, phase = %turn.phase, "Turn failed");
                recover(&mut turn, e.to_string())
            }
            Err(_) => {
                error!(phase = %turn.phase, "Turn panicked");
                recover(&mut turn, "panic during turn")
            }
        }
    }

    async fn run_turn(
        &self,
        request: &TurnRequest,
        turn: &mut GameTurn,
    ) -> Result<OrchestrationResult, OrchestratorError> {
        let mut ctx = context::load(self.cache.as_ref(), self.store.as_ref(), &request.session_id).await?;

        let action = request.player_action.trim();
        let resuming = ctx.session.pending.take().filter(|pending| {
            !request.dice_results.is_empty()
                && (action.is_empty() || pending.player_action.eq_ignore_ascii_case(action))
        });
        let player_action = match &resuming {
            _ if !action.is_empty() => action.to_string(),
            Some(pending) => pending.player_action.clone(),
            None => {
                turn.transition(TurnPhase::Complete)?;
                turn.finish(ResultType::RequiresInput)?;
                let mut result =
                    OrchestrationResult::new(turn.turn_id, ResultType::RequiresInput, "What do you do?");
                result.next_actions = vec!["Describe what your character does".to_string()];
                result.combat_state = ctx.session.encounter.as_ref().map(|e| e.state);
                return Ok(result);
            }
        };
        turn.player_action = Some(player_action.clone());
        turn.dice_rolls = request.dice_results.clone();

        // AI processing
        turn.transition(TurnPhase::AiProcessing)?;
        let narration = match resuming {
            Some(pending) => {
                debug!("Resuming narration held for dice");
                pending.narration
            }
            None => {
                let narration = self.narrate(&ctx, &player_action, &request.dice_results).await;
                if narration.is_fallback() {
                    turn.record_error("Narration unavailable; fallback narration used");
                }
                narration.content
            }
        };
        let parsed = self.parser.parse(&narration, Some(&ctx.parse_context()));
        turn.ai_response = Some(narration.clone());
        debug!(
            confidence = parsed.confidence_score,
            events = parsed.total_events(),
            "Narration parsed"
        );

        // State update
        turn.transition(TurnPhase::StateUpdate)?;
        let mut dice_rolls = request.dice_results.clone();
        if parsed.requires_dice() && dice_rolls.is_empty() {
            if self.config.auto_roll_dice {
                dice_rolls = self.auto_roll(&parsed.dice_rolls).await;
                turn.dice_rolls = dice_rolls.clone();
            } else {
                return self
                    .pause_for_dice(turn, ctx, player_action, narration, parsed)
                    .await;
            }
        }

        let mut initiated = false;
        if parsed.has_combat_initiation() && ctx.session.active_encounter().is_none() {
            let encounter = self.begin_encounter(&ctx, &parsed).await?;
            ctx.session.encounter = Some(encounter);
            initiated = true;
        }

        let applied = apply_changes(&mut ctx, &parsed, turn);

        // Combat round
        let mut ended = None;
        if ctx.session.in_combat() {
            turn.transition(TurnPhase::CombatRound)?;
            ended = self
                .combat_round(&mut ctx, &parsed, &dice_rolls, initiated)
                .await?;
        }

        // Story progression
        turn.transition(TurnPhase::StoryProgression)?;
        for event in &parsed.story_events {
            ctx.session.track_objectives(event);
        }
        let skip = parsed
            .story_events
            .len()
            .saturating_sub(self.config.story_events_per_turn);
        for event in parsed.story_events.iter().skip(skip) {
            ctx.session
                .push_story(event.clone(), self.config.story_history_limit);
        }
        ctx.session.turn_count += 1;
        ctx.session.last_turn_at = Some(Utc::now());

        context::save(self.cache.as_ref(), self.store.as_ref(), &ctx).await?;
        turn.transition(TurnPhase::Complete)?;

        let result_type = if initiated {
            ResultType::CombatInitiated
        } else if !turn.errors.is_empty() {
            ResultType::PartialSuccess
        } else if !parsed.story_events.is_empty() {
            ResultType::StoryAdvanced
        } else {
            ResultType::Success
        };
        turn.finish(result_type)?;

        let mut narrative = parsed.narrative_text.clone();
        if let Some((outcome, rewards)) = &ended {
            narrative.push_str("\n\n");
            narrative.push_str(&outcome_line(*outcome, rewards));
        }

        let mut result = OrchestrationResult::new(turn.turn_id, result_type, narrative);
        result.state_changes = applied.clone();
        result.next_actions = suggest_next_actions(&ctx, &parsed);
        result.errors = turn.errors.clone();
        result.combat_state = ctx.session.encounter.as_ref().map(|e| e.state);

        turn.state_changes = applied;
        turn.parsed_response = Some(parsed);
        info!(
            result = %result_type,
            changes = result.state_changes.len(),
            turn_count = ctx.session.turn_count,
            "Turn complete"
        );
        Ok(result)
    }

    async fn narrate(&self, ctx: &TurnContext, action: &str, dice: &[DiceRollResult]) -> Narration {
        let mut context = ctx.render();
        if !dice.is_empty() {
            let rolls: Vec<&str> = dice.iter().map(|r| r.description.as_str()).collect();
            context.push_str("\nPlayer rolls: ");
            context.push_str(&rolls.join("; "));
        }
        let request = NarrationRequest::new(ctx.session.session_id.clone(), action)
            .with_context(context)
            .with_recent_story(ctx.session.recent_story(self.config.story_events_per_turn));

        match tokio::time::timeout(self.config.narration_timeout, self.narrator.generate(&request)).await {
            Ok(Ok(narration)) => narration,
            Ok(Err(e)) => {
                warn!(error = %e, "Narration failed; using fallback");
                fallback_narration(action)
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.config.narration_timeout.as_millis() as u64,
                    "Narration timed out; using fallback"
                );
                fallback_narration(action)
            }
        }
    }

    async fn pause_for_dice(
        &self,
        turn: &mut GameTurn,
        mut ctx: TurnContext,
        player_action: String,
        narration: String,
        parsed: ParsedResponse,
    ) -> Result<OrchestrationResult, OrchestratorError> {
        turn.transition(TurnPhase::AwaitingDice)?;
        ctx.session.pending = Some(PendingTurn {
            player_action,
            narration,
            dice_required: parsed.dice_rolls.clone(),
        });
        context::save(self.cache.as_ref(), self.store.as_ref(), &ctx).await?;
        turn.finish(ResultType::RequiresDice)?;

        let mut result =
            OrchestrationResult::new(turn.turn_id, ResultType::RequiresDice, parsed.narrative_text.clone());
        result.dice_required = parsed.dice_rolls.clone();
        result.next_actions = parsed.dice_rolls.iter().map(dice_prompt).collect();
        result.errors = turn.errors.clone();
        result.combat_state = ctx.session.encounter.as_ref().map(|e| e.state);

        info!(dice = result.dice_required.len(), "Turn paused for dice");
        turn.parsed_response = Some(parsed);
        Ok(result)
    }

    /// Roll every requirement with the engine's dice. Invalid notation is skipped.
    async fn auto_roll(&self, requirements: &[DiceRequirement]) -> Vec<DiceRollResult> {
        let mut dice = self.dice.lock().await;
        requirements
            .iter()
            .filter_map(|requirement| match DiceExpression::parse(&requirement.expression) {
                Ok(expression) => Some(expression.roll_with(Advantage::Normal, &mut **dice)),
                Err(e) => {
                    warn!(expression = %requirement.expression, error = %e, "Skipping unrollable dice");
                    None
                }
            })
            .collect()
    }

    /// Build an encounter from the character and every named foe, then roll
    /// initiative.
    async fn begin_encounter(
        &self,
        ctx: &TurnContext,
        parsed: &ParsedResponse,
    ) -> Result<CombatEncounter, OrchestratorError> {
        let mut encounter = CombatEncounter::new(ctx.session.session_id.clone());
        encounter.add_participant(CombatParticipant::from_character(&ctx.character))?;

        let mut names = apply::hostile_names(parsed, &ctx.character);
        if names.is_empty() {
            names.push(UNKNOWN_FOE.to_string());
        }
        for name in &names {
            let template = match self.store.find_enemy_template(name).await {
                Ok(Some(template)) => template,
                Ok(None) => EnemyTemplate::generic(apply::display_name(name)),
                Err(e) => {
                    warn!(enemy = %name, error = %e, "Template lookup failed; using generic stats");
                    EnemyTemplate::generic(apply::display_name(name))
                }
            };
            let mut participant = CombatParticipant::from_enemy(&template);
            participant.name = apply::display_name(name);
            encounter.add_participant(participant)?;
        }

        encounter.start_combat()?;
        let initiative = {
            let mut dice = self.dice.lock().await;
            encounter.roll_initiative(&mut **dice)?
        };
        let order: Vec<String> = initiative
            .ordered_participants
            .iter()
            .map(|entry| format!("{} ({})", entry.name, entry.initiative))
            .collect();
        encounter.log_action(
            None,
            format!("Combat begins. Initiative: {}", order.join(", ")),
            serde_json::to_value(&initiative).unwrap_or_default(),
        );
        info!(enemies = names.len(), "Combat initiated");
        Ok(encounter)
    }

    /// Log the turn into the encounter, settle status effects and HP, and
    /// either end the fight or move to the next combatant.
    async fn combat_round(
        &self,
        ctx: &mut TurnContext,
        parsed: &ParsedResponse,
        dice_rolls: &[DiceRollResult],
        initiated: bool,
    ) -> Result<Option<(CombatOutcome, CombatRewards)>, OrchestratorError> {
        let character = ctx.character.clone();
        let Some(encounter) = ctx.session.active_encounter_mut() else {
            return Ok(None);
        };

        apply::sync_character_hp(encounter, &character);
        for response in apply::apply_status_effects(encounter, &parsed.combat_events, &character) {
            debug!(description = %response.description, "Status effect applied");
        }
        for event in &parsed.combat_events {
            if event.event_type == CombatEventType::CombatInitiated {
                continue;
            }
            encounter.log_action(
                event.attacker.as_deref(),
                describe_event(event),
                serde_json::to_value(event).unwrap_or_default(),
            );
        }
        for roll in dice_rolls {
            encounter.log_action(
                Some(character.name.as_str()),
                roll.description.clone(),
                serde_json::json!({ "notation": roll.notation, "total": roll.total }),
            );
        }

        if let Some(outcome) = encounter.check_outcome() {
            let rewards = if outcome == CombatOutcome::Victory {
                let mut dice = self.dice.lock().await;
                encounter.victory_rewards(&mut **dice)
            } else {
                CombatRewards::default()
            };
            encounter.end_combat(outcome, rewards.xp, rewards.loot.clone())?;
            ctx.character.experience = ctx.character.experience.saturating_add(rewards.xp);
            info!(?outcome, xp = rewards.xp, "Combat ended");
            return Ok(Some((outcome, rewards)));
        }

        if !initiated {
            let advance = encounter.advance_to_next_active()?;
            debug!(round = advance.round, turn = advance.turn, "Combat turn advanced");
        }
        Ok(None)
    }
}

/// Apply every extracted change the session can hold, recording misses on
/// the turn. Enemy changes outside combat and non-HP enemy changes are
/// dropped quietly.
fn apply_changes(
    ctx: &mut TurnContext,
    parsed: &ParsedResponse,
    turn: &mut GameTurn,
) -> Vec<StateChange> {
    let mut applied = Vec::new();
    for change in &parsed.state_changes {
        let outcome = match change.entity_type {
            EntityType::Character => apply::apply_to_character(&ctx.character, change)
                .map(|(next, resolved)| {
                    ctx.character = next;
                    resolved
                }),
            EntityType::Enemy | EntityType::Npc => match ctx.session.active_encounter_mut() {
                Some(encounter) => {
                    apply::apply_to_encounter(encounter, change).map(|(_, resolved)| resolved)
                }
                None => Err(ApplyError::NoEncounter(
                    change.entity_id.clone().unwrap_or_default(),
                )),
            },
            other => Err(ApplyError::UnsupportedProperty {
                entity: other,
                property: change.property_name.clone(),
            }),
        };

        match outcome {
            Ok(resolved) => applied.push(resolved),
            Err(e) if is_ignorable(&e) => debug!(error = %e, "State change not applicable"),
            Err(e) => {
                warn!(error = %e, "Skipped state change");
                turn.record_error(e.to_string());
            }
        }
    }
    applied
}

fn is_ignorable(error: &ApplyError) -> bool {
    match error {
        ApplyError::NoEncounter(_) => true,
        ApplyError::UnsupportedProperty { entity, .. } => *entity != EntityType::Character,
        _ => false,
    }
}

fn recover(turn: &mut GameTurn, reason: impl Into<String>) -> OrchestrationResult {
    if turn.transition(TurnPhase::Failed).is_err() {
        debug!(phase = %turn.phase, "Turn already in a terminal phase");
    }
    turn.record_error(reason);
    if turn.finish(ResultType::Failure).is_err() {
        debug!("Turn result already recorded");
    }

    let mut result = OrchestrationResult::new(turn.turn_id, ResultType::Failure, FAILURE_NARRATIVE);
    result.errors = vec!["The turn could not be completed; the session is unchanged".to_string()];
    result.next_actions = vec!["Try your action again".to_string()];
    result
}

fn describe_event(event: &CombatEvent) -> String {
    let who = |name: &Option<String>| name.clone().unwrap_or_else(|| "someone".to_string());
    match event.event_type {
        CombatEventType::Attack => format!("{} attacks {}", who(&event.attacker), who(&event.target)),
        CombatEventType::Damage => format!(
            "{} takes {} damage",
            who(&event.target),
            event.damage_amount.unwrap_or_default()
        ),
        CombatEventType::Heal => format!(
            "{} regains {} HP",
            who(&event.target),
            event.healing_amount.unwrap_or_default()
        ),
        CombatEventType::StatusEffect => format!(
            "{} is {}",
            who(&event.target),
            event.status_effect.as_deref().unwrap_or("affected")
        ),
        CombatEventType::Initiative => "Initiative is rolled".to_string(),
        CombatEventType::CombatInitiated => "Combat begins".to_string(),
    }
}

fn outcome_line(outcome: CombatOutcome, rewards: &CombatRewards) -> String {
    match outcome {
        CombatOutcome::Victory => {
            let mut line = format!("Victory! You earn {} XP.", rewards.xp);
            if !rewards.loot.is_empty() {
                line.push_str(&format!(" Loot: {}.", rewards.loot.join(", ")));
            }
            line
        }
        CombatOutcome::Defeat => "You have fallen.".to_string(),
        CombatOutcome::Retreat => "You escape the fight.".to_string(),
    }
}

fn dice_prompt(requirement: &DiceRequirement) -> String {
    let what = requirement
        .skill
        .clone()
        .unwrap_or_else(|| requirement.purpose.label().to_string());
    match requirement.dc {
        Some(dc) => format!("Roll {} for {} (DC {dc})", requirement.expression, what),
        None => format!("Roll {} for {}", requirement.expression, what),
    }
}

/// Next moves that fit the state after the turn.
fn suggest_next_actions(ctx: &TurnContext, parsed: &ParsedResponse) -> Vec<String> {
    let mut actions = Vec::new();

    if let Some(encounter) = ctx.session.active_encounter() {
        let character_source = ctx.character.id.to_string();
        match encounter.current_participant() {
            Some(current) if current.source_id.as_deref() == Some(character_source.as_str()) => {
                if let Some(enemy) = encounter.active_participants().find(|p| p.is_enemy()) {
                    actions.push(format!("Attack the {}", enemy.name));
                }
                actions.push("Cast a spell or use an item".to_string());
                actions.push("Move to a better position".to_string());
                actions.push("Attempt to flee".to_string());
            }
            Some(current) => actions.push(format!("Wait for {} to act", current.name)),
            None => actions.push("Roll for initiative".to_string()),
        }
        return actions;
    }

    if let Some(objective) = ctx.session.objectives.first() {
        actions.push(format!("Pursue your objective: {objective}"));
    }
    if parsed
        .story_events
        .iter()
        .any(|e| e.event_type == StoryEventType::Discovery)
    {
        actions.push("Examine what you discovered".to_string());
    }
    actions.extend(
        ["Look around", "Talk to someone nearby", "Continue onward"].map(String::from),
    );
    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::RollPurpose;

    #[test]
    fn test_dice_prompt() {
        let mut requirement = DiceRequirement::new("1d20", 0, RollPurpose::SavingThrow);
        assert_eq!(dice_prompt(&requirement), "Roll 1d20 for saving throw");
        requirement.skill = Some("Dexterity".to_string());
        requirement.dc = Some(13);
        assert_eq!(dice_prompt(&requirement), "Roll 1d20 for Dexterity (DC 13)");
    }

    #[test]
    fn test_recover_is_generic() {
        let mut turn = GameTurn::new(SessionId::from("s1"), Some("look".to_string()));
        let result = recover(&mut turn, "Store backend error: disk on fire");
        assert_eq!(result.result_type, ResultType::Failure);
        assert!(!result.success);
        assert_eq!(result.narrative_text, FAILURE_NARRATIVE);
        assert!(result.errors.iter().all(|e| !e.contains("disk")));
        assert_eq!(turn.phase, TurnPhase::Failed);
        assert_eq!(turn.result, Some(ResultType::Failure));
    }

    #[test]
    fn test_outcome_line() {
        let rewards = CombatRewards {
            xp: 50,
            loot: vec!["Scimitar".to_string()],
        };
        assert_eq!(
            outcome_line(CombatOutcome::Victory, &rewards),
            "Victory! You earn 50 XP. Loot: Scimitar."
        );
        assert_eq!(
            outcome_line(CombatOutcome::Defeat, &CombatRewards::default()),
            "You have fallen."
        );
    }

    #[test]
    fn test_describe_event() {
        let event = CombatEvent::damage(Some("goblin".to_string()), 4, None);
        assert_eq!(describe_event(&event), "goblin takes 4 damage");
    }
}
