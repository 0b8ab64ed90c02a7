//! Per-turn record and phase machine.

use crate::combat::CombatState;
use crate::dice::DiceRollResult;
use crate::parser::{DiceRequirement, ParsedResponse, StateChange};
use crate::world::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TurnError {
    #[error("Turn cannot move from {from} to {to}")]
    InvalidTransition { from: TurnPhase, to: TurnPhase },

    #[error("Turn already finished as {0}")]
    AlreadyFinished(ResultType),
}

/// Where a turn is in the pipeline.
///
/// ```text
/// PlayerInput -> AiProcessing -> StateUpdate -> AwaitingDice
///                                           \-> CombatRound -> StoryProgression -> Complete
///                                           \-> StoryProgression -> Complete
/// ```
///
/// `PlayerInput -> Complete` covers turns with nothing to process, and any
/// unfinished phase may move to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    PlayerInput,
    AiProcessing,
    StateUpdate,
    AwaitingDice,
    CombatRound,
    StoryProgression,
    Complete,
    Failed,
}

impl TurnPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TurnPhase::AwaitingDice | TurnPhase::Complete | TurnPhase::Failed
        )
    }

    pub fn can_transition_to(&self, next: TurnPhase) -> bool {
        use TurnPhase::*;
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (PlayerInput, AiProcessing)
                | (PlayerInput, Complete)
                | (AiProcessing, StateUpdate)
                | (StateUpdate, AwaitingDice)
                | (StateUpdate, CombatRound)
                | (StateUpdate, StoryProgression)
                | (CombatRound, StoryProgression)
                | (StoryProgression, Complete)
        )
    }
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnPhase::PlayerInput => "player input",
            TurnPhase::AiProcessing => "AI processing",
            TurnPhase::StateUpdate => "state update",
            TurnPhase::AwaitingDice => "awaiting dice",
            TurnPhase::CombatRound => "combat round",
            TurnPhase::StoryProgression => "story progression",
            TurnPhase::Complete => "complete",
            TurnPhase::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    Success,
    PartialSuccess,
    Failure,
    RequiresDice,
    RequiresInput,
    CombatInitiated,
    StoryAdvanced,
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResultType::Success => "success",
            ResultType::PartialSuccess => "partial success",
            ResultType::Failure => "failure",
            ResultType::RequiresDice => "requires dice",
            ResultType::RequiresInput => "requires input",
            ResultType::CombatInitiated => "combat initiated",
            ResultType::StoryAdvanced => "story advanced",
        };
        write!(f, "{name}")
    }
}

/// One player turn, owned by the orchestrator while it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameTurn {
    pub turn_id: Uuid,
    pub session_id: SessionId,
    pub phase: TurnPhase,
    pub player_action: Option<String>,
    pub dice_rolls: Vec<DiceRollResult>,
    pub ai_response: Option<String>,
    pub parsed_response: Option<ParsedResponse>,
    /// Changes that were actually applied, with resolved values.
    pub state_changes: Vec<StateChange>,
    pub result: Option<ResultType>,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl GameTurn {
    pub fn new(session_id: SessionId, player_action: Option<String>) -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            session_id,
            phase: TurnPhase::PlayerInput,
            player_action,
            dice_rolls: Vec::new(),
            ai_response: None,
            parsed_response: None,
            state_changes: Vec::new(),
            result: None,
            errors: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn transition(&mut self, next: TurnPhase) -> Result<(), TurnError> {
        if !self.phase.can_transition_to(next) {
            return Err(TurnError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }

    /// Record the result. The phase is left where the turn stopped.
    pub fn finish(&mut self, result: ResultType) -> Result<(), TurnError> {
        if let Some(previous) = self.result {
            return Err(TurnError::AlreadyFinished(previous));
        }
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }
}

/// What a caller gets back from a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub turn_id: Uuid,
    pub success: bool,
    pub result_type: ResultType,
    pub narrative_text: String,
    pub state_changes: Vec<StateChange>,
    pub dice_required: Vec<DiceRequirement>,
    pub next_actions: Vec<String>,
    pub errors: Vec<String>,
    /// Encounter state after the turn, if the session has one.
    pub combat_state: Option<CombatState>,
}

impl OrchestrationResult {
    pub fn new(turn_id: Uuid, result_type: ResultType, narrative_text: impl Into<String>) -> Self {
        Self {
            turn_id,
            success: result_type != ResultType::Failure,
            result_type,
            narrative_text: narrative_text.into(),
            state_changes: Vec::new(),
            dice_required: Vec::new(),
            next_actions: Vec::new(),
            errors: Vec::new(),
            combat_state: None,
        }
    }

    pub fn needs_dice(&self) -> bool {
        self.result_type == ResultType::RequiresDice
    }
}
