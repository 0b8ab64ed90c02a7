//! Combat encounter state machine.
//!
//! `NotStarted -> Initiative -> InProgress -> {Victory | Defeat | Retreat}`.
//! The three outcomes are terminal. Attack outcomes are resolved elsewhere
//! and pushed in through [`CombatEncounter::apply_attack_result`].
//!
//! Lookups of unknown participants return `None`; illegal state transitions
//! return [`CombatError`].

use crate::attack::AttackRollResult;
use crate::dice::{Advantage, DiceExpression, DiceSource};
use crate::world::{roll_loot, Character, EnemyAttack, EnemyTemplate, LootEntry, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Identifiers and errors
// ============================================================================

/// Unique identifier for a combat participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub Uuid);

impl ParticipantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an encounter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncounterId(pub Uuid);

impl EncounterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EncounterId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CombatError {
    #[error("Cannot {operation} while combat is {state}")]
    InvalidState {
        operation: &'static str,
        state: CombatState,
    },
    #[error("Encounter has no participants")]
    NoParticipants,
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombatState {
    NotStarted,
    Initiative,
    InProgress,
    Victory,
    Defeat,
    Retreat,
}

impl CombatState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CombatState::Victory | CombatState::Defeat | CombatState::Retreat
        )
    }
}

impl fmt::Display for CombatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CombatState::NotStarted => "not started",
            CombatState::Initiative => "rolling initiative",
            CombatState::InProgress => "in progress",
            CombatState::Victory => "won",
            CombatState::Defeat => "lost",
            CombatState::Retreat => "abandoned",
        };
        f.write_str(label)
    }
}

/// How an encounter ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombatOutcome {
    Victory,
    Defeat,
    Retreat,
}

impl CombatOutcome {
    /// `"victory"` and `"retreat"` map to themselves; anything else is a defeat.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "victory" => CombatOutcome::Victory,
            "retreat" => CombatOutcome::Retreat,
            _ => CombatOutcome::Defeat,
        }
    }
}

impl From<CombatOutcome> for CombatState {
    fn from(outcome: CombatOutcome) -> Self {
        match outcome {
            CombatOutcome::Victory => CombatState::Victory,
            CombatOutcome::Defeat => CombatState::Defeat,
            CombatOutcome::Retreat => CombatState::Retreat,
        }
    }
}

// ============================================================================
// Participants
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantKind {
    Character,
    Enemy,
}

/// Per-turn resources, reset when the participant's turn begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEconomy {
    pub action: bool,
    pub bonus_action: bool,
    pub reaction: bool,
    pub movement_remaining: u32,
}

impl ActionEconomy {
    pub fn fresh(speed: u32) -> Self {
        Self {
            action: true,
            bonus_action: true,
            reaction: true,
            movement_remaining: speed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    Action,
    BonusAction,
    Reaction,
    Movement(u32),
}

/// A named condition on a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveCondition {
    pub name: String,
    pub source: String,
    /// Rounds remaining; `None` lasts until removed.
    pub duration_rounds: Option<u32>,
    pub applied_round: u32,
}

impl ActiveCondition {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            duration_rounds: None,
            applied_round: 0,
        }
    }

    pub fn with_duration(mut self, rounds: u32) -> Self {
        self.duration_rounds = Some(rounds);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatParticipant {
    pub id: ParticipantId,
    pub name: String,
    pub kind: ParticipantKind,
    /// Character id or template name this participant was built from.
    pub source_id: Option<String>,
    pub max_hp: i32,
    pub current_hp: i32,
    pub temporary_hp: i32,
    pub armor_class: i32,
    /// Pre-assigned values are kept when initiative is rolled.
    pub initiative: Option<i32>,
    pub dex_modifier: i32,
    pub speed: u32,
    pub is_active: bool,
    pub conditions: Vec<ActiveCondition>,
    pub actions_taken: u32,
    pub economy: ActionEconomy,
    pub eliminated_at: Option<DateTime<Utc>>,
    pub xp_value: u32,
    pub attacks: Vec<EnemyAttack>,
    pub loot_table: Vec<LootEntry>,
}

impl CombatParticipant {
    pub fn new(name: impl Into<String>, kind: ParticipantKind, max_hp: i32, armor_class: i32) -> Self {
        let max_hp = max_hp.max(1);
        Self {
            id: ParticipantId::new(),
            name: name.into(),
            kind,
            source_id: None,
            max_hp,
            current_hp: max_hp,
            temporary_hp: 0,
            armor_class,
            initiative: None,
            dex_modifier: 0,
            speed: 30,
            is_active: true,
            conditions: Vec::new(),
            actions_taken: 0,
            economy: ActionEconomy::fresh(30),
            eliminated_at: None,
            xp_value: 0,
            attacks: Vec::new(),
            loot_table: Vec::new(),
        }
    }

    pub fn from_character(character: &Character) -> Self {
        let mut participant = Self::new(
            character.name.clone(),
            ParticipantKind::Character,
            character.hit_points.maximum,
            character.armor_class,
        );
        participant.source_id = Some(character.id.to_string());
        participant.current_hp = character.hit_points.current.clamp(0, participant.max_hp);
        participant.temporary_hp = character.hit_points.temporary.max(0);
        participant.dex_modifier = character.dex_modifier();
        participant.speed = character.speed;
        participant.economy = ActionEconomy::fresh(character.speed);
        participant.is_active = participant.current_hp > 0;
        participant
    }

    pub fn from_enemy(template: &EnemyTemplate) -> Self {
        let mut participant = Self::new(
            template.name.clone(),
            ParticipantKind::Enemy,
            template.max_hp,
            template.armor_class,
        );
        participant.source_id = Some(template.name.clone());
        participant.dex_modifier = template.dex_modifier;
        participant.xp_value = template.xp_value;
        participant.attacks = template.attacks.clone();
        participant.loot_table = template.loot_table.clone();
        participant
    }

    pub fn with_initiative(mut self, initiative: i32) -> Self {
        self.initiative = Some(initiative);
        self
    }

    pub fn with_dex_modifier(mut self, dex_modifier: i32) -> Self {
        self.dex_modifier = dex_modifier;
        self
    }

    pub fn has_condition(&self, name: &str) -> bool {
        self.conditions
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn is_enemy(&self) -> bool {
        self.kind == ParticipantKind::Enemy
    }

    fn eliminate(&mut self) {
        self.current_hp = 0;
        if self.is_active {
            self.is_active = false;
            self.eliminated_at = Some(Utc::now());
        }
    }

    /// Count down timed conditions; returns the names that expired.
    fn tick_conditions(&mut self) -> Vec<String> {
        let mut expired = Vec::new();
        self.conditions.retain_mut(|condition| {
            let Some(rounds) = condition.duration_rounds.as_mut() else {
                return true;
            };
            if *rounds <= 1 {
                expired.push(condition.name.clone());
                false
            } else {
                *rounds -= 1;
                true
            }
        });
        expired
    }
}

// ============================================================================
// Responses and log
// ============================================================================

/// Outcome of a single mutation on the encounter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatActionResponse {
    pub success: bool,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub damage_dealt: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healing_done: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions_applied: Vec<String>,
    pub participant_eliminated: bool,
}

impl CombatActionResponse {
    fn ok(description: impl Into<String>) -> Self {
        Self {
            success: true,
            description: description.into(),
            damage_dealt: None,
            healing_done: None,
            conditions_applied: Vec::new(),
            participant_eliminated: false,
        }
    }

    fn rejected(description: impl Into<String>) -> Self {
        Self {
            success: false,
            ..Self::ok(description)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiativeEntry {
    pub participant_id: ParticipantId,
    pub name: String,
    pub initiative: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiativeRollResponse {
    pub ordered_participants: Vec<InitiativeEntry>,
}

/// What happened when the turn moved on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnAdvance {
    pub round: u32,
    pub turn: usize,
    pub participant_id: ParticipantId,
    pub new_round: bool,
    pub expired_conditions: Vec<String>,
}

/// Append-only log entry, stamped with round, turn and time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedAction {
    pub round: u32,
    pub turn: usize,
    pub actor: Option<String>,
    pub description: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatRewards {
    pub xp: u32,
    pub loot: Vec<String>,
}

// ============================================================================
// Encounter
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombatEncounter {
    pub id: EncounterId,
    pub session_id: SessionId,
    pub state: CombatState,
    pub current_round: u32,
    pub current_turn: usize,
    pub initiative_order: Vec<ParticipantId>,
    pub participants: Vec<CombatParticipant>,
    log: Vec<LoggedAction>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub rewards: Option<CombatRewards>,
}

impl CombatEncounter {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            id: EncounterId::new(),
            session_id,
            state: CombatState::NotStarted,
            current_round: 0,
            current_turn: 0,
            initiative_order: Vec::new(),
            participants: Vec::new(),
            log: Vec::new(),
            started_at: None,
            ended_at: None,
            rewards: None,
        }
    }

    /// Add a participant before initiative is rolled.
    pub fn add_participant(
        &mut self,
        participant: CombatParticipant,
    ) -> Result<ParticipantId, CombatError> {
        if !matches!(self.state, CombatState::NotStarted | CombatState::Initiative) {
            return Err(CombatError::InvalidState {
                operation: "add a participant",
                state: self.state,
            });
        }
        let id = participant.id;
        self.participants.push(participant);
        Ok(id)
    }

    pub fn start_combat(&mut self) -> Result<(), CombatError> {
        if !matches!(self.state, CombatState::NotStarted | CombatState::Initiative) {
            return Err(CombatError::InvalidState {
                operation: "start combat",
                state: self.state,
            });
        }
        self.state = CombatState::Initiative;
        self.current_round = 1;
        self.current_turn = 0;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Roll `1d20 + DEX` for everyone without a pre-assigned initiative and
    /// order the roster. Ties go to the higher DEX modifier, then to the
    /// participant added first.
    pub fn roll_initiative<D: DiceSource + ?Sized>(
        &mut self,
        dice: &mut D,
    ) -> Result<InitiativeRollResponse, CombatError> {
        if self.state != CombatState::Initiative {
            return Err(CombatError::InvalidState {
                operation: "roll initiative",
                state: self.state,
            });
        }
        if self.participants.is_empty() {
            return Err(CombatError::NoParticipants);
        }

        for participant in &mut self.participants {
            if participant.initiative.is_none() {
                let roll = DiceExpression::new(1, 20)
                    .with_modifier(participant.dex_modifier)
                    .roll_with(Advantage::Normal, dice);
                participant.initiative = Some(roll.total);
            }
        }

        let mut order: Vec<&CombatParticipant> = self.participants.iter().collect();
        order.sort_by(|a, b| {
            b.initiative
                .cmp(&a.initiative)
                .then_with(|| b.dex_modifier.cmp(&a.dex_modifier))
        });

        let response = InitiativeRollResponse {
            ordered_participants: order
                .iter()
                .map(|p| InitiativeEntry {
                    participant_id: p.id,
                    name: p.name.clone(),
                    initiative: p.initiative.unwrap_or_default(),
                })
                .collect(),
        };
        self.initiative_order = order.iter().map(|p| p.id).collect();
        self.current_turn = 0;
        self.state = CombatState::InProgress;

        let first = self.initiative_order[0];
        if let Some(participant) = self.participant_mut(first) {
            participant.economy = ActionEconomy::fresh(participant.speed);
        }
        Ok(response)
    }

    /// Move to the next slot in initiative order, rolling the round over at
    /// the end of the order.
    pub fn advance_turn(&mut self) -> Result<TurnAdvance, CombatError> {
        if self.state != CombatState::InProgress || self.initiative_order.is_empty() {
            return Err(CombatError::InvalidState {
                operation: "advance the turn",
                state: self.state,
            });
        }

        self.current_turn += 1;
        let new_round = self.current_turn >= self.initiative_order.len();
        if new_round {
            self.current_turn = 0;
            self.current_round += 1;
        }

        let participant_id = self.initiative_order[self.current_turn];
        let expired_conditions = match self.participant_mut(participant_id) {
            Some(participant) => {
                participant.economy = ActionEconomy::fresh(participant.speed);
                participant.tick_conditions()
            }
            None => Vec::new(),
        };

        Ok(TurnAdvance {
            round: self.current_round,
            turn: self.current_turn,
            participant_id,
            new_round,
            expired_conditions,
        })
    }

    /// Advance until an active participant is up, visiting each slot at most once.
    pub fn advance_to_next_active(&mut self) -> Result<TurnAdvance, CombatError> {
        let mut advance = self.advance_turn()?;
        for _ in 1..self.initiative_order.len() {
            let active = self
                .participant(advance.participant_id)
                .is_some_and(|p| p.is_active);
            if active {
                break;
            }
            advance = self.advance_turn()?;
        }
        Ok(advance)
    }

    pub fn current_participant(&self) -> Option<&CombatParticipant> {
        if self.state != CombatState::InProgress {
            return None;
        }
        let id = self.initiative_order.get(self.current_turn)?;
        self.participant(*id)
    }

    pub fn participant(&self, id: ParticipantId) -> Option<&CombatParticipant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn participant_mut(&mut self, id: ParticipantId) -> Option<&mut CombatParticipant> {
        self.participants.iter_mut().find(|p| p.id == id)
    }

    /// Exact case-insensitive match first, then a substring match.
    pub fn find_by_name(&self, name: &str) -> Option<&CombatParticipant> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        self.participants
            .iter()
            .find(|p| p.name.to_lowercase() == needle)
            .or_else(|| {
                self.participants.iter().find(|p| {
                    let name = p.name.to_lowercase();
                    name.contains(&needle) || needle.contains(&name)
                })
            })
    }

    pub fn find_by_source(&self, source_id: &str) -> Option<&CombatParticipant> {
        self.participants
            .iter()
            .find(|p| p.source_id.as_deref() == Some(source_id))
    }

    pub fn active_participants(&self) -> impl Iterator<Item = &CombatParticipant> {
        self.participants.iter().filter(|p| p.is_active)
    }

    /// Temporary HP absorbs damage first; current HP stops at zero and the
    /// participant is eliminated there.
    pub fn apply_damage(&mut self, id: ParticipantId, amount: i32) -> Option<CombatActionResponse> {
        let state = self.state;
        let participant = self.participant_mut(id)?;
        if state.is_terminal() {
            return Some(CombatActionResponse::rejected(format!(
                "Combat is over; {} takes no damage",
                participant.name
            )));
        }

        let mut remaining = amount.max(0);
        let absorbed = participant.temporary_hp.min(remaining);
        participant.temporary_hp -= absorbed;
        remaining -= absorbed;

        let before = participant.current_hp;
        participant.current_hp = participant.current_hp.saturating_sub(remaining).max(0);
        let dealt = before - participant.current_hp;

        let was_active = participant.is_active;
        if participant.current_hp == 0 {
            participant.eliminate();
        }
        let eliminated = was_active && !participant.is_active;

        let mut response = CombatActionResponse::ok(if eliminated {
            format!("{} takes {} damage and falls", participant.name, amount.max(0))
        } else {
            format!(
                "{} takes {} damage ({}/{} HP)",
                participant.name,
                amount.max(0),
                participant.current_hp,
                participant.max_hp
            )
        });
        response.damage_dealt = Some(dealt + absorbed);
        response.participant_eliminated = eliminated;
        Some(response)
    }

    /// Eliminated participants cannot be healed.
    pub fn apply_healing(&mut self, id: ParticipantId, amount: i32) -> Option<CombatActionResponse> {
        let state = self.state;
        let participant = self.participant_mut(id)?;
        if state.is_terminal() {
            return Some(CombatActionResponse::rejected("Combat is over"));
        }
        if !participant.is_active {
            let mut response =
                CombatActionResponse::rejected(format!("{} is down and cannot be healed", participant.name));
            response.healing_done = Some(0);
            return Some(response);
        }

        let before = participant.current_hp;
        participant.current_hp = participant
            .current_hp
            .saturating_add(amount.max(0))
            .min(participant.max_hp);
        let healed = participant.current_hp - before;

        let mut response = CombatActionResponse::ok(format!(
            "{} regains {} HP ({}/{} HP)",
            participant.name, healed, participant.current_hp, participant.max_hp
        ));
        response.healing_done = Some(healed);
        Some(response)
    }

    /// Conditions are keyed by name; re-applying one replaces it.
    pub fn add_condition(
        &mut self,
        id: ParticipantId,
        mut condition: ActiveCondition,
    ) -> Option<CombatActionResponse> {
        let state = self.state;
        let round = self.current_round;
        let participant = self.participant_mut(id)?;
        if state.is_terminal() {
            return Some(CombatActionResponse::rejected("Combat is over"));
        }

        condition.applied_round = round;
        participant
            .conditions
            .retain(|c| !c.name.eq_ignore_ascii_case(&condition.name));
        let name = condition.name.clone();
        participant.conditions.push(condition);

        let mut response =
            CombatActionResponse::ok(format!("{} is now {}", participant.name, name));
        response.conditions_applied = vec![name];
        Some(response)
    }

    /// Returns whether a condition was removed.
    pub fn remove_condition(&mut self, id: ParticipantId, name: &str) -> Option<bool> {
        let participant = self.participant_mut(id)?;
        let before = participant.conditions.len();
        participant
            .conditions
            .retain(|c| !c.name.eq_ignore_ascii_case(name));
        Some(participant.conditions.len() != before)
    }

    /// Spend part of a participant's action economy. `Some(false)` if already spent.
    pub fn use_action(&mut self, id: ParticipantId, kind: ActionKind) -> Option<bool> {
        let participant = self.participant_mut(id)?;
        let economy = &mut participant.economy;
        let spent = match kind {
            ActionKind::Action => std::mem::replace(&mut economy.action, false),
            ActionKind::BonusAction => std::mem::replace(&mut economy.bonus_action, false),
            ActionKind::Reaction => std::mem::replace(&mut economy.reaction, false),
            ActionKind::Movement(feet) => {
                if economy.movement_remaining >= feet {
                    economy.movement_remaining -= feet;
                    true
                } else {
                    false
                }
            }
        };
        if spent && !matches!(kind, ActionKind::Movement(_)) {
            participant.actions_taken += 1;
        }
        Some(spent)
    }

    /// Record an attack that was resolved outside the encounter.
    pub fn apply_attack_result(
        &mut self,
        attacker: ParticipantId,
        target: ParticipantId,
        result: &AttackRollResult,
    ) -> Option<CombatActionResponse> {
        let attacker_name = self.participant(attacker)?.name.clone();
        let target_name = self.participant(target)?.name.clone();
        if self.state.is_terminal() {
            return Some(CombatActionResponse::rejected("Combat is over"));
        }

        self.use_action(attacker, ActionKind::Action);

        let mut response = if result.is_hit {
            self.apply_damage(target, result.damage())?
        } else {
            CombatActionResponse::ok(String::new())
        };
        response.description = format!("{attacker_name} attacks {target_name}: {}", result.summary());
        if response.participant_eliminated {
            response.description.push_str(&format!(". {target_name} falls"));
        }

        self.log_action(
            Some(&attacker_name),
            response.description.clone(),
            serde_json::json!({
                "target": target_name,
                "attack_total": result.attack_roll.total,
                "natural": result.natural_roll,
                "hit": result.is_hit,
                "critical": result.is_critical,
                "damage": result.damage(),
            }),
        );
        Some(response)
    }

    /// Set a participant's HP from an outside source. Never revives.
    pub fn sync_hit_points(&mut self, id: ParticipantId, current_hp: i32) -> Option<bool> {
        let participant = self.participant_mut(id)?;
        if !participant.is_active {
            return Some(false);
        }
        let clamped = current_hp.clamp(0, participant.max_hp);
        let changed = clamped != participant.current_hp;
        participant.current_hp = clamped;
        if clamped == 0 {
            participant.eliminate();
        }
        Some(changed)
    }

    pub fn end_combat(
        &mut self,
        outcome: CombatOutcome,
        xp_awarded: u32,
        loot: Vec<String>,
    ) -> Result<(), CombatError> {
        if self.state.is_terminal() {
            return Err(CombatError::InvalidState {
                operation: "end combat",
                state: self.state,
            });
        }
        self.state = outcome.into();
        self.ended_at = Some(Utc::now());
        self.rewards = Some(CombatRewards {
            xp: xp_awarded,
            loot,
        });
        Ok(())
    }

    /// All enemies down is a victory, all characters down a defeat.
    pub fn check_outcome(&self) -> Option<CombatOutcome> {
        let side_down = |kind: ParticipantKind| {
            let mut side = self.participants.iter().filter(|p| p.kind == kind).peekable();
            side.peek().is_some() && side.all(|p| !p.is_active)
        };
        if side_down(ParticipantKind::Character) {
            Some(CombatOutcome::Defeat)
        } else if side_down(ParticipantKind::Enemy) {
            Some(CombatOutcome::Victory)
        } else {
            None
        }
    }

    /// XP for every defeated enemy plus loot rolled from their tables.
    pub fn victory_rewards<D: DiceSource + ?Sized>(&self, dice: &mut D) -> CombatRewards {
        let defeated = self
            .participants
            .iter()
            .filter(|p| p.is_enemy() && !p.is_active);

        let mut rewards = CombatRewards::default();
        for enemy in defeated {
            rewards.xp = rewards.xp.saturating_add(enemy.xp_value);
            rewards.loot.extend(roll_loot(&enemy.loot_table, dice));
        }
        rewards
    }

    pub fn log_action(
        &mut self,
        actor: Option<&str>,
        description: impl Into<String>,
        data: serde_json::Value,
    ) -> &LoggedAction {
        self.log.push(LoggedAction {
            round: self.current_round,
            turn: self.current_turn,
            actor: actor.map(str::to_string),
            description: description.into(),
            data,
            timestamp: Utc::now(),
        });
        &self.log[self.log.len() - 1]
    }

    pub fn log(&self) -> &[LoggedAction] {
        &self.log
    }

    /// Compact state description for narration context.
    pub fn ai_summary(&self) -> String {
        let mut lines = vec![format!(
            "Combat {} (round {})",
            self.state, self.current_round
        )];
        if let Some(current) = self.current_participant() {
            lines.push(format!("Current turn: {}", current.name));
        }

        let ordered: Vec<&CombatParticipant> = if self.initiative_order.is_empty() {
            self.participants.iter().collect()
        } else {
            self.initiative_order
                .iter()
                .filter_map(|id| self.participant(*id))
                .collect()
        };
        for p in ordered {
            let mut line = format!(
                "- {} [{}] HP {}/{} AC {}",
                p.name,
                match p.kind {
                    ParticipantKind::Character => "PC",
                    ParticipantKind::Enemy => "enemy",
                },
                p.current_hp,
                p.max_hp,
                p.armor_class
            );
            if !p.is_active {
                line.push_str(" (down)");
            }
            if !p.conditions.is_empty() {
                let names: Vec<&str> = p.conditions.iter().map(|c| c.name.as_str()).collect();
                line.push_str(&format!(" conditions: {}", names.join(", ")));
            }
            lines.push(line);
        }

        for entry in self.log.iter().rev().take(3).collect::<Vec<_>>().into_iter().rev() {
            lines.push(format!("Recent: {}", entry.description));
        }
        lines.join("\n")
    }
}
