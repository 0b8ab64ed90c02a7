//! Typed events mined from narration.

use serde::{Deserialize, Serialize};

/// Property name used for hit point deltas.
pub const HP_PROPERTY: &str = "current_hp";

// ============================================================================
// Actions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Attack,
    Move,
    Cast,
    Talk,
    Search,
    PickUp,
    Other,
}

impl ActionType {
    /// Map a free-form label (`"attack"`, `"pick up"`, `"speak"`) to a type.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_lowercase().replace(['_', '-'], " ");
        match label.as_str() {
            "attack" | "strike" | "hit" | "melee" | "ranged" => ActionType::Attack,
            "move" | "movement" | "walk" | "run" | "travel" => ActionType::Move,
            "cast" | "spell" | "use" | "use item" => ActionType::Cast,
            "talk" | "speak" | "dialogue" | "persuade" => ActionType::Talk,
            "search" | "examine" | "investigate" | "perception" => ActionType::Search,
            "pick up" | "pickup" | "take" | "loot" | "grab" => ActionType::PickUp,
            _ => ActionType::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action_type: ActionType,
    pub description: String,
    pub target: Option<String>,
}

impl ActionRecord {
    pub fn new(action_type: ActionType, description: impl Into<String>) -> Self {
        Self {
            action_type,
            description: description.into(),
            target: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

// ============================================================================
// State changes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Character,
    Enemy,
    Npc,
    Location,
    Item,
    World,
}

impl EntityType {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "character" | "player" | "pc" | "you" | "hero" => Some(EntityType::Character),
            "enemy" | "monster" | "foe" => Some(EntityType::Enemy),
            "npc" => Some(EntityType::Npc),
            "location" | "area" | "room" => Some(EntityType::Location),
            "item" | "object" => Some(EntityType::Item),
            "world" | "story" | "quest" => Some(EntityType::World),
            _ => None,
        }
    }
}

/// A typed value carried by a state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Integer(i64),
    Flag(bool),
    Text(String),
}

impl StateValue {
    /// Integers and booleans are recognised; everything else stays text.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim().trim_matches('"');
        if let Ok(n) = raw.parse::<i64>() {
            return StateValue::Integer(n);
        }
        match raw.to_ascii_lowercase().as_str() {
            "true" | "yes" => StateValue::Flag(true),
            "false" | "no" => StateValue::Flag(false),
            _ => StateValue::Text(raw.to_string()),
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            StateValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            StateValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// A delta that has not been applied yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub entity_type: EntityType,
    pub entity_id: Option<String>,
    pub property_name: String,
    pub old_value: Option<StateValue>,
    pub new_value: Option<StateValue>,
    pub change_amount: Option<i32>,
}

impl StateChange {
    pub fn hp_delta(entity_type: EntityType, entity_id: Option<String>, amount: i32) -> Self {
        Self {
            entity_type,
            entity_id,
            property_name: HP_PROPERTY.to_string(),
            old_value: None,
            new_value: None,
            change_amount: Some(amount),
        }
    }

    pub fn location(
        entity_type: EntityType,
        entity_id: Option<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            entity_type,
            entity_id,
            property_name: "location".to_string(),
            old_value: None,
            new_value: Some(StateValue::Text(destination.into())),
            change_amount: None,
        }
    }

    pub fn is_hp_change(&self) -> bool {
        self.property_name == HP_PROPERTY
    }

    /// Signed HP delta, derived from old/new values when no amount was given.
    pub fn hp_amount(&self) -> Option<i32> {
        if !self.is_hp_change() {
            return None;
        }
        self.change_amount.or_else(|| {
            let old = self.old_value.as_ref()?.as_integer()?;
            let new = self.new_value.as_ref()?.as_integer()?;
            Some(clamp_delta(old, new))
        })
    }
}

/// Canonical property name for the many ways narration spells them.
/// `new - old` saturated into `-i32::MAX..=i32::MAX`.
pub(crate) fn clamp_delta(old: i64, new: i64) -> i32 {
    let limit = i64::from(i32::MAX);
    new.saturating_sub(old).clamp(-limit, limit) as i32
}

pub fn normalize_property(name: &str) -> String {
    let name = name.trim().to_lowercase().replace([' ', '-'], "_");
    match name.as_str() {
        "hp" | "hit_points" | "health" | "current_hp" | "hitpoints" => HP_PROPERTY.to_string(),
        "max_hp" | "maximum_hp" | "max_hit_points" => "max_hp".to_string(),
        "xp" | "experience" | "exp" => "experience".to_string(),
        "ac" | "armor_class" => "armor_class".to_string(),
        "location" | "position" | "place" => "location".to_string(),
        _ => name,
    }
}

// ============================================================================
// Dice requirements
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollPurpose {
    AttackRoll,
    Damage,
    SavingThrow,
    AbilityCheck,
    Initiative,
    Unknown,
}

impl RollPurpose {
    pub fn label(&self) -> &'static str {
        match self {
            RollPurpose::AttackRoll => "attack roll",
            RollPurpose::Damage => "damage",
            RollPurpose::SavingThrow => "saving throw",
            RollPurpose::AbilityCheck => "ability check",
            RollPurpose::Initiative => "initiative",
            RollPurpose::Unknown => "unknown",
        }
    }
}

/// A roll the narration asks the player to make.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceRequirement {
    pub expression: String,
    pub modifier: i32,
    pub purpose: RollPurpose,
    pub dc: Option<i32>,
    pub skill: Option<String>,
    /// Inferred from "make a ... check" phrasing rather than written dice.
    pub implicit: bool,
}

impl DiceRequirement {
    pub fn new(expression: impl Into<String>, modifier: i32, purpose: RollPurpose) -> Self {
        Self {
            expression: expression.into(),
            modifier,
            purpose,
            dc: None,
            skill: None,
            implicit: false,
        }
    }
}

// ============================================================================
// Combat events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombatEventType {
    Attack,
    Damage,
    Heal,
    StatusEffect,
    Initiative,
    CombatInitiated,
}

impl CombatEventType {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "attack" => Some(CombatEventType::Attack),
            "damage" => Some(CombatEventType::Damage),
            "heal" | "healing" => Some(CombatEventType::Heal),
            "status" | "status_effect" | "condition" => Some(CombatEventType::StatusEffect),
            "initiative" => Some(CombatEventType::Initiative),
            "combat_initiated" | "combat_start" | "combat_begins" => {
                Some(CombatEventType::CombatInitiated)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageType {
    Slashing,
    Piercing,
    Bludgeoning,
    Fire,
    Cold,
    Lightning,
    Poison,
    Acid,
    Psychic,
    Necrotic,
    Radiant,
    Force,
}

impl DamageType {
    /// Only the fixed vocabulary is accepted.
    pub fn from_word(word: &str) -> Option<Self> {
        match word.trim().to_lowercase().as_str() {
            "slashing" => Some(DamageType::Slashing),
            "piercing" => Some(DamageType::Piercing),
            "bludgeoning" => Some(DamageType::Bludgeoning),
            "fire" => Some(DamageType::Fire),
            "cold" => Some(DamageType::Cold),
            "lightning" => Some(DamageType::Lightning),
            "poison" => Some(DamageType::Poison),
            "acid" => Some(DamageType::Acid),
            "psychic" => Some(DamageType::Psychic),
            "necrotic" => Some(DamageType::Necrotic),
            "radiant" => Some(DamageType::Radiant),
            "force" => Some(DamageType::Force),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatEvent {
    pub event_type: CombatEventType,
    pub attacker: Option<String>,
    pub target: Option<String>,
    pub damage_amount: Option<i32>,
    pub damage_type: Option<DamageType>,
    pub healing_amount: Option<i32>,
    pub status_effect: Option<String>,
    pub duration: Option<u32>,
}

impl CombatEvent {
    pub fn new(event_type: CombatEventType) -> Self {
        Self {
            event_type,
            attacker: None,
            target: None,
            damage_amount: None,
            damage_type: None,
            healing_amount: None,
            status_effect: None,
            duration: None,
        }
    }

    pub fn combat_initiated() -> Self {
        Self::new(CombatEventType::CombatInitiated)
    }

    pub fn attack(attacker: Option<String>, target: Option<String>) -> Self {
        Self {
            attacker,
            target,
            ..Self::new(CombatEventType::Attack)
        }
    }

    pub fn damage(target: Option<String>, amount: i32, damage_type: Option<DamageType>) -> Self {
        Self {
            target,
            damage_amount: Some(amount),
            damage_type,
            ..Self::new(CombatEventType::Damage)
        }
    }

    pub fn heal(target: Option<String>, amount: i32) -> Self {
        Self {
            target,
            healing_amount: Some(amount),
            ..Self::new(CombatEventType::Heal)
        }
    }

    pub fn status(target: Option<String>, effect: impl Into<String>, duration: Option<u32>) -> Self {
        Self {
            target,
            status_effect: Some(effect.into()),
            duration,
            ..Self::new(CombatEventType::StatusEffect)
        }
    }
}

// ============================================================================
// Story events
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryEventType {
    Discovery,
    Decision,
    NewObjective,
    CompletedObjective,
    Other(String),
}

impl StoryEventType {
    pub fn from_label(label: &str) -> Self {
        let normalized = label.trim().to_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "discovery" | "discover" => StoryEventType::Discovery,
            "decision" | "choice" => StoryEventType::Decision,
            "new_objective" | "objective" | "quest" => StoryEventType::NewObjective,
            "completed_objective" | "objective_completed" | "quest_completed" => {
                StoryEventType::CompletedObjective
            }
            _ => StoryEventType::Other(normalized),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryEvent {
    pub event_type: StoryEventType,
    pub description: String,
    pub consequences: Vec<String>,
    pub new_objective: Option<String>,
    pub completed_objective: Option<String>,
}

impl StoryEvent {
    pub fn new(event_type: StoryEventType, description: impl Into<String>) -> Self {
        let description = description.into();
        let (new_objective, completed_objective) = match event_type {
            StoryEventType::NewObjective => (Some(description.clone()), None),
            StoryEventType::CompletedObjective => (None, Some(description.clone())),
            _ => (None, None),
        };
        Self {
            event_type,
            description,
            consequences: Vec::new(),
            new_objective,
            completed_objective,
        }
    }
}

// ============================================================================
// Aggregate
// ============================================================================

/// Everything extracted from one narration. Built once, never mutated after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedResponse {
    pub narrative_text: String,
    pub actions: Vec<ActionRecord>,
    pub state_changes: Vec<StateChange>,
    pub dice_rolls: Vec<DiceRequirement>,
    pub combat_events: Vec<CombatEvent>,
    pub story_events: Vec<StoryEvent>,
    pub confidence_score: f32,
    pub parsing_errors: Vec<String>,
}

impl ParsedResponse {
    /// A response carrying only the raw text, used when extraction fails.
    pub fn degraded(text: &str, confidence: f32, error: impl Into<String>) -> Self {
        Self {
            narrative_text: text.to_string(),
            actions: Vec::new(),
            state_changes: Vec::new(),
            dice_rolls: Vec::new(),
            combat_events: Vec::new(),
            story_events: Vec::new(),
            confidence_score: confidence,
            parsing_errors: vec![error.into()],
        }
    }

    pub fn total_events(&self) -> usize {
        self.actions.len()
            + self.state_changes.len()
            + self.dice_rolls.len()
            + self.combat_events.len()
            + self.story_events.len()
    }

    pub fn has_combat_initiation(&self) -> bool {
        self.combat_events
            .iter()
            .any(|e| e.event_type == CombatEventType::CombatInitiated)
    }

    pub fn requires_dice(&self) -> bool {
        !self.dice_rolls.is_empty()
    }

    /// Net HP delta across all HP state changes, saturating.
    pub fn net_hp_change(&self) -> i32 {
        self.state_changes
            .iter()
            .filter_map(StateChange::hp_amount)
            .fold(0i32, i32::saturating_add)
    }
}

/// Optional knowledge that sharpens subject resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseContext {
    pub character_name: Option<String>,
    pub character_id: Option<String>,
    pub enemy_names: Vec<String>,
}

impl ParseContext {
    pub fn for_character(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            character_name: Some(name.into()),
            character_id: Some(id.into()),
            enemy_names: Vec::new(),
        }
    }

    pub fn with_enemies<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enemy_names.extend(names.into_iter().map(Into::into));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParsingQuality {
    Good,
    Fair,
    Poor,
}

/// Compact view of a parse for routing decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickSummary {
    pub has_combat: bool,
    pub has_state_changes: bool,
    pub requires_dice_rolls: bool,
    pub story_progression: bool,
    pub hp_changes: i32,
    pub parsing_quality: ParsingQuality,
}
