//! Entities owned by the surrounding game: player characters and enemy templates.
//!
//! The bridge reads and updates these but never defines how they are stored.

use crate::dice::{Advantage, DiceExpression, DiceSource, DieType};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacterId(pub Uuid);

impl CharacterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CharacterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a play session, issued by the surrounding application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

// ============================================================================
// Ability Scores
// ============================================================================

/// The six ability scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ability {
    Strength,
    Dexterity,
    Constitution,
    Intelligence,
    Wisdom,
    Charisma,
}

/// Ability scores container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityScores {
    pub strength: u8,
    pub dexterity: u8,
    pub constitution: u8,
    pub intelligence: u8,
    pub wisdom: u8,
    pub charisma: u8,
}

impl AbilityScores {
    pub fn new(str: u8, dex: u8, con: u8, int: u8, wis: u8, cha: u8) -> Self {
        Self {
            strength: str,
            dexterity: dex,
            constitution: con,
            intelligence: int,
            wisdom: wis,
            charisma: cha,
        }
    }

    pub fn standard_array() -> Self {
        Self::new(15, 14, 13, 12, 10, 8)
    }

    pub fn get(&self, ability: Ability) -> u8 {
        match ability {
            Ability::Strength => self.strength,
            Ability::Dexterity => self.dexterity,
            Ability::Constitution => self.constitution,
            Ability::Intelligence => self.intelligence,
            Ability::Wisdom => self.wisdom,
            Ability::Charisma => self.charisma,
        }
    }

    /// Score 8-9 = -1, 10-11 = 0, 12-13 = +1, etc.
    pub fn modifier(&self, ability: Ability) -> i32 {
        (self.get(ability) as i32 - 10).div_euclid(2)
    }
}

impl Default for AbilityScores {
    fn default() -> Self {
        Self::new(10, 10, 10, 10, 10, 10)
    }
}

// ============================================================================
// Hit Points
// ============================================================================

/// Hit points tracking. `current` stays within `0..=maximum`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitPoints {
    pub current: i32,
    pub maximum: i32,
    pub temporary: i32,
}

impl HitPoints {
    pub fn new(maximum: i32) -> Self {
        let maximum = maximum.max(1);
        Self {
            current: maximum,
            maximum,
            temporary: 0,
        }
    }

    /// Temporary hit points soak damage first. Returns damage taken from `current`.
    pub fn take_damage(&mut self, amount: i32) -> i32 {
        let mut remaining = amount.max(0);

        let absorbed = self.temporary.min(remaining);
        self.temporary -= absorbed;
        remaining -= absorbed;

        let before = self.current;
        self.current = self.current.saturating_sub(remaining).max(0);
        before - self.current
    }

    /// Returns the amount actually restored.
    pub fn heal(&mut self, amount: i32) -> i32 {
        let old = self.current;
        self.current = self.current.saturating_add(amount.max(0)).min(self.maximum);
        self.current - old
    }

    /// Set current hit points, clamped to the valid range.
    pub fn set_current(&mut self, value: i32) {
        self.current = value.clamp(0, self.maximum);
    }

    pub fn add_temp_hp(&mut self, amount: i32) {
        self.temporary = self.temporary.max(amount);
    }

    pub fn is_unconscious(&self) -> bool {
        self.current <= 0
    }
}

// ============================================================================
// Characters
// ============================================================================

/// A player character as seen by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub id: CharacterId,
    pub name: String,
    pub level: u8,
    pub hit_points: HitPoints,
    pub armor_class: i32,
    pub ability_scores: AbilityScores,
    pub hit_die: DieType,
    pub speed: u32,
    pub location: String,
    pub experience: u32,
    pub conditions: Vec<String>,
}

impl Character {
    pub fn new(name: impl Into<String>, max_hp: i32, armor_class: i32) -> Self {
        Self {
            id: CharacterId::new(),
            name: name.into(),
            level: 1,
            hit_points: HitPoints::new(max_hp),
            armor_class,
            ability_scores: AbilityScores::default(),
            hit_die: DieType::D8,
            speed: 30,
            location: String::from("Unknown"),
            experience: 0,
            conditions: Vec::new(),
        }
    }

    pub fn with_ability_scores(mut self, scores: AbilityScores) -> Self {
        self.ability_scores = scores;
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_level(mut self, level: u8) -> Self {
        self.level = level.max(1);
        self
    }

    pub fn dex_modifier(&self) -> i32 {
        self.ability_scores.modifier(Ability::Dexterity)
    }

    pub fn is_conscious(&self) -> bool {
        !self.hit_points.is_unconscious()
    }

    pub fn has_condition(&self, name: &str) -> bool {
        self.conditions.iter().any(|c| c.eq_ignore_ascii_case(name))
    }
}

/// A level 1 fighter for demos and tests.
pub fn create_sample_fighter(name: &str) -> Character {
    let mut character = Character::new(name, 12, 16)
        .with_ability_scores(AbilityScores::new(16, 14, 14, 10, 12, 8))
        .with_location("The Prancing Pony");
    character.hit_die = DieType::D10;
    character
}

// ============================================================================
// Enemy Templates
// ============================================================================

/// One attack an enemy can make.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnemyAttack {
    pub name: String,
    pub attack_bonus: i32,
    pub damage: String,
}

impl EnemyAttack {
    pub fn new(name: impl Into<String>, attack_bonus: i32, damage: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attack_bonus,
            damage: damage.into(),
        }
    }
}

/// An item that may drop, with its percentage chance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LootEntry {
    pub item: String,
    pub chance: u32,
}

/// Stat block an encounter instantiates enemies from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnemyTemplate {
    pub name: String,
    pub max_hp: i32,
    pub armor_class: i32,
    pub dex_modifier: i32,
    pub attacks: Vec<EnemyAttack>,
    pub xp_value: u32,
    pub loot_table: Vec<LootEntry>,
}

impl EnemyTemplate {
    pub fn new(name: impl Into<String>, max_hp: i32, armor_class: i32) -> Self {
        Self {
            name: name.into(),
            max_hp,
            armor_class,
            dex_modifier: 0,
            attacks: Vec::new(),
            xp_value: 0,
            loot_table: Vec::new(),
        }
    }

    pub fn with_dex_modifier(mut self, dex_modifier: i32) -> Self {
        self.dex_modifier = dex_modifier;
        self
    }

    pub fn with_attack(mut self, attack: EnemyAttack) -> Self {
        self.attacks.push(attack);
        self
    }

    pub fn with_xp(mut self, xp_value: u32) -> Self {
        self.xp_value = xp_value;
        self
    }

    pub fn with_loot(mut self, item: impl Into<String>, chance: u32) -> Self {
        self.loot_table.push(LootEntry {
            item: item.into(),
            chance: chance.min(100),
        });
        self
    }

    /// Stand-in for enemies the narration names but no template exists for.
    pub fn generic(name: impl Into<String>) -> Self {
        Self::new(name, 10, 12)
            .with_dex_modifier(1)
            .with_attack(EnemyAttack::new("Strike", 3, "1d6+1"))
            .with_xp(25)
    }

    pub fn goblin() -> Self {
        Self::new("Goblin", 7, 15)
            .with_dex_modifier(2)
            .with_attack(EnemyAttack::new("Scimitar", 4, "1d6+2"))
            .with_attack(EnemyAttack::new("Shortbow", 4, "1d6+2"))
            .with_xp(50)
            .with_loot("Scimitar", 25)
            .with_loot("Pouch of copper", 60)
    }
}

/// Roll percentile dice against each loot entry; returns the items that drop.
pub fn roll_loot<D: DiceSource + ?Sized>(loot_table: &[LootEntry], dice: &mut D) -> Vec<String> {
    let percentile = DiceExpression::new(1, 100);
    loot_table
        .iter()
        .filter(|entry| {
            i64::from(percentile.roll_with(Advantage::Normal, dice).total) <= i64::from(entry.chance)
        })
        .map(|entry| entry.item.clone())
        .collect()
}
