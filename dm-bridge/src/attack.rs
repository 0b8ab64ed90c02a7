//! Attack, damage and critical-hit resolution.
//!
//! Outcomes are computed here and pushed into an encounter by the caller;
//! the combat state machine never rolls on its own.

use crate::dice::{Advantage, DiceError, DiceExpression, DiceRollResult, DiceSource};
use serde::{Deserialize, Serialize};

/// Natural d20 face that crits by default.
pub const DEFAULT_CRITICAL_RANGE: u32 = 20;

/// Result of a resolved attack.
///
/// `damage_roll` is present exactly when the attack hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackRollResult {
    pub attack_roll: DiceRollResult,
    pub damage_roll: Option<DiceRollResult>,
    pub is_hit: bool,
    pub is_critical: bool,
    pub target_ac: i32,
    /// Raw d20 face after advantage selection.
    pub natural_roll: u32,
}

impl AttackRollResult {
    /// Damage dealt, zero on a miss.
    pub fn damage(&self) -> i32 {
        self.damage_roll
            .as_ref()
            .map(|roll| roll.total.max(0))
            .unwrap_or(0)
    }

    pub fn summary(&self) -> String {
        let verdict = match (self.is_hit, self.is_critical) {
            (true, true) => "critical hit",
            (true, false) => "hit",
            (false, _) => "miss",
        };
        match &self.damage_roll {
            Some(damage) => format!(
                "{} vs AC {}: {} for {} damage",
                self.attack_roll.total,
                self.target_ac,
                verdict,
                damage.total.max(0)
            ),
            None => format!(
                "{} vs AC {}: {}",
                self.attack_roll.total, self.target_ac, verdict
            ),
        }
    }
}

/// A weapon or spell attack ready to be rolled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attack {
    pub attack_bonus: i32,
    pub damage: DiceExpression,
    pub advantage: Advantage,
    pub critical_range: u32,
}

impl Attack {
    /// Parse the damage notation up front so a bad weapon fails before rolling.
    pub fn new(attack_bonus: i32, damage_notation: &str) -> Result<Self, DiceError> {
        Ok(Self {
            attack_bonus,
            damage: DiceExpression::parse(damage_notation)?,
            advantage: Advantage::Normal,
            critical_range: DEFAULT_CRITICAL_RANGE,
        })
    }

    pub fn with_advantage(mut self, advantage: Advantage) -> Self {
        self.advantage = advantage;
        self
    }

    /// Lowest natural face that counts as a critical (e.g. 19 for an improved critical).
    pub fn with_critical_range(mut self, critical_range: u32) -> Self {
        self.critical_range = critical_range;
        self
    }

    /// Resolve against `target_ac` with the thread-local RNG.
    pub fn resolve(&self, target_ac: i32) -> AttackRollResult {
        self.resolve_with(target_ac, &mut rand::thread_rng())
    }

    /// Resolve using a specific dice source.
    pub fn resolve_with<D: DiceSource + ?Sized>(
        &self,
        target_ac: i32,
        dice: &mut D,
    ) -> AttackRollResult {
        let attack_roll = DiceExpression::new(1, 20)
            .with_modifier(self.attack_bonus)
            .roll_with(self.advantage, dice);

        let natural_roll = attack_roll.natural().unwrap_or(0);
        // Decided on the raw face, never on the modified total.
        let is_critical = natural_roll >= self.critical_range;
        let is_hit = attack_roll.total >= target_ac || is_critical;

        let damage_roll = is_hit.then(|| {
            let first = self.damage.roll_with(Advantage::Normal, dice);
            if is_critical {
                let extra = self.damage.dice_only().roll_with(Advantage::Normal, dice);
                DiceRollResult::combined(&first, &extra, self.damage.modifier)
            } else {
                first
            }
        });

        AttackRollResult {
            attack_roll,
            damage_roll,
            is_hit,
            is_critical,
            target_ac,
            natural_roll,
        }
    }
}

/// Resolve one attack roll and its damage.
///
/// A malformed `damage_notation` is rejected before any dice are rolled.
pub fn resolve_attack(
    attack_bonus: i32,
    damage_notation: &str,
    target_ac: i32,
    advantage: Advantage,
    critical_range: u32,
) -> Result<AttackRollResult, DiceError> {
    Ok(Attack::new(attack_bonus, damage_notation)?
        .with_advantage(advantage)
        .with_critical_range(critical_range)
        .resolve(target_ac))
}
