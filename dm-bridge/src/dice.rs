//! Dice notation engine.
//!
//! Grammar (case-insensitive): `[N]dM[(+|-)K][khX|klX|dhX|dlX]`.
//! `N` defaults to 1, so `d20` is `1d20`. The same token is used by the
//! narrative extractor to recognise dice in free text, so the two can never
//! disagree about what counts as notation.

use rand::Rng;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

/// Unanchored dice token. Groups: count, sides, sign, modifier, keep/drop op, keep/drop count.
pub(crate) const DICE_TOKEN: &str = r"(\d*)d(\d+)(?:\s*([+-])\s*(\d+))?(?:(kh|kl|dh|dl)(\d+))?";

/// Upper bound on dice in a single expression.
pub const MAX_DICE: u32 = 1000;

/// Largest die accepted by the notation.
pub const MAX_SIDES: u32 = 1000;

/// Largest flat modifier accepted by the notation, either sign.
pub const MAX_MODIFIER: i32 = 1000;

static NOTATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)^{DICE_TOKEN}$")).expect("valid regex"));

/// Dice notation embedded in prose, bounded by word boundaries.
pub(crate) static DICE_IN_TEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)\b{DICE_TOKEN}\b")).expect("valid regex"));

/// Error type for dice parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiceError {
    #[error("Malformed dice notation: {0:?}")]
    MalformedNotation(String),
    #[error("Invalid die size: {0}")]
    InvalidDieSize(u32),
    #[error("Modifier out of range in {notation:?} (max {max})")]
    ModifierOutOfRange { notation: String, max: i32 },
    #[error("No dice specified in {0:?}")]
    NoDice(String),
    #[error("Too many dice: {count} (max {max})")]
    TooManyDice { count: u32, max: u32 },
    #[error("Cannot keep or drop {amount} dice when only rolling {count} (in {notation})")]
    InvalidKeepCount {
        amount: u32,
        count: u32,
        notation: String,
    },
}

// ============================================================================
// Dice sources
// ============================================================================

/// Anything that can produce a die face in `1..=sides`.
///
/// Every `rand::Rng` is a dice source; tests use scripted faces instead.
pub trait DiceSource {
    fn roll_die(&mut self, sides: u32) -> u32;
}

impl<R: Rng + ?Sized> DiceSource for R {
    fn roll_die(&mut self, sides: u32) -> u32 {
        self.gen_range(1..=sides.max(1))
    }
}

// ============================================================================
// Advantage and die types
// ============================================================================

/// Advantage state for single-die rolls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Advantage {
    #[default]
    Normal,
    Advantage,
    Disadvantage,
}

impl Advantage {
    /// Combine two advantage states (advantage + disadvantage = normal).
    pub fn combine(self, other: Advantage) -> Advantage {
        match (self, other) {
            (Advantage::Normal, x) | (x, Advantage::Normal) => x,
            (Advantage::Advantage, Advantage::Disadvantage)
            | (Advantage::Disadvantage, Advantage::Advantage) => Advantage::Normal,
            (Advantage::Advantage, Advantage::Advantage) => Advantage::Advantage,
            (Advantage::Disadvantage, Advantage::Disadvantage) => Advantage::Disadvantage,
        }
    }
}

/// Die sizes allowed in gameplay-bound rolls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DieType {
    D4,
    D6,
    D8,
    D10,
    D12,
    D20,
    D100,
}

impl DieType {
    pub fn sides(&self) -> u32 {
        match self {
            DieType::D4 => 4,
            DieType::D6 => 6,
            DieType::D8 => 8,
            DieType::D10 => 10,
            DieType::D12 => 12,
            DieType::D20 => 20,
            DieType::D100 => 100,
        }
    }

    pub fn from_sides(sides: u32) -> Option<DieType> {
        match sides {
            4 => Some(DieType::D4),
            6 => Some(DieType::D6),
            8 => Some(DieType::D8),
            10 => Some(DieType::D10),
            12 => Some(DieType::D12),
            20 => Some(DieType::D20),
            100 => Some(DieType::D100),
            _ => None,
        }
    }
}

impl fmt::Display for DieType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.sides())
    }
}

// ============================================================================
// Expressions
// ============================================================================

/// Keep/drop suffix of a dice expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeepDrop {
    KeepHighest(u32),
    KeepLowest(u32),
    DropHighest(u32),
    DropLowest(u32),
}

impl KeepDrop {
    fn amount(&self) -> u32 {
        match *self {
            KeepDrop::KeepHighest(x)
            | KeepDrop::KeepLowest(x)
            | KeepDrop::DropHighest(x)
            | KeepDrop::DropLowest(x) => x,
        }
    }

    /// How many of `count` dice survive.
    pub fn kept_count(&self, count: u32) -> u32 {
        match *self {
            KeepDrop::KeepHighest(x) | KeepDrop::KeepLowest(x) => x.min(count),
            KeepDrop::DropHighest(x) | KeepDrop::DropLowest(x) => count.saturating_sub(x),
        }
    }

    /// Mark which rolls survive. Ties go to the earlier roll.
    fn select(&self, rolls: &[u32]) -> Vec<bool> {
        let keep = self.kept_count(rolls.len() as u32) as usize;
        let prefer_high = matches!(self, KeepDrop::KeepHighest(_) | KeepDrop::DropLowest(_));

        let mut order: Vec<usize> = (0..rolls.len()).collect();
        if prefer_high {
            order.sort_by(|&a, &b| rolls[b].cmp(&rolls[a]));
        } else {
            order.sort_by(|&a, &b| rolls[a].cmp(&rolls[b]));
        }

        let mut kept = vec![false; rolls.len()];
        for &index in order.iter().take(keep) {
            kept[index] = true;
        }
        kept
    }

    fn suffix(&self) -> String {
        match *self {
            KeepDrop::KeepHighest(x) => format!("kh{x}"),
            KeepDrop::KeepLowest(x) => format!("kl{x}"),
            KeepDrop::DropHighest(x) => format!("dh{x}"),
            KeepDrop::DropLowest(x) => format!("dl{x}"),
        }
    }
}

/// A parsed dice expression (e.g., `2d6+3`, `4d6kh3`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceExpression {
    pub count: u32,
    pub sides: u32,
    pub modifier: i32,
    pub keep_drop: Option<KeepDrop>,
}

impl DiceExpression {
    /// Build an expression without validation beyond the basics.
    pub fn new(count: u32, sides: u32) -> Self {
        Self {
            count: count.max(1),
            sides: sides.max(1),
            modifier: 0,
            keep_drop: None,
        }
    }

    pub fn with_modifier(mut self, modifier: i32) -> Self {
        self.modifier = modifier;
        self
    }

    pub fn with_keep_drop(mut self, keep_drop: KeepDrop) -> Self {
        self.keep_drop = Some(keep_drop);
        self
    }

    /// Parse dice notation. Anything outside the grammar is an error.
    pub fn parse(notation: &str) -> Result<Self, DiceError> {
        let trimmed = notation.trim();
        let caps = NOTATION_RE
            .captures(trimmed)
            .ok_or_else(|| DiceError::MalformedNotation(notation.to_string()))?;

        let number = |index: usize| -> Result<Option<u32>, DiceError> {
            match caps.get(index).map(|m| m.as_str()).filter(|s| !s.is_empty()) {
                Some(digits) => digits
                    .parse::<u32>()
                    .map(Some)
                    .map_err(|_| DiceError::MalformedNotation(notation.to_string())),
                None => Ok(None),
            }
        };

        let count = number(1)?.unwrap_or(1);
        let sides = number(2)?.unwrap_or(0);

        if count == 0 {
            return Err(DiceError::NoDice(notation.to_string()));
        }
        if count > MAX_DICE {
            return Err(DiceError::TooManyDice {
                count,
                max: MAX_DICE,
            });
        }
        if sides == 0 || sides > MAX_SIDES {
            return Err(DiceError::InvalidDieSize(sides));
        }

        let out_of_range = || DiceError::ModifierOutOfRange {
            notation: notation.to_string(),
            max: MAX_MODIFIER,
        };
        let magnitude = match caps.get(4).map(|m| m.as_str()) {
            Some(digits) => digits
                .parse::<i32>()
                .ok()
                .filter(|m| *m <= MAX_MODIFIER)
                .ok_or_else(out_of_range)?,
            None => 0,
        };
        let modifier = match caps.get(3).map(|m| m.as_str()) {
            Some("-") => -magnitude,
            _ => magnitude,
        };

        let keep_drop = match (caps.get(5), number(6)?) {
            (Some(op), Some(amount)) => {
                let keep_drop = match op.as_str().to_ascii_lowercase().as_str() {
                    "kh" => KeepDrop::KeepHighest(amount),
                    "kl" => KeepDrop::KeepLowest(amount),
                    "dh" => KeepDrop::DropHighest(amount),
                    _ => KeepDrop::DropLowest(amount),
                };
                if keep_drop.amount() > count {
                    return Err(DiceError::InvalidKeepCount {
                        amount: keep_drop.amount(),
                        count,
                        notation: trimmed.to_string(),
                    });
                }
                Some(keep_drop)
            }
            _ => None,
        };

        Ok(Self {
            count,
            sides,
            modifier,
            keep_drop,
        })
    }

    /// Die type if the die size is one used in play.
    pub fn die_type(&self) -> Option<DieType> {
        DieType::from_sides(self.sides)
    }

    /// Whether this expression only uses standard gameplay dice.
    pub fn is_standard(&self) -> bool {
        self.die_type().is_some()
    }

    pub fn is_single_die(&self) -> bool {
        self.count == 1
    }

    /// The same dice without the flat modifier.
    pub fn dice_only(&self) -> Self {
        Self {
            modifier: 0,
            ..self.clone()
        }
    }

    fn kept_count(&self) -> u32 {
        self.keep_drop
            .map(|kd| kd.kept_count(self.count))
            .unwrap_or(self.count)
    }

    pub fn min_total(&self) -> i32 {
        saturate(i64::from(self.kept_count()) + i64::from(self.modifier))
    }

    pub fn max_total(&self) -> i32 {
        saturate(i64::from(self.kept_count()) * i64::from(self.sides) + i64::from(self.modifier))
    }

    /// Roll with the thread-local RNG.
    pub fn roll(&self, advantage: Advantage) -> DiceRollResult {
        self.roll_with(advantage, &mut rand::thread_rng())
    }

    /// Roll using a specific dice source (useful for testing).
    ///
    /// Advantage and disadvantage only apply to single-die expressions; the
    /// losing face lands in `dropped`.
    pub fn roll_with<D: DiceSource + ?Sized>(
        &self,
        advantage: Advantage,
        dice: &mut D,
    ) -> DiceRollResult {
        if self.is_single_die() && advantage != Advantage::Normal {
            let first = dice.roll_die(self.sides);
            let second = dice.roll_die(self.sides);
            let first_wins = match advantage {
                Advantage::Advantage => first >= second,
                _ => first <= second,
            };
            let (chosen, other) = if first_wins {
                (first, second)
            } else {
                (second, first)
            };
            return DiceRollResult::new(self, vec![chosen], vec![other], advantage);
        }

        let faces: Vec<u32> = (0..self.count).map(|_| dice.roll_die(self.sides)).collect();

        let Some(keep_drop) = self.keep_drop else {
            return DiceRollResult::new(self, faces, Vec::new(), Advantage::Normal);
        };

        let mask = keep_drop.select(&faces);
        let mut kept = Vec::new();
        let mut dropped = Vec::new();
        for (face, keep) in faces.into_iter().zip(mask) {
            if keep {
                kept.push(face);
            } else {
                dropped.push(face);
            }
        }
        DiceRollResult::new(self, kept, dropped, Advantage::Normal)
    }
}

impl FromStr for DiceExpression {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DiceExpression::parse(s)
    }
}

impl fmt::Display for DiceExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d{}", self.count, self.sides)?;
        if self.modifier > 0 {
            write!(f, "+{}", self.modifier)?;
        } else if self.modifier < 0 {
            write!(f, "-{}", self.modifier.unsigned_abs())?;
        }
        if let Some(keep_drop) = self.keep_drop {
            write!(f, "{}", keep_drop.suffix())?;
        }
        Ok(())
    }
}

// ============================================================================
// Results
// ============================================================================

/// Complete result of a dice roll.
///
/// `total` is always the sum of `rolls` plus `modifier`; `dropped` holds
/// faces discarded by keep/drop or by advantage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceRollResult {
    pub rolls: Vec<u32>,
    pub dropped: Vec<u32>,
    pub total: i32,
    pub modifier: i32,
    pub advantage: Advantage,
    pub notation: String,
    pub description: String,
}

impl DiceRollResult {
    fn new(
        expression: &DiceExpression,
        rolls: Vec<u32>,
        dropped: Vec<u32>,
        advantage: Advantage,
    ) -> Self {
        let mut result = Self {
            total: total_of(&rolls, expression.modifier),
            rolls,
            dropped,
            modifier: expression.modifier,
            advantage,
            notation: expression.to_string(),
            description: String::new(),
        };
        result.description = result.describe();
        result
    }

    /// Merge two rolls of the same dice, counting `modifier` once.
    pub(crate) fn combined(first: &DiceRollResult, extra: &DiceRollResult, modifier: i32) -> Self {
        let rolls: Vec<u32> = first.rolls.iter().chain(&extra.rolls).copied().collect();
        let dropped: Vec<u32> = first.dropped.iter().chain(&extra.dropped).copied().collect();
        let mut result = Self {
            total: total_of(&rolls, modifier),
            rolls,
            dropped,
            modifier,
            advantage: first.advantage,
            notation: first.notation.clone(),
            description: String::new(),
        };
        result.description = result.describe();
        result
    }

    /// Sum of the kept dice, without the modifier.
    pub fn dice_total(&self) -> i32 {
        self.total - self.modifier
    }

    /// The kept face of a single-die roll.
    pub fn natural(&self) -> Option<u32> {
        match self.rolls.as_slice() {
            [face] => Some(*face),
            _ => None,
        }
    }

    /// Check if the roll meets or exceeds a DC.
    pub fn meets_dc(&self, dc: i32) -> bool {
        self.total >= dc
    }

    fn describe(&self) -> String {
        let faces = |values: &[u32]| {
            values
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut text = format!("{}: [{}]", self.notation, faces(&self.rolls));
        if !self.dropped.is_empty() {
            text.push_str(&format!(" dropped [{}]", faces(&self.dropped)));
        }
        if self.modifier > 0 {
            text.push_str(&format!(" + {}", self.modifier));
        } else if self.modifier < 0 {
            text.push_str(&format!(" - {}", self.modifier.abs()));
        }
        text.push_str(&format!(" = {}", self.total));
        text
    }
}

impl fmt::Display for DiceRollResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description)
    }
}

// ============================================================================
// Convenience
// ============================================================================

/// Whether `notation` is accepted by the grammar.
pub fn is_valid_notation(notation: &str) -> bool {
    DiceExpression::parse(notation).is_ok()
}

/// Roll dice from a notation string.
pub fn roll(notation: &str) -> Result<DiceRollResult, DiceError> {
    roll_with_advantage(notation, Advantage::Normal)
}

/// Roll with advantage/disadvantage.
pub fn roll_with_advantage(
    notation: &str,
    advantage: Advantage,
) -> Result<DiceRollResult, DiceError> {
    Ok(DiceExpression::parse(notation)?.roll(advantage))
}

/// Roll one ability score: 4d6, keep the highest 3.
pub fn roll_ability_score<D: DiceSource + ?Sized>(dice: &mut D) -> DiceRollResult {
    DiceExpression::new(4, 6)
        .with_keep_drop(KeepDrop::KeepHighest(3))
        .roll_with(Advantage::Normal, dice)
}

fn saturate(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Sum of the faces plus the modifier, saturating at the `i32` bounds.
fn total_of(rolls: &[u32], modifier: i32) -> i32 {
    let faces = rolls
        .iter()
        .fold(0i64, |sum, face| sum.saturating_add(i64::from(*face)));
    saturate(faces.saturating_add(i64::from(modifier)))
}

/// Hit points for a character of `level`.
///
/// Level 1 takes the hit die's maximum; later levels roll it. The
/// constitution modifier is added either way and the result is at least 1.
pub fn roll_hit_points<D: DiceSource + ?Sized>(
    level: u8,
    hit_die: u32,
    con_modifier: i32,
    dice: &mut D,
) -> Result<i32, DiceError> {
    let expression = DiceExpression::parse(&format!("1d{hit_die}"))?;
    let base = if level <= 1 {
        expression.max_total()
    } else {
        expression.roll_with(Advantage::Normal, dice).total
    };
    Ok(base.saturating_add(con_modifier).max(1))
}
