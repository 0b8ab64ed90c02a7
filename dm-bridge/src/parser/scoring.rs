//! Confidence scoring for a parse.
//!
//! Each rule caps the score and records why; the final score is the lowest cap.

use super::types::{ParsedResponse, ParsingQuality, QuickSummary};
use crate::config::ParserConfig;
use crate::dice::is_valid_notation;

/// Nothing was extracted.
pub const NO_EVENTS_CAP: f32 = 0.3;
/// Suspiciously many events.
pub const TOO_MANY_EVENTS_CAP: f32 = 0.7;
/// An HP swing larger than the configured maximum.
pub const LARGE_HP_CHANGE_CAP: f32 = 0.8;
/// A dice expression outside the grammar.
pub const INVALID_DICE_CAP: f32 = 0.7;
/// Extraction itself failed.
pub const DEGRADED_CONFIDENCE: f32 = 0.1;

pub const GOOD_QUALITY_THRESHOLD: f32 = 0.8;
pub const FAIR_QUALITY_THRESHOLD: f32 = 0.5;

/// Score a parse, returning the confidence and a message per applied cap.
pub fn score(parsed: &ParsedResponse, config: &ParserConfig) -> (f32, Vec<String>) {
    let mut confidence: f32 = 1.0;
    let mut messages = Vec::new();

    let total = parsed.total_events();
    if total == 0 {
        confidence = confidence.min(NO_EVENTS_CAP);
        messages.push("No structured events could be extracted".to_string());
    } else if total > config.max_events {
        confidence = confidence.min(TOO_MANY_EVENTS_CAP);
        messages.push(format!(
            "Extracted {total} events, more than the expected {}",
            config.max_events
        ));
    }

    if let Some(largest) = parsed
        .state_changes
        .iter()
        .filter_map(|c| c.hp_amount())
        .map(i32::unsigned_abs)
        .filter(|amount| i64::from(*amount) > i64::from(config.max_hp_change))
        .max()
    {
        confidence = confidence.min(LARGE_HP_CHANGE_CAP);
        messages.push(format!("Implausible HP change of {largest}"));
    }

    for roll in &parsed.dice_rolls {
        if !is_valid_notation(&roll.expression) {
            confidence = confidence.min(INVALID_DICE_CAP);
            messages.push(format!("Invalid dice expression: {}", roll.expression));
        }
    }

    (confidence, messages)
}

impl ParsingQuality {
    pub fn from_score(score: f32) -> Self {
        if score >= GOOD_QUALITY_THRESHOLD {
            ParsingQuality::Good
        } else if score >= FAIR_QUALITY_THRESHOLD {
            ParsingQuality::Fair
        } else {
            ParsingQuality::Poor
        }
    }
}

/// Compact boolean view of a parse.
pub fn extract_quick_summary(parsed: &ParsedResponse) -> QuickSummary {
    QuickSummary {
        has_combat: !parsed.combat_events.is_empty(),
        has_state_changes: !parsed.state_changes.is_empty(),
        requires_dice_rolls: parsed.requires_dice(),
        story_progression: !parsed.story_events.is_empty(),
        hp_changes: parsed.net_hp_change(),
        parsing_quality: ParsingQuality::from_score(parsed.confidence_score),
    }
}
