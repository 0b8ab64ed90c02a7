//! Structured sections embedded in narration.
//!
//! Two shapes are recognised: fenced JSON blocks, and upper-case labels
//! (`ACTIONS:`, `STATE_CHANGES:`, `DICE_ROLLS:`, `COMBAT:`, `STORY:`) whose
//! body runs to the next label, the next fence, or the end of the text.

use super::types::{
    clamp_delta, normalize_property, ActionRecord, ActionType, CombatEvent, CombatEventType, DamageType,
    DiceRequirement, EntityType, StateChange, StateValue, StoryEvent, StoryEventType,
};
use super::patterns::{find_dc, infer_purpose};
use regex_lite::Regex;
use serde::Deserialize;
use std::ops::Range;
use std::sync::LazyLock;

static JSON_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```[ \t]*(?:json)?[ \t]*\r?\n(.*?)```").expect("valid regex")
});

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"```").expect("valid regex"));

static LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(ACTIONS|STATE_CHANGES|DICE_ROLLS|COMBAT|STORY):[ \t]*")
        .expect("valid regex")
});

static STATE_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([\w' ]+?)\.([\w ]+?)\s*:\s*(.*?)\s*(?:->|=>|→)\s*(.+?)$").expect("valid regex")
});

static BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s*").expect("valid regex"));

static BLANK_LINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionLabel {
    Actions,
    StateChanges,
    DiceRolls,
    Combat,
    Story,
}

impl SectionLabel {
    fn from_label(label: &str) -> Option<Self> {
        match label {
            "ACTIONS" => Some(SectionLabel::Actions),
            "STATE_CHANGES" => Some(SectionLabel::StateChanges),
            "DICE_ROLLS" => Some(SectionLabel::DiceRolls),
            "COMBAT" => Some(SectionLabel::Combat),
            "STORY" => Some(SectionLabel::Story),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledSection {
    pub label: SectionLabel,
    pub body: String,
    pub span: Range<usize>,
}

// ============================================================================
// JSON payload
// ============================================================================

/// Shape of a fenced JSON block. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StructuredPayload {
    pub actions: Vec<PayloadAction>,
    pub state_changes: Vec<PayloadStateChange>,
    pub dice_rolls: Vec<PayloadDice>,
    pub combat_events: Vec<PayloadCombatEvent>,
    pub story_events: Vec<PayloadStoryEvent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PayloadAction {
    #[serde(rename = "type", alias = "action_type")]
    pub action_type: String,
    pub description: String,
    pub target: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PayloadStateChange {
    pub entity_type: String,
    pub entity_id: Option<String>,
    #[serde(alias = "property_name")]
    pub property: String,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    #[serde(alias = "change_amount")]
    pub change: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PayloadDice {
    #[serde(alias = "notation", alias = "dice")]
    pub expression: String,
    pub purpose: Option<String>,
    pub dc: Option<i32>,
    pub skill: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PayloadCombatEvent {
    #[serde(alias = "type")]
    pub event_type: String,
    pub attacker: Option<String>,
    pub target: Option<String>,
    #[serde(alias = "damage_amount")]
    pub damage: Option<i32>,
    pub damage_type: Option<String>,
    #[serde(alias = "healing_amount")]
    pub healing: Option<i32>,
    pub status_effect: Option<String>,
    pub duration: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PayloadStoryEvent {
    #[serde(alias = "type")]
    pub event_type: String,
    pub description: String,
    pub consequences: Vec<String>,
    pub new_objective: Option<String>,
    pub completed_objective: Option<String>,
}

fn json_to_state_value(value: serde_json::Value) -> Option<StateValue> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::Bool(b) => Some(StateValue::Flag(b)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(StateValue::Integer)
            .or_else(|| Some(StateValue::Text(n.to_string()))),
        serde_json::Value::String(s) => Some(StateValue::parse(&s)),
        other => Some(StateValue::Text(other.to_string())),
    }
}

impl StructuredPayload {
    pub fn actions(&self) -> impl Iterator<Item = ActionRecord> + '_ {
        self.actions.iter().map(|a| ActionRecord {
            action_type: ActionType::from_label(&a.action_type),
            description: a.description.clone(),
            target: a.target.clone(),
        })
    }

    pub fn state_changes(&self) -> impl Iterator<Item = StateChange> + '_ {
        self.state_changes.iter().filter(|c| !c.property.is_empty()).map(|c| {
            let old_value = c.old_value.clone().and_then(json_to_state_value);
            let new_value = c.new_value.clone().and_then(json_to_state_value);
            let change_amount = c.change.or_else(|| integer_delta(&old_value, &new_value));
            let (entity_type, entity_id) = match EntityType::from_label(&c.entity_type) {
                Some(kind) => (kind, c.entity_id.clone()),
                None if !c.entity_type.trim().is_empty() => (
                    EntityType::Enemy,
                    c.entity_id.clone().or_else(|| Some(c.entity_type.trim().to_string())),
                ),
                None => (EntityType::Character, c.entity_id.clone()),
            };
            StateChange {
                entity_type,
                entity_id,
                property_name: normalize_property(&c.property),
                old_value,
                new_value,
                change_amount,
            }
        })
    }

    pub fn dice_rolls(&self) -> impl Iterator<Item = DiceRequirement> + '_ {
        self.dice_rolls.iter().map(|d| {
            let expression: String = d.expression.split_whitespace().collect();
            let purpose_text = d.purpose.clone().unwrap_or_default();
            DiceRequirement {
                modifier: notation_modifier(&expression),
                expression,
                purpose: infer_purpose(&purpose_text),
                dc: d.dc,
                skill: d.skill.clone(),
                implicit: false,
            }
        })
    }

    pub fn combat_events(&self) -> impl Iterator<Item = CombatEvent> + '_ {
        self.combat_events.iter().filter_map(|e| {
            let event_type = CombatEventType::from_label(&e.event_type)?;
            Some(CombatEvent {
                event_type,
                attacker: e.attacker.clone(),
                target: e.target.clone(),
                damage_amount: e.damage,
                damage_type: e.damage_type.as_deref().and_then(DamageType::from_word),
                healing_amount: e.healing,
                status_effect: e.status_effect.clone(),
                duration: e.duration,
            })
        })
    }

    pub fn story_events(&self) -> impl Iterator<Item = StoryEvent> + '_ {
        self.story_events.iter().map(|s| {
            let mut event = StoryEvent::new(StoryEventType::from_label(&s.event_type), s.description.clone());
            event.consequences = s.consequences.clone();
            if s.new_objective.is_some() {
                event.new_objective = s.new_objective.clone();
            }
            if s.completed_objective.is_some() {
                event.completed_objective = s.completed_objective.clone();
            }
            event
        })
    }
}

fn integer_delta(old: &Option<StateValue>, new: &Option<StateValue>) -> Option<i32> {
    let old = old.as_ref()?.as_integer()?;
    let new = new.as_ref()?.as_integer()?;
    Some(clamp_delta(old, new))
}

/// Flat modifier of a notation string, even when the notation is invalid.
fn notation_modifier(notation: &str) -> i32 {
    let Some(pos) = notation.rfind(['+', '-']) else {
        return 0;
    };
    let digits: String = notation[pos + 1..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let magnitude: i32 = digits.parse().unwrap_or(0);
    if notation[pos..].starts_with('-') {
        -magnitude
    } else {
        magnitude
    }
}

// ============================================================================
// Extraction
// ============================================================================

/// Structured content found in one narration.
#[derive(Debug, Default)]
pub struct Sections {
    pub payloads: Vec<StructuredPayload>,
    pub labeled: Vec<LabeledSection>,
    /// Byte ranges to strip from the display text.
    pub spans: Vec<Range<usize>>,
    pub errors: Vec<String>,
}

impl Sections {
    pub fn bodies(&self, label: SectionLabel) -> impl Iterator<Item = &str> + '_ {
        self.labeled
            .iter()
            .filter(move |s| s.label == label)
            .map(|s| s.body.as_str())
    }
}

pub fn extract(text: &str) -> Sections {
    let mut sections = Sections::default();

    for caps in JSON_FENCE_RE.captures_iter(text) {
        let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let body = body.as_str().trim();
        if !body.starts_with('{') {
            continue;
        }
        sections.spans.push(whole.range());
        match serde_json::from_str::<StructuredPayload>(body) {
            Ok(payload) => sections.payloads.push(payload),
            Err(e) => {
                tracing::warn!(error = %e, "Undecodable JSON block in narration");
                sections.errors.push(format!("Could not decode JSON block: {e}"));
            }
        }
    }

    let labels: Vec<(SectionLabel, Range<usize>)> = LABEL_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            // Labels inside a fenced block belong to that block.
            if sections.spans.iter().any(|s| s.contains(&whole.start())) {
                return None;
            }
            Some((SectionLabel::from_label(caps.get(1)?.as_str())?, whole.range()))
        })
        .collect();

    for (index, (label, header)) in labels.iter().enumerate() {
        let next_label = labels
            .get(index + 1)
            .map(|(_, r)| r.start)
            .unwrap_or(text.len());
        let next_fence = FENCE_RE
            .find(&text[header.end..])
            .map(|m| header.end + m.start())
            .unwrap_or(text.len());
        let end = next_label.min(next_fence);

        sections.labeled.push(LabeledSection {
            label: *label,
            body: text[header.end..end].trim().to_string(),
            span: header.start..end,
        });
        sections.spans.push(header.start..end);
    }

    sections
}

/// The text with every structured section removed.
pub fn clean(text: &str, sections: &Sections) -> String {
    let mut spans = sections.spans.clone();
    spans.sort_by_key(|s| s.start);

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for span in spans {
        if span.start > cursor {
            out.push_str(&text[cursor..span.start]);
        }
        cursor = cursor.max(span.end);
    }
    if cursor < text.len() {
        out.push_str(&text[cursor..]);
    }

    BLANK_LINES_RE.replace_all(&out, "\n\n").trim().to_string()
}

// ============================================================================
// Labeled section bodies
// ============================================================================

fn lines(body: &str) -> impl Iterator<Item = String> + '_ {
    body.lines()
        .map(|line| BULLET_RE.replace(line, "").trim().to_string())
        .filter(|line| !line.is_empty())
}

/// `type: description` lines.
pub fn parse_action_lines(body: &str) -> Vec<ActionRecord> {
    lines(body)
        .map(|line| match line.split_once(':') {
            Some((kind, description)) => {
                ActionRecord::new(ActionType::from_label(kind), description.trim())
            }
            None => ActionRecord::new(ActionType::Other, line),
        })
        .collect()
}

/// `entity.property: old -> new` lines.
pub fn parse_state_lines(body: &str) -> (Vec<StateChange>, Vec<String>) {
    let mut changes = Vec::new();
    let mut errors = Vec::new();

    for line in lines(body) {
        let Some(caps) = STATE_LINE_RE.captures(&line) else {
            errors.push(format!("Unrecognised state change line: {line:?}"));
            continue;
        };
        let entity = caps[1].trim().to_string();
        let property = normalize_property(&caps[2]);
        let old_value = Some(StateValue::parse(&caps[3])).filter(|v| v != &StateValue::Text(String::new()));
        let new_value = Some(StateValue::parse(&caps[4]));

        let (entity_type, entity_id) = match EntityType::from_label(&entity) {
            Some(kind) => (kind, None),
            None => (EntityType::Enemy, Some(entity)),
        };
        let change_amount = integer_delta(&old_value, &new_value);
        changes.push(StateChange {
            entity_type,
            entity_id,
            property_name: property,
            old_value,
            new_value,
            change_amount,
        });
    }
    (changes, errors)
}

/// `purpose: notation` or `notation: purpose` lines.
pub fn parse_dice_lines(body: &str) -> Vec<DiceRequirement> {
    let looks_like_dice = |s: &str| {
        let s = s.trim();
        !s.is_empty()
            && !s.contains(' ')
            && s.to_ascii_lowercase()
                .split_once('d')
                .is_some_and(|(_, rest)| rest.starts_with(|c: char| c.is_ascii_digit()))
    };

    lines(body)
        .filter_map(|line| {
            let candidates: Vec<&str> = match line.split_once(':') {
                Some((left, right)) => {
                    let mut c = vec![left.trim()];
                    c.extend(right.split_whitespace());
                    c
                }
                None => line.split_whitespace().collect(),
            };
            let expression = candidates
                .into_iter()
                .map(|c| c.trim_matches(|ch: char| ch == ',' || ch == '(' || ch == ')'))
                .find(|c| looks_like_dice(c))?
                .to_string();
            Some(DiceRequirement {
                modifier: notation_modifier(&expression),
                purpose: infer_purpose(&line),
                dc: find_dc(&line),
                expression,
                skill: None,
                implicit: false,
            })
        })
        .collect()
}

/// `event_type: description` lines, including objective updates.
pub fn parse_story_lines(body: &str) -> Vec<StoryEvent> {
    lines(body)
        .filter_map(|line| {
            let (kind, description) = line.split_once(':')?;
            let description = description.trim();
            if description.is_empty() {
                return None;
            }
            Some(StoryEvent::new(StoryEventType::from_label(kind), description))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::types::RollPurpose;

    #[test]
    fn test_json_block_decodes_and_is_stripped() {
        let text = "The door creaks open.\n```json\n{\"state_changes\": [{\"entity_type\": \"character\", \"property\": \"hp\", \"old_value\": 10, \"new_value\": 7}]}\n```\nA chill fills the room.";
        let sections = extract(text);
        assert_eq!(sections.payloads.len(), 1);
        let changes: Vec<StateChange> = sections.payloads[0].state_changes().collect();
        assert_eq!(changes[0].property_name, "current_hp");
        assert_eq!(changes[0].change_amount, Some(-3));

        let cleaned = clean(text, &sections);
        assert_eq!(cleaned, "The door creaks open.\n\nA chill fills the room.");
    }

    #[test]
    fn test_bad_json_records_error() {
        let text = "Hi\n```json\n{not json}\n```";
        let sections = extract(text);
        assert!(sections.payloads.is_empty());
        assert_eq!(sections.errors.len(), 1);
        assert_eq!(clean(text, &sections), "Hi");
    }

    #[test]
    fn test_labeled_sections_run_to_next_label() {
        let text = "You stand in the hall.\nACTIONS:\n- search: look under the rug\nSTORY:\ndiscovery: a trapdoor\n";
        let sections = extract(text);
        assert_eq!(sections.labeled.len(), 2);
        assert_eq!(sections.labeled[0].label, SectionLabel::Actions);
        assert_eq!(sections.labeled[0].body, "- search: look under the rug");
        assert_eq!(clean(text, &sections), "You stand in the hall.");
    }

    #[test]
    fn test_lowercase_labels_are_prose() {
        let sections = extract("actions: none today");
        assert!(sections.labeled.is_empty());
    }

    #[test]
    fn test_state_lines() {
        let (changes, errors) =
            parse_state_lines("player.hp: 12 -> 7\ngoblin.status: hostile -> fleeing\nnonsense");
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].entity_type, EntityType::Character);
        assert_eq!(changes[0].change_amount, Some(-5));
        assert_eq!(changes[1].entity_type, EntityType::Enemy);
        assert_eq!(changes[1].entity_id.as_deref(), Some("goblin"));
        assert_eq!(
            changes[1].new_value,
            Some(StateValue::Text("fleeing".to_string()))
        );
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_dice_lines_either_order() {
        let rolls = parse_dice_lines("- attack roll: 1d20+4\n- 2d6-1: damage\n- luck: 2x6");
        assert_eq!(rolls.len(), 2);
        assert_eq!(rolls[0].expression, "1d20+4");
        assert_eq!(rolls[0].purpose, RollPurpose::AttackRoll);
        assert_eq!(rolls[1].modifier, -1);
        assert_eq!(rolls[1].purpose, RollPurpose::Damage);
    }

    #[test]
    fn test_story_lines_with_objectives() {
        let events = parse_story_lines("new_objective: Find the lost heir\ncompleted_objective: Escape the crypt");
        assert_eq!(events[0].new_objective.as_deref(), Some("Find the lost heir"));
        assert_eq!(
            events[1].completed_objective.as_deref(),
            Some("Escape the crypt")
        );
    }

    #[test]
    fn test_notation_modifier() {
        assert_eq!(notation_modifier("1d20+5"), 5);
        assert_eq!(notation_modifier("2d6-2"), -2);
        assert_eq!(notation_modifier("1d8"), 0);
    }
}
