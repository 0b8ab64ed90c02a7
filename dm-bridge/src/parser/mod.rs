//! Narrative event extraction.
//!
//! Turns Dungeon Master prose into typed events. Extraction is best-effort:
//! [`ResponseParser::parse`] never fails. Internal errors and panics become a
//! low-confidence response that still carries the original text.
//!
//! Structured sections (fenced JSON and upper-case labels) are decoded by
//! their own parsers. Free-text patterns run only on the prose that remains
//! once those sections are removed, so nothing is counted twice.

pub mod patterns;
pub mod scoring;
pub mod sections;
pub mod types;

pub use scoring::extract_quick_summary;
pub use types::*;

use crate::config::ParserConfig;
use sections::SectionLabel;
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Narration is {len} bytes, over the {max} byte limit")]
    InputTooLarge { len: usize, max: usize },
}

/// Narrative event extractor.
#[derive(Debug, Clone, Default)]
pub struct ResponseParser {
    config: ParserConfig,
}

impl ResponseParser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Extract every event from `text`. Never fails.
    pub fn parse(&self, text: &str, context: Option<&ParseContext>) -> ParsedResponse {
        match catch_unwind(AssertUnwindSafe(|| self.try_parse(text, context))) {
            Ok(Ok(parsed)) => parsed,
            Ok(Err(e)) => {
                warn!(error = %e, "Narration rejected by parser");
                ParsedResponse::degraded(text, scoring::DEGRADED_CONFIDENCE, e.to_string())
            }
            Err(_) => {
                error!("Parser panicked; returning degraded response");
                ParsedResponse::degraded(
                    text,
                    scoring::DEGRADED_CONFIDENCE,
                    "Internal parser failure",
                )
            }
        }
    }

    fn try_parse(
        &self,
        text: &str,
        context: Option<&ParseContext>,
    ) -> Result<ParsedResponse, ParseError> {
        if text.len() > self.config.max_input_len {
            return Err(ParseError::InputTooLarge {
                len: text.len(),
                max: self.config.max_input_len,
            });
        }

        let found = sections::extract(text);
        let prose = sections::clean(text, &found);
        let resolver = SubjectResolver { context };

        let mut parsed = ParsedResponse {
            narrative_text: prose.clone(),
            actions: Vec::new(),
            state_changes: Vec::new(),
            dice_rolls: Vec::new(),
            combat_events: Vec::new(),
            story_events: Vec::new(),
            confidence_score: 1.0,
            parsing_errors: found.errors.clone(),
        };

        // Actions
        parsed
            .actions
            .extend(patterns::find_actions(&prose).into_iter().map(|m| {
                ActionRecord::new(m.action_type, m.phrase).with_target(m.object)
            }));
        for body in found.bodies(SectionLabel::Actions) {
            parsed.actions.extend(sections::parse_action_lines(body));
        }

        // State changes
        for m in patterns::find_hp_changes(&prose) {
            let (entity_type, entity_id) = resolver.resolve(m.subject.as_deref());
            parsed
                .state_changes
                .push(StateChange::hp_delta(entity_type, entity_id, m.amount));
        }
        for m in patterns::find_location_changes(&prose) {
            let (entity_type, entity_id) = resolver.resolve(m.subject.as_deref());
            parsed
                .state_changes
                .push(StateChange::location(entity_type, entity_id, m.destination));
        }
        for body in found.bodies(SectionLabel::StateChanges) {
            let (changes, errors) = sections::parse_state_lines(body);
            parsed.state_changes.extend(changes);
            parsed.parsing_errors.extend(errors);
        }

        // Dice
        parsed
            .dice_rolls
            .extend(patterns::find_dice(&prose).into_iter().map(|m| DiceRequirement {
                expression: m.notation,
                modifier: m.modifier,
                purpose: m.purpose,
                dc: m.dc,
                skill: None,
                implicit: false,
            }));
        parsed.dice_rolls.extend(
            patterns::find_implicit_checks(&prose)
                .into_iter()
                .map(|m| DiceRequirement {
                    expression: "1d20".to_string(),
                    modifier: 0,
                    purpose: m.purpose,
                    dc: m.dc,
                    skill: Some(m.skill),
                    implicit: true,
                }),
        );
        for body in found.bodies(SectionLabel::DiceRolls) {
            parsed.dice_rolls.extend(sections::parse_dice_lines(body));
        }

        // Combat
        let mut initiated = patterns::detect_combat_start(&prose);
        extract_combat(&prose, &resolver, &mut parsed);
        for body in found.bodies(SectionLabel::Combat) {
            initiated |= patterns::detect_combat_start(body);
            extract_combat(body, &resolver, &mut parsed);
        }

        // Story
        parsed
            .story_events
            .extend(patterns::find_story_events(&prose).into_iter().map(|m| {
                let kind = match m.kind {
                    patterns::StoryKind::Discovery => StoryEventType::Discovery,
                    patterns::StoryKind::Decision => StoryEventType::Decision,
                };
                StoryEvent::new(kind, m.description)
            }));
        for body in found.bodies(SectionLabel::Story) {
            parsed.story_events.extend(sections::parse_story_lines(body));
        }

        for payload in &found.payloads {
            parsed.actions.extend(payload.actions());
            parsed.state_changes.extend(payload.state_changes());
            parsed.dice_rolls.extend(payload.dice_rolls());
            for event in payload.combat_events() {
                if event.event_type == CombatEventType::CombatInitiated {
                    initiated = true;
                } else {
                    parsed.combat_events.push(event);
                }
            }
            parsed.story_events.extend(payload.story_events());
        }

        // At most one initiation per parse, however many signals matched.
        if initiated {
            parsed.combat_events.insert(0, CombatEvent::combat_initiated());
        }

        let (confidence, messages) = scoring::score(&parsed, &self.config);
        parsed.confidence_score = confidence;
        parsed.parsing_errors.extend(messages);

        debug!(
            actions = parsed.actions.len(),
            state_changes = parsed.state_changes.len(),
            dice = parsed.dice_rolls.len(),
            combat = parsed.combat_events.len(),
            story = parsed.story_events.len(),
            confidence = parsed.confidence_score,
            "Parsed narration"
        );
        Ok(parsed)
    }
}

/// Attack, damage, heal and status events, plus the HP changes they imply.
fn extract_combat(text: &str, resolver: &SubjectResolver<'_>, parsed: &mut ParsedResponse) {
    for m in patterns::find_attacks(text) {
        parsed.combat_events.push(CombatEvent::attack(
            Some(strip_article(&m.attacker)),
            Some(strip_article(&m.target)),
        ));
    }
    for m in patterns::find_damage(text) {
        let (entity_type, entity_id) = resolver.resolve(m.target.as_deref());
        parsed.combat_events.push(CombatEvent::damage(
            m.target.as_deref().map(strip_article),
            m.amount,
            m.damage_type,
        ));
        parsed
            .state_changes
            .push(StateChange::hp_delta(entity_type, entity_id, -m.amount));
    }
    for m in patterns::find_healing(text) {
        let (entity_type, entity_id) = resolver.resolve(m.target.as_deref());
        parsed
            .combat_events
            .push(CombatEvent::heal(m.target.as_deref().map(strip_article), m.amount));
        parsed
            .state_changes
            .push(StateChange::hp_delta(entity_type, entity_id, m.amount));
    }
    for m in patterns::find_status_effects(text) {
        parsed.combat_events.push(CombatEvent::status(
            Some(strip_article(&m.target)),
            m.effect,
            m.duration,
        ));
    }
}

fn strip_article(name: &str) -> String {
    let trimmed = name.trim();
    let lower = trimmed.to_lowercase();
    for article in ["the ", "a ", "an "] {
        if lower.starts_with(article) {
            return trimmed[article.len()..].trim().to_string();
        }
    }
    trimmed.to_string()
}

/// Maps a sentence subject onto the character or a named enemy.
struct SubjectResolver<'a> {
    context: Option<&'a ParseContext>,
}

impl SubjectResolver<'_> {
    fn resolve(&self, subject: Option<&str>) -> (EntityType, Option<String>) {
        let character_id = self.context.and_then(|c| c.character_id.clone());
        let Some(subject) = subject.map(strip_article).filter(|s| !s.is_empty()) else {
            return (EntityType::Character, character_id);
        };
        let lower = subject.to_lowercase();

        if matches!(lower.as_str(), "you" | "your" | "yourself" | "player" | "i") {
            return (EntityType::Character, character_id);
        }

        if let Some(context) = self.context {
            let names_character = context.character_name.as_deref().is_some_and(|name| {
                let name = name.to_lowercase();
                name == lower || name.split_whitespace().any(|part| part == lower)
            });
            if names_character {
                return (EntityType::Character, character_id);
            }
            if let Some(enemy) = context.enemy_names.iter().find(|enemy| {
                let enemy = enemy.to_lowercase();
                enemy == lower || enemy.contains(&lower) || lower.contains(&enemy)
            }) {
                return (EntityType::Enemy, Some(enemy.clone()));
            }
        }

        (EntityType::Enemy, Some(subject))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> ParsedResponse {
        ResponseParser::default().parse(text, None)
    }

    #[test]
    fn test_empty_input_is_low_confidence() {
        let parsed = parse("");
        assert!(parsed.confidence_score <= 0.3);
        assert_eq!(parsed.total_events(), 0);
        assert!(!parsed.parsing_errors.is_empty());
    }

    #[test]
    fn test_goblin_loses_hit_points() {
        let parsed = parse("The goblin loses 8 hit points.");
        assert_eq!(parsed.state_changes.len(), 1);
        let change = &parsed.state_changes[0];
        assert_eq!(change.property_name, HP_PROPERTY);
        assert_eq!(change.change_amount, Some(-8));
        assert_eq!(change.entity_type, EntityType::Enemy);
        assert_eq!(change.entity_id.as_deref(), Some("goblin"));
    }

    #[test]
    fn test_combat_begins_emits_one_initiation() {
        let parsed = parse("Combat begins! Roll for initiative!");
        let initiations = parsed
            .combat_events
            .iter()
            .filter(|e| e.event_type == CombatEventType::CombatInitiated)
            .count();
        assert_eq!(initiations, 1);
        assert!(parsed.dice_rolls.is_empty());
    }

    #[test]
    fn test_typed_damage_yields_event_and_hp_change() {
        let parsed = parse("You take 8 slashing damage.");
        let damage: Vec<&CombatEvent> = parsed
            .combat_events
            .iter()
            .filter(|e| e.event_type == CombatEventType::Damage)
            .collect();
        assert_eq!(damage.len(), 1);
        assert_eq!(damage[0].damage_amount, Some(8));
        assert_eq!(damage[0].damage_type, Some(DamageType::Slashing));

        assert_eq!(parsed.state_changes.len(), 1);
        assert_eq!(parsed.state_changes[0].change_amount, Some(-8));
        assert_eq!(parsed.state_changes[0].entity_type, EntityType::Character);
        assert!(parsed.actions.is_empty());
    }

    #[test]
    fn test_context_resolves_character_name() {
        let context = ParseContext::for_character("Aria Swift", "char-1").with_enemies(["Goblin Boss"]);
        let parsed = ResponseParser::default().parse(
            "Aria loses 4 hit points. The boss loses 6 hit points.",
            Some(&context),
        );
        assert_eq!(parsed.state_changes[0].entity_type, EntityType::Character);
        assert_eq!(parsed.state_changes[0].entity_id.as_deref(), Some("char-1"));
        assert_eq!(parsed.state_changes[1].entity_id.as_deref(), Some("Goblin Boss"));
    }

    #[test]
    fn test_dice_requirements() {
        let parsed = parse("Roll 1d20+3 to attack the troll. Then make a Wisdom saving throw, DC 12.");
        assert_eq!(parsed.dice_rolls.len(), 2);
        assert_eq!(parsed.dice_rolls[0].purpose, RollPurpose::AttackRoll);
        assert_eq!(parsed.dice_rolls[0].modifier, 3);
        assert!(parsed.dice_rolls[1].implicit);
        assert_eq!(parsed.dice_rolls[1].expression, "1d20");
        assert_eq!(parsed.dice_rolls[1].dc, Some(12));
        assert_eq!(parsed.dice_rolls[1].skill.as_deref(), Some("Wisdom"));
    }

    #[test]
    fn test_structured_sections_merge_and_clean() {
        let text = "\
The bandit snarls.
STATE_CHANGES:
player.hp: 12 -> 9
STORY:
new_objective: Find the bandit camp
```json
{\"combat_events\": [{\"type\": \"combat_initiated\"}, {\"type\": \"damage\", \"target\": \"player\", \"damage\": 3, \"damage_type\": \"piercing\"}]}
```";
        let parsed = parse(text);
        assert_eq!(parsed.narrative_text, "The bandit snarls.");
        assert!(parsed.has_combat_initiation());
        assert_eq!(parsed.combat_events.len(), 2);
        assert_eq!(parsed.combat_events[1].damage_type, Some(DamageType::Piercing));
        assert_eq!(parsed.state_changes.len(), 1);
        assert_eq!(parsed.state_changes[0].change_amount, Some(-3));
        assert_eq!(
            parsed.story_events[0].new_objective.as_deref(),
            Some("Find the bandit camp")
        );
        assert_eq!(parsed.confidence_score, 1.0);
    }

    #[test]
    fn test_cleaned_text_reparses_identically() {
        let text = "You discover a lever.\nACTIONS:\n- search: the lever\n```json\n{\"actions\": []}\n```\nThe goblin loses 3 hp.";
        let first = parse(text);
        let second = parse(&first.narrative_text);
        assert_eq!(second.narrative_text, first.narrative_text);
        assert_eq!(second.state_changes, first.state_changes);
        assert_eq!(second.story_events, first.story_events);
        assert!(second.actions.len() <= first.actions.len());
    }

    #[test]
    fn test_oversized_input_degrades() {
        let parser = ResponseParser::new(ParserConfig {
            max_input_len: 10,
            ..ParserConfig::default()
        });
        let text = "This narration is far too long.";
        let parsed = parser.parse(text, None);
        assert_eq!(parsed.narrative_text, text);
        assert_eq!(parsed.confidence_score, scoring::DEGRADED_CONFIDENCE);
        assert_eq!(parsed.total_events(), 0);
        assert_eq!(parsed.parsing_errors.len(), 1);
    }

    #[test]
    fn test_huge_hp_change_caps_confidence() {
        let parsed = parse("The dragon loses 500 hit points.");
        assert_eq!(parsed.confidence_score, scoring::LARGE_HP_CHANGE_CAP);
        assert!(parsed.parsing_errors.iter().any(|e| e.contains("500")));
    }

    #[test]
    fn test_heal_and_status_events() {
        let parsed = parse("You regain 5 hit points. The ogre is now stunned for 2 rounds.");
        let kinds: Vec<CombatEventType> = parsed.combat_events.iter().map(|e| e.event_type).collect();
        assert_eq!(kinds, vec![CombatEventType::Heal, CombatEventType::StatusEffect]);
        assert_eq!(parsed.net_hp_change(), 5);
        assert_eq!(parsed.combat_events[1].target.as_deref(), Some("ogre"));
    }
}
