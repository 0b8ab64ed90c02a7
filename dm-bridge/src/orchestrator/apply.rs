//! Applying extracted changes to game state.
//!
//! Character updates are pure: they take the current value and return the
//! new one together with the change as it was actually applied. Encounter
//! updates go through the combat state machine so its clamping and
//! elimination rules hold.

use crate::combat::{ActiveCondition, CombatActionResponse, CombatEncounter, ParticipantId};
use crate::parser::{
    normalize_property, CombatEvent, CombatEventType, EntityType, ParsedResponse, StateChange,
    StateValue, HP_PROPERTY,
};
use crate::world::Character;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("No handler for {entity:?} property '{property}'")]
    UnsupportedProperty { entity: EntityType, property: String },

    #[error("No combatant matches '{0}'")]
    UnknownTarget(String),

    #[error("Change to '{0}' arrived outside combat")]
    NoEncounter(String),

    #[error("Change to '{0}' carries no usable value")]
    MissingValue(String),
}

/// Signed delta a change asks for, given the current value. Saturates to
/// `-i32::MAX..=i32::MAX` so the result can always be negated.
fn delta(change: &StateChange, current: i32) -> Option<i32> {
    let wide = match change.change_amount {
        Some(amount) => i64::from(amount),
        None => {
            let target = change.new_value.as_ref()?.as_integer()?;
            target.saturating_sub(i64::from(current))
        }
    };
    Some(wide.clamp(-i64::from(i32::MAX), i64::from(i32::MAX)) as i32)
}

fn resolved(change: &StateChange, old: StateValue, new: StateValue) -> StateChange {
    let change_amount = match (&old, &new) {
        (StateValue::Integer(o), StateValue::Integer(n)) => i32::try_from(n.saturating_sub(*o)).ok(),
        _ => None,
    };
    StateChange {
        old_value: Some(old),
        new_value: Some(new),
        change_amount,
        ..change.clone()
    }
}

/// Apply one change to the character, returning the updated character and
/// the change with its resolved old and new values.
pub fn apply_to_character(
    character: &Character,
    change: &StateChange,
) -> Result<(Character, StateChange), ApplyError> {
    let mut next = character.clone();
    let property = normalize_property(&change.property_name);
    let missing = || ApplyError::MissingValue(property.clone());

    let applied = match property.as_str() {
        HP_PROPERTY => {
            let before = next.hit_points.current;
            let amount = delta(change, before).ok_or_else(missing)?;
            if amount < 0 {
                next.hit_points.take_damage(amount.saturating_neg());
            } else {
                next.hit_points.heal(amount);
            }
            resolved(
                change,
                StateValue::Integer(before.into()),
                StateValue::Integer(next.hit_points.current.into()),
            )
        }
        "max_hp" => {
            let before = next.hit_points.maximum;
            let amount = delta(change, before).ok_or_else(missing)?;
            next.hit_points.maximum = before.saturating_add(amount).max(1);
            let current = next.hit_points.current;
            next.hit_points.set_current(current);
            resolved(
                change,
                StateValue::Integer(before.into()),
                StateValue::Integer(next.hit_points.maximum.into()),
            )
        }
        "experience" => {
            let before = i32::try_from(next.experience).unwrap_or(i32::MAX);
            let amount = delta(change, before).ok_or_else(missing)?;
            next.experience = before.saturating_add(amount).max(0).unsigned_abs();
            resolved(
                change,
                StateValue::Integer(before.into()),
                StateValue::Integer(next.experience.into()),
            )
        }
        "armor_class" => {
            let before = next.armor_class;
            let amount = delta(change, before).ok_or_else(missing)?;
            next.armor_class = before.saturating_add(amount).max(0);
            resolved(
                change,
                StateValue::Integer(before.into()),
                StateValue::Integer(next.armor_class.into()),
            )
        }
        "location" => {
            let destination = change
                .new_value
                .as_ref()
                .and_then(StateValue::as_text)
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(missing)?;
            let before = std::mem::replace(&mut next.location, destination.trim().to_string());
            resolved(
                change,
                StateValue::Text(before),
                StateValue::Text(next.location.clone()),
            )
        }
        "condition" | "conditions" | "status" => {
            let condition = change
                .new_value
                .as_ref()
                .and_then(StateValue::as_text)
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(missing)?;
            let before = next.conditions.join(", ");
            if !next.has_condition(condition) {
                next.conditions.push(condition.trim().to_lowercase());
            }
            resolved(
                change,
                StateValue::Text(before),
                StateValue::Text(next.conditions.join(", ")),
            )
        }
        _ => {
            return Err(ApplyError::UnsupportedProperty {
                entity: change.entity_type,
                property: property.clone(),
            })
        }
    };
    Ok((next, applied))
}

/// Apply an HP change to a named combatant.
pub fn apply_to_encounter(
    encounter: &mut CombatEncounter,
    change: &StateChange,
) -> Result<(CombatActionResponse, StateChange), ApplyError> {
    let property = normalize_property(&change.property_name);
    if property != HP_PROPERTY {
        return Err(ApplyError::UnsupportedProperty {
            entity: change.entity_type,
            property,
        });
    }
    let name = change
        .entity_id
        .clone()
        .ok_or_else(|| ApplyError::UnknownTarget("unnamed".to_string()))?;
    let (id, before) = encounter
        .find_by_name(&name)
        .map(|p| (p.id, p.current_hp))
        .ok_or_else(|| ApplyError::UnknownTarget(name.clone()))?;
    let amount = delta(change, before).ok_or_else(|| ApplyError::MissingValue(property.clone()))?;

    let response = if amount < 0 {
        encounter.apply_damage(id, amount.saturating_neg())
    } else {
        encounter.apply_healing(id, amount)
    }
    .ok_or_else(|| ApplyError::UnknownTarget(name.clone()))?;

    let after = encounter.participant(id).map_or(before, |p| p.current_hp);
    let applied = resolved(
        change,
        StateValue::Integer(before.into()),
        StateValue::Integer(after.into()),
    );
    Ok((response, applied))
}

/// Whether narration is talking about the player character.
pub fn refers_to_character(name: &str, character: &Character) -> bool {
    let lower = name.trim().to_lowercase();
    if matches!(lower.as_str(), "you" | "your" | "yourself" | "player" | "i") {
        return true;
    }
    let own = character.name.to_lowercase();
    own == lower || own.split_whitespace().any(|part| part == lower)
}

/// The character's participant in an encounter.
pub fn character_participant(encounter: &CombatEncounter, character: &Character) -> Option<ParticipantId> {
    encounter
        .find_by_source(&character.id.to_string())
        .map(|p| p.id)
}

/// Copy the character's HP into the encounter.
pub fn sync_character_hp(encounter: &mut CombatEncounter, character: &Character) -> bool {
    character_participant(encounter, character)
        .and_then(|id| encounter.sync_hit_points(id, character.hit_points.current))
        .unwrap_or(false)
}

/// Add narrated status effects to the matching combatants.
pub fn apply_status_effects(
    encounter: &mut CombatEncounter,
    events: &[CombatEvent],
    character: &Character,
) -> Vec<CombatActionResponse> {
    let mut responses = Vec::new();
    for event in events {
        if event.event_type != CombatEventType::StatusEffect {
            continue;
        }
        let (Some(target), Some(effect)) = (&event.target, &event.status_effect) else {
            continue;
        };
        let id = if refers_to_character(target, character) {
            character_participant(encounter, character)
        } else {
            encounter.find_by_name(target).map(|p| p.id)
        };
        let Some(id) = id else {
            continue;
        };
        let mut condition = ActiveCondition::new(effect.clone(), "narration");
        if let Some(rounds) = event.duration {
            condition = condition.with_duration(rounds);
        }
        if let Some(response) = encounter.add_condition(id, condition) {
            responses.push(response);
        }
    }
    responses
}

/// Names of everyone the narration sets against the character.
pub fn hostile_names(parsed: &ParsedResponse, character: &Character) -> Vec<String> {
    let from_changes = parsed
        .state_changes
        .iter()
        .filter(|c| c.entity_type == EntityType::Enemy)
        .filter_map(|c| c.entity_id.clone());
    let from_events = parsed
        .combat_events
        .iter()
        .flat_map(|e| [e.attacker.clone(), e.target.clone()])
        .flatten();

    let mut names: Vec<String> = Vec::new();
    for name in from_changes.chain(from_events) {
        let name = name.trim();
        if name.is_empty() || refers_to_character(name, character) {
            continue;
        }
        if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            names.push(name.to_string());
        }
    }
    names
}

/// Title-case a narrated name for display.
pub fn display_name(name: &str) -> String {
    name.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::CombatParticipant;
    use crate::parser::ResponseParser;
    use crate::testing::ScriptedDice;
    use crate::world::{create_sample_fighter, EnemyTemplate, SessionId};

    fn hp(entity_type: EntityType, id: Option<&str>, amount: i32) -> StateChange {
        StateChange::hp_delta(entity_type, id.map(str::to_string), amount)
    }

    fn encounter_with(character: &Character) -> CombatEncounter {
        let mut encounter = CombatEncounter::new(SessionId::from("s1"));
        encounter
            .add_participant(CombatParticipant::from_character(character))
            .unwrap();
        encounter
            .add_participant(CombatParticipant::from_enemy(&EnemyTemplate::goblin()))
            .unwrap();
        encounter.start_combat().unwrap();
        encounter
            .roll_initiative(&mut ScriptedDice::new([10, 5]))
            .unwrap();
        encounter
    }

    #[test]
    fn test_hp_damage_clamps_at_zero() {
        let hero = create_sample_fighter("Aria");
        let (next, applied) = apply_to_character(&hero, &hp(EntityType::Character, None, -50)).unwrap();
        assert_eq!(next.hit_points.current, 0);
        assert_eq!(applied.old_value, Some(StateValue::Integer(12)));
        assert_eq!(applied.new_value, Some(StateValue::Integer(0)));
        assert_eq!(applied.change_amount, Some(-12));
        assert_eq!(hero.hit_points.current, 12);
    }

    #[test]
    fn test_hp_heal_clamps_at_max() {
        let mut hero = create_sample_fighter("Aria");
        hero.hit_points.current = 10;
        let (next, applied) = apply_to_character(&hero, &hp(EntityType::Character, None, 9)).unwrap();
        assert_eq!(next.hit_points.current, 12);
        assert_eq!(applied.change_amount, Some(2));
    }

    #[test]
    fn test_extreme_values_saturate() {
        let mut hero = create_sample_fighter("Aria");
        hero.hit_points.current = 7;
        let (next, applied) =
            apply_to_character(&hero, &hp(EntityType::Character, None, i32::MAX)).unwrap();
        assert_eq!(next.hit_points.current, 12);
        assert_eq!(applied.change_amount, Some(5));

        let (next, _) = apply_to_character(&hero, &hp(EntityType::Character, None, i32::MIN)).unwrap();
        assert_eq!(next.hit_points.current, 0);

        let armor = StateChange {
            property_name: "armor_class".to_string(),
            old_value: Some(StateValue::Integer(0)),
            new_value: Some(StateValue::Integer(i64::from(i32::MAX))),
            change_amount: None,
            ..hp(EntityType::Character, None, 0)
        };
        let (next, _) = apply_to_character(&hero, &armor).unwrap();
        assert_eq!(next.armor_class, i32::MAX);

        let experience = StateChange {
            property_name: "experience".to_string(),
            ..hp(EntityType::Character, None, i32::MAX)
        };
        let (next, _) = apply_to_character(&hero, &experience).unwrap();
        let (next, _) = apply_to_character(&next, &experience).unwrap();
        assert_eq!(next.experience, i32::MAX as u32);
    }

    #[test]
    fn test_absolute_hp_value() {
        let hero = create_sample_fighter("Aria");
        let change = StateChange {
            new_value: Some(StateValue::Integer(5)),
            change_amount: None,
            ..hp(EntityType::Character, None, 0)
        };
        let (next, _) = apply_to_character(&hero, &change).unwrap();
        assert_eq!(next.hit_points.current, 5);
    }

    #[test]
    fn test_location_and_unknown_property() {
        let hero = create_sample_fighter("Aria");
        let change = StateChange::location(EntityType::Character, None, "the old mill");
        let (next, _) = apply_to_character(&hero, &change).unwrap();
        assert_eq!(next.location, "the old mill");

        let odd = StateChange {
            property_name: "mood".to_string(),
            ..change
        };
        assert!(matches!(
            apply_to_character(&hero, &odd),
            Err(ApplyError::UnsupportedProperty { .. })
        ));
    }

    #[test]
    fn test_encounter_damage_by_name() {
        let hero = create_sample_fighter("Aria");
        let mut encounter = encounter_with(&hero);
        let (response, applied) =
            apply_to_encounter(&mut encounter, &hp(EntityType::Enemy, Some("goblin"), -10)).unwrap();
        assert!(response.participant_eliminated);
        assert_eq!(applied.new_value, Some(StateValue::Integer(0)));

        let missing = apply_to_encounter(&mut encounter, &hp(EntityType::Enemy, Some("dragon"), -1));
        assert_eq!(missing.unwrap_err(), ApplyError::UnknownTarget("dragon".to_string()));
    }

    #[test]
    fn test_sync_and_status() {
        let mut hero = create_sample_fighter("Aria");
        let mut encounter = encounter_with(&hero);
        hero.hit_points.current = 4;
        assert!(sync_character_hp(&mut encounter, &hero));
        let id = character_participant(&encounter, &hero).unwrap();
        assert_eq!(encounter.participant(id).unwrap().current_hp, 4);

        let events = vec![CombatEvent::status(Some("you".to_string()), "poisoned", Some(2))];
        let responses = apply_status_effects(&mut encounter, &events, &hero);
        assert_eq!(responses.len(), 1);
        assert!(encounter.participant(id).unwrap().has_condition("poisoned"));
    }

    #[test]
    fn test_hostile_names_skip_the_character() {
        let hero = create_sample_fighter("Aria");
        let parsed = ResponseParser::default().parse(
            "The goblin attacks you. The bandit loses 3 hit points. Aria loses 2 hit points.",
            None,
        );
        let names = hostile_names(&parsed, &hero);
        assert_eq!(names, vec!["bandit", "goblin"]);
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("goblin archer"), "Goblin Archer");
        assert_eq!(display_name(""), "");
    }
}
