//! Free-text patterns.
//!
//! Each function runs one family of regexes over prose and returns typed
//! matches; none of them know about the aggregate parse.

use super::types::{ActionType, DamageType, RollPurpose};
use crate::dice::{DiceExpression, DICE_IN_TEXT_RE};
use regex_lite::Regex;
use std::sync::LazyLock;

static ACTION_PATTERNS: LazyLock<Vec<(ActionType, Regex)>> = LazyLock::new(|| {
    let object = r"\s+([^.!?,;:\n]{1,60})";
    [
        (
            ActionType::Attack,
            r"attacks?|attacked|attacking|strikes?|struck|hits?|swings?\s+at",
        ),
        (ActionType::Move, r"moves?|walks?|runs?|goes|go"),
        (ActionType::Cast, r"casts?|uses?"),
        (
            ActionType::Talk,
            r"talks?\s+(?:to|with)|speaks?\s+(?:to|with)|asks?",
        ),
        (
            ActionType::Search,
            r"search(?:es)?|examines?|inspects?|investigates?",
        ),
        (
            ActionType::PickUp,
            r"picks?\s+up|picked\s+up|takes?|grabs?",
        ),
    ]
    .into_iter()
    .map(|(kind, verbs)| {
        let pattern = format!(r"(?i)\b({verbs}){object}");
        (kind, Regex::new(&pattern).expect("valid regex"))
    })
    .collect()
});

// Objects that mean the verb was not an action ("hit points", "takes 8 damage").
static NON_ACTION_OBJECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:\d|points?\b|hp\b|damage\b|for\s+initiative|a\s+(?:moment|breath|deep)|place\b|to\s+\d)")
        .expect("valid regex")
});

static HP_CHANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:\b((?:the\s+|a\s+|an\s+)?[a-z][\w']*)\s+)?\b(gains?|gained|loses?|lost|takes?|took)\s+(\d+)\s+(?:hit\s+points?|hp|health)\b",
    )
    .expect("valid regex")
});

static LOCATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:\b((?:the\s+)?[a-z][\w']*)\s+)?\b(?:moves?|moved|travels?|travelled|traveled|goes|went)\s+(?:in)?to\s+((?:the\s+)?[^.!?,;\n]{1,60})",
    )
    .expect("valid regex")
});

static SENTENCE_END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?\n]").expect("valid regex"));

static DC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bDC\s*(\d+)\b").expect("valid regex"));

static IMPLICIT_CHECK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:make|makes|roll|rolls|attempt|attempts)\s+an?\s+(?:DC\s*\d+\s+)?([a-z]+(?:\s+\([a-z]+\))?)\s+(check|save|saving\s+throw)\b",
    )
    .expect("valid regex")
});

/// Keyword phrases that signal a fight is starting.
pub const COMBAT_KEYWORDS: &[&str] = &[
    "combat begins",
    "combat starts",
    "battle begins",
    "roll for initiative",
    "roll initiative",
    "draws sword",
    "draws a sword",
    "draws his sword",
    "draws her sword",
    "draws their sword",
    "draws a weapon",
    "hostile",
    "attacks you",
    "lunges at you",
    "ambush",
];

static COMBAT_START_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\bcombat\s+(?:begins|starts)\b",
        r"(?i)\broll\s+for\s+initiative\b",
        r"(?i)\bdraws?\s+(?:(?:his|her|its|their|a|an)\s+)?(?:sword|blade|weapon|dagger|axe|bow|scimitar)\b",
        r"(?i)\bcharges?\s+(?:at|toward|towards)\s+(?:you|the)\b",
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

static ATTACK_EVENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b((?:the\s+)?[a-z][\w']*)\s+(?:attack|attacks|attacked|strike|strikes|hits|slashes|stabs|shoots|swings\s+at|lunges\s+at)\s+((?:the\s+)?[a-z][\w']*)",
    )
    .expect("valid regex")
});

static DAMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:\b((?:the\s+)?[a-z][\w']*)\s+(?:takes?|took|suffers?|suffered|for)\s+)?\b(\d+)\s+(?:points?\s+of\s+)?(?:([a-z]+)\s+)?damage\b(?:\s+to\s+((?:the\s+)?[a-z][\w']*))?",
    )
    .expect("valid regex")
});

static HEAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:\b((?:the\s+)?[a-z][\w']*)\s+)?\b(?:regains?|regained|heals?|healed|recovers?|recovered)\s+(?:for\s+)?(\d+)\s*(?:hit\s+points?|hp|health)?\b",
    )
    .expect("valid regex")
});

static STATUS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b((?:the\s+)?[a-z][\w']*)\s+(?:is|are|becomes?|became|falls)\s+(?:now\s+)?(poisoned|stunned|paralyzed|frightened|charmed|blinded|deafened|prone|restrained|grappled|incapacitated|unconscious|petrified|invisible)\b(?:\s+for\s+(\d+)\s+(?:rounds?|turns?))?",
    )
    .expect("valid regex")
});

static DISCOVERY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:discovers?|discovered|finds?|found|uncovers?|uncovered)\s+([^.!?\n]{3,120})")
        .expect("valid regex")
});

static DECISION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:decides?|decided|chooses?|chose)\s+(?:to\s+)?([^.!?\n]{3,120})")
        .expect("valid regex")
});

// ============================================================================
// Match types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionMatch {
    pub action_type: ActionType,
    pub phrase: String,
    pub object: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HpChangeMatch {
    pub subject: Option<String>,
    pub amount: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationMatch {
    pub subject: Option<String>,
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiceMatch {
    pub notation: String,
    pub modifier: i32,
    pub purpose: RollPurpose,
    pub dc: Option<i32>,
    pub valid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImplicitCheck {
    pub skill: String,
    pub purpose: RollPurpose,
    pub dc: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttackMatch {
    pub attacker: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DamageMatch {
    pub target: Option<String>,
    pub amount: i32,
    pub damage_type: Option<DamageType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealMatch {
    pub target: Option<String>,
    pub amount: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMatch {
    pub target: String,
    pub effect: String,
    pub duration: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoryKind {
    Discovery,
    Decision,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryMatch {
    pub kind: StoryKind,
    pub description: String,
}

// ============================================================================
// Helpers
// ============================================================================

fn capture(caps: &regex_lite::Captures<'_>, index: usize) -> Option<String> {
    caps.get(index)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Digits too large for an `i32` saturate at `i32::MAX`.
fn parse_amount(caps: &regex_lite::Captures<'_>, index: usize) -> Option<i32> {
    let digits = caps.get(index)?.as_str();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(digits.parse::<i32>().unwrap_or(i32::MAX))
}

/// Words that read as a subject but never name one.
fn is_filler(word: &str) -> bool {
    matches!(
        word.to_lowercase().as_str(),
        "and" | "but" | "then" | "also" | "it" | "which" | "who" | "that" | "he" | "she" | "they" | "to"
    )
}

fn subject(caps: &regex_lite::Captures<'_>, index: usize) -> Option<String> {
    capture(caps, index).filter(|s| !is_filler(s))
}

/// The sentence containing the byte range `start..end`.
pub fn sentence_around(text: &str, start: usize, end: usize) -> &str {
    let begin = SENTENCE_END_RE
        .find_iter(&text[..start])
        .last()
        .map(|m| m.end())
        .unwrap_or(0);
    let finish = SENTENCE_END_RE
        .find(&text[end..])
        .map(|m| end + m.start())
        .unwrap_or(text.len());
    text[begin..finish].trim()
}

/// Purpose from keywords in priority order.
pub fn infer_purpose(sentence: &str) -> RollPurpose {
    let lower = sentence.to_lowercase();
    if lower.contains("attack") {
        RollPurpose::AttackRoll
    } else if lower.contains("damage") {
        RollPurpose::Damage
    } else if lower.contains("save") || lower.contains("saving") {
        RollPurpose::SavingThrow
    } else if lower.contains("check") {
        RollPurpose::AbilityCheck
    } else if lower.contains("initiative") {
        RollPurpose::Initiative
    } else {
        RollPurpose::Unknown
    }
}

pub fn find_dc(sentence: &str) -> Option<i32> {
    DC_RE
        .captures(sentence)
        .and_then(|caps| parse_amount(&caps, 1))
}

// ============================================================================
// Extractors
// ============================================================================

pub fn find_actions(text: &str) -> Vec<ActionMatch> {
    let mut found = Vec::new();
    for (action_type, re) in ACTION_PATTERNS.iter() {
        for caps in re.captures_iter(text) {
            let Some(object) = capture(&caps, 2) else {
                continue;
            };
            if NON_ACTION_OBJECT_RE.is_match(&object) {
                continue;
            }
            found.push(ActionMatch {
                action_type: *action_type,
                phrase: caps[0].trim().to_string(),
                object,
            });
        }
    }
    found
}

pub fn find_hp_changes(text: &str) -> Vec<HpChangeMatch> {
    HP_CHANGE_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let amount = parse_amount(&caps, 3)?;
            let verb = caps.get(2)?.as_str().to_lowercase();
            let signed = if verb.starts_with("lo") || verb.starts_with("t") {
                -amount
            } else {
                amount
            };
            Some(HpChangeMatch {
                subject: subject(&caps, 1),
                amount: signed,
            })
        })
        .collect()
}

pub fn find_location_changes(text: &str) -> Vec<LocationMatch> {
    LOCATION_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let destination = capture(&caps, 2)?;
            Some(LocationMatch {
                subject: subject(&caps, 1),
                destination,
            })
        })
        .collect()
}

/// Dice notation anywhere in the text, each classified by its sentence.
pub fn find_dice(text: &str) -> Vec<DiceMatch> {
    DICE_IN_TEXT_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let notation: String = whole.as_str().split_whitespace().collect();
            let magnitude = parse_amount(&caps, 4).unwrap_or(0);
            let modifier = match caps.get(3).map(|m| m.as_str()) {
                Some("-") => -magnitude,
                _ => magnitude,
            };
            let sentence = sentence_around(text, whole.start(), whole.end());
            Some(DiceMatch {
                valid: DiceExpression::parse(&notation).is_ok(),
                notation,
                modifier,
                purpose: infer_purpose(sentence),
                dc: find_dc(sentence),
            })
        })
        .collect()
}

/// "Make a Dexterity saving throw" style requests in sentences without dice.
pub fn find_implicit_checks(text: &str) -> Vec<ImplicitCheck> {
    IMPLICIT_CHECK_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let sentence = sentence_around(text, whole.start(), whole.end());
            if DICE_IN_TEXT_RE.is_match(sentence) {
                return None;
            }
            let kind = caps.get(2)?.as_str().to_lowercase();
            let purpose = if kind == "check" {
                RollPurpose::AbilityCheck
            } else {
                RollPurpose::SavingThrow
            };
            Some(ImplicitCheck {
                skill: capture(&caps, 1)?,
                purpose,
                dc: find_dc(sentence),
            })
        })
        .collect()
}

/// Whether any keyword or start-of-combat phrasing appears.
pub fn detect_combat_start(text: &str) -> bool {
    let lower = text.to_lowercase();
    COMBAT_KEYWORDS.iter().any(|k| lower.contains(k))
        || COMBAT_START_PATTERNS.iter().any(|re| re.is_match(text))
}

pub fn find_attacks(text: &str) -> Vec<AttackMatch> {
    ATTACK_EVENT_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let attacker = subject(&caps, 1)?;
            let target = capture(&caps, 2)?;
            let bare_target = target.to_lowercase();
            if matches!(bare_target.as_str(), "points" | "for" | "roll" | "rolls" | "with") {
                return None;
            }
            Some(AttackMatch { attacker, target })
        })
        .collect()
}

pub fn find_damage(text: &str) -> Vec<DamageMatch> {
    DAMAGE_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let amount = parse_amount(&caps, 2)?;
            let damage_type = caps.get(3).and_then(|m| DamageType::from_word(m.as_str()));
            let target = capture(&caps, 4).or_else(|| subject(&caps, 1));
            Some(DamageMatch {
                target,
                amount,
                damage_type,
            })
        })
        .collect()
}

pub fn find_healing(text: &str) -> Vec<HealMatch> {
    HEAL_RE
        .captures_iter(text)
        .filter_map(|caps| {
            Some(HealMatch {
                amount: parse_amount(&caps, 2)?,
                target: subject(&caps, 1),
            })
        })
        .collect()
}

pub fn find_status_effects(text: &str) -> Vec<StatusMatch> {
    STATUS_RE
        .captures_iter(text)
        .filter_map(|caps| {
            Some(StatusMatch {
                target: subject(&caps, 1)?,
                effect: capture(&caps, 2)?.to_lowercase(),
                duration: caps.get(3).and_then(|m| m.as_str().parse().ok()),
            })
        })
        .collect()
}

pub fn find_story_events(text: &str) -> Vec<StoryMatch> {
    let story = |re: &Regex, kind: StoryKind| -> Vec<StoryMatch> {
        re.captures_iter(text)
            .filter_map(|caps| {
                Some(StoryMatch {
                    kind,
                    description: caps.get(0)?.as_str().trim().to_string(),
                })
            })
            .collect()
    };
    let mut found = story(&DISCOVERY_RE, StoryKind::Discovery);
    found.extend(story(&DECISION_RE, StoryKind::Decision));
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hp_loss_with_subject() {
        let found = find_hp_changes("The goblin loses 8 hit points.");
        assert_eq!(
            found,
            vec![HpChangeMatch {
                subject: Some("The goblin".to_string()),
                amount: -8,
            }]
        );
    }

    #[test]
    fn test_hp_gain_and_take() {
        let found = find_hp_changes("You gain 5 HP. Then you take 3 health from the curse.");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].amount, 5);
        assert_eq!(found[0].subject.as_deref(), Some("You"));
        assert_eq!(found[1].amount, -3);
        assert_eq!(found[1].subject.as_deref(), Some("you"));
    }

    #[test]
    fn test_huge_amounts_saturate() {
        let found = find_hp_changes("You gain 99999999999 hit points. The troll loses 2147483647 HP.");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].amount, i32::MAX);
        assert_eq!(found[1].amount, -i32::MAX);
    }

    #[test]
    fn test_location_change() {
        let found = find_location_changes("Aria moves to the old mill, wary of traps.");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].subject.as_deref(), Some("Aria"));
        assert_eq!(found[0].destination, "the old mill");
    }

    #[test]
    fn test_actions_skip_hit_points_and_damage() {
        let found = find_actions("You take 8 slashing damage. The ogre loses 3 hit points.");
        assert!(found.is_empty(), "{found:?}");

        let found = find_actions("You search the chest and pick up a silver key.");
        let kinds: Vec<ActionType> = found.iter().map(|m| m.action_type).collect();
        assert!(kinds.contains(&ActionType::Search));
        assert!(kinds.contains(&ActionType::PickUp));
    }

    #[test]
    fn test_dice_purpose_by_sentence() {
        let found = find_dice(
            "Roll 1d20+5 for your attack. On a hit, roll 2d6 + 3 damage. Make a DC 14 save with 1d20.",
        );
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].notation, "1d20+5");
        assert_eq!(found[0].modifier, 5);
        assert_eq!(found[0].purpose, RollPurpose::AttackRoll);
        assert_eq!(found[1].notation, "2d6+3");
        assert_eq!(found[1].purpose, RollPurpose::Damage);
        assert_eq!(found[2].purpose, RollPurpose::SavingThrow);
        assert_eq!(found[2].dc, Some(14));
    }

    #[test]
    fn test_purpose_priority() {
        assert_eq!(infer_purpose("attack damage"), RollPurpose::AttackRoll);
        assert_eq!(infer_purpose("saving throw check"), RollPurpose::SavingThrow);
        assert_eq!(infer_purpose("for initiative"), RollPurpose::Initiative);
        assert_eq!(infer_purpose("just roll"), RollPurpose::Unknown);
    }

    #[test]
    fn test_invalid_dice_flagged() {
        let found = find_dice("Roll 0d6 for luck.");
        assert_eq!(found.len(), 1);
        assert!(!found[0].valid);
    }

    #[test]
    fn test_implicit_checks() {
        let found = find_implicit_checks("Make a Dexterity saving throw, DC 13! Also roll a Perception check.");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].skill, "Dexterity");
        assert_eq!(found[0].purpose, RollPurpose::SavingThrow);
        assert_eq!(found[0].dc, Some(13));
        assert_eq!(found[1].purpose, RollPurpose::AbilityCheck);

        assert!(find_implicit_checks("Make a Stealth check with 1d20+4.").is_empty());
    }

    #[test]
    fn test_combat_start() {
        assert!(detect_combat_start("Combat begins! Roll for initiative!"));
        assert!(detect_combat_start("The bandit draws his blade."));
        assert!(detect_combat_start("The orc charges at you."));
        assert!(!detect_combat_start("The innkeeper pours you an ale."));
    }

    #[test]
    fn test_damage_with_type() {
        let found = find_damage("You take 8 slashing damage.");
        assert_eq!(
            found,
            vec![DamageMatch {
                target: Some("You".to_string()),
                amount: 8,
                damage_type: Some(DamageType::Slashing),
            }]
        );

        let found = find_damage("The fireball deals 12 points of fire damage to the troll.");
        assert_eq!(found[0].target.as_deref(), Some("the troll"));
        assert_eq!(found[0].damage_type, Some(DamageType::Fire));

        let found = find_damage("The goblin hits you for 5 extra damage.");
        assert_eq!(found[0].target.as_deref(), Some("you"));
        assert_eq!(found[0].damage_type, None);
    }

    #[test]
    fn test_attack_events() {
        let found = find_attacks("The goblin attacks you with a rusty scimitar.");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].attacker, "The goblin");
        assert_eq!(found[0].target, "you");
    }

    #[test]
    fn test_heal_and_status() {
        let found = find_healing("You regain 6 hit points.");
        assert_eq!(found[0].amount, 6);

        let found = find_status_effects("The goblin is now poisoned for 3 rounds.");
        assert_eq!(found[0].target, "The goblin");
        assert_eq!(found[0].effect, "poisoned");
        assert_eq!(found[0].duration, Some(3));
    }

    #[test]
    fn test_story_events() {
        let found = find_story_events("You discover a hidden passage. You decide to follow it.");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].kind, StoryKind::Discovery);
        assert_eq!(found[0].description, "discover a hidden passage");
        assert_eq!(found[1].kind, StoryKind::Decision);
    }

    #[test]
    fn test_sentence_around() {
        let text = "First. Roll 1d6 now! Last";
        let start = text.find("1d6").unwrap();
        assert_eq!(sentence_around(text, start, start + 3), "Roll 1d6 now");
    }
}
