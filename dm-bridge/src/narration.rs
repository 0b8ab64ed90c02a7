//! Narration service port.
//!
//! The orchestrator only needs `generate(request) -> Narration`. The Claude
//! adapter is the production backend; [`fallback_narration`] is what a turn
//! shows when the backend fails or times out.

use crate::config::EngineConfig;
use crate::world::SessionId;
use async_trait::async_trait;
use claude::{Claude, Message, Request, Usage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Model name reported by the templated fallback.
pub const FALLBACK_MODEL: &str = "fallback";

const NARRATOR_SYSTEM: &str = "You are the Dungeon Master of a solo tabletop adventure. \
Describe the outcome of the player's action in the second person.";

#[derive(Debug, Error)]
pub enum NarrationError {
    #[error("Narration backend error: {0}")]
    Backend(#[from] claude::Error),

    #[error("Narration service unavailable: {0}")]
    Unavailable(String),

    #[error("Narration backend returned no text")]
    Empty,
}

/// Everything the narrator is told about the turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrationRequest {
    pub session_id: SessionId,
    pub player_action: String,
    /// Rendered character, story and combat context.
    pub context: String,
    /// Recent story beats, oldest first.
    pub recent_story: Vec<String>,
}

impl NarrationRequest {
    pub fn new(session_id: SessionId, player_action: impl Into<String>) -> Self {
        Self {
            session_id,
            player_action: player_action.into(),
            context: String::new(),
            recent_story: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_recent_story(mut self, story: Vec<String>) -> Self {
        self.recent_story = story;
        self
    }

    /// The single user message sent to a chat backend.
    pub fn render_prompt(&self) -> String {
        let mut prompt = String::new();
        if !self.context.is_empty() {
            prompt.push_str("## Current state\n");
            prompt.push_str(&self.context);
            prompt.push_str("\n\n");
        }
        if !self.recent_story.is_empty() {
            prompt.push_str("## Recent events\n");
            for beat in &self.recent_story {
                prompt.push_str("- ");
                prompt.push_str(beat);
                prompt.push('\n');
            }
            prompt.push('\n');
        }
        prompt.push_str("## Player action\n");
        prompt.push_str(&self.player_action);
        prompt
    }
}

/// Text returned by a narrator, with usage metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Narration {
    /// False when the content is a fallback template.
    pub success: bool,
    pub content: String,
    pub usage: Usage,
    pub model: String,
}

impl Narration {
    pub fn new(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            usage: Usage::default(),
            model: model.into(),
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    pub fn is_fallback(&self) -> bool {
        !self.success && self.model == FALLBACK_MODEL
    }
}

#[async_trait]
pub trait NarrationService: Send + Sync {
    async fn generate(&self, request: &NarrationRequest) -> Result<Narration, NarrationError>;
}

/// Narration backed by the Claude Messages API.
pub struct ClaudeNarrator {
    client: Claude,
    model: Option<String>,
    max_tokens: usize,
    temperature: Option<f32>,
}

impl ClaudeNarrator {
    pub fn new(client: Claude) -> Self {
        Self {
            client,
            model: None,
            max_tokens: 1024,
            temperature: Some(0.8),
        }
    }

    /// Take model, token and temperature settings from the engine config.
    pub fn from_config(client: Claude, config: &EngineConfig) -> Self {
        Self {
            client,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    fn build_request(&self, request: &NarrationRequest) -> Request {
        let mut wire = Request::new(vec![Message::user(request.render_prompt())])
            .with_system(NARRATOR_SYSTEM)
            .with_max_tokens(self.max_tokens);
        if let Some(model) = &self.model {
            wire = wire.with_model(model.clone());
        }
        if let Some(temperature) = self.temperature {
            wire = wire.with_temperature(temperature);
        }
        wire
    }
}

#[async_trait]
impl NarrationService for ClaudeNarrator {
    async fn generate(&self, request: &NarrationRequest) -> Result<Narration, NarrationError> {
        let completion = self.client.complete(self.build_request(request)).await?;
        if completion.text.trim().is_empty() {
            return Err(NarrationError::Empty);
        }
        tracing::debug!(
            model = %completion.model,
            input_tokens = completion.usage.input_tokens,
            output_tokens = completion.usage.output_tokens,
            "Narration generated"
        );
        Ok(Narration::new(completion.text, completion.model).with_usage(completion.usage))
    }
}

/// A narrator that always answers with the templated fallback.
///
/// Used when no backend is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateNarrator;

#[async_trait]
impl NarrationService for TemplateNarrator {
    async fn generate(&self, request: &NarrationRequest) -> Result<Narration, NarrationError> {
        Ok(fallback_narration(&request.player_action))
    }
}

/// Deterministic narration chosen from the player's action.
///
/// The templates contain nothing the extractor would read as an event, so a
/// fallback turn never changes game state.
pub fn fallback_narration(player_action: &str) -> Narration {
    let action = player_action.to_lowercase();
    let has = |words: &[&str]| {
        action
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| words.contains(&word))
    };

    let content = if has(&["attack", "strike", "fight", "hit", "shoot", "stab", "swing"]) {
        "Steel flashes as you commit to the fight. For a heartbeat the outcome hangs in the balance."
    } else if has(&["go", "walk", "move", "travel", "run", "enter", "leave", "climb"]) {
        "You set off, the path unfolding before you one careful step at a time."
    } else if has(&["talk", "speak", "ask", "say", "tell", "persuade", "greet"]) {
        "Your words hang in the air as those nearby weigh what you have said."
    } else if has(&["search", "look", "examine", "investigate", "inspect", "listen"]) {
        "You study your surroundings closely, letting every detail settle in your mind."
    } else {
        "The Dungeon Master considers your action carefully. The world waits to see what you do next."
    };

    Narration {
        success: false,
        content: content.to_string(),
        usage: Usage::default(),
        model: FALLBACK_MODEL.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ResponseParser;

    #[test]
    fn test_fallback_is_deterministic() {
        let first = fallback_narration("I attack the goblin");
        let second = fallback_narration("I attack the goblin");
        assert_eq!(first, second);
        assert!(first.is_fallback());
        assert!(first.content.contains("fight"));
    }

    #[test]
    fn test_fallback_templates_by_action() {
        assert!(fallback_narration("walk north").content.contains("set off"));
        assert!(fallback_narration("I ask about the mill").content.contains("words"));
        assert!(fallback_narration("search the room").content.contains("surroundings"));
        assert!(fallback_narration("hum a tune").content.contains("considers"));
    }

    #[test]
    fn test_fallback_templates_extract_nothing_mechanical() {
        let parser = ResponseParser::default();
        for action in ["attack", "walk", "talk", "search", "wait"] {
            let parsed = parser.parse(&fallback_narration(action).content, None);
            assert!(parsed.state_changes.is_empty(), "{action}: {parsed:?}");
            assert!(parsed.dice_rolls.is_empty(), "{action}: {parsed:?}");
            assert!(parsed.combat_events.is_empty(), "{action}: {parsed:?}");
        }
    }

    #[test]
    fn test_render_prompt_sections() {
        let request = NarrationRequest::new(SessionId::from("s1"), "open the door")
            .with_context("Aria: 12/12 HP")
            .with_recent_story(vec!["Found a key".to_string()]);
        let prompt = request.render_prompt();
        assert!(prompt.starts_with("## Current state\nAria: 12/12 HP"));
        assert!(prompt.contains("- Found a key"));
        assert!(prompt.ends_with("## Player action\nopen the door"));
    }

    #[test]
    fn test_claude_request_uses_config() {
        let client = Claude::new("test-key").unwrap();
        let config = EngineConfig::default().with_model("claude-test").with_max_tokens(256);
        let narrator = ClaudeNarrator::from_config(client, &config);
        let request = narrator.build_request(&NarrationRequest::new(SessionId::from("s1"), "hello"));
        assert_eq!(request.model.as_deref(), Some("claude-test"));
        assert_eq!(request.max_tokens, 256);
        assert_eq!(request.temperature, Some(0.8));
        assert!(request.system.is_some());
    }

    #[tokio::test]
    async fn test_template_narrator_never_fails() {
        let narration = TemplateNarrator
            .generate(&NarrationRequest::new(SessionId::from("s1"), "look around"))
            .await
            .unwrap();
        assert!(narration.is_fallback());
    }
}
