//! Headless DM bridge - line-oriented driver.
//!
//! Reads player actions from stdin and prints the narration and turn result.
//! Uses Claude when `ANTHROPIC_API_KEY` is set and the template narrator
//! otherwise.
//!
//! Commands:
//! - `/roll <notation>` answers a pending dice request
//! - `/status` prints the character and encounter
//! - `/quit` exits

use std::sync::Arc;

use dm_bridge::narration::{ClaudeNarrator, NarrationService, TemplateNarrator};
use dm_bridge::world::create_sample_fighter;
use dm_bridge::{
    logging, roll, EngineConfig, MemoryCache, MemoryStore, OrchestrationResult, SessionId,
    TurnOrchestrator, TurnRequest,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

fn narrator(config: &EngineConfig) -> Arc<dyn NarrationService> {
    if std::env::var("ANTHROPIC_API_KEY").is_err() {
        info!("ANTHROPIC_API_KEY not set; using template narration");
        return Arc::new(TemplateNarrator);
    }
    match claude::Claude::from_env() {
        Ok(client) => Arc::new(ClaudeNarrator::from_config(client, config)),
        Err(e) => {
            warn!(error = %e, "Could not create Claude client; using template narration");
            Arc::new(TemplateNarrator)
        }
    }
}

fn print_result(result: &OrchestrationResult) {
    println!("\n{}\n", result.narrative_text);
    for requirement in &result.dice_required {
        println!("  [roll {} - {}]", requirement.expression, requirement.purpose.label());
    }
    for error in &result.errors {
        println!("  ! {error}");
    }
    if !result.next_actions.is_empty() {
        println!("  Next: {}", result.next_actions.join(" | "));
    }
    println!("  ({})", result.result_type);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    if dotenvy::from_path("../.env").is_err() {
        let _ = dotenvy::dotenv();
    }
    logging::init();

    let config = EngineConfig::from_env();
    let session_id = SessionId::new(uuid::Uuid::new_v4().to_string());
    let store = MemoryStore::new()
        .with_character(session_id.clone(), create_sample_fighter("Thorin"))
        .with_enemy_template(dm_bridge::EnemyTemplate::goblin());
    let orchestrator = TurnOrchestrator::new(
        config.clone(),
        narrator(&config),
        Arc::new(MemoryCache::new()),
        Arc::new(store),
    );

    println!("You are Thorin, a fighter at The Prancing Pony. What do you do?");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" => break,
            "/status" => {
                let context = orchestrator.load_context(&session_id).await?;
                println!("{}", context.render());
                continue;
            }
            _ => {}
        }

        let request = match line.strip_prefix("/roll") {
            Some(notation) => match roll(notation.trim()) {
                Ok(result) => {
                    println!("  {}", result.description);
                    TurnRequest::new(session_id.clone(), "").with_dice_results(vec![result])
                }
                Err(e) => {
                    println!("  ! {e}");
                    continue;
                }
            },
            None => TurnRequest::new(session_id.clone(), line),
        };
        let result = orchestrator.process_turn(request).await;
        print_result(&result);
    }

    Ok(())
}
