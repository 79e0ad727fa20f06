//! Headless story player.
//!
//! A line-oriented protocol for playing a story from a terminal or a script:
//! - A number picks that choice of the current scene
//! - Lines starting with `#` are commands (end, back, restart, balance, ...)

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use story_core::{
    ActorClass, FileStore, HttpBackend, KeyValueStore, Scene, StoryConfig, StoryOrchestrator,
    StoryPhase, StoryPreferences, StorySession,
};

/// How to start a headless story.
#[derive(Debug, Clone)]
pub struct PlayConfig {
    pub username: String,
    pub config: StoryConfig,
    pub preferences: StoryPreferences,
    /// File holding balances, context and scenes between runs.
    pub state_path: PathBuf,
    /// Continue the story saved in `state_path` instead of starting over.
    pub resume: bool,
}

/// Play against the HTTP backend on stdin/stdout.
pub async fn run_headless(options: PlayConfig) -> anyhow::Result<()> {
    let backend = Arc::new(HttpBackend::new(&options.config.api_base)?);
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&options.state_path)?);
    options.preferences.save(store.as_ref())?;

    let orchestrator = StoryOrchestrator::new(backend, store).with_config(options.config);
    let session = if options.resume {
        StorySession::restore(orchestrator, options.username)?
    } else {
        StorySession::new(orchestrator, options.username)
    };

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    play(session, stdin.lock(), &mut stdout).await
}

fn print_help(out: &mut impl Write) -> std::io::Result<()> {
    writeln!(out, "  <n>          - Follow choice n")?;
    writeln!(out, "  #end         - Finish the story")?;
    writeln!(out, "  #back        - Return to the previous scene")?;
    writeln!(out, "  #restart     - Start a new story")?;
    writeln!(out, "  #balance     - Show credits and usage")?;
    writeln!(out, "  #promo CODE  - Redeem a promo code")?;
    writeln!(out, "  #title       - Suggest a title for the story")?;
    writeln!(out, "  #quit        - Exit")?;
    writeln!(out, "  #help        - Show this help")
}

fn print_scene(out: &mut impl Write, scene: &Scene) -> std::io::Result<()> {
    writeln!(out, "[SCENE]")?;
    for para in scene.text.split("\n\n") {
        writeln!(out, "{para}")?;
    }
    writeln!(out)?;
    if scene.is_ending {
        writeln!(out, "[THE END]")?;
    } else {
        for (i, choice) in scene.choices.iter().enumerate() {
            writeln!(out, "  {}. {}", i + 1, choice.text)?;
        }
    }
    Ok(())
}

/// Drive `session` from `input` until it runs out or `#quit`.
pub async fn play<R: BufRead, W: Write>(
    mut session: StorySession,
    input: R,
    out: &mut W,
) -> anyhow::Result<()> {
    let actor = session.orchestrator().config().actor;

    writeln!(out, "=== Story Headless Mode ===")?;
    writeln!(out, "Reader: {}", session.username())?;
    writeln!(out)?;
    print_help(out)?;
    writeln!(out)?;

    match session.phase() {
        StoryPhase::Uninitialized => match session.start().await {
            Ok(scene) => print_scene(out, scene)?,
            Err(e) => writeln!(out, "[ERROR] {}", e.user_message())?,
        },
        _ => {
            if let Some(scene) = session.current_scene() {
                print_scene(out, scene)?;
            }
        }
    }
    out.flush()?;

    for line in input.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('#') {
            let parts: Vec<&str> = command.split_whitespace().collect();
            match parts.first().copied() {
                Some("quit") | Some("exit") => {
                    writeln!(out, "¡Hasta pronto!")?;
                    break;
                }
                Some("end") => match session.end().await {
                    Ok(scene) => print_scene(out, scene)?,
                    Err(e) => writeln!(out, "[ERROR] {}", e.user_message())?,
                },
                Some("back") => match session.back() {
                    Ok(scene) => print_scene(out, scene)?,
                    Err(e) => writeln!(out, "[ERROR] {}", e.user_message())?,
                },
                Some("restart") => {
                    session.reset()?;
                    match session.start().await {
                        Ok(scene) => print_scene(out, scene)?,
                        Err(e) => writeln!(out, "[ERROR] {}", e.user_message())?,
                    }
                }
                Some("balance") => {
                    let ledger = session.orchestrator().ledger();
                    writeln!(out, "[BALANCE]")?;
                    writeln!(out, "  Credits: {}", ledger.balance(actor)?)?;
                    writeln!(out, "  Usage units: {}", ledger.usage_balance()?)?;
                }
                Some("promo") => match parts.get(1) {
                    Some(code) => {
                        let ledger = session.orchestrator().ledger();
                        if ledger.redeem_promo_code(code, actor)? {
                            writeln!(out, "[PROMO] Credits: {}", ledger.balance(actor)?)?;
                        } else {
                            writeln!(out, "[ERROR] Código promocional no válido.")?;
                        }
                    }
                    None => writeln!(out, "[ERROR] Usage: #promo CODE")?,
                },
                Some("title") => match session.title().await {
                    Ok(title) => writeln!(out, "[TITLE] {title}")?,
                    Err(e) => writeln!(out, "[ERROR] {}", e.user_message())?,
                },
                Some("help") => {
                    writeln!(out, "[HELP]")?;
                    print_help(out)?;
                }
                _ => writeln!(out, "[ERROR] Unknown command. Type #help for help.")?,
            }
        } else {
            match line.parse::<usize>() {
                Ok(n) if n >= 1 => match session.choose(n - 1).await {
                    Ok(scene) => print_scene(out, scene)?,
                    Err(e) => writeln!(out, "[ERROR] {}", e.user_message())?,
                },
                _ => writeln!(out, "[ERROR] Enter a choice number or a #command.")?,
            }
        }

        if let Some(result) = session.poll_illustration() {
            match result {
                Ok(()) => writeln!(out, "[ILLUSTRATION] ready")?,
                Err(e) => writeln!(out, "[ILLUSTRATION] {}", e.user_message())?,
            }
        }
        out.flush()?;
    }

    Ok(())
}

/// The actor whose credits a `--registered` flag selects.
pub fn actor_from_flag(registered: bool) -> ActorClass {
    if registered {
        ActorClass::Registered
    } else {
        ActorClass::Guest
    }
}
