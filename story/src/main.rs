//! Interactive story generator.
//!
//! Run the backend, then play against it:
//!
//! ```bash
//! cargo run -p story -- serve
//! cargo run -p story -- play --name "Lucía" --kind genre --genre misterio
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use story::play::{actor_from_flag, run_headless, PlayConfig};
use story::server::{self, AppState, ChatProvider, ChatTranslator, ImageProvider, Unconfigured};
use story_core::{StoryConfig, StoryKind, StoryPreferences};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "story")]
#[command(about = "Choose-your-own story generator backed by Groq and Stability AI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP backend
    Serve {
        /// Port to listen on
        #[arg(long, env = "PORT", default_value_t = server::DEFAULT_PORT)]
        port: u16,

        #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
        groq_api_key: Option<String>,

        /// Chat model override
        #[arg(long, env = "GROQ_MODEL")]
        groq_model: Option<String>,

        #[arg(long, env = "STABILITY_API_KEY", hide_env_values = true)]
        stability_api_key: Option<String>,

        /// Send illustration prompts to the image model untranslated
        #[arg(long)]
        no_translate: bool,
    },

    /// Play a story in the terminal
    Play {
        /// Reader name, used as protagonist of personal stories
        #[arg(long)]
        name: String,

        /// Backend base URL
        #[arg(long, env = "STORY_API_BASE", default_value = story_core::config::DEFAULT_API_BASE)]
        api_base: String,

        /// personal, genre or custom
        #[arg(long, default_value = "personal")]
        kind: String,

        #[arg(long)]
        genre: Option<String>,

        /// Premise for a custom story
        #[arg(long)]
        idea: Option<String>,

        #[arg(long)]
        no_illustrations: bool,

        /// Spend registered credits instead of guest credits
        #[arg(long)]
        registered: bool,

        /// File holding balances and the story between runs
        #[arg(long, default_value = "story.json")]
        state: PathBuf,

        /// Continue the saved story
        #[arg(long)]
        resume: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            port,
            groq_api_key,
            groq_model,
            stability_api_key,
            no_translate,
        } => {
            let chat: Arc<dyn ChatProvider> = match groq_api_key {
                Some(key) => {
                    let mut groq = groq::Groq::new(key)?;
                    if let Some(model) = groq_model {
                        groq = groq.with_model(model);
                    }
                    info!(model = groq.model(), "chat provider ready");
                    Arc::new(groq)
                }
                None => {
                    warn!("GROQ_API_KEY not set, chat completions will fail");
                    Arc::new(Unconfigured("GROQ_API_KEY"))
                }
            };

            let images: Arc<dyn ImageProvider> = match stability_api_key {
                Some(key) => Arc::new(stability::Stability::new(key)?),
                None => {
                    warn!("STABILITY_API_KEY not set, illustrations will fail");
                    Arc::new(Unconfigured("STABILITY_API_KEY"))
                }
            };

            let mut state = AppState::new(chat.clone(), images);
            if !no_translate {
                state = state.with_translator(Arc::new(ChatTranslator::new(chat)));
            }
            server::run(port, state).await
        }

        Command::Play {
            name,
            api_base,
            kind,
            genre,
            idea,
            no_illustrations,
            registered,
            state,
            resume,
        } => {
            let preferences = match StoryKind::parse(&kind) {
                Some(StoryKind::Personal) => StoryPreferences::personal(),
                Some(StoryKind::Genre) => StoryPreferences::genre(genre.unwrap_or_default()),
                Some(StoryKind::Custom) => StoryPreferences::custom(idea.unwrap_or_default()),
                None => bail!("Unknown story kind '{kind}'. Use personal, genre or custom."),
            }
            .with_illustrations(!no_illustrations);

            let config = StoryConfig::new()
                .with_api_base(api_base)
                .with_actor(actor_from_flag(registered));

            run_headless(PlayConfig {
                username: name,
                config,
                preferences,
                state_path: state,
                resume,
            })
            .await
        }
    }
}
