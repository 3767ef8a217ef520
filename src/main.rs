// ABOUTME: Entry point for the parley terminal client.
// ABOUTME: Initializes logging and configuration, then runs chat, ask, history, new or reset.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parley::render;
use parley::repl;
use parley_agent::AgentRegistry;
use parley_core::{
    Config, ConversationStore, EnvCredentials, Gateway, SessionManager, SqliteStore,
    SubmitOutcome,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Turn-based chat with a configured agent backend", long_about = None)]
struct Cli {
    /// Config file to use instead of the standard lookup
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat in the last session (default)
    Chat,
    /// Send one message in the last session and print the reply
    Ask {
        #[arg(required = true, trailing_var_arg = true)]
        text: Vec<String>,
    },
    /// Print the last session's stored messages
    History,
    /// Start a new session
    New,
    /// Delete every stored conversation
    Reset {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => {
            let mut config = Config::from_file(path)?;
            config.apply_overrides(|key| std::env::var(key).ok())?;
            Ok(config)
        }
        None => Config::load(),
    }
}

async fn confirm(question: &str) -> Result<bool> {
    println!("{} [y/N]", question);
    let mut answer = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut answer)
        .await
        .context("Failed to read confirmation")?;
    Ok(render::is_confirmed(&answer))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    init_logging(cli.json);

    let config = load_config(cli.config.as_ref())?;
    let storage_path = config.storage_path();
    let store = Arc::new(SqliteStore::open(&storage_path)?);
    tracing::debug!(storage = %storage_path.display(), "Configuration loaded");

    match cli.command.unwrap_or(Command::Chat) {
        Command::History => {
            let Some(session_id) = store.last_session_id()? else {
                println!("No conversations yet.");
                return Ok(());
            };
            println!("Session {}", session_id);
            for message in store.load(&session_id)? {
                println!("{}", render::message_line(&message));
            }
        }
        Command::Reset { yes } => {
            if !yes && !confirm("Delete every stored conversation?").await? {
                println!("Reset cancelled.");
                return Ok(());
            }
            SessionManager::new(store).reset_all()?;
            println!("All conversations deleted.");
        }
        command => {
            let gateway = Gateway::from_config(
                &config,
                &AgentRegistry::default(),
                store,
                Arc::new(EnvCredentials::new()),
            );

            match command {
                Command::New => {
                    let session = gateway.create_session();
                    println!("Started session {}", session.id);
                }
                Command::Ask { text } => {
                    gateway.resume_last_session();
                    match gateway.submit(&text.join(" ")).await {
                        SubmitOutcome::Completed { reply } => println!("{}", reply.text),
                        SubmitOutcome::Failed { reply, failure } => {
                            println!("{}", reply.text);
                            return Err(failure.into());
                        }
                        SubmitOutcome::Ignored(reason) => {
                            anyhow::bail!("nothing was sent ({:?})", reason)
                        }
                    }
                }
                _ => {
                    repl::run(
                        &gateway,
                        BufReader::new(tokio::io::stdin()),
                        tokio::io::stdout(),
                    )
                    .await?
                }
            }
        }
    }

    Ok(())
}
