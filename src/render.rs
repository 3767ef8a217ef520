// ABOUTME: Plain-text rendering of conversation state and parsing of chat-loop input.
// ABOUTME: Markup in agent replies is printed as-is.

use parley_core::{Message, ProgressState};

/// Line typed at the chat prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Utterance(String),
    NewSession,
    Reset,
    Help,
    Quit,
    Unknown(String),
}

pub fn parse_input(line: &str) -> Input {
    let trimmed = line.trim();
    let Some(command) = trimmed.strip_prefix('/') else {
        return Input::Utterance(trimmed.to_string());
    };

    match command.split_whitespace().next().unwrap_or("") {
        "new" => Input::NewSession,
        "reset" => Input::Reset,
        "help" | "?" => Input::Help,
        "quit" | "exit" | "q" => Input::Quit,
        other => Input::Unknown(other.to_string()),
    }
}

pub const HELP: &str = "\
/new     start a new conversation
/reset   delete every stored conversation
/help    show this help
/quit    leave";

pub fn message_line(message: &Message) -> String {
    let who = if message.is_from_user() {
        "you"
    } else {
        message.sender.as_str()
    };
    format!("{}> {}", who, message.text)
}

/// Status line for an in-flight turn; nothing while idle
pub fn progress_line(progress: &ProgressState) -> Option<String> {
    if progress.is_idle() {
        return None;
    }
    if progress.latest_rationale.is_empty() {
        Some(format!("  ... step {}", progress.steps_completed))
    } else {
        Some(format!(
            "  ... step {}: {}",
            progress.steps_completed, progress.latest_rationale
        ))
    }
}

/// Whether a confirmation answer accepts a destructive action
pub fn is_confirmed(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
