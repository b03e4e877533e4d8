//! Command parsing for relay triggers and the console.
//!
//! Messages posted to a chat surface are only acted on when they start with
//! the `/ai` trigger. The console front end additionally understands a few
//! local slash commands that never reach the chat surface.

/// The trigger every relay command starts with.
pub const TRIGGER: &str = "/ai";

/// A parsed relay command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayCommand {
    /// Ask the model; the prompt is trimmed and never empty.
    Prompt(String),

    /// Clear the conversation for the channel.
    Reset,

    /// The trigger was used without a usable argument.
    Invalid(String),
}

/// Parses a chat message for a relay command.
///
/// Returns `None` when the message is not addressed to the relay.
///
/// # Examples
///
/// ```
/// # use chatrelay::chat::{parse_command, RelayCommand};
/// assert_eq!(
///     parse_command("/ai what is rust?"),
///     Some(RelayCommand::Prompt("what is rust?".to_string()))
/// );
/// assert_eq!(parse_command("/ai RESET"), Some(RelayCommand::Reset));
/// assert!(parse_command("hello there").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<RelayCommand> {
    let input = input.trim();
    let rest = input.strip_prefix(TRIGGER)?;
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }

    let argument = rest.trim();
    let result = if argument.is_empty() {
        RelayCommand::Invalid(format!("Please provide a prompt after `{TRIGGER}`"))
    } else if argument.eq_ignore_ascii_case("reset") {
        RelayCommand::Reset
    } else {
        RelayCommand::Prompt(argument.to_string())
    };
    Some(result)
}

/// A command understood by the console front end only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Display help information.
    Help,

    /// Exit the console.
    Quit,

    /// Display session statistics.
    Stats,

    /// Print the turns of the current conversation.
    History,

    /// Save the transcript to a file.
    SaveTranscript(String),

    /// Load conversation history from a file.
    LoadTranscript(String),

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses console input for a local slash command.
///
/// Relay triggers and plain text are not console commands and yield `None`.
pub fn parse_console_command(input: &str) -> Option<ConsoleCommand> {
    let input = input.trim();
    if !input.starts_with('/') || parse_command(input).is_some() {
        return None;
    }

    let mut parts = input[1..].splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" | "q" => ConsoleCommand::Quit,
        "stats" | "status" => ConsoleCommand::Stats,
        "history" => ConsoleCommand::History,
        "save" => match argument {
            Some(arg) => ConsoleCommand::SaveTranscript(arg.to_string()),
            None => ConsoleCommand::Invalid("/save requires a file path".to_string()),
        },
        "load" => match argument {
            Some(arg) => ConsoleCommand::LoadTranscript(arg.to_string()),
            None => ConsoleCommand::Invalid("/load requires a file path".to_string()),
        },
        _ => ConsoleCommand::Invalid(format!("Unknown command: /{command}")),
    };

    Some(result)
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /ai <prompt>           Ask the AI (plain text does the same)
  /ai reset              Clear the conversation history
  /history               Show the current conversation
  /save <file>           Save the current transcript
  /load <file>           Load a transcript from disk
  /stats                 Show session statistics
  /help                  Show this help message
  /quit                  Exit
Conversations are cleared after a period of inactivity."#
}
