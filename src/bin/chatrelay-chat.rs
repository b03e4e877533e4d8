//! Interactive console for the chat relay.
//!
//! The terminal acts as a single channel: every line is handled exactly as a
//! chat message would be, so `/ai <prompt>` and `/ai reset` behave as they do
//! on a chat surface. Plain text is treated as a prompt.
//!
//! # Usage
//!
//! ```bash
//! # Token from CHATRELAY_TOKEN or chatrelay_token.txt
//! chatrelay-chat
//!
//! # Custom endpoint and a settings file
//! chatrelay-chat --endpoint http://localhost:8080/api/ai-chat --config relay.yaml
//!
//! # Disable colors (useful for piping output)
//! chatrelay-chat --no-color
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use chatrelay::chat::{
    ConsoleCommand, PlainTextRenderer, RelayArgs, RelayConfig, Renderer, TRIGGER, help_text,
    load_token, parse_command, parse_console_command,
};
use chatrelay::logging::init_logging;
use chatrelay::{ConsoleSurface, MessageRef, Relay, RelayOutcome, Trigger};

const CHANNEL: &str = "console";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (args, _) = RelayArgs::from_command_line_relaxed("chatrelay-chat [OPTIONS]");
    let config = RelayConfig::resolve(args)?;
    init_logging(&config.log_level, &config.log_format);
    chatrelay::register_biometrics(biometrics::Collector::new());

    let token = load_token(&config)?;
    let surface = ConsoleSurface::stdout().with_save_dir(Some(std::env::temp_dir()));
    let relay = Relay::from_config(&config, token, surface)?;
    let sweeper = relay.spawn_sweeper(config.sweep_interval);

    let interrupted = Arc::new(AtomicBool::new(false));
    let mut renderer =
        PlainTextRenderer::with_color_and_interrupt(config.use_color, interrupted.clone());
    let mut rl = DefaultEditor::new()?;

    let interrupted_clone = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_clone.store(true, Ordering::Relaxed);
    })?;

    println!("Chat relay ({})", config.endpoint);
    println!("Type /help for commands, /quit to exit\n");

    let next_id = AtomicU64::new(1);
    loop {
        interrupted.store(false, Ordering::Relaxed);

        match rl.readline("You: ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                if let Some(cmd) = parse_console_command(line) {
                    if run_console_command(cmd, &relay, &mut renderer).await {
                        break;
                    }
                    continue;
                }

                let content = if parse_command(line).is_some() {
                    line.to_string()
                } else {
                    format!("{TRIGGER} {line}")
                };
                let id = next_id.fetch_add(1, Ordering::Relaxed);
                let trigger = Trigger::new(MessageRef::new(CHANNEL, id.to_string()), content);
                match relay.handle(&trigger, &mut renderer).await {
                    Ok(RelayOutcome::Suppressed) => {
                        renderer.print_error("The surface refused the reply.")
                    }
                    Ok(_) => {}
                    Err(err) => renderer.print_error(&err.to_string()),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {err}"));
                break;
            }
        }
    }

    sweeper.shutdown().await;
    Ok(())
}

/// Runs a console command. Returns true when the console should exit.
async fn run_console_command(
    cmd: ConsoleCommand,
    relay: &Relay<ConsoleSurface>,
    renderer: &mut PlainTextRenderer,
) -> bool {
    match cmd {
        ConsoleCommand::Quit => {
            println!("Goodbye!");
            return true;
        }
        ConsoleCommand::Help => {
            for line in help_text().lines() {
                println!("    {line}");
            }
        }
        ConsoleCommand::Invalid(message) => renderer.print_error(&message),
        ConsoleCommand::Stats => match relay.session(CHANNEL) {
            Ok(session) => {
                let stats = session.lock().await.stats();
                println!("    Session Statistics:");
                println!("      Messages: {}", stats.message_count);
                println!("      Replies: {}", stats.response_count);
                println!(
                    "      Requests: {} ({} failed)",
                    stats.total_requests, stats.failed_requests
                );
                match stats.max_turns {
                    Some(n) => println!("      Replay cap: {n} turns"),
                    None => println!("      Replay cap: (none)"),
                }
                println!("      Live sessions: {}", relay.store().len());
            }
            Err(err) => renderer.print_error(&err.to_string()),
        },
        ConsoleCommand::History => match relay.session(CHANNEL) {
            Ok(session) => {
                let history = session.lock().await.history();
                if history.is_empty() {
                    renderer.print_info("No conversation yet.");
                }
                for turn in history {
                    println!("{}: {}", turn.role, turn.content);
                }
            }
            Err(err) => renderer.print_error(&err.to_string()),
        },
        ConsoleCommand::SaveTranscript(path) => match relay.session(CHANNEL) {
            Ok(session) => match session.lock().await.save_transcript_to(&path) {
                Ok(()) => renderer.print_info(&format!("Transcript saved to {path}")),
                Err(err) => renderer.print_error(&format!("Failed to save transcript: {err}")),
            },
            Err(err) => renderer.print_error(&err.to_string()),
        },
        ConsoleCommand::LoadTranscript(path) => match relay.session(CHANNEL) {
            Ok(session) => match session.lock().await.load_transcript_from(&path) {
                Ok(()) => renderer.print_info(&format!("Transcript loaded from {path}")),
                Err(err) => renderer.print_error(&format!("Failed to load transcript: {err}")),
            },
            Err(err) => renderer.print_error(&err.to_string()),
        },
    }
    false
}
