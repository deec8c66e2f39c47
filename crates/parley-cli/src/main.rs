use std::collections::BTreeSet;
use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;
use parley_cli::{Cli, CliError, Commands, ParleyClient};
use parley_context::{Conversation, Role, Turn};
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};

const REPL_COMMANDS: &[&str] = &["/reset", "/system", "/history", "/help", "/exit", "/quit"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReplCommand {
    Say(String),
    Reset,
    System(Option<String>),
    History,
    Help,
    Exit,
    Empty,
    Unknown(String),
}

#[derive(Default)]
struct ReplHelper;

impl Helper for ReplHelper {}
impl Hinter for ReplHelper {
    type Hint = String;
}
impl Highlighter for ReplHelper {}
impl Validator for ReplHelper {}

impl Completer for ReplHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let pos = pos.min(line.len());
        let input = &line[..pos];
        if !input.starts_with('/') || input.contains(char::is_whitespace) {
            return Ok((pos, Vec::new()));
        }

        let pairs = complete_candidates(input)
            .into_iter()
            .map(|candidate| Pair {
                display: candidate.to_string(),
                replacement: candidate.to_string(),
            })
            .collect();
        Ok((0, pairs))
    }
}

fn parse_command(line: &str) -> ReplCommand {
    let line = line.trim();
    if line.is_empty() {
        return ReplCommand::Empty;
    }
    if !line.starts_with('/') {
        return ReplCommand::Say(line.to_string());
    }

    let mut parts = line.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default();
    let tail = parts.next().map(str::trim).unwrap_or_default();

    match command {
        "/exit" | "/quit" => ReplCommand::Exit,
        "/help" => ReplCommand::Help,
        "/reset" => ReplCommand::Reset,
        "/history" => ReplCommand::History,
        "/system" if tail.is_empty() => ReplCommand::System(None),
        "/system" => ReplCommand::System(Some(tail.to_string())),
        _ => ReplCommand::Unknown(format!("unknown command: {command}")),
    }
}

fn help_text() -> String {
    [
        "Commands:",
        "  <message>          Send a message and print the reply",
        "  /system [text]     Set the system preamble (clear it without text)",
        "  /history           Print the conversation so far",
        "  /reset             Forget the conversation",
        "  /help              Show this help",
        "  /exit | /quit      Exit REPL",
    ]
    .join("\n")
}

#[derive(Debug)]
struct ReplState {
    conversation: Conversation,
    client: ParleyClient,
}

impl ReplState {
    fn new(server: &str, system: Option<String>) -> Result<Self, CliError> {
        Ok(Self {
            conversation: Conversation::new(system),
            client: ParleyClient::new(server)?,
        })
    }
}

#[tokio::main]
async fn main() {
    let (server, system) = if std::env::args().count() > 1 {
        let cli = Cli::parse();
        match cli.command {
            Commands::Chat { system } => (cli.server, system),
            _ => {
                match parley_cli::run(cli).await {
                    Ok(output) => println!("{output}"),
                    Err(err) => {
                        eprintln!("error: {err}");
                        std::process::exit(1);
                    }
                }
                return;
            }
        }
    } else {
        let server = std::env::var("PARLEY_SERVER")
            .unwrap_or_else(|_| "http://127.0.0.1:5000".to_string());
        (server, None)
    };

    let mut state = match ReplState::new(&server, system) {
        Ok(state) => state,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    };

    let mut editor = match Editor::<ReplHelper, rustyline::history::DefaultHistory>::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("error: failed to start REPL: {err}");
            std::process::exit(1);
        }
    };
    editor.set_helper(Some(ReplHelper));
    let history = history_file();
    let _ = editor.load_history(&history);

    println!(
        "{}",
        format!("Parley chat against {server}. Type `/help`.").bright_green()
    );
    loop {
        match editor.readline("you> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(trimmed);
                match run_repl_command(&mut state, parse_command(trimmed)).await {
                    Ok(should_exit) => {
                        if should_exit {
                            break;
                        }
                    }
                    Err(err) => eprintln!("{} {}", "error:".red(), err),
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted)
            | Err(rustyline::error::ReadlineError::Eof) => {
                println!();
                break;
            }
            Err(err) => {
                eprintln!("{} {err}", "error:".red());
                break;
            }
        }
    }

    if let Err(err) = editor.save_history(&history) {
        eprintln!("{} failed to save history: {err}", "warning:".yellow());
    }
}

async fn run_repl_command(state: &mut ReplState, command: ReplCommand) -> Result<bool, CliError> {
    match command {
        ReplCommand::Say(message) => {
            // Only commit the user turn once the gateway answers.
            let mut pending = state.conversation.clone();
            pending.push(Turn::user(message));
            let updated = state.client.converse(&pending).await?;
            if let Some(reply) = updated.last() {
                println!("{} {}", "bot>".cyan(), reply.text());
            }
            state.conversation = updated;
        }
        ReplCommand::Reset => {
            state.conversation.clear();
            println!("{}", "conversation cleared".green());
        }
        ReplCommand::System(system) => {
            let label = if system.is_some() {
                "system preamble set"
            } else {
                "system preamble cleared"
            };
            state.conversation.set_system(system);
            println!("{}", label.green());
        }
        ReplCommand::History => print_history(&state.conversation),
        ReplCommand::Help => {
            println!("{}", help_text().bright_blue());
        }
        ReplCommand::Exit => {
            println!("{}", "bye".bright_green());
            return Ok(true);
        }
        ReplCommand::Empty => {}
        ReplCommand::Unknown(message) => {
            println!("{} {message}", "warning:".yellow());
            println!("{}", "Type `/help` for available commands.".yellow());
        }
    }

    Ok(false)
}

fn print_history(conversation: &Conversation) {
    if !conversation.system().is_empty() {
        println!("{} {}", "system:".dimmed(), conversation.system());
    }
    if conversation.is_empty() {
        println!("{}", "no turns yet".yellow());
        return;
    }
    for turn in conversation.turns() {
        let label = format!("{}:", turn.role().as_str());
        let label = match turn.role() {
            Role::User => label.green(),
            Role::Assistant => label.cyan(),
            Role::System => label.dimmed(),
        };
        println!("{label} {}", turn.text());
    }
}

fn history_file() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".parley-cli-history");
    }
    PathBuf::from(".parley-cli-history")
}

fn complete_candidates(prefix: &str) -> BTreeSet<&'static str> {
    REPL_COMMANDS
        .iter()
        .copied()
        .filter(|command| command.starts_with(prefix))
        .collect()
}
