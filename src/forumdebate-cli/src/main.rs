//! ForumDebate CLI - Public Forum Debate Room
//!
//! Runs a moderated public forum debate in the terminal. Team T2 (and
//! debater B in single mode) are AI debaters; you speak as debater A.

use clap::{ArgAction, Parser};
use colored::Colorize;
use forumdebate_core::agent::AgentRole;
use forumdebate_core::persist::ArtifactStore;
use forumdebate_core::room::Inbox;
use forumdebate_core::{
    BackendConfig, Config, DebateError, DebateMessage, DebateSession, DebaterId, FinalResults,
    LlmClient, Mode, OpenAIEvaluator, OpenAISpeaker, RoomConnection, RoomTransport,
    RoundView, SessionConfig, default_config,
};
use std::env;
use std::io::BufRead;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Parser)]
#[command(
    name = "forumdebate",
    version,
    about = "Public forum debate room - debate AI opponents in your terminal",
    long_about = "Runs a timed public forum debate with an AI moderator, judge and debaters using OpenAI-compatible APIs."
)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Seating mode: "single" (you alone on team T1) or "multi"
    #[arg(long, value_name = "MODE")]
    mode: Option<String>,

    /// Room name, used in saved file names
    #[arg(long, default_value = "debate-room", value_name = "ROOM")]
    room: String,

    /// Model for the AI debaters (and the judge unless --judge-model is set)
    #[arg(short, long, value_name = "MODEL")]
    model: Option<String>,

    /// Model for the judge
    #[arg(long, value_name = "MODEL")]
    judge_model: Option<String>,

    /// Directory for transcripts and results
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Multiply every round duration, e.g. 0.1 for a quick demo
    #[arg(long, default_value_t = 1.0, value_name = "FACTOR")]
    time_scale: f64,

    /// Seed for the side and topic draw
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => default_config(),
    };
    if let Some(mode) = &cli.mode {
        config.debate.mode = Mode::from_str(mode)?;
    }
    if let Some(model) = &cli.model {
        config.debaters.model = model.clone();
        config.judge.model = model.clone();
    }
    if let Some(model) = &cli.judge_model {
        config.judge.model = model.clone();
    }
    if let Some(dir) = &cli.output {
        config.output.dir = dir.clone();
    }

    let mut session_config = SessionConfig::from_config(&cli.room, &config, cli.time_scale)?;
    session_config.seed = cli.seed;

    // Get API configuration from environment
    let api_base = env::var("OPENAI_API_BASE")
        .or_else(|_| env::var("OPENAI_BASE_URL"))
        .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

    let api_key = env::var("OPENAI_API_KEY").unwrap_or_else(|_| {
        eprintln!(
            "{}",
            "Warning: OPENAI_API_KEY not set. API calls may fail.".yellow()
        );
        String::new()
    });

    let client = LlmClient::new(&BackendConfig::new(api_base, api_key))?;
    let evaluator = OpenAIEvaluator::new(
        client.clone(),
        config.judge.model.clone(),
        config.judge.max_tokens,
        config.judge.temperature,
    );
    let speaker = OpenAISpeaker::new(
        client,
        config.debaters.model.clone(),
        config.debaters.max_tokens,
        config.debaters.temperature,
    );

    let mode = config.debate.mode;
    let session = DebateSession::prepare(session_config, Arc::new(evaluator), Arc::new(speaker))?;

    print_header(&cli.room, mode, &config);

    let (_, audience) = session.room().join("audience");
    tokio::spawn(print_room(audience));
    spawn_console(&session, mode)?;

    let results = session.run().await?;
    print_results(&results);
    println!(
        "{} {}",
        "Results saved to".dimmed(),
        ArtifactStore::new(&config.output.dir)
            .results_path(&cli.room)
            .display()
    );

    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbosity: u8) {
    use tracing_subscriber::EnvFilter;

    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();
}

fn print_header(room: &str, mode: Mode, config: &Config) {
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!(
        "{}",
        format!("  {} - Public Forum Debate", "ForumDebate".bold())
            .bright_blue()
            .bold()
    );
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    println!("{} {}", "Room:".bold(), room.bright_white());
    println!("{} {}", "Mode:".bold(), mode.to_string().yellow());
    println!(
        "{} debaters {}, judge {}",
        "Models:".bold(),
        config.debaters.model.dimmed(),
        config.judge.model.dimmed()
    );
    println!();
    println!("{}", "You are debater A. Type to speak.".bold());
    println!("  {}  request prep time for a team", "/prep T1".bright_cyan());
    if mode == Mode::Multi {
        println!("  {}  speak as debater B", "/b <text>".bright_cyan());
    }
    println!();
    println!("{}", "─".repeat(70).dimmed());
}

/// Print everything broadcast in the room until it closes.
async fn print_room(mut inbox: Inbox) {
    let mut view = RoundView::default();
    let mut shown_round = None;

    while let Some(envelope) = inbox.recv().await {
        let message = match envelope.decode() {
            Ok(message) => message,
            Err(e) => {
                warn!(from = %envelope.from, error = %e, "Unreadable room message");
                continue;
            }
        };
        match message {
            DebateMessage::Announcement { message } => {
                println!(
                    "{} {}",
                    format!("📢 {}:", envelope.from.to_uppercase()).bright_magenta().bold(),
                    message
                );
            }
            DebateMessage::State {
                round,
                round_index,
                speakers,
                time_remaining,
            } => {
                if view.apply(round_index, &round, &speakers, time_remaining) && shown_round != Some(round_index) {
                    shown_round = Some(round_index);
                    let names: Vec<String> = speakers.ids().iter().map(|id| id.to_string()).collect();
                    println!();
                    println!("{}", "═".repeat(70).bright_magenta());
                    println!(
                        "{}",
                        format!("  Round {}: {} ({:.0}s)", round_index + 1, round, time_remaining)
                            .bright_magenta()
                            .bold()
                    );
                    println!("  {}", format!("Speakers: {}", names.join(", ")).dimmed());
                    println!("{}", "═".repeat(70).bright_magenta());
                }
            }
            DebateMessage::Transcript { text } => {
                println!("{} {}", "▶".bright_cyan(), envelope.from.bright_cyan().bold());
                for line in textwrap(&text, 66).lines() {
                    println!("  {}", line);
                }
                println!();
            }
            DebateMessage::Scores {
                round,
                t1_score,
                t2_score,
                explanation,
            } => {
                println!(
                    "{} {}  T1 {}  T2 {}",
                    "⚖".yellow(),
                    round.yellow().bold(),
                    t1_score.to_string().bright_white().bold(),
                    t2_score.to_string().bright_white().bold()
                );
                for line in textwrap(&explanation, 66).lines() {
                    println!("  {}", line.dimmed());
                }
                println!("{}", "─".repeat(70).dimmed());
            }
            // Final results are printed once the session returns.
            _ => {}
        }
    }
}

/// Read stdin lines on a plain thread and act on them in the room as the
/// human debaters.
fn spawn_console(session: &DebateSession, mode: Mode) -> Result<(), DebateError> {
    let (debater_a, _) = session.join_seat(&AgentRole::Debater(DebaterId::A).identity())?;
    let debater_b = match mode {
        Mode::Multi => Some(session.join_seat(&AgentRole::Debater(DebaterId::B).identity())?.0),
        Mode::Single => None,
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if let Err(e) = handle_console_line(line.trim(), &debater_a, debater_b.as_ref()).await {
                eprintln!("{} {}", "Error:".red().bold(), e);
                if debater_a.room().is_closed() {
                    break;
                }
            }
        }
    });
    Ok(())
}

async fn handle_console_line(
    line: &str,
    debater_a: &RoomConnection,
    debater_b: Option<&RoomConnection>,
) -> Result<(), DebateError> {
    if line.is_empty() {
        return Ok(());
    }
    if let Some(team) = line.strip_prefix("/prep") {
        return debater_a
            .send(
                &DebateMessage::RequestPrepTime {
                    team: team.trim().to_uppercase(),
                },
                AgentRole::Moderator,
            )
            .await;
    }
    if let Some(text) = line.strip_prefix("/b ") {
        return match debater_b {
            Some(b) => {
                b.broadcast(&DebateMessage::Transcript {
                    text: text.trim().to_string(),
                })
                .await
            }
            None => {
                eprintln!("{}", "Debater B is an AI in single mode.".yellow());
                Ok(())
            }
        };
    }
    debater_a
        .broadcast(&DebateMessage::Transcript {
            text: line.to_string(),
        })
        .await
}

fn print_results(results: &FinalResults) {
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!(
        "{}",
        format!("  Winner: {}", results.winner).bright_green().bold()
    );
    println!("{}", "═".repeat(70).bright_blue());
    println!(
        "  {} {:.2}    {} {:.2}",
        "T1 average:".bold(),
        results.t1_avg_score,
        "T2 average:".bold(),
        results.t2_avg_score
    );
    println!(
        "  {} {} / {}",
        "T1:".bright_cyan(),
        results.t1_strengths,
        results.t1_improvements.dimmed()
    );
    println!(
        "  {} {} / {}",
        "T2:".bright_cyan(),
        results.t2_strengths,
        results.t2_improvements.dimmed()
    );
    println!();
    for record in &results.score_history {
        println!(
            "  {:<18} {:>3} {:>3}  {}",
            record.round,
            record.t1_score,
            record.t2_score,
            record.explanation.dimmed()
        );
    }
    println!();
}

/// Simple text wrapping function.
fn textwrap(text: &str, width: usize) -> String {
    let mut result = String::new();
    let mut current_line_len = 0;

    for word in text.split_whitespace() {
        if current_line_len + word.len() + 1 > width && current_line_len > 0 {
            result.push('\n');
            current_line_len = 0;
        }
        if current_line_len > 0 {
            result.push(' ');
            current_line_len += 1;
        }
        result.push_str(word);
        current_line_len += word.len();
    }

    result
}
