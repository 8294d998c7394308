//! Terminal runner for a voice journey.
//!
//! Drives the engine against a journey server from the command line:
//! typed lines become turns, engine events print as they arrive. Useful
//! for exercising a server without a browser host.

use clap::Parser;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use wayfarer::engine::{Engine, EngineCommand, JourneyContext};
use wayfarer::events::{EngineEvent, EventSender};
use wayfarer::EngineConfig;

/// Wayfarer: voice journey client engine.
#[derive(Parser)]
#[command(name = "wayfarer", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Journey attempt identifier.
    #[arg(short, long)]
    attempt_id: String,

    /// Override the configured server base URL.
    #[arg(long)]
    base_url: Option<String>,

    /// The journey expects feedback before completing.
    #[arg(long)]
    awaiting_feedback: bool,

    /// Auto-start the journey instead of waiting for the first line.
    #[arg(long)]
    auto_start: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wayfarer=info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = if let Some(ref path) = cli.config {
        EngineConfig::from_file(path)?
    } else {
        EngineConfig::default()
    };
    if let Some(base_url) = cli.base_url {
        config.api.base_url = base_url;
    }

    let journey = JourneyContext {
        attempt_id: cli.attempt_id,
        awaiting_feedback: cli.awaiting_feedback,
        summary_html: None,
    };

    let (events, mut event_rx) = EventSender::channel();
    let (engine, handle) = Engine::with_speaker_output(config, journey, events)?;
    let engine_task = tokio::spawn(engine.run());

    if cli.auto_start {
        handle.command(EngineCommand::StartJourney);
    }

    // Printer: one line per engine event.
    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            print_event(&event);
        }
    });

    // Stdin: each line is the next turn; EOF shuts down.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let input = line.trim().to_string();
        if input.is_empty() {
            continue;
        }
        handle.command(EngineCommand::SubmitText { input });
    }

    handle.command(EngineCommand::Shutdown);
    engine_task.await?;
    printer.abort();
    Ok(())
}

fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::TextSnapshot { html, .. } => println!("[text] {html}"),
        EngineEvent::Progress { percent } => println!("[progress] {percent}%"),
        EngineEvent::InputsLocked => println!("[inputs] locked"),
        EngineEvent::InputsUnlocked => println!("[inputs] unlocked"),
        EngineEvent::Recording(state) => println!("[recording] {state:?}"),
        EngineEvent::TranscriptionReady { text } => println!("[transcribed] {text}"),
        EngineEvent::TurnSubmitted { input } => println!("[turn] {input}"),
        EngineEvent::OutputComplete { response_id } => {
            println!("[complete] response {response_id:?}");
        }
        EngineEvent::FeedbackRequested => println!("[feedback] requested"),
        EngineEvent::SummaryReady { html } => println!("[summary] {html}"),
        EngineEvent::Notice { message } => println!("[notice] {message}"),
    }
}
