//! Agri Voice console
//!
//! Drives the voice loop from a terminal against a real voice query backend.
//! Typed lines stand in for speech and answers are "spoken" as printed text.
//!
//! | Input | Action |
//! |-------|--------|
//! | (empty line) | mic button: start listening / stop and submit |
//! | any text | heard as speech while listening |
//! | `/loc <lat> <lon>` | attach a location to later queries |
//! | `/loc off` | stop sending a location |
//! | `/state` | print the session snapshot |
//! | `/quit` | exit |

mod engines;

use agri_voice::{
    GeoPoint, HttpVoiceBackend, VoiceConfig, VoiceEngines, VoiceHandle,
    VoiceInteractionStateMachine, VoiceUpdate,
};
use anyhow::Context;
use engines::{ConsoleRecognizer, ConsoleSynthesizer};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[agri-voice-console] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn,agri::voice=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = VoiceConfig::load().context("load voice config")?;
    let backend = HttpVoiceBackend::new(&config.backend).context("build voice backend")?;
    tracing::info!(
        base_url = %config.backend.base_url,
        locale = %config.locale,
        "Agri voice console started"
    );

    let recognizer = Arc::new(ConsoleRecognizer::default());
    let engines = VoiceEngines {
        recognizer: recognizer.clone(),
        synthesizer: Arc::new(ConsoleSynthesizer::default()),
        backend: Arc::new(backend),
    };
    let (handle, machine) =
        VoiceInteractionStateMachine::spawn(config, engines).context("start voice machine")?;

    let printer = tokio::spawn(print_updates(handle.subscribe()));
    println!("Press Enter to talk, Enter again to send. /state, /loc <lat> <lon>, /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("read stdin")? else { break };
                if !handle_line(&handle, &recognizer, line.trim()).await? {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("CTRL-C received; shutting down");
                break;
            }
        }
    }

    handle.shutdown().ok();
    machine.await.context("voice machine task")?;
    printer.abort();
    Ok(())
}

/// Returns false when the user asked to quit.
async fn handle_line(
    handle: &VoiceHandle,
    recognizer: &ConsoleRecognizer,
    line: &str,
) -> anyhow::Result<bool> {
    match line {
        "" => handle.toggle()?,
        "/quit" => return Ok(false),
        "/state" => {
            let snapshot = handle.snapshot().await?;
            println!(
                "state={} request={} transcript={:?} messages={}",
                snapshot.state,
                snapshot.current_request_id.as_deref().unwrap_or("-"),
                snapshot.transcript,
                snapshot.messages.len()
            );
        }
        "/loc off" => handle.set_location(None)?,
        _ if line.starts_with("/loc ") => match parse_location(&line[5..]) {
            Some(point) => handle.set_location(Some(point))?,
            None => println!("usage: /loc <lat> <lon>"),
        },
        text => {
            if !recognizer.hear(text) {
                println!("(not listening, press Enter first)");
            }
        }
    }
    Ok(true)
}

fn parse_location(args: &str) -> Option<GeoPoint> {
    let mut parts = args.split_whitespace();
    let lat = parts.next()?.parse().ok()?;
    let lon = parts.next()?.parse().ok()?;
    Some(GeoPoint { lat, lon })
}

async fn print_updates(mut updates: broadcast::Receiver<VoiceUpdate>) {
    loop {
        match updates.recv().await {
            Ok(VoiceUpdate::StateChanged { to, .. }) => println!("── {} ──", to),
            Ok(VoiceUpdate::Transcript(t)) => println!("🎤 {}", t.text),
            Ok(VoiceUpdate::MessageAppended(m)) => {
                println!("[{:?}] {}", m.role(), m.content())
            }
            Ok(VoiceUpdate::Failure(e)) => println!("⚠️  {}", e),
            Ok(VoiceUpdate::Caption { .. }) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "console fell behind on updates")
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
