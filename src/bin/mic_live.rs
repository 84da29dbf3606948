//! Microphone-only live session from the terminal
//!
//! Streams the default microphone to the service and prints transcript and
//! text responses. Requires GEMINI_API_KEY in the environment.

use anyhow::Result;
use lumilive::{EventKind, HostEvent, LiveConfig, LiveEngine, MessageCallback};
use std::sync::Arc;
use tracing::info;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let api_key = std::env::var("GEMINI_API_KEY")?;
    let config = LiveConfig::from_api_key(&api_key);

    let callback: MessageCallback = Arc::new(|event: HostEvent| match event.kind {
        EventKind::Text | EventKind::Transcript => println!("{}", event.message),
        _ => info!("{}: {}", event.kind.as_str(), event.message),
    });

    let mut engine = LiveEngine::new(config, callback)?;
    engine.start();
    engine.start_recording();

    println!("listening; press Enter to stop");
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;

    engine.clean_up();
    Ok(())
}
