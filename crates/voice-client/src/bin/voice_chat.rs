//! Talk to the docweaver voice relay from the terminal.

use anyhow::Context;
use clap::Parser;
use docweaver_voice::{
    ConnectionState, VoiceBridge,
    native::{CpalMicrophone, CpalSpeaker},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Voice chat with the API documentation assistant")]
struct Args {
    /// Relay endpoint to connect to.
    #[arg(long, default_value = "ws://127.0.0.1:3000/realtime-voice")]
    url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();

    let args = Args::parse();
    let mut bridge = VoiceBridge::new(
        args.url,
        Box::new(CpalMicrophone::new()),
        Box::new(CpalSpeaker::new()),
    );
    let mut state_rx = bridge.subscribe_state();
    let mut transcript_rx = bridge.subscribe_transcript();

    bridge
        .connect()
        .await
        .context("Failed to start the voice session")?;
    info!("Connected. Press Ctrl+C to hang up.");

    let mut printed_lines = 0;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl+C");
                }
                break;
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *state_rx.borrow_and_update();
                info!(%state, "Voice state");
                if state == ConnectionState::Closed {
                    break;
                }
            }
            changed = transcript_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let transcript = transcript_rx.borrow_and_update().clone();
                let lines: Vec<&str> = transcript.lines().collect();
                // The last line may still be growing; print it once the next one starts.
                let complete = lines.len().saturating_sub(1);
                for line in lines.iter().take(complete).skip(printed_lines) {
                    println!("{line}");
                }
                printed_lines = printed_lines.max(complete);
            }
        }
    }

    let transcript = bridge.transcript();
    if let Some(last) = transcript.lines().nth(printed_lines) {
        println!("{last}");
    }
    bridge.disconnect().await;
    info!("Disconnected.");
    Ok(())
}
