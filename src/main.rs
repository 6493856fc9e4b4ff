//! Realtime Voice Core
//!
//! Connects to the configured streaming voice model, starts microphone
//! capture, and runs until interrupted.

use my_agent::config::Config;
use my_agent::voice::realtime::event::SessionConfig;
use my_agent::voice::realtime::RealtimeVoiceCore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install Rustls crypto provider for HTTPS/WSS support.
    // Required for Rustls 0.23+.
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install Rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into())
        )
        .init();

    let config = Config::load()?;
    let core = RealtimeVoiceCore::new(&config.realtime_voice)?;

    let session = SessionConfig::new(
        config.realtime_voice.model_name.clone(),
        config.realtime_voice.voice.clone(),
        "You are a helpful voice assistant for a robot collaborator.",
    );

    core.start(session).await?;

    tokio::signal::ctrl_c().await?;
    core.stop();
    Ok(())
}
