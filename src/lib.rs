//! Realtime Voice Core - conversational voice pipeline for a robot/device
//! collaborator
//!
//! - A persistent WebSocket session to a streaming voice model
//! - Microphone capture with chunk-level VAD, gating, and a mic mutex that
//!   stops the capture pipeline from feeding back the assistant's own speech
//! - Response audio playback with WAV persistence
//! - A small cognition actor dispatching tool calls to external
//!   collaborators (gestures, memory, vision, navigation)
//!
//! # Example
//!
//! ```ignore
//! use my_agent::config::Config;
//! use my_agent::voice::realtime::RealtimeVoiceCore;
//! use my_agent::voice::realtime::event::SessionConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let core = RealtimeVoiceCore::new(&config.realtime_voice)?;
//!     core.start(SessionConfig::new("gpt-realtime", "alloy", "be helpful")).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod security;
pub mod voice;

pub use config::Config;

pub use security::{set_api_key, get_api_key, delete_api_key};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - Realtime Voice Core", NAME, VERSION)
}
