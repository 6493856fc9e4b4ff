//! Realtime conversational voice core: a persistent session to a
//! streaming voice model, microphone capture with VAD/gating, response
//! audio playback, and a small cognition actor dispatching tool calls.
//!
//! Composition root: [`core::RealtimeVoiceCore`].

pub mod bus;
pub mod capture;
pub mod cognition;
pub mod core;
pub mod event;
pub mod mic_mutex;
pub mod synthesis;
pub mod transport;

pub use bus::MessageBus;
pub use core::RealtimeVoiceCore;
pub use mic_mutex::{MicMutex, MicMutexGuard};
pub use transport::SessionTransport;
