//! My Agent - Voice Module
//!
//! Voice processing modules using local implementations:
//! - Whisper (STT - Speech-to-Text)
//! - Piper TTS (Text-to-Speech)
//! - Silero VAD (Voice Activity Detection)
//! - Audio I/O (microphone input, speaker output)
//! - Realtime conversational voice core (`realtime`)

#[cfg(feature = "voice")]
pub mod coordinator;
#[cfg(feature = "voice")]
pub mod audio;
pub mod vad;
pub mod whisper;
#[cfg(feature = "voice")]
pub mod tts;
pub mod stt_local;
pub mod tts_local;
#[cfg(feature = "voice")]
pub mod silero_vad;
pub mod backchannel;
#[cfg(feature = "voice")]
pub mod realtime;
