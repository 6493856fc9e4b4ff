//! Configuration management
//!
//! Manages the realtime voice core's on-disk configuration.

use anyhow::{Result, Context};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Realtime voice core configuration
    #[serde(default)]
    pub realtime_voice: RealtimeVoiceConfig,
}

/// Configuration for the realtime voice core (`voice::realtime`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeVoiceConfig {
    /// Session transport URL
    #[serde(default = "default_realtime_url")]
    pub url: String,
    /// Model name presented in `session.update`
    #[serde(default = "default_realtime_model")]
    pub model_name: String,
    /// Voice name presented in `session.update`
    #[serde(default = "default_realtime_voice")]
    pub voice: String,
    /// Sampling temperature for the remote model
    #[serde(default = "default_realtime_temperature")]
    pub temperature: f32,
    /// Samples per capture chunk (200ms at 24kHz = 4800)
    #[serde(default = "default_chunk_samples")]
    pub chunk_samples: usize,
    /// Software gain applied to captured samples before VAD/send
    #[serde(default = "default_software_gain")]
    pub software_gain: f32,
    /// RMS threshold (0.0-1.0) above which a chunk counts as speech
    #[serde(default = "default_vad_threshold")]
    pub vad_threshold: f32,
    /// Consecutive loud chunks required to declare speech onset. At the
    /// default 200ms chunk size, 2 chunks is the smallest whole-chunk
    /// count that covers the spec's 300ms `min_speech_duration_ms`.
    #[serde(default = "default_vad_onset_chunks")]
    pub vad_onset_chunks: u32,
    /// Consecutive quiet chunks required to declare speech end
    #[serde(default = "default_vad_hangover_chunks")]
    pub vad_hangover_chunks: u32,
    /// Chunks of pre-speech padding retained in the ring buffer
    #[serde(default = "default_padding_capacity_chunks")]
    pub padding_capacity_chunks: usize,
    /// Minimum milliseconds between consecutive input buffer commits
    #[serde(default = "default_commit_cooldown_ms")]
    pub commit_cooldown_ms: u64,
    /// Number of recent response WAV files to retain on disk
    #[serde(default = "default_wav_retention_count")]
    pub wav_retention_count: usize,
    /// Maximum sequential tool calls handled per response before the
    /// cognition actor stops dispatching further calls
    #[serde(default = "default_tool_chain_max_iterations")]
    pub tool_chain_max_iterations: usize,
    /// Whether the client-side chunk VAD is authoritative for speech
    /// onset/offset and manual buffer commits. Set to `false` when the
    /// session is configured with server-side turn detection, so only
    /// one VAD is ever in charge.
    #[serde(default = "default_vad_enabled")]
    pub vad_enabled: bool,
    /// Outbound transport queue capacity before the oldest queued
    /// event is dropped.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
}

fn default_realtime_url() -> String {
    "wss://realtime.my-agent.internal/voice".to_string()
}

fn default_realtime_model() -> String {
    "gpt-realtime".to_string()
}

fn default_realtime_voice() -> String {
    "alloy".to_string()
}

fn default_realtime_temperature() -> f32 {
    0.8
}

fn default_chunk_samples() -> usize {
    4_800
}

fn default_software_gain() -> f32 {
    1.0
}

fn default_vad_threshold() -> f32 {
    0.02
}

fn default_vad_onset_chunks() -> u32 {
    2
}

fn default_vad_hangover_chunks() -> u32 {
    2
}

fn default_padding_capacity_chunks() -> usize {
    2
}

fn default_commit_cooldown_ms() -> u64 {
    2000
}

fn default_wav_retention_count() -> usize {
    10
}

fn default_tool_chain_max_iterations() -> usize {
    4
}

fn default_vad_enabled() -> bool {
    true
}

fn default_outbound_queue_capacity() -> usize {
    100
}

impl Default for RealtimeVoiceConfig {
    fn default() -> Self {
        Self {
            url: default_realtime_url(),
            model_name: default_realtime_model(),
            voice: default_realtime_voice(),
            temperature: default_realtime_temperature(),
            chunk_samples: default_chunk_samples(),
            software_gain: default_software_gain(),
            vad_threshold: default_vad_threshold(),
            vad_onset_chunks: default_vad_onset_chunks(),
            vad_hangover_chunks: default_vad_hangover_chunks(),
            padding_capacity_chunks: default_padding_capacity_chunks(),
            commit_cooldown_ms: default_commit_cooldown_ms(),
            wav_retention_count: default_wav_retention_count(),
            tool_chain_max_iterations: default_tool_chain_max_iterations(),
            vad_enabled: default_vad_enabled(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
        }
    }
}

impl Config {
    /// Load configuration from file, writing defaults if absent.
    pub fn load() -> Result<Self> {
        let config_path = config_path()?;

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .context("Failed to read config file")?;
            let config: Config = toml::from_str(&contents)
                .context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = config_path()?;
        let parent = config_path.parent()
            .context("Config path has no parent")?;

        std::fs::create_dir_all(parent)
            .context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "my-agent", "my-agent")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "my-agent", "my-agent")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}
