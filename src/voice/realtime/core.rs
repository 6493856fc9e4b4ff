//! Composition root for the realtime voice core.
//!
//! Builds the bus, mic mutex, transport, and the three actors exactly
//! once and wires subscriptions between them, the same "construct
//! shared services once, pass down" shape `server::ServerState` and
//! `cli::run` use for the rest of this crate, instead of reaching for
//! module-level singletons.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::RealtimeVoiceConfig;

use super::bus::MessageBus;
use super::capture::{CaptureActor, CaptureConfig};
use super::cognition::{CognitionActor, CognitionConfig};
use super::event::{ClientEvent, ServerEvent, SessionConfig};
use super::mic_mutex::MicMutex;
use super::synthesis::{SynthesisActor, SynthesisConfig};
use super::transport::{SessionTransport, TOPIC_SERVER_EVENT};

/// Resolve the session auth token: an env var override first, then the
/// crate's keyring store, matching `OpenRouterClient`'s env-then-keyring
/// precedence.
fn resolve_auth_token() -> Option<String> {
    if let Ok(token) = std::env::var("NEVIL_REALTIME_TOKEN") {
        return Some(token);
    }
    crate::security::keyring::get_api_key().ok()
}

/// Owns every long-running task of the realtime voice core and the
/// shutdown signal that tears them all down together.
pub struct RealtimeVoiceCore {
    pub bus: MessageBus,
    pub mic_mutex: MicMutex,
    pub transport: Arc<SessionTransport>,
    pub capture: CaptureActor,
    pub synthesis: Arc<SynthesisActor>,
    pub cognition: Arc<CognitionActor>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RealtimeVoiceCore {
    pub fn new(config: &RealtimeVoiceConfig) -> anyhow::Result<Self> {
        let bus = MessageBus::new();
        let mic_mutex = MicMutex::new();
        let auth_token = resolve_auth_token();
        let transport = Arc::new(SessionTransport::with_capacity(
            config.url.clone(),
            auth_token,
            bus.clone(),
            config.outbound_queue_capacity,
        ));

        let synthesis = Arc::new(SynthesisActor::new(
            SynthesisConfig {
                wav_dir: crate::config::data_dir()?.join("realtime-voice-wav"),
                wav_retention_count: config.wav_retention_count,
            },
            mic_mutex.clone(),
            bus.clone(),
        )?);

        let capture = CaptureActor::new(
            transport.clone(),
            mic_mutex.clone(),
            bus.clone(),
            synthesis.clone(),
            CaptureConfig {
                chunk_samples: config.chunk_samples,
                software_gain: config.software_gain,
                vad_threshold: config.vad_threshold,
                vad_onset_chunks: config.vad_onset_chunks,
                vad_hangover_chunks: config.vad_hangover_chunks,
                padding_capacity_chunks: config.padding_capacity_chunks,
                commit_cooldown: std::time::Duration::from_millis(config.commit_cooldown_ms),
                vad_enabled: config.vad_enabled,
                ..CaptureConfig::default()
            },
        );

        let cognition = Arc::new(CognitionActor::new(
            transport.clone(),
            bus.clone(),
            synthesis.clone(),
            CognitionConfig {
                tool_chain_max_iterations: config.tool_chain_max_iterations,
            },
        ));

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            bus,
            mic_mutex,
            transport,
            capture,
            synthesis,
            cognition,
            shutdown_tx,
        })
    }

    /// Start the transport, the capture pipeline, and the server-event
    /// dispatch task that routes inbound events to the synthesis and
    /// cognition actors.
    ///
    /// The initial connection handshake is awaited directly: per
    /// spec.md §4.1/§7, an auth or protocol-handshake failure on this
    /// first attempt is fatal and must fail `start` rather than be
    /// absorbed into the transport's reconnect backoff. Only once that
    /// first connection succeeds is the long-running reconnect loop
    /// spawned as a background task.
    pub async fn start(&self, session_config: SessionConfig) -> anyhow::Result<()> {
        self.transport.connect_initial().await?;

        let transport_task = {
            let transport = self.transport.clone();
            tokio::spawn(async move { transport.run().await })
        };

        let mut server_events = self.bus.subscribe(TOPIC_SERVER_EVENT).await;
        let synthesis = self.synthesis.clone();
        let cognition = self.cognition.clone();
        let transport = self.transport.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe_msg = server_events.recv() => {
                        let Some(msg) = maybe_msg else { break };
                        let event: ServerEvent = match serde_json::from_value(msg.payload) {
                            Ok(ev) => ev,
                            Err(e) => {
                                warn!("core: failed to decode bus event: {}", e);
                                continue;
                            }
                        };
                        dispatch_server_event(event, &synthesis, &cognition).await;
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        self.cognition.clone().spawn_visual_data_listener();
        self.synthesis.clone().spawn_text_response_listener(self.transport.clone());

        self.transport
            .send(ClientEvent::SessionUpdate { session: session_config })
            .await?;

        self.capture.start()?;
        info!("realtime voice core started");
        let _ = transport_task;
        Ok(())
    }

    pub fn stop(&self) {
        self.capture.stop();
        self.transport.stop("core shutdown");
        let _ = self.shutdown_tx.send(());
    }
}

async fn dispatch_server_event(event: ServerEvent, synthesis: &Arc<SynthesisActor>, cognition: &Arc<CognitionActor>) {
    match event {
        ServerEvent::AudioDelta { response_id, delta } => {
            synthesis.on_audio_delta(&response_id, &delta).await;
        }
        ServerEvent::AudioDone { response_id } => {
            if let Err(e) = synthesis.on_audio_done(&response_id).await {
                warn!("core: playback failed for {}: {}", response_id, e);
            }
        }
        ServerEvent::AudioTranscriptDelta { response_id, delta } => {
            cognition.on_audio_transcript_delta(&response_id, &delta).await;
        }
        ServerEvent::AudioTranscriptDone { response_id, transcript } => {
            cognition.on_audio_transcript_done(&response_id, &transcript).await;
        }
        ServerEvent::TextDelta { response_id, delta } => {
            cognition.on_text_delta(&response_id, &delta).await;
        }
        ServerEvent::TextDone { response_id, text } => {
            cognition.on_text_done(&response_id, &text).await;
        }
        ServerEvent::FunctionCallArgumentsDelta { call_id, name, delta } => {
            cognition.on_function_call_arguments_delta(&call_id, &name, &delta).await;
        }
        ServerEvent::FunctionCallArgumentsDone { call_id, name, arguments } => {
            cognition.on_function_call_arguments_done(&call_id, &name, &arguments).await;
        }
        ServerEvent::SpeechStarted | ServerEvent::SpeechStopped => {}
        ServerEvent::ResponseCreated { response_id } => {
            synthesis.on_response_created(&response_id).await;
            cognition.on_response_created(&response_id).await;
        }
        ServerEvent::ResponseDone { .. } => {}
        ServerEvent::SessionCreated { .. } | ServerEvent::SessionUpdated { .. } => {}
        ServerEvent::ConversationItemCreated { .. } => {}
        ServerEvent::Error { message } => warn!("core: server reported error: {}", message),
        ServerEvent::Unknown => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_auth_token_prefers_env_override() {
        std::env::set_var("NEVIL_REALTIME_TOKEN", "test-token");
        assert_eq!(resolve_auth_token(), Some("test-token".to_string()));
        std::env::remove_var("NEVIL_REALTIME_TOKEN");
    }
}
