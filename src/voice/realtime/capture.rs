//! Microphone capture pipeline: read, gain, chunk-level VAD and
//! gating, mic-mutex double gate, forward to the session transport.
//!
//! Built on `voice::audio::AudioInput` (the same cpal wrapper the
//! coordinator uses for STT capture) reconfigured from its 16 kHz
//! Whisper default to the realtime pipeline's 24 kHz / 200 ms chunks.
//! `voice::vad::Vad` operates on 10 ms ML-style frames with
//! onset/hangover counters; `ChunkVad` here is a smaller sibling that
//! applies the same onset/hangover shape at 200 ms chunk granularity.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::voice::audio::{AudioConfig, AudioInput, SampleFormat};

use super::bus::MessageBus;
use super::event::{AudioFormat, ClientEvent};
use super::mic_mutex::MicMutex;
use super::synthesis::SynthesisActor;
use super::transport::{SessionTransport, TransportError};

pub const TOPIC_LISTENING_STATUS: &str = "listening_status";
pub const TOPIC_SPEECH_DETECTED: &str = "speech_detected";

/// One 200ms frame of 16-bit PCM samples captured from the microphone.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<i16>,
}

impl AudioChunk {
    fn from_f32(samples: &[f32], gain: f32) -> Self {
        let samples = samples
            .iter()
            .map(|&s| ((s * gain).clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .collect();
        Self { samples }
    }

    fn to_base64(&self) -> String {
        let mut bytes = Vec::with_capacity(self.samples.len() * 2);
        for sample in &self.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        STANDARD.encode(bytes)
    }

    fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = self
            .samples
            .iter()
            .map(|&s| (s as f64 / i16::MAX as f64).powi(2))
            .sum();
        ((sum_sq / self.samples.len() as f64).sqrt()) as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VadState {
    Silence,
    Speech,
}

/// Chunk-granular voice activity detector: an RMS threshold gate with
/// onset/hangover counters, the same shape `voice::vad::Vad` uses at
/// finer frame granularity.
#[derive(Debug, Clone)]
pub struct ChunkVad {
    threshold: f32,
    onset_chunks: u32,
    hangover_chunks: u32,
    state: VadState,
    consecutive_loud: u32,
    consecutive_quiet: u32,
}

impl ChunkVad {
    pub fn new(threshold: f32, onset_chunks: u32, hangover_chunks: u32) -> Self {
        Self {
            threshold,
            onset_chunks,
            hangover_chunks,
            state: VadState::Silence,
            consecutive_loud: 0,
            consecutive_quiet: 0,
        }
    }

    /// Reset state, e.g. after the mic mutex was unavailable for one
    /// or more chunks.
    pub fn reset(&mut self) {
        self.state = VadState::Silence;
        self.consecutive_loud = 0;
        self.consecutive_quiet = 0;
    }

    pub fn is_speaking(&self) -> bool {
        self.state == VadState::Speech
    }

    /// Feed one chunk's RMS energy, returning whether speech just
    /// started or stopped this chunk. Strictly greater than the
    /// threshold: a chunk exactly at threshold is not loud.
    pub fn process(&mut self, rms: f32) -> VadTransition {
        let loud = rms > self.threshold;
        if loud {
            self.consecutive_loud += 1;
            self.consecutive_quiet = 0;
        } else {
            self.consecutive_quiet += 1;
            self.consecutive_loud = 0;
        }

        match self.state {
            VadState::Silence if self.consecutive_loud >= self.onset_chunks => {
                self.state = VadState::Speech;
                VadTransition::SpeechStarted
            }
            VadState::Speech if self.consecutive_quiet >= self.hangover_chunks => {
                self.state = VadState::Silence;
                VadTransition::SpeechStopped
            }
            _ => VadTransition::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadTransition {
    None,
    SpeechStarted,
    SpeechStopped,
}

/// Bounded ring of chunks captured just before speech onset, so the
/// prefix of an utterance is not lost while the VAD is still deciding.
struct PaddingRing {
    chunks: VecDeque<AudioChunk>,
    capacity: usize,
}

impl PaddingRing {
    fn new(capacity: usize) -> Self {
        Self {
            chunks: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, chunk: AudioChunk) {
        if self.chunks.len() == self.capacity {
            self.chunks.pop_front();
        }
        self.chunks.push_back(chunk);
    }

    fn drain(&mut self) -> Vec<AudioChunk> {
        self.chunks.drain(..).collect()
    }
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub chunk_samples: usize,
    pub software_gain: f32,
    pub vad_threshold: f32,
    /// Consecutive over-threshold chunks required to declare speech
    /// onset. At the default 200ms chunk size, the default of 2 rounds
    /// the spec's 300ms `min_speech_duration_ms` up to the nearest
    /// whole chunk (400ms) — the smallest chunk count that still
    /// satisfies "at least 300ms" rather than undershooting it.
    pub vad_onset_chunks: u32,
    pub vad_hangover_chunks: u32,
    pub padding_capacity_chunks: usize,
    pub commit_cooldown: Duration,
    /// When `true` (the default), the local `ChunkVad` decides speech
    /// onset/offset and this actor sends `input_audio_buffer.commit`
    /// itself. When `false`, the session has server-side turn detection
    /// configured, so every chunk is forwarded unconditionally (subject
    /// only to the mic mutex) and the server's own
    /// `input_audio_buffer.speech_started/stopped` + auto-commit is
    /// authoritative — exactly one VAD is ever in charge.
    pub vad_enabled: bool,
    /// Fraction of stream reads that must fail, once at least
    /// `min_reads_before_fault` reads have been attempted, before the
    /// actor stops itself and reports a fault on `listening_status`.
    pub read_error_rate_threshold: f32,
    pub min_reads_before_fault: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            chunk_samples: AudioFormat::REALTIME.chunk_samples(),
            software_gain: 1.0,
            vad_threshold: 0.02,
            vad_onset_chunks: 2,
            vad_hangover_chunks: 2,
            padding_capacity_chunks: 2,
            commit_cooldown: Duration::from_millis(2000),
            vad_enabled: true,
            read_error_rate_threshold: 0.2,
            min_reads_before_fault: 20,
        }
    }
}

/// Microphone capture actor. Owns a dedicated OS thread running the
/// cpal input stream (`cpal::Stream` is not `Send`, matching how
/// `voice::audio::AudioInput` is used elsewhere) and an async task
/// that consumes fixed-size chunks off a bounded channel, applies the
/// mic-mutex double gate, VAD, and gating, and forwards audio to the
/// session transport.
pub struct CaptureActor {
    transport: Arc<SessionTransport>,
    mic_mutex: MicMutex,
    bus: MessageBus,
    synthesis: Arc<SynthesisActor>,
    config: CaptureConfig,
    chunks_sent: Arc<AtomicU64>,
    chunks_skipped: Arc<AtomicU64>,
    stream_reads: Arc<AtomicU64>,
    stream_errors: Arc<AtomicU64>,
    running: Arc<std::sync::atomic::AtomicBool>,
}

impl CaptureActor {
    pub fn new(
        transport: Arc<SessionTransport>,
        mic_mutex: MicMutex,
        bus: MessageBus,
        synthesis: Arc<SynthesisActor>,
        config: CaptureConfig,
    ) -> Self {
        Self {
            transport,
            mic_mutex,
            bus,
            synthesis,
            config,
            chunks_sent: Arc::new(AtomicU64::new(0)),
            chunks_skipped: Arc::new(AtomicU64::new(0)),
            stream_reads: Arc::new(AtomicU64::new(0)),
            stream_errors: Arc::new(AtomicU64::new(0)),
            running: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    /// Signal the capture thread to tear down its cpal stream and
    /// exit. Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn chunks_sent(&self) -> u64 {
        self.chunks_sent.load(Ordering::Relaxed)
    }

    pub fn chunks_skipped(&self) -> u64 {
        self.chunks_skipped.load(Ordering::Relaxed)
    }

    pub fn stream_errors(&self) -> u64 {
        self.stream_errors.load(Ordering::Relaxed)
    }

    /// Start the capture thread and the async consumer. Returns a
    /// `cpal::Stream` handle the caller must keep alive for as long as
    /// capture should run (dropping it tears the stream down); the
    /// stream itself lives on the spawned thread.
    pub fn start(&self) -> anyhow::Result<tokio::task::JoinHandle<()>> {
        let audio_config = AudioConfig {
            sample_rate: AudioFormat::REALTIME.sample_rate,
            channels: AudioFormat::REALTIME.channels,
            sample_format: SampleFormat::F32,
            buffer_size: self.config.chunk_samples,
        };
        let input = AudioInput::new(audio_config)?;

        let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<f32>>(32);
        let gain = self.config.software_gain;
        let running = self.running.clone();
        running.store(true, Ordering::Relaxed);

        // Captured for the cpal error callback, which runs on the
        // cpal-owned audio thread, not inside the tokio runtime.
        let rt_handle = tokio::runtime::Handle::current();
        let stream_reads = self.stream_reads.clone();
        let stream_errors = self.stream_errors.clone();
        let error_threshold = self.config.read_error_rate_threshold;
        let min_reads = self.config.min_reads_before_fault;
        let bus_for_errors = self.bus.clone();
        let running_for_errors = running.clone();

        std::thread::Builder::new()
            .name("voice-capture".to_string())
            .spawn(move || {
                let stream_reads_for_data = stream_reads.clone();
                let stream = match input.start(
                    move |data: &[f32]| {
                        stream_reads_for_data.fetch_add(1, Ordering::Relaxed);
                        if chunk_tx.blocking_send(data.to_vec()).is_err() {
                            debug!("capture consumer gone, dropping chunk");
                        }
                    },
                    move |err| {
                        warn!("capture: stream error: {}", err);
                        let errors = stream_errors.fetch_add(1, Ordering::Relaxed) + 1;
                        let reads = stream_reads.load(Ordering::Relaxed);
                        let total = reads + errors;
                        if total >= min_reads && (errors as f32 / total as f32) > error_threshold {
                            error!(
                                "capture: read error rate {:.2} exceeds threshold {:.2}, stopping",
                                errors as f32 / total as f32,
                                error_threshold
                            );
                            running_for_errors.store(false, Ordering::Relaxed);
                            let bus = bus_for_errors.clone();
                            rt_handle.spawn(async move {
                                bus.publish(
                                    TOPIC_LISTENING_STATUS,
                                    serde_json::json!({ "listening": false, "fault": "read_error_rate_exceeded" }),
                                )
                                .await;
                            });
                        }
                    },
                ) {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!("failed to start audio input stream: {}", e);
                        return;
                    }
                };
                // Stream must stay alive on this thread; park it here
                // until `stop` is called.
                while running.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_millis(200));
                }
                let _ = input.stop(&stream);
            })
            .map_err(|e| anyhow::anyhow!("failed to spawn capture thread: {}", e))?;

        let handle = tokio::spawn(self.clone_for_consumer().run_consumer(chunk_rx, gain));
        Ok(handle)
    }

    fn clone_for_consumer(&self) -> CaptureActor {
        CaptureActor {
            transport: self.transport.clone(),
            mic_mutex: self.mic_mutex.clone(),
            bus: self.bus.clone(),
            synthesis: self.synthesis.clone(),
            config: self.config.clone(),
            chunks_sent: self.chunks_sent.clone(),
            chunks_skipped: self.chunks_skipped.clone(),
            stream_reads: self.stream_reads.clone(),
            stream_errors: self.stream_errors.clone(),
            running: self.running.clone(),
        }
    }

    async fn run_consumer(self, mut chunk_rx: mpsc::Receiver<Vec<f32>>, gain: f32) {
        self.bus.publish(TOPIC_LISTENING_STATUS, serde_json::json!({ "listening": true })).await;

        let mut accumulator: Vec<f32> = Vec::with_capacity(self.config.chunk_samples * 2);
        let mut vad = ChunkVad::new(
            self.config.vad_threshold,
            self.config.vad_onset_chunks,
            self.config.vad_hangover_chunks,
        );
        let mut padding = PaddingRing::new(self.config.padding_capacity_chunks);
        let mut last_commit: Option<tokio::time::Instant> = None;

        while let Some(samples) = chunk_rx.recv().await {
            accumulator.extend_from_slice(&samples);
            while accumulator.len() >= self.config.chunk_samples {
                let chunk_samples: Vec<f32> = accumulator.drain(..self.config.chunk_samples).collect();

                if !self.mic_mutex.available() {
                    vad.reset();
                    padding.drain();
                    self.chunks_skipped.fetch_add(1, Ordering::Relaxed);
                    continue;
                }

                let chunk = AudioChunk::from_f32(&chunk_samples, gain);

                if !self.config.vad_enabled {
                    self.forward_chunk(&chunk).await;
                    continue;
                }

                let rms = chunk.rms();
                let transition = vad.process(rms);

                match transition {
                    VadTransition::SpeechStarted => {
                        debug!("speech started (rms={:.4})", rms);
                        self.bus
                            .publish(TOPIC_SPEECH_DETECTED, serde_json::json!({ "detected": true }))
                            .await;
                        for prefix_chunk in padding.drain() {
                            self.forward_chunk(&prefix_chunk).await;
                        }
                        self.forward_chunk(&chunk).await;
                    }
                    VadTransition::SpeechStopped => {
                        debug!("speech stopped (rms={:.4})", rms);
                        self.forward_chunk(&chunk).await;
                        self.bus
                            .publish(TOPIC_SPEECH_DETECTED, serde_json::json!({ "detected": false }))
                            .await;
                        let now = tokio::time::Instant::now();
                        let cooled_down = match last_commit {
                            Some(prev) => now.duration_since(prev) >= self.config.commit_cooldown,
                            None => true,
                        };
                        if cooled_down {
                            last_commit = Some(now);
                            self.commit_and_request_response().await;
                        }
                    }
                    VadTransition::None if vad.is_speaking() => {
                        self.forward_chunk(&chunk).await;
                    }
                    VadTransition::None => {
                        padding.push(chunk);
                        self.chunks_skipped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
        self.bus.publish(TOPIC_LISTENING_STATUS, serde_json::json!({ "listening": false })).await;
        info!("capture consumer stopped");
    }

    /// Commit the input buffer and request a response, cancelling
    /// whatever response is still in flight first (barge-in): at most
    /// one `response.create` may be outstanding at a time.
    async fn commit_and_request_response(&self) {
        if let Some(in_flight_id) = self.synthesis.in_flight_response().await {
            debug!("capture: barge-in, cancelling in-flight response {}", in_flight_id);
            if let Err(e) = self.transport.send(ClientEvent::ResponseCancel).await {
                warn!("failed to send response.cancel: {}", e);
            }
            self.synthesis.cancel(&in_flight_id).await;
        }

        if let Err(e) = self.transport.send(ClientEvent::InputAudioBufferCommit).await {
            warn!("failed to send commit: {}", e);
            return;
        }

        match self.synthesis.begin_response(&self.transport).await {
            Ok(true) => {
                if let Err(e) = self.transport.send(ClientEvent::ResponseCreate { response: None }).await {
                    warn!("failed to send response.create: {}", e);
                }
            }
            Ok(false) => debug!("capture: response already requested for this turn"),
            Err(e) => warn!("capture: failed to begin response: {}", e),
        }
    }

    async fn forward_chunk(&self, chunk: &AudioChunk) {
        if !self.mic_mutex.available() {
            self.chunks_skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let event = ClientEvent::InputAudioBufferAppend { audio: chunk.to_base64() };
        match self.transport.send(event).await {
            Ok(()) => {
                self.chunks_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(TransportError::Send(reason)) => {
                warn!("capture: dropped chunk, transport send failed: {}", reason);
            }
            Err(e) => warn!("capture: dropped chunk: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::realtime::mic_mutex::MicMutex;
    use crate::voice::realtime::synthesis::SynthesisConfig;

    fn test_actor() -> (CaptureActor, MessageBus) {
        let bus = MessageBus::new();
        let mic_mutex = MicMutex::new();
        let transport = Arc::new(SessionTransport::new("ws://127.0.0.1:1/voice", None, bus.clone()));
        let wav_dir = tempfile::tempdir().unwrap().into_path();
        let synthesis = Arc::new(
            SynthesisActor::new(
                SynthesisConfig { wav_dir, wav_retention_count: 2 },
                mic_mutex.clone(),
                bus.clone(),
            )
            .unwrap(),
        );
        let actor = CaptureActor::new(transport, mic_mutex, bus.clone(), synthesis, CaptureConfig::default());
        (actor, bus)
    }

    #[test]
    fn chunk_vad_requires_onset_chunks_before_speech() {
        let mut vad = ChunkVad::new(0.1, 2, 2);
        assert_eq!(vad.process(0.5), VadTransition::None);
        assert_eq!(vad.process(0.5), VadTransition::SpeechStarted);
        assert!(vad.is_speaking());
    }

    #[test]
    fn chunk_vad_requires_hangover_chunks_before_silence() {
        let mut vad = ChunkVad::new(0.1, 1, 2);
        assert_eq!(vad.process(0.5), VadTransition::SpeechStarted);
        assert_eq!(vad.process(0.0), VadTransition::None);
        assert_eq!(vad.process(0.0), VadTransition::SpeechStopped);
        assert!(!vad.is_speaking());
    }

    #[test]
    fn chunk_vad_reset_clears_counters_and_state() {
        let mut vad = ChunkVad::new(0.1, 1, 5);
        vad.process(0.5);
        assert!(vad.is_speaking());
        vad.reset();
        assert!(!vad.is_speaking());
        assert_eq!(vad.process(0.0), VadTransition::None);
    }

    #[test]
    fn chunk_vad_threshold_is_strict_greater_than() {
        let mut vad = ChunkVad::new(0.5, 1, 1);
        assert_eq!(vad.process(0.5), VadTransition::None);
        assert_eq!(vad.process(0.500_001), VadTransition::SpeechStarted);
    }

    #[test]
    fn padding_ring_drops_oldest_past_capacity() {
        let mut ring = PaddingRing::new(2);
        ring.push(AudioChunk { samples: vec![1] });
        ring.push(AudioChunk { samples: vec![2] });
        ring.push(AudioChunk { samples: vec![3] });
        let drained = ring.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].samples, vec![2]);
        assert_eq!(drained[1].samples, vec![3]);
    }

    #[test]
    fn audio_chunk_rms_of_silence_is_zero() {
        let chunk = AudioChunk { samples: vec![0; 100] };
        assert_eq!(chunk.rms(), 0.0);
    }

    #[test]
    fn audio_chunk_base64_roundtrips_sample_count() {
        let chunk = AudioChunk::from_f32(&[0.1, -0.2, 0.3], 1.0);
        let encoded = chunk.to_base64();
        let decoded = STANDARD.decode(encoded).unwrap();
        assert_eq!(decoded.len(), chunk.samples.len() * 2);
    }

    #[tokio::test]
    async fn speech_stopped_cancels_in_flight_response_before_committing() {
        let (actor, bus) = test_actor();
        let transport = actor.transport.clone();
        actor.synthesis.begin_response(&transport).await.unwrap();
        actor.synthesis.on_response_created("resp_1").await;
        assert_eq!(actor.synthesis.in_flight_response().await, Some("resp_1".to_string()));

        let _sub = bus.subscribe(TOPIC_SPEECH_DETECTED).await;
        actor.commit_and_request_response().await;

        // Barge-in must clear the previous in-flight response; a fresh
        // one is staged by begin_response inside commit_and_request_response.
        let current = actor.synthesis.in_flight_response().await;
        assert_ne!(current, Some("resp_1".to_string()));
    }
}
