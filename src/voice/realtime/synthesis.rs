//! Audio response playback pipeline.
//!
//! Buffers streamed `response.audio.delta` payloads keyed by
//! `response_id`, writes them to a WAV file on `response.audio.done`
//! (the same `hound::WavSpec` `voice::audio::save_wav` uses), and hands
//! the file to `voice::audio::AudioOutput::play_wav` — audio is never
//! played directly from the delta stream.
//!
//! The mic mutex is acquired before the turn's `response.create` is
//! even sent (`begin_response`), not when the response's audio starts
//! arriving: by the time the first `response.audio.delta` could reach
//! this actor, the mutex must already be held.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use std::sync::Arc;

use crate::voice::audio::{AudioConfig, AudioOutput};

use super::bus::MessageBus;
use super::cognition::TOPIC_TEXT_RESPONSE;
use super::event::{AudioFormat, ClientEvent, ResponseCreateOptions};
use super::mic_mutex::{MicMutex, MicMutexGuard};
use super::transport::SessionTransport;

pub const TOPIC_SPEAKING_STATUS: &str = "speaking_status";

#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    pub wav_dir: PathBuf,
    pub wav_retention_count: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            wav_dir: std::env::temp_dir().join("nevil-realtime-voice"),
            wav_retention_count: 10,
        }
    }
}

#[derive(Default)]
struct ResponseBuffer {
    deltas: Vec<Vec<u8>>,
    cancelled: bool,
    guard: Option<MicMutexGuard>,
    has_audio: bool,
}

/// Buffers and plays back audio responses from the remote voice
/// model, one `response_id` at a time.
pub struct SynthesisActor {
    config: SynthesisConfig,
    mic_mutex: MicMutex,
    bus: MessageBus,
    buffers: Mutex<HashMap<String, ResponseBuffer>>,
    written: Mutex<Vec<PathBuf>>,
    /// Guard acquired by `begin_response`, before a `response_id`
    /// exists, and moved into the matching `ResponseBuffer` once
    /// `on_response_created` reports which response it belongs to.
    pending_guard: Mutex<Option<MicMutexGuard>>,
    in_flight: Mutex<Option<String>>,
    wav_seq: AtomicU64,
}

impl SynthesisActor {
    pub fn new(config: SynthesisConfig, mic_mutex: MicMutex, bus: MessageBus) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.wav_dir)?;
        Ok(Self {
            config,
            mic_mutex,
            bus,
            buffers: Mutex::new(HashMap::new()),
            written: Mutex::new(Vec::new()),
            pending_guard: Mutex::new(None),
            in_flight: Mutex::new(None),
            wav_seq: AtomicU64::new(0),
        })
    }

    /// Pre-request sequence for a turn that is about to ask the remote
    /// model to speak: acquire the mic mutex, clear whatever is
    /// sitting in the server's input audio buffer, and announce
    /// `speaking_status{speaking:true}` on the bus — all before
    /// `response.create` is sent. Returns `false` (and does nothing)
    /// if a response has already been requested for this turn, so a
    /// caller can always call this and only send `response.create`
    /// when it returns `true`.
    pub async fn begin_response(&self, transport: &SessionTransport) -> anyhow::Result<bool> {
        if self.pending_guard.lock().await.is_some() {
            return Ok(false);
        }
        if self.in_flight.lock().await.is_some() {
            return Ok(false);
        }

        let guard = self.mic_mutex.acquire("speaking");
        transport
            .send(ClientEvent::InputAudioBufferClear)
            .await
            .map_err(|e| anyhow::anyhow!("failed to send input_audio_buffer.clear: {}", e))?;
        self.bus
            .publish(TOPIC_SPEAKING_STATUS, serde_json::json!({ "speaking": true }))
            .await;
        *self.pending_guard.lock().await = Some(guard);
        Ok(true)
    }

    /// The server assigned `response_id` to the response `begin_response`
    /// staged the guard for. Moves the guard into that response's buffer
    /// and marks it the one in-flight response.
    ///
    /// If a different response was still in flight (its buffer never
    /// reached `on_audio_done`/`cancel`), it is superseded: its buffer
    /// is marked cancelled and its mic mutex guard, if any, is released
    /// immediately, so a late `response.audio.delta`/`response.audio.done`
    /// for the orphaned id is dropped rather than played (spec.md §3
    /// Invariant 5, §4.3 step 2).
    pub async fn on_response_created(&self, response_id: &str) {
        let guard = self.pending_guard.lock().await.take();
        let previous = self.in_flight.lock().await.clone();

        let mut buffers = self.buffers.lock().await;
        if let Some(old_id) = previous {
            if old_id != response_id {
                if let Some(old_buffer) = buffers.get_mut(&old_id) {
                    old_buffer.cancelled = true;
                    if old_buffer.guard.take().is_some() {
                        warn!(
                            "synthesis: response {} superseded by {} before finishing; releasing its mic mutex guard",
                            old_id, response_id
                        );
                    }
                }
            }
        }

        let buffer = buffers.entry(response_id.to_string()).or_default();
        buffer.guard = guard;
        drop(buffers);

        *self.in_flight.lock().await = Some(response_id.to_string());
    }

    /// The response currently holding the mic mutex, if any.
    pub async fn in_flight_response(&self) -> Option<String> {
        self.in_flight.lock().await.clone()
    }

    /// Handle one `response.audio.delta` event: base64-decode and
    /// append to the buffer for `response_id`.
    pub async fn on_audio_delta(&self, response_id: &str, delta_b64: &str) {
        let bytes = match STANDARD.decode(delta_b64) {
            Ok(b) => b,
            Err(e) => {
                warn!("synthesis: malformed audio delta for {}: {}", response_id, e);
                return;
            }
        };
        let mut buffers = self.buffers.lock().await;
        let buffer = buffers.entry(response_id.to_string()).or_default();
        buffer.has_audio = true;
        buffer.deltas.push(bytes);
    }

    /// A `response.cancel` or a barge-in arrived. If the response is
    /// still buffering (no WAV written yet), discard it and release
    /// the mic mutex immediately. If it has already moved past
    /// buffering (this actor no longer holds its buffer because
    /// `on_audio_done` already claimed it), this has no effect: that
    /// playback finishes atomically.
    pub async fn cancel(&self, response_id: &str) {
        let released = {
            let mut buffers = self.buffers.lock().await;
            match buffers.get_mut(response_id) {
                Some(buf) => {
                    buf.cancelled = true;
                    buf.guard.take().is_some()
                }
                None => false,
            }
        };
        if released {
            info!("synthesis: cancelled buffering response {}, releasing mic mutex", response_id);
            self.finish_turn(response_id).await;
        }
    }

    /// Handle `response.audio.done`: write the buffered PCM to a WAV
    /// file and play it back, holding the mic mutex guard acquired by
    /// `begin_response` for the duration. Returns the WAV path
    /// written, or `None` if the response was cancelled or had no
    /// audio.
    pub async fn on_audio_done(&self, response_id: &str) -> anyhow::Result<Option<PathBuf>> {
        let buffer = {
            let mut buffers = self.buffers.lock().await;
            buffers.remove(response_id)
        };
        let Some(mut buffer) = buffer else {
            debug!("synthesis: audio.done for unknown response_id {}", response_id);
            return Ok(None);
        };
        if buffer.cancelled {
            info!("synthesis: discarding cancelled response {}", response_id);
            return Ok(None);
        }
        if buffer.deltas.is_empty() {
            self.finish_turn(response_id).await;
            return Ok(None);
        }

        let path = self.next_wav_path();
        write_wav(&path, &buffer.deltas)?;
        self.retain_recent(&path).await;

        let guard = buffer.guard.take();
        let play_path = path.clone();
        let result = tokio::task::spawn_blocking(move || play_blocking(&play_path)).await;
        drop(guard);
        self.finish_turn(response_id).await;

        match result {
            Ok(Ok(())) => Ok(Some(path)),
            Ok(Err(e)) => Err(e),
            Err(join_err) => Err(anyhow::anyhow!("playback task panicked: {}", join_err)),
        }
    }

    /// Subscribe to `text_response` (published by the cognition actor
    /// on `response.text.done`) and, for any response whose id never
    /// produced an audio delta through this actor, request a
    /// synthesis-only follow-up so the reply is still spoken (spec.md
    /// §4.3: "consumes `text_response` from the bus to initiate
    /// synthesis-only requests when the cognition path produced text
    /// without audio"). Spawned once by the composition root alongside
    /// the other actor listener tasks.
    pub fn spawn_text_response_listener(self: Arc<Self>, transport: Arc<SessionTransport>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut sub = self.bus.subscribe(TOPIC_TEXT_RESPONSE).await;
            while let Some(msg) = sub.recv().await {
                let response_id = msg.payload.get("response_id").and_then(|v| v.as_str()).unwrap_or_default();
                let text = msg.payload.get("text").and_then(|v| v.as_str()).unwrap_or_default();
                if response_id.is_empty() || text.is_empty() {
                    continue;
                }

                let already_has_audio = self
                    .buffers
                    .lock()
                    .await
                    .get(response_id)
                    .map(|buf| buf.has_audio)
                    .unwrap_or(false);
                if already_has_audio {
                    continue;
                }

                // This response never produced audio: drop any stale,
                // audio-less buffer/guard for it and ask the model to
                // speak the text on its own.
                if let Some(stale) = self.buffers.lock().await.remove(response_id) {
                    drop(stale.guard);
                }
                self.request_synthesis_only(&transport, response_id, text).await;
            }
        })
    }

    async fn request_synthesis_only(&self, transport: &SessionTransport, response_id: &str, text: &str) {
        match self.begin_response(transport).await {
            Ok(true) => {
                let options = ResponseCreateOptions {
                    modalities: vec!["audio".to_string()],
                    instructions: Some(format!("Speak the following verbatim, with no additional commentary: {text}")),
                };
                if let Err(e) = transport.send(ClientEvent::ResponseCreate { response: Some(options) }).await {
                    warn!("synthesis: failed to request synthesis-only follow-up for {}: {}", response_id, e);
                }
            }
            Ok(false) => {
                debug!("synthesis: a response is already in flight, skipping synthesis-only follow-up for {}", response_id);
            }
            Err(e) => {
                warn!("synthesis: failed to begin synthesis-only follow-up for {}: {}", response_id, e);
            }
        }
    }

    /// Clear the in-flight marker (if it still names `response_id`) and
    /// announce `speaking_status{speaking:false}`.
    async fn finish_turn(&self, response_id: &str) {
        let mut in_flight = self.in_flight.lock().await;
        if in_flight.as_deref() == Some(response_id) {
            *in_flight = None;
        }
        drop(in_flight);
        self.bus
            .publish(TOPIC_SPEAKING_STATUS, serde_json::json!({ "speaking": false }))
            .await;
    }

    /// Timestamp-prefixed, and therefore lexicographically sortable,
    /// WAV filename. A per-process sequence number disambiguates files
    /// written within the same millisecond.
    fn next_wav_path(&self) -> PathBuf {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let seq = self.wav_seq.fetch_add(1, Ordering::Relaxed);
        self.config.wav_dir.join(format!("{millis:020}-{seq:04}.wav"))
    }

    async fn retain_recent(&self, new_path: &Path) {
        let mut written = self.written.lock().await;
        written.push(new_path.to_path_buf());
        while written.len() > self.config.wav_retention_count {
            let oldest = written.remove(0);
            if let Err(e) = std::fs::remove_file(&oldest) {
                debug!("synthesis: could not remove old wav {:?}: {}", oldest, e);
            }
        }
    }
}

fn write_wav(path: &Path, deltas: &[Vec<u8>]) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: AudioFormat::REALTIME.channels,
        sample_rate: AudioFormat::REALTIME.sample_rate,
        bits_per_sample: AudioFormat::REALTIME.bits_per_sample,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for delta in deltas {
        for chunk in delta.chunks_exact(2) {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            writer.write_sample(sample)?;
        }
    }
    writer.finalize()?;
    Ok(())
}

fn play_blocking(path: &Path) -> anyhow::Result<()> {
    let output = AudioOutput::new(AudioConfig {
        sample_rate: AudioFormat::REALTIME.sample_rate,
        channels: AudioFormat::REALTIME.channels,
        sample_format: crate::voice::audio::SampleFormat::I16,
        buffer_size: AudioFormat::REALTIME.chunk_samples(),
    })?;
    output.play_wav(path)?;
    output.sleep_until_end();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config() -> (SynthesisConfig, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        (
            SynthesisConfig {
                wav_dir: dir.path().to_path_buf(),
                wav_retention_count: 2,
            },
            dir,
        )
    }

    fn test_transport(bus: MessageBus) -> SessionTransport {
        SessionTransport::new("ws://127.0.0.1:1/voice", None, bus)
    }

    #[tokio::test]
    async fn done_with_no_deltas_returns_none() {
        let (config, _dir) = test_config();
        let bus = MessageBus::new();
        let actor = SynthesisActor::new(config, MicMutex::new(), bus).unwrap();
        let result = actor.on_audio_done("resp_missing").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn begin_response_acquires_mutex_before_response_id_exists() {
        let (config, _dir) = test_config();
        let mic_mutex = MicMutex::new();
        let bus = MessageBus::new();
        let transport = test_transport(bus.clone());
        let actor = SynthesisActor::new(config, mic_mutex.clone(), bus).unwrap();

        assert!(mic_mutex.available());
        let requested = actor.begin_response(&transport).await.unwrap();
        assert!(requested);
        assert!(!mic_mutex.available(), "mic mutex must be held as soon as begin_response returns");

        actor.on_response_created("resp_1").await;
        assert_eq!(actor.in_flight_response().await, Some("resp_1".to_string()));
    }

    #[tokio::test]
    async fn begin_response_is_a_noop_once_a_response_is_already_requested() {
        let (config, _dir) = test_config();
        let bus = MessageBus::new();
        let transport = test_transport(bus.clone());
        let actor = SynthesisActor::new(config, MicMutex::new(), bus).unwrap();

        assert!(actor.begin_response(&transport).await.unwrap());
        assert!(!actor.begin_response(&transport).await.unwrap());
        actor.on_response_created("resp_1").await;
        assert!(!actor.begin_response(&transport).await.unwrap());
    }

    #[tokio::test]
    async fn cancelled_response_is_discarded_and_releases_mutex() {
        let (config, _dir) = test_config();
        let mic_mutex = MicMutex::new();
        let bus = MessageBus::new();
        let transport = test_transport(bus.clone());
        let actor = SynthesisActor::new(config, mic_mutex.clone(), bus).unwrap();

        actor.begin_response(&transport).await.unwrap();
        actor.on_response_created("resp_1").await;
        let samples: Vec<i16> = vec![100, -100, 200];
        let mut bytes = Vec::new();
        for s in &samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        let b64 = STANDARD.encode(&bytes);
        actor.on_audio_delta("resp_1", &b64).await;

        actor.cancel("resp_1").await;
        assert!(mic_mutex.available(), "cancel during buffering must release the mic mutex");

        let result = actor.on_audio_done("resp_1").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn superseding_response_created_discards_orphaned_buffer_and_releases_mutex() {
        let (config, _dir) = test_config();
        let mic_mutex = MicMutex::new();
        let bus = MessageBus::new();
        let transport = test_transport(bus.clone());
        let actor = SynthesisActor::new(config, mic_mutex.clone(), bus).unwrap();

        actor.begin_response(&transport).await.unwrap();
        actor.on_response_created("resp_A").await;
        assert!(!mic_mutex.available());

        // A new response.created for a different id arrives before
        // resp_A ever reached audio.done/cancel.
        actor.on_response_created("resp_B").await;

        assert!(mic_mutex.available(), "superseding a response must release its orphaned mic mutex guard");
        assert_eq!(actor.in_flight_response().await, Some("resp_B".to_string()));

        let result = actor.on_audio_done("resp_A").await.unwrap();
        assert!(result.is_none(), "a late audio.done for an orphaned response id must be discarded");
    }

    #[tokio::test]
    async fn text_only_response_triggers_synthesis_only_follow_up() {
        let (config, _dir) = test_config();
        let mic_mutex = MicMutex::new();
        let bus = MessageBus::new();
        let transport = Arc::new(test_transport(bus.clone()));
        let actor = Arc::new(SynthesisActor::new(config, mic_mutex.clone(), bus.clone()).unwrap());

        let _listener = actor.clone().spawn_text_response_listener(transport.clone());

        assert!(mic_mutex.available());
        bus.publish(
            TOPIC_TEXT_RESPONSE,
            serde_json::json!({ "response_id": "resp_text", "text": "hello there" }),
        )
        .await;

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(
            !mic_mutex.available(),
            "a text-only response must trigger a synthesis-only follow-up that acquires the mic mutex"
        );
    }

    #[tokio::test]
    async fn audio_deltas_accumulate_in_order() {
        let (config, _dir) = test_config();
        let bus = MessageBus::new();
        let actor = SynthesisActor::new(config, MicMutex::new(), bus).unwrap();
        let part_a = STANDARD.encode(1i16.to_le_bytes());
        let part_b = STANDARD.encode(2i16.to_le_bytes());
        actor.on_audio_delta("resp_2", &part_a).await;
        actor.on_audio_delta("resp_2", &part_b).await;
        let buffers = actor.buffers.lock().await;
        let buf = buffers.get("resp_2").unwrap();
        assert_eq!(buf.deltas.len(), 2);
    }

    #[tokio::test]
    async fn wav_filenames_are_timestamp_prefixed_and_sortable() {
        let (config, _dir) = test_config();
        let bus = MessageBus::new();
        let actor = SynthesisActor::new(config, MicMutex::new(), bus).unwrap();
        let first = actor.next_wav_path();
        let second = actor.next_wav_path();
        assert!(first.file_name().unwrap().to_str().unwrap() < second.file_name().unwrap().to_str().unwrap());
    }
}
