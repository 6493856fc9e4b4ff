//! Cognition actor: transcript accumulation, tool-call dispatch, and
//! the small set of robot tools the realtime voice core exposes.
//!
//! The accumulate-then-dispatch shape and iteration bound mirror
//! `agent::tool_loop::run_tool_loop`, generalized from the general
//! filesystem/shell/web tool set to a handful of robot-specific tools
//! routed through a `ToolHandler` trait. Navigation, memory, vision,
//! and gesture systems are named external collaborators (Non-goals);
//! each gets a small trait plus a no-op default implementation so the
//! actor compiles and is testable without those systems present.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::bus::MessageBus;
use super::event::{ClientEvent, ContentPart, ConversationItem, ResponseCreateOptions};
use super::synthesis::SynthesisActor;
use super::transport::SessionTransport;

pub const TOPIC_VOICE_COMMAND: &str = "voice_command";
pub const TOPIC_TEXT_RESPONSE: &str = "text_response";
pub const TOPIC_VISUAL_REQUEST: &str = "visual_request";
pub const TOPIC_VISUAL_DATA: &str = "visual_data";

/// How long to wait for a `visual_data` reply to a `take_snapshot`
/// tool call before giving up and reporting no camera response.
const VISUAL_RESPONSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Tool names routed to the gesture controller. Anything else falls
/// through to the unknown-function error path rather than being
/// handed to the gesture controller as a guess.
const ALLOWED_GESTURES: &[&str] = &["wave", "nod", "shake_head", "bow", "spin"];

/// Executes a named tool and returns its result as a function call
/// output string sent back to the remote model.
#[async_trait::async_trait]
pub trait GestureController: Send + Sync {
    async fn perform(&self, gesture: &str) -> anyhow::Result<String>;
}

#[async_trait::async_trait]
pub trait MemoryBackend: Send + Sync {
    async fn remember(&self, key: &str, value: &str) -> anyhow::Result<()>;
    async fn recall(&self, key: &str) -> anyhow::Result<Option<String>>;
}

/// Describes a captured camera frame. Takes the raw image bytes
/// delivered on the `visual_data` bus topic, not a live camera handle:
/// this actor has no camera of its own, only a request/response
/// round trip with whatever external system owns one.
#[async_trait::async_trait]
pub trait VisionDescriber: Send + Sync {
    async fn describe_current_view(&self, image: &[u8]) -> anyhow::Result<String>;
}

#[async_trait::async_trait]
pub trait NavigationController: Send + Sync {
    async fn set_mode(&self, mode: &str) -> anyhow::Result<()>;
}

pub struct NoopGestureController;
#[async_trait::async_trait]
impl GestureController for NoopGestureController {
    async fn perform(&self, gesture: &str) -> anyhow::Result<String> {
        debug!("no-op gesture controller: '{}' requested, ignored", gesture);
        Ok(format!("gesture '{gesture}' acknowledged (no controller attached)"))
    }
}

pub struct NoopMemoryBackend;
#[async_trait::async_trait]
impl MemoryBackend for NoopMemoryBackend {
    async fn remember(&self, key: &str, _value: &str) -> anyhow::Result<()> {
        debug!("no-op memory backend: remember('{}') ignored", key);
        Ok(())
    }
    async fn recall(&self, key: &str) -> anyhow::Result<Option<String>> {
        debug!("no-op memory backend: recall('{}') ignored", key);
        Ok(None)
    }
}

pub struct NoopVisionDescriber;
#[async_trait::async_trait]
impl VisionDescriber for NoopVisionDescriber {
    async fn describe_current_view(&self, _image: &[u8]) -> anyhow::Result<String> {
        Ok("no camera attached".to_string())
    }
}

pub struct NoopNavigationController;
#[async_trait::async_trait]
impl NavigationController for NoopNavigationController {
    async fn set_mode(&self, mode: &str) -> anyhow::Result<()> {
        debug!("no-op navigation controller: set_mode('{}') ignored", mode);
        Ok(())
    }
}

pub struct CognitionConfig {
    pub tool_chain_max_iterations: usize,
}

impl Default for CognitionConfig {
    fn default() -> Self {
        Self { tool_chain_max_iterations: 4 }
    }
}

#[derive(Default)]
struct PendingCall {
    name: String,
    arguments: String,
}

#[derive(Default)]
struct ResponseState {
    transcript: String,
    tool_call_count: usize,
}

/// Dispatches streamed tool/function calls and accumulates transcripts
/// for one realtime session.
pub struct CognitionActor {
    transport: Arc<SessionTransport>,
    bus: MessageBus,
    synthesis: Arc<SynthesisActor>,
    config: CognitionConfig,
    gesture: Arc<dyn GestureController>,
    memory: Arc<dyn MemoryBackend>,
    vision: Arc<dyn VisionDescriber>,
    navigation: Arc<dyn NavigationController>,
    pending_calls: tokio::sync::Mutex<HashMap<String, PendingCall>>,
    responses: tokio::sync::Mutex<HashMap<String, ResponseState>>,
    current_response_id: tokio::sync::Mutex<Option<String>>,
    pending_visual: tokio::sync::Mutex<HashMap<String, oneshot::Sender<String>>>,
    capture_seq: AtomicU64,
    error_count: AtomicU64,
}

impl CognitionActor {
    pub fn new(transport: Arc<SessionTransport>, bus: MessageBus, synthesis: Arc<SynthesisActor>, config: CognitionConfig) -> Self {
        Self {
            transport,
            bus,
            synthesis,
            config,
            gesture: Arc::new(NoopGestureController),
            memory: Arc::new(NoopMemoryBackend),
            vision: Arc::new(NoopVisionDescriber),
            navigation: Arc::new(NoopNavigationController),
            pending_calls: tokio::sync::Mutex::new(HashMap::new()),
            responses: tokio::sync::Mutex::new(HashMap::new()),
            current_response_id: tokio::sync::Mutex::new(None),
            pending_visual: tokio::sync::Mutex::new(HashMap::new()),
            capture_seq: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }

    /// Record which response is currently in flight, so a later
    /// `function_call_arguments.done` (which carries only a `call_id`,
    /// not a `response_id`) can be attributed to the right response
    /// for the tool-chain iteration bound.
    pub async fn on_response_created(&self, response_id: &str) {
        *self.current_response_id.lock().await = Some(response_id.to_string());
    }

    pub fn with_gesture_controller(mut self, gesture: Arc<dyn GestureController>) -> Self {
        self.gesture = gesture;
        self
    }

    pub fn with_memory_backend(mut self, memory: Arc<dyn MemoryBackend>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_vision_describer(mut self, vision: Arc<dyn VisionDescriber>) -> Self {
        self.vision = vision;
        self
    }

    pub fn with_navigation_controller(mut self, navigation: Arc<dyn NavigationController>) -> Self {
        self.navigation = navigation;
        self
    }

    /// Number of unrecognized tool calls dispatched since this actor
    /// was created.
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub async fn on_audio_transcript_delta(&self, response_id: &str, delta: &str) {
        let mut responses = self.responses.lock().await;
        responses.entry(response_id.to_string()).or_default().transcript.push_str(delta);
    }

    pub async fn on_audio_transcript_done(&self, response_id: &str, transcript: &str) {
        self.bus
            .publish(TOPIC_VOICE_COMMAND, serde_json::json!({ "response_id": response_id, "transcript": transcript }))
            .await;
    }

    pub async fn on_text_delta(&self, response_id: &str, delta: &str) {
        let mut responses = self.responses.lock().await;
        responses.entry(response_id.to_string()).or_default().transcript.push_str(delta);
    }

    pub async fn on_text_done(&self, response_id: &str, text: &str) {
        self.bus
            .publish(TOPIC_TEXT_RESPONSE, serde_json::json!({ "response_id": response_id, "text": text }))
            .await;
    }

    pub async fn on_function_call_arguments_delta(&self, call_id: &str, name: &str, delta: &str) {
        let mut pending = self.pending_calls.lock().await;
        let entry = pending.entry(call_id.to_string()).or_insert_with(|| PendingCall {
            name: name.to_string(),
            arguments: String::new(),
        });
        entry.arguments.push_str(delta);
    }

    /// A tool call's arguments are complete: parse, check the
    /// per-response iteration bound, dispatch, and send the result
    /// back as a `function_call_output` followed by `response.create`.
    pub async fn on_function_call_arguments_done(&self, call_id: &str, name: &str, arguments: &str) {
        let mut pending = self.pending_calls.lock().await;
        pending.remove(call_id);
        drop(pending);

        let response_id = self
            .current_response_id
            .lock()
            .await
            .clone()
            .unwrap_or_else(|| call_id.to_string());
        let response_id = response_id.as_str();

        {
            let mut responses = self.responses.lock().await;
            let state = responses.entry(response_id.to_string()).or_default();
            state.tool_call_count += 1;
            if state.tool_call_count > self.config.tool_chain_max_iterations {
                warn!("cognition: tool chain limit reached for response {}", response_id);
                return;
            }
        }

        let args: Value = serde_json::from_str(arguments).unwrap_or(Value::Null);
        let output = match self.dispatch(name, &args).await {
            Ok(output) => output,
            Err(e) => {
                warn!("cognition: tool '{}' failed: {}", name, e);
                format!("error: {e}")
            }
        };

        if let Err(e) = self
            .transport
            .send(ClientEvent::ConversationItemCreate {
                item: ConversationItem::FunctionCallOutput { call_id: call_id.to_string(), output },
            })
            .await
        {
            warn!("cognition: failed to send function_call_output: {}", e);
            return;
        }

        if name == "take_snapshot" {
            self.request_camera_view().await;
        }

        // Resuming after a tool call can make the model speak again,
        // so this `response.create` needs the same mic-mutex guard as
        // the user-utterance path in `capture::commit_and_request_response`
        // — never send it unguarded (spec.md §3 Invariant 1).
        match self.synthesis.begin_response(&self.transport).await {
            Ok(true) => {
                if let Err(e) = self
                    .transport
                    .send(ClientEvent::ResponseCreate { response: Some(ResponseCreateOptions::default()) })
                    .await
                {
                    warn!("cognition: failed to resume response after tool call: {}", e);
                }
            }
            Ok(false) => {
                debug!("cognition: a response is already in flight, skipping resume after tool call");
            }
            Err(e) => {
                warn!("cognition: failed to acquire mic mutex before resuming response: {}", e);
            }
        }
    }

    /// Publish a `visual_request` naming a fresh capture id, wait (with
    /// a timeout) for the matching `visual_data` reply routed through
    /// `handle_visual_data`, and inject the description as a user
    /// message so the model can react to it.
    async fn request_camera_view(&self) {
        let capture_id = format!("capture-{}", self.capture_seq.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending_visual.lock().await.insert(capture_id.clone(), tx);
        self.bus
            .publish(TOPIC_VISUAL_REQUEST, serde_json::json!({ "capture_id": capture_id }))
            .await;

        let description = match tokio::time::timeout(VISUAL_RESPONSE_TIMEOUT, rx).await {
            Ok(Ok(description)) => description,
            Ok(Err(_)) | Err(_) => {
                self.pending_visual.lock().await.remove(&capture_id);
                "no camera response".to_string()
            }
        };

        let _ = self
            .transport
            .send(ClientEvent::ConversationItemCreate {
                item: ConversationItem::Message {
                    role: "user".to_string(),
                    content: vec![ContentPart::InputText { text: format!("[Camera view: {description}]") }],
                },
            })
            .await;
    }

    /// Handle one `visual_data` bus message: `{image_data: base64,
    /// capture_id}`. Decodes the image and resolves the matching
    /// `take_snapshot` request, if one is still pending.
    pub async fn handle_visual_data(&self, capture_id: &str, image_data_b64: &str) {
        let sender = self.pending_visual.lock().await.remove(capture_id);
        let Some(sender) = sender else {
            debug!("cognition: visual_data for unknown/expired capture_id {}", capture_id);
            return;
        };

        let bytes = match STANDARD.decode(image_data_b64) {
            Ok(b) => b,
            Err(e) => {
                warn!("cognition: malformed visual_data image for {}: {}", capture_id, e);
                let _ = sender.send("camera image could not be decoded".to_string());
                return;
            }
        };

        match self.vision.describe_current_view(&bytes).await {
            Ok(description) => {
                let _ = sender.send(description);
            }
            Err(e) => {
                warn!("cognition: vision description failed: {}", e);
                let _ = sender.send("camera view could not be described".to_string());
            }
        }
    }

    /// Subscribe to `visual_data` and dispatch every message to
    /// `handle_visual_data` until the bus subscription closes. Spawned
    /// once by the composition root alongside the other actor tasks.
    pub fn spawn_visual_data_listener(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut sub = self.bus.subscribe(TOPIC_VISUAL_DATA).await;
            while let Some(msg) = sub.recv().await {
                let capture_id = msg.payload.get("capture_id").and_then(Value::as_str).unwrap_or_default();
                let image_data = msg.payload.get("image_data").and_then(Value::as_str).unwrap_or_default();
                self.handle_visual_data(capture_id, image_data).await;
            }
        })
    }

    async fn dispatch(&self, name: &str, args: &Value) -> anyhow::Result<String> {
        match name {
            "take_snapshot" => Ok("snapshot requested".to_string()),
            "remember" => {
                let key = args.get("key").and_then(Value::as_str).unwrap_or_default();
                let value = args.get("value").and_then(Value::as_str).unwrap_or_default();
                self.memory.remember(key, value).await?;
                Ok(format!("remembered '{key}'"))
            }
            "recall" => {
                let key = args.get("key").and_then(Value::as_str).unwrap_or_default();
                match self.memory.recall(key).await? {
                    Some(value) => Ok(value),
                    None => Ok(format!("nothing remembered for '{key}'")),
                }
            }
            "set_navigation_mode" => {
                let mode = args.get("mode").and_then(Value::as_str).unwrap_or("idle");
                self.navigation.set_mode(mode).await?;
                Ok(format!("navigation mode set to '{mode}'"))
            }
            gesture_name if ALLOWED_GESTURES.contains(&gesture_name) => {
                self.gesture.perform(gesture_name).await
            }
            other => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                info!("cognition: rejected unknown function '{}'", other);
                Ok(serde_json::json!({
                    "status": "error",
                    "message": format!("unknown function: {other}"),
                })
                .to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::voice::realtime::mic_mutex::MicMutex;
    use crate::voice::realtime::synthesis::{SynthesisActor, SynthesisConfig};

    fn test_synthesis(bus: MessageBus, mic_mutex: MicMutex) -> Arc<SynthesisActor> {
        Arc::new(
            SynthesisActor::new(
                SynthesisConfig {
                    wav_dir: tempfile::tempdir().unwrap().into_path(),
                    wav_retention_count: 2,
                },
                mic_mutex,
                bus,
            )
            .unwrap(),
        )
    }

    fn test_actor() -> CognitionActor {
        let bus = MessageBus::new();
        let transport = Arc::new(SessionTransport::new("ws://127.0.0.1:1/voice", None, bus.clone()));
        let synthesis = test_synthesis(bus.clone(), MicMutex::new());
        CognitionActor::new(transport, bus, synthesis, CognitionConfig::default())
    }

    #[tokio::test]
    async fn transcript_delta_accumulates_then_publishes_on_done() {
        let actor = test_actor();
        let mut sub = actor.bus.subscribe(TOPIC_VOICE_COMMAND).await;
        actor.on_audio_transcript_delta("resp_1", "hello ").await;
        actor.on_audio_transcript_delta("resp_1", "world").await;
        actor.on_audio_transcript_done("resp_1", "hello world").await;
        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.payload["transcript"], "hello world");
    }

    #[tokio::test]
    async fn dispatch_remember_and_recall_round_trip_through_memory_backend() {
        struct InMemory(tokio::sync::Mutex<HashMap<String, String>>);
        #[async_trait::async_trait]
        impl MemoryBackend for InMemory {
            async fn remember(&self, key: &str, value: &str) -> anyhow::Result<()> {
                self.0.lock().await.insert(key.to_string(), value.to_string());
                Ok(())
            }
            async fn recall(&self, key: &str) -> anyhow::Result<Option<String>> {
                Ok(self.0.lock().await.get(key).cloned())
            }
        }

        let actor = test_actor().with_memory_backend(Arc::new(InMemory(tokio::sync::Mutex::new(HashMap::new()))));
        let remembered = actor
            .dispatch("remember", &serde_json::json!({"key": "owner", "value": "Sam"}))
            .await
            .unwrap();
        assert!(remembered.contains("owner"));
        let recalled = actor.dispatch("recall", &serde_json::json!({"key": "owner"})).await.unwrap();
        assert_eq!(recalled, "Sam");
    }

    #[tokio::test]
    async fn tool_chain_beyond_max_iterations_is_skipped() {
        let actor = test_actor();
        actor.on_response_created("resp_x").await;
        for i in 0..actor.config.tool_chain_max_iterations + 2 {
            actor
                .on_function_call_arguments_done(&format!("call_{i}"), "recall", r#"{"key":"x"}"#)
                .await;
        }
        let responses = actor.responses.lock().await;
        let state = responses.get("resp_x").unwrap();
        assert!(state.tool_call_count > actor.config.tool_chain_max_iterations);
    }

    #[tokio::test]
    async fn allow_listed_gesture_name_reaches_gesture_controller() {
        let actor = test_actor();
        let result = actor.dispatch("wave", &serde_json::json!({})).await.unwrap();
        assert!(result.contains("wave"));
    }

    #[tokio::test]
    async fn unknown_tool_name_returns_error_shape_and_counts() {
        let actor = test_actor();
        let result = actor.dispatch("teleport", &serde_json::json!({})).await.unwrap();
        let parsed: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(parsed["status"], "error");
        assert_eq!(parsed["message"], "unknown function: teleport");
        assert_eq!(actor.error_count(), 1);
    }

    #[tokio::test]
    async fn tool_call_resume_acquires_mic_mutex_before_response_create() {
        let bus = MessageBus::new();
        let mic_mutex = MicMutex::new();
        let transport = Arc::new(SessionTransport::new("ws://127.0.0.1:1/voice", None, bus.clone()));
        let synthesis = test_synthesis(bus.clone(), mic_mutex.clone());
        let actor = CognitionActor::new(transport, bus, synthesis, CognitionConfig::default());

        assert!(mic_mutex.available());
        actor.on_function_call_arguments_done("call_1", "recall", r#"{"key":"x"}"#).await;
        assert!(
            !mic_mutex.available(),
            "resuming a response after a tool call must acquire the mic mutex before sending response.create"
        );
    }

    #[tokio::test]
    async fn visual_data_resolves_pending_take_snapshot_request() {
        struct FixedVision;
        #[async_trait::async_trait]
        impl VisionDescriber for FixedVision {
            async fn describe_current_view(&self, image: &[u8]) -> anyhow::Result<String> {
                Ok(format!("{} bytes in view", image.len()))
            }
        }

        let actor = Arc::new(test_actor().with_vision_describer(Arc::new(FixedVision)));
        let mut requests = actor.bus.subscribe(TOPIC_VISUAL_REQUEST).await;

        let camera_actor = actor.clone();
        let camera_task = tokio::spawn(async move { camera_actor.request_camera_view().await });

        let request = requests.recv().await.unwrap();
        let capture_id = request.payload["capture_id"].as_str().unwrap().to_string();
        let image_b64 = STANDARD.encode([1u8, 2, 3, 4]);
        actor.handle_visual_data(&capture_id, &image_b64).await;

        camera_task.await.unwrap();
    }
}
