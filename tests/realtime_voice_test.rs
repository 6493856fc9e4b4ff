//! Black-box integration tests for the realtime voice core's
//! actor wiring, exercised through public APIs only (no microphone
//! hardware, no live websocket — those two would need a machine with
//! both, matching the existing integration tests in this crate that
//! skip anything requiring live external services they can't mock).

#![cfg(feature = "voice")]

use my_agent::voice::realtime::bus::MessageBus;
use my_agent::voice::realtime::cognition::{CognitionActor, CognitionConfig, TOPIC_TEXT_RESPONSE, TOPIC_VOICE_COMMAND};
use my_agent::voice::realtime::mic_mutex::MicMutex;
use my_agent::voice::realtime::synthesis::{SynthesisActor, SynthesisConfig};
use my_agent::voice::realtime::transport::SessionTransport;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;

fn test_transport(bus: MessageBus) -> Arc<SessionTransport> {
    Arc::new(SessionTransport::new("ws://127.0.0.1:1/voice", None, bus))
}

fn test_synthesis(bus: MessageBus) -> Arc<SynthesisActor> {
    Arc::new(
        SynthesisActor::new(
            SynthesisConfig { wav_dir: tempfile::tempdir().unwrap().into_path(), wav_retention_count: 2 },
            MicMutex::new(),
            bus,
        )
        .unwrap(),
    )
}

#[tokio::test]
async fn end_to_end_text_response_reaches_bus_subscriber() {
    let bus = MessageBus::new();
    let transport = test_transport(bus.clone());
    let synthesis = test_synthesis(bus.clone());
    let cognition = CognitionActor::new(transport, bus.clone(), synthesis, CognitionConfig::default());

    let mut sub = bus.subscribe(TOPIC_TEXT_RESPONSE).await;
    cognition.on_text_delta("resp_1", "The weather ").await;
    cognition.on_text_delta("resp_1", "is sunny.").await;
    cognition.on_text_done("resp_1", "The weather is sunny.").await;

    let msg = sub.recv().await.expect("expected a text_response message");
    assert_eq!(msg.payload["response_id"], "resp_1");
    assert_eq!(msg.payload["text"], "The weather is sunny.");
}

#[tokio::test]
async fn end_to_end_voice_command_transcript_reaches_bus_subscriber() {
    let bus = MessageBus::new();
    let transport = test_transport(bus.clone());
    let synthesis = test_synthesis(bus.clone());
    let cognition = CognitionActor::new(transport, bus.clone(), synthesis, CognitionConfig::default());

    let mut sub = bus.subscribe(TOPIC_VOICE_COMMAND).await;
    cognition.on_audio_transcript_delta("resp_2", "turn ").await;
    cognition.on_audio_transcript_delta("resp_2", "left").await;
    cognition.on_audio_transcript_done("resp_2", "turn left").await;

    let msg = sub.recv().await.expect("expected a voice_command message");
    assert_eq!(msg.payload["transcript"], "turn left");
}

// Buffering deltas alone (without `begin_response`, which this crate's
// other tests cover for the mutex-acquire ordering) must never touch
// the mic mutex or the hardware playback primitive — that only happens
// on `on_audio_done`, which needs a real output device and is left to
// the colocated unit tests in synthesis.rs's `#[cfg(test)]` module.
#[tokio::test]
async fn buffering_deltas_does_not_touch_mic_mutex() {
    let dir = tempfile::tempdir().unwrap();
    let mic_mutex = MicMutex::new();
    let bus = MessageBus::new();
    let actor = SynthesisActor::new(
        SynthesisConfig { wav_dir: dir.path().to_path_buf(), wav_retention_count: 5 },
        mic_mutex.clone(),
        bus,
    )
    .unwrap();

    let samples: Vec<i16> = (0..2400).map(|i| (i % 100) as i16).collect();
    let mut bytes = Vec::new();
    for s in &samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    let b64 = STANDARD.encode(&bytes);
    actor.on_audio_delta("resp_3", &b64).await;

    assert!(mic_mutex.available(), "mic mutex must be free before playback starts");
}

#[tokio::test]
async fn tool_chain_iteration_bound_stops_after_configured_count() {
    let bus = MessageBus::new();
    let transport = test_transport(bus.clone());
    let synthesis = test_synthesis(bus.clone());
    let config = CognitionConfig { tool_chain_max_iterations: 2 };
    let cognition = CognitionActor::new(transport, bus, synthesis, config);

    cognition.on_response_created("resp_4").await;
    for i in 0..5 {
        cognition
            .on_function_call_arguments_done(&format!("call_{i}"), "recall", r#"{"key":"x"}"#)
            .await;
    }
    // No panic, no hang: calls past the bound are silently dropped.
    // (The actor's internal counter is exercised more directly by the
    // colocated unit test in cognition.rs; this just proves the public
    // entry point tolerates exceeding the bound without misbehaving.)
}

#[tokio::test]
async fn mic_mutex_balances_across_a_full_speak_cycle() {
    let mutex = MicMutex::new();
    assert!(mutex.available());
    {
        let _guard = mutex.acquire("speaking");
        assert!(!mutex.available());
    }
    assert!(mutex.available());
}
