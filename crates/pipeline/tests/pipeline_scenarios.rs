//! End-to-end pipeline scenarios driven through the deterministic fake
//! providers: scripted STT utterances, scripted LLM replies, and
//! deterministic TTS audio.

use std::sync::Arc;
use std::time::Duration;

use vx_audio::encode_s16le;
use vx_domain::call::EndReason;
use vx_domain::session::{ChatRole, SessionSpec, SessionStatus};
use vx_pipeline::{
    CancelToken, ControlEvent, Orchestrator, PipelineContext, PipelineEvent, ToolRegistry,
};
use vx_protocol::{ServerMessage, FRAMES_PER_CHUNK};
use vx_providers::fake::{FakeLlmProvider, FakeLlmReply, FakeSttProvider, FakeTtsProvider, FakeUtterance};
use vx_providers::ProviderRegistry;
use vx_sessions::{MemoryKv, SessionManager};

// ── Fixtures ───────────────────────────────────────────────────────

fn spec(overrides: serde_json::Value) -> SessionSpec {
    let mut base = serde_json::json!({
        "tenantId": "acme",
        "callId": "call-1",
        "systemPrompt": "You are a concise voice agent.",
        "stt": { "provider": "fake" },
        "llm": { "provider": "fake", "model": "test" },
        "tts": { "provider": "fake", "voiceId": "v1" },
        "firstMessage": null,
        "endCallPhrases": [],
        "interruptionSensitivity": 0.5,
        "silenceTimeoutMs": 800,
        "maxCallDurationSeconds": 600
    });
    if let (Some(base_map), Some(patch)) = (base.as_object_mut(), overrides.as_object()) {
        for (k, v) in patch {
            base_map.insert(k.clone(), v.clone());
        }
    }
    serde_json::from_value(base).unwrap()
}

fn registry(
    stt: FakeSttProvider,
    llm: FakeLlmProvider,
    tts: FakeTtsProvider,
) -> Arc<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    registry.register_stt("fake", Arc::new(stt));
    registry.register_llm("fake", Arc::new(llm));
    registry.register_tts("fake", Arc::new(tts));
    Arc::new(registry)
}

async fn spawn(
    spec: SessionSpec,
    providers: Arc<ProviderRegistry>,
) -> (Arc<SessionManager>, vx_pipeline::PipelineHandle) {
    let sessions = Arc::new(SessionManager::new(Arc::new(MemoryKv::new()), 3600));
    let session = sessions.create(spec).await.unwrap();
    let handle = Orchestrator::spawn(PipelineContext {
        session,
        providers,
        sessions: sessions.clone(),
        tools: Arc::new(ToolRegistry::new()),
        cancel: CancelToken::new(),
        billing: vx_domain::config::BillingConfig::default(),
    });
    (sessions, handle)
}

fn loud_chunk() -> Vec<u8> {
    encode_s16le(&vec![i16::MAX / 3; FRAMES_PER_CHUNK])
}

fn silent_chunk() -> Vec<u8> {
    vec![0u8; FRAMES_PER_CHUNK * 2]
}

async fn next_event(handle: &mut vx_pipeline::PipelineHandle) -> PipelineEvent {
    tokio::time::timeout(Duration::from_secs(5), handle.events.recv())
        .await
        .expect("timed out waiting for pipeline event")
        .expect("pipeline event channel closed")
}

/// Read events until the predicate matches, returning everything seen
/// (matching event included).
async fn read_until(
    handle: &mut vx_pipeline::PipelineHandle,
    mut pred: impl FnMut(&PipelineEvent) -> bool,
) -> Vec<PipelineEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(handle).await;
        let done = pred(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

fn is_turn_complete(event: &PipelineEvent) -> bool {
    matches!(event, PipelineEvent::Control(ServerMessage::TurnComplete { .. }))
}

fn is_session_ended(event: &PipelineEvent) -> bool {
    matches!(event, PipelineEvent::Control(ServerMessage::SessionEnded { .. }))
}

fn control_types(events: &[PipelineEvent]) -> Vec<&'static str> {
    events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Control(msg) => Some(match msg {
                ServerMessage::Connected { .. } => "connected",
                ServerMessage::SessionStarted { .. } => "session_started",
                ServerMessage::SttPartial { .. } => "stt_partial",
                ServerMessage::SttFinal { .. } => "stt_final",
                ServerMessage::LlmToken { .. } => "llm_token",
                ServerMessage::BargeIn {} => "barge_in",
                ServerMessage::TurnComplete { .. } => "turn_complete",
                ServerMessage::SessionEnded { .. } => "session_ended",
                ServerMessage::Error { .. } => "error",
            }),
            PipelineEvent::Audio(_) => None,
        })
        .collect()
}

async fn feed_utterance(handle: &vx_pipeline::PipelineHandle, speech_chunks: usize) {
    for _ in 0..speech_chunks {
        handle.audio_tx.send(loud_chunk()).await.unwrap();
    }
    // 800 ms of in-band silence is 4 chunks at 256 ms; send one extra.
    for _ in 0..5 {
        handle.audio_tx.send(silent_chunk()).await.unwrap();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn happy_single_turn_orders_events() {
    let providers = registry(
        FakeSttProvider::scripted(vec![FakeUtterance::new(&["he", "hell"], "hello")]),
        FakeLlmProvider::scripted(vec![FakeLlmReply::text(&["Hi", "!"])]),
        FakeTtsProvider::new(),
    );
    let (_sessions, mut handle) = spawn(spec(serde_json::json!({})), providers).await;

    // 1.5 s of speech, then silence past the timeout.
    feed_utterance(&handle, 6).await;

    let events = read_until(&mut handle, is_turn_complete).await;
    let controls = control_types(&events);

    assert_eq!(
        controls,
        vec![
            "stt_partial",
            "stt_partial",
            "stt_final",
            "llm_token",
            "llm_token",
            "turn_complete"
        ]
    );

    // Partial texts and the final in order.
    let texts: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Control(ServerMessage::SttPartial { text }) => Some(text.clone()),
            PipelineEvent::Control(ServerMessage::SttFinal { text }) => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(texts, vec!["he", "hell", "hello"]);

    // At least one binary PCM frame between stt_final and turn_complete.
    let audio_frames = events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::Audio(_)))
        .count();
    assert!(audio_frames >= 1);

    // Graceful end.
    handle.control_tx.send(ControlEvent::EndSession).await.unwrap();
    read_until(&mut handle, is_session_ended).await;
    let result = handle.join.await.unwrap();
    assert_eq!(result.end_reason, EndReason::Normal);
    assert_eq!(result.session.status, SessionStatus::Ended);
    assert_eq!(result.session.metrics.turn_count, 1);
    assert!(result.llm_tokens > 0);

    // History: system, user, assistant.
    let roles: Vec<ChatRole> = result.session.history.iter().map(|e| e.role).collect();
    assert_eq!(roles, vec![ChatRole::System, ChatRole::User, ChatRole::Assistant]);
    assert_eq!(result.session.history[1].content, "hello");
    assert_eq!(result.session.history[2].content, "Hi!");
}

#[tokio::test]
async fn barge_in_preempts_the_speaking_turn() {
    // A long scripted reply keeps the pipeline in Speaking while the
    // caller interrupts: enough events to saturate the outbound queue so
    // the turn cannot finish before the interruption lands.
    let long_reply: Vec<String> = (0..40)
        .map(|i| format!("This is sentence number {i}. "))
        .collect();
    let long_tokens: Vec<&str> = long_reply.iter().map(|s| s.as_str()).collect();

    let providers = registry(
        FakeSttProvider::scripted(vec![
            FakeUtterance::new(&["hi"], "hi there"),
            FakeUtterance::new(&["stop"], "stop please"),
        ]),
        FakeLlmProvider::scripted(vec![
            FakeLlmReply::text(&long_tokens),
            FakeLlmReply::text(&["Okay", "."]),
        ]),
        FakeTtsProvider::new(),
    );
    let (_sessions, mut handle) = spawn(
        spec(serde_json::json!({ "interruptionSensitivity": 1.0 })),
        providers,
    )
    .await;

    feed_utterance(&handle, 4).await;

    // Wait until the assistant is audibly speaking.
    let before_barge = read_until(&mut handle, |e| matches!(e, PipelineEvent::Audio(_))).await;
    assert!(control_types(&before_barge).contains(&"stt_final"));

    // A 300 ms speech burst during playback.
    handle.audio_tx.send(loud_chunk()).await.unwrap();
    handle.audio_tx.send(loud_chunk()).await.unwrap();

    let up_to_barge = read_until(&mut handle, |e| {
        matches!(e, PipelineEvent::Control(ServerMessage::BargeIn {}))
    })
    .await;
    // The preempted turn emitted no turn_complete.
    assert!(!up_to_barge.iter().any(is_turn_complete));

    // Close the second utterance; the next turn runs to completion.
    for _ in 0..5 {
        handle.audio_tx.send(silent_chunk()).await.unwrap();
    }
    let second_turn = read_until(&mut handle, is_turn_complete).await;
    let finals: Vec<&str> = second_turn
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Control(ServerMessage::SttFinal { text }) => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(finals, vec!["stop please"]);

    handle.control_tx.send(ControlEvent::EndSession).await.unwrap();
    read_until(&mut handle, is_session_ended).await;
    let result = handle.join.await.unwrap();

    // Exactly one barge_in across the whole call, and the partial
    // assistant text carries the interruption marker.
    let interrupted: Vec<_> = result
        .session
        .history
        .iter()
        .filter(|e| e.role == ChatRole::Assistant && e.content.ends_with("[interrupted]"))
        .collect();
    assert_eq!(interrupted.len(), 1);
    assert_eq!(result.session.metrics.turn_count, 1); // only the completed turn counted
}

#[tokio::test]
async fn caller_speech_during_generating_does_not_barge_in() {
    // Boundary-free tokens: no sentence completes until the stream ends,
    // so the pipeline stays in Generating (no TTS byte) the whole time.
    let flat_reply: Vec<String> = (0..200).map(|i| format!("word{i} ")).collect();
    let flat_tokens: Vec<&str> = flat_reply.iter().map(|s| s.as_str()).collect();

    let providers = registry(
        FakeSttProvider::scripted(vec![FakeUtterance::new(&["hi"], "hi there")]),
        FakeLlmProvider::scripted(vec![FakeLlmReply::text(&flat_tokens)]),
        FakeTtsProvider::new(),
    );
    let (_sessions, mut handle) = spawn(
        spec(serde_json::json!({ "interruptionSensitivity": 1.0 })),
        providers,
    )
    .await;

    feed_utterance(&handle, 4).await;

    // Well into token streaming, with nothing synthesized yet.
    let mut tokens_seen = 0;
    let before_speech = read_until(&mut handle, |e| {
        if matches!(e, PipelineEvent::Control(ServerMessage::LlmToken { .. })) {
            tokens_seen += 1;
        }
        tokens_seen == 10
    })
    .await;
    assert!(!before_speech.iter().any(|e| matches!(e, PipelineEvent::Audio(_))));

    // Caller speech lands while the assistant is still only generating.
    handle.audio_tx.send(loud_chunk()).await.unwrap();
    handle.audio_tx.send(loud_chunk()).await.unwrap();

    let rest = read_until(&mut handle, is_turn_complete).await;
    assert!(!rest
        .iter()
        .any(|e| matches!(e, PipelineEvent::Control(ServerMessage::BargeIn {}))));
    // The turn still spoke and completed normally.
    assert!(rest.iter().any(|e| matches!(e, PipelineEvent::Audio(_))));

    handle.control_tx.send(ControlEvent::EndSession).await.unwrap();
    read_until(&mut handle, is_session_ended).await;
    let result = handle.join.await.unwrap();
    assert!(!result
        .session
        .history
        .iter()
        .any(|e| e.content.ends_with("[interrupted]")));
    assert_eq!(result.session.metrics.turn_count, 1);
}

#[tokio::test]
async fn end_call_phrase_finishes_after_final_response() {
    let providers = registry(
        FakeSttProvider::scripted(vec![FakeUtterance::new(&["ok"], "ok, goodbye then")]),
        FakeLlmProvider::scripted(vec![FakeLlmReply::text(&["Goodbye", "!"])]),
        FakeTtsProvider::new(),
    );
    let (_sessions, mut handle) = spawn(
        spec(serde_json::json!({ "endCallPhrases": ["goodbye"] })),
        providers,
    )
    .await;

    feed_utterance(&handle, 4).await;

    // The final assistant response streams fully, then the session ends on
    // its own at the turn boundary.
    let events = read_until(&mut handle, is_session_ended).await;
    let controls = control_types(&events);
    assert!(controls.contains(&"turn_complete"));
    assert!(events.iter().any(|e| matches!(e, PipelineEvent::Audio(_))));

    let result = handle.join.await.unwrap();
    assert_eq!(result.end_reason, EndReason::Normal);
    assert_eq!(result.session.status, SessionStatus::Ended);
}

#[tokio::test]
async fn empty_llm_stream_is_a_noop_turn() {
    let providers = registry(
        FakeSttProvider::scripted(vec![FakeUtterance::new(&[], "anything there")]),
        FakeLlmProvider::scripted(vec![FakeLlmReply::empty()]),
        FakeTtsProvider::new(),
    );
    let (_sessions, mut handle) = spawn(spec(serde_json::json!({})), providers).await;

    feed_utterance(&handle, 4).await;

    let events = read_until(&mut handle, is_turn_complete).await;
    // No tokens, no audio; just the final and the no-op completion.
    assert!(!events.iter().any(|e| matches!(e, PipelineEvent::Audio(_))));
    let note = events
        .iter()
        .find_map(|e| match e {
            PipelineEvent::Control(ServerMessage::TurnComplete { metrics }) => {
                metrics.note.clone()
            }
            _ => None,
        })
        .expect("turn_complete present");
    assert!(note.contains("no response"));

    handle.control_tx.send(ControlEvent::EndSession).await.unwrap();
    read_until(&mut handle, is_session_ended).await;
    handle.join.await.unwrap();
}

#[tokio::test]
async fn tts_failure_truncates_and_completes_the_turn() {
    let providers = registry(
        FakeSttProvider::scripted(vec![FakeUtterance::new(&[], "tell me")]),
        FakeLlmProvider::scripted(vec![FakeLlmReply::text(&[
            "Fine. ",
            "This will boom. ",
            "Never spoken. ",
        ])]),
        FakeTtsProvider::failing_on("boom"),
    );
    let (_sessions, mut handle) = spawn(spec(serde_json::json!({})), providers).await;

    feed_utterance(&handle, 4).await;

    let events = read_until(&mut handle, is_turn_complete).await;
    let controls = control_types(&events);
    assert!(controls.contains(&"error"));
    assert!(controls.contains(&"turn_complete"));

    handle.control_tx.send(ControlEvent::EndSession).await.unwrap();
    read_until(&mut handle, is_session_ended).await;
    let result = handle.join.await.unwrap();

    // The session survived the turn failure.
    assert_eq!(result.session.status, SessionStatus::Ended);
    assert!(result.session.metrics.error_count >= 1);
    // Assistant history holds only what fully played.
    let assistant = result
        .session
        .history
        .iter()
        .find(|e| e.role == ChatRole::Assistant)
        .expect("assistant entry");
    assert!(!assistant.content.contains("Never spoken"));
}

#[tokio::test]
async fn zero_sensitivity_disables_barge_in() {
    let long_reply: Vec<String> = (0..8)
        .map(|i| format!("Sentence number {i} of the answer. "))
        .collect();
    let long_tokens: Vec<&str> = long_reply.iter().map(|s| s.as_str()).collect();

    let providers = registry(
        FakeSttProvider::scripted(vec![FakeUtterance::new(&[], "hello")]),
        FakeLlmProvider::scripted(vec![FakeLlmReply::text(&long_tokens)]),
        FakeTtsProvider::new(),
    );
    let (_sessions, mut handle) = spawn(
        spec(serde_json::json!({ "interruptionSensitivity": 0.0 })),
        providers,
    )
    .await;

    feed_utterance(&handle, 4).await;

    // Interrupt loudly while the assistant speaks.
    let _ = read_until(&mut handle, |e| matches!(e, PipelineEvent::Audio(_))).await;
    handle.audio_tx.send(loud_chunk()).await.unwrap();
    handle.audio_tx.send(loud_chunk()).await.unwrap();

    let events = read_until(&mut handle, is_turn_complete).await;
    assert!(!events
        .iter()
        .any(|e| matches!(e, PipelineEvent::Control(ServerMessage::BargeIn {}))));

    handle.control_tx.send(ControlEvent::EndSession).await.unwrap();
    read_until(&mut handle, is_session_ended).await;
    handle.join.await.unwrap();
}

#[tokio::test]
async fn first_message_plays_before_any_user_turn() {
    let providers = registry(
        FakeSttProvider::scripted(vec![]),
        FakeLlmProvider::scripted(vec![]),
        FakeTtsProvider::new(),
    );
    let (_sessions, mut handle) = spawn(
        spec(serde_json::json!({ "firstMessage": "Hello, how can I help?" })),
        providers,
    )
    .await;

    // Greeting audio arrives with no user speech and no turn_complete.
    let events = read_until(&mut handle, |e| matches!(e, PipelineEvent::Audio(_))).await;
    assert!(!events.iter().any(is_turn_complete));

    handle.control_tx.send(ControlEvent::EndSession).await.unwrap();
    read_until(&mut handle, is_session_ended).await;
    let result = handle.join.await.unwrap();
    assert!(result
        .session
        .history
        .iter()
        .any(|e| e.role == ChatRole::Assistant && e.content.starts_with("Hello")));
}

#[tokio::test]
async fn max_duration_forces_the_session_to_end() {
    let providers = registry(
        FakeSttProvider::scripted(vec![]),
        FakeLlmProvider::scripted(vec![]),
        FakeTtsProvider::new(),
    );
    let (_sessions, mut handle) = spawn(
        spec(serde_json::json!({ "maxCallDurationSeconds": 1 })),
        providers,
    )
    .await;

    let events = read_until(&mut handle, is_session_ended).await;
    assert!(!events.is_empty());

    let result = handle.join.await.unwrap();
    assert_eq!(result.end_reason, EndReason::MaxDuration);
}

#[tokio::test]
async fn caller_hangup_when_audio_channel_closes() {
    let providers = registry(
        FakeSttProvider::scripted(vec![]),
        FakeLlmProvider::scripted(vec![]),
        FakeTtsProvider::new(),
    );
    let (_sessions, handle) = spawn(spec(serde_json::json!({})), providers).await;

    let vx_pipeline::PipelineHandle {
        audio_tx,
        control_tx,
        mut events,
        join,
        ..
    } = handle;
    drop(audio_tx);
    drop(control_tx);

    // Drain until the channel closes.
    while events.recv().await.is_some() {}
    let result = join.await.unwrap();
    assert_eq!(result.end_reason, EndReason::CallerHangup);
}
