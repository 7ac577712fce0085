//! The call WebSocket endpoint.
//!
//! Flow per connection:
//! 1. Client connects to `/v1/call`; the gateway replies `connected`.
//! 2. `start_session` runs admission, creates the session, and spawns its
//!    pipeline; the gateway replies `session_started` (with the output
//!    sample rate) or `error`.
//! 3. Binary frames are caller PCM for the connection's session; text
//!    frames carry control messages.
//! 4. Outbound, a writer task serializes everything: pipeline control
//!    messages as JSON text, PCM as binary, in emission order.
//!
//! A session supervisor task pumps pipeline events to the writer and
//! finalizes the call when the pipeline finishes, on every exit path,
//! panic included.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use vx_domain::call::ProviderTriple;
use vx_domain::error::{Error, Result};
use vx_domain::session::SessionSpec;
use vx_pipeline::{
    ControlEvent, Orchestrator, PipelineContext, PipelineEvent, PipelineHandle,
};
use vx_protocol::{ClientMessage, ServerMessage};
use vx_providers::ProviderRegistry;

use vx_admission::ReserveRequest;

use crate::state::AppState;
use crate::teardown;

/// Outbound writer queue per connection.
const OUTBOUND_QUEUE: usize = 64;

/// GET /v1/call: upgrade to the bidirectional call channel.
pub async fn call_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// The connection's live session, if one was started.
struct ActiveCall {
    session_id: String,
    audio_tx: mpsc::Sender<Vec<u8>>,
    control_tx: mpsc::Sender<ControlEvent>,
    dropped_inbound: Arc<AtomicU32>,
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    let (mut ws_sink, mut ws_stream) = socket.split();

    // Writer task: the single owner of the sink. Everything outbound is
    // serialized through this queue.
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if ws_sink.send(message).await.is_err() {
                break;
            }
        }
    });

    send_control(
        &outbound_tx,
        &ServerMessage::Connected {
            connection_id: connection_id.clone(),
        },
    )
    .await;
    tracing::info!(connection_id = %connection_id, "client connected");

    let mut active: Option<ActiveCall> = None;

    while let Some(Ok(message)) = ws_stream.next().await {
        match message {
            Message::Text(text) => {
                handle_text(&state, &outbound_tx, &mut active, &text).await;
            }
            Message::Binary(payload) => {
                let Some(call) = active.as_ref() else {
                    tracing::debug!("audio frame before start_session, ignoring");
                    continue;
                };
                match call.audio_tx.try_send(payload) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        // STT queue saturated: drop, counted as an error of
                        // the turn by the pipeline.
                        call.dropped_inbound.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        // Pipeline already tearing down.
                    }
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    // Connection gone: a live session ends as a caller hangup. The session
    // supervisor finalizes once the pipeline unwinds.
    if let Some(call) = active {
        tracing::info!(
            connection_id = %connection_id,
            session_id = %call.session_id,
            "connection closed with live session"
        );
        state.cancel_map.cancel(&call.session_id);
    } else {
        tracing::info!(connection_id = %connection_id, "client disconnected");
    }

    writer.abort();
}

async fn handle_text(
    state: &AppState,
    outbound: &mpsc::Sender<Message>,
    active: &mut Option<ActiveCall>,
    text: &str,
) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            send_control(
                outbound,
                &ServerMessage::from_error(&Error::Validation(format!(
                    "unparseable control message: {e}"
                ))),
            )
            .await;
            return;
        }
    };

    match message {
        ClientMessage::StartSession { tenant_id, config } => {
            if active.is_some() {
                send_control(
                    outbound,
                    &ServerMessage::from_error(&Error::Validation(
                        "a session is already active on this connection".into(),
                    )),
                )
                .await;
                return;
            }

            match start_session(state, tenant_id, config).await {
                Ok((handle, sample_rate)) => {
                    send_control(
                        outbound,
                        &ServerMessage::SessionStarted {
                            session_id: handle.session_id.clone(),
                            audio_format: vx_protocol::AudioFormat { sample_rate },
                        },
                    )
                    .await;

                    *active = Some(spawn_session_supervisor(
                        state.clone(),
                        handle,
                        outbound.clone(),
                    ));
                }
                Err(e) => {
                    tracing::info!(error = %e, code = e.code(), "session start rejected");
                    send_control(outbound, &ServerMessage::from_error(&e)).await;
                }
            }
        }

        ClientMessage::EndSession { session_id } => {
            match active.as_ref() {
                Some(call) if call.session_id == session_id => {
                    let _ = call.control_tx.send(ControlEvent::EndSession).await;
                }
                _ => {
                    send_control(
                        outbound,
                        &ServerMessage::from_error(&Error::NotFound(format!(
                            "session: {session_id}"
                        ))),
                    )
                    .await;
                }
            }
        }
    }
}

/// Admit, create, and spawn a session. Returns the pipeline handle and the
/// advertised output sample rate. On any admission failure no session is
/// created and no slot is consumed.
pub async fn start_session(
    state: &AppState,
    tenant_id: String,
    mut spec: SessionSpec,
) -> Result<(PipelineHandle, u32)> {
    spec.tenant_id = tenant_id;
    if spec.call_id.is_empty() {
        spec.call_id = uuid::Uuid::new_v4().to_string();
    }
    spec.validate()?;

    // Resolve adapters up front; unknown slugs fail before reservation.
    let sample_rate = resolve_providers(&state.providers, &spec)?;

    let reservation = state
        .admission
        .reserve(ReserveRequest {
            tenant_id: spec.tenant_id.clone(),
            call_id: spec.call_id.clone(),
            agent_id: spec.agent_id.clone(),
            direction: spec.direction,
            providers: ProviderTriple {
                stt: spec.stt.provider.clone(),
                llm: spec.llm.provider.clone(),
                tts: spec.tts.provider.clone(),
            },
        })
        .await?;

    let session = match state.sessions.create(spec).await {
        Ok(session) => session,
        Err(e) => {
            // Creation failed after the slot was claimed: give it back.
            let outcome = vx_admission::CallOutcome {
                ended_at: chrono::Utc::now(),
                end_reason: vx_domain::call::EndReason::Error,
                error: Some(e.to_string()),
                used: Default::default(),
            };
            if let Err(release_err) = state
                .admission
                .release(&reservation.reservation_id, outcome)
                .await
            {
                tracing::warn!(error = %release_err, "orphan reservation release failed");
            }
            return Err(e);
        }
    };

    let cancel = state.cancel_map.register(&session.session_id);
    let handle = Orchestrator::spawn(PipelineContext {
        session,
        providers: state.providers.clone(),
        sessions: state.sessions.clone(),
        tools: state.tools.clone(),
        cancel,
        billing: state.config.billing.clone(),
    });

    Ok((handle, sample_rate))
}

fn resolve_providers(providers: &ProviderRegistry, spec: &SessionSpec) -> Result<u32> {
    providers.stt(&spec.stt.provider)?;
    providers.llm(&spec.llm.provider)?;
    let tts = providers.tts(&spec.tts.provider)?;
    Ok(tts.sample_rate())
}

/// Pump pipeline events to the writer and finalize the call when the
/// pipeline finishes, including on panic.
fn spawn_session_supervisor(
    state: AppState,
    handle: PipelineHandle,
    outbound: mpsc::Sender<Message>,
) -> ActiveCall {
    let PipelineHandle {
        session_id,
        audio_tx,
        control_tx,
        mut events,
        dropped_inbound,
        join,
    } = handle;

    let supervisor_session_id = session_id.clone();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let message = match event {
                PipelineEvent::Control(control) => match serde_json::to_string(&control) {
                    Ok(json) => Message::Text(json),
                    Err(e) => {
                        tracing::warn!(error = %e, "unserializable control message");
                        continue;
                    }
                },
                PipelineEvent::Audio(pcm) => Message::Binary(pcm),
            };
            if outbound.send(message).await.is_err() {
                // Client gone; keep draining so the pipeline never blocks
                // on a dead connection.
                while events.recv().await.is_some() {}
                break;
            }
        }

        match join.await {
            Ok(result) => teardown::finalize(&state, result).await,
            Err(e) => {
                tracing::error!(
                    session_id = %supervisor_session_id,
                    error = %e,
                    "session task panicked"
                );
                teardown::finalize_panicked(&state, &supervisor_session_id).await;
            }
        }
    });

    ActiveCall {
        session_id,
        audio_tx,
        control_tx,
        dropped_inbound,
    }
}

async fn send_control(outbound: &mpsc::Sender<Message>, message: &ServerMessage) {
    match serde_json::to_string(message) {
        Ok(json) => {
            let _ = outbound.send(Message::Text(json)).await;
        }
        Err(e) => tracing::warn!(error = %e, "unserializable control message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::build_app_state;
    use std::sync::Arc;
    use vx_domain::config::{Config, PlanLimitsConfig};
    use vx_providers::fake::{FakeLlmProvider, FakeSttProvider, FakeTtsProvider};

    fn test_state(max_concurrent: u32) -> AppState {
        let mut config = Config::default();
        config.admission.default_plan = PlanLimitsConfig {
            max_concurrent_calls: max_concurrent,
            ..Default::default()
        };
        let mut state = build_app_state(Arc::new(config));

        let mut registry = vx_providers::ProviderRegistry::new();
        registry.register_stt("fake", Arc::new(FakeSttProvider::scripted(vec![])));
        registry.register_llm("fake", Arc::new(FakeLlmProvider::scripted(vec![])));
        registry.register_tts("fake", Arc::new(FakeTtsProvider::new()));
        state.providers = Arc::new(registry);
        state
    }

    fn spec() -> SessionSpec {
        serde_json::from_value(serde_json::json!({
            "systemPrompt": "agent",
            "stt": { "provider": "fake" },
            "llm": { "provider": "fake", "model": "test" },
            "tts": { "provider": "fake", "voiceId": "v1" },
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn third_session_is_denied_and_consumes_nothing() {
        let state = test_state(2);

        let (_h1, rate) = start_session(&state, "acme".into(), spec()).await.unwrap();
        assert_eq!(rate, 16_000);
        let (_h2, _) = start_session(&state, "acme".into(), spec()).await.unwrap();

        let err = start_session(&state, "acme".into(), spec())
            .await
            .unwrap_err();
        match err {
            Error::ConcurrencyLimit { current, max } => assert_eq!((current, max), (2, 2)),
            other => panic!("unexpected error {other:?}"),
        }

        let stats = state.admission.stats("acme").await.unwrap();
        assert_eq!(stats.active, 2);
    }

    #[tokio::test]
    async fn unknown_provider_fails_before_any_reservation() {
        let state = test_state(2);
        let mut bad = spec();
        bad.tts.provider = "cartesia".into();

        let err = start_session(&state, "acme".into(), bad).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(state.admission.stats("acme").await.unwrap().active, 0);
    }

    #[tokio::test]
    async fn invalid_spec_is_rejected_at_start() {
        let state = test_state(2);
        let mut bad = spec();
        bad.max_call_duration_seconds = 0;

        let err = start_session(&state, "acme".into(), bad).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(state.admission.stats("acme").await.unwrap().active, 0);
    }

    #[tokio::test]
    async fn disallowed_provider_never_creates_a_session() {
        let mut config = Config::default();
        config.admission.default_plan = PlanLimitsConfig {
            tts_allowlist: vec!["sarvam".into()],
            ..Default::default()
        };
        let mut state = build_app_state(Arc::new(config));
        let mut registry = vx_providers::ProviderRegistry::new();
        registry.register_stt("fake", Arc::new(FakeSttProvider::scripted(vec![])));
        registry.register_llm("fake", Arc::new(FakeLlmProvider::scripted(vec![])));
        registry.register_tts("fake", Arc::new(FakeTtsProvider::new()));
        state.providers = Arc::new(registry);

        let err = start_session(&state, "acme".into(), spec()).await.unwrap_err();
        assert!(matches!(err, Error::ProviderNotAllowed { .. }));
        assert!(state.sessions.is_empty());
    }
}
