//! The per-session orchestrator: one owning supervisor task that selects
//! over inbound PCM, control events, STT events, LLM tokens, TTS bytes, and
//! timers. Suspension points are exactly I/O on these streams plus timers;
//! VAD, segmentation, and state transitions run to completion.
//!
//! Backpressure: the inbound audio queue is bounded (the gateway drops
//! frames when it saturates, counted as an error of the turn); the LLM and
//! TTS streams are pull-based, so reads pause whenever the pipeline is not
//! ready for more; the outbound event queue is bounded and audio frames are
//! the first to be dropped when it fills, with a single `audio_dropped`
//! error per turn. Control messages are never dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use vx_audio::{barge_in_threshold, decode_s16le, validate_client_frame, EnergyVad, VadConfig, VadEvent};
use vx_audio::pcm::rms_energy;
use vx_domain::call::{EndReason, ProviderTriple};
use vx_domain::config::BillingConfig;
use vx_domain::error::Error;
use vx_domain::session::{
    matches_end_call_phrase, ChatEntry, ChatRole, Session, SessionStatus, TurnMetrics,
};
use vx_domain::stream::{BoxStream, LlmEvent, SttEvent};
use vx_domain::tool::ToolCall;
use vx_protocol::{ServerMessage, BYTES_PER_CHUNK};
use vx_providers::markers;
use vx_providers::{
    ChatRequest, ProviderRegistry, SttStreamHandle, SttStreamRequest, TtsRequest,
};
use vx_sessions::SessionManager;

use crate::cancel::CancelToken;
use crate::event::{ControlEvent, PipelineEvent, PipelineResult};
use crate::history::{context_window, interrupted_entry};
use crate::segment::SentenceSegmenter;
use crate::tools::ToolRegistry;

// ── Queue bounds ───────────────────────────────────────────────────

/// Inbound audio frames buffered between the gateway and the pipeline.
pub const AUDIO_QUEUE_SLOTS: usize = 32;
/// STT events buffered between an adapter task and the pipeline.
pub const TOKEN_QUEUE_SLOTS: usize = 256;
/// Outbound events (control + PCM) buffered toward the gateway writer.
pub const PCM_OUT_QUEUE_SLOTS: usize = 64;

// ── Timeouts ───────────────────────────────────────────────────────

const STT_FINAL_TIMEOUT: Duration = Duration::from_secs(2);
const LLM_FIRST_TOKEN_TIMEOUT: Duration = Duration::from_secs(8);
const TTS_FIRST_BYTE_TIMEOUT: Duration = Duration::from_secs(4);

/// Tool-call loops per turn before generation is force-stopped.
const MAX_TOOL_LOOPS: usize = 4;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handle + context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the orchestrator needs at spawn.
pub struct PipelineContext {
    pub session: Session,
    pub providers: Arc<ProviderRegistry>,
    pub sessions: Arc<SessionManager>,
    pub tools: Arc<ToolRegistry>,
    pub cancel: CancelToken,
    /// Rate tables for the rolling cost estimate in session metrics.
    pub billing: BillingConfig,
}

/// The gateway's side of a running pipeline.
#[derive(Debug)]
pub struct PipelineHandle {
    pub session_id: String,
    /// Inbound PCM frames. `try_send`; count a drop when full.
    pub audio_tx: mpsc::Sender<Vec<u8>>,
    pub control_tx: mpsc::Sender<ControlEvent>,
    /// Outbound control + audio, in emission order.
    pub events: mpsc::Receiver<PipelineEvent>,
    /// Inbound frames the gateway had to drop (folded into turn metrics).
    pub dropped_inbound: Arc<AtomicU32>,
    pub join: JoinHandle<PipelineResult>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Internal turn bookkeeping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct TurnTracker {
    turn_id: u32,
    started: Instant,
    stt_latency_ms: Option<u64>,
    llm_first_token_ms: Option<u64>,
    tts_first_byte_ms: Option<u64>,
    tokens: u32,
    note: Option<String>,
}

impl TurnTracker {
    fn new(turn_id: u32, started: Instant) -> Self {
        Self {
            turn_id,
            started,
            stt_latency_ms: None,
            llm_first_token_ms: None,
            tts_first_byte_ms: None,
            tokens: 0,
            note: None,
        }
    }

    fn metrics(&self) -> TurnMetrics {
        TurnMetrics {
            turn_id: self.turn_id,
            stt_latency_ms: self.stt_latency_ms,
            llm_first_token_ms: self.llm_first_token_ms,
            tts_first_byte_ms: self.tts_first_byte_ms,
            turn_duration_ms: self.started.elapsed().as_millis() as u64,
            tokens: self.tokens,
            note: self.note.clone(),
        }
    }
}

/// How a listen phase ended.
enum ListenOutcome {
    /// A final transcript was produced; the tracker carries STT latency.
    Final { text: String, turn: TurnTracker },
    End(EndReason, Option<String>),
}

/// How a respond phase ended.
enum RespondOutcome {
    Completed,
    /// Caller spoke during Speaking; the triggering frame re-enters the
    /// listen phase so no audio is lost.
    BargedIn { frame: Vec<u8> },
    /// The turn failed but the session continues.
    TurnError,
    End(EndReason, Option<String>),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Orchestrator {
    session: Session,
    providers: Arc<ProviderRegistry>,
    sessions: Arc<SessionManager>,
    tools: Arc<ToolRegistry>,
    cancel: CancelToken,

    audio_rx: mpsc::Receiver<Vec<u8>>,
    control_rx: mpsc::Receiver<ControlEvent>,
    events_tx: mpsc::Sender<PipelineEvent>,
    dropped_inbound: Arc<AtomicU32>,

    vad: EnergyVad,
    barge_threshold: Option<f32>,
    deadline: Instant,
    turn_seq: u32,
    audio_dropped_this_turn: bool,
    billing: BillingConfig,

    // Billing quantities across the whole call.
    llm_tokens: u64,
    stt_audio_seconds: f64,
    tts_audio_seconds: f64,
}

impl Orchestrator {
    /// Spawn the supervisor task for a session and hand back its channels.
    pub fn spawn(ctx: PipelineContext) -> PipelineHandle {
        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_QUEUE_SLOTS);
        let (control_tx, control_rx) = mpsc::channel(8);
        let (events_tx, events_rx) = mpsc::channel(PCM_OUT_QUEUE_SLOTS);
        let dropped_inbound = Arc::new(AtomicU32::new(0));

        let session_id = ctx.session.session_id.clone();
        let spec = &ctx.session.spec;

        let vad = EnergyVad::new(VadConfig::new(
            vx_protocol::CLIENT_SAMPLE_RATE,
            spec.effective_silence_timeout_ms(),
        ));
        let barge_threshold = barge_in_threshold(spec.interruption_sensitivity);
        let deadline =
            Instant::now() + Duration::from_secs(spec.max_call_duration_seconds);

        let orchestrator = Orchestrator {
            session: ctx.session,
            providers: ctx.providers,
            sessions: ctx.sessions,
            tools: ctx.tools,
            cancel: ctx.cancel,
            audio_rx,
            control_rx,
            events_tx,
            dropped_inbound: dropped_inbound.clone(),
            vad,
            barge_threshold,
            deadline,
            turn_seq: 0,
            audio_dropped_this_turn: false,
            billing: ctx.billing,
            llm_tokens: 0,
            stt_audio_seconds: 0.0,
            tts_audio_seconds: 0.0,
        };

        let span = tracing::info_span!("pipeline", session_id = %session_id);
        let join = tokio::spawn(tracing::Instrument::instrument(
            orchestrator.run(),
            span,
        ));

        PipelineHandle {
            session_id,
            audio_tx,
            control_tx,
            events: events_rx,
            dropped_inbound,
            join,
        }
    }

    // ── Main loop ────────────────────────────────────────────────────

    async fn run(mut self) -> PipelineResult {
        if let Err(e) = self.session.transition(SessionStatus::Active) {
            return self.finish(EndReason::Error, Some(e.to_string())).await;
        }
        if !self.session.spec.system_prompt.is_empty() {
            let prompt = self.session.spec.system_prompt.clone();
            self.session
                .push_history(ChatEntry::new(ChatRole::System, prompt));
        }
        self.persist().await;

        let mut carried_frame: Option<Vec<u8>> = None;

        // Greet first when the agent is configured to open the call.
        if let Some(first_message) = self.session.spec.first_message.clone() {
            let turn = TurnTracker::new(0, Instant::now());
            match self.respond(turn, Some(first_message), false).await {
                RespondOutcome::Completed | RespondOutcome::TurnError => {}
                RespondOutcome::BargedIn { frame } => carried_frame = Some(frame),
                RespondOutcome::End(reason, error) => {
                    return self.finish(reason, error).await;
                }
            }
        }

        loop {
            let outcome = self.listen(carried_frame.take()).await;
            let (text, turn) = match outcome {
                ListenOutcome::Final { text, turn } => (text, turn),
                ListenOutcome::End(reason, error) => {
                    return self.finish(reason, error).await;
                }
            };

            let ending_after_turn =
                matches_end_call_phrase(&text, &self.session.spec.end_call_phrases);

            self.session
                .push_history(ChatEntry::new(ChatRole::User, text));
            self.persist().await;

            match self.respond(turn, None, true).await {
                RespondOutcome::Completed | RespondOutcome::TurnError => {
                    if ending_after_turn {
                        return self.finish(EndReason::Normal, None).await;
                    }
                }
                RespondOutcome::BargedIn { frame } => {
                    carried_frame = Some(frame);
                }
                RespondOutcome::End(reason, error) => {
                    return self.finish(reason, error).await;
                }
            }
        }
    }

    // ── Listening / Transcribing ─────────────────────────────────────

    /// Wait for caller speech, stream it to STT, and return the final
    /// transcript. `carried_frame` is the barge-in frame from a preempted
    /// turn, processed as if it had just arrived.
    async fn listen(&mut self, carried_frame: Option<Vec<u8>>) -> ListenOutcome {
        self.vad.reset();
        self.audio_dropped_this_turn = false;

        let mut stt: Option<SttStreamHandle> = None;
        let mut turn: Option<TurnTracker> = None;
        let mut flush_deadline: Option<Instant> = None;
        let mut last_audio = Instant::now();

        if let Some(frame) = carried_frame {
            if let Err(outcome) = self
                .listen_frame(frame, &mut stt, &mut turn, &mut flush_deadline)
                .await
            {
                return outcome;
            }
        }

        loop {
            let silence_wait = match (&stt, flush_deadline) {
                // Waiting for the provider's final after end-of-utterance.
                (_, Some(deadline)) => deadline,
                // In Transcribing with no in-band silence yet: fall back to
                // wall time in case the client stops sending frames.
                (Some(_), None) => {
                    last_audio
                        + Duration::from_millis(
                            self.session.spec.effective_silence_timeout_ms(),
                        )
                }
                // Listening: no timer.
                (None, None) => self.deadline,
            };

            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    return ListenOutcome::End(EndReason::CallerHangup, None);
                }

                control = self.control_rx.recv() => {
                    match control {
                        Some(ControlEvent::EndSession) => {
                            return ListenOutcome::End(EndReason::Normal, None);
                        }
                        None => {
                            return ListenOutcome::End(EndReason::CallerHangup, None);
                        }
                    }
                }

                // The audio branch precedes the timers: a chunk racing the
                // silence timeout is processed first, and speech in it
                // cancels the timeout.
                frame = self.audio_rx.recv() => {
                    let Some(frame) = frame else {
                        return ListenOutcome::End(EndReason::CallerHangup, None);
                    };
                    last_audio = Instant::now();
                    if let Err(outcome) = self
                        .listen_frame(frame, &mut stt, &mut turn, &mut flush_deadline)
                        .await
                    {
                        return outcome;
                    }
                }

                event = async { stt.as_mut().expect("guarded").events.recv().await },
                    if stt.is_some() =>
                {
                    match self.stt_event(event, &mut turn).await {
                        Ok(Some(final_text)) => {
                            if final_text.trim().is_empty() {
                                // Nothing intelligible: back to Listening.
                                stt = None;
                                turn = None;
                                flush_deadline = None;
                                self.vad.reset();
                                continue;
                            }
                            return ListenOutcome::Final {
                                text: final_text,
                                turn: turn.take().expect("turn started with stt"),
                            };
                        }
                        Ok(None) => {}
                        Err(outcome) => return outcome,
                    }
                }

                _ = tokio::time::sleep_until(self.deadline) => {
                    return ListenOutcome::End(EndReason::MaxDuration, None);
                }

                _ = tokio::time::sleep_until(silence_wait), if stt.is_some() => {
                    if flush_deadline.is_some() {
                        // Provider never produced a final. Turn-level error;
                        // the session keeps listening.
                        self.emit_error(&Error::Timeout("stt final".into())).await;
                        self.session.metrics.error_count += 1;
                        stt = None;
                        turn = None;
                        flush_deadline = None;
                        self.vad.reset();
                    } else {
                        // Wall-clock silence fallback: close the utterance.
                        if let Some(handle) = &stt {
                            let _ = handle.end_of_utterance().await;
                        }
                        flush_deadline = Some(Instant::now() + STT_FINAL_TIMEOUT);
                    }
                }
            }
        }
    }

    /// Feed one inbound frame through validation, VAD, and the STT stream.
    async fn listen_frame(
        &mut self,
        frame: Vec<u8>,
        stt: &mut Option<SttStreamHandle>,
        turn: &mut Option<TurnTracker>,
        flush_deadline: &mut Option<Instant>,
    ) -> Result<(), ListenOutcome> {
        if let Err(e) = validate_client_frame(&frame, BYTES_PER_CHUNK) {
            self.emit_error(&e).await;
            return Ok(());
        }
        let samples = match decode_s16le(&frame) {
            Ok(samples) => samples,
            Err(e) => {
                self.emit_error(&e).await;
                return Ok(());
            }
        };

        let vad_event = self.vad.process(&samples);

        if matches!(vad_event, Some(VadEvent::SpeechStart)) && stt.is_none() {
            let started = Instant::now();
            match self.open_stt().await {
                Ok(handle) => {
                    self.turn_seq += 1;
                    *stt = Some(handle);
                    *turn = Some(TurnTracker::new(self.turn_seq, started));
                    tracing::debug!(turn = self.turn_seq, "speech start, transcribing");
                }
                Err(e) => {
                    if e.is_fatal() {
                        return Err(ListenOutcome::End(
                            EndReason::Error,
                            Some(e.to_string()),
                        ));
                    }
                    self.emit_error(&e).await;
                    self.session.metrics.error_count += 1;
                    self.vad.reset();
                    return Ok(());
                }
            }
        }

        if let Some(handle) = stt.as_ref() {
            if flush_deadline.is_none() {
                self.stt_audio_seconds +=
                    samples.len() as f64 / vx_protocol::CLIENT_SAMPLE_RATE as f64;
                if handle.push_audio(frame).await.is_err() {
                    self.emit_error(&Error::ProviderTransient {
                        provider: self.session.spec.stt.provider.clone(),
                        message: "stream closed".into(),
                    })
                    .await;
                }
            }

            if matches!(vad_event, Some(VadEvent::SpeechEnd)) && flush_deadline.is_none() {
                let _ = handle.end_of_utterance().await;
                *flush_deadline = Some(Instant::now() + STT_FINAL_TIMEOUT);
            }
        }

        Ok(())
    }

    /// Handle one STT event; returns the final transcript when it arrives.
    async fn stt_event(
        &mut self,
        event: Option<vx_domain::Result<SttEvent>>,
        turn: &mut Option<TurnTracker>,
    ) -> Result<Option<String>, ListenOutcome> {
        match event {
            Some(Ok(event)) => {
                if let Some(tracker) = turn.as_mut() {
                    tracker
                        .stt_latency_ms
                        .get_or_insert_with(|| tracker.started.elapsed().as_millis() as u64);
                }
                if event.is_final {
                    self.emit_control(ServerMessage::SttFinal {
                        text: event.text.clone(),
                    })
                    .await;
                    Ok(Some(event.text))
                } else {
                    self.emit_control(ServerMessage::SttPartial { text: event.text })
                        .await;
                    Ok(None)
                }
            }
            Some(Err(e)) if e.is_fatal() => {
                Err(ListenOutcome::End(EndReason::Error, Some(e.to_string())))
            }
            Some(Err(e)) => {
                self.emit_error(&e).await;
                self.session.metrics.error_count += 1;
                // Treat as an aborted utterance; the select loop resets.
                Ok(Some(String::new()))
            }
            None => Ok(Some(String::new())),
        }
    }

    async fn open_stt(&self) -> vx_domain::Result<SttStreamHandle> {
        let provider = self.providers.stt(&self.session.spec.stt.provider)?;
        provider
            .open_stream(SttStreamRequest {
                language: self.session.spec.language.clone(),
                sample_rate: vx_protocol::CLIENT_SAMPLE_RATE,
                options: self.session.spec.stt.options.clone(),
            })
            .await
    }

    // ── Generating / Speaking ────────────────────────────────────────

    /// Generate and speak one assistant turn.
    ///
    /// With `speak_text` set, generation is skipped and the given text is
    /// synthesized directly (the configured first message). Otherwise the
    /// bounded history window is submitted to the LLM.
    async fn respond(
        &mut self,
        mut turn: TurnTracker,
        speak_text: Option<String>,
        emit_turn_complete: bool,
    ) -> RespondOutcome {
        let tts = match self.providers.tts(&self.session.spec.tts.provider) {
            Ok(tts) => tts,
            Err(e) => return RespondOutcome::End(EndReason::Error, Some(e.to_string())),
        };

        let mut segmenter = SentenceSegmenter::new();
        let mut pending: VecDeque<String> = VecDeque::new();
        let mut spoken_sentences: Vec<String> = Vec::new();
        let mut assistant_text = String::new();
        let mut pending_tool_calls: Vec<ToolCall> = Vec::new();
        let mut tool_loops = 0usize;

        let mut llm_stream: Option<BoxStream<'static, vx_domain::Result<LlmEvent>>> = None;
        let mut llm_submitted = Instant::now();
        let mut llm_done = false;

        if let Some(text) = speak_text {
            assistant_text = text.clone();
            pending.extend(segmenter.push(&text));
            if let Some(rest) = segmenter.flush() {
                pending.push_back(rest);
            }
            llm_done = true;
        } else {
            match self.open_llm().await {
                Ok(stream) => {
                    llm_stream = Some(stream);
                    llm_submitted = Instant::now();
                }
                Err(e) => return self.turn_failure(e).await,
            }
        }

        let mut tts_stream: Option<BoxStream<'static, vx_domain::Result<Vec<u8>>>> = None;
        let mut tts_started = Instant::now();
        let mut tts_first_byte = false;
        let mut current_sentence: Option<String> = None;
        // The turn is Speaking once its first audio byte has gone out;
        // barge-in only arms from that point.
        let mut speaking = false;

        loop {
            // Start the next utterance unit as soon as the synth is idle.
            if tts_stream.is_none() {
                if let Some(sentence) = pending.pop_front() {
                    let clean = markers::strip_unsupported(&sentence, tts.supported_markers());
                    let request = TtsRequest {
                        text: clean,
                        voice_id: self.session.spec.tts.voice_id.clone(),
                        options: self.session.spec.tts.options.clone(),
                    };
                    match tts.synthesize(&request).await {
                        Ok(stream) => {
                            tts_stream = Some(stream);
                            tts_started = Instant::now();
                            tts_first_byte = false;
                            current_sentence = Some(sentence);
                        }
                        Err(e) if e.is_fatal() => {
                            return RespondOutcome::End(EndReason::Error, Some(e.to_string()));
                        }
                        Err(e) => {
                            return self
                                .tts_truncated(turn, spoken_sentences, e, emit_turn_complete)
                                .await;
                        }
                    }
                } else if llm_done && llm_stream.is_none() {
                    break;
                }
            }

            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    return RespondOutcome::End(EndReason::CallerHangup, None);
                }

                control = self.control_rx.recv() => {
                    match control {
                        Some(ControlEvent::EndSession) => {
                            return RespondOutcome::End(EndReason::Normal, None);
                        }
                        None => {
                            return RespondOutcome::End(EndReason::CallerHangup, None);
                        }
                    }
                }

                frame = self.audio_rx.recv() => {
                    let Some(frame) = frame else {
                        return RespondOutcome::End(EndReason::CallerHangup, None);
                    };
                    if speaking {
                        if let Some(threshold) = self.barge_threshold {
                            if let Ok(samples) = decode_s16le(&frame) {
                                if rms_energy(&samples) >= threshold {
                                    self.barge_in(&assistant_text, &spoken_sentences).await;
                                    return RespondOutcome::BargedIn { frame };
                                }
                            }
                        }
                    }
                    // Not yet Speaking, barge-in disabled, or frame below
                    // threshold: the frame is not part of any turn.
                }

                event = async { llm_stream.as_mut().expect("guarded").next().await },
                    if llm_stream.is_some() =>
                {
                    match event {
                        Some(Ok(LlmEvent::Token { text })) => {
                            if turn.llm_first_token_ms.is_none() {
                                turn.llm_first_token_ms =
                                    Some(llm_submitted.elapsed().as_millis() as u64);
                            }
                            turn.tokens += 1;
                            self.emit_control(ServerMessage::LlmToken {
                                token: text.clone(),
                            })
                            .await;
                            assistant_text.push_str(&text);
                            pending.extend(segmenter.push(&text));
                        }
                        Some(Ok(LlmEvent::ToolCall { call_id, tool_name, arguments })) => {
                            pending_tool_calls.push(ToolCall {
                                call_id,
                                tool_name,
                                arguments,
                            });
                        }
                        Some(Ok(LlmEvent::Done { usage })) => {
                            if let Some(usage) = usage {
                                self.llm_tokens += usage.total() as u64;
                            }
                            llm_stream = None;

                            if !pending_tool_calls.is_empty() && tool_loops < MAX_TOOL_LOOPS {
                                tool_loops += 1;
                                let calls = std::mem::take(&mut pending_tool_calls);
                                self.dispatch_tools(&mut assistant_text, calls).await;
                                match self.open_llm().await {
                                    Ok(stream) => {
                                        llm_stream = Some(stream);
                                        llm_submitted = Instant::now();
                                    }
                                    Err(e) => return self.turn_failure(e).await,
                                }
                            } else {
                                if let Some(rest) = segmenter.flush() {
                                    pending.push_back(rest);
                                }
                                llm_done = true;
                            }
                        }
                        Some(Err(e)) if e.is_fatal() => {
                            return RespondOutcome::End(EndReason::Error, Some(e.to_string()));
                        }
                        Some(Err(e)) => return self.turn_failure(e).await,
                        None => {
                            llm_stream = None;
                            if let Some(rest) = segmenter.flush() {
                                pending.push_back(rest);
                            }
                            llm_done = true;
                        }
                    }
                }

                chunk = async { tts_stream.as_mut().expect("guarded").next().await },
                    if tts_stream.is_some() =>
                {
                    match chunk {
                        Some(Ok(bytes)) => {
                            if !tts_first_byte {
                                tts_first_byte = true;
                                turn.tts_first_byte_ms.get_or_insert_with(|| {
                                    turn.started.elapsed().as_millis() as u64
                                });
                            }
                            speaking = true;
                            self.tts_audio_seconds += bytes.len() as f64
                                / 2.0
                                / tts.sample_rate() as f64;
                            self.emit_audio(bytes).await;
                        }
                        Some(Err(e)) if e.is_fatal() => {
                            return RespondOutcome::End(EndReason::Error, Some(e.to_string()));
                        }
                        Some(Err(e)) => {
                            return self
                                .tts_truncated(turn, spoken_sentences, e, emit_turn_complete)
                                .await;
                        }
                        None => {
                            if let Some(sentence) = current_sentence.take() {
                                spoken_sentences.push(sentence);
                            }
                            tts_stream = None;
                        }
                    }
                }

                _ = tokio::time::sleep_until(self.deadline) => {
                    return RespondOutcome::End(EndReason::MaxDuration, None);
                }

                _ = tokio::time::sleep_until(llm_submitted + LLM_FIRST_TOKEN_TIMEOUT),
                    if llm_stream.is_some() && turn.llm_first_token_ms.is_none() =>
                {
                    return self.turn_failure(Error::Timeout("llm first token".into())).await;
                }

                _ = tokio::time::sleep_until(tts_started + TTS_FIRST_BYTE_TIMEOUT),
                    if tts_stream.is_some() && !tts_first_byte =>
                {
                    return self
                        .tts_truncated(
                            turn,
                            spoken_sentences,
                            Error::Timeout("tts first byte".into()),
                            emit_turn_complete,
                        )
                        .await;
                }
            }
        }

        // ── Turn completion ──────────────────────────────────────────
        if assistant_text.is_empty() && turn.tokens == 0 {
            turn.note = Some("no response generated".into());
        } else {
            self.session
                .push_history(ChatEntry::new(ChatRole::Assistant, assistant_text));
        }
        self.complete_turn(turn, emit_turn_complete).await;
        RespondOutcome::Completed
    }

    async fn open_llm(
        &self,
    ) -> vx_domain::Result<BoxStream<'static, vx_domain::Result<LlmEvent>>> {
        let provider = self.providers.llm(&self.session.spec.llm.provider)?;
        let request = ChatRequest {
            messages: context_window(&self.session.history),
            model: self.session.spec.llm.model.clone(),
            temperature: self.session.spec.llm.temperature,
            tools: self.tools.definitions(),
            max_tokens: None,
        };
        provider.stream(&request).await
    }

    /// Dispatch the turn's tool calls and append the exchange to history.
    async fn dispatch_tools(&mut self, assistant_text: &mut String, calls: Vec<ToolCall>) {
        let mut assistant = ChatEntry::new(ChatRole::Assistant, std::mem::take(assistant_text));
        assistant.tool_calls = Some(serde_json::json!({
            "tool_calls": calls
                .iter()
                .map(|c| serde_json::json!({
                    "id": c.call_id,
                    "type": "function",
                    "function": {
                        "name": c.tool_name,
                        "arguments": c.arguments.to_string(),
                    },
                }))
                .collect::<Vec<_>>(),
        }));
        self.session.push_history(assistant);

        for call in calls {
            tracing::debug!(tool = %call.tool_name, "dispatching tool call");
            self.session.metrics.tool_call_count += 1;
            let result = self.tools.dispatch(&call.tool_name, call.arguments).await;
            let mut entry = ChatEntry::new(ChatRole::Tool, result);
            entry.tool_calls = Some(serde_json::json!({ "call_id": call.call_id }));
            self.session.push_history(entry);
        }
        self.persist().await;
    }

    /// Barge-in: cancel generation and synthesis, discard queued PCM, tell
    /// the client, and record the partial assistant text. The preempted
    /// turn emits no `turn_complete`.
    async fn barge_in(&mut self, assistant_text: &str, spoken: &[String]) {
        tracing::debug!(
            spoken_sentences = spoken.len(),
            "barge-in: preempting assistant turn"
        );
        self.emit_control(ServerMessage::BargeIn {}).await;
        self.session.push_history(interrupted_entry(assistant_text));
        self.persist().await;
    }

    /// TTS failed mid-utterance: keep the sentences that fully played,
    /// surface the error, and complete the turn.
    async fn tts_truncated(
        &mut self,
        mut turn: TurnTracker,
        spoken_sentences: Vec<String>,
        error: Error,
        emit_turn_complete: bool,
    ) -> RespondOutcome {
        self.emit_error(&error).await;
        self.session.metrics.error_count += 1;
        turn.note = Some("assistant speech truncated".into());

        let spoken = spoken_sentences.join(" ");
        if !spoken.is_empty() {
            self.session
                .push_history(ChatEntry::new(ChatRole::Assistant, spoken));
        }
        self.complete_turn(turn, emit_turn_complete).await;
        RespondOutcome::Completed
    }

    /// A turn-level provider failure: surface it and keep the session alive.
    async fn turn_failure(&mut self, error: Error) -> RespondOutcome {
        tracing::warn!(error = %error, "turn aborted");
        self.emit_error(&error).await;
        self.session.metrics.error_count += 1;
        self.persist().await;
        RespondOutcome::TurnError
    }

    async fn complete_turn(&mut self, turn: TurnTracker, emit: bool) {
        let dropped = self.dropped_inbound.swap(0, Ordering::AcqRel);
        if dropped > 0 {
            tracing::debug!(dropped, "inbound audio frames dropped this turn");
            self.session.metrics.error_count += 1;
        }
        if self.audio_dropped_this_turn {
            self.session.metrics.error_count += 1;
        }

        let metrics = turn.metrics();
        self.session.metrics.record_turn(&metrics);
        self.session.metrics.estimated_cost_minor = self.estimated_cost_minor();
        if emit {
            self.emit_control(ServerMessage::TurnComplete { metrics }).await;
        }
        self.persist().await;
    }

    /// Rolling cost estimate from the quantities measured so far.
    fn estimated_cost_minor(&self) -> i64 {
        let providers = ProviderTriple {
            stt: self.session.spec.stt.provider.clone(),
            llm: self.session.spec.llm.provider.clone(),
            tts: self.session.spec.tts.provider.clone(),
        };
        self.billing
            .cost_breakdown(
                &providers,
                self.session.duration_seconds(),
                self.stt_audio_seconds,
                self.tts_audio_seconds,
                self.llm_tokens,
            )
            .total_minor
    }

    // ── Teardown ─────────────────────────────────────────────────────

    async fn finish(mut self, end_reason: EndReason, error: Option<String>) -> PipelineResult {
        let failed = matches!(end_reason, EndReason::Error) || error.is_some();

        if !self.session.status.is_terminal() {
            if failed {
                let _ = self.session.transition(SessionStatus::Error);
            } else {
                if self.session.status == SessionStatus::Active {
                    let _ = self.session.transition(SessionStatus::Ending);
                }
                let _ = self.session.transition(SessionStatus::Ended);
            }
        }
        self.session.error = error.clone();
        self.session.metrics.total_duration_ms =
            self.session.duration_seconds().saturating_mul(1000);
        self.session.metrics.estimated_cost_minor = self.estimated_cost_minor();

        self.emit_control(ServerMessage::SessionEnded {
            metrics: self.session.metrics.clone(),
        })
        .await;

        self.persist().await;

        tracing::info!(
            session_id = %self.session.session_id,
            end_reason = ?end_reason,
            turns = self.session.metrics.turn_count,
            errors = self.session.metrics.error_count,
            "pipeline finished"
        );

        PipelineResult {
            end_reason,
            error,
            llm_tokens: self.llm_tokens,
            stt_audio_seconds: self.stt_audio_seconds,
            tts_audio_seconds: self.tts_audio_seconds,
            session: self.session,
        }
    }

    // ── Emission ─────────────────────────────────────────────────────

    /// Control messages are never dropped: block until the writer drains.
    async fn emit_control(&self, message: ServerMessage) {
        if self
            .events_tx
            .send(PipelineEvent::Control(message))
            .await
            .is_err()
        {
            tracing::debug!("event receiver gone, control message discarded");
        }
    }

    async fn emit_error(&self, error: &Error) {
        self.emit_control(ServerMessage::from_error(error)).await;
    }

    /// Audio frames are the first casualty of outbound congestion: dropped
    /// with a single `audio_dropped` error per turn.
    async fn emit_audio(&mut self, bytes: Vec<u8>) {
        match self.events_tx.try_send(PipelineEvent::Audio(bytes)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                if !self.audio_dropped_this_turn {
                    self.audio_dropped_this_turn = true;
                    self.emit_error(&Error::AudioDropped).await;
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("event receiver gone, audio discarded");
            }
        }
    }

    async fn persist(&self) {
        if let Err(e) = self.sessions.update(&self.session).await {
            tracing::warn!(
                session_id = %self.session.session_id,
                error = %e,
                "session persist failed"
            );
        }
    }
}
