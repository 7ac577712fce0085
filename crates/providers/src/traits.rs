use std::collections::HashMap;

use tokio::sync::mpsc;

use vx_domain::error::{Error, Result};
use vx_domain::session::ChatEntry;
use vx_domain::stream::{BoxStream, LlmEvent, SttEvent};
use vx_domain::tool::ToolDefinition;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STT
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parameters for opening one utterance-spanning STT stream.
#[derive(Debug, Clone)]
pub struct SttStreamRequest {
    pub language: String,
    pub sample_rate: u32,
    /// Opaque provider options from the session spec.
    pub options: HashMap<String, serde_json::Value>,
}

/// Input side of an open STT stream.
#[derive(Debug)]
pub enum SttInput {
    /// Raw s16le PCM at the negotiated sample rate.
    Audio(Vec<u8>),
    /// The caller stopped speaking; the provider should flush its final.
    EndOfUtterance,
}

/// Handle to an open STT stream: push audio in, read transcription events
/// out. Dropping the handle closes the provider connection.
pub struct SttStreamHandle {
    input_tx: mpsc::Sender<SttInput>,
    pub events: mpsc::Receiver<Result<SttEvent>>,
}

impl SttStreamHandle {
    /// Wire up a handle for an adapter task: returns the handle plus the
    /// task-side input receiver and event sender.
    pub fn channels(
        capacity: usize,
    ) -> (
        Self,
        mpsc::Receiver<SttInput>,
        mpsc::Sender<Result<SttEvent>>,
    ) {
        let (input_tx, input_rx) = mpsc::channel(capacity);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        (
            Self {
                input_tx,
                events: event_rx,
            },
            input_rx,
            event_tx,
        )
    }

    pub async fn push_audio(&self, pcm: Vec<u8>) -> Result<()> {
        self.input_tx
            .send(SttInput::Audio(pcm))
            .await
            .map_err(|_| Error::Internal("stt stream closed".into()))
    }

    pub async fn end_of_utterance(&self) -> Result<()> {
        self.input_tx
            .send(SttInput::EndOfUtterance)
            .await
            .map_err(|_| Error::Internal("stt stream closed".into()))
    }
}

/// A streaming speech-to-text backend.
#[async_trait::async_trait]
pub trait SttProvider: Send + Sync {
    /// Open a streaming transcription session.
    async fn open_stream(&self, req: SttStreamRequest) -> Result<SttStreamHandle>;

    /// Registry slug for this adapter.
    fn slug(&self) -> &str;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation so far, system prompt first.
    pub messages: Vec<ChatEntry>,
    pub model: String,
    pub temperature: f32,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: Option<u32>,
}

/// A streaming large-language-model backend.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Submit the conversation and stream back tokens, tool calls, and a
    /// terminating `Done` with usage.
    async fn stream(&self, req: &ChatRequest) -> Result<BoxStream<'static, Result<LlmEvent>>>;

    fn slug(&self) -> &str;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One utterance unit to synthesize.
#[derive(Debug, Clone)]
pub struct TtsRequest {
    pub text: String,
    pub voice_id: String,
    pub options: HashMap<String, serde_json::Value>,
}

/// A streaming text-to-speech backend.
///
/// The returned stream yields raw s16le PCM chunks at [`sample_rate`]
/// (WAV headers, where the provider emits them, are already stripped).
///
/// [`sample_rate`]: TtsProvider::sample_rate
#[async_trait::async_trait]
pub trait TtsProvider: Send + Sync {
    async fn synthesize(&self, req: &TtsRequest) -> Result<BoxStream<'static, Result<Vec<u8>>>>;

    /// Output sample rate, fixed per adapter and advertised at session start.
    fn sample_rate(&self) -> u32;

    fn slug(&self) -> &str;

    /// Formatting marker kinds this backend honors (see [`crate::markers`]).
    /// Markers of other kinds are stripped before synthesis.
    fn supported_markers(&self) -> &'static [&'static str] {
        &[]
    }
}
