//! Deterministic in-process providers for tests and local development.
//!
//! The fakes are scripted: each opened STT stream consumes the next scripted
//! utterance, each LLM call consumes the next scripted reply, and TTS
//! produces a deterministic PCM payload per sentence. Integration tests
//! drive the full pipeline through these without any network.

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::stream;
use parking_lot::Mutex;

use vx_domain::error::{Error, Result};
use vx_domain::stream::{BoxStream, LlmEvent, SttEvent, TokenUsage};
use vx_domain::tool::ToolCall;

use crate::traits::{
    ChatRequest, LlmProvider, SttInput, SttProvider, SttStreamHandle, SttStreamRequest,
    TtsProvider, TtsRequest,
};

pub const FAKE_SLUG: &str = "fake";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STT
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One scripted user utterance.
#[derive(Debug, Clone)]
pub struct FakeUtterance {
    /// Partials emitted one per pushed audio chunk, in order.
    pub partials: Vec<String>,
    /// Final transcript emitted on end-of-utterance.
    pub final_text: String,
}

impl FakeUtterance {
    pub fn new(partials: &[&str], final_text: &str) -> Self {
        Self {
            partials: partials.iter().map(|s| s.to_string()).collect(),
            final_text: final_text.to_string(),
        }
    }
}

/// Scripted STT: each opened stream consumes the next utterance.
pub struct FakeSttProvider {
    script: Arc<Mutex<VecDeque<FakeUtterance>>>,
}

impl FakeSttProvider {
    pub fn scripted(utterances: Vec<FakeUtterance>) -> Self {
        Self {
            script: Arc::new(Mutex::new(utterances.into())),
        }
    }
}

#[async_trait::async_trait]
impl SttProvider for FakeSttProvider {
    async fn open_stream(&self, _req: SttStreamRequest) -> Result<SttStreamHandle> {
        let utterance = self.script.lock().pop_front().unwrap_or(FakeUtterance {
            partials: Vec::new(),
            final_text: String::new(),
        });

        let (handle, mut input_rx, event_tx) = SttStreamHandle::channels(32);

        tokio::spawn(async move {
            let mut partials: VecDeque<String> = utterance.partials.into();
            while let Some(input) = input_rx.recv().await {
                match input {
                    SttInput::Audio(_) => {
                        if let Some(text) = partials.pop_front() {
                            let _ = event_tx
                                .send(Ok(SttEvent {
                                    text,
                                    is_final: false,
                                    confidence: Some(0.9),
                                    language: None,
                                }))
                                .await;
                        }
                    }
                    SttInput::EndOfUtterance => {
                        let _ = event_tx
                            .send(Ok(SttEvent {
                                text: utterance.final_text.clone(),
                                is_final: true,
                                confidence: Some(0.98),
                                language: None,
                            }))
                            .await;
                        break;
                    }
                }
            }
        });

        Ok(handle)
    }

    fn slug(&self) -> &str {
        FAKE_SLUG
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One scripted assistant reply.
#[derive(Debug, Clone, Default)]
pub struct FakeLlmReply {
    pub tokens: Vec<String>,
    /// Tool calls emitted after the tokens (before `Done`).
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
}

impl FakeLlmReply {
    pub fn text(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(|s| s.to_string()).collect(),
            tool_calls: Vec::new(),
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: tokens.len() as u32,
            },
        }
    }

    /// A reply that produces no tokens at all.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Scripted LLM: each `stream` call consumes the next reply. When the script
/// is exhausted, further calls produce an empty token stream.
pub struct FakeLlmProvider {
    replies: Arc<Mutex<VecDeque<FakeLlmReply>>>,
}

impl FakeLlmProvider {
    pub fn scripted(replies: Vec<FakeLlmReply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into())),
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for FakeLlmProvider {
    async fn stream(&self, _req: &ChatRequest) -> Result<BoxStream<'static, Result<LlmEvent>>> {
        let reply = self.replies.lock().pop_front().unwrap_or_default();

        let mut events: Vec<Result<LlmEvent>> = Vec::new();
        for token in reply.tokens {
            events.push(Ok(LlmEvent::Token { text: token }));
        }
        for tc in reply.tool_calls {
            events.push(Ok(LlmEvent::ToolCall {
                call_id: tc.call_id,
                tool_name: tc.tool_name,
                arguments: tc.arguments,
            }));
        }
        events.push(Ok(LlmEvent::Done {
            usage: Some(reply.usage),
        }));

        Ok(Box::pin(stream::iter(events)))
    }

    fn slug(&self) -> &str {
        FAKE_SLUG
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Deterministic TTS: each sentence synthesizes to a fixed number of PCM
/// chunks whose bytes are derived from the sentence length.
pub struct FakeTtsProvider {
    sample_rate: u32,
    chunks_per_sentence: usize,
    chunk_bytes: usize,
    /// When set, synthesis of any text containing this marker fails after
    /// the first chunk (exercises mid-utterance truncation).
    fail_contains: Option<String>,
}

impl FakeTtsProvider {
    pub fn new() -> Self {
        Self {
            sample_rate: 16_000,
            chunks_per_sentence: 2,
            chunk_bytes: 640,
            fail_contains: None,
        }
    }

    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_contains: Some(marker.to_string()),
            ..Self::new()
        }
    }
}

impl Default for FakeTtsProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TtsProvider for FakeTtsProvider {
    async fn synthesize(&self, req: &TtsRequest) -> Result<BoxStream<'static, Result<Vec<u8>>>> {
        let fill = (req.text.len() % 251) as u8;
        let chunk = vec![fill; self.chunk_bytes];

        let fail_after_first = self
            .fail_contains
            .as_deref()
            .is_some_and(|marker| req.text.contains(marker));

        let mut events: Vec<Result<Vec<u8>>> = Vec::new();
        if fail_after_first {
            events.push(Ok(chunk));
            events.push(Err(Error::ProviderTransient {
                provider: FAKE_SLUG.into(),
                message: "scripted synthesis failure".into(),
            }));
        } else {
            for _ in 0..self.chunks_per_sentence {
                events.push(Ok(chunk.clone()));
            }
        }

        Ok(Box::pin(stream::iter(events)))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn slug(&self) -> &str {
        FAKE_SLUG
    }
}
