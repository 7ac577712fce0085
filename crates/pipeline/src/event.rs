//! Events flowing from a pipeline to its gateway connection, and the final
//! result a pipeline returns at teardown.

use vx_domain::call::EndReason;
use vx_domain::session::Session;
use vx_protocol::ServerMessage;

/// One outbound item. Control messages are never dropped; audio is the
/// first casualty of backpressure (see the orchestrator's emit path).
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Control(ServerMessage),
    /// Raw PCM at the TTS provider's advertised rate, in strict playback
    /// order.
    Audio(Vec<u8>),
}

/// Control inputs from the gateway.
#[derive(Debug, Clone, Copy)]
pub enum ControlEvent {
    /// Graceful termination requested by the client.
    EndSession,
}

/// What the pipeline hands back when it finishes, for finalization.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// Final session snapshot (terminal status, full history and metrics).
    pub session: Session,
    pub end_reason: EndReason,
    pub error: Option<String>,
    /// Billing quantities measured across the whole call.
    pub llm_tokens: u64,
    pub stt_audio_seconds: f64,
    pub tts_audio_seconds: f64,
}
