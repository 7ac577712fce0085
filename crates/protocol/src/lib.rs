//! Wire protocol: control-message envelopes and audio framing constants.
//!
//! A call connection is a persistent bidirectional WebSocket. Text frames
//! carry JSON control messages ([`ClientMessage`] / [`ServerMessage`]);
//! binary frames carry raw little-endian signed 16-bit mono PCM: 16 kHz
//! client → server, provider-native rate server → client (advertised in
//! `session_started`).
//!
//! Per-turn ordering: zero or more `stt_partial`, exactly one `stt_final`,
//! `llm_token`s interleaved with binary PCM, exactly one `turn_complete`.
//! A `barge_in` preempts the turn and suppresses its `turn_complete`.

use serde::{Deserialize, Serialize};

use vx_domain::session::{SessionMetrics, SessionSpec, TurnMetrics};

/// Client → server PCM sample rate.
pub const CLIENT_SAMPLE_RATE: u32 = 16_000;

/// Frames per inbound audio chunk (≈256 ms at 16 kHz).
pub const FRAMES_PER_CHUNK: usize = 4096;

/// Bytes per inbound audio chunk (s16le mono).
pub const BYTES_PER_CHUNK: usize = FRAMES_PER_CHUNK * 2;

/// Size of a RIFF/WAV header, stripped from provider output.
pub const WAV_HEADER_BYTES: usize = 44;

/// Advertised output audio format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    pub sample_rate: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client → server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Create a session on this connection. Binary frames that follow are
    /// audio for the created session.
    #[serde(rename = "start_session")]
    StartSession {
        #[serde(rename = "tenantId")]
        tenant_id: String,
        config: SessionSpec,
    },

    /// Request graceful termination.
    #[serde(rename = "end_session")]
    EndSession {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server → client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "connected")]
    Connected {
        #[serde(rename = "connectionId")]
        connection_id: String,
    },

    #[serde(rename = "session_started")]
    SessionStarted {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "audioFormat")]
        audio_format: AudioFormat,
    },

    #[serde(rename = "stt_partial")]
    SttPartial { text: String },

    #[serde(rename = "stt_final")]
    SttFinal { text: String },

    #[serde(rename = "llm_token")]
    LlmToken { token: String },

    /// Caller speech detected during assistant playback. The client MUST
    /// drop buffered playback PCM immediately.
    #[serde(rename = "barge_in")]
    BargeIn {},

    #[serde(rename = "turn_complete")]
    TurnComplete { metrics: TurnMetrics },

    #[serde(rename = "session_ended")]
    SessionEnded { metrics: SessionMetrics },

    #[serde(rename = "error")]
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },
}

impl ServerMessage {
    /// Build an `error` message from a domain error, carrying its wire code
    /// and structured details where the kind has them.
    pub fn from_error(err: &vx_domain::Error) -> Self {
        let details = match err {
            vx_domain::Error::ConcurrencyLimit { current, max } => {
                Some(serde_json::json!({ "current": current, "max": max }))
            }
            _ => None,
        };
        ServerMessage::Error {
            error: err.to_string(),
            code: Some(err.code().to_string()),
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_session_parses_spec_wire_shape() {
        let raw = serde_json::json!({
            "type": "start_session",
            "tenantId": "acme",
            "config": {
                "language": "en-IN",
                "systemPrompt": "You are a support agent.",
                "stt": { "provider": "deepgram" },
                "llm": { "provider": "openai", "model": "gpt-4o-mini", "temperature": 0.7 },
                "tts": { "provider": "sarvam", "voiceId": "meera" },
                "firstMessage": null,
                "endCallPhrases": ["goodbye", "bye"],
                "interruptionSensitivity": 0.5,
                "silenceTimeoutMs": 5000,
                "maxCallDurationSeconds": 600
            }
        });
        let msg: ClientMessage = serde_json::from_value(raw).unwrap();
        match msg {
            ClientMessage::StartSession { tenant_id, config } => {
                assert_eq!(tenant_id, "acme");
                assert_eq!(config.tts.voice_id, "meera");
                assert_eq!(config.max_call_duration_seconds, 600);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn server_messages_use_wire_names() {
        let msg = ServerMessage::SessionStarted {
            session_id: "s1".into(),
            audio_format: AudioFormat { sample_rate: 22_050 },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "session_started");
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["audioFormat"]["sampleRate"], 22_050);

        let msg = ServerMessage::BargeIn {};
        assert_eq!(serde_json::to_value(&msg).unwrap()["type"], "barge_in");
    }

    #[test]
    fn concurrency_error_carries_details() {
        let err = vx_domain::Error::ConcurrencyLimit { current: 2, max: 2 };
        let msg = ServerMessage::from_error(&err);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["code"], "CONCURRENCY_LIMIT");
        assert_eq!(json["details"]["current"], 2);
        assert_eq!(json["details"]["max"], 2);
    }

    #[test]
    fn error_omits_absent_fields() {
        let msg = ServerMessage::Error {
            error: "boom".into(),
            code: None,
            details: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("code").is_none());
        assert!(json.get("details").is_none());
    }

    #[test]
    fn chunk_constants_are_consistent() {
        assert_eq!(BYTES_PER_CHUNK, FRAMES_PER_CHUNK * 2);
        // ≈256 ms at the client rate.
        let ms = FRAMES_PER_CHUNK as f64 / CLIENT_SAMPLE_RATE as f64 * 1000.0;
        assert!((ms - 256.0).abs() < 1.0);
    }
}
