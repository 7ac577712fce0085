//! The session model: immutable [`SessionSpec`] supplied at start, the live
//! [`Session`] owned by its orchestrator, conversation history, and rolling
//! metrics.
//!
//! The spec's serde shape mirrors the `start_session` wire message (camelCase,
//! nested provider selections) so the gateway can deserialize the client's
//! `config` object directly.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::call::CallDirection;
use crate::error::{Error, Result};

/// Floor applied to `silenceTimeoutMs`; lower values would end the user turn
/// after every non-speech frame.
pub const MIN_SILENCE_TIMEOUT_MS: u64 = 250;

/// History entries retained (beyond the system prompt) when truncating.
pub const MAX_HISTORY_ENTRIES: usize = 40;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SessionSpec
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Selected STT backend plus opaque provider options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttSelection {
    pub provider: String,
    #[serde(flatten)]
    pub options: HashMap<String, serde_json::Value>,
}

/// Selected LLM backend, model, and sampling temperature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSelection {
    pub provider: String,
    pub model: String,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    #[serde(flatten)]
    pub options: HashMap<String, serde_json::Value>,
}

/// Selected TTS backend and voice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsSelection {
    pub provider: String,
    pub voice_id: String,
    #[serde(flatten)]
    pub options: HashMap<String, serde_json::Value>,
}

fn d_temperature() -> f32 {
    0.7
}
fn d_language() -> String {
    "en-IN".into()
}
fn d_sensitivity() -> f32 {
    0.5
}
fn d_silence_timeout() -> u64 {
    5000
}
fn d_max_duration() -> u64 {
    600
}

/// Immutable per-call configuration, supplied at session start.
///
/// `tenant_id` and `call_id` are filled in by the gateway (the client sends
/// `tenantId` beside, not inside, the config object).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSpec {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub call_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub direction: CallDirection,

    #[serde(default = "d_language")]
    pub language: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub first_message: Option<String>,
    #[serde(default)]
    pub end_call_phrases: Vec<String>,
    #[serde(default = "d_sensitivity")]
    pub interruption_sensitivity: f32,
    #[serde(default = "d_silence_timeout")]
    pub silence_timeout_ms: u64,
    #[serde(default = "d_max_duration")]
    pub max_call_duration_seconds: u64,

    pub stt: SttSelection,
    pub llm: LlmSelection,
    pub tts: TtsSelection,

    /// Optional caller metadata, opaque to the runtime.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SessionSpec {
    /// Validate the spec at session start. Invalid specs are rejected before
    /// any slot is reserved.
    pub fn validate(&self) -> Result<()> {
        if self.max_call_duration_seconds == 0 {
            return Err(Error::Validation(
                "maxCallDurationSeconds must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.interruption_sensitivity) {
            return Err(Error::Validation(format!(
                "interruptionSensitivity must be within [0, 1], got {}",
                self.interruption_sensitivity
            )));
        }
        if self.stt.provider.is_empty() || self.llm.provider.is_empty() || self.tts.provider.is_empty()
        {
            return Err(Error::Validation("provider slugs must be non-empty".into()));
        }
        if self.llm.model.is_empty() {
            return Err(Error::Validation("llm.model must be non-empty".into()));
        }
        Ok(())
    }

    /// Effective silence timeout, clamped to the runtime minimum.
    pub fn effective_silence_timeout_ms(&self) -> u64 {
        self.silence_timeout_ms.max(MIN_SILENCE_TIMEOUT_MS)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle status of a session. Transitions are monotonic:
/// `Initializing → Active → Ending → (Ended | Error)`, with `Error`
/// reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Initializing,
    Active,
    Ending,
    Ended,
    Error,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Ended | SessionStatus::Error)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Initializing, Active) => true,
            (Active, Ending) => true,
            (Ending, Ended) => true,
            // Error is reachable from every non-terminal state.
            (s, Error) => !s.is_terminal(),
            _ => false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation history
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry in the append-only conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEntry {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Tool calls attached to an assistant entry at completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<serde_json::Value>,
}

impl ChatEntry {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            tool_calls: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Metrics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Rolling per-session metrics, updated by the orchestrator after each turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    pub total_duration_ms: u64,
    pub stt_latencies_ms: Vec<u64>,
    pub llm_first_token_ms: Vec<u64>,
    pub tts_first_byte_ms: Vec<u64>,
    pub turn_durations_ms: Vec<u64>,
    pub token_count: u64,
    pub turn_count: u32,
    pub tool_call_count: u32,
    pub error_count: u32,
    /// Estimated cumulative cost in integer minor units.
    pub estimated_cost_minor: i64,
}

impl SessionMetrics {
    /// Fold one completed turn into the rolling totals.
    pub fn record_turn(&mut self, turn: &TurnMetrics) {
        self.turn_count += 1;
        self.token_count += turn.tokens as u64;
        if let Some(ms) = turn.stt_latency_ms {
            self.stt_latencies_ms.push(ms);
        }
        if let Some(ms) = turn.llm_first_token_ms {
            self.llm_first_token_ms.push(ms);
        }
        if let Some(ms) = turn.tts_first_byte_ms {
            self.tts_first_byte_ms.push(ms);
        }
        self.turn_durations_ms.push(turn.turn_duration_ms);
    }
}

/// Metrics for a single completed turn, carried on `turn_complete`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnMetrics {
    pub turn_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stt_latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_first_token_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_first_byte_ms: Option<u64>,
    pub turn_duration_ms: u64,
    pub tokens: u32,
    /// Explanatory note for degenerate turns (e.g. empty LLM output).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The live, stateful object representing one call inside the runtime.
///
/// Mutation of live fields during `Active` is owned exclusively by the
/// session's orchestrator; the session manager owns serialization and TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub spec: SessionSpec,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub history: Vec<ChatEntry>,
    /// Free-form per-session context.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub metrics: SessionMetrics,
    #[serde(default)]
    pub error: Option<String>,
}

impl Session {
    pub fn new(spec: SessionSpec) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            spec,
            status: SessionStatus::Initializing,
            started_at: Utc::now(),
            ended_at: None,
            history: Vec::new(),
            context: HashMap::new(),
            metrics: SessionMetrics::default(),
            error: None,
        }
    }

    /// Apply a status transition, enforcing monotonicity.
    pub fn transition(&mut self, next: SessionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::Internal(format!(
                "illegal session transition {:?} -> {:?} ({})",
                self.status, next, self.session_id
            )));
        }
        self.status = next;
        if next.is_terminal() && self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Append a history entry (history is append-only).
    pub fn push_history(&mut self, entry: ChatEntry) {
        self.history.push(entry);
    }

    /// Session age in seconds, measured from `started_at`.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.started_at).num_seconds()
    }

    /// Call duration in whole seconds (to `ended_at`, or `now` when live).
    pub fn duration_seconds(&self) -> u64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        end.signed_duration_since(self.started_at)
            .num_seconds()
            .max(0) as u64
    }
}

/// Normalize text for end-call phrase matching: lowercase, alphanumerics and
/// single spaces only.
pub fn normalize_phrase(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = true;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out.trim_end().to_string()
}

/// Whether `transcript` contains any of the configured end-call phrases
/// (case-insensitive substring match after normalization).
pub fn matches_end_call_phrase(transcript: &str, phrases: &[String]) -> bool {
    if phrases.is_empty() {
        return false;
    }
    let haystack = normalize_phrase(transcript);
    phrases
        .iter()
        .map(|p| normalize_phrase(p))
        .filter(|p| !p.is_empty())
        .any(|p| haystack.contains(&p))
}
