//! Durable call and usage records.
//!
//! A [`CallRecord`] row exists from admission until the billing reconciler
//! finalizes it; after finalization it is immutable. [`UsageRecord`]s are
//! write-once and emitted exactly once per call id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Billed minutes for a call: duration rounded up to the next whole minute
/// (zero-length calls bill nothing).
pub fn billed_minutes(duration_seconds: u64) -> u64 {
    duration_seconds.div_ceil(60)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
    #[default]
    Web,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Normal,
    Timeout,
    Error,
    BargeEnd,
    MaxDuration,
    CallerHangup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    InProgress,
    Completed,
    Failed,
}

impl CallStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CallStatus::InProgress)
    }
}

/// Provider identities of the call, snapshotted at admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderTriple {
    pub stt: String,
    pub llm: String,
    pub tts: String,
}

/// Per-category costs in integer minor units.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub stt_minor: i64,
    pub llm_minor: i64,
    pub tts_minor: i64,
    pub telephony_minor: i64,
    pub total_minor: i64,
}

/// One row per call id. Terminal fields are written once by the billing
/// reconciler and never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub tenant_id: String,
    pub call_id: String,
    pub agent_id: Option<String>,
    pub direction: CallDirection,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: u64,
    pub billed_minutes: u64,
    pub providers: ProviderTriple,
    pub cost: CostBreakdown,
    pub status: CallStatus,
    pub end_reason: Option<EndReason>,
    pub error: Option<String>,
}

impl CallRecord {
    /// A fresh in-progress record, created when admission registers the call.
    pub fn in_progress(
        tenant_id: impl Into<String>,
        call_id: impl Into<String>,
        agent_id: Option<String>,
        direction: CallDirection,
        providers: ProviderTriple,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            call_id: call_id.into(),
            agent_id,
            direction,
            started_at: Utc::now(),
            ended_at: None,
            duration_seconds: 0,
            billed_minutes: 0,
            providers,
            cost: CostBreakdown::default(),
            status: CallStatus::InProgress,
            end_reason: None,
            error: None,
        }
    }
}

/// Append-only usage record, one per finalized call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub tenant_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub usage_type: String,
    /// Billed quantity (minutes for calls).
    pub quantity: u64,
    /// Cost per unit in minor units.
    pub unit_cost_minor: i64,
    pub total_cost_minor: i64,
    pub call_id: String,
    /// Snapshot of the provider triple and any extra context.
    pub metadata: HashMap<String, serde_json::Value>,
}
