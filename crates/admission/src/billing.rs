//! Billing reconciliation.
//!
//! On terminal transition the reconciler computes the call's costs, writes
//! the terminal fields of its [`CallRecord`], and emits the write-once
//! [`UsageRecord`]. STT and TTS are priced per actual minute (fractional),
//! LLM per 1000 tokens, telephony per billed minute; totals are rounded to
//! integer minor units after summation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use vx_domain::call::{CallRecord, CallStatus, CostBreakdown, EndReason, ProviderTriple, UsageRecord};
use vx_domain::config::BillingConfig;
use vx_domain::error::{Error, Result};
use vx_domain::plan::current_month_bounds;

use crate::stores::{CallStore, UsageStore};

pub use vx_domain::call::billed_minutes;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rates
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Measured quantities consumed by one call.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageQuantities {
    pub stt_audio_seconds: f64,
    pub tts_audio_seconds: f64,
    pub llm_tokens: u64,
}

#[derive(Clone)]
pub struct RateTable {
    config: BillingConfig,
}

impl RateTable {
    pub fn new(config: BillingConfig) -> Self {
        Self { config }
    }

    /// Per-category costs for a call (see
    /// [`BillingConfig::cost_breakdown`] for the rounding rules).
    pub fn compute(
        &self,
        providers: &ProviderTriple,
        duration_seconds: u64,
        used: UsageQuantities,
    ) -> CostBreakdown {
        self.config.cost_breakdown(
            providers,
            duration_seconds,
            used.stt_audio_seconds,
            used.tts_audio_seconds,
            used.llm_tokens,
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reconciler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything known about a call at teardown.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub ended_at: DateTime<Utc>,
    pub end_reason: EndReason,
    pub error: Option<String>,
    pub used: UsageQuantities,
}

impl CallOutcome {
    pub fn new(end_reason: EndReason) -> Self {
        Self {
            ended_at: Utc::now(),
            end_reason,
            error: None,
            used: UsageQuantities::default(),
        }
    }
}

/// Sole writer of CallRecord terminal fields and usage records.
pub struct Reconciler {
    calls: Arc<dyn CallStore>,
    usage: Arc<dyn UsageStore>,
    rates: RateTable,
}

impl Reconciler {
    pub fn new(calls: Arc<dyn CallStore>, usage: Arc<dyn UsageStore>, rates: RateTable) -> Self {
        Self { calls, usage, rates }
    }

    /// Finalize the call: compute costs, mark the record terminal, emit the
    /// usage record, release the slot (the record leaving `InProgress` is
    /// the release).
    ///
    /// Idempotent on call id: finalizing an already-terminal call returns
    /// the existing record and emits nothing.
    pub async fn finalize(&self, call_id: &str, outcome: CallOutcome) -> Result<CallRecord> {
        let mut record = self
            .calls
            .get(call_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("call record: {call_id}")))?;

        if record.status.is_terminal() {
            tracing::debug!(call_id, "call already finalized, returning existing record");
            return Ok(record);
        }

        let duration_seconds = outcome
            .ended_at
            .signed_duration_since(record.started_at)
            .num_seconds()
            .max(0) as u64;

        record.ended_at = Some(outcome.ended_at);
        record.duration_seconds = duration_seconds;
        record.billed_minutes = billed_minutes(duration_seconds);
        record.cost = self
            .rates
            .compute(&record.providers, duration_seconds, outcome.used);
        record.end_reason = Some(outcome.end_reason);
        record.error = outcome.error;
        record.status = match outcome.end_reason {
            EndReason::Error | EndReason::Timeout => CallStatus::Failed,
            _ => CallStatus::Completed,
        };

        self.calls.update(&record).await?;

        tracing::info!(
            call_id,
            tenant_id = %record.tenant_id,
            duration_seconds,
            billed_minutes = record.billed_minutes,
            total_cost_minor = record.cost.total_minor,
            end_reason = ?outcome.end_reason,
            "call finalized"
        );

        // Usage emission must never block the slot release; failures are
        // logged and the background sweep retries by call id.
        if let Err(e) = self.emit_usage(&record).await {
            tracing::warn!(call_id, error = %e, "usage record emission failed");
        }

        Ok(record)
    }

    /// Finalize every in-progress call older than `cutoff_minutes` with
    /// `end_reason = timeout`. Safety net for calls whose session died
    /// without teardown. Returns the number of calls reclaimed.
    pub async fn sweep_stale(&self, cutoff_minutes: u64) -> usize {
        let cutoff = Utc::now() - Duration::minutes(cutoff_minutes as i64);
        let stale = match self.calls.list_in_progress_before(cutoff).await {
            Ok(stale) => stale,
            Err(e) => {
                tracing::warn!(error = %e, "stale call listing failed");
                return 0;
            }
        };

        let mut reclaimed = 0;
        for record in stale {
            let mut outcome = CallOutcome::new(EndReason::Timeout);
            outcome.error = Some(format!(
                "call exceeded {cutoff_minutes} minutes without finalization"
            ));
            match self.finalize(&record.call_id, outcome).await {
                Ok(_) => reclaimed += 1,
                Err(e) => {
                    tracing::warn!(call_id = %record.call_id, error = %e, "stale call finalize failed");
                }
            }
        }
        if reclaimed > 0 {
            tracing::info!(reclaimed, "reclaimed stale admission slots");
        }
        reclaimed
    }

    async fn emit_usage(&self, record: &CallRecord) -> Result<()> {
        let (period_start, period_end) = current_month_bounds(Utc::now());
        let usage = UsageRecord {
            tenant_id: record.tenant_id.clone(),
            period_start,
            period_end,
            usage_type: "call_minutes".into(),
            quantity: record.billed_minutes,
            unit_cost_minor: if record.billed_minutes > 0 {
                record.cost.total_minor / record.billed_minutes as i64
            } else {
                0
            },
            total_cost_minor: record.cost.total_minor,
            call_id: record.call_id.clone(),
            metadata: HashMap::from([
                ("stt".to_string(), serde_json::json!(record.providers.stt)),
                ("llm".to_string(), serde_json::json!(record.providers.llm)),
                ("tts".to_string(), serde_json::json!(record.providers.tts)),
            ]),
        };

        let inserted = self.usage.record_once(usage).await?;
        if !inserted {
            tracing::debug!(call_id = %record.call_id, "usage record already present");
        }
        Ok(())
    }
}
