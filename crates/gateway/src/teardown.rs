//! Session finalization.
//!
//! Every pipeline exit path funnels here: the admission slot is released,
//! the call record is finalized with billing-grade quantities, and the
//! cancel token is dropped. Release is idempotent by call id, so racing
//! the stale reaper is harmless.

use chrono::Utc;

use vx_admission::{billing::UsageQuantities, CallOutcome};
use vx_domain::call::EndReason;
use vx_domain::session::SessionStatus;
use vx_pipeline::PipelineResult;

use crate::state::AppState;

pub async fn finalize(state: &AppState, result: PipelineResult) {
    state.cancel_map.remove(&result.session.session_id);

    let outcome = CallOutcome {
        ended_at: result.session.ended_at.unwrap_or_else(Utc::now),
        end_reason: result.end_reason,
        error: result.error.clone(),
        used: UsageQuantities {
            stt_audio_seconds: result.stt_audio_seconds,
            tts_audio_seconds: result.tts_audio_seconds,
            llm_tokens: result.llm_tokens,
        },
    };

    match state
        .admission
        .release(&result.session.spec.call_id, outcome)
        .await
    {
        Ok(record) => {
            tracing::info!(
                session_id = %result.session.session_id,
                call_id = %record.call_id,
                billed_minutes = record.billed_minutes,
                end_reason = ?record.end_reason,
                "session finalized"
            );
        }
        Err(e) => {
            tracing::warn!(
                session_id = %result.session.session_id,
                error = %e,
                "session finalization failed; stale sweep will retry"
            );
        }
    }

    // The store entry is released on every exit path; the TTL is only the
    // safety net.
    state.sessions.delete(&result.session.session_id).await;
}

/// The supervisor caught a panic: mark the session failed, release the
/// slot, and record the error. Other sessions in the process are
/// unaffected.
pub async fn finalize_panicked(state: &AppState, session_id: &str) {
    state.cancel_map.remove(session_id);

    let Some(mut session) = state.sessions.get(session_id).await else {
        tracing::warn!(session_id, "panicked session not found in store");
        return;
    };

    if !session.status.is_terminal() {
        let _ = session.transition(SessionStatus::Error);
        session.error = Some("session task panicked".into());
        if let Err(e) = state.sessions.update(&session).await {
            tracing::warn!(session_id, error = %e, "failed to persist panicked session");
        }
    }

    let mut outcome = CallOutcome::new(EndReason::Error);
    outcome.error = Some("session task panicked".into());
    if let Err(e) = state
        .admission
        .release(&session.spec.call_id, outcome)
        .await
    {
        tracing::warn!(session_id, error = %e, "panicked session slot release failed");
    }

    state.sessions.delete(session_id).await;
}
