//! AppState construction and background-task spawning.
//!
//! `build_app_state` wires every subsystem; `spawn_background_tasks` starts
//! the stale reaper and the periodic stats log. The reaper is the safety
//! net, not the primary release mechanism: every normal exit path
//! finalizes through [`crate::teardown`].

use std::sync::Arc;

use vx_admission::{
    AdmissionController, CallOutcome, MemoryCallStore, MemoryUsageStore, RateTable, Reconciler,
    StaticPlanSource,
};
use vx_domain::call::EndReason;
use vx_domain::config::Config;
use vx_pipeline::{CancelMap, ToolRegistry};
use vx_providers::ProviderRegistry;
use vx_sessions::{MemoryKv, SessionManager};

use crate::state::AppState;

/// Initialize every subsystem and return a fully-wired [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> AppState {
    // ── Provider adapters ────────────────────────────────────────────
    let providers = Arc::new(ProviderRegistry::from_config(&config.providers));
    if providers.is_empty() {
        tracing::warn!(
            "no provider adapters initialized; sessions will fail at start \
             until credentials are configured"
        );
    }

    // ── Session management ───────────────────────────────────────────
    let kv = Arc::new(MemoryKv::new());
    let sessions = Arc::new(SessionManager::new(
        kv.clone(),
        config.session.ttl_seconds,
    ));
    tracing::info!(
        ttl_seconds = config.session.ttl_seconds,
        "session manager ready"
    );

    // ── Admission & billing ──────────────────────────────────────────
    let calls = Arc::new(MemoryCallStore::new());
    let usage = Arc::new(MemoryUsageStore::new());
    let reconciler = Arc::new(Reconciler::new(
        calls.clone(),
        usage.clone(),
        RateTable::new(config.billing.clone()),
    ));
    let admission = Arc::new(AdmissionController::new(
        Arc::new(StaticPlanSource::from_config(&config.admission)),
        calls,
        usage,
        reconciler.clone(),
    ));
    tracing::info!(
        max_concurrent = config.admission.default_plan.max_concurrent_calls,
        "admission controller ready"
    );

    // ── Cancel map + tools ───────────────────────────────────────────
    let cancel_map = Arc::new(CancelMap::new());
    let tools = Arc::new(ToolRegistry::new());
    tracing::info!("cancel map + tool registry ready");

    AppState {
        config,
        providers,
        sessions,
        cancel_map,
        kv,
        admission,
        reconciler,
        tools,
    }
}

/// One pass of the stale reaper: force-fail TTL-expired sessions, release
/// their slots, reclaim call records that lost their session, and purge
/// expired store entries. Returns the number of sessions reaped.
pub async fn reaper_pass(state: &AppState) -> usize {
    let reaped = state.sessions.reap_stale().await;
    let count = reaped.len();

    for session in &reaped {
        // A stuck pipeline (if any) gets cancelled; release is idempotent
        // so racing a concurrent normal teardown is harmless.
        state.cancel_map.cancel(&session.session_id);

        let mut outcome = CallOutcome::new(EndReason::Timeout);
        outcome.error = session.error.clone();
        if let Err(e) = state
            .admission
            .release(&session.spec.call_id, outcome)
            .await
        {
            tracing::warn!(
                call_id = %session.spec.call_id,
                error = %e,
                "stale session slot release failed"
            );
        }
    }

    state
        .reconciler
        .sweep_stale(state.config.session.max_stale_call_minutes)
        .await;
    state.kv.purge_expired();

    count
}

/// Spawn the long-running background tasks (stale reaper + stats log).
pub fn spawn_background_tasks(state: &AppState) {
    // ── Stale-session reaper ─────────────────────────────────────────
    {
        let state = state.clone();
        let interval_ms = state.config.session.cleanup_interval_ms;
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            loop {
                interval.tick().await;
                let reaped = reaper_pass(&state).await;
                if reaped > 0 {
                    tracing::info!(reaped, "stale session reaper pass complete");
                }
            }
        });
    }

    // ── Periodic stats log ───────────────────────────────────────────
    {
        let sessions = state.sessions.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                tracing::debug!(sessions = sessions.len(), "session cache size");
            }
        });
    }

    tracing::info!("background tasks spawned");
}
