//! Stale-session reaping: a session whose process dies without teardown is
//! force-ended by the reaper, its slot released, and its call finalized as
//! failed with `end_reason = timeout`.

use std::sync::Arc;

use vx_domain::config::{Config, PlanLimitsConfig};
use vx_domain::session::SessionSpec;
use vx_gateway::bootstrap::{build_app_state, reaper_pass};
use vx_gateway::state::AppState;
use vx_gateway::ws::start_session;
use vx_providers::fake::{FakeLlmProvider, FakeSttProvider, FakeTtsProvider};
use vx_providers::ProviderRegistry;

fn test_state(ttl_seconds: u64) -> AppState {
    let mut config = Config::default();
    config.session.ttl_seconds = ttl_seconds;
    config.admission.default_plan = PlanLimitsConfig {
        max_concurrent_calls: 1,
        ..Default::default()
    };
    let mut state = build_app_state(Arc::new(config));

    let mut registry = ProviderRegistry::new();
    registry.register_stt("fake", Arc::new(FakeSttProvider::scripted(vec![])));
    registry.register_llm("fake", Arc::new(FakeLlmProvider::scripted(vec![])));
    registry.register_tts("fake", Arc::new(FakeTtsProvider::new()));
    state.providers = Arc::new(registry);
    state
}

fn spec() -> SessionSpec {
    serde_json::from_value(serde_json::json!({
        "systemPrompt": "agent",
        "stt": { "provider": "fake" },
        "llm": { "provider": "fake", "model": "test" },
        "tts": { "provider": "fake", "voiceId": "v1" },
    }))
    .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn reaper_reclaims_a_dead_session() {
    let state = test_state(2);

    let (handle, _rate) = start_session(&state, "acme".into(), spec())
        .await
        .unwrap();
    let session_id = handle.session_id.clone();

    // Simulate a process death: the pipeline task disappears without any
    // teardown. The slot stays held and the session stays non-terminal.
    handle.join.abort();
    assert_eq!(state.admission.stats("acme").await.unwrap().active, 1);

    // Before the TTL elapses the reaper leaves the session alone.
    assert_eq!(reaper_pass(&state).await, 0);

    tokio::time::sleep(std::time::Duration::from_millis(2_500)).await;

    let reaped = reaper_pass(&state).await;
    assert_eq!(reaped, 1);

    // Slot released; usage recorded with one billed minute (⌈2.5s/60⌉).
    let stats = state.admission.stats("acme").await.unwrap();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.used_minutes, 1);

    // The session is gone from the store.
    assert!(state.sessions.get(&session_id).await.is_none());

    // The freed slot is usable again.
    let (handle2, _) = start_session(&state, "acme".into(), spec())
        .await
        .unwrap();
    handle2.join.abort();

    // Reaping is idempotent: a second pass finds nothing and the usage
    // record is not re-emitted.
    assert_eq!(reaper_pass(&state).await, 0);
    assert_eq!(state.admission.stats("acme").await.unwrap().used_minutes, 1);
}
