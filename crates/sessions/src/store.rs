//! The session manager.
//!
//! Owns the lifecycle of every [`Session`] in this process: creation,
//! lookup, updates, termination, per-tenant enumeration, and TTL reaping.
//! The local cache serves hot reads; every write is also serialized to the
//! key-value store so replicas share state and orphans expire.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;

use vx_domain::error::{Error, Result};
use vx_domain::session::{Session, SessionSpec, SessionStatus};

use crate::kv::KeyValueStore;

const KEY_PREFIX: &str = "session:";

fn session_key(session_id: &str) -> String {
    format!("{KEY_PREFIX}{session_id}")
}

pub struct SessionManager {
    kv: Arc<dyn KeyValueStore>,
    cache: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(kv: Arc<dyn KeyValueStore>, ttl_seconds: u64) -> Self {
        Self {
            kv,
            cache: RwLock::new(HashMap::new()),
            ttl: Duration::from_secs(ttl_seconds),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Create a session in `Initializing` and persist it.
    pub async fn create(&self, spec: SessionSpec) -> Result<Session> {
        let session = Session::new(spec);
        self.persist(&session).await?;
        self.cache
            .write()
            .insert(session.session_id.clone(), session.clone());
        tracing::info!(
            session_id = %session.session_id,
            tenant_id = %session.spec.tenant_id,
            call_id = %session.spec.call_id,
            "session created"
        );
        Ok(session)
    }

    /// Look up a session: local cache first, then the store.
    pub async fn get(&self, session_id: &str) -> Option<Session> {
        if let Some(session) = self.cache.read().get(session_id).cloned() {
            return Some(session);
        }
        // Advisory cross-process read.
        match self.kv.get(&session_key(session_id)).await {
            Ok(Some(raw)) => match serde_json::from_str::<Session>(&raw) {
                Ok(session) => Some(session),
                Err(e) => {
                    tracing::warn!(session_id, error = %e, "corrupt session entry in store");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "session store read failed");
                None
            }
        }
    }

    /// Write back a session snapshot. Last-writer-wins per session id; the
    /// owning orchestrator is the only writer under normal operation.
    pub async fn update(&self, session: &Session) -> Result<()> {
        self.cache
            .write()
            .insert(session.session_id.clone(), session.clone());
        self.persist(session).await
    }

    /// Terminate a session through the normal path, returning the final
    /// snapshot. No-op (returning the current snapshot) if already terminal.
    pub async fn end(&self, session_id: &str) -> Option<Session> {
        let mut session = self.get(session_id).await?;
        if !session.status.is_terminal() {
            if session.status == SessionStatus::Active {
                let _ = session.transition(SessionStatus::Ending);
            }
            if session.transition(SessionStatus::Ended).is_err() {
                // Sessions that never reached Active can only fail out.
                let _ = session.transition(SessionStatus::Error);
            }
            session.ended_at.get_or_insert_with(Utc::now);
            if let Err(e) = self.update(&session).await {
                tracing::warn!(session_id, error = %e, "failed to persist ended session");
            }
        }
        Some(session)
    }

    /// Remove a session from the cache and the store.
    pub async fn delete(&self, session_id: &str) {
        self.cache.write().remove(session_id);
        if let Err(e) = self.kv.delete(&session_key(session_id)).await {
            tracing::warn!(session_id, error = %e, "session store delete failed");
        }
    }

    /// All cached sessions.
    pub fn list(&self) -> Vec<Session> {
        self.cache.read().values().cloned().collect()
    }

    /// All cached sessions for a tenant.
    pub fn list_by_tenant(&self, tenant_id: &str) -> Vec<Session> {
        self.cache
            .read()
            .values()
            .filter(|s| s.spec.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    /// Count of non-terminal sessions for a tenant.
    pub fn count(&self, tenant_id: &str) -> usize {
        self.cache
            .read()
            .values()
            .filter(|s| s.spec.tenant_id == tenant_id && !s.status.is_terminal())
            .count()
    }

    /// Force-fail every non-terminal session older than the TTL and drop its
    /// store entry. Returns the reaped sessions so the caller can release
    /// slots and finalize call records.
    pub async fn reap_stale(&self) -> Vec<Session> {
        let now = Utc::now();
        let ttl_secs = self.ttl.as_secs() as i64;

        let stale_ids: Vec<String> = self
            .cache
            .read()
            .values()
            .filter(|s| !s.status.is_terminal() && s.age_seconds(now) > ttl_secs)
            .map(|s| s.session_id.clone())
            .collect();

        let mut reaped = Vec::with_capacity(stale_ids.len());
        for session_id in stale_ids {
            let Some(mut session) = self.cache.write().remove(&session_id) else {
                continue;
            };
            let _ = session.transition(SessionStatus::Error);
            session.error = Some("session expired: exceeded TTL without teardown".into());
            if let Err(e) = self.kv.delete(&session_key(&session_id)).await {
                tracing::warn!(session_id = %session_id, error = %e, "stale session delete failed");
            }
            tracing::warn!(
                session_id = %session.session_id,
                tenant_id = %session.spec.tenant_id,
                age_seconds = session.age_seconds(now),
                "reaped stale session"
            );
            reaped.push(session);
        }
        reaped
    }

    /// Total cached sessions (diagnostics).
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }

    async fn persist(&self, session: &Session) -> Result<()> {
        let raw = serde_json::to_string(session)
            .map_err(|e| Error::Internal(format!("serializing session: {e}")))?;
        self.kv
            .put(&session_key(&session.session_id), raw, self.ttl)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use chrono::Duration as ChronoDuration;
    use vx_domain::session::ChatEntry;
    use vx_domain::session::ChatRole;

    fn spec(tenant: &str) -> SessionSpec {
        serde_json::from_value(serde_json::json!({
            "tenantId": tenant,
            "callId": uuid::Uuid::new_v4().to_string(),
            "systemPrompt": "You are concise.",
            "stt": { "provider": "fake" },
            "llm": { "provider": "fake", "model": "test" },
            "tts": { "provider": "fake", "voiceId": "v1" },
        }))
        .unwrap()
    }

    fn manager(ttl_seconds: u64) -> SessionManager {
        SessionManager::new(Arc::new(MemoryKv::new()), ttl_seconds)
    }

    #[tokio::test]
    async fn create_get_update_roundtrip() {
        let mgr = manager(60);
        let mut session = mgr.create(spec("acme")).await.unwrap();
        assert_eq!(session.status, SessionStatus::Initializing);

        session.transition(SessionStatus::Active).unwrap();
        session.push_history(ChatEntry::new(ChatRole::User, "hello"));
        mgr.update(&session).await.unwrap();

        let loaded = mgr.get(&session.session_id).await.unwrap();
        assert_eq!(loaded.status, SessionStatus::Active);
        assert_eq!(loaded.history.len(), 1);
    }

    #[tokio::test]
    async fn store_serialization_roundtrips_to_the_millisecond() {
        let mgr = manager(60);
        let session = mgr.create(spec("acme")).await.unwrap();

        // Read back through the store path only.
        mgr.cache.write().clear();
        let loaded = mgr.get(&session.session_id).await.unwrap();

        assert_eq!(loaded.session_id, session.session_id);
        assert_eq!(
            loaded.started_at.timestamp_millis(),
            session.started_at.timestamp_millis()
        );
        assert_eq!(loaded.spec.tenant_id, session.spec.tenant_id);
    }

    #[tokio::test]
    async fn list_and_count_by_tenant() {
        let mgr = manager(60);
        let mut a1 = mgr.create(spec("a")).await.unwrap();
        let _a2 = mgr.create(spec("a")).await.unwrap();
        let _b1 = mgr.create(spec("b")).await.unwrap();

        assert_eq!(mgr.list_by_tenant("a").len(), 2);
        assert_eq!(mgr.count("a"), 2);
        assert_eq!(mgr.count("b"), 1);

        // Terminal sessions stop counting.
        a1.transition(SessionStatus::Error).unwrap();
        mgr.update(&a1).await.unwrap();
        assert_eq!(mgr.count("a"), 1);
        assert_eq!(mgr.list_by_tenant("a").len(), 2);
    }

    #[tokio::test]
    async fn end_walks_through_ending() {
        let mgr = manager(60);
        let mut session = mgr.create(spec("acme")).await.unwrap();
        session.transition(SessionStatus::Active).unwrap();
        mgr.update(&session).await.unwrap();

        let ended = mgr.end(&session.session_id).await.unwrap();
        assert_eq!(ended.status, SessionStatus::Ended);
        assert!(ended.ended_at.is_some());

        // Idempotent on terminal sessions.
        let again = mgr.end(&session.session_id).await.unwrap();
        assert_eq!(again.status, SessionStatus::Ended);
    }

    #[tokio::test]
    async fn end_of_initializing_session_fails_out() {
        let mgr = manager(60);
        let session = mgr.create(spec("acme")).await.unwrap();
        let ended = mgr.end(&session.session_id).await.unwrap();
        assert_eq!(ended.status, SessionStatus::Error);
    }

    #[tokio::test]
    async fn reap_stale_force_fails_old_sessions() {
        let mgr = manager(2);
        let mut session = mgr.create(spec("acme")).await.unwrap();
        session.transition(SessionStatus::Active).unwrap();
        // Backdate the start to exceed the TTL.
        session.started_at = Utc::now() - ChronoDuration::seconds(10);
        mgr.update(&session).await.unwrap();

        let fresh = mgr.create(spec("acme")).await.unwrap();

        let reaped = mgr.reap_stale().await;
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].session_id, session.session_id);
        assert_eq!(reaped[0].status, SessionStatus::Error);
        assert!(reaped[0].error.as_deref().unwrap().contains("TTL"));

        // The fresh session survives; the stale one is gone everywhere.
        assert!(mgr.get(&fresh.session_id).await.is_some());
        assert!(mgr.get(&session.session_id).await.is_none());
    }

    #[tokio::test]
    async fn delete_removes_cache_and_store() {
        let mgr = manager(60);
        let session = mgr.create(spec("acme")).await.unwrap();
        mgr.delete(&session.session_id).await;
        assert!(mgr.get(&session.session_id).await.is_none());
        assert!(mgr.is_empty());
    }
}
