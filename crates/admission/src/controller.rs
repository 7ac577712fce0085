//! The admission controller.
//!
//! `reserve` is the single gate every call passes before a session exists:
//! provider allowlists, then the usage-minute budget, then (under the
//! tenant's row lock) the concurrency count against the plan's
//! `max_concurrent_calls`. Registering the in-progress call record while
//! the lock is held is what makes the reservation atomic against
//! concurrent reservers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use vx_domain::call::{CallDirection, CallRecord, ProviderTriple};
use vx_domain::error::{Error, Result};

use crate::billing::{CallOutcome, Reconciler};
use crate::plan::PlanSource;
use crate::stores::{CallStore, UsageStore};

/// An atomically-held claim on one of a tenant's concurrent call slots.
#[derive(Debug, Clone)]
pub struct Reservation {
    /// Reservation ids coincide with call ids: the in-progress call record
    /// *is* the slot.
    pub reservation_id: String,
    pub tenant_id: String,
    pub call_id: String,
}

/// Input to [`AdmissionController::reserve`].
#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub tenant_id: String,
    pub call_id: String,
    pub agent_id: Option<String>,
    pub direction: CallDirection,
    pub providers: ProviderTriple,
}

/// Stats surface for the tenant dashboard.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AdmissionStats {
    pub active: u32,
    pub max: u32,
    pub used_minutes: u64,
    pub remaining_minutes: u64,
}

pub struct AdmissionController {
    plans: Arc<dyn PlanSource>,
    calls: Arc<dyn CallStore>,
    usage: Arc<dyn UsageStore>,
    reconciler: Arc<Reconciler>,
    /// Per-tenant row locks serializing the count-and-register step.
    row_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AdmissionController {
    pub fn new(
        plans: Arc<dyn PlanSource>,
        calls: Arc<dyn CallStore>,
        usage: Arc<dyn UsageStore>,
        reconciler: Arc<Reconciler>,
    ) -> Self {
        Self {
            plans,
            calls,
            usage,
            reconciler,
            row_locks: Mutex::new(HashMap::new()),
        }
    }

    fn row_lock(&self, tenant_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.row_locks
            .lock()
            .entry(tenant_id.to_string())
            .or_default()
            .clone()
    }

    /// Reserve a call slot. On success the in-progress [`CallRecord`] is
    /// registered; on denial nothing is consumed.
    pub async fn reserve(&self, req: ReserveRequest) -> Result<Reservation> {
        let limits = self.plans.limits_for(&req.tenant_id);

        // Provider allowlist check comes before anything is counted.
        for (category, slug) in [
            ("stt", req.providers.stt.as_str()),
            ("llm", req.providers.llm.as_str()),
            ("tts", req.providers.tts.as_str()),
        ] {
            if !limits.allowed_providers.allows(category, slug) {
                return Err(Error::ProviderNotAllowed {
                    category: category.to_string(),
                    provider: slug.to_string(),
                });
            }
        }

        // Usage-minute check, outside the row lock: past the included
        // allotment, only a live subscription grants overage.
        let used = self
            .usage
            .used_minutes(&req.tenant_id, limits.period_start, limits.period_end)
            .await?;
        if used >= limits.included_minutes && !limits.subscription.allows_overage() {
            return Err(Error::UsageLimitExceeded(format!(
                "{used}/{} minutes used this period",
                limits.included_minutes
            )));
        }

        // Count-and-register under the tenant row lock.
        let lock = self.row_lock(&req.tenant_id);
        let _guard = lock.lock().await;

        let current = self.calls.count_active(&req.tenant_id).await?;
        if current >= limits.max_concurrent_calls {
            tracing::info!(
                tenant_id = %req.tenant_id,
                current,
                max = limits.max_concurrent_calls,
                "reservation denied: concurrency limit"
            );
            return Err(Error::ConcurrencyLimit {
                current,
                max: limits.max_concurrent_calls,
            });
        }

        let record = CallRecord::in_progress(
            &req.tenant_id,
            &req.call_id,
            req.agent_id.clone(),
            req.direction,
            req.providers.clone(),
        );
        self.calls.insert(record).await?;

        tracing::info!(
            tenant_id = %req.tenant_id,
            call_id = %req.call_id,
            slot = current + 1,
            max = limits.max_concurrent_calls,
            "call slot reserved"
        );

        Ok(Reservation {
            reservation_id: req.call_id.clone(),
            tenant_id: req.tenant_id,
            call_id: req.call_id,
        })
    }

    /// Release a reservation by finalizing its call record. Idempotent by
    /// call id: repeating it yields the same record and does not re-emit
    /// usage.
    pub async fn release(
        &self,
        reservation_id: &str,
        outcome: CallOutcome,
    ) -> Result<CallRecord> {
        self.reconciler.finalize(reservation_id, outcome).await
    }

    /// Current stats for a tenant.
    pub async fn stats(&self, tenant_id: &str) -> Result<AdmissionStats> {
        let limits = self.plans.limits_for(tenant_id);
        let active = self.calls.count_active(tenant_id).await?;
        let used_minutes = self
            .usage
            .used_minutes(tenant_id, limits.period_start, limits.period_end)
            .await?;
        Ok(AdmissionStats {
            active,
            max: limits.max_concurrent_calls,
            used_minutes,
            remaining_minutes: limits.included_minutes.saturating_sub(used_minutes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::RateTable;
    use crate::plan::StaticPlanSource;
    use crate::stores::{MemoryCallStore, MemoryUsageStore};
    use vx_domain::call::EndReason;
    use vx_domain::config::{AdmissionConfig, BillingConfig, PlanLimitsConfig};

    fn controller_with(config: AdmissionConfig) -> (Arc<MemoryUsageStore>, AdmissionController) {
        let calls = Arc::new(MemoryCallStore::new());
        let usage = Arc::new(MemoryUsageStore::new());
        let reconciler = Arc::new(Reconciler::new(
            calls.clone(),
            usage.clone(),
            RateTable::new(BillingConfig::default()),
        ));
        let controller = AdmissionController::new(
            Arc::new(StaticPlanSource::from_config(&config)),
            calls,
            usage.clone(),
            reconciler,
        );
        (usage, controller)
    }

    fn request(tenant: &str, call: &str) -> ReserveRequest {
        ReserveRequest {
            tenant_id: tenant.into(),
            call_id: call.into(),
            agent_id: None,
            direction: CallDirection::Web,
            providers: ProviderTriple {
                stt: "deepgram".into(),
                llm: "openai".into(),
                tts: "sarvam".into(),
            },
        }
    }

    fn plan(max_concurrent: u32) -> AdmissionConfig {
        AdmissionConfig {
            default_plan: PlanLimitsConfig {
                max_concurrent_calls: max_concurrent,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn third_concurrent_call_is_denied_with_counts() {
        let (_usage, controller) = controller_with(plan(2));
        controller.reserve(request("t", "c1")).await.unwrap();
        controller.reserve(request("t", "c2")).await.unwrap();

        let err = controller.reserve(request("t", "c3")).await.unwrap_err();
        match err {
            Error::ConcurrencyLimit { current, max } => {
                assert_eq!((current, max), (2, 2));
            }
            other => panic!("unexpected error {other:?}"),
        }

        // Denial consumed nothing.
        let stats = controller.stats("t").await.unwrap();
        assert_eq!(stats.active, 2);
    }

    #[tokio::test]
    async fn release_frees_the_slot() {
        let (_usage, controller) = controller_with(plan(1));
        controller.reserve(request("t", "c1")).await.unwrap();
        assert!(controller.reserve(request("t", "c2")).await.is_err());

        controller
            .release("c1", CallOutcome::new(EndReason::Normal))
            .await
            .unwrap();
        controller.reserve(request("t", "c2")).await.unwrap();
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let (usage, controller) = controller_with(plan(2));
        controller.reserve(request("t", "c1")).await.unwrap();

        let first = controller
            .release("c1", CallOutcome::new(EndReason::Normal))
            .await
            .unwrap();
        let second = controller
            .release("c1", CallOutcome::new(EndReason::Error))
            .await
            .unwrap();
        assert_eq!(first.end_reason, second.end_reason);
        assert_eq!(usage.all().len(), 1);
    }

    #[tokio::test]
    async fn disallowed_provider_is_rejected_before_reservation() {
        let config = AdmissionConfig {
            default_plan: PlanLimitsConfig {
                tts_allowlist: vec!["sarvam".into()],
                ..Default::default()
            },
            ..Default::default()
        };
        let (_usage, controller) = controller_with(config);

        let mut req = request("t", "c1");
        req.providers.tts = "cartesia".into();
        let err = controller.reserve(req).await.unwrap_err();
        assert!(matches!(
            err,
            Error::ProviderNotAllowed { ref category, ref provider }
                if category == "tts" && provider == "cartesia"
        ));

        // Nothing was registered.
        let stats = controller.stats("t").await.unwrap();
        assert_eq!(stats.active, 0);
    }

    #[tokio::test]
    async fn usage_limit_denies_inactive_subscription_only() {
        let mut config = plan(5);
        config.default_plan.included_minutes = 0;
        config.default_plan.subscription = "inactive".into();
        let (_usage, controller) = controller_with(config);
        let err = controller.reserve(request("t", "c1")).await.unwrap_err();
        assert!(matches!(err, Error::UsageLimitExceeded(_)));

        // An active subscription gets overage instead.
        let mut config = plan(5);
        config.default_plan.included_minutes = 0;
        config.default_plan.subscription = "active".into();
        let (_usage, controller) = controller_with(config);
        assert!(controller.reserve(request("t", "c1")).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_reservers_cannot_overshoot() {
        let (_usage, controller) = controller_with(plan(2));
        let controller = Arc::new(controller);

        let mut handles = Vec::new();
        for i in 0..8 {
            let controller = controller.clone();
            handles.push(tokio::spawn(async move {
                controller.reserve(request("t", &format!("c{i}"))).await
            }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                granted += 1;
            }
        }
        assert_eq!(granted, 2);
        assert_eq!(controller.stats("t").await.unwrap().active, 2);
    }

    #[tokio::test]
    async fn stats_reports_remaining_minutes() {
        let (_usage, controller) = controller_with(plan(3));
        let stats = controller.stats("t").await.unwrap();
        assert_eq!(stats.max, 3);
        assert_eq!(stats.used_minutes, 0);
        assert_eq!(stats.remaining_minutes, 500);
    }
}
