//! Plan resolution.
//!
//! The SaaS layer owns plans and subscriptions; the core consumes
//! [`EffectivePlanLimits`] through the [`PlanSource`] trait. The shipped
//! [`StaticPlanSource`] resolves from configuration: a default plan with
//! per-tenant overrides, projected onto the current billing period.

use std::collections::HashMap;

use vx_domain::config::{AdmissionConfig, PlanLimitsConfig};
use vx_domain::plan::{
    current_month_bounds, EffectivePlanLimits, ProviderAllowlists, SubscriptionState,
};

pub trait PlanSource: Send + Sync {
    fn limits_for(&self, tenant_id: &str) -> EffectivePlanLimits;
}

pub struct StaticPlanSource {
    default_plan: PlanLimitsConfig,
    per_tenant: HashMap<String, PlanLimitsConfig>,
}

impl StaticPlanSource {
    pub fn from_config(config: &AdmissionConfig) -> Self {
        Self {
            default_plan: config.default_plan.clone(),
            per_tenant: config.per_tenant.clone(),
        }
    }
}

impl PlanSource for StaticPlanSource {
    fn limits_for(&self, tenant_id: &str) -> EffectivePlanLimits {
        let plan = self.per_tenant.get(tenant_id).unwrap_or(&self.default_plan);
        materialize(plan)
    }
}

fn materialize(plan: &PlanLimitsConfig) -> EffectivePlanLimits {
    let (period_start, period_end) = current_month_bounds(chrono::Utc::now());
    EffectivePlanLimits {
        included_minutes: plan.included_minutes,
        max_concurrent_calls: plan.max_concurrent_calls,
        agent_quota: plan.agent_quota,
        overage_rate_minor_per_minute: plan.overage_rate_minor_per_minute,
        features: plan.features.clone(),
        allowed_providers: ProviderAllowlists {
            stt: plan.stt_allowlist.clone(),
            llm: plan.llm_allowlist.clone(),
            tts: plan.tts_allowlist.clone(),
        },
        subscription: parse_subscription(&plan.subscription),
        period_start,
        period_end,
    }
}

fn parse_subscription(raw: &str) -> SubscriptionState {
    match raw {
        "active" => SubscriptionState::Active,
        "trialing" => SubscriptionState::Trialing,
        _ => SubscriptionState::Inactive,
    }
}
