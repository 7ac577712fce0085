//! Effective plan limits: plan defaults overlaid with per-subscription
//! overrides, plus the tenant's current subscription state and billing
//! period bounds. The SaaS layer computes these; the admission controller
//! only consumes them.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    Active,
    Trialing,
    Inactive,
}

impl SubscriptionState {
    /// Whether overage minutes may be consumed beyond the included allotment.
    pub fn allows_overage(self) -> bool {
        matches!(self, SubscriptionState::Active | SubscriptionState::Trialing)
    }
}

/// Per-category provider allowlists. An empty list means "no restriction".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderAllowlists {
    #[serde(default)]
    pub stt: Vec<String>,
    #[serde(default)]
    pub llm: Vec<String>,
    #[serde(default)]
    pub tts: Vec<String>,
}

impl ProviderAllowlists {
    pub fn allows(&self, category: &str, slug: &str) -> bool {
        let list = match category {
            "stt" => &self.stt,
            "llm" => &self.llm,
            "tts" => &self.tts,
            _ => return false,
        };
        list.is_empty() || list.iter().any(|s| s == slug)
    }
}

/// Plan defaults overlaid with per-subscription custom overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectivePlanLimits {
    pub included_minutes: u64,
    pub max_concurrent_calls: u32,
    pub agent_quota: u32,
    /// Overage rate per minute in minor units, charged only for active or
    /// trialing subscriptions.
    pub overage_rate_minor_per_minute: i64,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub allowed_providers: ProviderAllowlists,
    pub subscription: SubscriptionState,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

impl EffectivePlanLimits {
    /// Plan limits for the current calendar-month billing period.
    pub fn for_current_period(
        included_minutes: u64,
        max_concurrent_calls: u32,
        subscription: SubscriptionState,
    ) -> Self {
        let (start, end) = current_month_bounds(Utc::now());
        Self {
            included_minutes,
            max_concurrent_calls,
            agent_quota: 10,
            overage_rate_minor_per_minute: 0,
            features: Vec::new(),
            allowed_providers: ProviderAllowlists::default(),
            subscription,
            period_start: start,
            period_end: end,
        }
    }
}

/// Calendar-month bounds containing `now`.
pub fn current_month_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc
        .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now);
    let (ny, nm) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    let end = Utc
        .with_ymd_and_hms(ny, nm, 1, 0, 0, 0)
        .single()
        .unwrap_or(now);
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allowlist_allows_everything() {
        let lists = ProviderAllowlists::default();
        assert!(lists.allows("tts", "cartesia"));
        assert!(lists.allows("stt", "deepgram"));
    }

    #[test]
    fn allowlist_restricts_category() {
        let lists = ProviderAllowlists {
            tts: vec!["sarvam".into()],
            ..Default::default()
        };
        assert!(lists.allows("tts", "sarvam"));
        assert!(!lists.allows("tts", "cartesia"));
        // Other categories remain unrestricted.
        assert!(lists.allows("llm", "openai"));
    }

    #[test]
    fn unknown_category_is_denied() {
        let lists = ProviderAllowlists::default();
        assert!(!lists.allows("video", "anything"));
    }

    #[test]
    fn overage_requires_live_subscription() {
        assert!(SubscriptionState::Active.allows_overage());
        assert!(SubscriptionState::Trialing.allows_overage());
        assert!(!SubscriptionState::Inactive.allows_overage());
    }

    #[test]
    fn month_bounds_wrap_december() {
        let now = Utc.with_ymd_and_hms(2026, 12, 15, 10, 0, 0).unwrap();
        let (start, end) = current_month_bounds(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap());
    }
}
