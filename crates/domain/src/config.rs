use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_256")]
    pub max_connections: usize,
    #[serde(default)]
    pub tls: TlsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            max_connections: 256,
            tls: TlsConfig::default(),
        }
    }
}

/// Transport security. When enabled, cert/key paths must exist; termination
/// itself happens at the deployment's fronting proxy.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub cert_path: Option<String>,
    #[serde(default)]
    pub key_path: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session store entry expiry.
    #[serde(default = "d_3600")]
    pub ttl_seconds: u64,
    /// Stale-session reaper cadence.
    #[serde(default = "d_60000")]
    pub cleanup_interval_ms: u64,
    /// Cutoff for admission-slot reclamation of calls with no live session.
    #[serde(default = "d_60")]
    pub max_stale_call_minutes: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 3600,
            cleanup_interval_ms: 60_000,
            max_stale_call_minutes: 60,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Audio
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Client → server PCM sample rate.
    #[serde(default = "d_16000")]
    pub client_sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            client_sample_rate: 16_000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Credentials and endpoint overrides for one provider slug. The key itself
/// is opaque to the runtime; adapters consume it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderAuthConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable read when `api_key` is unset
    /// (e.g. `STT_DEEPGRAM_API_KEY`).
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl ProviderAuthConfig {
    /// Resolve the API key: direct value first, then the named env var, then
    /// the conventional `<CATEGORY>_<SLUG>_API_KEY`.
    pub fn resolve_key(&self, category: &str, slug: &str) -> Option<String> {
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.is_empty()) {
            return Some(key.to_string());
        }
        let var = self.api_key_env.clone().unwrap_or_else(|| {
            format!(
                "{}_{}_API_KEY",
                category.to_uppercase(),
                slug.to_uppercase().replace('-', "_")
            )
        });
        std::env::var(var).ok().filter(|k| !k.is_empty())
    }
}

/// Per-category provider credential maps, keyed by slug.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub stt: HashMap<String, ProviderAuthConfig>,
    #[serde(default)]
    pub llm: HashMap<String, ProviderAuthConfig>,
    #[serde(default)]
    pub tts: HashMap<String, ProviderAuthConfig>,
}

impl ProvidersConfig {
    pub fn auth(&self, category: &str, slug: &str) -> ProviderAuthConfig {
        let map = match category {
            "stt" => &self.stt,
            "llm" => &self.llm,
            "tts" => &self.tts,
            _ => return ProviderAuthConfig::default(),
        };
        map.get(slug).cloned().unwrap_or_default()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Billing rates
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Rate tables in integer minor units. STT and TTS are priced per actual
/// minute (fractional), LLM per 1000 tokens, telephony per billed minute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    #[serde(default = "d_stt_rates")]
    pub stt_per_minute_minor: HashMap<String, i64>,
    #[serde(default = "d_llm_rates")]
    pub llm_per_1k_tokens_minor: HashMap<String, i64>,
    #[serde(default = "d_tts_rates")]
    pub tts_per_minute_minor: HashMap<String, i64>,
    #[serde(default = "d_telephony_rate")]
    pub telephony_per_minute_minor: i64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            stt_per_minute_minor: d_stt_rates(),
            llm_per_1k_tokens_minor: d_llm_rates(),
            tts_per_minute_minor: d_tts_rates(),
            telephony_per_minute_minor: d_telephony_rate(),
        }
    }
}

impl BillingConfig {
    fn rate(map: &HashMap<String, i64>, slug: &str) -> i64 {
        match map.get(slug) {
            Some(rate) => *rate,
            None => {
                tracing::warn!(slug, "no billing rate configured, pricing at zero");
                0
            }
        }
    }

    /// Per-category costs for a call. Categories are rounded individually
    /// for the record columns; the total is rounded once after summation.
    pub fn cost_breakdown(
        &self,
        providers: &crate::call::ProviderTriple,
        duration_seconds: u64,
        stt_audio_seconds: f64,
        tts_audio_seconds: f64,
        llm_tokens: u64,
    ) -> crate::call::CostBreakdown {
        let stt_rate = Self::rate(&self.stt_per_minute_minor, &providers.stt) as f64;
        let tts_rate = Self::rate(&self.tts_per_minute_minor, &providers.tts) as f64;
        let llm_rate = Self::rate(&self.llm_per_1k_tokens_minor, &providers.llm) as f64;

        let stt = stt_rate * stt_audio_seconds / 60.0;
        let tts = tts_rate * tts_audio_seconds / 60.0;
        let llm = llm_rate * llm_tokens as f64 / 1000.0;
        let telephony = (self.telephony_per_minute_minor
            * crate::call::billed_minutes(duration_seconds) as i64) as f64;

        crate::call::CostBreakdown {
            stt_minor: stt.round() as i64,
            llm_minor: llm.round() as i64,
            tts_minor: tts.round() as i64,
            telephony_minor: telephony.round() as i64,
            total_minor: (stt + tts + llm + telephony).round() as i64,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Admission / plans
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Plan limits as configured (before overlay onto a billing period).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanLimitsConfig {
    #[serde(default = "d_500")]
    pub included_minutes: u64,
    #[serde(default = "d_5")]
    pub max_concurrent_calls: u32,
    #[serde(default = "d_10")]
    pub agent_quota: u32,
    #[serde(default)]
    pub overage_rate_minor_per_minute: i64,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub stt_allowlist: Vec<String>,
    #[serde(default)]
    pub llm_allowlist: Vec<String>,
    #[serde(default)]
    pub tts_allowlist: Vec<String>,
    #[serde(default = "d_sub_state")]
    pub subscription: String,
}

impl Default for PlanLimitsConfig {
    fn default() -> Self {
        Self {
            included_minutes: 500,
            max_concurrent_calls: 5,
            agent_quota: 10,
            overage_rate_minor_per_minute: 0,
            features: Vec::new(),
            stt_allowlist: Vec::new(),
            llm_allowlist: Vec::new(),
            tts_allowlist: Vec::new(),
            subscription: d_sub_state(),
        }
    }
}

/// Default plan plus per-tenant overrides, consumed by the static plan source.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdmissionConfig {
    #[serde(default)]
    pub default_plan: PlanLimitsConfig,
    /// Per-tenant plan overrides (key = tenant id).
    #[serde(default)]
    pub per_tenant: HashMap<String, PlanLimitsConfig>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation + env overlay
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Config {
    /// Validate the config. Errors abort startup (exit code 1).
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let err = |msg: String| ConfigIssue {
            severity: ConfigSeverity::Error,
            message: msg,
        };
        let warn = |msg: String| ConfigIssue {
            severity: ConfigSeverity::Warning,
            message: msg,
        };

        if self.server.tls.enabled {
            match (&self.server.tls.cert_path, &self.server.tls.key_path) {
                (Some(cert), Some(key)) => {
                    if !std::path::Path::new(cert).exists() {
                        issues.push(err(format!("TLS cert not found: {cert}")));
                    }
                    if !std::path::Path::new(key).exists() {
                        issues.push(err(format!("TLS key not found: {key}")));
                    }
                }
                _ => issues.push(err(
                    "TLS enabled but cert_path/key_path not set".to_string(),
                )),
            }
        }

        if self.session.ttl_seconds == 0 {
            issues.push(err("session.ttl_seconds must be positive".to_string()));
        }
        if self.session.cleanup_interval_ms == 0 {
            issues.push(err(
                "session.cleanup_interval_ms must be positive".to_string(),
            ));
        }
        if self.audio.client_sample_rate < 8_000 {
            issues.push(err(format!(
                "audio.client_sample_rate {} is below 8000 Hz",
                self.audio.client_sample_rate
            )));
        }
        if self.admission.default_plan.max_concurrent_calls == 0 {
            issues.push(warn(
                "default plan allows zero concurrent calls; every reservation will be denied"
                    .to_string(),
            ));
        }

        issues
    }

    /// Overlay the recognized environment options onto a loaded config.
    pub fn apply_env(&mut self) {
        fn parse_env<T: std::str::FromStr>(var: &str) -> Option<T> {
            match std::env::var(var) {
                Ok(raw) => match raw.parse() {
                    Ok(v) => Some(v),
                    Err(_) => {
                        tracing::warn!(var, value = %raw, "unparseable env override, ignoring");
                        None
                    }
                },
                Err(_) => None,
            }
        }

        if let Some(v) = parse_env::<u64>("SESSION_TTL_SECONDS") {
            self.session.ttl_seconds = v;
        }
        if let Some(v) = parse_env::<u64>("SESSION_CLEANUP_INTERVAL_MS") {
            self.session.cleanup_interval_ms = v;
        }
        if let Some(v) = parse_env::<u64>("MAX_STALE_CALL_MINUTES") {
            self.session.max_stale_call_minutes = v;
        }
        if let Some(v) = parse_env::<u32>("AUDIO_CLIENT_SAMPLE_RATE") {
            self.audio.client_sample_rate = v;
        }
        if let Ok(v) = std::env::var("TLS_ENABLED") {
            self.server.tls.enabled = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("TLS_CERT_PATH") {
            self.server.tls.cert_path = Some(v);
        }
        if let Ok(v) = std::env::var("TLS_KEY_PATH") {
            self.server.tls.key_path = Some(v);
        }
    }
}

// ── serde default helpers ─────────────────────────────────────────

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    8080
}
fn d_256() -> usize {
    256
}
fn d_3600() -> u64 {
    3600
}
fn d_60000() -> u64 {
    60_000
}
fn d_60() -> u64 {
    60
}
fn d_16000() -> u32 {
    16_000
}
fn d_500() -> u64 {
    500
}
fn d_5() -> u32 {
    5
}
fn d_10() -> u32 {
    10
}
fn d_sub_state() -> String {
    "active".into()
}

fn d_telephony_rate() -> i64 {
    50 // 0.50 per billed minute
}

fn d_stt_rates() -> HashMap<String, i64> {
    HashMap::from([
        ("deepgram".to_string(), 43),
        ("sarvam".to_string(), 30),
        ("fake".to_string(), 10),
    ])
}

fn d_llm_rates() -> HashMap<String, i64> {
    HashMap::from([("openai".to_string(), 15), ("fake".to_string(), 1)])
}

fn d_tts_rates() -> HashMap<String, i64> {
    HashMap::from([
        ("elevenlabs".to_string(), 180),
        ("sarvam".to_string(), 60),
        ("cartesia".to_string(), 80),
        ("fake".to_string(), 10),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.session.ttl_seconds, 3600);
        assert_eq!(cfg.session.cleanup_interval_ms, 60_000);
        assert_eq!(cfg.session.max_stale_call_minutes, 60);
        assert_eq!(cfg.audio.client_sample_rate, 16_000);
        assert!(!cfg.server.tls.enabled);
    }

    #[test]
    fn empty_toml_parses_to_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.session.ttl_seconds, 3600);
        assert_eq!(cfg.admission.default_plan.max_concurrent_calls, 5);
    }

    #[test]
    fn partial_toml_overrides() {
        let cfg: Config = toml::from_str(
            r#"
            [session]
            ttl_seconds = 120

            [admission.default_plan]
            max_concurrent_calls = 2
            tts_allowlist = ["sarvam"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.session.ttl_seconds, 120);
        assert_eq!(cfg.admission.default_plan.max_concurrent_calls, 2);
        assert_eq!(cfg.admission.default_plan.tts_allowlist, vec!["sarvam"]);
        // Untouched sections keep their defaults.
        assert_eq!(cfg.server.port, 8080);
    }

    #[test]
    fn tls_enabled_without_paths_is_an_error() {
        let mut cfg = Config::default();
        cfg.server.tls.enabled = true;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.message.contains("TLS")));
    }

    #[test]
    fn zero_ttl_is_an_error() {
        let mut cfg = Config::default();
        cfg.session.ttl_seconds = 0;
        assert!(cfg
            .validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error));
    }
}
