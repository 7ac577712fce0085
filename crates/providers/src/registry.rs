//! Provider registry.
//!
//! Constructs and holds all configured adapter instances, one map per
//! category, keyed by slug. At startup the registry reads the
//! [`ProvidersConfig`], resolves authentication (env vars, direct keys), and
//! instantiates the appropriate adapter for each configured slug.
//!
//! Adapters that fail to initialize are logged and skipped rather than
//! aborting startup; the failures are recorded for diagnostics.

use std::collections::HashMap;
use std::sync::Arc;

use vx_domain::config::ProvidersConfig;
use vx_domain::error::{Error, Result};

use crate::llm::openai::OpenAiLlmProvider;
use crate::stt::deepgram::DeepgramSttProvider;
use crate::stt::sarvam::SarvamSttProvider;
use crate::traits::{LlmProvider, SttProvider, TtsProvider};
use crate::tts::cartesia::CartesiaTtsProvider;
use crate::tts::elevenlabs::ElevenLabsTtsProvider;
use crate::tts::sarvam::SarvamTtsProvider;

/// Records an adapter that failed to initialize.
#[derive(Debug, Clone)]
pub struct ProviderInitError {
    pub category: &'static str,
    pub slug: String,
    /// Error message with anything key-shaped masked.
    pub error: String,
}

/// Mask substrings that look like API keys in an error message so raw
/// secrets never reach logs or diagnostics.
fn mask_secrets(msg: &str) -> String {
    let mut result = msg.to_string();
    for word in msg.split(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == ',') {
        let trimmed = word.trim();
        if trimmed.len() >= 20
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            let masked = format!("{}...{}", &trimmed[..4], &trimmed[trimmed.len() - 4..]);
            result = result.replace(trimmed, &masked);
        }
    }
    result
}

#[derive(Default)]
pub struct ProviderRegistry {
    stt: HashMap<String, Arc<dyn SttProvider>>,
    llm: HashMap<String, Arc<dyn LlmProvider>>,
    tts: HashMap<String, Arc<dyn TtsProvider>>,
    init_errors: Vec<ProviderInitError>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from the providers section of the config.
    ///
    /// Every slug that appears in a category map is instantiated with its
    /// auth config. Unknown slugs and failed initializations are recorded,
    /// not fatal; a session selecting them fails at admission.
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let mut registry = Self::new();

        for (slug, auth) in &config.stt {
            let result: Result<Arc<dyn SttProvider>> = match slug.as_str() {
                "deepgram" => DeepgramSttProvider::from_auth(auth).map(|p| Arc::new(p) as _),
                "sarvam" => SarvamSttProvider::from_auth(auth).map(|p| Arc::new(p) as _),
                other => Err(Error::Config(format!("unknown stt provider: {other}"))),
            };
            match result {
                Ok(provider) => {
                    tracing::info!(category = "stt", slug, "registered provider adapter");
                    registry.stt.insert(slug.clone(), provider);
                }
                Err(e) => registry.record_init_error("stt", slug, e),
            }
        }

        for (slug, auth) in &config.llm {
            // Every configured LLM slug speaks the OpenAI-compatible wire
            // format; base_url selects the actual endpoint (Groq, etc.).
            match OpenAiLlmProvider::from_auth(slug, auth) {
                Ok(provider) => {
                    tracing::info!(category = "llm", slug, "registered provider adapter");
                    registry.llm.insert(slug.clone(), Arc::new(provider));
                }
                Err(e) => registry.record_init_error("llm", slug, e),
            }
        }

        for (slug, auth) in &config.tts {
            let result: Result<Arc<dyn TtsProvider>> = match slug.as_str() {
                "elevenlabs" => ElevenLabsTtsProvider::from_auth(auth).map(|p| Arc::new(p) as _),
                "sarvam" => SarvamTtsProvider::from_auth(auth).map(|p| Arc::new(p) as _),
                "cartesia" => CartesiaTtsProvider::from_auth(auth).map(|p| Arc::new(p) as _),
                other => Err(Error::Config(format!("unknown tts provider: {other}"))),
            };
            match result {
                Ok(provider) => {
                    tracing::info!(category = "tts", slug, "registered provider adapter");
                    registry.tts.insert(slug.clone(), provider);
                }
                Err(e) => registry.record_init_error("tts", slug, e),
            }
        }

        registry
    }

    fn record_init_error(&mut self, category: &'static str, slug: &str, err: Error) {
        let safe_error = mask_secrets(&err.to_string());
        tracing::warn!(
            category,
            slug,
            error = %safe_error,
            "failed to initialize provider adapter, skipping"
        );
        self.init_errors.push(ProviderInitError {
            category,
            slug: slug.to_string(),
            error: safe_error,
        });
    }

    // ── Registration (startup and tests) ─────────────────────────────

    pub fn register_stt(&mut self, slug: &str, provider: Arc<dyn SttProvider>) {
        self.stt.insert(slug.to_string(), provider);
    }

    pub fn register_llm(&mut self, slug: &str, provider: Arc<dyn LlmProvider>) {
        self.llm.insert(slug.to_string(), provider);
    }

    pub fn register_tts(&mut self, slug: &str, provider: Arc<dyn TtsProvider>) {
        self.tts.insert(slug.to_string(), provider);
    }

    // ── Lookup ───────────────────────────────────────────────────────

    pub fn stt(&self, slug: &str) -> Result<Arc<dyn SttProvider>> {
        self.stt
            .get(slug)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("stt provider: {slug}")))
    }

    pub fn llm(&self, slug: &str) -> Result<Arc<dyn LlmProvider>> {
        self.llm
            .get(slug)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("llm provider: {slug}")))
    }

    pub fn tts(&self, slug: &str) -> Result<Arc<dyn TtsProvider>> {
        self.tts
            .get(slug)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("tts provider: {slug}")))
    }

    /// All registered slugs per category, sorted (for diagnostics).
    pub fn list(&self) -> HashMap<&'static str, Vec<String>> {
        let mut out = HashMap::new();
        for (category, slugs) in [
            ("stt", self.stt.keys().cloned().collect::<Vec<String>>()),
            ("llm", self.llm.keys().cloned().collect::<Vec<String>>()),
            ("tts", self.tts.keys().cloned().collect::<Vec<String>>()),
        ] {
            let mut slugs = slugs;
            slugs.sort();
            out.insert(category, slugs);
        }
        out
    }

    pub fn init_errors(&self) -> &[ProviderInitError] {
        &self.init_errors
    }

    pub fn is_empty(&self) -> bool {
        self.stt.is_empty() && self.llm.is_empty() && self.tts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeLlmProvider, FakeSttProvider, FakeTtsProvider};

    #[test]
    fn lookup_of_unregistered_slug_fails() {
        let registry = ProviderRegistry::new();
        assert!(matches!(registry.stt("deepgram"), Err(Error::NotFound(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn registration_and_lookup() {
        let mut registry = ProviderRegistry::new();
        registry.register_stt("fake", Arc::new(FakeSttProvider::scripted(vec![])));
        registry.register_llm("fake", Arc::new(FakeLlmProvider::scripted(vec![])));
        registry.register_tts("fake", Arc::new(FakeTtsProvider::new()));

        assert!(registry.stt("fake").is_ok());
        assert!(registry.llm("fake").is_ok());
        assert_eq!(registry.tts("fake").unwrap().sample_rate(), 16_000);
        assert_eq!(registry.list()["tts"], vec!["fake"]);
    }

    #[test]
    fn missing_key_is_recorded_not_fatal() {
        // No env var set for this slug, so init fails and is recorded.
        let config = ProvidersConfig {
            stt: HashMap::from([(
                "deepgram".to_string(),
                vx_domain::config::ProviderAuthConfig {
                    api_key: None,
                    api_key_env: Some("VX_TEST_ABSENT_KEY".into()),
                    base_url: None,
                },
            )]),
            ..Default::default()
        };
        let registry = ProviderRegistry::from_config(&config);
        assert_eq!(registry.init_errors().len(), 1);
        assert_eq!(registry.init_errors()[0].slug, "deepgram");
        assert!(registry.stt("deepgram").is_err());
    }

    #[test]
    fn mask_secrets_hides_long_tokens() {
        let msg = "auth failed for key sk_abcdefghijklmnopqrstuvwxyz123456";
        let masked = mask_secrets(msg);
        assert!(!masked.contains("abcdefghijklmnopqrstuvwxyz"));
        assert!(masked.contains("..."));
    }
}
