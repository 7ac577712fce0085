//! Sarvam TTS adapter (Bulbul voices, Indic languages).
//!
//! The endpoint returns WAV-framed audio; the header is stripped so the
//! pipeline sees raw 22.05 kHz PCM.

use vx_domain::config::ProviderAuthConfig;
use vx_domain::error::{Error, Result};
use vx_domain::stream::BoxStream;

use crate::retry::with_retry;
use crate::traits::{TtsProvider, TtsRequest};
use crate::util::{from_reqwest, status_error};

const DEFAULT_BASE_URL: &str = "https://api.sarvam.ai";
const SAMPLE_RATE: u32 = 22_050;

pub struct SarvamTtsProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl SarvamTtsProvider {
    pub fn from_auth(auth: &ProviderAuthConfig) -> Result<Self> {
        let api_key = auth
            .resolve_key("tts", "sarvam")
            .ok_or_else(|| Error::AuthFailed("sarvam: no API key configured".into()))?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| from_reqwest("sarvam", e))?;
        Ok(Self {
            api_key,
            base_url: auth
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.into())
                .trim_end_matches('/')
                .to_string(),
            client,
        })
    }
}

#[async_trait::async_trait]
impl TtsProvider for SarvamTtsProvider {
    async fn synthesize(&self, req: &TtsRequest) -> Result<BoxStream<'static, Result<Vec<u8>>>> {
        let language = req
            .options
            .get("language")
            .and_then(|v| v.as_str())
            .unwrap_or("en-IN");
        let model = req
            .options
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or("bulbul:v2");
        let url = format!("{}/text-to-speech/stream", self.base_url);
        let body = serde_json::json!({
            "text": req.text,
            "speaker": req.voice_id,
            "target_language_code": language,
            "model": model,
            "speech_sample_rate": SAMPLE_RATE,
        });

        let response = with_retry("sarvam.synthesize", || {
            let url = url.clone();
            let body = body.clone();
            async move {
                let response = self
                    .client
                    .post(&url)
                    .header("api-subscription-key", &self.api_key)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| from_reqwest("sarvam", e))?;
                let status = response.status();
                if !status.is_success() {
                    let text = response.text().await.unwrap_or_default();
                    return Err(status_error("sarvam", status, &text));
                }
                Ok(response)
            }
        })
        .await?;

        // Bulbul emits WAV; strip the header before the pipeline sees it.
        Ok(super::pcm_stream("sarvam", response, true))
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn slug(&self) -> &str {
        "sarvam"
    }
}
