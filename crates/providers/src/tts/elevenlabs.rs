//! ElevenLabs TTS adapter.
//!
//! Streams raw PCM from the `/v1/text-to-speech/{voice}/stream` endpoint at
//! a fixed 22.05 kHz. Honors `<break/>`-style pause markers.

use vx_domain::config::ProviderAuthConfig;
use vx_domain::error::{Error, Result};
use vx_domain::stream::BoxStream;

use crate::markers;
use crate::retry::with_retry;
use crate::traits::{TtsProvider, TtsRequest};
use crate::util::{from_reqwest, status_error};

const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io";
const SAMPLE_RATE: u32 = 22_050;
const DEFAULT_MODEL: &str = "eleven_turbo_v2_5";

pub struct ElevenLabsTtsProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl ElevenLabsTtsProvider {
    pub fn from_auth(auth: &ProviderAuthConfig) -> Result<Self> {
        let api_key = auth
            .resolve_key("tts", "elevenlabs")
            .ok_or_else(|| Error::AuthFailed("elevenlabs: no API key configured".into()))?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| from_reqwest("elevenlabs", e))?;
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
impl TtsProvider for ElevenLabsTtsProvider {
    async fn synthesize(&self, req: &TtsRequest) -> Result<BoxStream<'static, Result<Vec<u8>>>> {
        let model_id = req
            .options
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_MODEL);
        let url = format!(
            "{}/v1/text-to-speech/{}/stream?output_format=pcm_22050",
            self.base_url, req.voice_id
        );
        let body = serde_json::json!({
            "text": req.text,
            "model_id": model_id,
        });

        let response = with_retry("elevenlabs.synthesize", || {
            let url = url.clone();
            let body = body.clone();
            async move {
                let response = self
                    .client
                    .post(&url)
                    .header("xi-api-key", &self.api_key)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| from_reqwest("elevenlabs", e))?;
                let status = response.status();
                if !status.is_success() {
                    let text = response.text().await.unwrap_or_default();
                    return Err(status_error("elevenlabs", status, &text));
                }
                Ok(response)
            }
        })
        .await?;

        // pcm_22050 output is raw samples, no container.
        Ok(super::pcm_stream("elevenlabs", response, false))
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn slug(&self) -> &str {
        "elevenlabs"
    }

    fn supported_markers(&self) -> &'static [&'static str] {
        &[markers::PAUSE]
    }
}
