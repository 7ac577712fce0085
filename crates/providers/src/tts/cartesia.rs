//! Cartesia TTS adapter (Sonic voices).
//!
//! Requests raw `pcm_s16le` output from `/tts/bytes`, so no container
//! stripping is needed.

use vx_domain::config::ProviderAuthConfig;
use vx_domain::error::{Error, Result};
use vx_domain::stream::BoxStream;

use crate::retry::with_retry;
use crate::traits::{TtsProvider, TtsRequest};
use crate::util::{from_reqwest, status_error};

const DEFAULT_BASE_URL: &str = "https://api.cartesia.ai";
const API_VERSION: &str = "2024-06-10";
const SAMPLE_RATE: u32 = 22_050;
const DEFAULT_MODEL: &str = "sonic-english";

pub struct CartesiaTtsProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl CartesiaTtsProvider {
    pub fn from_auth(auth: &ProviderAuthConfig) -> Result<Self> {
        let api_key = auth
            .resolve_key("tts", "cartesia")
            .ok_or_else(|| Error::AuthFailed("cartesia: no API key configured".into()))?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| from_reqwest("cartesia", e))?;
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
impl TtsProvider for CartesiaTtsProvider {
    async fn synthesize(&self, req: &TtsRequest) -> Result<BoxStream<'static, Result<Vec<u8>>>> {
        let model_id = req
            .options
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_MODEL);
        let url = format!("{}/tts/bytes", self.base_url);
        let body = serde_json::json!({
            "model_id": model_id,
            "transcript": req.text,
            "voice": { "mode": "id", "id": req.voice_id },
            "output_format": {
                "container": "raw",
                "encoding": "pcm_s16le",
                "sample_rate": SAMPLE_RATE,
            },
        });

        let response = with_retry("cartesia.synthesize", || {
            let url = url.clone();
            let body = body.clone();
            async move {
                let response = self
                    .client
                    .post(&url)
                    .header("X-API-Key", &self.api_key)
                    .header("Cartesia-Version", API_VERSION)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| from_reqwest("cartesia", e))?;
                let status = response.status();
                if !status.is_success() {
                    let text = response.text().await.unwrap_or_default();
                    return Err(status_error("cartesia", status, &text));
                }
                Ok(response)
            }
        })
        .await?;

        Ok(super::pcm_stream("cartesia", response, false))
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn slug(&self) -> &str {
        "cartesia"
    }
}
