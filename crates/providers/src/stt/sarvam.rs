//! Sarvam streaming STT adapter (Saarika models, Indic languages).
//!
//! Same task shape as the Deepgram adapter: binary audio frames out, JSON
//! transcript frames in, an `{"event":"end"}` control message to flush.

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

use vx_domain::config::ProviderAuthConfig;
use vx_domain::error::{Error, Result};
use vx_domain::stream::SttEvent;

use crate::retry::with_retry;
use crate::traits::{SttInput, SttProvider, SttStreamHandle, SttStreamRequest};

const DEFAULT_BASE_URL: &str = "wss://api.sarvam.ai";

pub struct SarvamSttProvider {
    api_key: String,
    base_url: String,
}

impl SarvamSttProvider {
    pub fn from_auth(auth: &ProviderAuthConfig) -> Result<Self> {
        let api_key = auth
            .resolve_key("stt", "sarvam")
            .ok_or_else(|| Error::AuthFailed("sarvam: no API key configured".into()))?;
        Ok(Self {
            api_key,
            base_url: auth
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.into()),
        })
    }

    fn stream_url(&self, req: &SttStreamRequest) -> String {
        let model = req
            .options
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or("saarika:v2");
        format!(
            "{}/speech-to-text/streaming?language-code={}&model={}&sample-rate={}",
            self.base_url.trim_end_matches('/'),
            req.language,
            model,
            req.sample_rate,
        )
    }
}

#[async_trait::async_trait]
impl SttProvider for SarvamSttProvider {
    async fn open_stream(&self, req: SttStreamRequest) -> Result<SttStreamHandle> {
        let url = self.stream_url(&req);
        let api_key = self.api_key.clone();

        let socket = with_retry("sarvam.open_stream", || {
            let url = url.clone();
            let api_key = api_key.clone();
            async move {
                let mut request = url
                    .into_client_request()
                    .map_err(|e| Error::Internal(format!("sarvam url: {e}")))?;
                request.headers_mut().insert(
                    "api-subscription-key",
                    api_key
                        .parse()
                        .map_err(|_| Error::AuthFailed("sarvam: key is not header-safe".into()))?,
                );

                match tokio::time::timeout(super::OPEN_TIMEOUT, connect_async(request)).await {
                    Ok(Ok((socket, _))) => Ok(socket),
                    Ok(Err(e)) => Err(Error::ProviderTransient {
                        provider: "sarvam".into(),
                        message: e.to_string(),
                    }),
                    Err(_) => Err(Error::Timeout("sarvam: stream open".into())),
                }
            }
        })
        .await?;

        let (handle, mut input_rx, event_tx) = SttStreamHandle::channels(32);
        let (mut ws_sink, mut ws_stream) = socket.split();

        tokio::spawn(async move {
            let mut flushing = false;
            loop {
                tokio::select! {
                    input = input_rx.recv(), if !flushing => {
                        match input {
                            Some(SttInput::Audio(pcm)) => {
                                if ws_sink.send(Message::Binary(pcm)).await.is_err() {
                                    let _ = event_tx.send(Err(Error::ProviderTransient {
                                        provider: "sarvam".into(),
                                        message: "socket closed while pushing audio".into(),
                                    })).await;
                                    break;
                                }
                            }
                            Some(SttInput::EndOfUtterance) => {
                                let _ = ws_sink.send(Message::Text(r#"{"event":"end"}"#.into())).await;
                                flushing = true;
                            }
                            None => break,
                        }
                    }
                    frame = ws_stream.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                if let Some(event) = parse_result(&text) {
                                    let is_final = event.is_final;
                                    if event_tx.send(Ok(event)).await.is_err() {
                                        break;
                                    }
                                    if is_final && flushing {
                                        break;
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                let _ = event_tx.send(Err(Error::ProviderTransient {
                                    provider: "sarvam".into(),
                                    message: e.to_string(),
                                })).await;
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(handle)
    }

    fn slug(&self) -> &str {
        "sarvam"
    }
}

/// Parse one Sarvam transcript frame: `{"transcript": "...", "type":
/// "partial"|"final", "language_code": "hi-IN"}`.
fn parse_result(raw: &str) -> Option<SttEvent> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let text = value.get("transcript")?.as_str()?.to_string();
    if text.is_empty() {
        return None;
    }
    Some(SttEvent {
        text,
        is_final: value.get("type").and_then(|v| v.as_str()) == Some("final"),
        confidence: None,
        language: value
            .get("language_code")
            .and_then(|v| v.as_str())
            .map(String::from),
    })
}
