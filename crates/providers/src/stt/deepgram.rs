//! Deepgram streaming STT adapter.
//!
//! Transport: a WebSocket to `/v1/listen` with `encoding=linear16`. Audio is
//! forwarded as binary frames; `{"type":"CloseStream"}` flushes the final
//! transcript. Results arrive as JSON with `channel.alternatives[0]`.

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

use vx_domain::config::ProviderAuthConfig;
use vx_domain::error::{Error, Result};
use vx_domain::stream::SttEvent;

use crate::retry::with_retry;
use crate::traits::{SttInput, SttProvider, SttStreamHandle, SttStreamRequest};

const DEFAULT_BASE_URL: &str = "wss://api.deepgram.com";

pub struct DeepgramSttProvider {
    api_key: String,
    base_url: String,
}

impl DeepgramSttProvider {
    pub fn from_auth(auth: &ProviderAuthConfig) -> Result<Self> {
        let api_key = auth
            .resolve_key("stt", "deepgram")
            .ok_or_else(|| Error::AuthFailed("deepgram: no API key configured".into()))?;
        Ok(Self {
            api_key,
            base_url: auth
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.into()),
        })
    }

    fn listen_url(&self, req: &SttStreamRequest) -> String {
        format!(
            "{}/v1/listen?encoding=linear16&sample_rate={}&channels=1&language={}&interim_results=true&punctuate=true",
            self.base_url.trim_end_matches('/'),
            req.sample_rate,
            req.language,
        )
    }
}

#[async_trait::async_trait]
impl SttProvider for DeepgramSttProvider {
    async fn open_stream(&self, req: SttStreamRequest) -> Result<SttStreamHandle> {
        let url = self.listen_url(&req);
        let api_key = self.api_key.clone();

        let socket = with_retry("deepgram.open_stream", || {
            let url = url.clone();
            let api_key = api_key.clone();
            async move {
                let mut request = url
                    .into_client_request()
                    .map_err(|e| Error::Internal(format!("deepgram url: {e}")))?;
                request.headers_mut().insert(
                    "Authorization",
                    format!("Token {api_key}").parse().map_err(|_| {
                        Error::AuthFailed("deepgram: key is not header-safe".into())
                    })?,
                );

                let connect = connect_async(request);
                match tokio::time::timeout(super::OPEN_TIMEOUT, connect).await {
                    Ok(Ok((socket, _response))) => Ok(socket),
                    Ok(Err(e)) => Err(Error::ProviderTransient {
                        provider: "deepgram".into(),
                        message: e.to_string(),
                    }),
                    Err(_) => Err(Error::Timeout("deepgram: stream open".into())),
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
                                        provider: "deepgram".into(),
                                        message: "socket closed while pushing audio".into(),
                                    })).await;
                                    break;
                                }
                            }
                            Some(SttInput::EndOfUtterance) => {
                                let close = r#"{"type":"CloseStream"}"#;
                                let _ = ws_sink.send(Message::Text(close.into())).await;
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
                                    provider: "deepgram".into(),
                                    message: e.to_string(),
                                })).await;
                                break;
                            }
                        }
                    }
                }
            }
            tracing::debug!("deepgram stream task finished");
        });

        Ok(handle)
    }

    fn slug(&self) -> &str {
        "deepgram"
    }
}

/// Parse one Deepgram result frame. Keepalive and empty-transcript frames
/// yield nothing.
fn parse_result(raw: &str) -> Option<SttEvent> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let alternative = value
        .get("channel")?
        .get("alternatives")?
        .get(0)?;
    let text = alternative.get("transcript")?.as_str()?.to_string();
    if text.is_empty() {
        return None;
    }
    Some(SttEvent {
        text,
        is_final: value.get("is_final").and_then(|v| v.as_bool()).unwrap_or(false),
        confidence: alternative
            .get("confidence")
            .and_then(|v| v.as_f64())
            .map(|c| c as f32),
        language: value
            .get("detected_language")
            .and_then(|v| v.as_str())
            .map(String::from),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_interim_result() {
        let raw = r#"{
            "is_final": false,
            "channel": { "alternatives": [ { "transcript": "hello wor", "confidence": 0.82 } ] }
        }"#;
        let event = parse_result(raw).unwrap();
        assert_eq!(event.text, "hello wor");
        assert!(!event.is_final);
        assert!(event.confidence.unwrap() > 0.8);
    }

    #[test]
    fn parses_final_with_language() {
        let raw = r#"{
            "is_final": true,
            "detected_language": "en",
            "channel": { "alternatives": [ { "transcript": "hello world" } ] }
        }"#;
        let event = parse_result(raw).unwrap();
        assert!(event.is_final);
        assert_eq!(event.language.as_deref(), Some("en"));
    }

    #[test]
    fn skips_empty_and_keepalive_frames() {
        let empty = r#"{"is_final": false, "channel": {"alternatives": [{"transcript": ""}]}}"#;
        assert!(parse_result(empty).is_none());
        assert!(parse_result(r#"{"type":"Metadata"}"#).is_none());
        assert!(parse_result("not json").is_none());
    }
}
