//! TTS adapters.
//!
//! Every adapter streams a chunked HTTP body of audio bytes. Providers that
//! frame their output as WAV get the 44-byte header stripped before the
//! bytes reach the pipeline; clients only ever see raw PCM.

pub mod cartesia;
pub mod elevenlabs;
pub mod sarvam;

use vx_domain::error::{Error, Result};
use vx_domain::stream::BoxStream;

const WAV_HEADER_BYTES: usize = 44;

/// Turn a chunked HTTP response into a PCM byte stream.
///
/// When `strip_wav` is set, the first 44 bytes of the body are inspected and
/// a RIFF/WAVE header is removed. Header bytes may straddle chunk
/// boundaries, so the stream buffers until it has seen enough to decide.
pub(crate) fn pcm_stream(
    provider: &'static str,
    response: reqwest::Response,
    strip_wav: bool,
) -> BoxStream<'static, Result<Vec<u8>>> {
    let stream = async_stream::stream! {
        let mut response = response;
        let mut header_buf: Vec<u8> = Vec::new();
        let mut header_done = !strip_wav;

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    if header_done {
                        yield Ok(bytes.to_vec());
                        continue;
                    }

                    header_buf.extend_from_slice(&bytes);
                    if header_buf.len() < WAV_HEADER_BYTES {
                        continue;
                    }

                    header_done = true;
                    let rest = vx_audio::strip_wav_header(&header_buf).to_vec();
                    if !rest.is_empty() {
                        yield Ok(rest);
                    }
                    header_buf.clear();
                }
                Ok(None) => {
                    // Body shorter than one header: flush whatever we have.
                    if !header_done && !header_buf.is_empty() {
                        yield Ok(std::mem::take(&mut header_buf));
                    }
                    break;
                }
                Err(e) => {
                    yield Err(Error::ProviderTransient {
                        provider: provider.to_string(),
                        message: e.to_string(),
                    });
                    break;
                }
            }
        }
    };

    Box::pin(stream)
}
