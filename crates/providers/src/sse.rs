//! Shared SSE streaming infrastructure for the LLM adapters.
//!
//! OpenAI-compatible endpoints stream tokens as server-sent events: the
//! adapter receives a `reqwest::Response`, buffers chunks, splits on `\n\n`,
//! extracts `data:` payloads, and feeds each payload to a provider-specific
//! parser that returns `Vec<Result<LlmEvent>>`.

use vx_domain::error::{Error, Result};
use vx_domain::stream::{BoxStream, LlmEvent};

/// Extract complete `data:` payloads from an SSE buffer.
///
/// Events are framed by a blank line. Complete events are split off the
/// front of the buffer (delimiter included) and reduced to their `data:`
/// payloads; `event:`, `id:`, and `retry:` lines are dropped. A trailing
/// partial event stays buffered until the next network chunk lands.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();

    while let Some(frame_end) = buffer.find("\n\n") {
        let event: String = buffer.drain(..frame_end + 2).collect();
        payloads.extend(event.lines().filter_map(|line| {
            let payload = line.trim().strip_prefix("data:")?.trim();
            (!payload.is_empty()).then(|| payload.to_string())
        }));
    }

    payloads
}

/// Build a token stream from an SSE `reqwest::Response` and a parser closure.
///
/// The closure receives each `data:` payload and returns zero or more events.
/// It is `FnMut` because tool-call assembly needs state across payloads.
/// A fallback `Done` is emitted if the parser never produced one.
pub(crate) fn sse_response_stream<F>(
    response: reqwest::Response,
    mut parse_data: F,
) -> BoxStream<'static, Result<LlmEvent>>
where
    F: FnMut(&str) -> Vec<Result<LlmEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut done_emitted = false;

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));

                    for data in drain_data_lines(&mut buffer) {
                        for event in parse_data(&data) {
                            if matches!(&event, Ok(LlmEvent::Done { .. })) {
                                done_emitted = true;
                            }
                            yield event;
                        }
                    }
                }
                Ok(None) => {
                    // Body closed -- flush any remaining partial event.
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for data in drain_data_lines(&mut buffer) {
                            for event in parse_data(&data) {
                                if matches!(&event, Ok(LlmEvent::Done { .. })) {
                                    done_emitted = true;
                                }
                                yield event;
                            }
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(Error::Http(e.to_string()));
                    break;
                }
            }
        }

        if !done_emitted {
            yield Ok(LlmEvent::Done { usage: None });
        }
    };

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_events_yield_their_payloads() {
        let mut buf = String::from("data: one\n\nevent: message\ndata: {\"t\":2}\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["one", "{\"t\":2}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_event_waits_for_the_next_chunk() {
        let mut buf = String::from("data: whole\n\ndata: torn in ha");
        assert_eq!(drain_data_lines(&mut buf), vec!["whole"]);
        assert_eq!(buf, "data: torn in ha");

        // The rest of the event arrives with the next network chunk.
        buf.push_str("lf\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["torn in half"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn only_data_lines_survive() {
        let mut buf =
            String::from("event: ping\nid: 42\nretry: 5000\ndata: payload\ndata: \n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["payload"]);
    }

    #[test]
    fn done_sentinel_and_padding_are_kept_intact() {
        let mut buf = String::from("data:   [DONE]  \n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["[DONE]"]);
    }

    #[test]
    fn empty_buffer_yields_nothing() {
        let mut buf = String::new();
        assert!(drain_data_lines(&mut buf).is_empty());
        assert!(buf.is_empty());
    }
}
