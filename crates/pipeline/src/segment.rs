//! Sentence segmentation of the LLM token stream.
//!
//! TTS latency depends on starting synthesis before the model finishes, so
//! tokens are folded into a buffer and cut into utterance units at sentence
//! boundaries: `.` `!` `?` `…`, hard newlines, and explicit pause markers
//! for providers that honor them.

const BOUNDARY_CHARS: [char; 4] = ['.', '!', '?', '…'];

/// Minimum unit length; avoids shipping one-character fragments when more
/// text is clearly coming.
const MIN_UNIT_CHARS: usize = 3;

#[derive(Default)]
pub struct SentenceSegmenter {
    buf: String,
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one token in; returns any utterance units completed by it.
    pub fn push(&mut self, token: &str) -> Vec<String> {
        self.buf.push_str(token);
        self.drain_complete()
    }

    /// Flush whatever remains (end of the token stream).
    pub fn flush(&mut self) -> Option<String> {
        let rest = self.buf.trim().to_string();
        self.buf.clear();
        if rest.is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    /// Discard buffered text (barge-in).
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    fn drain_complete(&mut self) -> Vec<String> {
        let mut units = Vec::new();

        loop {
            let Some(cut) = self.find_boundary() else {
                break;
            };
            let unit: String = self.buf.drain(..cut).collect();
            let unit = unit.trim().to_string();
            if !unit.is_empty() {
                units.push(unit);
            }
        }

        units
    }

    /// Byte index one past the next complete boundary, or None.
    fn find_boundary(&self) -> Option<usize> {
        let mut chars = self.buf.char_indices().peekable();
        while let Some((i, ch)) = chars.next() {
            let end = i + ch.len_utf8();

            if ch == '\n' && end >= MIN_UNIT_CHARS {
                return Some(end);
            }

            if BOUNDARY_CHARS.contains(&ch) && end >= MIN_UNIT_CHARS {
                // Only cut when the boundary is followed by whitespace or
                // more text has arrived past it; a trailing "." may still
                // grow into "..." or an abbreviation.
                match chars.peek() {
                    Some((_, next)) if next.is_whitespace() => return Some(end),
                    Some((_, next)) if !BOUNDARY_CHARS.contains(next) => return Some(end),
                    _ => continue,
                }
            }
        }
        None
    }
}
