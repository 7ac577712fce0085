//! TTS formatting markers.
//!
//! The LLM is prompted to emit speech-formatting markers only for the
//! selected TTS backend: pauses, prosody (rate/volume), emotion, spelling,
//! and laughter. Backends that do not honor a marker kind must never see it,
//! so assistant text is filtered through [`strip_unsupported`] before each
//! synthesis call.
//!
//! Marker kinds and their surface forms:
//! - `pause`: `<break time="500ms"/>`, `[pause]`, `[pause:500]`
//! - `prosody`: `<prosody rate="slow" volume="loud">…</prosody>` (inner text kept)
//! - `emotion`: `[happy]`, `[sad]`, `[excited]`, `[angry]`, `[calm]`
//! - `spell`: `<spell>…</spell>` (inner text kept)
//! - `laughter`: `[laughs]`, `[laughter]`, `<laugh/>`

use regex::Regex;
use std::sync::OnceLock;

pub const PAUSE: &str = "pause";
pub const PROSODY: &str = "prosody";
pub const EMOTION: &str = "emotion";
pub const SPELL: &str = "spell";
pub const LAUGHTER: &str = "laughter";

struct MarkerPatterns {
    pause: Regex,
    prosody: Regex,
    emotion: Regex,
    spell: Regex,
    laughter: Regex,
}

fn patterns() -> &'static MarkerPatterns {
    static PATTERNS: OnceLock<MarkerPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| MarkerPatterns {
        pause: Regex::new(r#"<break\s[^>]*/>|\[pause(?::\d+)?\]"#).expect("pause regex"),
        prosody: Regex::new(r#"<prosody\b[^>]*>(?s)(.*?)</prosody>"#).expect("prosody regex"),
        emotion: Regex::new(r#"\[(?:happy|sad|excited|angry|calm)\]"#).expect("emotion regex"),
        spell: Regex::new(r#"<spell>(?s)(.*?)</spell>"#).expect("spell regex"),
        laughter: Regex::new(r#"\[laughs?\]|\[laughter\]|<laugh\s*/>"#).expect("laughter regex"),
    })
}

/// Strip every marker kind not present in `supported`. Wrapping markers
/// (`prosody`, `spell`) keep their inner text.
pub fn strip_unsupported(text: &str, supported: &[&str]) -> String {
    let p = patterns();
    let mut out = text.to_string();

    if !supported.contains(&PAUSE) {
        out = p.pause.replace_all(&out, "").into_owned();
    }
    if !supported.contains(&PROSODY) {
        out = p.prosody.replace_all(&out, "$1").into_owned();
    }
    if !supported.contains(&EMOTION) {
        out = p.emotion.replace_all(&out, "").into_owned();
    }
    if !supported.contains(&SPELL) {
        out = p.spell.replace_all(&out, "$1").into_owned();
    }
    if !supported.contains(&LAUGHTER) {
        out = p.laughter.replace_all(&out, "").into_owned();
    }

    collapse_spaces(&out)
}

fn collapse_spaces(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = false;
    for ch in text.chars() {
        if ch == ' ' {
            if !last_space {
                out.push(ch);
            }
            last_space = true;
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_pause_markers() {
        let text = "Hello <break time=\"500ms\"/> there [pause:300] friend";
        assert_eq!(strip_unsupported(text, &[]), "Hello there friend");
    }

    #[test]
    fn keeps_supported_markers() {
        let text = "Hello [pause] there";
        assert_eq!(strip_unsupported(text, &[PAUSE]), "Hello [pause] there");
    }

    #[test]
    fn prosody_keeps_inner_text() {
        let text = "Please <prosody rate=\"slow\">listen carefully</prosody> now";
        assert_eq!(
            strip_unsupported(text, &[]),
            "Please listen carefully now"
        );
    }

    #[test]
    fn spell_keeps_inner_text() {
        let text = "Your code is <spell>AB12</spell>.";
        assert_eq!(strip_unsupported(text, &[]), "Your code is AB12.");
    }

    #[test]
    fn strips_emotion_and_laughter() {
        let text = "[happy] That is great [laughs]";
        assert_eq!(strip_unsupported(text, &[]), "That is great");
    }

    #[test]
    fn plain_text_unchanged() {
        let text = "No markers here.";
        assert_eq!(strip_unsupported(text, &[]), text);
    }
}
