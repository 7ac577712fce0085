//! Conversation-history bounds.
//!
//! History is append-only; what gets *submitted* to the LLM is bounded by
//! entry count, truncated at the head. The system prompt (first entry) is
//! always kept.

use vx_domain::session::{ChatEntry, ChatRole, MAX_HISTORY_ENTRIES};

/// Marker appended to an assistant entry cut short by barge-in.
pub const INTERRUPTED_MARKER: &str = "[interrupted]";

/// The window of history submitted to the LLM: the system prompt plus the
/// most recent [`MAX_HISTORY_ENTRIES`] entries.
pub fn context_window(history: &[ChatEntry]) -> Vec<ChatEntry> {
    let Some(first) = history.first() else {
        return Vec::new();
    };

    let body_start = usize::from(first.role == ChatRole::System);
    let body = &history[body_start..];

    let mut window = Vec::with_capacity(MAX_HISTORY_ENTRIES + 1);
    if first.role == ChatRole::System {
        window.push(first.clone());
    }
    let keep_from = body.len().saturating_sub(MAX_HISTORY_ENTRIES);
    window.extend_from_slice(&body[keep_from..]);
    window
}

/// An assistant entry for text interrupted by barge-in.
pub fn interrupted_entry(partial_text: &str) -> ChatEntry {
    let content = if partial_text.is_empty() {
        INTERRUPTED_MARKER.to_string()
    } else {
        format!("{partial_text} {INTERRUPTED_MARKER}")
    };
    ChatEntry::new(ChatRole::Assistant, content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(n: usize) -> Vec<ChatEntry> {
        let mut history = vec![ChatEntry::new(ChatRole::System, "prompt")];
        for i in 0..n {
            history.push(ChatEntry::new(ChatRole::User, format!("m{i}")));
        }
        history
    }

    #[test]
    fn short_history_passes_through() {
        let history = entries(5);
        let window = context_window(&history);
        assert_eq!(window.len(), 6);
        assert_eq!(window[0].role, ChatRole::System);
    }

    #[test]
    fn long_history_truncates_head_keeping_system() {
        let history = entries(100);
        let window = context_window(&history);
        assert_eq!(window.len(), MAX_HISTORY_ENTRIES + 1);
        assert_eq!(window[0].role, ChatRole::System);
        // The newest entry survives.
        assert_eq!(window.last().unwrap().content, "m99");
        // The oldest kept body entry is the cut point.
        assert_eq!(window[1].content, format!("m{}", 100 - MAX_HISTORY_ENTRIES));
    }

    #[test]
    fn empty_history() {
        assert!(context_window(&[]).is_empty());
    }

    #[test]
    fn interrupted_entry_suffixes_marker() {
        let entry = interrupted_entry("I was saying");
        assert_eq!(entry.content, "I was saying [interrupted]");
        assert_eq!(entry.role, ChatRole::Assistant);

        let empty = interrupted_entry("");
        assert_eq!(empty.content, "[interrupted]");
    }
}
