//! Streaming speech-to-text adapters.
//!
//! Both adapters speak WebSocket to their provider: an owning task forwards
//! pushed audio as binary frames, signals end-of-utterance with a control
//! message, and translates provider transcripts into [`SttEvent`]s.
//!
//! [`SttEvent`]: vx_domain::stream::SttEvent

pub mod deepgram;
pub mod sarvam;

use std::time::Duration;

/// Stream-open timeout.
pub(crate) const OPEN_TIMEOUT: Duration = Duration::from_secs(3);
