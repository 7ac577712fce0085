//! Audio transport helpers: PCM codec, WAV header stripping, and the
//! energy-based voice-activity detector that drives turn-taking and barge-in.

pub mod pcm;
pub mod vad;
pub mod wav;

pub use pcm::{audio_level, decode_s16le, encode_s16le, validate_client_frame};
pub use vad::{barge_in_threshold, EnergyVad, VadConfig, VadEvent};
pub use wav::strip_wav_header;
