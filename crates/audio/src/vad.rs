//! Energy-based voice-activity detection.
//!
//! The detector runs on the audio sample clock, not wall time: each processed
//! frame advances it by `frame.len() / sample_rate` seconds. That keeps
//! speech-end detection deterministic regardless of network jitter, and lets
//! tests drive it with synthetic frames.
//!
//! Barge-in uses a separate, sensitivity-scaled threshold (see
//! [`barge_in_threshold`]): sensitivity 0 disables barge-in entirely,
//! sensitivity 1 lowers the threshold to the minimum energy gate so the
//! first qualifying frame triggers.

use crate::pcm::rms_energy;

/// Energy below this is never considered speech, at any sensitivity.
pub const MIN_SPEECH_ENERGY: f32 = 0.01;

/// Barge-in threshold at sensitivity 0 (effectively unreachable).
const BARGE_IN_CEILING: f32 = 0.5;

/// Default speech threshold for turn-taking.
const DEFAULT_SPEECH_THRESHOLD: f32 = 0.02;

#[derive(Debug, Clone)]
pub struct VadConfig {
    pub sample_rate: u32,
    /// Sustained non-speech needed to close a user turn.
    pub silence_timeout_ms: u64,
    /// RMS energy (0.0–1.0 of full scale) above which a frame is speech.
    pub speech_threshold: f32,
}

impl VadConfig {
    pub fn new(sample_rate: u32, silence_timeout_ms: u64) -> Self {
        Self {
            sample_rate,
            silence_timeout_ms,
            speech_threshold: DEFAULT_SPEECH_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// First speech frame after silence.
    SpeechStart,
    /// Silence has persisted for the configured timeout after speech.
    SpeechEnd,
}

/// Stateful frame classifier.
pub struct EnergyVad {
    config: VadConfig,
    in_speech: bool,
    silence_samples: u64,
}

impl EnergyVad {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            in_speech: false,
            silence_samples: 0,
        }
    }

    /// Feed one frame; returns a transition event when one occurs.
    pub fn process(&mut self, frame: &[i16]) -> Option<VadEvent> {
        let energy = rms_energy(frame);
        let is_speech = energy >= self.config.speech_threshold.max(MIN_SPEECH_ENERGY);

        if !self.in_speech {
            if is_speech {
                self.in_speech = true;
                self.silence_samples = 0;
                return Some(VadEvent::SpeechStart);
            }
            return None;
        }

        if is_speech {
            self.silence_samples = 0;
            return None;
        }

        self.silence_samples += frame.len() as u64;
        let silence_ms = self.silence_samples * 1000 / self.config.sample_rate as u64;
        if silence_ms >= self.config.silence_timeout_ms {
            self.in_speech = false;
            self.silence_samples = 0;
            return Some(VadEvent::SpeechEnd);
        }
        None
    }

    pub fn in_speech(&self) -> bool {
        self.in_speech
    }

    /// Reset to the silent state (used when a turn is consumed).
    pub fn reset(&mut self) {
        self.in_speech = false;
        self.silence_samples = 0;
    }
}

/// Barge-in energy threshold for an interruption sensitivity in [0, 1].
///
/// `None` means barge-in is disabled. The threshold interpolates linearly
/// from an unreachable ceiling at sensitivity 0 down to the minimum energy
/// gate at sensitivity 1.
pub fn barge_in_threshold(sensitivity: f32) -> Option<f32> {
    if sensitivity <= 0.0 {
        return None;
    }
    let s = sensitivity.min(1.0);
    Some(BARGE_IN_CEILING - s * (BARGE_IN_CEILING - MIN_SPEECH_ENERGY))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16_000;

    fn loud_frame(len: usize) -> Vec<i16> {
        vec![i16::MAX / 3; len]
    }

    fn silent_frame(len: usize) -> Vec<i16> {
        vec![0i16; len]
    }

    #[test]
    fn speech_start_on_first_loud_frame() {
        let mut vad = EnergyVad::new(VadConfig::new(RATE, 800));
        assert_eq!(vad.process(&silent_frame(1600)), None);
        assert_eq!(vad.process(&loud_frame(1600)), Some(VadEvent::SpeechStart));
        assert!(vad.in_speech());
    }

    #[test]
    fn speech_end_after_silence_timeout() {
        let mut vad = EnergyVad::new(VadConfig::new(RATE, 800));
        vad.process(&loud_frame(1600));
        // 800 ms at 16 kHz is 12800 samples; feed 100 ms frames.
        let mut event = None;
        let mut frames = 0;
        while event.is_none() && frames < 20 {
            event = vad.process(&silent_frame(1600));
            frames += 1;
        }
        assert_eq!(event, Some(VadEvent::SpeechEnd));
        assert_eq!(frames, 8); // exactly 800 ms of silence
        assert!(!vad.in_speech());
    }

    #[test]
    fn interleaved_speech_resets_silence_clock() {
        let mut vad = EnergyVad::new(VadConfig::new(RATE, 800));
        vad.process(&loud_frame(1600));
        for _ in 0..7 {
            assert_eq!(vad.process(&silent_frame(1600)), None);
        }
        // Speech just before the timeout resets the clock.
        assert_eq!(vad.process(&loud_frame(1600)), None);
        for _ in 0..7 {
            assert_eq!(vad.process(&silent_frame(1600)), None);
        }
        assert_eq!(vad.process(&silent_frame(1600)), Some(VadEvent::SpeechEnd));
    }

    #[test]
    fn barge_in_disabled_at_zero() {
        assert_eq!(barge_in_threshold(0.0), None);
        assert_eq!(barge_in_threshold(-1.0), None);
    }

    #[test]
    fn barge_in_threshold_reaches_min_energy_at_one() {
        let t = barge_in_threshold(1.0).unwrap();
        assert!((t - MIN_SPEECH_ENERGY).abs() < 1e-6);
        // Higher sensitivity means lower threshold.
        let half = barge_in_threshold(0.5).unwrap();
        assert!(half > t);
        assert!(half < BARGE_IN_CEILING);
    }
}
