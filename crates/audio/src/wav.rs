//! WAV header handling for provider output.
//!
//! Several TTS backends return RIFF/WAV-framed audio. Clients expect raw PCM
//! only, so the 44-byte canonical header is stripped before emission.

const WAV_HEADER_BYTES: usize = 44;

/// Whether the payload starts with a canonical RIFF/WAVE header.
pub fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

/// Strip a 44-byte WAV header when present; pass raw PCM through unchanged.
pub fn strip_wav_header(bytes: &[u8]) -> &[u8] {
    if is_wav(bytes) && bytes.len() >= WAV_HEADER_BYTES {
        &bytes[WAV_HEADER_BYTES..]
    } else {
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_payload(pcm: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(WAV_HEADER_BYTES + pcm.len());
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + pcm.len() as u32).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes()); // PCM
        out.extend_from_slice(&1u16.to_le_bytes()); // mono
        out.extend_from_slice(&22_050u32.to_le_bytes());
        out.extend_from_slice(&(22_050u32 * 2).to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&(pcm.len() as u32).to_le_bytes());
        out.extend_from_slice(pcm);
        out
    }

    #[test]
    fn strips_header_from_wav() {
        let pcm = [1u8, 2, 3, 4, 5, 6];
        let wav = wav_payload(&pcm);
        assert!(is_wav(&wav));
        assert_eq!(strip_wav_header(&wav), &pcm);
    }

    #[test]
    fn raw_pcm_passes_through() {
        let pcm = [9u8; 64];
        assert!(!is_wav(&pcm));
        assert_eq!(strip_wav_header(&pcm), &pcm);
    }

    #[test]
    fn short_payload_untouched() {
        let short = b"RIFF";
        assert_eq!(strip_wav_header(short), short);
    }
}
