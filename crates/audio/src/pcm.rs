//! Little-endian signed 16-bit mono PCM codec and frame validation.

use vx_domain::{Error, Result};

/// Decode an s16le byte payload into samples. Odd-length payloads are
/// rejected; the wire format requires payloads in multiples of 2 bytes.
pub fn decode_s16le(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(Error::Validation(format!(
            "PCM payload length {} is not a multiple of 2",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect())
}

/// Encode samples back into an s16le byte payload.
pub fn encode_s16le(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Validate an inbound client audio frame: non-empty, even length, and no
/// larger than one chunk. Invalid frames are rejected with a `Validation`
/// error and dropped by the caller.
pub fn validate_client_frame(payload: &[u8], max_bytes: usize) -> Result<()> {
    if payload.is_empty() {
        return Err(Error::Validation("empty audio frame".into()));
    }
    if payload.len() % 2 != 0 {
        return Err(Error::Validation(format!(
            "audio frame length {} is not a multiple of 2",
            payload.len()
        )));
    }
    if payload.len() > max_bytes {
        return Err(Error::Validation(format!(
            "audio frame length {} exceeds chunk size {}",
            payload.len(),
            max_bytes
        )));
    }
    Ok(())
}

/// Normalized RMS audio level (0.0–1.0) of a sample frame.
/// An RMS around 0.3 of full scale is very loud speech.
pub fn audio_level(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64 / i16::MAX as f64;
            v * v
        })
        .sum();
    let rms = (sum_sq / samples.len() as f64).sqrt() as f32;
    (rms / 0.3).min(1.0)
}

/// Raw RMS energy (0.0–1.0 of full scale), used by the VAD threshold checks.
pub fn rms_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64 / i16::MAX as f64;
            v * v
        })
        .sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let samples = vec![0i16, 1, -1, i16::MAX, i16::MIN, 12345];
        let bytes = encode_s16le(&samples);
        assert_eq!(decode_s16le(&bytes).unwrap(), samples);
    }

    #[test]
    fn odd_length_rejected() {
        assert!(decode_s16le(&[0u8, 1, 2]).is_err());
    }

    #[test]
    fn frame_validation() {
        assert!(validate_client_frame(&[], 8192).is_err());
        assert!(validate_client_frame(&[0u8; 3], 8192).is_err());
        assert!(validate_client_frame(&[0u8; 8194], 8192).is_err());
        assert!(validate_client_frame(&[0u8; 8192], 8192).is_ok());
        assert!(validate_client_frame(&[0u8; 640], 8192).is_ok());
    }

    #[test]
    fn silence_has_zero_level() {
        assert_eq!(audio_level(&[0i16; 160]), 0.0);
        assert_eq!(rms_energy(&[]), 0.0);
    }

    #[test]
    fn loud_frame_saturates_level() {
        let loud = vec![i16::MAX / 2; 160];
        assert!(audio_level(&loud) > 0.9);
        assert!(rms_energy(&loud) > 0.4);
    }
}
