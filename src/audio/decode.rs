//! PCM16 payload decoding.

use crate::error::{EngineError, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// Decode a base64 chunk of little-endian PCM16 into f32 samples in [-1, 1].
pub fn decode_pcm16_base64(payload: &str) -> Result<Vec<f32>> {
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| EngineError::Decode(format!("invalid base64 audio payload: {e}")))?;

    if bytes.len() % 2 != 0 {
        return Err(EngineError::Decode(format!(
            "PCM16 payload has odd length ({} bytes)",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect())
}

/// Playback duration of a sample buffer at the given rate.
pub fn duration_secs(samples: &[f32], sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    samples.len() as f64 / sample_rate as f64
}
