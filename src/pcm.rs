//! PCM16 ↔ f32 conversions at the public boundary.
//!
//! The numeric path inside the engine is f32 in [-1.0, 1.0]; callers speak
//! i16 PCM, same as the capture and playout devices.

/// Convert i16 PCM to f32 in [-1.0, 1.0).
pub fn int16_to_f32(pcm: &[i16]) -> Vec<f32> {
    pcm.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Convert f32 samples back to i16 PCM, clamping to [-1.0, 1.0] first.
pub fn f32_to_int16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&v| (v.clamp(-1.0, 1.0) * 32767.0) as i16)
        .collect()
}
