//! Engine adapters: one module per backend family.
//!
//! Each adapter normalizes its backend to the `TtsEngine` contract: bytes
//! in, bytes out, no file ownership. The stub adapter exists so the full
//! scheduler/pipeline stack can be exercised without any real backend.

pub mod http;
pub mod local;
pub mod online;
pub mod stub;
pub mod system;

use crate::error::Result;

/// Render `text` as a silent-ish sine WAV, for adapters that need a
/// deterministic placeholder or calibration payload.
pub(crate) fn synthetic_wav(text: &str, sample_rate: u32, samples_per_char: usize) -> Result<Vec<u8>> {
    use std::io::Cursor;

    let chars = text.chars().filter(|c| !c.is_whitespace()).count().max(1);
    let total = chars * samples_per_char;
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| crate::error::RecitoError::Synthesis(format!("wav encode: {e}")))?;
        for i in 0..total {
            let t = i as f32 / sample_rate as f32;
            let sample = ((t * 220.0 * std::f32::consts::TAU).sin() * 6000.0) as i16;
            writer
                .write_sample(sample)
                .map_err(|e| crate::error::RecitoError::Synthesis(format!("wav encode: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| crate::error::RecitoError::Synthesis(format!("wav encode: {e}")))?;
    }
    Ok(cursor.into_inner())
}
