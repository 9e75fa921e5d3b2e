//! Audio container handling: format identification and synthesis results.
//!
//! Engines return raw bytes; nothing here decodes audio. Format identification
//! is a magic-byte sniff so the post-processor can decide whether the bytes can
//! be written verbatim or must go through the external transcoder.

pub mod post;
pub mod subtitle;
pub mod transcode;

use std::fmt;
use std::io::Cursor;

use serde::{Deserialize, Serialize};

/// Audio container formats the pipeline can emit or detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Mp3,
    Ogg,
    M4a,
    Flac,
    Aac,
    Unknown,
}

impl AudioFormat {
    /// File extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::Ogg => "ogg",
            Self::M4a => "m4a",
            Self::Flac => "flac",
            Self::Aac => "aac",
            Self::Unknown => "bin",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "wav" => Self::Wav,
            "mp3" => Self::Mp3,
            "ogg" => Self::Ogg,
            "m4a" => Self::M4a,
            "flac" => Self::Flac,
            "aac" => Self::Aac,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Identify a container format from leading magic bytes.
///
/// Total on all byte sequences: anything unrecognised (including empty input)
/// is `AudioFormat::Unknown`.
pub fn detect_format(data: &[u8]) -> AudioFormat {
    if data.len() < 4 {
        return AudioFormat::Unknown;
    }

    if data.starts_with(b"ID3") {
        return AudioFormat::Mp3;
    }
    if data.starts_with(b"RIFF") {
        return AudioFormat::Wav;
    }
    if data.starts_with(b"OggS") {
        return AudioFormat::Ogg;
    }
    if data.starts_with(b"fLaC") {
        return AudioFormat::Flac;
    }
    // MP4 family: 4-byte size field then "ftyp".
    if data.len() >= 12 && &data[4..8] == b"ftyp" {
        return AudioFormat::M4a;
    }
    // Raw ADTS AAC: syncword 0xFFF with layer bits 01/1001.
    if data[0] == 0xFF && (data[1] == 0xF1 || data[1] == 0xF9) {
        return AudioFormat::Aac;
    }
    // MPEG audio frame sync without ID3 tag.
    if data[0] == 0xFF && (data[1] & 0xE0) == 0xE0 {
        return AudioFormat::Mp3;
    }

    AudioFormat::Unknown
}

/// What an engine adapter hands back from one synthesis call.
///
/// Success/failure is the surrounding `Result`; this struct only exists on the
/// success path. `srt_content` is populated by engines whose descriptor
/// declares `provides_timing_data`.
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    pub audio: Vec<u8>,
    pub detected_format: AudioFormat,
    pub duration_s: Option<f64>,
    pub sample_rate: Option<u32>,
    pub bit_depth: Option<u16>,
    pub channels: Option<u16>,
    pub srt_content: Option<String>,
}

impl SynthesisResult {
    /// Wrap raw engine bytes, sniffing the container format.
    pub fn from_bytes(audio: Vec<u8>) -> Self {
        let detected_format = detect_format(&audio);
        let mut result = Self {
            audio,
            detected_format,
            duration_s: None,
            sample_rate: None,
            bit_depth: None,
            channels: None,
            srt_content: None,
        };
        if detected_format == AudioFormat::Wav {
            result.probe_wav();
        }
        result
    }

    pub fn has_srt(&self) -> bool {
        self.srt_content.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Fill duration/rate/depth/channels from the WAV header when possible.
    fn probe_wav(&mut self) {
        let Ok(reader) = hound::WavReader::new(Cursor::new(&self.audio)) else {
            return;
        };
        let spec = reader.spec();
        self.sample_rate = Some(spec.sample_rate);
        self.bit_depth = Some(spec.bits_per_sample);
        self.channels = Some(spec.channels);
        if spec.sample_rate > 0 {
            self.duration_s = Some(f64::from(reader.duration()) / f64::from(spec.sample_rate));
        }
    }
}
