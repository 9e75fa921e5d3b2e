//! Request-side configuration: what to synthesize and how to write it out.

pub mod naming;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::audio::AudioFormat;

/// Immutable synthesis request parameters for one task.
///
/// `voice_name` is opaque to the core; only the chosen engine interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct VoiceConfig {
    pub engine_id: String,
    pub voice_name: String,
    /// Speed multiplier in [0.1, 3.0]; 1.0 = natural.
    pub rate: f32,
    /// Semitone-like offset in [-50, +50]; engine-specific mapping.
    pub pitch: f32,
    /// Gain in [0.0, 2.0]; 1.0 = unchanged.
    pub volume: f32,
    /// BCP-47-ish tag, e.g. `zh-CN`.
    pub language: String,
    pub output_format: AudioFormat,
    /// Only consumed by engines declaring emotion capability.
    pub emotion: String,
    /// Engine-specific knobs, enumerated by that engine's parameter schema.
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            engine_id: String::new(),
            voice_name: String::new(),
            rate: 1.0,
            pitch: 0.0,
            volume: 1.0,
            language: "zh-CN".into(),
            output_format: AudioFormat::Wav,
            emotion: String::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl VoiceConfig {
    /// All numeric ranges hold and the identifying fields are non-empty.
    pub fn is_valid(&self) -> bool {
        (0.1..=3.0).contains(&self.rate)
            && (-50.0..=50.0).contains(&self.pitch)
            && (0.0..=2.0).contains(&self.volume)
            && !self.engine_id.is_empty()
            && !self.voice_name.is_empty()
            && !self.language.is_empty()
    }

    /// First violated constraint, for error messages.
    pub fn first_violation(&self) -> Option<String> {
        if self.engine_id.is_empty() {
            return Some("engineId must not be empty".into());
        }
        if self.voice_name.is_empty() {
            return Some("voiceName must not be empty".into());
        }
        if self.language.is_empty() {
            return Some("language must not be empty".into());
        }
        if !(0.1..=3.0).contains(&self.rate) {
            return Some(format!("rate {} outside [0.1, 3.0]", self.rate));
        }
        if !(-50.0..=50.0).contains(&self.pitch) {
            return Some(format!("pitch {} outside [-50, 50]", self.pitch));
        }
        if !(0.0..=2.0).contains(&self.volume) {
            return Some(format!("volume {} outside [0.0, 2.0]", self.volume));
        }
        None
    }
}

/// File-naming strategies for produced audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingMode {
    ChapterNumberTitle,
    NumberTitle,
    TitleOnly,
    NumberOnly,
    OriginalFilename,
    Custom,
}

/// Subtitle sidecar container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleFormat {
    Srt,
    Lrc,
    Vtt,
    Ass,
    Ssa,
}

impl SubtitleFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Srt => "srt",
            Self::Lrc => "lrc",
            Self::Vtt => "vtt",
            Self::Ass => "ass",
            Self::Ssa => "ssa",
        }
    }
}

/// How results are written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct OutputConfig {
    /// Absolute output directory; created on first use.
    pub output_dir: PathBuf,
    pub format: AudioFormat,
    /// Target bitrate in kbit/s, passed to the transcoder.
    pub bitrate: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub merge_files: bool,
    pub merge_filename: String,
    pub normalize: bool,
    pub chapter_markers: bool,
    /// Silence inserted between merged chapters, seconds.
    pub chapter_interval: u32,
    pub naming_mode: NamingMode,
    pub custom_template: String,
    pub name_length_limit: usize,
    pub generate_subtitle: bool,
    pub subtitle_format: SubtitleFormat,
    pub subtitle_encoding: String,
    /// Applied to every cue timestamp, seconds.
    pub subtitle_offset: f64,
    pub subtitle_style: BTreeMap<String, String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            format: AudioFormat::Wav,
            bitrate: 128,
            sample_rate: 22_050,
            channels: 1,
            merge_files: false,
            merge_filename: "merged".into(),
            normalize: false,
            chapter_markers: false,
            chapter_interval: 2,
            naming_mode: NamingMode::ChapterNumberTitle,
            custom_template: String::new(),
            name_length_limit: 50,
            generate_subtitle: false,
            subtitle_format: SubtitleFormat::Srt,
            subtitle_encoding: "utf-8".into(),
            subtitle_offset: 0.0,
            subtitle_style: BTreeMap::new(),
        }
    }
}

impl OutputConfig {
    /// Clamp out-of-range values to their nearest legal bound.
    pub fn normalize_values(&mut self) {
        self.bitrate = self.bitrate.clamp(8, 512);
        self.sample_rate = self.sample_rate.clamp(8_000, 192_000);
        self.channels = self.channels.clamp(1, 2);
        self.name_length_limit = self.name_length_limit.clamp(8, 255);
        if self.merge_filename.trim().is_empty() {
            self.merge_filename = "merged".into();
        }
        let enc = self.subtitle_encoding.trim().to_ascii_lowercase();
        self.subtitle_encoding = if enc.is_empty() { "utf-8".into() } else { enc };
    }
}

/// Chapter descriptor handed in with each request by the text extractor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterInfo {
    pub number: u32,
    pub title: String,
    /// Zero-based position within the batch.
    pub index: usize,
    pub original_filename: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> VoiceConfig {
        VoiceConfig {
            engine_id: "online_voice".into(),
            voice_name: "zh-CN-XiaoxiaoNeural".into(),
            ..VoiceConfig::default()
        }
    }

    #[test]
    fn default_ranges_are_valid_once_identity_is_set() {
        assert!(valid_config().is_valid());
        assert!(valid_config().first_violation().is_none());
    }

    #[test]
    fn out_of_range_rate_is_rejected() {
        let mut config = valid_config();
        config.rate = 3.5;
        assert!(!config.is_valid());
        assert!(config.first_violation().unwrap().contains("rate"));
    }

    #[test]
    fn empty_identity_fields_are_rejected() {
        let mut config = valid_config();
        config.voice_name.clear();
        assert!(!config.is_valid());
    }

    #[test]
    fn voice_config_round_trips_through_json() {
        let mut config = valid_config();
        config
            .extra
            .insert("styleDegree".into(), serde_json::json!(1.2));
        let json = serde_json::to_string(&config).expect("serialize");
        let back: VoiceConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(config, back);
    }

    #[test]
    fn output_config_normalization_clamps_bounds() {
        let mut config = OutputConfig {
            bitrate: 4,
            channels: 7,
            merge_filename: "  ".into(),
            subtitle_encoding: "UTF-8".into(),
            ..OutputConfig::default()
        };
        config.normalize_values();
        assert_eq!(config.bitrate, 8);
        assert_eq!(config.channels, 2);
        assert_eq!(config.merge_filename, "merged");
        assert_eq!(config.subtitle_encoding, "utf-8");
    }
}
