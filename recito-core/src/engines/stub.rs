//! `StubEngine` — placeholder backend that emits deterministic WAV audio.
//!
//! Used by the test suite and during development so the scheduler, pipeline,
//! estimator, and post-processor can be exercised end-to-end without any
//! real TTS backend. Optionally simulates per-character latency, synthesis
//! failure, and sentence-level timing data.

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::debug;

use crate::audio::{AudioFormat, SynthesisResult};
use crate::config::VoiceConfig;
use crate::engine::descriptor::{
    EngineDescriptor, EngineKind, EngineStatus, ParameterSchema, VoiceFilter, VoiceInfo,
};
use crate::engine::mapping::VoiceMapper;
use crate::engine::{validate_with_mapping, TtsEngine};
use crate::engines::synthetic_wav;
use crate::error::{RecitoError, Result};

pub struct StubEngine {
    descriptor: EngineDescriptor,
    status: EngineStatus,
    mapper: VoiceMapper,
    /// Simulated synthesis latency per non-blank character.
    delay_per_char: Duration,
    fail_message: Option<String>,
    synth_count: u32,
}

impl StubEngine {
    pub fn new() -> Self {
        Self::named("stub")
    }

    pub fn named(id: &str) -> Self {
        let descriptor = EngineDescriptor {
            id: id.into(),
            display_name: format!("Stub ({id})"),
            version: "0.0.0".into(),
            kind: EngineKind::LocalModel,
            supported_languages: BTreeSet::from(["zh-CN".to_string(), "en-US".to_string()]),
            supported_formats: BTreeSet::from([AudioFormat::Wav]),
            is_online: false,
            requires_auth: false,
            parameter_schema: ParameterSchema::default(),
            default_voice_id: "stub-voice".into(),
            fallback_voice_id: "stub-voice".into(),
            emits_format: AudioFormat::Wav,
            provides_timing_data: false,
        };
        Self {
            descriptor,
            status: EngineStatus::default(),
            mapper: VoiceMapper::new(),
            delay_per_char: Duration::ZERO,
            fail_message: None,
            synth_count: 0,
        }
    }

    pub fn with_delay_per_char(mut self, delay: Duration) -> Self {
        self.delay_per_char = delay;
        self
    }

    /// Emit per-sentence SRT timing data with every result.
    pub fn with_timing_data(mut self) -> Self {
        self.descriptor.provides_timing_data = true;
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.fail_message = Some(message.into());
        self
    }

    pub fn synth_count(&self) -> u32 {
        self.synth_count
    }

    fn default_voices() -> Vec<VoiceInfo> {
        vec![
            VoiceInfo {
                id: "stub-voice".into(),
                name: "Stub Voice".into(),
                language: "zh-CN".into(),
                gender: "female".into(),
                quality: "medium".into(),
                ..VoiceInfo::default()
            },
            VoiceInfo {
                id: "stub-voice-en".into(),
                name: "Stub Voice (English)".into(),
                language: "en-US".into(),
                gender: "male".into(),
                quality: "medium".into(),
                ..VoiceInfo::default()
            },
        ]
    }

    fn sentence_cues(text: &str) -> Vec<crate::audio::subtitle::SubtitleCue> {
        let mut cues = Vec::new();
        let mut current = String::new();
        let mut start = 0.0f64;
        for ch in text.chars() {
            current.push(ch);
            if matches!(ch, '。' | '.' | '!' | '?' | '！' | '？') {
                let trimmed = current.trim().to_string();
                if !trimmed.is_empty() {
                    cues.push(crate::audio::subtitle::SubtitleCue::new(
                        start,
                        start + 1.0,
                        trimmed,
                    ));
                    start += 1.0;
                }
                current.clear();
            }
        }
        let tail = current.trim().to_string();
        if !tail.is_empty() {
            cues.push(crate::audio::subtitle::SubtitleCue::new(
                start,
                start + 1.0,
                tail,
            ));
        }
        cues
    }
}

impl Default for StubEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TtsEngine for StubEngine {
    fn init(&mut self) -> Result<()> {
        self.status = EngineStatus::available(Self::default_voices());
        Ok(())
    }

    fn list_voices(&mut self, filter: Option<&VoiceFilter>) -> Result<Vec<VoiceInfo>> {
        let voices = Self::default_voices();
        Ok(match filter {
            Some(f) => voices.into_iter().filter(|v| f.matches(v)).collect(),
            None => voices,
        })
    }

    fn validate(&mut self, config: &VoiceConfig) -> Result<VoiceConfig> {
        validate_with_mapping(config, &self.descriptor, &Self::default_voices(), &self.mapper)
    }

    fn synthesize(&mut self, text: &str, _config: &VoiceConfig) -> Result<SynthesisResult> {
        if let Some(message) = &self.fail_message {
            return Err(RecitoError::Synthesis(message.clone()));
        }
        let chars = text.chars().filter(|c| !c.is_whitespace()).count();
        if !self.delay_per_char.is_zero() {
            std::thread::sleep(self.delay_per_char * chars.max(1) as u32);
        }
        self.synth_count += 1;
        debug!(engine = %self.descriptor.id, chars, "stub synthesis");

        // 1600 samples/char at 16 kHz = 0.1 s of audio per character.
        let mut result = SynthesisResult::from_bytes(synthetic_wav(text, 16_000, 1_600)?);
        if self.descriptor.provides_timing_data {
            let cues = Self::sentence_cues(text);
            if !cues.is_empty() {
                result.srt_content = Some(crate::audio::subtitle::render_srt(&cues));
            }
        }
        Ok(result)
    }

    fn describe(&self) -> EngineDescriptor {
        self.descriptor.clone()
    }

    fn status(&self) -> EngineStatus {
        self.status.clone()
    }

    fn close(&mut self) {
        self.status = EngineStatus::default();
    }
}
