//! Engine abstraction.
//!
//! The `TtsEngine` trait decouples the batch pipeline from any specific
//! backend (local model inference, the OS speech API, HTTP services).
//!
//! `&mut self` on `synthesize` intentionally expresses that backends are
//! stateful — loaded model handles, HTTP connection pools, OS speech objects.
//! All mutation is therefore serialised through `EngineHandle`'s
//! `parking_lot::Mutex`; an engine is only ever driven by one call at a time.

pub mod catalog;
pub mod descriptor;
pub mod mapping;
pub mod registry;

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::audio::SynthesisResult;
use crate::config::VoiceConfig;
use crate::error::{RecitoError, Result};
use descriptor::{EngineDescriptor, EngineStatus, VoiceFilter, VoiceInfo};
use mapping::VoiceMapper;

/// Contract every backend adapter implements.
pub trait TtsEngine: Send + 'static {
    /// Load models, open sockets. Idempotent; moves status from
    /// Unavailable/Loading to Available, or to Error.
    fn init(&mut self) -> Result<()>;

    /// Enumerate voices, optionally filtered. Implementations cache the
    /// underlying enumeration.
    fn list_voices(&mut self, filter: Option<&VoiceFilter>) -> Result<Vec<VoiceInfo>>;

    /// Check parameter ranges and rewrite the voice id for this engine if it
    /// is unknown here (mapping, then the engine's fallback voice). Never
    /// fails on an unknown voice, only on range violations.
    fn validate(&mut self, config: &VoiceConfig) -> Result<VoiceConfig>;

    /// Produce audio bytes for `text`. Never writes files; the caller owns
    /// persistence. The result's `detected_format` is a magic-byte sniff of
    /// the emitted bytes.
    fn synthesize(&mut self, text: &str, config: &VoiceConfig) -> Result<SynthesisResult>;

    fn describe(&self) -> EngineDescriptor;

    fn status(&self) -> EngineStatus;

    /// Release resources; safe to call in any state.
    fn close(&mut self);
}

/// Thread-safe reference-counted handle to any `TtsEngine` implementor.
///
/// `parking_lot::Mutex` keeps a panicking synthesis call from poisoning the
/// engine for subsequent tasks.
#[derive(Clone)]
pub struct EngineHandle(pub Arc<Mutex<dyn TtsEngine>>);

impl EngineHandle {
    pub fn new<E: TtsEngine>(engine: E) -> Self {
        Self(Arc::new(Mutex::new(engine)))
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle").finish_non_exhaustive()
    }
}

/// Shared `validate` logic for adapters: range-check, then rewrite the voice
/// id through the mapper when this engine does not know it.
///
/// `source_engine` is the engine the voice id was originally chosen for,
/// recorded in `extra["sourceEngine"]` by the GUI when the user switches
/// engines, absent otherwise (treated as same-engine, which short-circuits
/// to an exact identity mapping).
pub fn validate_with_mapping(
    config: &VoiceConfig,
    descriptor: &EngineDescriptor,
    known_voices: &[VoiceInfo],
    mapper: &VoiceMapper,
) -> Result<VoiceConfig> {
    if let Some(violation) = config.first_violation() {
        return Err(RecitoError::InvalidVoiceConfig(violation));
    }

    let known = known_voices
        .iter()
        .any(|v| v.id == config.voice_name || v.name == config.voice_name);
    if known {
        return Ok(config.clone());
    }

    let source_engine = config
        .extra
        .get("sourceEngine")
        .and_then(|v| v.as_str())
        .unwrap_or(&descriptor.id);
    let mapping = mapper.map_voice_id(
        &config.voice_name,
        source_engine,
        &descriptor.id,
        Some(known_voices),
    );
    let mut mapped = config.clone();
    if mapping.target_id == config.voice_name {
        // Identity mapping of a voice this engine never listed: fall through
        // to the declared fallback voice.
        mapped.voice_name = descriptor.fallback_voice_id.clone();
    } else {
        mapped.voice_name = mapping.target_id.clone();
    }
    warn!(
        engine = %descriptor.id,
        requested = %config.voice_name,
        substituted = %mapped.voice_name,
        strategy = ?mapping.strategy,
        "voice unknown to engine, substituted"
    );
    Ok(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use descriptor::{EngineKind, ParameterSchema};
    use std::collections::BTreeSet;

    fn descriptor() -> EngineDescriptor {
        EngineDescriptor {
            id: "emotion_api".into(),
            display_name: "Emotion API".into(),
            version: "1.0.0".into(),
            kind: EngineKind::EmotionApi,
            supported_languages: BTreeSet::from(["zh-CN".to_string(), "en-US".to_string()]),
            supported_formats: BTreeSet::from([crate::audio::AudioFormat::Wav]),
            is_online: true,
            requires_auth: false,
            parameter_schema: ParameterSchema::default(),
            default_voice_id: "8051".into(),
            fallback_voice_id: "8051".into(),
            emits_format: crate::audio::AudioFormat::Wav,
            provides_timing_data: false,
        }
    }

    fn voices() -> Vec<VoiceInfo> {
        vec![VoiceInfo {
            id: "8051".into(),
            name: "8051".into(),
            language: "zh-CN".into(),
            ..VoiceInfo::default()
        }]
    }

    #[test]
    fn known_voice_passes_through_unchanged() {
        let config = VoiceConfig {
            engine_id: "emotion_api".into(),
            voice_name: "8051".into(),
            ..VoiceConfig::default()
        };
        let out = validate_with_mapping(&config, &descriptor(), &voices(), &VoiceMapper::new())
            .expect("validate");
        assert_eq!(out.voice_name, "8051");
    }

    #[test]
    fn cross_engine_voice_is_mapped_by_table() {
        let mut config = VoiceConfig {
            engine_id: "emotion_api".into(),
            voice_name: "zh-CN-XiaoxiaoNeural".into(),
            ..VoiceConfig::default()
        };
        config.extra.insert(
            "sourceEngine".into(),
            serde_json::json!("online_voice"),
        );
        let out = validate_with_mapping(&config, &descriptor(), &voices(), &VoiceMapper::new())
            .expect("validate");
        assert_eq!(out.voice_name, "8051");
    }

    #[test]
    fn range_violation_is_an_error() {
        let config = VoiceConfig {
            engine_id: "emotion_api".into(),
            voice_name: "8051".into(),
            volume: 9.0,
            ..VoiceConfig::default()
        };
        let err = validate_with_mapping(&config, &descriptor(), &voices(), &VoiceMapper::new())
            .unwrap_err();
        assert!(matches!(err, RecitoError::InvalidVoiceConfig(_)));
    }

    #[test]
    fn unknown_voice_without_mapping_falls_back() {
        let config = VoiceConfig {
            engine_id: "emotion_api".into(),
            voice_name: "totally-made-up".into(),
            ..VoiceConfig::default()
        };
        let out = validate_with_mapping(&config, &descriptor(), &voices(), &VoiceMapper::new())
            .expect("validate");
        assert_eq!(out.voice_name, "8051");
    }
}
