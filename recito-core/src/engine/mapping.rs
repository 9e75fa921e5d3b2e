//! Cross-engine voice-identifier translation.
//!
//! Mapping is a pure function of its arguments and the tables: exact lookup,
//! then a language-token fuzzy match against the target's live voice list,
//! then the per-engine fallback voice. The fallback tier always succeeds, so
//! an unknown voice is never a hard error.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::engine::descriptor::VoiceInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingStrategy {
    Exact,
    Fuzzy,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceMapping {
    pub source_id: String,
    pub target_id: String,
    /// 1.0 exact, 0.8 fuzzy, 0.5 fallback.
    pub confidence: f64,
    pub strategy: MappingStrategy,
}

pub struct VoiceMapper {
    /// `"<src>_to_<dst>"` → voice-id table.
    tables: BTreeMap<String, BTreeMap<String, String>>,
    fallback_voices: BTreeMap<String, String>,
}

impl Default for VoiceMapper {
    fn default() -> Self {
        Self::new()
    }
}

const ONLINE_NEURAL_VOICES: &[&str] = &[
    "zh-CN-XiaoxiaoNeural",
    "zh-CN-YunxiNeural",
    "zh-CN-YunyangNeural",
    "zh-CN-XiaoyiNeural",
    "zh-CN-YunjianNeural",
    "zh-CN-XiaochenNeural",
    "zh-CN-XiaohanNeural",
    "zh-CN-XiaomengNeural",
    "zh-CN-XiaomoNeural",
    "zh-CN-XiaoqiuNeural",
    "zh-CN-XiaoruiNeural",
    "zh-CN-XiaoshuangNeural",
    "zh-CN-XiaoxuanNeural",
    "zh-CN-XiaoyanNeural",
    "zh-CN-XiaoyouNeural",
    "zh-CN-XiaozhenNeural",
    "zh-CN-YunfengNeural",
    "zh-CN-YunhaoNeural",
    "en-US-AriaNeural",
    "en-US-GuyNeural",
    "en-US-JennyNeural",
    "en-US-DavisNeural",
    "en-US-EmmaNeural",
    "en-US-BrianNeural",
    "en-US-AvaNeural",
];

impl VoiceMapper {
    pub fn new() -> Self {
        let mut mapper = Self {
            tables: BTreeMap::new(),
            fallback_voices: BTreeMap::new(),
        };
        mapper.load_default_tables();
        mapper
    }

    fn load_default_tables(&mut self) {
        // Online neural ids collapse onto the single emotion-API speaker.
        for voice in ONLINE_NEURAL_VOICES {
            self.add_mapping("online_voice", "emotion_api", voice, "8051");
        }

        // Online neural → local model: pick the model matching the language.
        for voice in ONLINE_NEURAL_VOICES {
            let target = if voice.starts_with("zh-CN") {
                "zh_CN-huayan-medium"
            } else {
                "en_GB-alan-medium"
            };
            self.add_mapping("online_voice", "local_model", voice, target);
        }

        for (source, target) in [
            ("zh_CN-huayan-medium", "8051"),
            ("en_US-amy-medium", "8051"),
            ("en_GB-alan-medium", "8051"),
        ] {
            self.add_mapping("local_model", "emotion_api", source, target);
        }

        for (source, target) in [
            ("zh_CN-huayan-medium", "zh-CN-XiaoxiaoNeural"),
            ("en_US-amy-medium", "en-US-AriaNeural"),
            ("en_GB-alan-medium", "en-GB-SoniaNeural"),
        ] {
            self.add_mapping("local_model", "online_voice", source, target);
        }

        self.fallback_voices
            .insert("online_voice".into(), "zh-CN-XiaoxiaoNeural".into());
        self.fallback_voices.insert("emotion_api".into(), "8051".into());
        self.fallback_voices
            .insert("local_model".into(), "zh_CN-huayan-medium".into());
        self.fallback_voices
            .insert("system_speech".into(), "default".into());
    }

    /// Translate `source_voice_id` for `target_engine`.
    pub fn map_voice_id(
        &self,
        source_voice_id: &str,
        source_engine: &str,
        target_engine: &str,
        available_voices: Option<&[VoiceInfo]>,
    ) -> VoiceMapping {
        if source_engine == target_engine {
            return VoiceMapping {
                source_id: source_voice_id.into(),
                target_id: source_voice_id.into(),
                confidence: 1.0,
                strategy: MappingStrategy::Exact,
            };
        }

        let key = table_key(source_engine, target_engine);
        if let Some(target_id) = self.tables.get(&key).and_then(|t| t.get(source_voice_id)) {
            let usable = available_voices
                .map(|voices| is_voice_available(target_id, voices))
                .unwrap_or(true);
            if usable {
                return VoiceMapping {
                    source_id: source_voice_id.into(),
                    target_id: target_id.clone(),
                    confidence: 1.0,
                    strategy: MappingStrategy::Exact,
                };
            }
        }

        if let Some(target_id) = self.fuzzy_match(source_voice_id, available_voices) {
            return VoiceMapping {
                source_id: source_voice_id.into(),
                target_id,
                confidence: 0.8,
                strategy: MappingStrategy::Fuzzy,
            };
        }

        let fallback = self
            .fallback_voices
            .get(target_engine)
            .cloned()
            .unwrap_or_else(|| "default".into());
        VoiceMapping {
            source_id: source_voice_id.into(),
            target_id: fallback,
            confidence: 0.5,
            strategy: MappingStrategy::Fallback,
        }
    }

    /// First target voice whose language token matches the source id's.
    fn fuzzy_match(
        &self,
        source_voice_id: &str,
        available_voices: Option<&[VoiceInfo]>,
    ) -> Option<String> {
        let voices = available_voices?;
        let source_lang = extract_language(source_voice_id)?;
        voices
            .iter()
            .find(|voice| {
                extract_language(&voice.id)
                    .or_else(|| {
                        if voice.language.is_empty() {
                            None
                        } else {
                            Some(voice.language.clone())
                        }
                    })
                    .is_some_and(|lang| lang == source_lang)
            })
            .map(|voice| voice.id.clone())
    }

    /// Extend the tables at runtime (user-defined pairs).
    pub fn add_mapping(
        &mut self,
        source_engine: &str,
        target_engine: &str,
        source_voice_id: &str,
        target_voice_id: &str,
    ) {
        self.tables
            .entry(table_key(source_engine, target_engine))
            .or_default()
            .insert(source_voice_id.into(), target_voice_id.into());
    }

    /// The static table for one engine pair, if any.
    pub fn mapping_info(
        &self,
        source_engine: &str,
        target_engine: &str,
    ) -> Option<&BTreeMap<String, String>> {
        self.tables.get(&table_key(source_engine, target_engine))
    }

    /// For each table entry, whether the target id exists in the live list.
    pub fn validate_mappings(
        &self,
        source_engine: &str,
        target_engine: &str,
        available_voices: &[VoiceInfo],
    ) -> BTreeMap<String, bool> {
        self.mapping_info(source_engine, target_engine)
            .map(|table| {
                table
                    .iter()
                    .map(|(source, target)| {
                        (source.clone(), is_voice_available(target, available_voices))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn table_key(source_engine: &str, target_engine: &str) -> String {
    format!("{source_engine}_to_{target_engine}")
}

fn is_voice_available(voice_id: &str, voices: &[VoiceInfo]) -> bool {
    voices.iter().any(|v| v.id == voice_id || v.name == voice_id)
}

/// Pull a language token out of a voice id: the first two `-`-separated
/// parts (`zh-CN-XiaoxiaoNeural` → `zh-CN`), else the first `_`-separated
/// prefix (`cmn_latn` → `cmn`).
pub fn extract_language(voice_id: &str) -> Option<String> {
    if voice_id.is_empty() {
        return None;
    }
    if voice_id.contains('-') {
        let parts: Vec<&str> = voice_id.split('-').collect();
        if parts.len() >= 2 && !parts[0].is_empty() && !parts[1].is_empty() {
            return Some(format!("{}-{}", parts[0], parts[1]));
        }
    }
    if voice_id.contains('_') {
        let prefix = voice_id.split('_').next()?;
        if !prefix.is_empty() {
            return Some(prefix.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voices(ids: &[&str]) -> Vec<VoiceInfo> {
        ids.iter()
            .map(|id| VoiceInfo {
                id: (*id).into(),
                name: (*id).into(),
                ..VoiceInfo::default()
            })
            .collect()
    }

    #[test]
    fn identity_mapping_short_circuits() {
        let mapper = VoiceMapper::new();
        let mapping =
            mapper.map_voice_id("zh-CN-XiaoxiaoNeural", "online_voice", "online_voice", None);
        assert_eq!(mapping.target_id, "zh-CN-XiaoxiaoNeural");
        assert_eq!(mapping.strategy, MappingStrategy::Exact);
        assert_eq!(mapping.confidence, 1.0);
    }

    #[test]
    fn table_exact_match_to_emotion_api() {
        let mapper = VoiceMapper::new();
        let mapping = mapper.map_voice_id(
            "zh-CN-XiaoxiaoNeural",
            "online_voice",
            "emotion_api",
            Some(&voices(&["8051"])),
        );
        assert_eq!(mapping.target_id, "8051");
        assert_eq!(mapping.strategy, MappingStrategy::Exact);
    }

    #[test]
    fn exact_target_missing_from_live_list_degrades() {
        let mapper = VoiceMapper::new();
        let mapping = mapper.map_voice_id(
            "zh-CN-XiaoxiaoNeural",
            "online_voice",
            "emotion_api",
            Some(&voices(&["9000"])),
        );
        // No language token on "9000" either, so the fallback tier wins.
        assert_eq!(mapping.strategy, MappingStrategy::Fallback);
        assert_eq!(mapping.target_id, "8051");
        assert_eq!(mapping.confidence, 0.5);
    }

    #[test]
    fn fuzzy_matches_on_language_token() {
        let mut mapper = VoiceMapper::new();
        // Unknown to every table.
        mapper.tables.clear();
        let mapping = mapper.map_voice_id(
            "zh-CN-BrandNewNeural",
            "online_voice",
            "local_model",
            Some(&voices(&["en_GB-alan-medium", "zh-CN-SomethingElse"])),
        );
        assert_eq!(mapping.strategy, MappingStrategy::Fuzzy);
        assert_eq!(mapping.target_id, "zh-CN-SomethingElse");
        assert_eq!(mapping.confidence, 0.8);
    }

    #[test]
    fn fallback_always_succeeds() {
        let mapper = VoiceMapper::new();
        let mapping = mapper.map_voice_id("nonsense", "online_voice", "system_speech", None);
        assert_eq!(mapping.strategy, MappingStrategy::Fallback);
        assert_eq!(mapping.target_id, "default");
    }

    #[test]
    fn mapper_is_deterministic() {
        let mapper = VoiceMapper::new();
        let a = mapper.map_voice_id("en-US-AriaNeural", "online_voice", "local_model", None);
        let b = mapper.map_voice_id("en-US-AriaNeural", "online_voice", "local_model", None);
        assert_eq!(a, b);
        assert_eq!(a.target_id, "en_GB-alan-medium");
    }

    #[test]
    fn custom_mapping_wins_after_insertion() {
        let mut mapper = VoiceMapper::new();
        mapper.add_mapping("online_voice", "system_speech", "en-US-AriaNeural", "Samantha");
        let mapping = mapper.map_voice_id("en-US-AriaNeural", "online_voice", "system_speech", None);
        assert_eq!(mapping.target_id, "Samantha");
        assert_eq!(mapping.strategy, MappingStrategy::Exact);
    }

    #[test]
    fn language_extraction_handles_both_separators() {
        assert_eq!(
            extract_language("zh-CN-XiaoxiaoNeural").as_deref(),
            Some("zh-CN")
        );
        assert_eq!(
            extract_language("zh_CN-huayan-medium").as_deref(),
            Some("zh_CN-huayan")
        );
        assert_eq!(extract_language("cmn_latn").as_deref(), Some("cmn"));
        assert_eq!(extract_language(""), None);
    }

    #[test]
    fn validation_sweep_reports_missing_targets() {
        let mapper = VoiceMapper::new();
        let report = mapper.validate_mappings(
            "local_model",
            "online_voice",
            &voices(&["zh-CN-XiaoxiaoNeural"]),
        );
        assert_eq!(report.get("zh_CN-huayan-medium"), Some(&true));
        assert_eq!(report.get("en_US-amy-medium"), Some(&false));
    }
}
