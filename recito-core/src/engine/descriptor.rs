//! Static engine metadata and live status records.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::audio::AudioFormat;

/// Backend families the core knows how to schedule, estimate, and probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Streaming neural HTTP service with word-boundary timing data.
    OnlineNeural,
    /// Plain POST HTTP service with emotion support.
    EmotionApi,
    /// In-process inference over model files from a local directory.
    LocalModel,
    /// The operating system's speech API (not reentrant).
    SystemSpeech,
}

/// Validation rule for one engine parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterRule {
    Number { min: f64, max: f64 },
    Integer { min: i64, max: i64 },
    Text { pattern: Option<String> },
    Options { options: Vec<String> },
    Flag,
}

impl ParameterRule {
    /// Check a live value against this rule.
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        match self {
            Self::Number { min, max } => value
                .as_f64()
                .is_some_and(|v| (*min..=*max).contains(&v)),
            Self::Integer { min, max } => value
                .as_i64()
                .is_some_and(|v| (*min..=*max).contains(&v)),
            Self::Text { pattern } => match (value.as_str(), pattern) {
                (Some(s), Some(p)) => Regex::new(p).map(|re| re.is_match(s)).unwrap_or(false),
                (Some(_), None) => true,
                _ => false,
            },
            Self::Options { options } => value
                .as_str()
                .is_some_and(|s| options.iter().any(|o| o == s)),
            Self::Flag => value.is_boolean(),
        }
    }
}

/// One declared engine parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSpec {
    pub name: String,
    pub rule: ParameterRule,
    /// `None` means the parameter is required.
    pub default: Option<serde_json::Value>,
}

impl ParameterSpec {
    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct ParameterSchema {
    pub parameters: Vec<ParameterSpec>,
}

impl ParameterSchema {
    /// Validate live values: required params present, every present param
    /// passes its rule. Returns the list of violations (empty = valid).
    pub fn validate(&self, values: &BTreeMap<String, serde_json::Value>) -> Vec<String> {
        let mut errors = Vec::new();
        for spec in &self.parameters {
            match values.get(&spec.name) {
                Some(value) => {
                    if !spec.rule.accepts(value) {
                        errors.push(format!("parameter '{}' rejected value {value}", spec.name));
                    }
                }
                None if spec.is_required() => {
                    errors.push(format!("required parameter '{}' missing", spec.name));
                }
                None => {}
            }
        }
        errors
    }

    /// Live values with declared defaults filled in for missing optionals.
    pub fn with_defaults(
        &self,
        values: &BTreeMap<String, serde_json::Value>,
    ) -> BTreeMap<String, serde_json::Value> {
        let mut merged = values.clone();
        for spec in &self.parameters {
            if let Some(default) = &spec.default {
                merged
                    .entry(spec.name.clone())
                    .or_insert_with(|| default.clone());
            }
        }
        merged
    }
}

/// Immutable, declarative metadata for a registered engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineDescriptor {
    pub id: String,
    pub display_name: String,
    pub version: String,
    pub kind: EngineKind,
    pub supported_languages: BTreeSet<String>,
    pub supported_formats: BTreeSet<AudioFormat>,
    pub is_online: bool,
    pub requires_auth: bool,
    pub parameter_schema: ParameterSchema,
    pub default_voice_id: String,
    pub fallback_voice_id: String,
    /// Container format the engine natively produces.
    pub emits_format: AudioFormat,
    /// True ⇒ synthesis results may carry word/sentence timestamps.
    pub provides_timing_data: bool,
}

/// A specific speaker/model/variant exposed by an engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct VoiceInfo {
    pub id: String,
    pub name: String,
    pub language: String,
    pub gender: String,
    pub quality: String,
    pub custom_attrs: BTreeMap<String, String>,
}

/// Optional filters for `list_voices`.
#[derive(Debug, Clone, Default)]
pub struct VoiceFilter {
    pub language: Option<String>,
    pub gender: Option<String>,
    pub popular_only: bool,
    pub recommended_only: bool,
}

impl VoiceFilter {
    pub fn matches(&self, voice: &VoiceInfo) -> bool {
        if let Some(language) = &self.language {
            if !voice
                .language
                .to_ascii_lowercase()
                .starts_with(&language.to_ascii_lowercase())
            {
                return false;
            }
        }
        if let Some(gender) = &self.gender {
            if !voice.gender.eq_ignore_ascii_case(gender) {
                return false;
            }
        }
        if self.popular_only && voice.custom_attrs.get("isPopular").map(String::as_str) != Some("true")
        {
            return false;
        }
        if self.recommended_only
            && voice.custom_attrs.get("isRecommended").map(String::as_str) != Some("true")
        {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Available,
    Unavailable,
    Error,
    Loading,
}

/// Probe timing and failure counters surfaced with the status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct PerformanceMetrics {
    pub probe_latency_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub error_count: u32,
}

/// Mutable availability record for a registered engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub state: EngineState,
    pub last_check: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub available_voices: Vec<VoiceInfo>,
    pub performance_metrics: PerformanceMetrics,
}

impl Default for EngineStatus {
    fn default() -> Self {
        Self {
            state: EngineState::Unavailable,
            last_check: None,
            error_message: None,
            available_voices: Vec::new(),
            performance_metrics: PerformanceMetrics::default(),
        }
    }
}

impl EngineStatus {
    pub fn available(voices: Vec<VoiceInfo>) -> Self {
        Self {
            state: EngineState::Available,
            last_check: Some(Utc::now()),
            error_message: None,
            available_voices: voices,
            performance_metrics: PerformanceMetrics::default(),
        }
    }

    pub fn errored(message: impl Into<String>) -> Self {
        Self {
            state: EngineState::Error,
            last_check: Some(Utc::now()),
            error_message: Some(message.into()),
            available_voices: Vec::new(),
            performance_metrics: PerformanceMetrics::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> ParameterSchema {
        ParameterSchema {
            parameters: vec![
                ParameterSpec {
                    name: "apiBase".into(),
                    rule: ParameterRule::Text {
                        pattern: Some(r"^https?://".into()),
                    },
                    default: None,
                },
                ParameterSpec {
                    name: "timeoutS".into(),
                    rule: ParameterRule::Integer { min: 1, max: 300 },
                    default: Some(serde_json::json!(30)),
                },
            ],
        }
    }

    #[test]
    fn missing_required_parameter_is_reported() {
        let errors = schema().validate(&BTreeMap::new());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("apiBase"));
    }

    #[test]
    fn pattern_and_range_rules_are_enforced() {
        let mut values = BTreeMap::new();
        values.insert("apiBase".into(), serde_json::json!("ftp://nope"));
        values.insert("timeoutS".into(), serde_json::json!(900));
        let errors = schema().validate(&values);
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn defaults_fill_missing_optionals() {
        let mut values = BTreeMap::new();
        values.insert("apiBase".into(), serde_json::json!("http://localhost:8051"));
        let merged = schema().with_defaults(&values);
        assert_eq!(merged.get("timeoutS"), Some(&serde_json::json!(30)));
        assert!(schema().validate(&merged).is_empty());
    }

    #[test]
    fn voice_filter_matches_language_prefix() {
        let voice = VoiceInfo {
            id: "zh-CN-XiaoxiaoNeural".into(),
            language: "zh-CN".into(),
            ..VoiceInfo::default()
        };
        let filter = VoiceFilter {
            language: Some("zh".into()),
            ..VoiceFilter::default()
        };
        assert!(filter.matches(&voice));
        let other = VoiceFilter {
            language: Some("en".into()),
            ..VoiceFilter::default()
        };
        assert!(!other.matches(&voice));
    }
}
