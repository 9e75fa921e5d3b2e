//! Streaming online neural TTS adapter.
//!
//! The service streams newline-delimited JSON events: base64 audio frames
//! interleaved with word/sentence boundary marks. The adapter accumulates
//! the audio bytes and simultaneously builds the SRT script the pipeline
//! turns into a subtitle sidecar. Stream consumption is factored over a
//! plain iterator so tests can drive it without a live endpoint.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, BufReader};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::audio::subtitle::{render_srt, SubtitleCue};
use crate::audio::{AudioFormat, SynthesisResult};
use crate::config::VoiceConfig;
use crate::engine::catalog;
use crate::engine::descriptor::{
    EngineDescriptor, EngineKind, EngineStatus, ParameterRule, ParameterSchema, ParameterSpec,
    VoiceFilter, VoiceInfo,
};
use crate::engine::mapping::VoiceMapper;
use crate::engine::{validate_with_mapping, TtsEngine};
use crate::engines::http::HttpEngineSettings;
use crate::error::{RecitoError, Result};

/// One event from the synthesis stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// Base64 audio frame.
    #[serde(rename = "audio")]
    Audio { data: String },
    #[serde(rename = "WordBoundary")]
    WordBoundary {
        /// Seconds from stream start.
        offset: f64,
        duration: f64,
        text: String,
    },
    #[serde(rename = "SentenceBoundary")]
    SentenceBoundary {
        offset: f64,
        duration: f64,
        text: String,
    },
    #[serde(rename = "end")]
    End,
}

/// Drain a synthesis stream into audio bytes plus subtitle cues.
///
/// Word boundaries are grouped into one cue per sentence when sentence marks
/// are present; otherwise each word boundary becomes its own cue.
pub fn consume_stream(
    events: impl Iterator<Item = Result<StreamEvent>>,
) -> Result<(Vec<u8>, Vec<SubtitleCue>)> {
    let mut audio = Vec::new();
    let mut word_cues: Vec<SubtitleCue> = Vec::new();
    let mut sentence_cues: Vec<SubtitleCue> = Vec::new();

    for event in events {
        match event? {
            StreamEvent::Audio { data } => {
                let frame = BASE64
                    .decode(data.as_bytes())
                    .map_err(|e| RecitoError::Synthesis(format!("bad audio frame: {e}")))?;
                audio.extend_from_slice(&frame);
            }
            StreamEvent::WordBoundary {
                offset,
                duration,
                text,
            } => {
                word_cues.push(SubtitleCue::new(offset, offset + duration, text));
            }
            StreamEvent::SentenceBoundary {
                offset,
                duration,
                text,
            } => {
                sentence_cues.push(SubtitleCue::new(offset, offset + duration, text));
            }
            StreamEvent::End => break,
        }
    }

    let cues = if sentence_cues.is_empty() {
        word_cues
    } else {
        sentence_cues
    };
    Ok((audio, cues))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamRequest<'a> {
    text: &'a str,
    voice: &'a str,
    rate: f32,
    pitch: f32,
    volume: f32,
    output_format: &'a str,
    with_boundaries: bool,
}

pub struct OnlineVoiceEngine {
    descriptor: EngineDescriptor,
    status: EngineStatus,
    mapper: VoiceMapper,
    settings: HttpEngineSettings,
    client: Client,
    config_root: Option<std::path::PathBuf>,
    voices: Option<Vec<VoiceInfo>>,
}

impl OnlineVoiceEngine {
    pub const ENGINE_ID: &'static str = "online_voice";

    pub fn new(settings: HttpEngineSettings) -> Self {
        let descriptor = EngineDescriptor {
            id: Self::ENGINE_ID.into(),
            display_name: "Online Voice Service".into(),
            version: "3.0.1".into(),
            kind: EngineKind::OnlineNeural,
            supported_languages: BTreeSet::from([
                "zh-CN".to_string(),
                "en-US".to_string(),
                "en-GB".to_string(),
                "ja-JP".to_string(),
            ]),
            supported_formats: BTreeSet::from([AudioFormat::Mp3, AudioFormat::Wav]),
            is_online: true,
            requires_auth: false,
            parameter_schema: ParameterSchema {
                parameters: vec![
                    ParameterSpec {
                        name: "apiBase".into(),
                        rule: ParameterRule::Text {
                            pattern: Some(r"^https?://".into()),
                        },
                        default: Some(serde_json::json!("http://127.0.0.1:7899")),
                    },
                    ParameterSpec {
                        name: "timeoutS".into(),
                        rule: ParameterRule::Integer { min: 1, max: 600 },
                        default: Some(serde_json::json!(60)),
                    },
                ],
            },
            default_voice_id: "zh-CN-XiaoxiaoNeural".into(),
            fallback_voice_id: "zh-CN-XiaoxiaoNeural".into(),
            emits_format: AudioFormat::Mp3,
            provides_timing_data: true,
        };
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .unwrap_or_default();
        Self {
            descriptor,
            status: EngineStatus::default(),
            mapper: VoiceMapper::new(),
            settings,
            client,
            config_root: None,
            voices: None,
        }
    }

    pub fn with_config_root(mut self, root: impl Into<std::path::PathBuf>) -> Self {
        self.config_root = Some(root.into());
        self
    }

    fn builtin_voices() -> Vec<VoiceInfo> {
        [
            ("zh-CN-XiaoxiaoNeural", "Xiaoxiao", "zh-CN", "female"),
            ("zh-CN-YunxiNeural", "Yunxi", "zh-CN", "male"),
            ("zh-CN-YunyangNeural", "Yunyang", "zh-CN", "male"),
            ("en-US-AriaNeural", "Aria", "en-US", "female"),
            ("en-US-GuyNeural", "Guy", "en-US", "male"),
            ("en-US-JennyNeural", "Jenny", "en-US", "female"),
            ("en-GB-SoniaNeural", "Sonia", "en-GB", "female"),
        ]
        .into_iter()
        .map(|(id, name, language, gender)| VoiceInfo {
            id: id.into(),
            name: name.into(),
            language: language.into(),
            gender: gender.into(),
            quality: "neural".into(),
            custom_attrs: BTreeMap::new(),
        })
        .collect()
    }

    /// Open the event stream and drain it.
    fn stream_synthesis(&self, text: &str, config: &VoiceConfig) -> Result<(Vec<u8>, Vec<SubtitleCue>)> {
        let url = format!("{}/v1/stream", self.settings.api_base);
        let request = StreamRequest {
            text,
            voice: &config.voice_name,
            rate: config.rate,
            pitch: config.pitch,
            volume: config.volume,
            output_format: config.output_format.extension(),
            with_boundaries: true,
        };
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .map_err(|e| RecitoError::Network(format!("opening stream: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            if status.is_client_error() {
                return Err(RecitoError::Synthesis(format!(
                    "service rejected request ({status}): {}",
                    body.trim().chars().take(200).collect::<String>()
                )));
            }
            return Err(RecitoError::Network(format!("stream returned {status}")));
        }

        let reader = BufReader::new(response);
        let events = reader.lines().filter_map(|line| match line {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(
                serde_json::from_str::<StreamEvent>(&line)
                    .map_err(|e| RecitoError::Synthesis(format!("bad stream event: {e}"))),
            ),
            Err(e) => Some(Err(RecitoError::Network(format!("stream read: {e}")))),
        });
        consume_stream(events)
    }
}

impl TtsEngine for OnlineVoiceEngine {
    fn init(&mut self) -> Result<()> {
        // The voice catalog is static; reachability is the health monitor's
        // concern. Mark available optimistically so queued tasks can start
        // and fail with a network error if the service is down.
        let voices = catalog::catalog_or_default(
            self.config_root.as_deref(),
            Self::ENGINE_ID,
            Self::builtin_voices,
        );
        self.status = EngineStatus::available(voices.clone());
        self.voices = Some(voices);
        Ok(())
    }

    fn list_voices(&mut self, filter: Option<&VoiceFilter>) -> Result<Vec<VoiceInfo>> {
        if self.voices.is_none() {
            self.voices = Some(catalog::catalog_or_default(
                self.config_root.as_deref(),
                Self::ENGINE_ID,
                Self::builtin_voices,
            ));
        }
        let voices = self.voices.clone().unwrap_or_default();
        Ok(match filter {
            Some(f) => voices.into_iter().filter(|v| f.matches(v)).collect(),
            None => voices,
        })
    }

    fn validate(&mut self, config: &VoiceConfig) -> Result<VoiceConfig> {
        let voices = self.list_voices(None)?;
        validate_with_mapping(config, &self.descriptor, &voices, &self.mapper)
    }

    fn synthesize(&mut self, text: &str, config: &VoiceConfig) -> Result<SynthesisResult> {
        let (audio, cues) = self.stream_synthesis(text, config)?;
        if audio.is_empty() {
            return Err(RecitoError::Synthesis("stream carried no audio".into()));
        }
        debug!(bytes = audio.len(), cues = cues.len(), "stream drained");
        let mut result = SynthesisResult::from_bytes(audio);
        if !cues.is_empty() {
            result.srt_content = Some(render_srt(&cues));
        } else if self.descriptor.provides_timing_data {
            warn!("stream carried no boundary events, subtitle sidecar unavailable");
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
        self.voices = None;
        self.status = EngineStatus::default();
    }
}
