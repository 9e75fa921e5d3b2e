//! Plain-POST HTTP adapter (emotion-capable API service).
//!
//! One request per synthesis: POST `{base}/v1/tts` with the full text,
//! response body is the audio. 4xx responses are permanent failures; 5xx and
//! transport errors retry with the configured delay up to `max_retries`.
//! Concurrency across handles is capped by a token pool sized from the
//! engine's `concurrentRequests` parameter.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::audio::{AudioFormat, SynthesisResult};
use crate::config::VoiceConfig;
use crate::engine::catalog;
use crate::engine::descriptor::{
    EngineDescriptor, EngineKind, EngineStatus, ParameterRule, ParameterSchema, ParameterSpec,
    VoiceFilter, VoiceInfo,
};
use crate::engine::mapping::VoiceMapper;
use crate::engine::{validate_with_mapping, TtsEngine};
use crate::error::{RecitoError, Result};

/// Counting semaphore over a pre-filled bounded channel.
#[derive(Clone)]
pub(crate) struct TokenPool {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl TokenPool {
    pub(crate) fn new(permits: usize) -> Self {
        let permits = permits.max(1);
        let (tx, rx) = bounded(permits);
        for _ in 0..permits {
            tx.send(()).expect("fill token pool");
        }
        Self { tx, rx }
    }

    pub(crate) fn acquire(&self) -> TokenGuard {
        self.rx.recv().expect("token pool closed");
        TokenGuard {
            tx: self.tx.clone(),
        }
    }
}

pub(crate) struct TokenGuard {
    tx: Sender<()>,
}

impl Drop for TokenGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(());
    }
}

#[derive(Debug, Clone)]
pub struct HttpEngineSettings {
    pub api_base: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub concurrent_requests: usize,
}

impl Default for HttpEngineSettings {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:8051".into(),
            timeout: Duration::from_secs(30),
            max_retries: 2,
            retry_delay: Duration::from_millis(750),
            concurrent_requests: 2,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SynthesisRequest<'a> {
    text: &'a str,
    voice_id: &'a str,
    speed: f32,
    pitch: f32,
    volume: f32,
    emotion: &'a str,
    language: &'a str,
}

#[derive(Deserialize)]
struct VoiceListResponse {
    voices: Vec<RemoteVoice>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteVoice {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    language: String,
    #[serde(default)]
    gender: String,
}

pub struct EmotionApiEngine {
    descriptor: EngineDescriptor,
    status: EngineStatus,
    mapper: VoiceMapper,
    settings: HttpEngineSettings,
    client: Client,
    tokens: TokenPool,
    config_root: Option<std::path::PathBuf>,
    voices: Option<Vec<VoiceInfo>>,
}

impl EmotionApiEngine {
    pub const ENGINE_ID: &'static str = "emotion_api";

    pub fn new(settings: HttpEngineSettings) -> Self {
        let descriptor = EngineDescriptor {
            id: Self::ENGINE_ID.into(),
            display_name: "Emotion API TTS".into(),
            version: "2.1.0".into(),
            kind: EngineKind::EmotionApi,
            supported_languages: BTreeSet::from(["zh-CN".to_string(), "en-US".to_string()]),
            supported_formats: BTreeSet::from([AudioFormat::Wav, AudioFormat::Mp3]),
            is_online: true,
            requires_auth: false,
            parameter_schema: ParameterSchema {
                parameters: vec![
                    ParameterSpec {
                        name: "apiBase".into(),
                        rule: ParameterRule::Text {
                            pattern: Some(r"^https?://".into()),
                        },
                        default: Some(serde_json::json!("http://127.0.0.1:8051")),
                    },
                    ParameterSpec {
                        name: "timeoutS".into(),
                        rule: ParameterRule::Integer { min: 1, max: 600 },
                        default: Some(serde_json::json!(30)),
                    },
                    ParameterSpec {
                        name: "maxRetries".into(),
                        rule: ParameterRule::Integer { min: 0, max: 10 },
                        default: Some(serde_json::json!(2)),
                    },
                    ParameterSpec {
                        name: "retryDelayMs".into(),
                        rule: ParameterRule::Integer { min: 0, max: 60_000 },
                        default: Some(serde_json::json!(750)),
                    },
                    ParameterSpec {
                        name: "concurrentRequests".into(),
                        rule: ParameterRule::Integer { min: 1, max: 16 },
                        default: Some(serde_json::json!(2)),
                    },
                ],
            },
            default_voice_id: "8051".into(),
            fallback_voice_id: "8051".into(),
            emits_format: AudioFormat::Wav,
            provides_timing_data: false,
        };
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .unwrap_or_default();
        let tokens = TokenPool::new(settings.concurrent_requests);
        Self {
            descriptor,
            status: EngineStatus::default(),
            mapper: VoiceMapper::new(),
            settings,
            client,
            tokens,
            config_root: None,
            voices: None,
        }
    }

    /// Use voice catalogs under this config root when present.
    pub fn with_config_root(mut self, root: impl Into<std::path::PathBuf>) -> Self {
        self.config_root = Some(root.into());
        self
    }

    fn builtin_voices() -> Vec<VoiceInfo> {
        vec![
            VoiceInfo {
                id: "8051".into(),
                name: "8051".into(),
                language: "zh-CN".into(),
                gender: "female".into(),
                quality: "high".into(),
                custom_attrs: BTreeMap::new(),
            },
            VoiceInfo {
                id: "9000".into(),
                name: "9000".into(),
                language: "en-US".into(),
                gender: "male".into(),
                quality: "high".into(),
                custom_attrs: BTreeMap::new(),
            },
        ]
    }

    fn fetch_remote_voices(&self) -> Result<Vec<VoiceInfo>> {
        let url = format!("{}/v1/voices", self.settings.api_base);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| RecitoError::Network(format!("voice list: {e}")))?;
        if !response.status().is_success() {
            return Err(RecitoError::Network(format!(
                "voice list returned {}",
                response.status()
            )));
        }
        let parsed: VoiceListResponse = response
            .json()
            .map_err(|e| RecitoError::Network(format!("voice list body: {e}")))?;
        Ok(parsed
            .voices
            .into_iter()
            .map(|v| VoiceInfo {
                name: if v.name.is_empty() { v.id.clone() } else { v.name },
                id: v.id,
                language: v.language,
                gender: v.gender,
                quality: String::new(),
                custom_attrs: BTreeMap::new(),
            })
            .collect())
    }

    /// POST with retry. 4xx is permanent; 5xx and transport errors retry.
    fn post_synthesis(&self, text: &str, config: &VoiceConfig) -> Result<Vec<u8>> {
        let url = format!("{}/v1/tts", self.settings.api_base);
        let request = SynthesisRequest {
            text,
            voice_id: &config.voice_name,
            speed: config.rate,
            pitch: config.pitch,
            volume: config.volume,
            emotion: &config.emotion,
            language: &config.language,
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = self.client.post(&url).json(&request).send();
            match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let bytes = response
                            .bytes()
                            .map_err(|e| RecitoError::Network(format!("reading audio: {e}")))?;
                        return Ok(bytes.to_vec());
                    }
                    let body = response.text().unwrap_or_default();
                    if status.is_client_error() {
                        return Err(RecitoError::Synthesis(format!(
                            "service rejected request ({status}): {}",
                            body.trim().chars().take(200).collect::<String>()
                        )));
                    }
                    warn!(%status, attempt, "server error from TTS service");
                    if attempt > self.settings.max_retries {
                        return Err(RecitoError::Network(format!(
                            "service failed after {attempt} attempts ({status})"
                        )));
                    }
                }
                Err(e) => {
                    warn!(error = %e, attempt, "transport error from TTS service");
                    if attempt > self.settings.max_retries {
                        return Err(RecitoError::Network(format!(
                            "request failed after {attempt} attempts: {e}"
                        )));
                    }
                }
            }
            std::thread::sleep(self.settings.retry_delay);
        }
    }
}

impl TtsEngine for EmotionApiEngine {
    fn init(&mut self) -> Result<()> {
        match self.fetch_remote_voices() {
            Ok(voices) => {
                self.status = EngineStatus::available(voices.clone());
                self.voices = Some(voices);
            }
            Err(e) => {
                debug!(error = %e, "emotion API unreachable at init");
                self.status = EngineStatus::errored(e.to_string());
            }
        }
        Ok(())
    }

    fn list_voices(&mut self, filter: Option<&VoiceFilter>) -> Result<Vec<VoiceInfo>> {
        if self.voices.is_none() {
            let fetched = self.fetch_remote_voices().ok();
            self.voices = Some(match fetched {
                Some(remote) if !remote.is_empty() => remote,
                _ => catalog::catalog_or_default(
                    self.config_root.as_deref(),
                    Self::ENGINE_ID,
                    Self::builtin_voices,
                ),
            });
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
        let _permit = self.tokens.acquire();
        let audio = self.post_synthesis(text, config)?;
        if audio.is_empty() {
            return Err(RecitoError::Synthesis("service returned empty audio".into()));
        }
        Ok(SynthesisResult::from_bytes(audio))
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    /// Minimal one-shot HTTP server for exercising the retry paths.
    fn serve_once(status_line: &'static str, body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf);
                let response = format!(
                    "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes());
                let _ = stream.write_all(body);
            }
        });
        format!("http://{addr}")
    }

    fn settings_for(base: String) -> HttpEngineSettings {
        HttpEngineSettings {
            api_base: base,
            timeout: Duration::from_secs(2),
            max_retries: 0,
            retry_delay: Duration::from_millis(10),
            concurrent_requests: 1,
        }
    }

    fn config() -> VoiceConfig {
        VoiceConfig {
            engine_id: "emotion_api".into(),
            voice_name: "8051".into(),
            ..VoiceConfig::default()
        }
    }

    #[test]
    fn client_error_is_permanent_synthesis_failure() {
        let base = serve_once("400 Bad Request", b"bad voice");
        let engine = EmotionApiEngine::new(settings_for(base));
        let err = engine.post_synthesis("hello", &config()).unwrap_err();
        assert!(matches!(err, RecitoError::Synthesis(_)));
    }

    #[test]
    fn server_error_exhausts_retries_into_network_error() {
        let base = serve_once("500 Internal Server Error", b"");
        let mut settings = settings_for(base);
        settings.max_retries = 0;
        let engine = EmotionApiEngine::new(settings);
        let err = engine.post_synthesis("hello", &config()).unwrap_err();
        assert!(matches!(err, RecitoError::Network(_)));
    }

    #[test]
    fn unreachable_host_is_a_network_error() {
        // Reserved TEST-NET address, nothing listens there.
        let engine = EmotionApiEngine::new(settings_for("http://192.0.2.1:9".into()));
        let err = engine.post_synthesis("hello", &config()).unwrap_err();
        assert!(matches!(err, RecitoError::Network(_)));
    }

    #[test]
    fn successful_response_returns_audio_bytes() {
        let base = serve_once("200 OK", b"RIFFxxxxWAVEdata");
        let mut engine = EmotionApiEngine::new(settings_for(base));
        let result = engine.synthesize("hello", &config()).expect("synthesize");
        assert_eq!(result.detected_format, AudioFormat::Wav);
        assert_eq!(result.audio, b"RIFFxxxxWAVEdata");
    }

    #[test]
    fn token_pool_limits_and_releases() {
        let pool = TokenPool::new(1);
        let guard = pool.acquire();
        assert!(pool.rx.is_empty());
        drop(guard);
        let _again = pool.acquire();
    }
}
