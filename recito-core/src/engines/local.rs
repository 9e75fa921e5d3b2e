//! Local model adapter.
//!
//! Drives a piper-style local inference backend: voices are model files laid
//! out as `<models_dir>/<voice_id>/<voice_id>.onnx` with an optional
//! `<voice_id>.onnx.json` sidecar describing language/quality/sample-rate.
//! Resolved model paths are cached per voice so the existence check and
//! sidecar parse happen once per handle lifetime; the engine mutex guarantees
//! a model is loaded at most once.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::audio::{AudioFormat, SynthesisResult};
use crate::config::VoiceConfig;
use crate::engine::descriptor::{
    EngineDescriptor, EngineKind, EngineState, EngineStatus, ParameterRule, ParameterSchema,
    ParameterSpec, VoiceFilter, VoiceInfo,
};
use crate::engine::mapping::VoiceMapper;
use crate::engine::{validate_with_mapping, TtsEngine};
use crate::error::{RecitoError, Result};

/// Cached per-voice model handle.
#[derive(Debug, Clone)]
struct LoadedModel {
    model_path: PathBuf,
    sample_rate: u32,
}

/// Optional sidecar metadata next to each model file.
#[derive(Debug, Default, Deserialize)]
struct ModelSidecar {
    #[serde(default)]
    language: Option<SidecarLanguage>,
    #[serde(default)]
    audio: Option<SidecarAudio>,
    #[serde(default)]
    dataset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SidecarLanguage {
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SidecarAudio {
    #[serde(default)]
    sample_rate: Option<u32>,
    #[serde(default)]
    quality: Option<String>,
}

pub struct LocalModelEngine {
    descriptor: EngineDescriptor,
    status: EngineStatus,
    mapper: VoiceMapper,
    models_dir: PathBuf,
    /// Inference binary; defaults to `piper` on PATH.
    binary: PathBuf,
    loaded: HashMap<String, LoadedModel>,
    voices: Option<Vec<VoiceInfo>>,
}

impl LocalModelEngine {
    pub const ENGINE_ID: &'static str = "local_model";

    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        let descriptor = EngineDescriptor {
            id: Self::ENGINE_ID.into(),
            display_name: "Local Model TTS".into(),
            version: "1.2.0".into(),
            kind: EngineKind::LocalModel,
            supported_languages: BTreeSet::from(["zh-CN".to_string(), "en-US".to_string(), "en-GB".to_string()]),
            supported_formats: BTreeSet::from([AudioFormat::Wav]),
            is_online: false,
            requires_auth: false,
            parameter_schema: ParameterSchema {
                parameters: vec![
                    ParameterSpec {
                        name: "modelsDir".into(),
                        rule: ParameterRule::Text { pattern: None },
                        default: Some(serde_json::json!("models")),
                    },
                    ParameterSpec {
                        name: "lengthScale".into(),
                        rule: ParameterRule::Number { min: 0.25, max: 4.0 },
                        default: Some(serde_json::json!(1.0)),
                    },
                ],
            },
            default_voice_id: "zh_CN-huayan-medium".into(),
            fallback_voice_id: "zh_CN-huayan-medium".into(),
            emits_format: AudioFormat::Wav,
            provides_timing_data: false,
        };
        Self {
            descriptor,
            status: EngineStatus::default(),
            mapper: VoiceMapper::new(),
            models_dir: models_dir.into(),
            binary: PathBuf::from("piper"),
            loaded: HashMap::new(),
            voices: None,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Scan the models directory for voice subdirectories.
    fn scan_models(&self) -> Vec<VoiceInfo> {
        let mut voices = Vec::new();
        let Ok(entries) = fs::read_dir(&self.models_dir) else {
            warn!(dir = %self.models_dir.display(), "models directory not readable");
            return voices;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let voice_id = entry.file_name().to_string_lossy().to_string();
            let model_path = path.join(format!("{voice_id}.onnx"));
            if !model_path.exists() {
                continue;
            }
            let sidecar = read_sidecar(&path, &voice_id);
            let language = sidecar
                .language
                .as_ref()
                .and_then(|l| l.code.clone())
                .unwrap_or_else(|| guess_language(&voice_id));
            let quality = sidecar
                .audio
                .as_ref()
                .and_then(|a| a.quality.clone())
                .unwrap_or_else(|| "medium".into());
            let mut custom_attrs = BTreeMap::new();
            custom_attrs.insert("modelPath".into(), model_path.display().to_string());
            if let Some(dataset) = &sidecar.dataset {
                custom_attrs.insert("dataset".into(), dataset.clone());
            }
            voices.push(VoiceInfo {
                id: voice_id.clone(),
                name: format!("Local-{voice_id}"),
                language,
                gender: String::new(),
                quality,
                custom_attrs,
            });
        }
        voices.sort_by(|a, b| a.id.cmp(&b.id));
        voices
    }

    fn voices_cached(&mut self) -> Vec<VoiceInfo> {
        if self.voices.is_none() {
            self.voices = Some(self.scan_models());
        }
        self.voices.clone().unwrap_or_default()
    }

    /// Resolve and cache the model handle for one voice.
    fn load_model(&mut self, voice_id: &str) -> Result<LoadedModel> {
        if let Some(model) = self.loaded.get(voice_id) {
            return Ok(model.clone());
        }
        let model_dir = self.models_dir.join(voice_id);
        let model_path = model_dir.join(format!("{voice_id}.onnx"));
        if !model_path.exists() {
            return Err(RecitoError::ModelNotFound { path: model_path });
        }
        let sidecar = read_sidecar(&model_dir, voice_id);
        let model = LoadedModel {
            model_path,
            sample_rate: sidecar
                .audio
                .as_ref()
                .and_then(|a| a.sample_rate)
                .unwrap_or(22_050),
        };
        info!(voice = voice_id, path = %model.model_path.display(), "loaded local model");
        self.loaded.insert(voice_id.into(), model.clone());
        Ok(model)
    }

    fn run_inference(&self, model: &LoadedModel, text: &str, config: &VoiceConfig) -> Result<Vec<u8>> {
        let out_dir = std::env::temp_dir();
        let out_path = out_dir.join(format!(
            "recito-local-{}-{}.wav",
            std::process::id(),
            chrono::Utc::now().timestamp_micros()
        ));

        let length_scale = 1.0 / f64::from(config.rate.clamp(0.1, 3.0));
        let mut child = Command::new(&self.binary)
            .arg("--model")
            .arg(&model.model_path)
            .arg("--length-scale")
            .arg(format!("{length_scale:.3}"))
            .arg("--output-file")
            .arg(&out_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                RecitoError::EngineUnavailable {
                    engine_id: self.descriptor.id.clone(),
                    reason: format!("cannot launch '{}': {e}", self.binary.display()),
                }
            })?;

        if let Some(stdin) = child.stdin.as_mut() {
            stdin
                .write_all(text.as_bytes())
                .map_err(|e| RecitoError::Synthesis(format!("writing text to backend: {e}")))?;
        }
        drop(child.stdin.take());

        let output = child
            .wait_with_output()
            .map_err(|e| RecitoError::Synthesis(format!("waiting for backend: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let _ = fs::remove_file(&out_path);
            return Err(RecitoError::Synthesis(format!(
                "local backend exited with {:?}: {}",
                output.status.code(),
                stderr.trim().chars().take(300).collect::<String>()
            )));
        }
        let audio = fs::read(&out_path)
            .map_err(|e| RecitoError::Synthesis(format!("backend wrote no audio: {e}")))?;
        let _ = fs::remove_file(&out_path);
        debug!(bytes = audio.len(), rate = model.sample_rate, "local inference complete");
        Ok(audio)
    }
}

fn read_sidecar(model_dir: &Path, voice_id: &str) -> ModelSidecar {
    let path = model_dir.join(format!("{voice_id}.onnx.json"));
    fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

/// `zh_CN-huayan-medium` → `zh-CN`.
fn guess_language(voice_id: &str) -> String {
    voice_id
        .split('-')
        .next()
        .map(|prefix| prefix.replace('_', "-"))
        .unwrap_or_default()
}

impl TtsEngine for LocalModelEngine {
    fn init(&mut self) -> Result<()> {
        self.status = EngineStatus {
            state: EngineState::Loading,
            ..EngineStatus::default()
        };
        if !self.models_dir.exists() {
            fs::create_dir_all(&self.models_dir)?;
        }
        let voices = self.voices_cached();
        if voices.is_empty() {
            self.status = EngineStatus::errored(format!(
                "no models found under {}",
                self.models_dir.display()
            ));
            self.status.state = EngineState::Unavailable;
            return Ok(());
        }
        self.status = EngineStatus::available(voices);
        Ok(())
    }

    fn list_voices(&mut self, filter: Option<&VoiceFilter>) -> Result<Vec<VoiceInfo>> {
        let voices = self.voices_cached();
        Ok(match filter {
            Some(f) => voices.into_iter().filter(|v| f.matches(v)).collect(),
            None => voices,
        })
    }

    fn validate(&mut self, config: &VoiceConfig) -> Result<VoiceConfig> {
        let voices = self.voices_cached();
        validate_with_mapping(config, &self.descriptor, &voices, &self.mapper)
    }

    fn synthesize(&mut self, text: &str, config: &VoiceConfig) -> Result<SynthesisResult> {
        let model = self.load_model(&config.voice_name)?;
        let audio = self.run_inference(&model, text, config)?;
        Ok(SynthesisResult::from_bytes(audio))
    }

    fn describe(&self) -> EngineDescriptor {
        self.descriptor.clone()
    }

    fn status(&self) -> EngineStatus {
        self.status.clone()
    }

    fn close(&mut self) {
        self.loaded.clear();
        self.voices = None;
        self.status = EngineStatus::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_model_dir(voices: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        for voice in voices {
            let voice_dir = dir.path().join(voice);
            fs::create_dir_all(&voice_dir).expect("mkdir");
            fs::write(voice_dir.join(format!("{voice}.onnx")), b"model").expect("model");
            fs::write(
                voice_dir.join(format!("{voice}.onnx.json")),
                r#"{"language":{"code":"zh-CN"},"audio":{"sample_rate":16000,"quality":"medium"}}"#,
            )
            .expect("sidecar");
        }
        dir
    }

    #[test]
    fn scan_discovers_models_with_sidecar_metadata() {
        let dir = fake_model_dir(&["zh_CN-huayan-medium", "en_GB-alan-medium"]);
        let mut engine = LocalModelEngine::new(dir.path());
        let voices = engine.list_voices(None).expect("voices");
        assert_eq!(voices.len(), 2);
        assert_eq!(voices[0].id, "en_GB-alan-medium");
        assert_eq!(voices[0].language, "zh-CN"); // sidecar wins over id guess
        assert!(voices[0].custom_attrs.contains_key("modelPath"));
    }

    #[test]
    fn missing_model_file_is_model_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut engine = LocalModelEngine::new(dir.path());
        let config = VoiceConfig {
            engine_id: "local_model".into(),
            voice_name: "ghost-voice".into(),
            ..VoiceConfig::default()
        };
        let err = engine.synthesize("hi", &config).unwrap_err();
        assert!(matches!(err, RecitoError::ModelNotFound { .. }));
    }

    #[test]
    fn model_handles_are_cached_per_voice() {
        let dir = fake_model_dir(&["zh_CN-huayan-medium"]);
        let mut engine = LocalModelEngine::new(dir.path());
        engine.load_model("zh_CN-huayan-medium").expect("first load");
        // Second load hits the cache even if the file disappears.
        fs::remove_file(
            dir.path()
                .join("zh_CN-huayan-medium")
                .join("zh_CN-huayan-medium.onnx"),
        )
        .expect("remove");
        let model = engine.load_model("zh_CN-huayan-medium").expect("cached load");
        assert_eq!(model.sample_rate, 16_000);
    }

    #[test]
    fn empty_models_dir_leaves_engine_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut engine = LocalModelEngine::new(dir.path().join("models"));
        engine.init().expect("init");
        assert_eq!(engine.status().state, EngineState::Unavailable);
    }

    #[test]
    fn language_guess_from_voice_id() {
        assert_eq!(guess_language("zh_CN-huayan-medium"), "zh-CN");
        assert_eq!(guess_language("en_GB-alan-medium"), "en-GB");
    }
}
