//! OS speech adapter.
//!
//! Drives the platform speech synthesizer through its command-line surface
//! (`espeak`/`espeak-ng` on Linux, `say` on macOS). The underlying speech
//! object is not reentrant, so every synthesis holds a process-wide mutex:
//! one call at a time regardless of how many workers the scheduler runs.
//! The blocking call sits under a watchdog: if the backend wedges, the child
//! is killed after `WATCHDOG_TIMEOUT` and whatever audio made it to the temp
//! file is still read back.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, warn};

use crate::audio::{AudioFormat, SynthesisResult};
use crate::config::VoiceConfig;
use crate::engine::descriptor::{
    EngineDescriptor, EngineKind, EngineStatus, ParameterSchema, VoiceFilter, VoiceInfo,
};
use crate::engine::mapping::VoiceMapper;
use crate::engine::{validate_with_mapping, TtsEngine};
use crate::error::{RecitoError, Result};

/// The OS speech object is process-wide; serialize every synthesis.
static SPEECH_LOCK: Mutex<()> = Mutex::new(());

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Upper bound on one blocking synthesis call.
const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SystemSpeechEngine {
    descriptor: EngineDescriptor,
    status: EngineStatus,
    mapper: VoiceMapper,
    /// Detected backend command, set by `init`.
    command: Option<String>,
    voices: Option<Vec<VoiceInfo>>,
    watchdog_timeout: Duration,
}

impl SystemSpeechEngine {
    pub const ENGINE_ID: &'static str = "system_speech";

    pub fn new() -> Self {
        let descriptor = EngineDescriptor {
            id: Self::ENGINE_ID.into(),
            display_name: "System Speech".into(),
            version: "1.0.0".into(),
            kind: EngineKind::SystemSpeech,
            supported_languages: BTreeSet::from(["en-US".to_string(), "zh-CN".to_string()]),
            supported_formats: BTreeSet::from([AudioFormat::Wav]),
            is_online: false,
            requires_auth: false,
            parameter_schema: ParameterSchema::default(),
            default_voice_id: "default".into(),
            fallback_voice_id: "default".into(),
            emits_format: AudioFormat::Wav,
            provides_timing_data: false,
        };
        Self {
            descriptor,
            status: EngineStatus::default(),
            mapper: VoiceMapper::new(),
            command: None,
            voices: None,
            watchdog_timeout: WATCHDOG_TIMEOUT,
        }
    }

    #[cfg(test)]
    fn with_watchdog_timeout(mut self, timeout: Duration) -> Self {
        self.watchdog_timeout = timeout;
        self
    }

    /// Find a usable speech command on this host.
    fn detect_command() -> Option<String> {
        for candidate in ["espeak-ng", "espeak", "say"] {
            let mut probe = Command::new(candidate);
            if candidate == "say" {
                probe.arg("-v").arg("?");
            } else {
                probe.arg("--version");
            }
            let ok = probe.output().map(|o| o.status.success()).unwrap_or(false);
            if ok {
                return Some(candidate.to_string());
            }
        }
        None
    }

    fn enumerate_voices(command: &str) -> Vec<VoiceInfo> {
        let output = match Command::new(command).arg("--voices").output() {
            Ok(o) if o.status.success() => String::from_utf8_lossy(&o.stdout).to_string(),
            _ => return vec![default_voice()],
        };
        let mut voices = parse_voice_list(&output);
        if voices.is_empty() {
            voices.push(default_voice());
        }
        voices
    }

    /// Spawn the backend writing to `out_path`, bounded by the watchdog.
    fn run_with_watchdog(&self, mut command: Command) -> Result<bool> {
        let mut child = command.spawn().map_err(|e| RecitoError::EngineUnavailable {
            engine_id: self.descriptor.id.clone(),
            reason: format!("cannot launch speech backend: {e}"),
        })?;
        let started = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status.success()),
                Ok(None) => {
                    if started.elapsed() >= self.watchdog_timeout {
                        warn!("speech backend exceeded watchdog, killing");
                        let _ = child.kill();
                        let _ = child.wait();
                        // The temp file may still hold usable audio.
                        return Ok(false);
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    return Err(RecitoError::Synthesis(format!(
                        "waiting for speech backend: {e}"
                    )))
                }
            }
        }
    }
}

fn default_voice() -> VoiceInfo {
    VoiceInfo {
        id: "default".into(),
        name: "System Default".into(),
        language: "en-US".into(),
        gender: String::new(),
        quality: String::new(),
        custom_attrs: BTreeMap::new(),
    }
}

/// Parse `espeak --voices` output:
/// `Pty Language Age/Gender VoiceName          File          Other Languages`.
fn parse_voice_list(output: &str) -> Vec<VoiceInfo> {
    let line_re = Regex::new(r"^\s*\d+\s+([\w-]+)\s+([MF\-+ ])\s*([\w\-+]+)").expect("voice regex");
    let mut voices = Vec::new();
    for line in output.lines().skip(1) {
        let Some(captures) = line_re.captures(line) else {
            continue;
        };
        let language = captures.get(1).map_or("", |m| m.as_str()).to_string();
        let gender = match captures.get(2).map_or("", |m| m.as_str()) {
            "M" => "male",
            "F" => "female",
            _ => "",
        };
        let id = captures.get(3).map_or("", |m| m.as_str()).to_string();
        if id.is_empty() {
            continue;
        }
        voices.push(VoiceInfo {
            id: id.clone(),
            name: format!("{language} ({id})"),
            language,
            gender: gender.into(),
            quality: String::new(),
            custom_attrs: BTreeMap::new(),
        });
    }
    voices
}

impl Default for SystemSpeechEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TtsEngine for SystemSpeechEngine {
    fn init(&mut self) -> Result<()> {
        match Self::detect_command() {
            Some(command) => {
                let voices = Self::enumerate_voices(&command);
                self.command = Some(command);
                self.status = EngineStatus::available(voices.clone());
                self.voices = Some(voices);
                Ok(())
            }
            None => {
                self.status = EngineStatus::errored("no system speech backend found");
                Ok(())
            }
        }
    }

    fn list_voices(&mut self, filter: Option<&VoiceFilter>) -> Result<Vec<VoiceInfo>> {
        if self.voices.is_none() {
            if let Some(command) = &self.command {
                self.voices = Some(Self::enumerate_voices(command));
            }
        }
        let voices = self.voices.clone().unwrap_or_else(|| vec![default_voice()]);
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
        let command = self.command.clone().ok_or_else(|| RecitoError::EngineUnavailable {
            engine_id: self.descriptor.id.clone(),
            reason: "engine not initialized".into(),
        })?;

        // One synthesis at a time, process-wide. The backend speech object
        // is stateless across our invocations because each call is a fresh
        // process, which also serves as the state reset between calls.
        let _guard = SPEECH_LOCK.lock();

        let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let out_path: PathBuf = std::env::temp_dir().join(format!(
            "recito-speech-{}-{counter}.wav",
            std::process::id()
        ));

        // espeak rate: words per minute, 175 is the default.
        let wpm = (175.0 * config.rate.clamp(0.1, 3.0)).round() as i64;
        let mut invocation = Command::new(&command);
        invocation
            .arg("-w")
            .arg(&out_path)
            .arg("-s")
            .arg(wpm.to_string());
        if config.voice_name != "default" && !config.voice_name.is_empty() {
            invocation.arg("-v").arg(&config.voice_name);
        }
        invocation.arg(text);

        debug!(backend = %command, chars = text.chars().count(), "system speech synthesis");
        let completed = self.run_with_watchdog(invocation)?;

        let audio = fs::read(&out_path).unwrap_or_default();
        let _ = fs::remove_file(&out_path);
        if audio.is_empty() {
            return Err(RecitoError::Synthesis(if completed {
                "speech backend produced no audio".into()
            } else {
                "speech backend timed out with no audio".into()
            }));
        }
        if !completed {
            warn!("returning partial audio after watchdog kill");
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
        self.command = None;
        self.voices = None;
        self.status = EngineStatus::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ESPEAK_VOICES: &str = "Pty Language Age/Gender VoiceName          File          Other Languages\n\
 5  af             M  afrikaans            other/af\n\
 5  en-gb          M  english              en\n\
 5  zh             F  Mandarin             other/zh\n";

    #[test]
    fn voice_list_parsing_extracts_language_and_gender() {
        let voices = parse_voice_list(ESPEAK_VOICES);
        assert_eq!(voices.len(), 3);
        assert_eq!(voices[1].id, "english");
        assert_eq!(voices[1].language, "en-gb");
        assert_eq!(voices[1].gender, "male");
        assert_eq!(voices[2].gender, "female");
    }

    #[test]
    fn uninitialized_engine_refuses_synthesis() {
        let mut engine = SystemSpeechEngine::new();
        let config = VoiceConfig {
            engine_id: "system_speech".into(),
            voice_name: "default".into(),
            ..VoiceConfig::default()
        };
        let err = engine.synthesize("hello", &config).unwrap_err();
        assert!(matches!(err, RecitoError::EngineUnavailable { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn watchdog_kills_wedged_backend() {
        let engine = SystemSpeechEngine::new().with_watchdog_timeout(Duration::from_millis(200));
        let mut wedged = Command::new("sleep");
        wedged.arg("30");
        let started = Instant::now();
        let completed = engine.run_with_watchdog(wedged).expect("watchdog run");
        assert!(!completed);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
