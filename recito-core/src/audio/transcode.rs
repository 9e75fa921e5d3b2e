//! External transcoder invocation.
//!
//! The core never decodes or resamples audio itself; any container/parameter
//! conversion shells out to an ffmpeg-compatible binary. A non-zero exit or a
//! missing/empty output file is a hard failure for the task.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, warn};

use crate::audio::AudioFormat;
use crate::error::{RecitoError, Result};

/// Target audio parameters forwarded on every conversion.
#[derive(Debug, Clone, Copy)]
pub struct TranscodeParams {
    /// kbit/s.
    pub bitrate: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub normalize: bool,
}

#[derive(Debug, Clone)]
pub struct Transcoder {
    program: PathBuf,
}

impl Default for Transcoder {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
        }
    }
}

impl Transcoder {
    /// Use a specific binary (tests point this at a stand-in script).
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("-version")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    /// Convert `input` into `output` with the given target parameters.
    pub fn convert(
        &self,
        input: &Path,
        output: &Path,
        target_format: AudioFormat,
        params: &TranscodeParams,
    ) -> Result<()> {
        let mut command = Command::new(&self.program);
        command
            .arg("-y")
            .arg("-i")
            .arg(input)
            .arg("-ar")
            .arg(params.sample_rate.to_string())
            .arg("-ac")
            .arg(params.channels.to_string());
        // WAV is PCM; a bitrate flag would be ignored or rejected.
        if target_format != AudioFormat::Wav {
            command.arg("-b:a").arg(format!("{}k", params.bitrate));
        }
        if params.normalize {
            command.arg("-filter:a").arg("loudnorm");
        }
        command.arg(output);
        self.run(command, output)
    }

    /// Concatenate `inputs` into `output`, optionally separating chapters
    /// with `gap_s` seconds of generated silence.
    pub fn concat(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        params: &TranscodeParams,
        gap_s: u32,
    ) -> Result<()> {
        if inputs.is_empty() {
            return Err(RecitoError::Transcode("nothing to merge".into()));
        }
        let mut command = Command::new(&self.program);
        command.arg("-y");
        for input in inputs {
            command.arg("-i").arg(input);
        }
        let mut stream_count = inputs.len();
        if gap_s > 0 && inputs.len() > 1 {
            command
                .arg("-f")
                .arg("lavfi")
                .arg("-t")
                .arg(gap_s.to_string())
                .arg("-i")
                .arg(format!(
                    "anullsrc=r={}:cl={}",
                    params.sample_rate,
                    if params.channels > 1 { "stereo" } else { "mono" }
                ));
            // Interleave: in0 gap in1 gap ... in(n-1); the silence input is
            // reused between every pair.
            let silence_index = inputs.len();
            let mut filter = String::new();
            for (i, _) in inputs.iter().enumerate() {
                filter.push_str(&format!("[{i}:a]"));
                if i + 1 < inputs.len() {
                    filter.push_str(&format!("[{silence_index}:a]"));
                }
            }
            stream_count = inputs.len() * 2 - 1;
            filter.push_str(&format!("concat=n={stream_count}:v=0:a=1[out]"));
            command.arg("-filter_complex").arg(filter).arg("-map").arg("[out]");
        } else if inputs.len() > 1 {
            let mut filter = String::new();
            for (i, _) in inputs.iter().enumerate() {
                filter.push_str(&format!("[{i}:a]"));
            }
            filter.push_str(&format!("concat=n={stream_count}:v=0:a=1[out]"));
            command.arg("-filter_complex").arg(filter).arg("-map").arg("[out]");
        }
        command
            .arg("-ar")
            .arg(params.sample_rate.to_string())
            .arg("-ac")
            .arg(params.channels.to_string());
        if params.normalize {
            command.arg("-filter:a").arg("loudnorm");
        }
        command.arg(output);
        self.run(command, output)
    }

    fn run(&self, mut command: Command, output: &Path) -> Result<()> {
        debug!(program = %self.program.display(), ?command, "invoking transcoder");
        let result = command.output().map_err(|e| {
            RecitoError::Transcode(format!(
                "failed to launch '{}': {e}",
                self.program.display()
            ))
        })?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            warn!(status = ?result.status.code(), "transcoder failed");
            return Err(RecitoError::Transcode(format!(
                "transcoder exited with {:?}: {}",
                result.status.code(),
                stderr.trim().chars().take(400).collect::<String>()
            )));
        }
        let size = std::fs::metadata(output).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(RecitoError::Transcode(format!(
                "transcoder produced no output at {}",
                output.display()
            )));
        }
        Ok(())
    }
}


#[cfg(all(test, unix))]
mod tests {
    use super::test_support::fake_transcoder;
    use super::*;

    #[test]
    fn convert_invokes_program_with_target_parameters() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (program, log) = fake_transcoder(dir.path());
        let input = dir.path().join("in.wav");
        std::fs::write(&input, b"RIFFxxxxWAVE").expect("write input");
        let output = dir.path().join("out.mp3");

        let transcoder = Transcoder::with_program(&program);
        let params = TranscodeParams {
            bitrate: 128,
            sample_rate: 22_050,
            channels: 1,
            normalize: false,
        };
        transcoder
            .convert(&input, &output, AudioFormat::Mp3, &params)
            .expect("convert");

        assert!(output.exists());
        let logged = std::fs::read_to_string(&log).expect("log");
        assert!(logged.contains("-ar 22050"));
        assert!(logged.contains("-ac 1"));
        assert!(logged.contains("-b:a 128k"));
    }

    #[test]
    fn failing_program_is_a_transcode_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let transcoder = Transcoder::with_program(dir.path().join("does-not-exist"));
        let params = TranscodeParams {
            bitrate: 128,
            sample_rate: 22_050,
            channels: 1,
            normalize: false,
        };
        let err = transcoder
            .convert(
                &dir.path().join("in.wav"),
                &dir.path().join("out.mp3"),
                AudioFormat::Mp3,
                &params,
            )
            .unwrap_err();
        assert!(matches!(err, RecitoError::Transcode(_)));
    }

    #[test]
    fn empty_output_is_a_transcode_error() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("noop.sh");
        std::fs::write(&script, "#!/bin/sh\nexit 0\n").expect("write");
        let mut perms = std::fs::metadata(&script).expect("stat").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).expect("chmod");

        let transcoder = Transcoder::with_program(&script);
        let params = TranscodeParams {
            bitrate: 128,
            sample_rate: 22_050,
            channels: 1,
            normalize: false,
        };
        let err = transcoder
            .convert(
                &dir.path().join("in.wav"),
                &dir.path().join("out.mp3"),
                AudioFormat::Mp3,
                &params,
            )
            .unwrap_err();
        assert!(matches!(err, RecitoError::Transcode(_)));
    }
}
