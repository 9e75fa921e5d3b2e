//! Audio post-processing: persist synthesis results, write subtitle
//! sidecars, merge chapter outputs.
//!
//! All decoding work is delegated to the external transcoder; this module
//! only sniffs container formats and moves bytes.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::audio::transcode::{TranscodeParams, Transcoder};
use crate::audio::{detect_format, subtitle, AudioFormat, SynthesisResult};
use crate::config::OutputConfig;
use crate::error::{RecitoError, Result};
use crate::task::ProducedAudio;

#[derive(Debug, Clone, Default)]
pub struct PostProcessor {
    transcoder: Transcoder,
}

impl PostProcessor {
    pub fn new(transcoder: Transcoder) -> Self {
        Self { transcoder }
    }

    fn params(config: &OutputConfig) -> TranscodeParams {
        TranscodeParams {
            bitrate: config.bitrate,
            sample_rate: config.sample_rate,
            channels: config.channels,
            normalize: config.normalize,
        }
    }

    /// Write a synthesis result to `output_path` in the configured target
    /// format, transcoding when the emitted container differs.
    pub fn persist(
        &self,
        result: &SynthesisResult,
        output_path: &Path,
        config: &OutputConfig,
    ) -> Result<ProducedAudio> {
        if result.audio.is_empty() {
            return Err(RecitoError::Synthesis("engine produced no audio".into()));
        }
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let actual = detect_format(&result.audio);
        if actual == config.format && !config.normalize {
            fs::write(output_path, &result.audio)?;
            debug!(path = %output_path.display(), format = %actual, "wrote audio verbatim");
        } else {
            // Round-trip through a sibling temp file carrying the emitted
            // container's extension so the transcoder can sniff it too.
            let temp = temp_sibling(output_path, actual);
            fs::write(&temp, &result.audio)?;
            let converted =
                self.transcoder
                    .convert(&temp, output_path, config.format, &Self::params(config));
            let _ = fs::remove_file(&temp);
            converted?;
            info!(
                from = %actual,
                to = %config.format,
                path = %output_path.display(),
                "transcoded audio"
            );
        }

        let size_bytes = fs::metadata(output_path)?.len();
        Ok(ProducedAudio {
            path: output_path.to_path_buf(),
            format: config.format,
            size_bytes,
            duration_s: result.duration_s,
            subtitle_path: None,
        })
    }

    /// Write the subtitle sidecar next to the audio output, applying the
    /// configured offset and container format. Returns the sidecar path.
    pub fn write_subtitle(
        &self,
        srt_content: &str,
        audio_output_path: &Path,
        config: &OutputConfig,
    ) -> Result<PathBuf> {
        let mut cues = subtitle::parse_srt(srt_content);
        if cues.is_empty() {
            return Err(RecitoError::Subtitle("no cues in engine timing data".into()));
        }
        if config.subtitle_offset != 0.0 {
            subtitle::shift(&mut cues, config.subtitle_offset);
        }
        let rendered = subtitle::render(&cues, config.subtitle_format);
        let encoded = subtitle::encode(&rendered, &config.subtitle_encoding)?;
        let sidecar = audio_output_path.with_extension(config.subtitle_format.extension());
        fs::write(&sidecar, encoded)?;
        info!(path = %sidecar.display(), cues = cues.len(), "wrote subtitle sidecar");
        Ok(sidecar)
    }

    /// Merge completed chapter outputs into `merge_filename`, inserting the
    /// configured inter-chapter silence when chapter markers are on.
    pub fn merge(&self, inputs: &[PathBuf], config: &OutputConfig) -> Result<PathBuf> {
        let output = config
            .output_dir
            .join(format!("{}.{}", config.merge_filename, config.format.extension()));
        let gap_s = if config.chapter_markers {
            config.chapter_interval
        } else {
            0
        };
        self.transcoder
            .concat(inputs, &output, &Self::params(config), gap_s)?;
        info!(inputs = inputs.len(), path = %output.display(), "merged chapter audio");
        Ok(output)
    }
}

fn temp_sibling(output_path: &Path, format: AudioFormat) -> PathBuf {
    let stem = output_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "audio".into());
    output_path
        .with_file_name(format!("{stem}.tmp.{}", format.extension()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubtitleFormat;
    use std::io::Cursor;

    fn wav_result() -> SynthesisResult {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22_050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("writer");
            for i in 0..2205 {
                let sample = ((i as f32 * 0.05).sin() * 8000.0) as i16;
                writer.write_sample(sample).expect("sample");
            }
            writer.finalize().expect("finalize");
        }
        SynthesisResult::from_bytes(cursor.into_inner())
    }

    #[test]
    fn matching_format_writes_verbatim() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = OutputConfig {
            output_dir: dir.path().to_path_buf(),
            format: AudioFormat::Wav,
            ..OutputConfig::default()
        };
        let out = dir.path().join("chapter.wav");
        let produced = PostProcessor::default()
            .persist(&wav_result(), &out, &config)
            .expect("persist");
        assert!(out.exists());
        assert!(produced.size_bytes > 0);
        assert_eq!(detect_format(&fs::read(&out).unwrap()), AudioFormat::Wav);
        // No temp file left behind.
        assert!(!dir.path().join("chapter.tmp.wav").exists());
    }

    #[cfg(unix)]
    #[test]
    fn mismatched_format_goes_through_transcoder_and_cleans_temp() {
        use crate::audio::transcode::test_support::fake_transcoder;

        let dir = tempfile::tempdir().expect("tempdir");
        let (program, log) = fake_transcoder(dir.path());
        let config = OutputConfig {
            output_dir: dir.path().to_path_buf(),
            format: AudioFormat::Mp3,
            ..OutputConfig::default()
        };
        let out = dir.path().join("chapter.mp3");
        let processor = PostProcessor::new(Transcoder::with_program(&program));
        processor
            .persist(&wav_result(), &out, &config)
            .expect("persist");
        assert!(out.exists());
        assert!(!dir.path().join("chapter.tmp.wav").exists());
        let logged = fs::read_to_string(log).expect("log");
        assert!(logged.contains("chapter.tmp.wav"));
        assert!(logged.contains("-b:a 128k"));
    }

    #[test]
    fn empty_audio_is_a_synthesis_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = OutputConfig::default();
        let result = SynthesisResult::from_bytes(Vec::new());
        let err = PostProcessor::default()
            .persist(&result, &dir.path().join("x.wav"), &config)
            .unwrap_err();
        assert!(matches!(err, RecitoError::Synthesis(_)));
    }

    #[test]
    fn subtitle_sidecar_lands_next_to_audio_with_offset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = OutputConfig {
            subtitle_format: SubtitleFormat::Srt,
            subtitle_offset: 0.5,
            ..OutputConfig::default()
        };
        let audio = dir.path().join("chapter.mp3");
        let srt = "1\n00:00:00,000 --> 00:00:01,000\nhi\n\n";
        let sidecar = PostProcessor::default()
            .write_subtitle(srt, &audio, &config)
            .expect("sidecar");
        assert_eq!(sidecar, dir.path().join("chapter.srt"));
        let written = fs::read_to_string(&sidecar).expect("read sidecar");
        assert!(written.contains("00:00:00,500 --> 00:00:01,500"));
    }
}
