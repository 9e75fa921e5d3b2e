//! Timed subtitle cues: parsing, offsetting, and rendering.
//!
//! Engines that provide timing data hand the pipeline SRT text; the
//! post-processor re-renders it into the configured sidecar format. Rendering
//! is pure string formatting; no external subtitle library is involved.

use std::borrow::Cow;

use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

use crate::config::SubtitleFormat;
use crate::error::{RecitoError, Result};

/// One timed caption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleCue {
    /// Seconds from stream start.
    pub start_s: f64,
    pub end_s: f64,
    pub text: String,
}

impl SubtitleCue {
    pub fn new(start_s: f64, end_s: f64, text: impl Into<String>) -> Self {
        Self {
            start_s,
            end_s,
            text: text.into(),
        }
    }
}

/// Parse SRT text into cues. Tolerates missing index lines and extra blank
/// lines; a cue with an unparsable timing line is skipped.
pub fn parse_srt(content: &str) -> Vec<SubtitleCue> {
    let mut cues = Vec::new();
    let mut lines = content.lines().peekable();

    while let Some(line) = lines.next() {
        let line = line.trim_start_matches('\u{feff}').trim();
        if line.is_empty() {
            continue;
        }
        // Either an index line followed by timing, or the timing itself.
        let timing_line = if line.contains("-->") {
            line.to_string()
        } else {
            match lines.next() {
                Some(next) if next.contains("-->") => next.trim().to_string(),
                _ => continue,
            }
        };
        let Some((start_s, end_s)) = parse_timing(&timing_line) else {
            continue;
        };
        let mut text_lines = Vec::new();
        for text in lines.by_ref() {
            if text.trim().is_empty() {
                break;
            }
            text_lines.push(text.trim().to_string());
        }
        if !text_lines.is_empty() {
            cues.push(SubtitleCue::new(start_s, end_s, text_lines.join("\n")));
        }
    }
    cues
}

fn parse_timing(line: &str) -> Option<(f64, f64)> {
    let (start, end) = line.split_once("-->")?;
    Some((parse_timestamp(start.trim())?, parse_timestamp(end.trim())?))
}

/// `HH:MM:SS,mmm` (SRT) or `HH:MM:SS.mmm` (VTT).
fn parse_timestamp(raw: &str) -> Option<f64> {
    let normalized = raw.replace(',', ".");
    let mut parts = normalized.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Shift every cue by `offset_s`, clamping at zero.
pub fn shift(cues: &mut [SubtitleCue], offset_s: f64) {
    for cue in cues {
        cue.start_s = (cue.start_s + offset_s).max(0.0);
        cue.end_s = (cue.end_s + offset_s).max(0.0);
    }
}

fn srt_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let s = (total_ms / 1000) % 60;
    let m = (total_ms / 60_000) % 60;
    let h = total_ms / 3_600_000;
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}

fn vtt_timestamp(seconds: f64) -> String {
    srt_timestamp(seconds).replace(',', ".")
}

/// `H:MM:SS.cc` with centisecond precision, as ASS/SSA expect.
fn ass_timestamp(seconds: f64) -> String {
    let total_cs = (seconds.max(0.0) * 100.0).round() as u64;
    let cs = total_cs % 100;
    let s = (total_cs / 100) % 60;
    let m = (total_cs / 6_000) % 60;
    let h = total_cs / 360_000;
    format!("{h}:{m:02}:{s:02}.{cs:02}")
}

/// `[MM:SS.cc]` LRC line tag.
fn lrc_timestamp(seconds: f64) -> String {
    let total_cs = (seconds.max(0.0) * 100.0).round() as u64;
    let cs = total_cs % 100;
    let s = (total_cs / 100) % 60;
    let m = total_cs / 6_000;
    format!("[{m:02}:{s:02}.{cs:02}]")
}

pub fn render_srt(cues: &[SubtitleCue]) -> String {
    let mut out = String::new();
    for (i, cue) in cues.iter().enumerate() {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            srt_timestamp(cue.start_s),
            srt_timestamp(cue.end_s),
            cue.text
        ));
    }
    out
}

fn render_vtt(cues: &[SubtitleCue]) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for cue in cues {
        out.push_str(&format!(
            "{} --> {}\n{}\n\n",
            vtt_timestamp(cue.start_s),
            vtt_timestamp(cue.end_s),
            cue.text
        ));
    }
    out
}

fn render_lrc(cues: &[SubtitleCue]) -> String {
    let mut out = String::from("[by:recito]\n");
    for cue in cues {
        out.push_str(&format!(
            "{}{}\n",
            lrc_timestamp(cue.start_s),
            cue.text.replace('\n', " ")
        ));
    }
    out
}

fn render_ass(cues: &[SubtitleCue], script_type: SubtitleFormat) -> String {
    let (version, style_format) = match script_type {
        SubtitleFormat::Ssa => ("V4.00", "[V4 Styles]"),
        _ => ("V4.00+", "[V4+ Styles]"),
    };
    let mut out = format!(
        "[Script Info]\nScriptType: {version}\nPlayResX: 384\nPlayResY: 288\n\n\
         {style_format}\nFormat: Name, Fontname, Fontsize, PrimaryColour\n\
         Style: Default,Arial,16,&H00FFFFFF\n\n\
         [Events]\nFormat: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n"
    );
    for cue in cues {
        out.push_str(&format!(
            "Dialogue: 0,{},{},Default,,0,0,0,,{}\n",
            ass_timestamp(cue.start_s),
            ass_timestamp(cue.end_s),
            cue.text.replace('\n', "\\N")
        ));
    }
    out
}

/// Render cues into the requested sidecar format.
pub fn render(cues: &[SubtitleCue], format: SubtitleFormat) -> String {
    match format {
        SubtitleFormat::Srt => render_srt(cues),
        SubtitleFormat::Vtt => render_vtt(cues),
        SubtitleFormat::Lrc => render_lrc(cues),
        SubtitleFormat::Ass | SubtitleFormat::Ssa => render_ass(cues, format),
    }
}

/// Encode rendered subtitle text in the configured encoding. Unknown labels
/// fall back to UTF-8.
pub fn encode(text: &str, encoding_label: &str) -> Result<Vec<u8>> {
    let label = encoding_label.trim();
    if label.is_empty() || label.eq_ignore_ascii_case("utf-8") || label.eq_ignore_ascii_case("utf8")
    {
        return Ok(text.as_bytes().to_vec());
    }
    let encoding = Encoding::for_label(label.as_bytes())
        .ok_or_else(|| RecitoError::Subtitle(format!("unknown subtitle encoding '{label}'")))?;
    let (encoded, _, had_errors) = encoding.encode(text);
    if had_errors {
        return Err(RecitoError::Subtitle(format!(
            "text not representable in '{label}'"
        )));
    }
    Ok(match encoded {
        Cow::Borrowed(b) => b.to_vec(),
        Cow::Owned(b) => b,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_SRT: &str = "1\n00:00:00,000 --> 00:00:01,500\nhello there\n\n2\n00:00:02,000 --> 00:00:03,250\nsecond line\n\n";

    #[test]
    fn srt_parse_render_round_trip() {
        let cues = parse_srt(SAMPLE_SRT);
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].text, "hello there");
        assert!((cues[1].start_s - 2.0).abs() < 1e-9);
        assert_eq!(render_srt(&cues), SAMPLE_SRT);
    }

    #[test]
    fn shift_applies_offset_to_every_timestamp() {
        let mut cues = parse_srt(SAMPLE_SRT);
        shift(&mut cues, 0.5);
        assert!((cues[0].start_s - 0.5).abs() < 1e-9);
        assert!((cues[0].end_s - 2.0).abs() < 1e-9);
        assert!((cues[1].start_s - 2.5).abs() < 1e-9);
    }

    #[test]
    fn negative_offset_clamps_at_zero() {
        let mut cues = vec![SubtitleCue::new(0.2, 1.0, "x")];
        shift(&mut cues, -0.5);
        assert_eq!(cues[0].start_s, 0.0);
        assert!((cues[0].end_s - 0.5).abs() < 1e-9);
    }

    #[test]
    fn vtt_rendering_uses_dot_separator_and_header() {
        let cues = vec![SubtitleCue::new(0.0, 1.0, "hi")];
        let vtt = render(&cues, SubtitleFormat::Vtt);
        assert!(vtt.starts_with("WEBVTT"));
        assert!(vtt.contains("00:00:00.000 --> 00:00:01.000"));
    }

    #[test]
    fn lrc_rendering_tags_each_line() {
        let cues = vec![SubtitleCue::new(62.5, 64.0, "verse")];
        let lrc = render(&cues, SubtitleFormat::Lrc);
        assert!(lrc.contains("[01:02.50]verse"));
    }

    #[test]
    fn ass_rendering_contains_dialogue_events() {
        let cues = vec![SubtitleCue::new(1.0, 2.0, "line one\nline two")];
        let ass = render(&cues, SubtitleFormat::Ass);
        assert!(ass.contains("[Events]"));
        assert!(ass.contains("Dialogue: 0,0:00:01.00,0:00:02.00,Default,,0,0,0,,line one\\Nline two"));
    }

    #[test]
    fn gbk_encoding_round_trips_chinese_text() {
        let bytes = encode("第一章", "gbk").expect("encode gbk");
        assert_ne!(bytes, "第一章".as_bytes());
        let (decoded, _, _) = encoding_rs::GBK.decode(&bytes);
        assert_eq!(decoded, "第一章");
    }

    #[test]
    fn unknown_encoding_is_an_error() {
        assert!(encode("x", "klingon-9").is_err());
    }
}
