//! Output filename generation.
//!
//! Deterministic for fixed inputs (aside from the timestamp placeholders):
//! expand the naming mode, scrub characters that are illegal on common
//! filesystems, cap the length, then probe the output directory for a free
//! `_NN` suffix.

use std::path::{Path, PathBuf};

use chrono::Local;

use crate::config::{ChapterInfo, NamingMode};

/// Characters never allowed in a generated filename.
const ILLEGAL: &[char] = &['<', '>', ':', '"', '|', '?', '*', '\\', '/'];

/// Build the base filename (no extension) for a chapter.
pub fn generate_filename(
    chapter: &ChapterInfo,
    mode: NamingMode,
    custom_template: &str,
    name_length_limit: usize,
) -> String {
    let title = sanitize(&chapter.title);
    let raw = match mode {
        NamingMode::ChapterNumberTitle => format!("{:02}_{}", chapter.number, title),
        NamingMode::NumberTitle => format!("{:02}_{}", chapter.index + 1, title),
        NamingMode::TitleOnly => title,
        NamingMode::NumberOnly => {
            if chapter.number > 0 {
                format!("{:02}", chapter.number)
            } else {
                format!("{:02}", chapter.index + 1)
            }
        }
        NamingMode::OriginalFilename => chapter
            .original_filename
            .as_deref()
            .map(|name| {
                sanitize(
                    Path::new(name)
                        .file_stem()
                        .map(|s| s.to_string_lossy())
                        .unwrap_or_default()
                        .as_ref(),
                )
            })
            .filter(|stem| !stem.is_empty())
            .unwrap_or(title),
        NamingMode::Custom => sanitize(&expand_template(custom_template, chapter)),
    };

    let mut name = raw;
    if name.len() > name_length_limit {
        name = truncate_at_char_boundary(&name, name_length_limit);
        // Truncation can expose a trailing space or dot again.
        name = name.trim_end_matches([' ', '.']).to_string();
    }
    if name.is_empty() {
        name = format!("segment_{:03}", chapter.index + 1);
    }
    name
}

/// Expand `{chapter_num}`, `{title}`, `{index}`, `{timestamp}`, `{date}`,
/// `{time}` plus the zero-padded `:02d`/`:03d` variants of the numeric ones.
fn expand_template(template: &str, chapter: &ChapterInfo) -> String {
    if template.trim().is_empty() {
        return format!("{:02}_{}", chapter.number, chapter.title);
    }

    let index = chapter.index + 1;
    let now = Local::now();
    template
        .replace("{chapter_num:02d}", &format!("{:02}", chapter.number))
        .replace("{chapter_num:03d}", &format!("{:03}", chapter.number))
        .replace("{chapter_num}", &chapter.number.to_string())
        .replace("{index:02d}", &format!("{index:02}"))
        .replace("{index:03d}", &format!("{index:03}"))
        .replace("{index}", &index.to_string())
        .replace("{title}", &chapter.title)
        .replace("{timestamp}", &now.format("%Y%m%d_%H%M%S").to_string())
        .replace("{date}", &now.format("%Y%m%d").to_string())
        .replace("{time}", &now.format("%H%M%S").to_string())
}

/// Replace illegal characters with `_`, collapse whitespace runs, merge dot
/// runs, and strip leading/trailing spaces and dots.
pub fn sanitize(name: &str) -> String {
    let mut cleaned = String::with_capacity(name.len());
    for ch in name.chars() {
        if ILLEGAL.contains(&ch) {
            cleaned.push('_');
        } else {
            cleaned.push(ch);
        }
    }

    let mut collapsed = String::with_capacity(cleaned.len());
    let mut last_space = false;
    let mut last_dot = false;
    for ch in cleaned.chars() {
        if ch.is_whitespace() {
            if !last_space {
                collapsed.push(' ');
            }
            last_space = true;
            last_dot = false;
        } else if ch == '.' {
            if !last_dot {
                collapsed.push('.');
            }
            last_dot = true;
            last_space = false;
        } else {
            collapsed.push(ch);
            last_space = false;
            last_dot = false;
        }
    }

    collapsed.trim_matches([' ', '.']).to_string()
}

fn truncate_at_char_boundary(name: &str, limit: usize) -> String {
    if name.len() <= limit {
        return name.to_string();
    }
    let mut end = limit;
    while end > 0 && !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

/// Full output path, appending the lowest unused `_NN` suffix (up to 999)
/// when the plain name is already taken.
pub fn unique_path(output_dir: &Path, base: &str, extension: &str) -> PathBuf {
    let plain = output_dir.join(format!("{base}.{extension}"));
    if !plain.exists() {
        return plain;
    }
    for counter in 1..=999u32 {
        let candidate = output_dir.join(format!("{base}_{counter:02}.{extension}"));
        if !candidate.exists() {
            return candidate;
        }
    }
    plain
}
