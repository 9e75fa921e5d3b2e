//! Typed application config sections, one JSON file each under
//! `configs/app/`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const KNOWN_THEMES: &[&str] = &["light", "dark", "system"];
pub const KNOWN_LANGUAGES: &[&str] = &["en", "zh-CN", "zh-TW", "ja-JP"];

fn is_semver(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    parts.len() == 3 && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct MainConfig {
    pub app_name: String,
    pub version: String,
    pub theme: String,
    pub language: String,
    pub auto_save: bool,
    pub auto_save_interval_s: u32,
}

impl Default for MainConfig {
    fn default() -> Self {
        Self {
            app_name: "Recito".into(),
            version: "2.0.0".into(),
            theme: "system".into(),
            language: "zh-CN".into(),
            auto_save: true,
            auto_save_interval_s: 300,
        }
    }
}

impl MainConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !KNOWN_THEMES.contains(&self.theme.as_str()) {
            errors.push(format!("unknown theme '{}'", self.theme));
        }
        if !KNOWN_LANGUAGES.contains(&self.language.as_str()) {
            errors.push(format!("unknown language '{}'", self.language));
        }
        if !is_semver(&self.version) {
            errors.push(format!("version '{}' is not MAJOR.MINOR.PATCH", self.version));
        }
        errors
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct UiConfig {
    pub window_width: u32,
    pub window_height: u32,
    pub font_size: u32,
    pub show_tray: bool,
    pub confirm_on_exit: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            window_width: 1280,
            window_height: 800,
            font_size: 13,
            show_tray: true,
            confirm_on_exit: true,
        }
    }
}

impl UiConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !(640..=7680).contains(&self.window_width) {
            errors.push(format!("window width {} outside 640..=7680", self.window_width));
        }
        if !(480..=4320).contains(&self.window_height) {
            errors.push(format!(
                "window height {} outside 480..=4320",
                self.window_height
            ));
        }
        if !(8..=32).contains(&self.font_size) {
            errors.push(format!("font size {} outside 8..=32", self.font_size));
        }
        errors
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct FilesConfig {
    pub max_file_size_mb: u32,
    pub default_output_dir: PathBuf,
    pub recent_files: Vec<PathBuf>,
    pub recent_files_limit: usize,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: 50,
            default_output_dir: PathBuf::from("output"),
            recent_files: Vec::new(),
            recent_files_limit: 20,
        }
    }
}

impl FilesConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !(1..=1024).contains(&self.max_file_size_mb) {
            errors.push(format!(
                "max file size {} MB outside 1..=1024",
                self.max_file_size_mb
            ));
        }
        if self.recent_files_limit > 100 {
            errors.push(format!(
                "recent files limit {} outside 0..=100",
                self.recent_files_limit
            ));
        }
        errors
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct PerformanceConfig {
    pub max_concurrent_tasks: usize,
    pub cache_duration_s: u32,
    pub memory_limit_mb: u32,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 1,
            cache_duration_s: 3600,
            memory_limit_mb: 1024,
        }
    }
}

impl PerformanceConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !(1..=16).contains(&self.max_concurrent_tasks) {
            errors.push(format!(
                "concurrent tasks {} outside 1..=16",
                self.max_concurrent_tasks
            ));
        }
        if !(60..=86_400).contains(&self.cache_duration_s) {
            errors.push(format!(
                "cache duration {} s outside 60..=86400",
                self.cache_duration_s
            ));
        }
        if !(256..=8192).contains(&self.memory_limit_mb) {
            errors.push(format!(
                "memory limit {} MB outside 256..=8192",
                self.memory_limit_mb
            ));
        }
        errors
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct PreferencesConfig {
    pub default_engine: String,
    pub default_voice: String,
    pub default_format: String,
    pub generate_subtitle: bool,
    pub subtitle_format: String,
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self {
            default_engine: "online_voice".into(),
            default_voice: "zh-CN-XiaoxiaoNeural".into(),
            default_format: "mp3".into(),
            generate_subtitle: false,
            subtitle_format: "srt".into(),
        }
    }
}

impl PreferencesConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.default_engine.is_empty() {
            errors.push("default engine must not be empty".into());
        }
        if crate::audio::AudioFormat::parse(&self.default_format)
            == crate::audio::AudioFormat::Unknown
        {
            errors.push(format!("unknown default format '{}'", self.default_format));
        }
        errors
    }
}

/// All app sections together, as held in memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppConfig {
    pub main: MainConfig,
    pub ui: UiConfig,
    pub files: FilesConfig,
    pub performance: PerformanceConfig,
    pub preferences: PreferencesConfig,
}

impl AppConfig {
    /// Section file names under `configs/app/`.
    pub const SECTIONS: &'static [&'static str] =
        &["main", "ui", "files", "performance", "preferences"];

    pub fn validate(&self) -> (bool, Vec<String>) {
        let mut errors = Vec::new();
        for (section, section_errors) in [
            ("main", self.main.validate()),
            ("ui", self.ui.validate()),
            ("files", self.files.validate()),
            ("performance", self.performance.validate()),
            ("preferences", self.preferences.validate()),
        ] {
            errors.extend(
                section_errors
                    .into_iter()
                    .map(|e| format!("{section}: {e}")),
            );
        }
        (errors.is_empty(), errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let (ok, errors) = AppConfig::default().validate();
        assert!(ok, "default config invalid: {errors:?}");
    }

    #[test]
    fn version_pattern_is_enforced() {
        let mut main = MainConfig::default();
        main.version = "2.0".into();
        assert_eq!(main.validate().len(), 1);
        main.version = "2.0.x".into();
        assert_eq!(main.validate().len(), 1);
        main.version = "12.34.56".into();
        assert!(main.validate().is_empty());
    }

    #[test]
    fn out_of_range_performance_values_are_reported() {
        let perf = PerformanceConfig {
            max_concurrent_tasks: 64,
            cache_duration_s: 10,
            memory_limit_mb: 64,
        };
        assert_eq!(perf.validate().len(), 3);
    }

    #[test]
    fn section_errors_are_prefixed() {
        let mut config = AppConfig::default();
        config.main.theme = "neon".into();
        let (ok, errors) = config.validate();
        assert!(!ok);
        assert!(errors[0].starts_with("main: "));
    }
}
