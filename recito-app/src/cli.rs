//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "recito", about = "Batch text-to-speech converter", version)]
pub struct Cli {
    /// Config root directory (defaults to the platform config dir).
    #[arg(long, global = true)]
    pub config_root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Convert text files to audio.
    Convert(ConvertArgs),
    /// List registered engines and their status.
    Engines,
    /// Show or maintain the app configuration.
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Wav,
    Mp3,
    Ogg,
    M4a,
    Flac,
    Aac,
}

impl FormatArg {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::Ogg => "ogg",
            Self::M4a => "m4a",
            Self::Flac => "flac",
            Self::Aac => "aac",
        }
    }
}

#[derive(Debug, Parser)]
pub struct ConvertArgs {
    /// Input text files, one task per file.
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Engine id (defaults to the configured preference).
    #[arg(long)]
    pub engine: Option<String>,

    /// Voice id (defaults to the configured preference).
    #[arg(long)]
    pub voice: Option<String>,

    /// Target audio container.
    #[arg(long)]
    pub format: Option<FormatArg>,

    /// Output directory.
    #[arg(long, short, default_value = "output")]
    pub output_dir: PathBuf,

    /// Speech rate multiplier in [0.1, 3.0].
    #[arg(long, default_value_t = 1.0)]
    pub rate: f32,

    /// Worker thread count.
    #[arg(long, default_value_t = 1)]
    pub workers: usize,

    /// Write timed subtitle sidecars when the engine provides timing data.
    #[arg(long)]
    pub subtitles: bool,

    /// Merge all outputs into one file after the batch completes.
    #[arg(long)]
    pub merge: bool,
}

#[derive(Debug, Parser)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as JSON.
    Show,
    /// Validate the configuration and report problems.
    Validate,
    /// Create a configuration backup.
    Backup,
    /// List available backups.
    Backups,
    /// Restore a configuration backup by id.
    Restore { backup_id: String },
    /// Apply a named configuration template.
    Template { name: String },
}
