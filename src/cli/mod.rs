use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "capburn",
    about = "Capburn - Upload videos, edit subtitles, and burn captions in via a remote compute backend",
    version,
    long_about = "A CLI client for a video-captioning pipeline: upload a video to object storage, convert and inspect subtitle tracks, and submit a remote caption burn-in job that is polled to completion."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upload a video file to object storage
    Upload {
        /// Path to the video file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Burn subtitles into a video via the remote compute backend
    Burn {
        /// Public address of the uploaded video
        #[arg(value_name = "VIDEO_URL")]
        video_url: String,

        /// SRT subtitle file to burn in
        #[arg(short, long, value_name = "FILE")]
        subtitles: PathBuf,

        /// Style prompt for the rendered captions
        #[arg(long, value_name = "PROMPT")]
        style: Option<String>,

        /// Download the finished video to this path
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Convert a subtitle file between caption formats
    Convert {
        /// Subtitle file to convert (SRT)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Target format
        #[arg(short, long, value_enum, default_value = "vtt")]
        format: CaptionFormat,

        /// Output file path (prints to console if not specified)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// List the cues of a subtitle file
    Cues {
        /// Subtitle file to inspect (SRT)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Show only the cue active at this playhead, in seconds
        #[arg(long, value_name = "SECONDS")]
        at: Option<f64>,
    },

    /// Configure storage, signing, and backend settings
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum CaptionFormat {
    /// SRT subtitle format (numeric cue indices, comma millisecond separator)
    Srt,
    /// WebVTT format (header line, dot millisecond separator)
    Vtt,
}

impl std::fmt::Display for CaptionFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptionFormat::Srt => write!(f, "srt"),
            CaptionFormat::Vtt => write!(f, "vtt"),
        }
    }
}
