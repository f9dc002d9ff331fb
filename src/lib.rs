//! Capburn - A CLI client for a video-captioning pipeline
//!
//! This library provides the upload-and-remote-transcode orchestration path
//! of a captioning product: a resilient upload coordinator, a from-scratch
//! request signer for authenticated remote compute invocations, a bounded
//! polling state machine for long-running burn-in jobs, and a subtitle cue
//! model that round-trips between SRT and WebVTT.

pub mod burn;
pub mod cli;
pub mod config;
pub mod signing;
pub mod storage;
pub mod subtitle;
pub mod upload;
pub mod utils;

pub use burn::{BurnPipeline, BurnRequest, JobStatus, TranscodeJob};
pub use cli::{CaptionFormat, Cli, Commands};
pub use config::Config;
pub use signing::{sign, Credentials, SignedRequest, SigningParams};
pub use storage::{ObjectStore, RestObjectStore};
pub use subtitle::{active_cue_index, webvtt_from_srt, Cue, SubtitleTrack};
pub use upload::{UploadCoordinator, UploadOutcome, UploadSession, UploadState};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Fatal error conditions of the pipeline.
///
/// Every variant bubbles to the CLI as a single human-readable message and
/// is never retried automatically; retries are user-initiated.
#[derive(thiserror::Error, Debug)]
pub enum CapburnError {
    #[error("Upload timed out after {deadline_ms}ms with no success signal; retry with a smaller file or a better connection")]
    UploadTimeout { deadline_ms: u64 },

    #[error("Upload failed: {0}")]
    UploadApiError(String),

    #[error("Signing configuration error: {0}")]
    SigningError(String),

    #[error("Burn job did not finish within {attempts} status checks; try submitting again")]
    JobTimedOut { attempts: u32 },

    #[error("Burn job failed: {0}")]
    JobFailed(String),
}
