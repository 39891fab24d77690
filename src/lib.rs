//! Highlight Clipper - find the best moments of a video and cut them into shorts
//!
//! This library buffers an uploaded video, extracts its audio track with ffmpeg,
//! asks Gemini for highlight time ranges, validates what comes back and
//! re-encodes each range into a standalone MP4 clip.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

pub mod cli;
pub mod config;
pub mod highlights;
pub mod media;
pub mod oracle;
pub mod output;
pub mod pipeline;
pub mod transcode;
pub mod utils;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use highlights::{parse_highlights, HighlightRange, RangeLimits, TimeOffset};
pub use media::{capture, ContainerFormat, MediaPayload};
pub use oracle::{GeminiOracle, HighlightOracle, HIGHLIGHT_INSTRUCTION};
pub use pipeline::{ClipFailure, ClipResult, CutPolicy, Pipeline, PipelineOutcome, PipelineSettings, PipelineState};
pub use transcode::{AudioBuffer, FfmpegTranscoder, Transcoder};

/// Result type used by application-level code (CLI, config)
pub type Result<T> = anyhow::Result<T>;

/// Result type returned by every pipeline stage
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// A discrete step of the pipeline, used to tag failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Upload,
    AudioExtraction,
    Analysis,
    Parsing,
    Cutting,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Upload => "upload",
            Stage::AudioExtraction => "audio-extraction",
            Stage::Analysis => "analysis",
            Stage::Parsing => "parsing",
            Stage::Cutting => "cutting",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification callers use to pick a user-facing status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The upload itself was unusable
    BadInput,
    /// ffmpeg or the oracle failed, refused or timed out
    ExternalDependency,
    /// The oracle answered, but not with anything we could use
    UnparseableOutput,
}

/// Error types produced by the clip-extraction pipeline
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("No video data received")]
    NoDataReceived,

    #[error("Audio extraction failed: {0}")]
    AudioExtractionFailed(String),

    #[error("Highlight oracle unavailable: {0}")]
    OracleUnavailable(String),

    #[error("Highlight oracle rejected the request: {0}")]
    OracleRejected(String),

    #[error("Malformed oracle output: {0}")]
    MalformedOracleOutput(String),

    #[error("Clip extraction failed: {0}")]
    ClipExtractionFailed(String),

    #[error("{stage} stage timed out after {}s", after.as_secs())]
    Timeout { stage: Stage, after: Duration },
}

impl PipelineError {
    /// Stage the error originated from
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::NoDataReceived => Stage::Upload,
            PipelineError::AudioExtractionFailed(_) => Stage::AudioExtraction,
            PipelineError::OracleUnavailable(_) | PipelineError::OracleRejected(_) => Stage::Analysis,
            PipelineError::MalformedOracleOutput(_) => Stage::Parsing,
            PipelineError::ClipExtractionFailed(_) => Stage::Cutting,
            PipelineError::Timeout { stage, .. } => *stage,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::NoDataReceived => ErrorKind::BadInput,
            PipelineError::MalformedOracleOutput(_) => ErrorKind::UnparseableOutput,
            _ => ErrorKind::ExternalDependency,
        }
    }
}
