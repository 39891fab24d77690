use async_trait::async_trait;

use crate::highlights::{HighlightRange, TimeOffset};
use crate::media::MediaPayload;
use crate::PipelineResult;

pub mod command;
pub mod ffmpeg;

pub use command::{EngineCommand, EngineOutput};
pub use ffmpeg::FfmpegTranscoder;

/// Compressed audio handed to the oracle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBuffer {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
}

impl AudioBuffer {
    pub fn mp3(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime_type: "audio/mp3",
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Media engine operations the pipeline depends on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Extract the audio track as a compressed buffer
    async fn extract_audio(&self, payload: &MediaPayload) -> PipelineResult<AudioBuffer>;

    /// Re-encode one range into a standalone, playable container
    async fn cut_range(&self, payload: &MediaPayload, range: &HighlightRange) -> PipelineResult<Vec<u8>>;

    /// Total media duration, `None` when the engine cannot tell
    async fn probe_duration(&self, _payload: &MediaPayload) -> Option<TimeOffset> {
        None
    }
}
