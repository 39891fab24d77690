use async_trait::async_trait;

use crate::transcode::AudioBuffer;
use crate::PipelineResult;

pub mod gemini;

pub use gemini::GeminiOracle;

/// Instruction sent with every audio buffer.
///
/// The `shorts` field name and the `HH:MM:SS` strings are what
/// `highlights::parse_highlights` expects back.
pub const HIGHLIGHT_INSTRUCTION: &str = r#"Analyze this audio and identify the 3 most interesting, important or climactic moments, giving the exact start and end time of each one in HH:MM:SS format. Respond only with JSON, in exactly this format:
{
  "shorts": [
    {"start": "00:01:25", "end": "00:01:50"},
    {"start": "00:02:10", "end": "00:02:45"},
    {"start": "00:03:00", "end": "00:03:30"}
  ]
}"#;

/// External content-analysis service mapping audio to free-form text
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HighlightOracle: Send + Sync {
    /// Send `audio` with `instruction` and return the raw textual answer,
    /// unparsed
    async fn analyze(&self, audio: &AudioBuffer, instruction: &str) -> PipelineResult<String>;
}
