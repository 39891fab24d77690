use anyhow::{Context, Result};
use base64::Engine;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::highlights::TimeOffset;
use crate::pipeline::{ClipFailure, ClipResult, PipelineOutcome};
use crate::{PipelineError, Stage};

/// `{"shorts": [...]}` document handed back to the caller
#[derive(Debug, Serialize)]
pub struct ShortsDocument {
    pub shorts: Vec<ShortEntry>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<FailedEntry>,
}

#[derive(Debug, Serialize)]
pub struct ShortEntry {
    pub start: TimeOffset,
    pub end: TimeOffset,
    /// Clip bytes, base64
    pub data: String,
}

#[derive(Debug, Serialize)]
pub struct FailedEntry {
    pub start: TimeOffset,
    pub end: TimeOffset,
    pub error: String,
}

/// Failure document: human-readable message plus the failing stage
#[derive(Debug, Serialize)]
pub struct ErrorDocument {
    pub error: String,
    pub stage: Stage,
}

impl From<&ClipResult> for ShortEntry {
    fn from(clip: &ClipResult) -> Self {
        Self {
            start: clip.start,
            end: clip.end,
            data: base64::engine::general_purpose::STANDARD.encode(&clip.data),
        }
    }
}

impl From<&ClipFailure> for FailedEntry {
    fn from(failure: &ClipFailure) -> Self {
        Self {
            start: failure.range.start(),
            end: failure.range.end(),
            error: failure.error.to_string(),
        }
    }
}

impl From<&PipelineOutcome> for ShortsDocument {
    fn from(outcome: &PipelineOutcome) -> Self {
        Self {
            shorts: outcome.clips.iter().map(ShortEntry::from).collect(),
            failed: outcome.failures.iter().map(FailedEntry::from).collect(),
        }
    }
}

impl From<&PipelineError> for ErrorDocument {
    fn from(error: &PipelineError) -> Self {
        Self {
            error: error.to_string(),
            stage: error.stage(),
        }
    }
}

pub fn format_as_json(outcome: &PipelineOutcome) -> Result<String> {
    serde_json::to_string_pretty(&ShortsDocument::from(outcome)).context("Failed to serialize clips")
}

pub fn format_error_as_json(error: &PipelineError) -> Result<String> {
    serde_json::to_string(&ErrorDocument::from(error)).context("Failed to serialize error")
}

/// File name of the `index`-th clip (zero-based)
pub fn clip_file_name(index: usize) -> String {
    format!("short-{}.mp4", index + 1)
}

/// Write each clip to `dir` as `short-<n>.mp4`, returning the paths in order
pub async fn save_clips(outcome: &PipelineOutcome, dir: &Path) -> Result<Vec<PathBuf>> {
    fs_err::create_dir_all(dir)?;

    let mut paths = Vec::with_capacity(outcome.clips.len());
    for (index, clip) in outcome.clips.iter().enumerate() {
        let path = dir.join(clip_file_name(index));
        fs_err::write(&path, &clip.data)?;
        tracing::debug!("Wrote {} ({} to {})", path.display(), clip.start, clip.end);
        paths.push(path);
    }

    Ok(paths)
}

/// Save the JSON document to file
pub async fn save_json(outcome: &PipelineOutcome, path: &Path) -> Result<()> {
    let content = format_as_json(outcome)?;
    fs_err::write(path, content)?;
    Ok(())
}

/// Print the JSON document to stdout
pub fn print_json(outcome: &PipelineOutcome) -> Result<()> {
    println!("{}", format_as_json(outcome)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::highlights::HighlightRange;
    use serde_json::{json, Value};

    fn outcome() -> PipelineOutcome {
        PipelineOutcome {
            clips: vec![
                ClipResult {
                    start: TimeOffset::from_secs(85),
                    end: TimeOffset::from_secs(110),
                    data: b"first".to_vec(),
                },
                ClipResult {
                    start: TimeOffset::from_secs(130),
                    end: TimeOffset::from_secs(165),
                    data: b"second".to_vec(),
                },
            ],
            failures: Vec::new(),
        }
    }

    #[test]
    fn test_json_document_shape() {
        let value: Value = serde_json::from_str(&format_as_json(&outcome()).unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "shorts": [
                    {"start": "00:01:25", "end": "00:01:50", "data": "Zmlyc3Q="},
                    {"start": "00:02:10", "end": "00:02:45", "data": "c2Vjb25k"}
                ]
            })
        );
    }

    #[test]
    fn test_failed_entries_are_listed() {
        let mut outcome = outcome();
        outcome.failures.push(ClipFailure {
            range: HighlightRange::new(TimeOffset::from_secs(180), TimeOffset::from_secs(210)).unwrap(),
            error: PipelineError::ClipExtractionFailed("encoder crashed".to_string()),
        });

        let value: Value = serde_json::from_str(&format_as_json(&outcome).unwrap()).unwrap();
        assert_eq!(value["failed"][0]["start"], "00:03:00");
        assert_eq!(value["failed"][0]["error"], "Clip extraction failed: encoder crashed");
    }

    #[test]
    fn test_error_document() {
        let json = format_error_as_json(&PipelineError::MalformedOracleOutput("missing \"shorts\" list".into())).unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["stage"], "parsing");
        assert_eq!(value["error"], "Malformed oracle output: missing \"shorts\" list");
    }

    #[tokio::test]
    async fn test_save_clips_numbers_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let paths = save_clips(&outcome(), dir.path()).await.unwrap();

        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("short-1.mp4"));
        assert_eq!(fs_err::read(&paths[1]).unwrap(), b"second");
    }
}
