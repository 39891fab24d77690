use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::OnceCell;

use crate::{PipelineError, PipelineResult};

/// Supported container formats
///
/// Only the MP4/QuickTime family is accepted. Anything else is demuxed as MP4
/// and left for ffmpeg to reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerFormat {
    Mp4,
    QuickTime,
}

impl ContainerFormat {
    /// Demuxer name passed to ffmpeg with `-f`
    pub fn demuxer(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::QuickTime => "mov",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::QuickTime => "mov",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "video/mp4",
            ContainerFormat::QuickTime => "video/quicktime",
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or_default().trim().to_lowercase();
        match essence.as_str() {
            "video/mp4" | "video/x-m4v" | "application/mp4" => Some(ContainerFormat::Mp4),
            "video/quicktime" => Some(ContainerFormat::QuickTime),
            _ => None,
        }
    }

    /// Resolve a declared content type, falling back to MP4
    pub fn from_declared(content_type: Option<&str>) -> Self {
        match content_type {
            Some(ct) => Self::from_mime(ct).unwrap_or_else(|| {
                tracing::warn!("Unrecognized content type {:?}, treating upload as MP4", ct);
                ContainerFormat::Mp4
            }),
            None => ContainerFormat::Mp4,
        }
    }
}

/// An uploaded video held in memory for the duration of one pipeline run
#[derive(Debug, Clone)]
pub struct MediaPayload {
    bytes: Arc<[u8]>,
    format: ContainerFormat,
    staged: Arc<OnceCell<StagedInput>>,
}

/// On-disk copy of a payload, removed when the last payload clone drops
#[derive(Debug)]
pub struct StagedInput {
    _dir: TempDir,
    path: PathBuf,
}

impl StagedInput {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MediaPayload {
    /// Wrap an already-materialized buffer; an empty buffer is not a payload
    pub fn from_bytes(bytes: Vec<u8>, content_type: Option<&str>) -> PipelineResult<Self> {
        if bytes.is_empty() {
            return Err(PipelineError::NoDataReceived);
        }

        Ok(Self {
            bytes: bytes.into(),
            format: ContainerFormat::from_declared(content_type),
            staged: Arc::new(OnceCell::new()),
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> ContainerFormat {
        self.format
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Write the payload to a scratch file the first time it is needed.
    ///
    /// MP4 demuxing needs a seekable input, so the engine never reads the
    /// payload from a pipe. Every engine call of a run shares this one copy.
    pub async fn staged(&self) -> std::io::Result<&StagedInput> {
        self.staged
            .get_or_try_init(|| async {
                let dir = tempfile::Builder::new().prefix("clipper-").tempdir()?;
                let path = dir.path().join(format!("input.{}", self.format.extension()));
                tokio::fs::write(&path, &self.bytes[..]).await?;

                tracing::debug!("Staged upload at {}", path.display());
                Ok::<_, std::io::Error>(StagedInput { _dir: dir, path })
            })
            .await
    }
}

/// Read an inbound stream to completion and materialize it as one payload.
///
/// Memory grows with the payload size; callers enforce the upload limit
/// before handing the stream over.
pub async fn capture<R>(mut reader: R, content_type: Option<&str>) -> PipelineResult<MediaPayload>
where
    R: AsyncRead + Unpin,
{
    let mut bytes = Vec::new();
    if let Err(e) = reader.read_to_end(&mut bytes).await {
        tracing::warn!("Upload stream failed after {} bytes: {}", bytes.len(), e);
        return Err(PipelineError::NoDataReceived);
    }

    tracing::debug!("Captured {} upload", crate::utils::format_file_size(bytes.len() as u64));
    MediaPayload::from_bytes(bytes, content_type)
}
