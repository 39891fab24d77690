use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

use super::command::{run_engine, EngineCommand, EngineFailure};
use super::{AudioBuffer, Transcoder};
use crate::config::TranscoderConfig;
use crate::highlights::{HighlightRange, TimeOffset};
use crate::media::MediaPayload;
use crate::{PipelineError, PipelineResult, Stage};

/// `Transcoder` backed by the ffmpeg and ffprobe binaries
pub struct FfmpegTranscoder {
    config: TranscoderConfig,
}

/// Staged input plus a private scratch directory for one engine call's output
struct Workspace<'a> {
    input: &'a Path,
    out_dir: TempDir,
}

impl Workspace<'_> {
    fn output(&self, name: &str) -> PathBuf {
        self.out_dir.path().join(name)
    }
}

impl FfmpegTranscoder {
    pub fn new(config: TranscoderConfig) -> Self {
        Self { config }
    }

    /// Resolve the payload's staged copy and create an output directory.
    ///
    /// Concurrent cuts share the input but never an output path.
    async fn workspace<'a>(
        &self,
        payload: &'a MediaPayload,
        on_error: fn(String) -> PipelineError,
    ) -> PipelineResult<Workspace<'a>> {
        let input = payload
            .staged()
            .await
            .map_err(|e| on_error(format!("could not stage input: {}", e)))?
            .path();

        let out_dir = tempfile::Builder::new()
            .prefix("clipper-out-")
            .tempdir()
            .map_err(|e| on_error(format!("could not create scratch directory: {}", e)))?;

        Ok(Workspace { input, out_dir })
    }

    /// Command producing the MP3 handed to the oracle
    pub fn audio_command(&self, payload: &MediaPayload, input: &Path, output: &Path) -> EngineCommand {
        EngineCommand::new(input, output)
            .input_format(payload.format().demuxer())
            .no_video()
            .audio_codec("libmp3lame")
            .audio_bitrate(self.config.audio_bitrate.clone())
            .audio_sample_rate(self.config.audio_sample_rate)
            .output_format("mp3")
    }

    /// Command cutting `range` out of the source.
    ///
    /// The engine receives the start offset and the clip duration
    /// (`end - start`), never the absolute end time.
    pub fn cut_command(&self, payload: &MediaPayload, range: &HighlightRange, input: &Path, output: &Path) -> EngineCommand {
        EngineCommand::new(input, output)
            .input_format(payload.format().demuxer())
            .seek(range.start())
            .duration(range.duration_offset())
            .video_codec("libx264")
            .preset(self.config.video_preset.clone())
            .audio_codec("aac")
            .output_args(["-movflags", "+faststart"])
            .output_format("mp4")
    }

    async fn run(
        &self,
        cmd: &EngineCommand,
        stage: Stage,
        timeout: Duration,
        on_error: fn(String) -> PipelineError,
    ) -> PipelineResult<Vec<u8>> {
        run_engine(&self.config.ffmpeg_path, &cmd.build_args(), timeout)
            .await
            .map_err(|failure| map_failure(failure, stage, on_error))?;

        let bytes = tokio::fs::read(cmd.output_path())
            .await
            .map_err(|e| on_error(format!("engine produced no output: {}", e)))?;

        if bytes.is_empty() {
            return Err(on_error("engine produced an empty output".to_string()));
        }
        Ok(bytes)
    }
}

fn map_failure(failure: EngineFailure, stage: Stage, on_error: fn(String) -> PipelineError) -> PipelineError {
    match failure {
        EngineFailure::TimedOut { after, .. } => PipelineError::Timeout { stage, after },
        other => on_error(other.to_string()),
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn extract_audio(&self, payload: &MediaPayload) -> PipelineResult<AudioBuffer> {
        let workspace = self.workspace(payload, PipelineError::AudioExtractionFailed).await?;
        let cmd = self.audio_command(payload, workspace.input, &workspace.output("audio.mp3"));

        let bytes = self
            .run(
                &cmd,
                Stage::AudioExtraction,
                self.config.audio_timeout(),
                PipelineError::AudioExtractionFailed,
            )
            .await?;

        tracing::debug!("Extracted {} of audio", crate::utils::format_file_size(bytes.len() as u64));
        Ok(AudioBuffer::mp3(bytes))
    }

    async fn cut_range(&self, payload: &MediaPayload, range: &HighlightRange) -> PipelineResult<Vec<u8>> {
        let workspace = self.workspace(payload, PipelineError::ClipExtractionFailed).await?;
        let cmd = self.cut_command(payload, range, workspace.input, &workspace.output("clip.mp4"));

        let bytes = self
            .run(
                &cmd,
                Stage::Cutting,
                self.config.clip_timeout(),
                PipelineError::ClipExtractionFailed,
            )
            .await
            .map_err(|e| match e {
                PipelineError::ClipExtractionFailed(reason) => {
                    PipelineError::ClipExtractionFailed(format!("{}: {}", range, reason))
                }
                other => other,
            })?;

        tracing::debug!("Cut {} ({})", range, crate::utils::format_file_size(bytes.len() as u64));
        Ok(bytes)
    }

    async fn probe_duration(&self, payload: &MediaPayload) -> Option<TimeOffset> {
        let staged = match payload.staged().await {
            Ok(staged) => staged,
            Err(e) => {
                tracing::warn!("Skipping duration probe, could not stage input: {}", e);
                return None;
            }
        };
        let args: Vec<String> = vec![
            "-v".into(),
            "error".into(),
            "-f".into(),
            payload.format().demuxer().into(),
            "-show_entries".into(),
            "format=duration".into(),
            "-of".into(),
            "default=noprint_wrappers=1:nokey=1".into(),
            staged.path().to_string_lossy().to_string(),
        ];

        match run_engine(&self.config.ffprobe_path, &args, self.config.probe_timeout()).await {
            Ok(output) => parse_probe_duration(&String::from_utf8_lossy(&output.stdout)),
            Err(e) => {
                tracing::warn!("Duration probe failed, accepting ranges unchecked: {}", e);
                None
            }
        }
    }
}

/// ffprobe prints the duration in seconds, or `N/A` for streams without one
fn parse_probe_duration(stdout: &str) -> Option<TimeOffset> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.parse::<f64>().ok())
        .and_then(TimeOffset::from_secs_f64)
        .filter(|d| d.as_millis() > 0)
}
