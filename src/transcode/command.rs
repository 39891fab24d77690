//! ffmpeg command builder and engine runner.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::highlights::TimeOffset;

/// Builder for an ffmpeg invocation reading one file and writing one file
#[derive(Debug, Clone)]
pub struct EngineCommand {
    input: PathBuf,
    output: PathBuf,
    /// Arguments placed before `-i`
    input_args: Vec<String>,
    /// Arguments placed after `-i`
    output_args: Vec<String>,
    log_level: String,
}

impl EngineCommand {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            log_level: "error".to_string(),
        }
    }

    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Declare the input demuxer instead of letting ffmpeg guess
    pub fn input_format(self, demuxer: &str) -> Self {
        self.input_arg("-f").input_arg(demuxer)
    }

    /// Seek the input to `offset` before decoding
    pub fn seek(self, offset: TimeOffset) -> Self {
        self.input_arg("-ss").input_arg(offset.to_string())
    }

    /// Limit the amount of input read, measured from the seek point
    pub fn duration(self, length: TimeOffset) -> Self {
        self.input_arg("-t").input_arg(length.to_string())
    }

    pub fn no_video(self) -> Self {
        self.output_arg("-vn")
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    pub fn audio_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:a").output_arg(bitrate)
    }

    pub fn audio_sample_rate(self, rate: u32) -> Self {
        self.output_arg("-ar").output_arg(rate.to_string())
    }

    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Force the output muxer
    pub fn output_format(self, muxer: &str) -> Self {
        self.output_arg("-f").output_arg(muxer)
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-nostdin".to_string(),
            "-v".to_string(),
            self.log_level.clone(),
        ];

        args.extend(self.input_args.iter().cloned());
        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());
        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());

        args
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }
}

/// Captured output of a finished engine process
#[derive(Debug, Clone, Default)]
pub struct EngineOutput {
    pub stdout: Vec<u8>,
}

/// Why an engine invocation did not succeed
#[derive(thiserror::Error, Debug)]
pub enum EngineFailure {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {}: {stderr}", code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    Exited {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{program} did not finish within {}s", after.as_secs())]
    TimedOut { program: String, after: Duration },
}

/// Last few lines of engine stderr, enough to explain a failure
pub fn stderr_tail(stderr: &[u8]) -> String {
    const MAX_LINES: usize = 5;

    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(MAX_LINES);
    lines[start..].join("; ")
}

/// Run an engine binary to completion with an upper bound on wall time.
///
/// The child is killed if the returned future is dropped (cancellation) or
/// the timeout elapses.
pub async fn run_engine(program: &str, args: &[String], timeout: Duration) -> Result<EngineOutput, EngineFailure> {
    tracing::debug!("Running engine: {} {}", program, args.join(" "));

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| EngineFailure::Spawn {
            program: program.to_string(),
            source,
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|source| EngineFailure::Spawn {
            program: program.to_string(),
            source,
        })?,
        Err(_) => {
            tracing::warn!("{} timed out after {}s, killing process", program, timeout.as_secs());
            return Err(EngineFailure::TimedOut {
                program: program.to_string(),
                after: timeout,
            });
        }
    };

    if !output.status.success() {
        return Err(EngineFailure::Exited {
            program: program.to_string(),
            code: output.status.code(),
            stderr: stderr_tail(&output.stderr),
        });
    }

    Ok(EngineOutput { stdout: output.stdout })
}
