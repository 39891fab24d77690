use futures_util::{stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{Config, PipelineConfig};
use crate::highlights::{parse_highlights, HighlightRange, RangeLimits, TimeOffset};
use crate::media::{capture, MediaPayload};
use crate::oracle::{GeminiOracle, HighlightOracle, HIGHLIGHT_INSTRUCTION};
use crate::transcode::{FfmpegTranscoder, Transcoder};
use crate::{PipelineError, PipelineResult, Stage};

/// What happens when one of several cuts fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CutPolicy {
    /// Any failed cut fails the whole run
    #[default]
    AllOrNothing,
    /// Return the clips that worked and report the ranges that did not
    BestEffort,
}

impl fmt::Display for CutPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CutPolicy::AllOrNothing => write!(f, "all-or-nothing"),
            CutPolicy::BestEffort => write!(f, "best-effort"),
        }
    }
}

/// States of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Receiving,
    ExtractingAudio,
    Analyzing,
    Validating,
    Cutting,
    Done,
    Failed(Stage),
}

impl PipelineState {
    /// Stage a failure in this state is tagged with
    fn stage(&self) -> Stage {
        match self {
            PipelineState::Receiving => Stage::Upload,
            PipelineState::ExtractingAudio => Stage::AudioExtraction,
            PipelineState::Analyzing => Stage::Analysis,
            PipelineState::Validating => Stage::Parsing,
            PipelineState::Cutting | PipelineState::Done => Stage::Cutting,
            PipelineState::Failed(stage) => *stage,
        }
    }
}

/// One re-encoded highlight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipResult {
    pub start: TimeOffset,
    pub end: TimeOffset,
    pub data: Vec<u8>,
}

/// A range that could not be cut under `CutPolicy::BestEffort`
#[derive(Debug)]
pub struct ClipFailure {
    pub range: HighlightRange,
    pub error: PipelineError,
}

/// Clips in the oracle's order
#[derive(Debug, Default)]
pub struct PipelineOutcome {
    pub clips: Vec<ClipResult>,
    /// Always empty under `CutPolicy::AllOrNothing`
    pub failures: Vec<ClipFailure>,
}

/// Tunables for a `Pipeline`
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub limits: RangeLimits,
    pub max_concurrent_cuts: usize,
    pub cut_policy: CutPolicy,
    pub probe_duration: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for PipelineSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            limits: config.range_limits(),
            max_concurrent_cuts: config.max_concurrent_cuts.max(1),
            cut_policy: config.cut_policy,
            probe_duration: config.probe_duration,
        }
    }
}

/// State and transition history of a single run
struct Run {
    state: PipelineState,
    history: Vec<PipelineState>,
}

impl Run {
    fn new() -> Self {
        Self {
            state: PipelineState::Receiving,
            history: vec![PipelineState::Receiving],
        }
    }

    fn advance(&mut self, next: PipelineState) {
        tracing::info!("{:?} -> {:?}", self.state, next);
        self.state = next;
        self.history.push(next);
    }

    /// Move to `Failed`, tagged with the stage that was running
    fn fail(&mut self, error: PipelineError) -> PipelineError {
        let stage = self.state.stage();
        tracing::error!("Pipeline failed during {}: {}", stage, error);
        self.state = PipelineState::Failed(stage);
        self.history.push(self.state);
        error
    }
}

/// Clip-extraction pipeline: audio → oracle → ranges → clips.
///
/// A `Pipeline` holds no per-run state and can serve concurrent runs.
pub struct Pipeline {
    transcoder: Arc<dyn Transcoder>,
    oracle: Arc<dyn HighlightOracle>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(transcoder: Arc<dyn Transcoder>, oracle: Arc<dyn HighlightOracle>, settings: PipelineSettings) -> Self {
        Self {
            transcoder,
            oracle,
            settings,
        }
    }

    /// Build the production pipeline: ffmpeg plus Gemini
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let transcoder = Arc::new(FfmpegTranscoder::new(config.transcoder.clone()));
        let oracle = Arc::new(GeminiOracle::new(&config.oracle)?);

        Ok(Self::new(transcoder, oracle, PipelineSettings::from(&config.pipeline)))
    }

    /// Capture `reader` and run the pipeline over it
    pub async fn process<R>(&self, reader: R, content_type: Option<&str>) -> PipelineResult<PipelineOutcome>
    where
        R: AsyncRead + Unpin + Send,
    {
        let span = tracing::info_span!("pipeline", run_id = %Uuid::new_v4());
        async move {
            let mut run = Run::new();
            let payload = capture(reader, content_type).await.map_err(|e| run.fail(e))?;
            tracing::info!("Received {}", crate::utils::format_file_size(payload.len() as u64));

            self.drive(&mut run, &payload).await
        }
        .instrument(span)
        .await
    }

    /// Run the pipeline over an already captured payload
    pub async fn run(&self, payload: &MediaPayload) -> PipelineResult<PipelineOutcome> {
        self.run_traced(payload).await.0
    }

    /// Like `run`, also returning every state the run went through
    pub async fn run_traced(&self, payload: &MediaPayload) -> (PipelineResult<PipelineOutcome>, Vec<PipelineState>) {
        let span = tracing::info_span!("pipeline", run_id = %Uuid::new_v4());
        let mut run = Run::new();
        let result = self.drive(&mut run, payload).instrument(span).await;
        (result, run.history)
    }

    async fn drive(&self, run: &mut Run, payload: &MediaPayload) -> PipelineResult<PipelineOutcome> {
        run.advance(PipelineState::ExtractingAudio);
        let audio = self
            .transcoder
            .extract_audio(payload)
            .await
            .map_err(|e| run.fail(e))?;
        if audio.is_empty() {
            return Err(run.fail(PipelineError::AudioExtractionFailed(
                "engine returned no audio".to_string(),
            )));
        }

        run.advance(PipelineState::Analyzing);
        let raw = self
            .oracle
            .analyze(&audio, HIGHLIGHT_INSTRUCTION)
            .await
            .map_err(|e| run.fail(e))?;
        drop(audio);

        run.advance(PipelineState::Validating);
        let mut limits = self.settings.limits.clone();
        if self.settings.probe_duration {
            limits.media_duration = self.transcoder.probe_duration(payload).await;
        }
        let ranges = parse_highlights(&raw, &limits).map_err(|e| run.fail(e))?;
        tracing::info!("Oracle proposed {} highlight(s)", ranges.len());

        run.advance(PipelineState::Cutting);
        let outcome = match self.settings.cut_policy {
            CutPolicy::AllOrNothing => self.cut_all(payload, &ranges).await,
            CutPolicy::BestEffort => self.cut_best_effort(payload, &ranges).await,
        }
        .map_err(|e| run.fail(e))?;

        run.advance(PipelineState::Done);
        Ok(outcome)
    }

    /// Cut every range; the first failure aborts the others.
    ///
    /// `buffered` yields results in submission order, so clips come back in
    /// the oracle's order whatever order the cuts finish in.
    async fn cut_all(&self, payload: &MediaPayload, ranges: &[HighlightRange]) -> PipelineResult<PipelineOutcome> {
        let clips = stream::iter(ranges.iter().copied())
            .map(|range| self.cut_one(payload, range))
            .buffered(self.settings.max_concurrent_cuts)
            .try_collect::<Vec<_>>()
            .await?;

        Ok(PipelineOutcome {
            clips,
            failures: Vec::new(),
        })
    }

    async fn cut_best_effort(
        &self,
        payload: &MediaPayload,
        ranges: &[HighlightRange],
    ) -> PipelineResult<PipelineOutcome> {
        let results = stream::iter(ranges.iter().copied())
            .map(|range| async move { (range, self.cut_one(payload, range).await) })
            .buffered(self.settings.max_concurrent_cuts)
            .collect::<Vec<_>>()
            .await;

        let mut outcome = PipelineOutcome::default();
        for (range, result) in results {
            match result {
                Ok(clip) => outcome.clips.push(clip),
                Err(error) => {
                    tracing::warn!("Skipping highlight {}: {}", range, error);
                    outcome.failures.push(ClipFailure { range, error });
                }
            }
        }

        if outcome.clips.is_empty() && !outcome.failures.is_empty() {
            return Err(outcome.failures.remove(0).error);
        }
        Ok(outcome)
    }

    async fn cut_one(&self, payload: &MediaPayload, range: HighlightRange) -> PipelineResult<ClipResult> {
        let data = self.transcoder.cut_range(payload, &range).await?;
        if data.is_empty() {
            return Err(PipelineError::ClipExtractionFailed(format!("{}: empty clip", range)));
        }

        tracing::info!("Cut highlight {} ({})", range, crate::utils::format_file_size(data.len() as u64));
        Ok(ClipResult {
            start: range.start(),
            end: range.end(),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::MockHighlightOracle;
    use crate::transcode::{AudioBuffer, MockTranscoder};
    use async_trait::async_trait;
    use std::time::Duration;

    const THREE_SHORTS: &str = r#"```json
{"shorts": [
  {"start": "00:01:25", "end": "00:01:50"},
  {"start": "00:02:10", "end": "00:02:45"},
  {"start": "00:03:00", "end": "00:03:30"}
]}
```"#;

    use PipelineState::*;

    fn payload() -> MediaPayload {
        MediaPayload::from_bytes(b"\x00\x00\x00\x18ftypmp42".to_vec(), Some("video/mp4")).unwrap()
    }

    fn t(s: &str) -> TimeOffset {
        s.parse().unwrap()
    }

    fn working_transcoder() -> MockTranscoder {
        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_extract_audio()
            .returning(|_| Ok(AudioBuffer::mp3(b"ID3audio".to_vec())));
        transcoder.expect_probe_duration().returning(|_| None);
        transcoder
            .expect_cut_range()
            .returning(|_, range| Ok(format!("clip {}", range).into_bytes()));
        transcoder
    }

    fn oracle_answering(text: &'static str) -> MockHighlightOracle {
        let mut oracle = MockHighlightOracle::new();
        oracle
            .expect_analyze()
            .withf(|audio, instruction| audio.mime_type == "audio/mp3" && instruction == HIGHLIGHT_INSTRUCTION)
            .times(1)
            .returning(move |_, _| Ok(text.to_string()));
        oracle
    }

    fn pipeline(transcoder: MockTranscoder, oracle: MockHighlightOracle) -> Pipeline {
        Pipeline::new(Arc::new(transcoder), Arc::new(oracle), PipelineSettings::default())
    }

    #[tokio::test]
    async fn test_three_ranges_become_three_clips_in_order() {
        let pipeline = pipeline(working_transcoder(), oracle_answering(THREE_SHORTS));

        let (result, history) = pipeline.run_traced(&payload()).await;
        let outcome = result.unwrap();

        assert_eq!(history, vec![Receiving, ExtractingAudio, Analyzing, Validating, Cutting, Done]);
        assert_eq!(outcome.clips.len(), 3);
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.clips[0].start, t("00:01:25"));
        assert_eq!(outcome.clips[1].start, t("00:02:10"));
        assert_eq!(outcome.clips[2].end, t("00:03:30"));
        assert_eq!(outcome.clips[0].data, b"clip 00:01:25-00:01:50".to_vec());
    }

    #[tokio::test]
    async fn test_empty_upload_fails_before_any_engine_call() {
        let mut transcoder = MockTranscoder::new();
        transcoder.expect_extract_audio().never();
        let mut oracle = MockHighlightOracle::new();
        oracle.expect_analyze().never();

        let pipeline = pipeline(transcoder, oracle);
        let err = pipeline.process(tokio::io::empty(), Some("video/mp4")).await.unwrap_err();

        assert!(matches!(err, PipelineError::NoDataReceived));
        assert_eq!(err.stage(), Stage::Upload);
    }

    #[tokio::test]
    async fn test_process_reads_stream() {
        let pipeline = pipeline(working_transcoder(), oracle_answering(THREE_SHORTS));
        let outcome = pipeline.process(&b"not really a video"[..], None).await.unwrap();
        assert_eq!(outcome.clips.len(), 3);
    }

    #[tokio::test]
    async fn test_audio_failure_stops_pipeline() {
        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_extract_audio()
            .returning(|_| Err(PipelineError::AudioExtractionFailed("moov atom not found".into())));
        transcoder.expect_cut_range().never();
        let mut oracle = MockHighlightOracle::new();
        oracle.expect_analyze().never();

        let (result, history) = pipeline(transcoder, oracle).run_traced(&payload()).await;

        assert!(matches!(result, Err(PipelineError::AudioExtractionFailed(_))));
        assert_eq!(history, vec![Receiving, ExtractingAudio, Failed(Stage::AudioExtraction)]);
    }

    #[tokio::test]
    async fn test_audio_timeout_is_tagged() {
        let mut transcoder = MockTranscoder::new();
        transcoder.expect_extract_audio().returning(|_| {
            Err(PipelineError::Timeout {
                stage: Stage::AudioExtraction,
                after: Duration::from_secs(120),
            })
        });
        let oracle = MockHighlightOracle::new();

        let (result, history) = pipeline(transcoder, oracle).run_traced(&payload()).await;
        let err = result.unwrap_err();

        assert_eq!(err.stage(), Stage::AudioExtraction);
        assert_eq!(history.last(), Some(&Failed(Stage::AudioExtraction)));
    }

    #[tokio::test]
    async fn test_cut_timeout_fails_in_cutting_stage() {
        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_extract_audio()
            .returning(|_| Ok(AudioBuffer::mp3(vec![1])));
        transcoder.expect_probe_duration().returning(|_| None);
        transcoder.expect_cut_range().returning(|_, _| {
            Err(PipelineError::Timeout {
                stage: Stage::Cutting,
                after: Duration::from_secs(120),
            })
        });

        let (result, history) = pipeline(transcoder, oracle_answering(THREE_SHORTS))
            .run_traced(&payload())
            .await;

        assert!(matches!(result, Err(PipelineError::Timeout { stage: Stage::Cutting, .. })));
        assert_eq!(history, vec![Receiving, ExtractingAudio, Analyzing, Validating, Cutting, Failed(Stage::Cutting)]);
    }

    #[tokio::test]
    async fn test_oracle_failure_is_analysis_stage() {
        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_extract_audio()
            .returning(|_| Ok(AudioBuffer::mp3(vec![1, 2, 3])));
        transcoder.expect_cut_range().never();
        let mut oracle = MockHighlightOracle::new();
        oracle
            .expect_analyze()
            .returning(|_, _| Err(PipelineError::OracleUnavailable("connection refused".into())));

        let (result, history) = pipeline(transcoder, oracle).run_traced(&payload()).await;

        assert!(matches!(result, Err(PipelineError::OracleUnavailable(_))));
        assert_eq!(history.last(), Some(&Failed(Stage::Analysis)));
    }

    #[tokio::test]
    async fn test_prose_answer_is_malformed() {
        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_extract_audio()
            .returning(|_| Ok(AudioBuffer::mp3(vec![1])));
        transcoder.expect_probe_duration().returning(|_| None);
        transcoder.expect_cut_range().never();

        let oracle = oracle_answering("Sorry, I can't find any highlights in this recording.");
        let (result, history) = pipeline(transcoder, oracle).run_traced(&payload()).await;

        assert!(matches!(result, Err(PipelineError::MalformedOracleOutput(_))));
        assert_eq!(history.last(), Some(&Failed(Stage::Parsing)));
    }

    #[tokio::test]
    async fn test_empty_shorts_is_malformed() {
        let pipeline = pipeline(working_transcoder(), oracle_answering(r#"{"shorts": []}"#));
        let err = pipeline.run(&payload()).await.unwrap_err();
        assert!(matches!(err, PipelineError::MalformedOracleOutput(_)));
    }

    #[tokio::test]
    async fn test_probed_duration_limits_ranges() {
        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_extract_audio()
            .returning(|_| Ok(AudioBuffer::mp3(vec![1])));
        transcoder
            .expect_probe_duration()
            .times(1)
            .returning(|_| Some(TimeOffset::from_secs(150)));
        transcoder
            .expect_cut_range()
            .times(2)
            .returning(|_, _| Ok(vec![0xAA]));

        let outcome = pipeline(transcoder, oracle_answering(THREE_SHORTS))
            .run(&payload())
            .await
            .unwrap();

        assert_eq!(outcome.clips.len(), 2);
        assert_eq!(outcome.clips[1].end, t("00:02:30"));
    }

    #[tokio::test]
    async fn test_one_failed_cut_fails_the_run() {
        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_extract_audio()
            .returning(|_| Ok(AudioBuffer::mp3(vec![1])));
        transcoder.expect_probe_duration().returning(|_| None);
        transcoder.expect_cut_range().returning(|_, range| {
            if range.start() == t("00:02:10") {
                Err(PipelineError::ClipExtractionFailed("encoder crashed".into()))
            } else {
                Ok(vec![1])
            }
        });

        let (result, history) = pipeline(transcoder, oracle_answering(THREE_SHORTS))
            .run_traced(&payload())
            .await;

        assert!(matches!(result, Err(PipelineError::ClipExtractionFailed(_))));
        assert_eq!(history.last(), Some(&Failed(Stage::Cutting)));
    }

    #[tokio::test]
    async fn test_best_effort_keeps_successful_clips() {
        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_extract_audio()
            .returning(|_| Ok(AudioBuffer::mp3(vec![1])));
        transcoder.expect_probe_duration().returning(|_| None);
        transcoder.expect_cut_range().returning(|_, range| {
            if range.start() == t("00:02:10") {
                Err(PipelineError::ClipExtractionFailed("encoder crashed".into()))
            } else {
                Ok(vec![1])
            }
        });

        let settings = PipelineSettings {
            cut_policy: CutPolicy::BestEffort,
            ..PipelineSettings::default()
        };
        let pipeline = Pipeline::new(
            Arc::new(transcoder),
            Arc::new(oracle_answering(THREE_SHORTS)),
            settings,
        );

        let outcome = pipeline.run(&payload()).await.unwrap();
        assert_eq!(outcome.clips.len(), 2);
        assert_eq!(outcome.clips[1].start, t("00:03:00"));
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].range.start(), t("00:02:10"));
    }

    #[tokio::test]
    async fn test_best_effort_with_no_clips_still_fails() {
        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_extract_audio()
            .returning(|_| Ok(AudioBuffer::mp3(vec![1])));
        transcoder.expect_probe_duration().returning(|_| None);
        transcoder
            .expect_cut_range()
            .returning(|_, _| Err(PipelineError::ClipExtractionFailed("disk full".into())));

        let settings = PipelineSettings {
            cut_policy: CutPolicy::BestEffort,
            ..PipelineSettings::default()
        };
        let pipeline = Pipeline::new(
            Arc::new(transcoder),
            Arc::new(oracle_answering(THREE_SHORTS)),
            settings,
        );

        let err = pipeline.run(&payload()).await.unwrap_err();
        assert!(matches!(err, PipelineError::ClipExtractionFailed(ref m) if m == "disk full"));
    }

    /// Cuts earlier ranges more slowly so they finish last
    struct ReverseSpeedTranscoder;

    #[async_trait]
    impl Transcoder for ReverseSpeedTranscoder {
        async fn extract_audio(&self, _payload: &MediaPayload) -> PipelineResult<AudioBuffer> {
            Ok(AudioBuffer::mp3(vec![1]))
        }

        async fn cut_range(&self, _payload: &MediaPayload, range: &HighlightRange) -> PipelineResult<Vec<u8>> {
            let delay = 400u64.saturating_sub(range.start().as_millis() / 1000);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(range.start().to_string().into_bytes())
        }
    }

    #[tokio::test]
    async fn test_concurrent_cuts_keep_oracle_order() {
        let pipeline = Pipeline::new(
            Arc::new(ReverseSpeedTranscoder),
            Arc::new(oracle_answering(THREE_SHORTS)),
            PipelineSettings {
                max_concurrent_cuts: 3,
                ..PipelineSettings::default()
            },
        );

        let outcome = pipeline.run(&payload()).await.unwrap();
        let starts: Vec<String> = outcome
            .clips
            .iter()
            .map(|clip| String::from_utf8(clip.data.clone()).unwrap())
            .collect();

        assert_eq!(starts, vec!["00:01:25", "00:02:10", "00:03:00"]);
    }
}
