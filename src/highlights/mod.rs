//! Highlight ranges and the parser that extracts them from oracle output.
//!
//! The oracle answers in free-form text. Everything in this module treats that
//! text as untrusted: it is fence-stripped, parsed as JSON, and every range is
//! validated on its own before any offset reaches the media engine.

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::{PipelineError, PipelineResult};

pub mod parser;

pub use parser::parse_highlights;

/// A position within the media timeline, millisecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimeOffset {
    millis: u64,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TimeOffsetError {
    #[error("timestamp is empty")]
    Empty,

    #[error("invalid {0} value: {1:?}")]
    InvalidValue(&'static str, String),

    #[error("{0} out of range: {1}")]
    OutOfRange(&'static str, u64),

    #[error("unsupported timestamp format: {0:?}")]
    InvalidFormat(String),
}

impl TimeOffset {
    pub const ZERO: TimeOffset = TimeOffset { millis: 0 };

    pub fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self { millis: secs * 1000 }
    }

    pub fn from_secs_f64(secs: f64) -> Option<Self> {
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        Some(Self { millis: (secs * 1000.0).round() as u64 })
    }

    pub fn as_millis(&self) -> u64 {
        self.millis
    }

}

fn parse_whole(field: &'static str, value: &str) -> Result<u64, TimeOffsetError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TimeOffsetError::InvalidValue(field, value.to_string()));
    }
    value
        .parse()
        .map_err(|_| TimeOffsetError::InvalidValue(field, value.to_string()))
}

/// Seconds field with an optional fraction, returned in milliseconds
fn parse_seconds(value: &str) -> Result<u64, TimeOffsetError> {
    let (whole, frac) = match value.split_once('.') {
        Some((whole, frac)) => (whole, Some(frac)),
        None => (value, None),
    };
    let secs = parse_whole("seconds", whole)?;

    let millis = match frac {
        None => 0,
        Some(frac) => {
            if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
                return Err(TimeOffsetError::InvalidValue("seconds", value.to_string()));
            }
            // Keep millisecond precision, drop anything finer
            let digits: String = frac.chars().chain("00".chars()).take(3).collect();
            digits
                .parse::<u64>()
                .map_err(|_| TimeOffsetError::InvalidValue("seconds", value.to_string()))?
        }
    };

    secs.checked_mul(1000)
        .and_then(|ms| ms.checked_add(millis))
        .ok_or_else(|| TimeOffsetError::InvalidValue("seconds", value.to_string()))
}

impl FromStr for TimeOffset {
    type Err = TimeOffsetError;

    /// Accepts `HH:MM:SS`, `MM:SS` or `SS`, each with an optional `.fff`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TimeOffsetError::Empty);
        }

        let parts: Vec<&str> = s.split(':').collect();
        let (hours, minutes, seconds) = match parts.as_slice() {
            [secs] => (0, 0, parse_seconds(secs)?),
            [mins, secs] => (0, parse_whole("minutes", mins)?, parse_seconds(secs)?),
            [hours, mins, secs] => (
                parse_whole("hours", hours)?,
                parse_whole("minutes", mins)?,
                parse_seconds(secs)?,
            ),
            _ => return Err(TimeOffsetError::InvalidFormat(s.to_string())),
        };

        if parts.len() > 1 && seconds >= 60_000 {
            return Err(TimeOffsetError::OutOfRange("seconds", seconds / 1000));
        }
        if parts.len() > 2 && minutes >= 60 {
            return Err(TimeOffsetError::OutOfRange("minutes", minutes));
        }

        hours
            .checked_mul(3600)
            .and_then(|h| minutes.checked_mul(60).and_then(|m| h.checked_add(m)))
            .and_then(|total| total.checked_mul(1000))
            .and_then(|ms| ms.checked_add(seconds))
            .map(TimeOffset::from_millis)
            .ok_or_else(|| TimeOffsetError::InvalidFormat(s.to_string()))
    }
}

impl fmt::Display for TimeOffset {
    /// `HH:MM:SS`, or `HH:MM:SS.mmm` when there is a fractional part
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_secs = self.millis / 1000;
        let millis = self.millis % 1000;
        let hours = total_secs / 3600;
        let minutes = (total_secs % 3600) / 60;
        let secs = total_secs % 60;

        if millis == 0 {
            write!(f, "{:02}:{:02}:{:02}", hours, minutes, secs)
        } else {
            write!(f, "{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, millis)
        }
    }
}

impl Serialize for TimeOffset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOffset {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Bounds applied to every range coming out of the oracle
#[derive(Debug, Clone)]
pub struct RangeLimits {
    /// Longest clip we are willing to cut
    pub max_clip_duration: Duration,

    /// Most ranges kept from one answer
    pub max_ranges: usize,

    /// Probed length of the source, if known
    pub media_duration: Option<TimeOffset>,
}

impl Default for RangeLimits {
    fn default() -> Self {
        Self {
            max_clip_duration: Duration::from_secs(15 * 60),
            max_ranges: 10,
            media_duration: None,
        }
    }
}

/// A validated `(start, end)` pair; `end > start` always holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HighlightRange {
    start: TimeOffset,
    end: TimeOffset,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RangeError {
    #[error("end {end} is not after start {start}")]
    NotIncreasing { start: TimeOffset, end: TimeOffset },

    #[error("duration {0}s exceeds the {1}s limit")]
    TooLong(u64, u64),

    #[error("start {start} is past the end of the media ({duration})")]
    BeyondMedia { start: TimeOffset, duration: TimeOffset },
}

impl HighlightRange {
    pub fn new(start: TimeOffset, end: TimeOffset) -> Result<Self, RangeError> {
        if end <= start {
            return Err(RangeError::NotIncreasing { start, end });
        }
        Ok(Self { start, end })
    }

    /// Build a range and apply `limits`. An end past the probed media
    /// duration is clamped to it.
    pub fn bounded(start: TimeOffset, end: TimeOffset, limits: &RangeLimits) -> Result<Self, RangeError> {
        let mut end = end;
        if let Some(duration) = limits.media_duration {
            if start >= duration {
                return Err(RangeError::BeyondMedia { start, duration });
            }
            if end > duration {
                tracing::debug!("Clamping range end {} to media duration {}", end, duration);
                end = duration;
            }
        }

        let range = Self::new(start, end)?;
        let duration = range.duration();
        if duration > limits.max_clip_duration {
            return Err(RangeError::TooLong(
                duration.as_secs(),
                limits.max_clip_duration.as_secs(),
            ));
        }
        Ok(range)
    }

    pub fn start(&self) -> TimeOffset {
        self.start
    }

    pub fn end(&self) -> TimeOffset {
        self.end
    }

    /// Clip length, the value handed to the encoder alongside `start`
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.end.as_millis() - self.start.as_millis())
    }

    /// Duration as an offset, for rendering in the engine's time syntax
    pub fn duration_offset(&self) -> TimeOffset {
        TimeOffset::from_millis(self.end.as_millis() - self.start.as_millis())
    }
}

impl fmt::Display for HighlightRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Parse a single offset coming from untrusted text
pub(crate) fn parse_offset(field: &str, raw: &str) -> PipelineResult<TimeOffset> {
    raw.parse()
        .map_err(|e| PipelineError::MalformedOracleOutput(format!("{} {:?}: {}", field, raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> TimeOffset {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_offsets() {
        assert_eq!(t("00:01:25").as_millis(), 85_000);
        assert_eq!(t("01:00:00").as_millis(), 3_600_000);
        assert_eq!(t("05:30").as_millis(), 330_000);
        assert_eq!(t("90").as_millis(), 90_000);
        assert_eq!(t(" 00:00:01.5 ").as_millis(), 1_500);
        assert_eq!(t("00:00:01.2345").as_millis(), 1_234);
    }

    #[test]
    fn test_parse_offset_rejects_garbage() {
        assert_eq!("".parse::<TimeOffset>(), Err(TimeOffsetError::Empty));
        assert!("abc".parse::<TimeOffset>().is_err());
        assert!("-00:00:05".parse::<TimeOffset>().is_err());
        assert!("00:61:00".parse::<TimeOffset>().is_err());
        assert!("00:00:75".parse::<TimeOffset>().is_err());
        assert!("1:2:3:4".parse::<TimeOffset>().is_err());
        assert!("00:00:01.".parse::<TimeOffset>().is_err());
        assert!("00:+1:00".parse::<TimeOffset>().is_err());
    }

    #[test]
    fn test_display_offsets() {
        assert_eq!(TimeOffset::from_secs(85).to_string(), "00:01:25");
        assert_eq!(TimeOffset::from_secs(3725).to_string(), "01:02:05");
        assert_eq!(TimeOffset::from_millis(1_500).to_string(), "00:00:01.500");
    }

    #[test]
    fn test_range_requires_increasing_offsets() {
        assert!(HighlightRange::new(t("00:01:00"), t("00:01:00")).is_err());
        assert!(HighlightRange::new(t("00:02:00"), t("00:01:00")).is_err());

        let range = HighlightRange::new(t("00:01:25"), t("00:01:50")).unwrap();
        assert_eq!(range.duration(), Duration::from_secs(25));
        assert_eq!(range.duration_offset().to_string(), "00:00:25");
    }

    #[test]
    fn test_bounded_rejects_long_ranges() {
        let limits = RangeLimits::default();
        let err = HighlightRange::bounded(t("00:00:00"), t("02:00:00"), &limits).unwrap_err();
        assert_eq!(err, RangeError::TooLong(7200, 900));
    }

    #[test]
    fn test_bounded_against_media_duration() {
        let limits = RangeLimits {
            media_duration: Some(t("00:02:00")),
            ..RangeLimits::default()
        };

        let clamped = HighlightRange::bounded(t("00:01:30"), t("00:02:30"), &limits).unwrap();
        assert_eq!(clamped.end(), t("00:02:00"));

        assert!(matches!(
            HighlightRange::bounded(t("00:02:00"), t("00:02:30"), &limits),
            Err(RangeError::BeyondMedia { .. })
        ));
    }
}
