use serde::Deserialize;
use serde_json::Value;

use super::{parse_offset, HighlightRange, RangeLimits};
use crate::{PipelineError, PipelineResult};

/// Top-level shape the oracle is instructed to answer with
#[derive(Debug, Deserialize)]
struct OracleReply {
    shorts: Option<Vec<Value>>,
}

/// One entry of the `shorts` list, before validation
#[derive(Debug, Deserialize)]
struct RawRange {
    start: String,
    end: String,
}

/// Remove every code-fence marker, with its info string, and trim the result
pub fn strip_fences(raw: &str) -> String {
    let mut text = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(idx) = rest.find("```") {
        text.push_str(&rest[..idx]);
        rest = &rest[idx + 3..];
        // Info string (`json`, `JSON`, ...) directly after the marker
        let info = rest.find(|c: char| !c.is_ascii_alphanumeric()).unwrap_or(rest.len());
        rest = &rest[info..];
    }
    text.push_str(rest);

    text.trim().to_string()
}

/// Parse `text` as the reply object, falling back to the outermost `{...}`
/// slice when the JSON is wrapped in prose
fn parse_reply(text: &str) -> PipelineResult<OracleReply> {
    match serde_json::from_str::<OracleReply>(text) {
        Ok(reply) => Ok(reply),
        Err(first_err) => {
            let embedded = match (text.find('{'), text.rfind('}')) {
                (Some(open), Some(close)) if open < close => &text[open..=close],
                _ => {
                    return Err(PipelineError::MalformedOracleOutput(format!(
                        "response is not JSON: {}",
                        first_err
                    )))
                }
            };

            serde_json::from_str(embedded).map_err(|e| {
                PipelineError::MalformedOracleOutput(format!("response is not JSON: {}", e))
            })
        }
    }
}

fn validate_entry(entry: Value, limits: &RangeLimits) -> PipelineResult<HighlightRange> {
    let raw: RawRange = serde_json::from_value(entry)
        .map_err(|e| PipelineError::MalformedOracleOutput(format!("bad entry: {}", e)))?;

    let start = parse_offset("start", &raw.start)?;
    let end = parse_offset("end", &raw.end)?;

    HighlightRange::bounded(start, end, limits)
        .map_err(|e| PipelineError::MalformedOracleOutput(e.to_string()))
}

/// Extract validated highlight ranges from raw oracle text.
///
/// Entries that fail validation are dropped individually; the call only fails
/// when the text is not parseable, the `shorts` list is missing or empty, or
/// nothing survives validation. Order follows the oracle's answer.
pub fn parse_highlights(raw: &str, limits: &RangeLimits) -> PipelineResult<Vec<HighlightRange>> {
    let text = strip_fences(raw);
    if text.is_empty() {
        return Err(PipelineError::MalformedOracleOutput("empty response".to_string()));
    }

    let entries = match parse_reply(&text)?.shorts {
        Some(entries) if !entries.is_empty() => entries,
        Some(_) => {
            return Err(PipelineError::MalformedOracleOutput(
                "\"shorts\" list is empty".to_string(),
            ))
        }
        None => {
            return Err(PipelineError::MalformedOracleOutput(
                "missing \"shorts\" list".to_string(),
            ))
        }
    };

    let total = entries.len();
    let mut ranges = Vec::with_capacity(total);

    for (index, entry) in entries.into_iter().enumerate() {
        match validate_entry(entry, limits) {
            Ok(range) => ranges.push(range),
            Err(e) => tracing::warn!("Dropping highlight #{}: {}", index + 1, e),
        }
    }

    if ranges.is_empty() {
        return Err(PipelineError::MalformedOracleOutput(format!(
            "none of the {} highlight ranges were valid",
            total
        )));
    }

    if ranges.len() > limits.max_ranges {
        tracing::warn!(
            "Oracle returned {} valid ranges, keeping the first {}",
            ranges.len(),
            limits.max_ranges
        );
        ranges.truncate(limits.max_ranges);
    }

    tracing::debug!("Accepted {} of {} highlight ranges", ranges.len(), total);
    Ok(ranges)
}
