//! Adapter for reading engage.raw_event.v1 batches
//!
//! Only text that is not JSON at all (or a top-level value that is not an
//! array, for `parse_array`) fails the whole parse. Every parsed value becomes
//! a `RawEventRecord` and is judged individually by `RawEventRecord::validate`,
//! so a wrongly typed field or a stray non-object element costs one event.

use crate::error::ComputeError;
use crate::schema::raw_event::RawEventRecord;
use crate::types::SkippedEvent;
use serde_json::Value;

/// Adapter for parsing and checking raw event batches
pub struct RawEventAdapter;

impl RawEventAdapter {
    /// Parse a JSON string containing an array of records
    pub fn parse_array(json: &str) -> Result<Vec<RawEventRecord>, ComputeError> {
        let values: Vec<Value> = serde_json::from_str(json)?;
        Ok(values.into_iter().map(RawEventRecord::from_value).collect())
    }

    /// Parse NDJSON (newline-delimited JSON) containing records
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<RawEventRecord>, ComputeError> {
        let mut records = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            records.push(Self::parse_line(trimmed, line_num + 1)?);
        }
        Ok(records)
    }

    /// Parse a single NDJSON line; `line_num` is 1-based and only used in errors
    pub fn parse_line(line: &str, line_num: usize) -> Result<RawEventRecord, ComputeError> {
        serde_json::from_str::<Value>(line)
            .map(RawEventRecord::from_value)
            .map_err(|e| {
                ComputeError::ParseError(format!("Failed to parse line {}: {}", line_num, e))
            })
    }

    /// Validate a batch, returning only the records that would be excluded
    pub fn validate_events(records: &[RawEventRecord]) -> Vec<SkippedEvent> {
        records
            .iter()
            .enumerate()
            .filter_map(|(index, record)| {
                record.validate().err().map(|reason| SkippedEvent {
                    index,
                    session_key: record.session_key(),
                    reason,
                })
            })
            .collect()
    }
}
