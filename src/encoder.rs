//! Score record encoding
//!
//! Turns a scored session into the append-only `ScoreRecord` handed to the
//! sink, and renders records in the line protocol used by the time-series
//! store that holds them.

use crate::types::{DerivedEngagementSignals, ScoreRecord, Session};
use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Measurement name for score points
pub const MEASUREMENT: &str = "event_scores";

/// Source of record ids and write times.
///
/// Shared across scoring workers, so implementations must be thread-safe.
pub trait RecordStamper: Send + Sync {
    /// A fresh, unique record id
    fn next_id(&self) -> String;

    /// The write time for the next record
    fn now(&self) -> DateTime<Utc>;
}

/// Random UUIDs and the wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemStamper;

impl RecordStamper for SystemStamper {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Sequential ids and a fixed instant, for reproducible output
#[derive(Debug)]
pub struct SequenceStamper {
    prefix: String,
    next: AtomicU64,
    at: DateTime<Utc>,
}

impl SequenceStamper {
    pub fn new(prefix: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
            at,
        }
    }
}

impl RecordStamper for SequenceStamper {
    fn next_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.prefix, n)
    }

    fn now(&self) -> DateTime<Utc> {
        self.at
    }
}

/// Encoder producing score records
#[derive(Clone)]
pub struct ScoreRecordEncoder {
    stamper: Arc<dyn RecordStamper>,
}

impl Default for ScoreRecordEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoreRecordEncoder {
    /// Create an encoder stamping records with UUIDs and the wall clock
    pub fn new() -> Self {
        Self::with_stamper(SystemStamper)
    }

    /// Create an encoder with a specific stamper
    pub fn with_stamper(stamper: impl RecordStamper + 'static) -> Self {
        Self {
            stamper: Arc::new(stamper),
        }
    }

    /// Build the record for a scored session
    pub fn encode(&self, session: &Session, derived: &DerivedEngagementSignals) -> ScoreRecord {
        let key = session.key();
        ScoreRecord {
            id: self.stamper.next_id(),
            source_url: key.source_url.clone(),
            session_id: key.session_id.clone(),
            api_key: session.api_key().to_string(),
            reached_end_of_content: derived.reached_end_of_content,
            total_in_viewport_seconds: derived.total_in_viewport_seconds,
            word_count: session.word_count().unwrap_or(0.0),
            score: derived.score,
            written_at: self.stamper.now(),
        }
    }
}

impl ScoreRecord {
    /// Render as a single line-protocol point with second precision.
    ///
    /// Tags are `api_key`, `source_url` and `uuid`, in that (sorted) order.
    pub fn to_line_protocol(&self) -> String {
        let mut line = String::with_capacity(160);
        line.push_str(MEASUREMENT);

        for (tag, value) in [
            ("api_key", &self.api_key),
            ("source_url", &self.source_url),
            ("uuid", &self.id),
        ] {
            // Empty tag values are not representable
            if value.is_empty() {
                continue;
            }
            let _ = write!(line, ",{}={}", tag, escape_tag(value));
        }

        let _ = write!(
            line,
            " reached_end_of_content={},score={},total_in_viewport_time={},word_count={} {}",
            self.reached_end_of_content,
            self.score,
            self.total_in_viewport_seconds,
            self.word_count,
            self.written_at.timestamp()
        );
        line
    }
}

/// Escape commas, spaces and equals signs in a tag value
fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ',' | ' ' | '=' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '\n' => escaped.push_str("\\n"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RawEvent, SessionKey, TrendFit};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn make_session(word_count: Option<f64>) -> Session {
        let key = SessionKey::new("https://example.com/post", "visit-7");
        let event = RawEvent {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap(),
            session_key: key.clone(),
            api_key: "tenant-a".to_string(),
            scroll_depth: 0.0,
            viewport_bottom: 800.0,
            is_scrolling: true,
            is_visible: true,
            word_count,
        };
        Session::new(key, vec![event]).unwrap()
    }

    fn make_derived() -> DerivedEngagementSignals {
        DerivedEngagementSignals {
            trend: TrendFit::undefined(1),
            in_viewport_sample_count: 3,
            total_in_viewport_seconds: 6.0,
            estimated_reading_threshold_seconds: 120.0,
            estimated_read_through_ratio: Some(0.05),
            reached_end_of_content: true,
            regression_component: 10.0,
            viewport_component: 5.0,
            score: 15.0,
        }
    }

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 15, 0, 0).unwrap()
    }

    #[test]
    fn test_encode_score_record() {
        let encoder = ScoreRecordEncoder::with_stamper(SequenceStamper::new("rec", fixed_time()));
        let record = encoder.encode(&make_session(Some(540.0)), &make_derived());

        assert_eq!(
            record,
            ScoreRecord {
                id: "rec-1".to_string(),
                source_url: "https://example.com/post".to_string(),
                session_id: "visit-7".to_string(),
                api_key: "tenant-a".to_string(),
                reached_end_of_content: true,
                total_in_viewport_seconds: 6.0,
                word_count: 540.0,
                score: 15.0,
                written_at: fixed_time(),
            }
        );
    }

    #[test]
    fn test_missing_word_count_encodes_as_zero() {
        let encoder = ScoreRecordEncoder::with_stamper(SequenceStamper::new("rec", fixed_time()));
        let record = encoder.encode(&make_session(None), &make_derived());
        assert_eq!(record.word_count, 0.0);
    }

    #[test]
    fn test_sequence_stamper_ids_are_unique() {
        let stamper = SequenceStamper::new("run", fixed_time());
        assert_eq!(stamper.next_id(), "run-1");
        assert_eq!(stamper.next_id(), "run-2");
        assert_eq!(stamper.now(), fixed_time());
    }

    #[test]
    fn test_system_stamper_ids_are_uuids() {
        let stamper = SystemStamper;
        let a = stamper.next_id();
        let b = stamper.next_id();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_line_protocol() {
        let encoder = ScoreRecordEncoder::with_stamper(SequenceStamper::new("rec", fixed_time()));
        let record = encoder.encode(&make_session(Some(540.0)), &make_derived());

        assert_eq!(
            record.to_line_protocol(),
            "event_scores,api_key=tenant-a,source_url=https://example.com/post,uuid=rec-1 \
             reached_end_of_content=true,score=15,total_in_viewport_time=6,word_count=540 1705330800"
        );
    }

    #[test]
    fn test_line_protocol_escapes_tags() {
        assert_eq!(escape_tag("a b,c=d"), "a\\ b\\,c\\=d");

        let mut record = ScoreRecordEncoder::with_stamper(SequenceStamper::new("rec", fixed_time()))
            .encode(&make_session(None), &make_derived());
        record.source_url = "https://example.com/a page".to_string();
        record.api_key = String::new();

        let line = record.to_line_protocol();
        assert!(
            line.starts_with("event_scores,source_url=https://example.com/a\\ page,uuid=rec-1 ")
        );
    }
}
