//! Session grouping
//!
//! Partitions a flat batch of records into per-session, time-ordered sequences.
//! Records that fail validation are left out of their session and reported;
//! they never abort the batch.

use crate::schema::RawEventRecord;
use crate::types::{RawEvent, Session, SessionKey, SkippedEvent};
use std::collections::BTreeMap;
use tracing::debug;

/// Sessions found in a batch plus the records that were excluded
#[derive(Debug, Clone, Default)]
pub struct GroupedBatch {
    /// Non-empty sessions in ascending key order
    pub sessions: Vec<Session>,
    /// Records excluded during validation, in input order
    pub skipped: Vec<SkippedEvent>,
}

/// Groups raw records into sessions
pub struct SessionGrouper;

impl SessionGrouper {
    /// Validate and group a batch of records
    pub fn group(records: Vec<RawEventRecord>) -> GroupedBatch {
        let mut events = Vec::with_capacity(records.len());
        let mut skipped = Vec::new();

        for (index, record) in records.into_iter().enumerate() {
            match record.validate() {
                Ok(event) => events.push(event),
                Err(reason) => {
                    let session_key = record.session_key();
                    debug!(
                        index,
                        session = ?session_key,
                        reason = %reason,
                        "excluding malformed event"
                    );
                    skipped.push(SkippedEvent {
                        index,
                        session_key,
                        reason,
                    });
                }
            }
        }

        GroupedBatch {
            sessions: Self::group_events(events),
            skipped,
        }
    }

    /// Group already-validated events.
    ///
    /// Output is ordered by session key, so identical input always yields the
    /// same sequence no matter how sessions were interleaved.
    pub fn group_events(events: Vec<RawEvent>) -> Vec<Session> {
        let mut by_key: BTreeMap<SessionKey, Vec<RawEvent>> = BTreeMap::new();
        for event in events {
            by_key
                .entry(event.session_key.clone())
                .or_default()
                .push(event);
        }

        by_key
            .into_iter()
            .filter_map(|(key, events)| Session::new(key, events))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn record(second: u32, url: &str, session: &str, depth: f64) -> RawEventRecord {
        RawEventRecord::new(
            format!("2024-01-15T14:00:{second:02}Z"),
            url,
            session,
            "key-1",
            depth,
            800.0,
        )
    }

    #[test]
    fn test_group_interleaved_sessions() {
        let records = vec![
            record(4, "https://a.com/p", "s2", 3.0),
            record(2, "https://a.com/p", "s1", 2.0),
            record(0, "https://a.com/p", "s2", 1.0),
            record(0, "https://a.com/p", "s1", 0.0),
            record(6, "https://b.com/q", "s1", 9.0),
        ];

        let grouped = SessionGrouper::group(records);
        assert!(grouped.skipped.is_empty());
        assert_eq!(grouped.sessions.len(), 3);

        let keys: Vec<String> = grouped
            .sessions
            .iter()
            .map(|s| format!("{}#{}", s.key().source_url, s.key().session_id))
            .collect();
        assert_eq!(
            keys,
            vec!["https://a.com/p#s1", "https://a.com/p#s2", "https://b.com/q#s1"]
        );

        let s2: Vec<f64> = grouped.sessions[1]
            .events()
            .iter()
            .map(|e| e.scroll_depth)
            .collect();
        assert_eq!(s2, vec![1.0, 3.0]);
    }

    #[test]
    fn test_same_session_id_on_different_urls_are_distinct() {
        let records = vec![
            record(0, "https://a.com/p", "s1", 0.0),
            record(0, "https://b.com/p", "s1", 0.0),
        ];
        let grouped = SessionGrouper::group(records);
        assert_eq!(grouped.sessions.len(), 2);
    }

    #[test]
    fn test_malformed_events_excluded() {
        let mut bad = record(2, "https://a.com/p", "s1", 0.0);
        bad.y_position = Some(Value::String("n/a".to_string()));

        let records = vec![record(0, "https://a.com/p", "s1", 0.0), bad];
        let grouped = SessionGrouper::group(records);

        assert_eq!(grouped.sessions.len(), 1);
        assert_eq!(grouped.sessions[0].len(), 1);
        assert_eq!(grouped.skipped.len(), 1);
        assert_eq!(grouped.skipped[0].index, 1);
    }

    #[test]
    fn test_session_of_only_malformed_events_disappears() {
        let mut bad = record(0, "https://a.com/p", "lonely", 0.0);
        bad.timestamp = Some(Value::String("not-a-time".to_string()));

        let grouped = SessionGrouper::group(vec![bad, record(0, "https://a.com/p", "s1", 0.0)]);

        assert_eq!(grouped.sessions.len(), 1);
        assert_eq!(grouped.sessions[0].key().session_id, "s1");
        assert_eq!(grouped.skipped.len(), 1);
    }

    #[test]
    fn test_empty_batch() {
        let grouped = SessionGrouper::group(Vec::new());
        assert!(grouped.sessions.is_empty());
        assert!(grouped.skipped.is_empty());
    }

    #[test]
    fn test_grouping_is_order_independent() {
        let forward = vec![
            record(0, "https://a.com/p", "s1", 0.0),
            record(2, "https://a.com/p", "s1", 5.0),
            record(0, "https://a.com/p", "s2", 1.0),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();

        assert_eq!(
            SessionGrouper::group(forward).sessions,
            SessionGrouper::group(reversed).sessions
        );
    }
}
