//! Core types for the engagement scoring pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: validated events, sessions, trend fits, derived signals and the
//! score records handed to the sink.

use crate::schema::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Groups telemetry samples belonging to one page visit
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    /// Page the visit happened on
    pub source_url: String,
    /// Client-generated visit identifier
    pub session_id: String,
}

impl SessionKey {
    pub fn new(source_url: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            session_id: session_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.source_url, self.session_id)
    }
}

/// One validated telemetry sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Sample time (UTC)
    pub timestamp: DateTime<Utc>,
    /// Session the sample belongs to
    pub session_key: SessionKey,
    /// Content owner / tenant
    pub api_key: String,
    /// Pixels scrolled from the top of the page
    pub scroll_depth: f64,
    /// Bottom edge of the visible viewport, in pixels
    pub viewport_bottom: f64,
    /// Page was being scrolled when sampled
    pub is_scrolling: bool,
    /// Element of interest was visible when sampled
    pub is_visible: bool,
    /// Words in the content; only the session's first sample is read
    pub word_count: Option<f64>,
}

impl RawEvent {
    /// Both scrolling and visible: the sample counts towards viewport dwell
    pub fn is_in_viewport(&self) -> bool {
        self.is_scrolling && self.is_visible
    }

    /// Scroll position is past the bottom of the viewport
    pub fn is_past_viewport_bottom(&self) -> bool {
        self.scroll_depth > self.viewport_bottom
    }
}

/// Time-ordered, non-empty run of samples sharing one [`SessionKey`]
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    key: SessionKey,
    events: Vec<RawEvent>,
}

impl Session {
    /// Build a session, sorting samples by timestamp.
    ///
    /// Returns `None` for an empty sample list. Samples sharing a timestamp are
    /// ordered by their contents (a sample carrying a word count first), so
    /// the first sample, and with it the tenant and word count, never depends
    /// on arrival order.
    pub fn new(key: SessionKey, mut events: Vec<RawEvent>) -> Option<Self> {
        if events.is_empty() {
            return None;
        }
        events.sort_by(sample_order);
        Some(Self { key, events })
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn events(&self) -> &[RawEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn first_event(&self) -> &RawEvent {
        &self.events[0]
    }

    /// Tenant, taken from the first sample
    pub fn api_key(&self) -> &str {
        &self.first_event().api_key
    }

    /// Word count, taken from the first sample
    pub fn word_count(&self) -> Option<f64> {
        self.first_event().word_count
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.first_event().timestamp
    }
}

fn sample_order(a: &RawEvent, b: &RawEvent) -> Ordering {
    let word_count = match (a.word_count, b.word_count) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (x, y) => y.is_some().cmp(&x.is_some()),
    };

    a.timestamp
        .cmp(&b.timestamp)
        .then(word_count)
        .then_with(|| a.api_key.cmp(&b.api_key))
        .then_with(|| a.scroll_depth.total_cmp(&b.scroll_depth))
        .then_with(|| a.viewport_bottom.total_cmp(&b.viewport_bottom))
        .then_with(|| (a.is_scrolling, a.is_visible).cmp(&(b.is_scrolling, b.is_visible)))
}

/// Result of fitting scroll depth against elapsed time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendFit {
    /// Coefficient of determination in [0, 1]; `None` when not computable
    pub quality: Option<f64>,
    /// Fitted `[elapsed_seconds, bias]` coefficients, when the design was solvable
    pub coefficients: Option<[f64; 2]>,
    /// Number of samples in the fit
    pub observations: usize,
}

impl TrendFit {
    pub fn undefined(observations: usize) -> Self {
        Self {
            quality: None,
            coefficients: None,
            observations,
        }
    }

    pub fn is_defined(&self) -> bool {
        self.quality.is_some()
    }
}

/// Per-session intermediate values and the composite score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedEngagementSignals {
    /// Trend fit the regression component was derived from
    pub trend: TrendFit,
    /// Samples that were both scrolling and visible
    pub in_viewport_sample_count: u32,
    /// Sample count times the sampling interval
    pub total_in_viewport_seconds: f64,
    /// Seconds an average reader needs for the content
    pub estimated_reading_threshold_seconds: f64,
    /// Viewport dwell over reading threshold; `None` when the threshold is zero
    pub estimated_read_through_ratio: Option<f64>,
    /// Scroll position passed the viewport bottom at least once
    pub reached_end_of_content: bool,
    /// Regression-strength component (0-50)
    pub regression_component: f64,
    /// Viewport-dwell component (0-100)
    pub viewport_component: f64,
    /// Sum of both components (0-150)
    pub score: f64,
}

/// Append-only score fact emitted once per non-empty session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    /// Unique record identifier
    pub id: String,
    pub source_url: String,
    pub session_id: String,
    pub api_key: String,
    pub reached_end_of_content: bool,
    pub total_in_viewport_seconds: f64,
    /// Word count of the content (0 when the client did not report one)
    pub word_count: f64,
    /// Engagement score (0-150)
    pub score: f64,
    /// When the record was produced
    pub written_at: DateTime<Utc>,
}

impl ScoreRecord {
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(self.source_url.clone(), self.session_id.clone())
    }
}

/// An input event that was excluded from scoring
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedEvent {
    /// Position in the input batch
    pub index: usize,
    /// Session the event claimed to belong to, when readable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_key: Option<SessionKey>,
    /// Why the event was excluded
    pub reason: ValidationError,
}

/// Result of scoring one batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    /// One record per scored session, ordered by session key
    pub records: Vec<ScoreRecord>,
    /// Events excluded during validation
    pub skipped: Vec<SkippedEvent>,
    /// Non-empty sessions found in the batch
    pub sessions_total: usize,
    /// Sessions not scored because the run was cancelled
    pub sessions_abandoned: usize,
    /// Whether a cancellation was observed during the run
    pub cancelled: bool,
}

impl BatchOutcome {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}
