//! Pipeline orchestration
//!
//! This module provides the public API for engagement scoring.
//! It orchestrates a batch from raw event records to score records.

use crate::boundary::{EventSource, ScoreSink};
use crate::config::ScoringConfig;
use crate::encoder::{RecordStamper, ScoreRecordEncoder};
use crate::error::ComputeError;
use crate::features::EngagementFeatureDeriver;
use crate::grouper::SessionGrouper;
use crate::schema::{RawEventAdapter, RawEventRecord};
use crate::trend::TrendFitter;
use crate::types::{BatchOutcome, DerivedEngagementSignals, ScoreRecord, Session};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// Score a batch of raw event records.
///
/// # Arguments
/// * `events` - Raw records in any order, possibly spanning many sessions
/// * `config` - Reading speed, sampling interval and parallelism
///
/// # Returns
/// One score record per non-empty session, ordered by session key, plus the
/// events that were excluded. Fails only when `config` is invalid.
///
/// # Example
/// ```ignore
/// let outcome = score_batch(records, &ScoringConfig::default())?;
/// for record in &outcome.records {
///     println!("{} {}", record.source_url, record.score);
/// }
/// ```
pub fn score_batch(
    events: Vec<RawEventRecord>,
    config: &ScoringConfig,
) -> Result<BatchOutcome, ComputeError> {
    let processor = EngagementProcessor::new(config.clone())?;
    Ok(processor.score_batch(events))
}

/// Score a JSON array of raw event records.
///
/// Invalid JSON fails the whole call; malformed individual records are
/// reported in the outcome instead.
pub fn score_json(raw_json: &str, config: &ScoringConfig) -> Result<BatchOutcome, ComputeError> {
    let records = RawEventAdapter::parse_array(raw_json)?;
    score_batch(records, config)
}

/// Cooperative cancellation flag shared between a caller and a scoring run
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; sessions not yet started are abandoned
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clear a previous cancellation so later runs score again
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Processor carrying the configuration, record stamper and cancel token
/// for repeated scoring runs.
pub struct EngagementProcessor {
    config: ScoringConfig,
    encoder: ScoreRecordEncoder,
    cancel: CancelToken,
}

impl EngagementProcessor {
    /// Create a processor, rejecting invalid configuration
    pub fn new(config: ScoringConfig) -> Result<Self, ComputeError> {
        config.validate()?;
        Ok(Self {
            config,
            encoder: ScoreRecordEncoder::new(),
            cancel: CancelToken::new(),
        })
    }

    /// Use a specific source of record ids and write times
    pub fn with_stamper(mut self, stamper: impl RecordStamper + 'static) -> Self {
        self.encoder = ScoreRecordEncoder::with_stamper(stamper);
        self
    }

    /// Share an existing cancel token
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// A handle that cancels runs on this processor
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Compute the derived signals and composite score for one session
    pub fn derive_signals(&self, session: &Session) -> DerivedEngagementSignals {
        let trend = TrendFitter::fit(session);
        EngagementFeatureDeriver::derive(session, trend, &self.config)
    }

    /// Score one session into its record
    pub fn score_session(&self, session: &Session) -> ScoreRecord {
        let derived = self.derive_signals(session);
        debug!(
            session = %session.key(),
            events = session.len(),
            quality = ?derived.trend.quality,
            in_viewport = derived.in_viewport_sample_count,
            score = derived.score,
            "scored session"
        );
        self.encoder.encode(session, &derived)
    }

    /// Group, fit and score a batch.
    ///
    /// Pipeline stages:
    /// 1. SessionGrouper - Validate records and group them into sessions
    /// 2. TrendFitter - Fit scroll depth against elapsed time
    /// 3. EngagementFeatureDeriver - Derive signals and the composite score
    /// 4. ScoreRecordEncoder - Stamp the output record
    pub fn score_batch(&self, events: Vec<RawEventRecord>) -> BatchOutcome {
        let event_count = events.len();
        let grouped = SessionGrouper::group(events);
        let sessions_total = grouped.sessions.len();

        if !grouped.skipped.is_empty() {
            warn!(
                skipped = grouped.skipped.len(),
                events = event_count,
                "excluded malformed events from batch"
            );
        }

        let scored = self.score_sessions(&grouped.sessions);
        let sessions_abandoned = scored.iter().filter(|r| r.is_none()).count();
        let records: Vec<ScoreRecord> = scored.into_iter().flatten().collect();
        let cancelled = sessions_abandoned > 0 || self.cancel.is_cancelled();

        if cancelled {
            warn!(
                scored = records.len(),
                abandoned = sessions_abandoned,
                "scoring run cancelled"
            );
        }

        info!(
            events = event_count,
            sessions = sessions_total,
            scored = records.len(),
            skipped = grouped.skipped.len(),
            "scored batch"
        );

        BatchOutcome {
            records,
            skipped: grouped.skipped,
            sessions_total,
            sessions_abandoned,
            cancelled,
        }
    }

    /// Score one batch from `source` and hand the records to `sink`.
    ///
    /// The sink is called even when nothing was scored, so array-shaped
    /// outputs still produce an empty document. Records completed before a
    /// cancellation are still written.
    pub fn run(
        &self,
        source: &mut dyn EventSource,
        sink: &mut dyn ScoreSink,
    ) -> Result<BatchOutcome, ComputeError> {
        let events = source.fetch_batch()?;
        let outcome = self.score_batch(events);
        sink.write_records(&outcome.records)?;
        Ok(outcome)
    }

    /// Score sessions on up to `max_parallelism` workers.
    ///
    /// Each worker takes a contiguous chunk, so the result keeps the input
    /// order. `None` marks a session abandoned after cancellation.
    fn score_sessions(&self, sessions: &[Session]) -> Vec<Option<ScoreRecord>> {
        let workers = self.config.max_parallelism.min(sessions.len());
        if workers <= 1 {
            return self.score_chunk(sessions);
        }

        let chunk_size = sessions.len().div_ceil(workers);
        thread::scope(|scope| {
            let handles: Vec<_> = sessions
                .chunks(chunk_size)
                .map(|chunk| scope.spawn(move || self.score_chunk(chunk)))
                .collect();

            handles
                .into_iter()
                .flat_map(|handle| match handle.join() {
                    Ok(records) => records,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }

    fn score_chunk(&self, sessions: &[Session]) -> Vec<Option<ScoreRecord>> {
        sessions
            .iter()
            .map(|session| {
                if self.cancel.is_cancelled() {
                    None
                } else {
                    Some(self.score_session(session))
                }
            })
            .collect()
    }
}
