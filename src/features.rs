//! Engagement feature derivation
//!
//! Computes viewport dwell, the reading-time threshold and the end-of-content
//! flag for a session, then combines them with the trend fit quality into a
//! bounded composite score.

use crate::config::ScoringConfig;
use crate::types::{DerivedEngagementSignals, RawEvent, Session, TrendFit};

/// Cap on the regression-strength component
pub const MAX_REGRESSION_POINTS: f64 = 50.0;

/// Cap on the viewport-dwell component
pub const MAX_VIEWPORT_POINTS: f64 = 100.0;

/// Highest possible composite score
pub const MAX_SCORE: f64 = MAX_REGRESSION_POINTS + MAX_VIEWPORT_POINTS;

/// Credit given when the trend quality cannot be computed
pub const UNDEFINED_TREND_POINTS: f64 = 10.0;

/// Feature deriver for engagement signals
pub struct EngagementFeatureDeriver;

impl EngagementFeatureDeriver {
    /// Derive engagement signals and the composite score for one session
    pub fn derive(
        session: &Session,
        trend: TrendFit,
        config: &ScoringConfig,
    ) -> DerivedEngagementSignals {
        let events = session.events();

        let in_viewport_sample_count = count_in_viewport_samples(events);
        let total_in_viewport_seconds = compute_total_in_viewport_seconds(
            in_viewport_sample_count,
            config.sampling_interval_seconds,
        );
        let estimated_reading_threshold_seconds =
            compute_reading_threshold(session.word_count(), config.average_reading_speed);
        let estimated_read_through_ratio = compute_read_through_ratio(
            total_in_viewport_seconds,
            estimated_reading_threshold_seconds,
        );
        let reached_end_of_content = detect_end_of_content(events);

        let regression_component = compute_regression_component(trend.quality);
        let viewport_component = compute_viewport_component(estimated_read_through_ratio);

        DerivedEngagementSignals {
            trend,
            in_viewport_sample_count,
            total_in_viewport_seconds,
            estimated_reading_threshold_seconds,
            estimated_read_through_ratio,
            reached_end_of_content,
            regression_component,
            viewport_component,
            score: regression_component + viewport_component,
        }
    }
}

/// Count samples that were both scrolling and visible
fn count_in_viewport_samples(events: &[RawEvent]) -> u32 {
    events.iter().filter(|e| e.is_in_viewport()).count() as u32
}

/// Approximate viewport dwell from the fixed client sampling cadence
///
/// Formula: `sample_count * sampling_interval_seconds`
fn compute_total_in_viewport_seconds(sample_count: u32, sampling_interval_seconds: f64) -> f64 {
    sample_count as f64 * sampling_interval_seconds
}

/// Seconds an average reader needs for the content
///
/// Formula: `(word_count / words_per_minute) * 60`
/// A missing word count is treated as zero words.
fn compute_reading_threshold(word_count: Option<f64>, words_per_minute: f64) -> f64 {
    let words = word_count.unwrap_or(0.0);
    if words <= 0.0 || words_per_minute <= 0.0 {
        return 0.0;
    }
    (words / words_per_minute) * 60.0
}

/// Fraction of the reading threshold spent in the viewport
///
/// `None` when the threshold is zero; the viewport component then scores its
/// maximum.
fn compute_read_through_ratio(
    total_in_viewport_seconds: f64,
    threshold_seconds: f64,
) -> Option<f64> {
    if threshold_seconds <= 0.0 {
        return None;
    }
    Some(total_in_viewport_seconds / threshold_seconds)
}

/// True once any sample scrolled past its own viewport bottom
fn detect_end_of_content(events: &[RawEvent]) -> bool {
    events.iter().any(RawEvent::is_past_viewport_bottom)
}

/// Regression-strength component (max 50)
///
/// `min(quality * 50, 50)`, or a fixed partial credit when the quality is undefined.
fn compute_regression_component(quality: Option<f64>) -> f64 {
    match quality {
        Some(q) => (q * MAX_REGRESSION_POINTS).clamp(0.0, MAX_REGRESSION_POINTS),
        None => UNDEFINED_TREND_POINTS,
    }
}

/// Viewport-dwell component (max 100)
///
/// `min(ratio * 100, 100)`, full credit when there is no reading threshold.
fn compute_viewport_component(read_through_ratio: Option<f64>) -> f64 {
    match read_through_ratio {
        Some(ratio) => (ratio * MAX_VIEWPORT_POINTS).clamp(0.0, MAX_VIEWPORT_POINTS),
        None => MAX_VIEWPORT_POINTS,
    }
}
