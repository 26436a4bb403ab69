//! Engagement Flux - per-session reading engagement scores
//!
//! Flux turns fine-grained page telemetry (scroll position, visibility,
//! viewport bounds, word count) into one engagement score per page visit
//! through a deterministic pipeline: validation → session grouping → trend
//! fitting → feature derivation → record encoding.
//!
//! ## Score
//!
//! - **Regression strength** (0-50): how well scroll depth tracks elapsed time
//! - **Viewport dwell** (0-100): time in view relative to the estimated reading time

pub mod boundary;
pub mod config;
pub mod encoder;
pub mod error;
pub mod features;
pub mod grouper;
pub mod pipeline;
pub mod schema;
pub mod trend;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use boundary::{
    EventSource, JsonSink, LineProtocolSink, MemorySink, MemorySource, NdjsonSink, NdjsonSource,
    ScoreSink,
};
pub use config::ScoringConfig;
pub use encoder::{RecordStamper, ScoreRecordEncoder, SequenceStamper, SystemStamper};
pub use error::ComputeError;
pub use pipeline::{score_batch, score_json, CancelToken, EngagementProcessor};
pub use types::{BatchOutcome, ScoreRecord, Session, SessionKey, SkippedEvent};

// Schema exports
pub use schema::{RawEventAdapter, RawEventRecord, ValidationError, SCHEMA_VERSION};

/// Library version
pub const FLUX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "engagement-flux";
