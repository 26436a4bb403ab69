//! engage.raw_event.v1 input schema
//!
//! This module defines the wire form of client telemetry samples and how a
//! batch of them is parsed and validated.

mod adapter;
mod raw_event;

pub use adapter::*;
pub use raw_event::*;
