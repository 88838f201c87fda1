//! Metric helpers for `sealframe`.
//!
//! Wrappers around the [`metrics`](https://docs.rs/metrics) crate; every
//! function becomes a no-op when the optional `metrics` Cargo feature is
//! disabled.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking active connections.
pub const CONNECTIONS_ACTIVE: &str = "sealframe_connections_active";
/// Name of the counter tracking processed frames.
pub const FRAMES_PROCESSED: &str = "sealframe_frames_processed_total";
/// Name of the counter tracking error occurrences.
pub const ERRORS_TOTAL: &str = "sealframe_errors_total";

/// Direction of frame processing.
#[derive(Clone, Copy)]
pub enum Direction {
    /// Inbound frames received from a peer.
    Inbound,
    /// Outbound frames sent to a peer.
    Outbound,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Increment the active connections gauge.
#[cfg(feature = "metrics")]
pub fn inc_connections() { gauge!(CONNECTIONS_ACTIVE).increment(1.0); }

#[cfg(not(feature = "metrics"))]
pub fn inc_connections() {}

/// Decrement the active connections gauge.
#[cfg(feature = "metrics")]
pub fn dec_connections() { gauge!(CONNECTIONS_ACTIVE).decrement(1.0); }

#[cfg(not(feature = "metrics"))]
pub fn dec_connections() {}

/// Record a processed frame for the given direction.
#[cfg(feature = "metrics")]
pub fn inc_frames(direction: Direction) {
    counter!(FRAMES_PROCESSED, "direction" => direction.as_str()).increment(1);
}

#[cfg(not(feature = "metrics"))]
pub fn inc_frames(_direction: Direction) {}

/// Record a framing error.
#[cfg(feature = "metrics")]
pub fn inc_framing_errors() { counter!(ERRORS_TOTAL, "kind" => "framing").increment(1); }

#[cfg(not(feature = "metrics"))]
pub fn inc_framing_errors() {}

/// Record a pipeline error.
#[cfg(feature = "metrics")]
pub fn inc_pipeline_errors() { counter!(ERRORS_TOTAL, "kind" => "pipeline").increment(1); }

#[cfg(not(feature = "metrics"))]
pub fn inc_pipeline_errors() {}

/// Record a schema decode error.
#[cfg(feature = "metrics")]
pub fn inc_decode_errors() { counter!(ERRORS_TOTAL, "kind" => "decode").increment(1); }

#[cfg(not(feature = "metrics"))]
pub fn inc_decode_errors() {}
