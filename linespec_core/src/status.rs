//! Acquisition state and measurement outcomes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::TerminationReason;

/// Where the pipeline currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Disconnected,
    Idle,
    /// Request accepted, no capture issued yet.
    Requested,
    Capturing { pack: usize },
    Handling { pack: usize },
    Complete,
    Terminated(TerminationReason),
    Failed,
}

/// How a measurement ended when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum MeasurementOutcome {
    /// Every requested cycle was captured and accumulated.
    Complete(Arc<MeasurementResult>),
    /// Ended early; the result covers the cycles accumulated before the stop.
    Terminated {
        reason: TerminationReason,
        result: Arc<MeasurementResult>,
    },
}

impl MeasurementOutcome {
    pub fn result(&self) -> &Arc<MeasurementResult> {
        match self {
            Self::Complete(r) => r,
            Self::Terminated { result, .. } => result,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }
}

/// Immutable record of one finished request.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementResult {
    pub request_id: u64,
    pub requested_cycles: usize,
    pub mean: Vec<f64>,
    pub sample_std: Vec<f64>,
    pub noise_line_fit_rms: Vec<f64>,
    pub cycles_handled: usize,
    pub cycles_saturated: usize,
    /// Cycles taken off the handoff channel, including a terminating one.
    pub cycles_read: usize,
    pub integration_time_ms: f64,
    pub started_at: Instant,
    /// Arrival of the last pack used.
    pub ended_at: Instant,
    /// When the final reduction finished.
    pub handled_at: Instant,
    pub pack_sizes: Vec<usize>,
    pub pack_arrivals: Vec<Instant>,
}

impl MeasurementResult {
    pub fn duration(&self) -> Duration {
        self.ended_at.saturating_duration_since(self.started_at)
    }
}
