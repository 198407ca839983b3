//! Common time helpers for linespec_core.

use std::time::{Duration, Instant};

use linespec_traits::CaptureState;

use crate::error::{Result, SpecError};

/// Number of microseconds in one millisecond.
pub const MICROS_PER_MILLI: f64 = 1_000.0;

/// Shortest sleep between capture polls.
pub const MIN_POLL: Duration = Duration::from_micros(100);
/// Longest sleep between capture polls; bounds abort latency on long integrations.
pub const MAX_POLL: Duration = Duration::from_millis(50);

/// Convert fractional milliseconds into a `Duration`, treating non-finite or
/// negative values as zero.
#[inline]
pub fn ms_f64(ms: f64) -> Duration {
    if ms.is_finite() && ms > 0.0 {
        Duration::from_secs_f64(ms / MICROS_PER_MILLI)
    } else {
        Duration::ZERO
    }
}

/// Period of one line in milliseconds.
#[inline]
pub fn line_period_ms(line_clk: u32, clock_mhz: f64) -> f64 {
    f64::from(line_clk) / (clock_mhz.max(f64::MIN_POSITIVE) * MICROS_PER_MILLI)
}

/// Sleep between capture polls: a fraction of the integration time, clamped
/// to [`MIN_POLL`, `MAX_POLL`].
#[inline]
pub fn poll_interval(it_ms: f64, polls_per_it: u32) -> Duration {
    ms_f64(it_ms / f64::from(polls_per_it.max(1))).clamp(MIN_POLL, MAX_POLL)
}

/// Deadline for one capture call of `cycles` lines.
#[inline]
pub fn pack_timeout(cycles: usize, line_ms: f64, slack_ms: u64) -> Duration {
    ms_f64(cycles as f64 * line_ms) + Duration::from_millis(slack_ms)
}

/// How a capture wait ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    Cancelled,
}

/// Poll an outstanding capture until it reports ready, fails, the deadline
/// passes, or `cancelled` turns true. Sleeps `poll_interval` between polls.
pub fn wait_for_capture(
    mut poll: impl FnMut() -> Result<CaptureState>,
    mut cancelled: impl FnMut() -> bool,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<WaitOutcome> {
    let deadline = Instant::now() + timeout;
    loop {
        if cancelled() {
            return Ok(WaitOutcome::Cancelled);
        }
        match poll()? {
            CaptureState::Ready => return Ok(WaitOutcome::Ready),
            CaptureState::Failed => {
                return Err(SpecError::Transport("capture reported failure".into()));
            }
            CaptureState::Busy => {}
        }
        if Instant::now() >= deadline {
            return Err(SpecError::Timeout);
        }
        std::thread::sleep(poll_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close_us(d: Duration, us: f64) -> bool {
        (d.as_secs_f64() * 1e6 - us).abs() < 0.01
    }

    #[test]
    fn ms_f64_handles_garbage() {
        assert_eq!(ms_f64(f64::NAN), Duration::ZERO);
        assert_eq!(ms_f64(-1.0), Duration::ZERO);
        assert!(close_us(ms_f64(1.5), 1500.0));
    }

    #[test]
    fn poll_interval_clamps() {
        assert_eq!(poll_interval(0.0058, 10), MIN_POLL);
        assert_eq!(poll_interval(4000.0, 10), MAX_POLL);
        assert!(close_us(poll_interval(2.4, 10), 240.0));
        assert!(close_us(poll_interval(2.4, 0), 2400.0));
    }

    #[test]
    fn line_period_and_timeout() {
        assert!((line_period_ms(24_000, 10.0) - 2.4).abs() < 1e-12);
        assert!(close_us(pack_timeout(10, 2.0, 4000), 4_020_000.0));
    }
}
