//! Throughput statistics derived from a finished measurement.
//!
//! The cycle delay time is the time per cycle spent beyond the integration
//! time itself (readout, transfer, call overhead).

use crate::status::MeasurementResult;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceStats {
    /// Start of the request to arrival of the last pack.
    pub measured_ms: f64,
    /// Arrival of the last pack to the end of the final reduction.
    pub handling_ms: f64,
    pub cdt_mean_ms: f64,
    /// Median over packs of the per-cycle delay; equals the mean for a single pack.
    pub cdt_median_ms: f64,
    pub packs: usize,
}

fn median(v: &mut [f64]) -> f64 {
    if v.is_empty() {
        return 0.0;
    }
    v.sort_by(f64::total_cmp);
    let mid = v.len() / 2;
    if v.len() % 2 == 0 {
        (v[mid - 1] + v[mid]) / 2.0
    } else {
        v[mid]
    }
}

impl PerformanceStats {
    pub fn from_result(r: &MeasurementResult) -> Self {
        let measured_ms = r.duration().as_secs_f64() * 1e3;
        let handling_ms = r
            .handled_at
            .saturating_duration_since(r.ended_at)
            .as_secs_f64()
            * 1e3;
        let captured: usize = r.pack_sizes.iter().sum();
        let it = r.integration_time_ms;

        let cdt_mean_ms = if captured == 0 {
            0.0
        } else {
            ((measured_ms - captured as f64 * it) / captured as f64).max(0.0)
        };

        let cdt_median_ms = if r.pack_arrivals.len() < 2 {
            cdt_mean_ms
        } else {
            let mut prev = r.started_at;
            let mut per_pack: Vec<f64> = r
                .pack_sizes
                .iter()
                .zip(&r.pack_arrivals)
                .filter(|(size, _)| **size > 0)
                .map(|(&size, &arrival)| {
                    let dt = arrival.saturating_duration_since(prev).as_secs_f64() * 1e3;
                    prev = arrival;
                    ((dt - size as f64 * it) / size as f64).max(0.0)
                })
                .collect();
            median(&mut per_pack)
        };

        Self {
            measured_ms,
            handling_ms,
            cdt_mean_ms,
            cdt_median_ms,
            packs: r.pack_sizes.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn result(sizes: &[usize], arrivals_ms: &[u64], it_ms: f64) -> MeasurementResult {
        let t0 = Instant::now();
        let arrivals: Vec<Instant> = arrivals_ms
            .iter()
            .map(|ms| t0 + Duration::from_millis(*ms))
            .collect();
        let end = arrivals.last().copied().unwrap_or(t0);
        MeasurementResult {
            request_id: 1,
            requested_cycles: sizes.iter().sum(),
            mean: vec![],
            sample_std: vec![],
            noise_line_fit_rms: vec![],
            cycles_handled: sizes.iter().sum(),
            cycles_saturated: 0,
            cycles_read: sizes.iter().sum(),
            integration_time_ms: it_ms,
            started_at: t0,
            ended_at: end,
            handled_at: end + Duration::from_millis(3),
            pack_sizes: sizes.to_vec(),
            pack_arrivals: arrivals,
        }
    }

    #[test]
    fn single_pack_median_equals_mean() {
        let s = PerformanceStats::from_result(&result(&[10], &[25], 2.0));
        assert!((s.cdt_mean_ms - 0.5).abs() < 1e-9);
        assert_eq!(s.cdt_mean_ms, s.cdt_median_ms);
        assert!((s.handling_ms - 3.0).abs() < 1e-9);
    }

    #[test]
    fn median_ignores_one_slow_pack() {
        // 10 cycles of 1 ms per pack; delays of 0.1, 0.1 and 5.0 ms per cycle
        let s = PerformanceStats::from_result(&result(&[10, 10, 10], &[11, 22, 82], 1.0));
        assert!((s.cdt_median_ms - 0.1).abs() < 1e-9);
        assert!(s.cdt_mean_ms > s.cdt_median_ms);
        assert_eq!(s.packs, 3);
    }

    #[test]
    fn empty_result_is_zero() {
        let s = PerformanceStats::from_result(&result(&[], &[], 2.0));
        assert_eq!(s.cdt_mean_ms, 0.0);
        assert_eq!(s.cdt_median_ms, 0.0);
    }
}
