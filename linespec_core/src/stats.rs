//! Per-cycle validation and streaming statistics.
//!
//! Cycles are folded into running sums so memory stays at three vectors of
//! `pixel_count` regardless of how many cycles a measurement spans.

use crate::error::TerminationReason;

/// Linear map from raw digitizer counts to output counts: `y = gain * raw + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scaling {
    pub gain: f64,
    pub offset: f64,
}

impl Default for Scaling {
    fn default() -> Self {
        Self {
            gain: 1.0,
            offset: 0.0,
        }
    }
}

impl Scaling {
    #[inline]
    pub fn is_identity(&self) -> bool {
        self.gain == 1.0 && self.offset == 0.0
    }

    /// Write the scaled cycle into `out` (cleared first).
    pub fn apply(&self, raw: &[u16], out: &mut Vec<f64>) {
        out.clear();
        if self.is_identity() {
            out.extend(raw.iter().map(|&v| f64::from(v)));
        } else {
            out.extend(raw.iter().map(|&v| self.gain * f64::from(v) + self.offset));
        }
    }
}

/// Outcome of inspecting one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleCheck {
    pub min: f64,
    pub max: f64,
    pub saturated: bool,
    /// False when any value is NaN or negative.
    pub data_ok: bool,
}

/// Compute min/max and the saturation and validity flags of one cycle.
pub fn check_cycle(y: &[f64], saturation_limit: f64) -> CycleCheck {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut has_nan = false;
    for &v in y {
        if v.is_nan() {
            has_nan = true;
            continue;
        }
        min = min.min(v);
        max = max.max(v);
    }
    CycleCheck {
        min,
        max,
        saturated: max >= saturation_limit,
        data_ok: !has_nan && min >= 0.0,
    }
}

/// What to do with an inspected cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleVerdict {
    Accumulate { saturated: bool },
    Terminate(TerminationReason),
}

/// Saturation and validity policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CyclePolicy {
    pub saturation_limit: f64,
    pub abort_on_saturation: bool,
}

impl CyclePolicy {
    pub fn judge(&self, check: &CycleCheck) -> CycleVerdict {
        if !check.data_ok {
            CycleVerdict::Terminate(TerminationReason::InvalidData)
        } else if check.saturated && self.abort_on_saturation {
            CycleVerdict::Terminate(TerminationReason::Saturation)
        } else {
            CycleVerdict::Accumulate {
                saturated: check.saturated,
            }
        }
    }
}

/// Final per-pixel statistics of a measurement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reduction {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
    /// RMS of the residual from a least-squares line through each pixel's
    /// cycle series; removes slow drift from the noise estimate.
    pub line_rms: Vec<f64>,
}

/// Running sums over accepted cycles.
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    sum_y: Vec<f64>,
    sum_y2: Vec<f64>,
    sum_idx_y: Vec<f64>,
    handled: usize,
    saturated: usize,
}

impl Accumulator {
    pub fn new(pixel_count: usize) -> Self {
        let mut acc = Self::default();
        acc.reset(pixel_count);
        acc
    }

    /// Zero all sums and counters for a new measurement.
    pub fn reset(&mut self, pixel_count: usize) {
        for v in [&mut self.sum_y, &mut self.sum_y2, &mut self.sum_idx_y] {
            v.clear();
            v.resize(pixel_count, 0.0);
        }
        self.handled = 0;
        self.saturated = 0;
    }

    pub fn pixel_count(&self) -> usize {
        self.sum_y.len()
    }

    pub fn cycles_handled(&self) -> usize {
        self.handled
    }

    pub fn cycles_saturated(&self) -> usize {
        self.saturated
    }

    /// Fold cycle number `seq` (1-based) into the sums.
    pub fn add_cycle(&mut self, seq: usize, y: &[f64], saturated: bool) {
        debug_assert_eq!(y.len(), self.sum_y.len());
        let x = seq.saturating_sub(1) as f64;
        for (i, &v) in y.iter().enumerate().take(self.sum_y.len()) {
            self.sum_y[i] += v;
            self.sum_y2[i] += v * v;
            self.sum_idx_y[i] += x * v;
        }
        self.handled += 1;
        if saturated {
            self.saturated += 1;
        }
    }

    /// Mean, population std and line-fit RMS over the cycles handled so far.
    ///
    /// Zero cycles yield zero-filled vectors.
    pub fn reduce(&self) -> Reduction {
        let npix = self.sum_y.len();
        let n = self.handled as f64;
        if self.handled == 0 {
            return Reduction {
                mean: vec![0.0; npix],
                std: vec![0.0; npix],
                line_rms: vec![0.0; npix],
            };
        }
        // x = 0..n-1
        let sx = n * (n - 1.0) / 2.0;
        let sxx = (n - 1.0) * n * (2.0 * n - 1.0) / 6.0;
        let sxx_c = sxx - sx * sx / n;

        let mut out = Reduction {
            mean: Vec::with_capacity(npix),
            std: Vec::with_capacity(npix),
            line_rms: Vec::with_capacity(npix),
        };
        for i in 0..npix {
            let sy = self.sum_y[i];
            let syy = self.sum_y2[i];
            let sxy = self.sum_idx_y[i];
            let mean = sy / n;
            out.mean.push(mean);
            out.std.push((syy / n - mean * mean).abs().sqrt());

            let syy_c = syy - sy * sy / n;
            let ssr = if sxx_c > 0.0 {
                let sxy_c = sxy - sx * sy / n;
                syy_c - sxy_c * sxy_c / sxx_c
            } else {
                syy_c
            };
            let rms = if self.handled < 2 {
                0.0
            } else {
                (ssr.max(0.0) / n).sqrt()
            };
            out.line_rms.push(rms);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: f64 = 65535.0;

    #[test]
    fn negative_or_nan_is_invalid() {
        assert!(!check_cycle(&[1.0, -0.5, 2.0], LIMIT).data_ok);
        assert!(!check_cycle(&[1.0, f64::NAN], LIMIT).data_ok);
        assert!(check_cycle(&[0.0, 3.0], LIMIT).data_ok);
    }

    #[test]
    fn saturation_is_inclusive() {
        let c = check_cycle(&[10.0, LIMIT], LIMIT);
        assert!(c.saturated);
        assert_eq!(c.max, LIMIT);
        assert!(!check_cycle(&[LIMIT - 1.0], LIMIT).saturated);
    }

    #[test]
    fn policy_prefers_invalid_over_saturation() {
        let p = CyclePolicy {
            saturation_limit: LIMIT,
            abort_on_saturation: true,
        };
        let c = check_cycle(&[f64::NAN, LIMIT], LIMIT);
        assert_eq!(
            p.judge(&c),
            CycleVerdict::Terminate(TerminationReason::InvalidData)
        );
        let keep = CyclePolicy {
            abort_on_saturation: false,
            ..p
        };
        assert_eq!(
            keep.judge(&check_cycle(&[LIMIT], LIMIT)),
            CycleVerdict::Accumulate { saturated: true }
        );
    }

    #[test]
    fn scaling_applies_gain_and_offset() {
        let mut out = Vec::new();
        Scaling {
            gain: 2.0,
            offset: -5.0,
        }
        .apply(&[1, 10], &mut out);
        assert_eq!(out, vec![-3.0, 15.0]);
        Scaling::default().apply(&[7], &mut out);
        assert_eq!(out, vec![7.0]);
    }

    #[test]
    fn single_cycle_has_zero_spread() {
        let mut acc = Accumulator::new(2);
        acc.add_cycle(1, &[5.0, 9.0], false);
        let r = acc.reduce();
        assert_eq!(r.mean, vec![5.0, 9.0]);
        assert_eq!(r.std, vec![0.0, 0.0]);
        assert_eq!(r.line_rms, vec![0.0, 0.0]);
    }

    #[test]
    fn empty_reduction_is_zero_not_nan() {
        let acc = Accumulator::new(3);
        let r = acc.reduce();
        assert_eq!(r.mean, vec![0.0; 3]);
        assert!(r.std.iter().all(|v| *v == 0.0));
    }
}
