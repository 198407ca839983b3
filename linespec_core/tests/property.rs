use linespec_core::stats::Accumulator;
use linespec_core::timing::{
    CameraLimits, SensorLimits, TimingStatus, compute_pulse_timing, effective_integration_ms,
    floor_integration_ms,
};
use linespec_core::split_cycles;
use proptest::prelude::*;

prop_compose! {
    fn cycles_strategy()(
        n in 1usize..40,
        pixels in 1usize..6,
    )(
        rows in prop::collection::vec(prop::collection::vec(0.0f64..60_000.0, pixels), n),
    ) -> Vec<Vec<f64>> {
        rows
    }
}

proptest! {
    #[test]
    fn packs_sum_bound_and_count(total in 0usize..5_000, max in 0usize..300) {
        let packs = split_cycles(total, max);
        let max_eff = max.max(1);
        prop_assert_eq!(packs.iter().map(|p| p.cycles).sum::<usize>(), total);
        prop_assert!(packs.iter().all(|p| p.cycles >= 1 && p.cycles <= max_eff));
        prop_assert_eq!(packs.len(), total.div_ceil(max_eff));
        // all but the last are full
        if packs.len() > 1 {
            prop_assert!(packs[..packs.len() - 1].iter().all(|p| p.cycles == max_eff));
        }
        prop_assert!(packs.iter().enumerate().all(|(i, p)| p.index == i));
    }

    #[test]
    fn timing_is_monotonic_in_integration_time(a in 0.0f64..5_000.0, b in 0.0f64..5_000.0) {
        let cam = CameraLimits::default();
        let sen = SensorLimits::default();
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let (_, t_lo) = compute_pulse_timing(lo, 10.0, &cam, &sen);
        let (_, t_hi) = compute_pulse_timing(hi, 10.0, &cam, &sen);
        prop_assert!(t_lo.high <= t_hi.high);
        prop_assert!(t_lo.line <= t_hi.line);
    }

    #[test]
    fn registers_respect_every_limit(it in 0.0f64..10_000.0, clock in 1.0f64..40.0) {
        let cam = CameraLimits::default();
        let sen = SensorLimits::default();
        let (status, t) = compute_pulse_timing(it, clock, &cam, &sen);
        prop_assert_eq!(u64::from(t.line), u64::from(t.high) + u64::from(t.low));
        prop_assert!(t.high >= cam.min_high_clk.max(sen.min_high_clk));
        prop_assert!(t.low >= cam.min_low_clk);
        prop_assert!(t.line >= cam.min_line_clk.max(sen.min_line_clk));
        prop_assert!(status != TimingStatus::Capped);
        if status == TimingStatus::Exact {
            // realized within one clock tick of the request
            let eff = effective_integration_ms(t.high, clock, &sen);
            prop_assert!((eff - it).abs() <= 1.0 / (clock * 1000.0) + 1e-9);
        }
    }

    #[test]
    fn below_floor_clamps_to_floor_exactly(frac in 0.0f64..1.0) {
        let cam = CameraLimits::default();
        let sen = SensorLimits::default();
        let floor_ms = floor_integration_ms(10.0, &cam, &sen);
        // strictly below the floor by at least one tick
        let it = (floor_ms - 0.0001) * frac;
        let (status, t) = compute_pulse_timing(it, 10.0, &cam, &sen);
        prop_assert_eq!(status, TimingStatus::Limited);
        prop_assert_eq!(t.high, cam.min_high_clk.max(sen.min_high_clk));
        prop_assert!((effective_integration_ms(t.high, 10.0, &sen) - floor_ms).abs() < 1e-12);
    }

    #[test]
    fn accumulator_matches_direct_arithmetic(rows in cycles_strategy()) {
        let pixels = rows[0].len();
        let mut acc = Accumulator::new(pixels);
        for (i, r) in rows.iter().enumerate() {
            acc.add_cycle(i + 1, r, false);
        }
        let red = acc.reduce();
        let n = rows.len() as f64;
        for p in 0..pixels {
            let mean = rows.iter().map(|r| r[p]).sum::<f64>() / n;
            let var = rows.iter().map(|r| (r[p] - mean).powi(2)).sum::<f64>() / n;
            let tol = 1e-6 * (1.0 + mean.abs());
            prop_assert!((red.mean[p] - mean).abs() <= tol);
            // sums of squares lose a few digits to cancellation
            let spread_tol = 1e-2 * (1.0 + var.sqrt());
            prop_assert!((red.std[p] - var.sqrt()).abs() <= spread_tol);
            prop_assert!(red.line_rms[p] <= red.std[p] + spread_tol);
            prop_assert!(red.std[p].is_finite() && red.line_rms[p].is_finite());
        }
    }

    #[test]
    fn linear_drift_has_zero_line_rms(n in 2usize..60, base in 0.0f64..1_000.0, slope in -5.0f64..5.0) {
        let mut acc = Accumulator::new(1);
        for i in 0..n {
            acc.add_cycle(i + 1, &[base + 1_000.0 + slope * i as f64], false);
        }
        let red = acc.reduce();
        prop_assert!(red.line_rms[0] < 1e-3, "rms {} for slope {}", red.line_rms[0], slope);
        if slope.abs() > 0.5 {
            prop_assert!(red.std[0] > red.line_rms[0]);
        }
    }
}
