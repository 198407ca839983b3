#![no_main]
use libfuzzer_sys::arbitrary::{self, Arbitrary};
use libfuzzer_sys::fuzz_target;
use linespec_core::timing::compute_pulse_timing;
use linespec_core::{CameraLimits, SensorLimits, TimingStatus};

#[derive(Debug, Arbitrary)]
struct Input {
    it_ms: f64,
    clock_mhz: f64,
    max_line_clk: u32,
}

fuzz_target!(|input: Input| {
    let camera = CameraLimits {
        max_line_clk: input.max_line_clk.max(4500),
        ..CameraLimits::default()
    };
    let sensor = SensorLimits::default();
    let (status, t) = compute_pulse_timing(input.it_ms, input.clock_mhz, &camera, &sensor);

    assert_eq!(u64::from(t.high) + u64::from(t.low), u64::from(t.line));
    assert!(t.high >= camera.min_high_clk.max(sensor.min_high_clk));
    if status != TimingStatus::Capped {
        assert!(t.low >= camera.min_low_clk);
        assert!(t.line <= camera.max_line_clk);
    }
});
