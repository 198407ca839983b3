//! Integration time to timing-register conversion.
//!
//! The camera integrates while the start pulse is high; the sensor adds a
//! fixed offset of `it_offset_clk` ticks. One line (cycle) period is
//! `high + low` ticks. All values are in ticks of the camera clock.

/// Timing limits imposed by the camera electronics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraLimits {
    pub min_high_clk: u32,
    pub min_low_clk: u32,
    /// Minimum line period for the fitted sensor.
    pub min_line_clk: u32,
    pub max_line_clk: u32,
}

impl Default for CameraLimits {
    /// C13015-01 driving an S13496.
    fn default() -> Self {
        Self {
            min_high_clk: 10,
            min_low_clk: 200,
            min_line_clk: 4500,
            max_line_clk: u32::MAX,
        }
    }
}

/// Timing limits imposed by the sensor itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorLimits {
    pub min_line_clk: u32,
    pub min_high_clk: u32,
    pub min_low_clk: u32,
    /// Ticks the sensor integrates beyond the start-pulse high period.
    pub it_offset_clk: u32,
}

impl Default for SensorLimits {
    /// S13496.
    fn default() -> Self {
        Self {
            min_line_clk: 106,
            min_high_clk: 6,
            min_low_clk: 100,
            it_offset_clk: 48,
        }
    }
}

/// Register values for one integration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseTiming {
    pub high: u32,
    pub low: u32,
    pub line: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingStatus {
    /// Registers realize the requested time (to one tick).
    Exact,
    /// Request was below the hardware floor; the floor was used instead.
    Limited,
    /// Request exceeds the longest programmable line; high was reduced.
    Capped,
}

#[inline]
fn floor_high(camera: &CameraLimits, sensor: &SensorLimits) -> u64 {
    u64::from(camera.min_high_clk.max(sensor.min_high_clk))
}

/// Convert an integration time into start-pulse and line-period registers.
///
/// Never fails: out-of-range requests are clamped and reported through the
/// returned status. Non-finite or negative inputs behave like zero.
pub fn compute_pulse_timing(
    it_ms: f64,
    clock_mhz: f64,
    camera: &CameraLimits,
    sensor: &SensorLimits,
) -> (TimingStatus, PulseTiming) {
    let ticks = it_ms * clock_mhz * 1000.0;
    let ticks = if ticks.is_finite() { ticks.max(0.0) } else { 0.0 };
    // Saturating float->int cast keeps absurd requests inside i64.
    let target = ticks.round() as i64 - i64::from(sensor.it_offset_clk);

    let floor = floor_high(camera, sensor);
    let mut status = TimingStatus::Exact;
    let mut high = if target < floor as i64 {
        status = TimingStatus::Limited;
        floor
    } else {
        target as u64
    };

    let max_line = u64::from(camera.max_line_clk);
    let min_low_cam = u64::from(camera.min_low_clk);
    if high + min_low_cam > max_line {
        high = max_line.saturating_sub(min_low_cam).max(floor);
        status = TimingStatus::Capped;
    }

    let min_line = u64::from(camera.min_line_clk.max(sensor.min_line_clk));
    let line = (high + u64::from(sensor.min_low_clk)).clamp(min_line, max_line.max(min_line));
    let low = line.saturating_sub(high).max(min_low_cam);
    let line = (high + low).min(u64::from(u32::MAX));

    (
        status,
        PulseTiming {
            high: high.min(u64::from(u32::MAX)) as u32,
            low: low.min(u64::from(u32::MAX)) as u32,
            line: line as u32,
        },
    )
}

/// Integration time in milliseconds produced by a start-pulse high period.
#[inline]
pub fn effective_integration_ms(high: u32, clock_mhz: f64, sensor: &SensorLimits) -> f64 {
    (f64::from(high) + f64::from(sensor.it_offset_clk)) / (clock_mhz * 1000.0)
}

/// Shortest integration time the camera/sensor pair can realize, in ms.
#[inline]
pub fn floor_integration_ms(clock_mhz: f64, camera: &CameraLimits, sensor: &SensorLimits) -> f64 {
    (floor_high(camera, sensor) as f64 + f64::from(sensor.it_offset_clk)) / (clock_mhz * 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> (CameraLimits, SensorLimits) {
        (CameraLimits::default(), SensorLimits::default())
    }

    #[test]
    fn typical_time_is_exact() {
        let (c, s) = defaults();
        let (st, t) = compute_pulse_timing(2.4, 10.0, &c, &s);
        assert_eq!(st, TimingStatus::Exact);
        assert_eq!(t.high, 24_000 - 48);
        assert_eq!(t.low, 200);
        assert_eq!(t.line, t.high + t.low);
    }

    #[test]
    fn tiny_time_clamps_to_floor_and_min_line() {
        let (c, s) = defaults();
        let (st, t) = compute_pulse_timing(0.0001, 10.0, &c, &s);
        assert_eq!(st, TimingStatus::Limited);
        assert_eq!(t.high, 10);
        assert_eq!(t.line, 4500);
        assert_eq!(t.low, 4490);
    }

    #[test]
    fn floor_matches_effective_time_of_floor_registers() {
        let (c, s) = defaults();
        let floor = floor_integration_ms(10.0, &c, &s);
        assert!((floor - 0.0058).abs() < 1e-12);
        assert!((effective_integration_ms(10, 10.0, &s) - floor).abs() < 1e-12);
    }

    #[test]
    fn line_limit_caps_high() {
        let c = CameraLimits {
            max_line_clk: 100_000,
            ..CameraLimits::default()
        };
        let s = SensorLimits::default();
        let (st, t) = compute_pulse_timing(1000.0, 10.0, &c, &s);
        assert_eq!(st, TimingStatus::Capped);
        assert_eq!(t.high, 99_800);
        assert_eq!(t.line, 100_000);
    }

    #[test]
    fn nan_behaves_like_zero() {
        let (c, s) = defaults();
        let (st, t) = compute_pulse_timing(f64::NAN, 10.0, &c, &s);
        assert_eq!(st, TimingStatus::Limited);
        assert_eq!(t.high, 10);
    }
}
