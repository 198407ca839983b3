//! Configuration types for the acquisition driver.
//!
//! These are the runtime configuration structs used by `Spectrometer`.
//! They are separate from the TOML-deserialized config in `linespec_config`.

use crate::stats::Scaling;
use crate::timing::{CameraLimits, SensorLimits};

/// Two-level gain switch used by the detector and the ADC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gain {
    High,
    Low,
}

impl Gain {
    /// Register encoding: 1 selects low gain.
    #[inline]
    pub fn register_value(self) -> u32 {
        match self {
            Gain::High => 0,
            Gain::Low => 1,
        }
    }
}

/// Identity, geometry and timing of one device.
#[derive(Debug, Clone)]
pub struct DeviceCfg {
    /// Serial number used to pick the device during discovery.
    pub serial: String,
    /// Short name used in log fields.
    pub alias: String,
    /// Horizontal pixels per line; checked against the device at connect.
    pub pixel_count: usize,
    /// Vertical pixels per line; 1 for line sensors.
    pub vertical_pixels: usize,
    /// ADC resolution; sets the default saturation limit.
    pub bit_depth: u8,
    /// Overrides `2^bit_depth - 1` when set.
    pub saturation_limit: Option<f64>,
    pub scaling: Scaling,
    pub clock_mhz: f64,
    pub min_it_ms: f64,
    pub max_it_ms: f64,
    /// Integration time programmed at connect; `min_it_ms` when unset.
    pub initial_it_ms: Option<f64>,
    pub detector_gain: Option<Gain>,
    pub adc_gain: Option<Gain>,
    pub adc_offset: Option<u16>,
    pub camera: CameraLimits,
    pub sensor: SensorLimits,
}

impl Default for DeviceCfg {
    fn default() -> Self {
        Self {
            serial: String::new(),
            alias: "spec1".into(),
            pixel_count: 4096,
            vertical_pixels: 1,
            bit_depth: 16,
            saturation_limit: None,
            scaling: Scaling::default(),
            clock_mhz: 10.0,
            min_it_ms: 2.4,
            max_it_ms: 4000.0,
            initial_it_ms: None,
            detector_gain: None,
            adc_gain: None,
            adc_offset: None,
            camera: CameraLimits::default(),
            sensor: SensorLimits::default(),
        }
    }
}

impl DeviceCfg {
    /// Saturation threshold in output counts.
    pub fn effective_saturation_limit(&self) -> f64 {
        self.saturation_limit
            .unwrap_or_else(|| 2f64.powi(i32::from(self.bit_depth)) - 1.0)
    }

    /// Samples making up one cycle.
    #[inline]
    pub fn samples_per_cycle(&self) -> usize {
        self.pixel_count * self.vertical_pixels.max(1)
    }
}

/// Pipeline behavior.
#[derive(Debug, Clone)]
pub struct AcquisitionCfg {
    /// Upper bound on cycles per hardware capture call.
    pub max_cycles_per_call: usize,
    /// End a measurement at the first saturated cycle.
    pub abort_on_saturation: bool,
    /// Capture attempts per pack before the measurement fails.
    pub retries_per_pack: u32,
    /// Slack added to each pack's expected duration, and the device's per-cycle data timeout.
    pub cycle_timeout_ms: u64,
    /// Capacity of the capture-to-reduction channel, in packs.
    pub handoff_depth: usize,
    /// Capture polls per integration time.
    pub polls_per_it: u32,
}

impl Default for AcquisitionCfg {
    fn default() -> Self {
        Self {
            max_cycles_per_call: 100,
            abort_on_saturation: true,
            retries_per_pack: 3,
            cycle_timeout_ms: 4000,
            handoff_depth: 4,
            polls_per_it: 10,
        }
    }
}

/// Recovery ladder delays and bounds.
#[derive(Debug, Clone)]
pub struct RecoveryCfg {
    /// Try abort + re-assert integration time before reconnecting.
    pub soft_enabled: bool,
    pub hard_attempts: u32,
    pub abort_settle_ms: u64,
    pub settle_ms: u64,
    pub reconnect_settle_ms: u64,
    pub reset_settle_ms: u64,
    /// Delay after a failed hard attempt, multiplied by the attempt number.
    pub retry_delay_ms: u64,
    /// Pulse the vendor reset line between close and reopen.
    pub hardware_reset: bool,
}

impl Default for RecoveryCfg {
    fn default() -> Self {
        Self {
            soft_enabled: true,
            hard_attempts: 3,
            abort_settle_ms: 500,
            settle_ms: 500,
            reconnect_settle_ms: 2000,
            reset_settle_ms: 5000,
            retry_delay_ms: 5000,
            hardware_reset: true,
        }
    }
}

/// Timeouts and settle delays outside the capture loop.
#[derive(Debug, Clone)]
pub struct Timeouts {
    /// Bound on waiting for an aborted measurement during disconnect.
    pub disconnect_wait_ms: u64,
    /// Settle delay after the connect-time integration writes.
    pub connect_settle_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            disconnect_wait_ms: 5000,
            connect_settle_ms: 200,
        }
    }
}
