#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the spectrometer acquisition driver.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Camera and sensor timing limits come from built-in model tables and may
//!   be overridden field by field under `[camera]` / `[sensor]`.
use serde::Deserialize;

/// Camera timing limits in clock ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraModel {
    pub min_high_clk: u32,
    pub min_low_clk: u32,
    pub min_line_clk: u32,
    pub max_line_clk: u32,
}

/// Sensor timing limits in clock ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorModel {
    pub min_line_clk: u32,
    pub min_high_clk: u32,
    pub min_low_clk: u32,
    pub it_offset_clk: u32,
}

/// Known camera electronics. The minimum line period depends on the fitted sensor.
pub fn camera_model(camera: &str, sensor: &str) -> Option<CameraModel> {
    match (camera, sensor) {
        ("C13015-01", "S13496") => Some(CameraModel {
            min_high_clk: 10,
            min_low_clk: 200,
            min_line_clk: 4500,
            max_line_clk: u32::MAX,
        }),
        _ => None,
    }
}

/// Known line sensors.
pub fn sensor_model(sensor: &str) -> Option<SensorModel> {
    match sensor {
        "S13496" => Some(SensorModel {
            min_line_clk: 106,
            min_high_clk: 6,
            min_low_clk: 100,
            it_offset_clk: 48,
        }),
        _ => None,
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GainSetting {
    High,
    Low,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeviceToml {
    /// Serial number matched during discovery.
    pub serial: String,
    pub alias: String,
    pub camera: String,
    pub sensor: String,
    pub pixel_count: usize,
    pub vertical_pixels: usize,
    pub bit_depth: u8,
    /// Defaults to 2^bit_depth - 1.
    pub saturation_limit: Option<f64>,
    pub scale_gain: f64,
    pub scale_offset: f64,
    pub clock_mhz: f64,
    pub min_it_ms: f64,
    pub max_it_ms: f64,
    pub initial_it_ms: Option<f64>,
    pub gain_detector: Option<GainSetting>,
    pub gain_adc: Option<GainSetting>,
    pub adc_offset: Option<u16>,
}

impl Default for DeviceToml {
    fn default() -> Self {
        Self {
            serial: String::new(),
            alias: "spec1".into(),
            camera: "C13015-01".into(),
            sensor: "S13496".into(),
            pixel_count: 4096,
            vertical_pixels: 1,
            bit_depth: 16,
            saturation_limit: None,
            scale_gain: 1.0,
            scale_offset: 0.0,
            clock_mhz: 10.0,
            min_it_ms: 2.4,
            max_it_ms: 4000.0,
            initial_it_ms: None,
            gain_detector: None,
            gain_adc: None,
            adc_offset: None,
        }
    }
}

/// Per-field overrides of the camera model table.
#[derive(Debug, Deserialize, Default, Clone, Copy)]
#[serde(default)]
pub struct CameraOverrides {
    pub min_high_clk: Option<u32>,
    pub min_low_clk: Option<u32>,
    pub min_line_clk: Option<u32>,
    pub max_line_clk: Option<u32>,
}

/// Per-field overrides of the sensor model table.
#[derive(Debug, Deserialize, Default, Clone, Copy)]
#[serde(default)]
pub struct SensorOverrides {
    pub min_line_clk: Option<u32>,
    pub min_high_clk: Option<u32>,
    pub min_low_clk: Option<u32>,
    pub it_offset_clk: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AcquisitionToml {
    pub max_cycles_per_call: usize,
    pub abort_on_saturation: bool,
    pub retries_per_pack: u32,
    pub cycle_timeout_ms: u64,
    /// Packs buffered between capture and reduction.
    pub handoff_depth: usize,
    pub polls_per_it: u32,
}

impl Default for AcquisitionToml {
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

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RecoveryToml {
    pub soft_enabled: bool,
    pub hard_attempts: u32,
    pub abort_settle_ms: u64,
    pub settle_ms: u64,
    pub reconnect_settle_ms: u64,
    pub reset_settle_ms: u64,
    pub retry_delay_ms: u64,
    pub hardware_reset: bool,
}

impl Default for RecoveryToml {
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

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub disconnect_wait_ms: u64,
    /// Also accepts alias "settle_ms".
    #[serde(alias = "settle_ms")]
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

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

/// Sweep used by the `perf` command.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PerformanceToml {
    pub it_ms_list: Vec<f64>,
    pub cycles_list: Vec<usize>,
}

impl Default for PerformanceToml {
    fn default() -> Self {
        Self {
            it_ms_list: vec![2.4, 10.0, 50.0],
            cycles_list: vec![1, 10, 100],
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub device: DeviceToml,
    #[serde(default)]
    pub camera: CameraOverrides,
    #[serde(default)]
    pub sensor: SensorOverrides,
    #[serde(default)]
    pub acquisition: AcquisitionToml,
    #[serde(default)]
    pub recovery: RecoveryToml,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub performance: PerformanceToml,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    /// Camera limits from the model table with `[camera]` overrides applied.
    pub fn camera_limits(&self) -> eyre::Result<CameraModel> {
        let base = camera_model(&self.device.camera, &self.device.sensor).ok_or_else(|| {
            eyre::eyre!(
                "unknown camera/sensor combination {}/{}",
                self.device.camera,
                self.device.sensor
            )
        })?;
        let o = &self.camera;
        Ok(CameraModel {
            min_high_clk: o.min_high_clk.unwrap_or(base.min_high_clk),
            min_low_clk: o.min_low_clk.unwrap_or(base.min_low_clk),
            min_line_clk: o.min_line_clk.unwrap_or(base.min_line_clk),
            max_line_clk: o.max_line_clk.unwrap_or(base.max_line_clk),
        })
    }

    /// Sensor limits from the model table with `[sensor]` overrides applied.
    pub fn sensor_limits(&self) -> eyre::Result<SensorModel> {
        let base = sensor_model(&self.device.sensor)
            .ok_or_else(|| eyre::eyre!("unknown sensor model {}", self.device.sensor))?;
        let o = &self.sensor;
        Ok(SensorModel {
            min_line_clk: o.min_line_clk.unwrap_or(base.min_line_clk),
            min_high_clk: o.min_high_clk.unwrap_or(base.min_high_clk),
            min_low_clk: o.min_low_clk.unwrap_or(base.min_low_clk),
            it_offset_clk: o.it_offset_clk.unwrap_or(base.it_offset_clk),
        })
    }

    pub fn validate(&self) -> eyre::Result<()> {
        // Device
        let d = &self.device;
        if d.serial.trim().is_empty() {
            eyre::bail!("device.serial must not be empty");
        }
        if d.alias.trim().is_empty() {
            eyre::bail!("device.alias must not be empty");
        }
        if d.pixel_count == 0 {
            eyre::bail!("device.pixel_count must be > 0");
        }
        if d.vertical_pixels == 0 {
            eyre::bail!("device.vertical_pixels must be > 0");
        }
        if !(1..=32).contains(&d.bit_depth) {
            eyre::bail!("device.bit_depth must be in 1..=32");
        }
        if let Some(limit) = d.saturation_limit
            && !(limit.is_finite() && limit > 0.0)
        {
            eyre::bail!("device.saturation_limit must be finite and > 0");
        }
        if !d.scale_gain.is_finite() || !d.scale_offset.is_finite() {
            eyre::bail!("device.scale_gain and device.scale_offset must be finite");
        }
        if !(d.clock_mhz.is_finite() && d.clock_mhz > 0.0) {
            eyre::bail!("device.clock_mhz must be > 0");
        }
        if !(d.min_it_ms.is_finite() && d.min_it_ms > 0.0) {
            eyre::bail!("device.min_it_ms must be > 0");
        }
        if !d.max_it_ms.is_finite() || d.max_it_ms < d.min_it_ms {
            eyre::bail!("device.max_it_ms must be >= device.min_it_ms");
        }
        if let Some(it) = d.initial_it_ms
            && !(d.min_it_ms..=d.max_it_ms).contains(&it)
        {
            eyre::bail!("device.initial_it_ms must lie within [min_it_ms, max_it_ms]");
        }

        // Models
        let camera = self.camera_limits()?;
        self.sensor_limits()?;
        if camera.min_line_clk > camera.max_line_clk {
            eyre::bail!("camera.min_line_clk must be <= camera.max_line_clk");
        }

        // Acquisition
        let a = &self.acquisition;
        if a.max_cycles_per_call == 0 {
            eyre::bail!("acquisition.max_cycles_per_call must be >= 1");
        }
        if a.retries_per_pack == 0 {
            eyre::bail!("acquisition.retries_per_pack must be >= 1");
        }
        if a.cycle_timeout_ms == 0 {
            eyre::bail!("acquisition.cycle_timeout_ms must be >= 1");
        }
        if a.handoff_depth == 0 {
            eyre::bail!("acquisition.handoff_depth must be >= 1");
        }
        if a.polls_per_it == 0 {
            eyre::bail!("acquisition.polls_per_it must be >= 1");
        }

        // Recovery
        if self.recovery.hard_attempts == 0 {
            eyre::bail!("recovery.hard_attempts must be >= 1");
        }
        if self.recovery.hard_attempts > 100 {
            eyre::bail!("recovery.hard_attempts is unreasonably large (>100)");
        }

        // Timeouts
        if self.timeouts.disconnect_wait_ms == 0 {
            eyre::bail!("timeouts.disconnect_wait_ms must be >= 1");
        }

        // Performance
        if let Some(it) = self
            .performance
            .it_ms_list
            .iter()
            .find(|it| !(d.min_it_ms..=d.max_it_ms).contains(*it))
        {
            eyre::bail!("performance.it_ms_list entry {it} is outside [min_it_ms, max_it_ms]");
        }
        if self.performance.cycles_list.contains(&0) {
            eyre::bail!("performance.cycles_list entries must be >= 1");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never, daily, hourly");
        }

        Ok(())
    }
}
