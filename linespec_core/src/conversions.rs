//! Conversions from `linespec_config` types to runtime config types.

use crate::config::{AcquisitionCfg, DeviceCfg, Gain, RecoveryCfg, Timeouts};
use crate::stats::Scaling;
use crate::timing::{CameraLimits, SensorLimits};

// ── Models ───────────────────────────────────────────────────────────────────

impl From<&linespec_config::CameraModel> for CameraLimits {
    fn from(c: &linespec_config::CameraModel) -> Self {
        Self {
            min_high_clk: c.min_high_clk,
            min_low_clk: c.min_low_clk,
            min_line_clk: c.min_line_clk,
            max_line_clk: c.max_line_clk,
        }
    }
}

impl From<&linespec_config::SensorModel> for SensorLimits {
    fn from(s: &linespec_config::SensorModel) -> Self {
        Self {
            min_line_clk: s.min_line_clk,
            min_high_clk: s.min_high_clk,
            min_low_clk: s.min_low_clk,
            it_offset_clk: s.it_offset_clk,
        }
    }
}

impl From<linespec_config::GainSetting> for Gain {
    fn from(g: linespec_config::GainSetting) -> Self {
        match g {
            linespec_config::GainSetting::High => Gain::High,
            linespec_config::GainSetting::Low => Gain::Low,
        }
    }
}

// ── DeviceCfg ────────────────────────────────────────────────────────────────

/// Fails when the camera or sensor model is not in the built-in tables.
impl TryFrom<&linespec_config::Config> for DeviceCfg {
    type Error = eyre::Report;

    fn try_from(c: &linespec_config::Config) -> Result<Self, Self::Error> {
        let d = &c.device;
        Ok(Self {
            serial: d.serial.clone(),
            alias: d.alias.clone(),
            pixel_count: d.pixel_count,
            vertical_pixels: d.vertical_pixels,
            bit_depth: d.bit_depth,
            saturation_limit: d.saturation_limit,
            scaling: Scaling {
                gain: d.scale_gain,
                offset: d.scale_offset,
            },
            clock_mhz: d.clock_mhz,
            min_it_ms: d.min_it_ms,
            max_it_ms: d.max_it_ms,
            initial_it_ms: d.initial_it_ms,
            detector_gain: d.gain_detector.map(Gain::from),
            adc_gain: d.gain_adc.map(Gain::from),
            adc_offset: d.adc_offset,
            camera: CameraLimits::from(&c.camera_limits()?),
            sensor: SensorLimits::from(&c.sensor_limits()?),
        })
    }
}

// ── AcquisitionCfg ───────────────────────────────────────────────────────────

impl From<&linespec_config::AcquisitionToml> for AcquisitionCfg {
    fn from(c: &linespec_config::AcquisitionToml) -> Self {
        Self {
            max_cycles_per_call: c.max_cycles_per_call,
            abort_on_saturation: c.abort_on_saturation,
            retries_per_pack: c.retries_per_pack,
            cycle_timeout_ms: c.cycle_timeout_ms,
            handoff_depth: c.handoff_depth,
            polls_per_it: c.polls_per_it,
        }
    }
}

// ── RecoveryCfg ──────────────────────────────────────────────────────────────

impl From<&linespec_config::RecoveryToml> for RecoveryCfg {
    fn from(c: &linespec_config::RecoveryToml) -> Self {
        Self {
            soft_enabled: c.soft_enabled,
            hard_attempts: c.hard_attempts,
            abort_settle_ms: c.abort_settle_ms,
            settle_ms: c.settle_ms,
            reconnect_settle_ms: c.reconnect_settle_ms,
            reset_settle_ms: c.reset_settle_ms,
            retry_delay_ms: c.retry_delay_ms,
            hardware_reset: c.hardware_reset,
        }
    }
}

// ── Timeouts ─────────────────────────────────────────────────────────────────

impl From<&linespec_config::Timeouts> for Timeouts {
    fn from(c: &linespec_config::Timeouts) -> Self {
        Self {
            disconnect_wait_ms: c.disconnect_wait_ms,
            connect_settle_ms: c.connect_settle_ms,
        }
    }
}
