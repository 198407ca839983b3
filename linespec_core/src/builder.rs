//! Type-state builder for `Spectrometer`.
//!
//! The builder enforces at compile time that a transport is provided before
//! `build()` is available. `try_build()` is always available for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;

use linespec_traits::Transport;
use linespec_traits::clock::{Clock, MonotonicClock};

use crate::config::{AcquisitionCfg, DeviceCfg, RecoveryCfg, Timeouts};
use crate::driver::Spectrometer;
use crate::error::BuildError;
use crate::interface::SharedInterface;

/// Builder result; configuration problems are reported as `BuildError`
/// inside an `eyre::Report`.
pub type BuildResult<T> = eyre::Result<T>;

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `Spectrometer`. All fields are validated on `build()`.
pub struct SpectrometerBuilder<T> {
    transport: Option<Arc<dyn Transport>>,
    device: Option<DeviceCfg>,
    acquisition: Option<AcquisitionCfg>,
    recovery: Option<RecoveryCfg>,
    timeouts: Option<Timeouts>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    interface: Option<Arc<SharedInterface>>,
    _t: PhantomData<T>,
}

impl Default for SpectrometerBuilder<Missing> {
    fn default() -> Self {
        Self {
            transport: None,
            device: None,
            acquisition: None,
            recovery: None,
            timeouts: None,
            clock: None,
            interface: None,
            _t: PhantomData,
        }
    }
}

impl Spectrometer {
    /// Start building a Spectrometer.
    pub fn builder() -> SpectrometerBuilder<Missing> {
        SpectrometerBuilder::default()
    }
}

fn invalid(msg: &'static str) -> eyre::Report {
    eyre::Report::new(BuildError::InvalidConfig(msg))
}

fn validate(device: &DeviceCfg, acq: &AcquisitionCfg, rec: &RecoveryCfg) -> BuildResult<()> {
    if device.serial.trim().is_empty() {
        return Err(invalid("serial must not be empty"));
    }
    if device.pixel_count == 0 || device.vertical_pixels == 0 {
        return Err(invalid("pixel counts must be > 0"));
    }
    if !(1..=32).contains(&device.bit_depth) {
        return Err(invalid("bit_depth must be in 1..=32"));
    }
    if let Some(limit) = device.saturation_limit {
        if !limit.is_finite() || limit <= 0.0 {
            return Err(invalid("saturation_limit must be finite and > 0"));
        }
    }
    if !device.scaling.gain.is_finite() || !device.scaling.offset.is_finite() {
        return Err(invalid("scaling must be finite"));
    }
    if !device.clock_mhz.is_finite() || device.clock_mhz <= 0.0 {
        return Err(invalid("clock_mhz must be finite and > 0"));
    }
    if !device.min_it_ms.is_finite() || !device.max_it_ms.is_finite() || device.min_it_ms <= 0.0 {
        return Err(invalid("integration time bounds must be finite and > 0"));
    }
    if device.min_it_ms > device.max_it_ms {
        return Err(invalid("min_it_ms must be <= max_it_ms"));
    }
    if let Some(it) = device.initial_it_ms {
        if !(device.min_it_ms..=device.max_it_ms).contains(&it) {
            return Err(invalid("initial_it_ms must lie within [min_it_ms, max_it_ms]"));
        }
    }
    if device.camera.min_line_clk > device.camera.max_line_clk {
        return Err(invalid("camera min_line_clk must be <= max_line_clk"));
    }
    if acq.max_cycles_per_call == 0 {
        return Err(invalid("max_cycles_per_call must be > 0"));
    }
    if acq.retries_per_pack == 0 {
        return Err(invalid("retries_per_pack must be >= 1"));
    }
    if acq.handoff_depth == 0 {
        return Err(invalid("handoff_depth must be >= 1"));
    }
    if acq.polls_per_it == 0 {
        return Err(invalid("polls_per_it must be >= 1"));
    }
    if rec.hard_attempts == 0 {
        return Err(invalid("hard_attempts must be >= 1"));
    }
    Ok(())
}

impl<T> SpectrometerBuilder<T> {
    /// Fallible build available in any type-state; returns detailed error for missing pieces.
    pub fn try_build(self) -> BuildResult<Spectrometer> {
        let transport = self
            .transport
            .ok_or_else(|| eyre::Report::new(BuildError::MissingTransport))?;
        let device = self.device.unwrap_or_default();
        let acquisition = self.acquisition.unwrap_or_default();
        let recovery = self.recovery.unwrap_or_default();
        validate(&device, &acquisition, &recovery)?;

        Ok(Spectrometer {
            transport,
            clock: self.clock.unwrap_or_else(|| Arc::new(MonotonicClock::new())),
            interface: self.interface.unwrap_or_else(SharedInterface::new),
            device,
            acquisition,
            recovery,
            timeouts: self.timeouts.unwrap_or_default(),
            session: None,
            pipeline: None,
            lease_held: false,
        })
    }

    pub fn with_device(mut self, device: DeviceCfg) -> Self {
        self.device = Some(device);
        self
    }
    pub fn with_acquisition(mut self, acquisition: AcquisitionCfg) -> Self {
        self.acquisition = Some(acquisition);
        self
    }
    pub fn with_recovery(mut self, recovery: RecoveryCfg) -> Self {
        self.recovery = Some(recovery);
        self
    }
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = Some(timeouts);
        self
    }
    /// Clock for settle and backoff delays; defaults to `MonotonicClock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }
    /// Share one vendor interface between several devices on this host.
    pub fn with_interface(mut self, interface: Arc<SharedInterface>) -> Self {
        self.interface = Some(interface);
        self
    }
}

impl SpectrometerBuilder<Missing> {
    pub fn with_transport(self, transport: impl Transport + 'static) -> SpectrometerBuilder<Set> {
        self.with_shared_transport(Arc::new(transport))
    }

    pub fn with_shared_transport(self, transport: Arc<dyn Transport>) -> SpectrometerBuilder<Set> {
        SpectrometerBuilder {
            transport: Some(transport),
            device: self.device,
            acquisition: self.acquisition,
            recovery: self.recovery,
            timeouts: self.timeouts,
            clock: self.clock,
            interface: self.interface,
            _t: PhantomData,
        }
    }
}

impl SpectrometerBuilder<Set> {
    /// Build once a transport is set.
    pub fn build(self) -> BuildResult<Spectrometer> {
        self.try_build()
    }
}
