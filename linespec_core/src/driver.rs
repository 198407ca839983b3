//! Device session and the public driver operations.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use linespec_traits::{Clock, DeviceInfo, Register, Transport};

use crate::config::{AcquisitionCfg, DeviceCfg, Gain, RecoveryCfg, Timeouts};
use crate::error::{Result, SpecError};
use crate::hw_error::map_boxed;
use crate::interface::SharedInterface;
use crate::pipeline::{Pipeline, Shared};
use crate::recovery::{self, Recoverable, RecoveryReport};
use crate::status::{AcquisitionState, MeasurementOutcome, MeasurementResult};
use crate::timing::{self, PulseTiming, TimingStatus};
use crate::util;

/// Temperature registers read at or above this (99.00 °C) report no sensor.
const NO_SENSOR_CENTI: u32 = 9_900;

/// Per-connection state.
#[derive(Debug, Clone)]
pub struct DeviceSession {
    pub info: DeviceInfo,
    /// Integration time actually programmed (after any clamping).
    pub it_ms: f64,
    pub timing: PulseTiming,
    pub timing_status: TimingStatus,
    /// Last requested time that was accepted; re-asserted by recovery.
    pub last_good_it_ms: f64,
}

/// Capability interface shared by acquisition backends.
pub trait Acquisition {
    fn connect(&mut self) -> Result<()>;
    fn set_integration_time(&mut self, it_ms: f64) -> Result<TimingStatus>;
    fn measure(&self, cycles: usize) -> Result<u64>;
    fn wait(&self) -> Result<MeasurementOutcome>;
    fn abort(&self) -> Result<()>;
    fn disconnect(&mut self) -> Result<()>;
}

/// Cancels measurements from any thread.
///
/// Tied to one connection; a handle taken before a reconnect does nothing
/// to measurements issued after it.
#[derive(Clone)]
pub struct AbortHandle {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
}

impl AbortHandle {
    pub fn abort(&self, ignore_errors: bool) -> Result<()> {
        abort_with(&self.shared, self.transport.as_ref(), ignore_errors)
    }
}

fn abort_with(shared: &Shared, transport: &dyn Transport, ignore_errors: bool) -> Result<()> {
    shared.cancel_all();
    match transport.abort() {
        Ok(()) => Ok(()),
        Err(e) if ignore_errors => {
            tracing::debug!(error = %e, "abort failed (ignored)");
            Ok(())
        }
        Err(e) => Err(map_boxed(e)),
    }
}

/// Line-sensor spectrometer driver.
pub struct Spectrometer {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    pub(crate) interface: Arc<SharedInterface>,
    pub(crate) device: DeviceCfg,
    pub(crate) acquisition: AcquisitionCfg,
    pub(crate) recovery: RecoveryCfg,
    pub(crate) timeouts: Timeouts,
    pub(crate) session: Option<DeviceSession>,
    pub(crate) pipeline: Option<Pipeline>,
    pub(crate) lease_held: bool,
}

impl core::fmt::Debug for Spectrometer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Spectrometer")
            .field("alias", &self.device.alias)
            .field("serial", &self.device.serial)
            .field("connected", &self.session.is_some())
            .field("it_ms", &self.session.as_ref().map(|s| s.it_ms))
            .finish()
    }
}

impl Spectrometer {
    pub fn device_cfg(&self) -> &DeviceCfg {
        &self.device
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&DeviceSession> {
        self.session.as_ref()
    }

    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.session.as_ref().map(|s| &s.info)
    }

    pub fn integration_time_ms(&self) -> Option<f64> {
        self.session.as_ref().map(|s| s.it_ms)
    }

    pub fn state(&self) -> AcquisitionState {
        match &self.pipeline {
            Some(p) => p.shared.state(),
            None => AcquisitionState::Disconnected,
        }
    }

    /// True while a submitted measurement has not completed.
    pub fn is_measuring(&self) -> bool {
        self.pipeline.as_ref().is_some_and(Pipeline::is_busy)
    }

    /// 0 healthy, 1 soft recovery, 2 hard recovery.
    pub fn recovery_level(&self) -> u8 {
        self.pipeline
            .as_ref()
            .map_or(recovery::LEVEL_HEALTHY, |p| {
                p.shared.recovery_level.load(Ordering::Acquire)
            })
    }

    pub fn last_result(&self) -> Option<Arc<MeasurementResult>> {
        self.pipeline.as_ref().and_then(|p| p.shared.last_result())
    }

    pub fn abort_handle(&self) -> Option<AbortHandle> {
        self.pipeline.as_ref().map(|p| AbortHandle {
            shared: p.shared.clone(),
            transport: self.transport.clone(),
        })
    }

    fn pipeline(&self) -> Result<&Pipeline> {
        self.pipeline
            .as_ref()
            .ok_or_else(|| SpecError::State("not connected".into()))
    }

    fn require_idle(&self, what: &str) -> Result<()> {
        if self.session.is_none() {
            return Err(SpecError::State("not connected".into()));
        }
        if self.is_measuring() {
            return Err(SpecError::State(format!(
                "cannot {what} while a measurement is in flight"
            )));
        }
        Ok(())
    }

    // ── Connection ───────────────────────────────────────────────────────────

    /// Open the device, program the initial settings and start the worker
    /// threads. Calling it on a connected driver does nothing.
    pub fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            tracing::debug!(alias = %self.device.alias, "already connected");
            return Ok(());
        }
        self.acquire_lease()?;
        let it_ms = self.device.initial_it_ms.unwrap_or(self.device.min_it_ms);
        if let Err(e) = self.open_and_configure(it_ms) {
            self.close_quietly();
            return Err(e);
        }
        if self.pipeline.is_none() {
            self.pipeline = Some(Pipeline::spawn(
                self.transport.clone(),
                &self.device,
                &self.acquisition,
            ));
        }
        if let Some(s) = &self.session {
            tracing::info!(
                alias = %self.device.alias,
                serial = %s.info.serial,
                camera = %s.info.camera,
                it_ms = s.it_ms,
                "connected"
            );
        }
        Ok(())
    }

    fn acquire_lease(&mut self) -> Result<()> {
        if !self.lease_held {
            self.interface.acquire(self.transport.as_ref())?;
            self.lease_held = true;
        }
        Ok(())
    }

    fn release_lease(&mut self, free: bool) -> Result<()> {
        if self.lease_held {
            self.lease_held = false;
            self.interface.release(self.transport.as_ref(), free)?;
        }
        Ok(())
    }

    /// Best-effort cleanup after a failed connect.
    fn close_quietly(&mut self) {
        if let Err(e) = self.transport.close() {
            tracing::debug!(error = %e, "close after failed connect (ignored)");
        }
        if let Err(e) = self.release_lease(false) {
            tracing::debug!(error = %e, "release after failed connect (ignored)");
        }
        self.session = None;
    }

    /// Discovery, open, geometry check and settings; the lease must be held.
    fn open_and_configure(&mut self, it_ms: f64) -> Result<()> {
        let t = self.transport.as_ref();
        let info = self.interface.find_device(t, &self.device.serial)?;
        t.open(info.index).map_err(map_boxed)?;
        if let Err(e) = t.abort() {
            tracing::debug!(error = %e, "abort after open failed (ignored)");
        }
        self.check_geometry()?;

        self.session = Some(DeviceSession {
            info,
            it_ms,
            timing: PulseTiming {
                high: 0,
                low: 0,
                line: 0,
            },
            timing_status: TimingStatus::Exact,
            last_good_it_ms: it_ms,
        });

        if let Some(g) = self.device.detector_gain {
            self.write_register(Register::DetectorGainLow, g.register_value())?;
        }
        if let Some(g) = self.device.adc_gain {
            self.write_register(Register::AdcGainLow, g.register_value())?;
        }
        if let Some(o) = self.device.adc_offset {
            self.write_register(Register::AdcOffset, u32::from(o))?;
        }

        // The camera latches timing reliably only after a change; write twice
        // the minimum first. That value is never the one to restore.
        self.write_timing(2.0 * self.device.min_it_ms)?;
        self.program_integration(it_ms)?;
        self.clock
            .sleep(Duration::from_millis(self.timeouts.connect_settle_ms));

        let data_timeout = u32::try_from(self.acquisition.cycle_timeout_ms).unwrap_or(u32::MAX);
        self.write_register(Register::DataTimeoutMs, data_timeout)?;
        Ok(())
    }

    fn check_geometry(&self) -> Result<()> {
        let t = self.transport.as_ref();
        let h = t.get_register(Register::HorizontalPixels).map_err(map_boxed)? as usize;
        if h != self.device.pixel_count {
            return Err(SpecError::Config(format!(
                "device reports {h} horizontal pixels, configured {}",
                self.device.pixel_count
            )));
        }
        let v = t.get_register(Register::VerticalPixels).map_err(map_boxed)? as usize;
        if v != self.device.vertical_pixels {
            return Err(SpecError::Config(format!(
                "device reports {v} vertical pixels, configured {}",
                self.device.vertical_pixels
            )));
        }
        Ok(())
    }

    fn write_register(&self, reg: Register, value: u32) -> Result<()> {
        tracing::trace!(?reg, value, "register write");
        self.transport.set_register(reg, value).map_err(map_boxed)
    }

    /// Stop measuring, join the worker threads and close the device.
    ///
    /// The vendor interface is terminated only when `free_shared_interface`
    /// is set and no other session holds it.
    pub fn disconnect(&mut self, free_shared_interface: bool) -> Result<()> {
        if self.session.is_none() && self.pipeline.is_none() && !self.lease_held {
            return Ok(());
        }
        if let Some(p) = &self.pipeline {
            if p.is_busy() {
                if let Err(e) = abort_with(&p.shared, self.transport.as_ref(), true) {
                    tracing::debug!(error = %e, "abort during disconnect (ignored)");
                }
                let wait = Duration::from_millis(self.timeouts.disconnect_wait_ms);
                if let Err(SpecError::Timeout) = p.wait(Some(wait)) {
                    tracing::warn!(alias = %self.device.alias, "measurement did not stop before disconnect");
                }
            }
        }
        if let Some(mut p) = self.pipeline.take() {
            p.shutdown();
        }
        self.session = None;
        let closed = self.transport.close().map_err(map_boxed);
        let released = self.release_lease(free_shared_interface);
        tracing::info!(alias = %self.device.alias, "disconnected");
        closed.and(released)
    }

    // ── Timing ───────────────────────────────────────────────────────────────

    /// Program a new integration time.
    ///
    /// Rejected while a measurement is in flight. A request below the
    /// hardware floor is programmed at the floor and reported as `Limited`.
    pub fn set_integration_time(&mut self, it_ms: f64) -> Result<TimingStatus> {
        self.require_idle("change integration time")?;
        if !it_ms.is_finite() || it_ms < self.device.min_it_ms || it_ms > self.device.max_it_ms {
            return Err(SpecError::Config(format!(
                "integration time {it_ms} ms outside [{}, {}] ms",
                self.device.min_it_ms, self.device.max_it_ms
            )));
        }
        self.program_integration(it_ms)
    }

    /// Compute and write the timing registers, then update the session.
    fn program_integration(&mut self, it_ms: f64) -> Result<TimingStatus> {
        let (status, t, effective) = self.write_timing(it_ms)?;
        if let Some(s) = self.session.as_mut() {
            s.it_ms = effective;
            s.timing = t;
            s.timing_status = status;
            s.last_good_it_ms = it_ms;
        }
        Ok(status)
    }

    /// Register writes only; returns the status, the timing and the
    /// effective integration time in ms.
    fn write_timing(&self, it_ms: f64) -> Result<(TimingStatus, PulseTiming, f64)> {
        let dev = &self.device;
        let (status, t) =
            timing::compute_pulse_timing(it_ms, dev.clock_mhz, &dev.camera, &dev.sensor);
        if status == TimingStatus::Capped {
            return Err(SpecError::Config(format!(
                "integration time {it_ms} ms is unreachable; the camera supports at least {:.4} ms",
                timing::floor_integration_ms(dev.clock_mhz, &dev.camera, &dev.sensor)
            )));
        }
        let effective = timing::effective_integration_ms(t.high, dev.clock_mhz, &dev.sensor);
        if status == TimingStatus::Limited {
            tracing::warn!(
                alias = %dev.alias,
                requested_ms = it_ms,
                effective_ms = effective,
                "integration time below hardware floor, using floor"
            );
        }

        self.write_register(Register::StartPulseTime, dev.camera.min_high_clk)?;
        self.write_register(Register::LineTime, t.line)?;
        self.write_register(Register::StartPulseTime, t.high)?;
        tracing::debug!(
            alias = %self.device.alias,
            it_ms = effective,
            high = t.high,
            low = t.low,
            line = t.line,
            "timing programmed"
        );
        Ok((status, t, effective))
    }

    pub fn set_detector_gain(&mut self, gain: Gain) -> Result<()> {
        self.require_idle("change detector gain")?;
        self.write_register(Register::DetectorGainLow, gain.register_value())?;
        self.device.detector_gain = Some(gain);
        Ok(())
    }

    pub fn set_adc_gain(&mut self, gain: Gain) -> Result<()> {
        self.require_idle("change ADC gain")?;
        self.write_register(Register::AdcGainLow, gain.register_value())?;
        self.device.adc_gain = Some(gain);
        Ok(())
    }

    pub fn set_adc_offset(&mut self, offset: u16) -> Result<()> {
        self.require_idle("change ADC offset")?;
        self.write_register(Register::AdcOffset, u32::from(offset))?;
        self.device.adc_offset = Some(offset);
        Ok(())
    }

    // ── Measurement ──────────────────────────────────────────────────────────

    /// Queue a measurement of `cycles` cycles and return its id immediately.
    pub fn measure(&self, cycles: usize) -> Result<u64> {
        if cycles == 0 {
            return Err(SpecError::Config("cycle count must be at least 1".into()));
        }
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| SpecError::State("not connected".into()))?;
        let line_ms = util::line_period_ms(session.timing.line, self.device.clock_mhz);
        self.pipeline()?.submit(cycles, session.it_ms, line_ms)
    }

    /// Block until the latest measurement reaches a terminal state.
    pub fn wait_for_measurement(&self) -> Result<MeasurementOutcome> {
        self.pipeline()?.wait(None)
    }

    /// Like `wait_for_measurement`, giving up with `Timeout` after `timeout`.
    pub fn wait_for_measurement_timeout(&self, timeout: Duration) -> Result<MeasurementOutcome> {
        self.pipeline()?.wait(Some(timeout))
    }

    /// Cancel the current and queued measurements and abort the transport.
    pub fn abort(&self, ignore_errors: bool) -> Result<()> {
        match &self.pipeline {
            Some(p) => abort_with(&p.shared, self.transport.as_ref(), ignore_errors),
            None => {
                tracing::debug!(alias = %self.device.alias, "abort while disconnected");
                Ok(())
            }
        }
    }

    // ── Auxiliary sensors ────────────────────────────────────────────────────

    /// Read a temperature sensor by name: `detector`, `board_analog` or
    /// `board_digital`. `None` means the device reports no sensor.
    pub fn read_aux_sensor(&self, name: &str) -> Result<Option<f64>> {
        let reg = match name {
            "detector" => Register::DetectorTemperature,
            "board_analog" | "board_digital" => Register::BoardTemperature,
            other => {
                return Err(SpecError::Config(format!("unknown aux sensor '{other}'")));
            }
        };
        if self.session.is_none() {
            return Err(SpecError::State("not connected".into()));
        }
        let raw = self.transport.get_register(reg).map_err(map_boxed)?;
        if raw >= NO_SENSOR_CENTI {
            tracing::warn!(alias = %self.device.alias, sensor = name, raw, "aux sensor out of range");
            return Ok(None);
        }
        Ok(Some(f64::from(raw) / 100.0))
    }

    // ── Recovery ─────────────────────────────────────────────────────────────

    /// Run the soft/hard recovery ladder. On exhaustion the session is torn
    /// down and `CommunicationLoss` is returned.
    ///
    /// With `free_shared_interface` set, the first hard attempt terminates the
    /// vendor interface when no other session holds it.
    pub fn recover(&mut self, free_shared_interface: bool) -> Result<RecoveryReport> {
        if self.session.is_none() {
            return Err(SpecError::State("not connected".into()));
        }
        if let Some(p) = &self.pipeline {
            if p.is_busy() {
                p.cancel_all();
                let wait = Duration::from_millis(self.timeouts.disconnect_wait_ms);
                if let Err(SpecError::Timeout) = p.wait(Some(wait)) {
                    tracing::warn!(alias = %self.device.alias, "measurement did not stop before recovery");
                }
            }
        }
        let shared = self
            .pipeline
            .as_ref()
            .map(|p| p.shared.clone())
            .ok_or_else(|| SpecError::State("not connected".into()))?;
        let cfg = self.recovery.clone();
        let clock = self.clock.clone();
        let alias = self.device.alias.clone();

        let res = recovery::run_ladder(
            self,
            &cfg,
            clock.as_ref(),
            &shared.recovery_level,
            &alias,
            free_shared_interface,
        );
        if res.is_err() {
            if let Err(e) = self.disconnect(false) {
                tracing::debug!(error = %e, "teardown after failed recovery");
            }
        }
        res
    }
}

impl Recoverable for Spectrometer {
    fn abort_strict(&mut self) -> Result<()> {
        self.transport.abort().map_err(map_boxed)
    }

    fn reassert_integration(&mut self) -> Result<()> {
        let it = self
            .session
            .as_ref()
            .map_or(self.device.min_it_ms, |s| s.last_good_it_ms);
        self.program_integration(it).map(|_| ())
    }

    fn release_device(&mut self, free: bool) -> Result<()> {
        let closed = self.transport.close().map_err(map_boxed);
        let released = self.release_lease(free);
        closed.and(released)
    }

    fn acquire_interface(&mut self) -> Result<()> {
        self.acquire_lease()
    }

    fn hardware_reset(&mut self) -> Result<()> {
        tracing::info!(alias = %self.device.alias, "hardware reset");
        self.transport.reset().map_err(map_boxed)
    }

    fn reopen_device(&mut self) -> Result<()> {
        let it = self
            .session
            .as_ref()
            .map_or(self.device.min_it_ms, |s| s.last_good_it_ms);
        self.open_and_configure(it)
    }
}

impl Acquisition for Spectrometer {
    fn connect(&mut self) -> Result<()> {
        Spectrometer::connect(self)
    }

    fn set_integration_time(&mut self, it_ms: f64) -> Result<TimingStatus> {
        Spectrometer::set_integration_time(self, it_ms)
    }

    fn measure(&self, cycles: usize) -> Result<u64> {
        Spectrometer::measure(self, cycles)
    }

    fn wait(&self) -> Result<MeasurementOutcome> {
        self.wait_for_measurement()
    }

    fn abort(&self) -> Result<()> {
        Spectrometer::abort(self, false)
    }

    fn disconnect(&mut self) -> Result<()> {
        Spectrometer::disconnect(self, false)
    }
}

impl Drop for Spectrometer {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect(false) {
            tracing::debug!(error = %e, "disconnect on drop failed");
        }
    }
}
