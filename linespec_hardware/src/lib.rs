pub mod error;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use linespec_traits::{BoxError, CaptureState, DeviceInfo, Register, Transport};

use crate::error::TransportError;

/// Static description of the simulated camera.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub serial: String,
    pub camera: String,
    pub pixel_count: usize,
    pub vertical_pixels: usize,
    pub clock_mhz: f64,
    pub it_offset_clk: u32,
    /// Extra time per cycle on top of the programmed line period.
    pub readout_overhead: Duration,
    pub baseline: u16,
    /// Peak signal above baseline at `reference_it_ms`.
    pub amplitude: f64,
    pub reference_it_ms: f64,
    pub noise: u16,
    /// Hundredths of a degree; 9999 reads as "no sensor".
    pub detector_temp_centi: u32,
    pub board_temp_centi: u32,
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            serial: "SIM0001".into(),
            camera: "C13015-01".into(),
            pixel_count: 4096,
            vertical_pixels: 1,
            clock_mhz: 10.0,
            it_offset_clk: 48,
            readout_overhead: Duration::from_micros(50),
            baseline: 1000,
            amplitude: 20_000.0,
            reference_it_ms: 50.0,
            noise: 16,
            detector_temp_centi: 2512,
            board_temp_centi: 3140,
            seed: 0x5eed_cafe,
        }
    }
}

/// Runtime fault knobs, adjustable while the transport is in use.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub fail_next_captures: usize,
    pub fail_next_aborts: usize,
    pub fail_next_opens: usize,
    /// Capture calls time out until the next `reset`.
    pub unresponsive: bool,
    /// 1-based cycle number (counted since open) that reads full scale.
    pub saturate_at_cycle: Option<u64>,
    /// Counts added per cycle to every pixel.
    pub drift_per_cycle: f64,
    /// Extra delay added to every capture.
    pub capture_delay: Duration,
}

/// Call counters for assertions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimCounters {
    pub initializes: usize,
    pub terminates: usize,
    pub opens: usize,
    pub closes: usize,
    pub resets: usize,
    pub aborts: usize,
    pub captures_started: usize,
    pub cycles_produced: u64,
}

struct Capture {
    cycles: usize,
    started: Instant,
    duration: Duration,
}

struct SimState {
    initialized: bool,
    opened: bool,
    registers: HashMap<Register, u32>,
    write_log: Vec<(Register, u32)>,
    capture: Option<Capture>,
    aborted: bool,
    buffer: Vec<u16>,
    buffer_ready: bool,
    faults: Faults,
    counters: SimCounters,
    rng: u64,
}

struct Inner {
    cfg: SimConfig,
    state: Mutex<SimState>,
}

/// In-process stand-in for the vendor interface and one camera.
///
/// Cloning yields another handle to the same device, so tests can keep one
/// while the driver owns the other.
#[derive(Clone)]
pub struct SimulatedTransport {
    inner: Arc<Inner>,
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl SimulatedTransport {
    pub fn new(cfg: SimConfig) -> Self {
        let rng = cfg.seed.max(1);
        Self {
            inner: Arc::new(Inner {
                cfg,
                state: Mutex::new(SimState {
                    initialized: false,
                    opened: false,
                    registers: HashMap::new(),
                    write_log: Vec::new(),
                    capture: None,
                    aborted: false,
                    buffer: Vec::new(),
                    buffer_ready: false,
                    faults: Faults::default(),
                    counters: SimCounters::default(),
                    rng,
                }),
            }),
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.inner.cfg
    }

    /// Adjust fault knobs in place.
    pub fn with_faults(&self, f: impl FnOnce(&mut Faults)) {
        if let Ok(mut st) = self.inner.state.lock() {
            f(&mut st.faults);
        }
    }

    pub fn counters(&self) -> SimCounters {
        self.inner
            .state
            .lock()
            .map(|s| s.counters.clone())
            .unwrap_or_default()
    }

    /// Every register write since construction, in order.
    pub fn register_writes(&self) -> Vec<(Register, u32)> {
        self.inner
            .state
            .lock()
            .map(|s| s.write_log.clone())
            .unwrap_or_default()
    }

    pub fn is_open(&self) -> bool {
        self.inner.state.lock().map(|s| s.opened).unwrap_or(false)
    }

    fn state(&self) -> Result<MutexGuard<'_, SimState>, BoxError> {
        self.inner
            .state
            .lock()
            .map_err(|_| Box::new(TransportError::from_status(1)) as BoxError)
    }

    fn require_open(st: &SimState) -> Result<(), BoxError> {
        if !st.initialized {
            return Err(Box::new(TransportError::from_status(2)));
        }
        if !st.opened {
            return Err(Box::new(TransportError::NotConnected));
        }
        Ok(())
    }

    fn register(st: &SimState, reg: Register) -> Option<u32> {
        st.registers.get(&reg).copied()
    }

    fn cycle_period(&self, st: &SimState) -> Duration {
        let line = Self::register(st, Register::LineTime).unwrap_or(24_000);
        let micros = f64::from(line) / self.inner.cfg.clock_mhz;
        Duration::from_micros(micros as u64) + self.inner.cfg.readout_overhead
    }

    fn integration_ms(&self, st: &SimState) -> f64 {
        let high = Self::register(st, Register::StartPulseTime).unwrap_or(23_952);
        f64::from(high + self.inner.cfg.it_offset_clk) / (self.inner.cfg.clock_mhz * 1000.0)
    }

    fn fill_buffer(&self, st: &mut SimState, cycles: usize) {
        let cfg = &self.inner.cfg;
        let npix = cfg.pixel_count * cfg.vertical_pixels.max(1);
        let gain = self.integration_ms(st) / cfg.reference_it_ms.max(f64::MIN_POSITIVE);
        let centre = npix as f64 / 2.0;
        let width = (npix as f64 / 8.0).max(1.0);
        st.buffer.clear();
        st.buffer.reserve(npix * cycles);
        for _ in 0..cycles {
            st.counters.cycles_produced += 1;
            let seq = st.counters.cycles_produced;
            let saturate = st.faults.saturate_at_cycle == Some(seq);
            let drift = st.faults.drift_per_cycle * seq as f64;
            for p in 0..npix {
                if saturate {
                    st.buffer.push(u16::MAX);
                    continue;
                }
                let z = (p as f64 - centre) / width;
                let signal = cfg.amplitude * (-z * z).exp() * gain;
                let noise = if cfg.noise == 0 {
                    0.0
                } else {
                    (next_rand(&mut st.rng) % (2 * u64::from(cfg.noise) + 1)) as f64
                        - f64::from(cfg.noise)
                };
                let v = f64::from(cfg.baseline) + signal + noise + drift;
                st.buffer.push(v.round().clamp(0.0, f64::from(u16::MAX)) as u16);
            }
        }
        st.buffer_ready = true;
    }
}

fn next_rand(state: &mut u64) -> u64 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    *state = x;
    x
}

impl Transport for SimulatedTransport {
    fn initialize(&self) -> Result<(), BoxError> {
        let mut st = self.state()?;
        st.initialized = true;
        st.counters.initializes += 1;
        tracing::debug!("sim: interface initialized");
        Ok(())
    }

    fn terminate(&self) -> Result<(), BoxError> {
        let mut st = self.state()?;
        st.initialized = false;
        st.opened = false;
        st.capture = None;
        st.counters.terminates += 1;
        tracing::debug!("sim: interface terminated");
        Ok(())
    }

    fn enumerate(&self) -> Result<Vec<DeviceInfo>, BoxError> {
        let st = self.state()?;
        if !st.initialized {
            return Err(Box::new(TransportError::from_status(2)));
        }
        Ok(vec![DeviceInfo {
            index: 0,
            camera: self.inner.cfg.camera.clone(),
            serial: self.inner.cfg.serial.clone(),
            hw_revision: 1,
            fw_revision: 3,
        }])
    }

    fn open(&self, index: u32) -> Result<(), BoxError> {
        let mut st = self.state()?;
        if !st.initialized {
            return Err(Box::new(TransportError::from_status(2)));
        }
        if st.faults.fail_next_opens > 0 {
            st.faults.fail_next_opens -= 1;
            return Err(Box::new(TransportError::from_status(4)));
        }
        if index != 0 {
            return Err(Box::new(TransportError::from_status(3)));
        }
        st.opened = true;
        st.aborted = false;
        st.counters.opens += 1;
        st.counters.cycles_produced = 0;
        Ok(())
    }

    fn close(&self) -> Result<(), BoxError> {
        let mut st = self.state()?;
        st.opened = false;
        st.capture = None;
        st.buffer_ready = false;
        st.counters.closes += 1;
        Ok(())
    }

    fn reset(&self) -> Result<(), BoxError> {
        let mut st = self.state()?;
        if !st.initialized {
            return Err(Box::new(TransportError::from_status(2)));
        }
        st.faults.unresponsive = false;
        st.capture = None;
        st.counters.resets += 1;
        tracing::debug!("sim: hardware reset");
        Ok(())
    }

    fn set_register(&self, reg: Register, value: u32) -> Result<(), BoxError> {
        let mut st = self.state()?;
        Self::require_open(&st)?;
        if st.faults.unresponsive {
            return Err(Box::new(TransportError::Timeout));
        }
        match reg {
            Register::HorizontalPixels
            | Register::VerticalPixels
            | Register::DetectorTemperature
            | Register::BoardTemperature => {
                return Err(Box::new(TransportError::from_status(20)));
            }
            _ => {}
        }
        st.registers.insert(reg, value);
        st.write_log.push((reg, value));
        Ok(())
    }

    fn get_register(&self, reg: Register) -> Result<u32, BoxError> {
        let st = self.state()?;
        Self::require_open(&st)?;
        let cfg = &self.inner.cfg;
        let v = match reg {
            Register::HorizontalPixels => cfg.pixel_count as u32,
            Register::VerticalPixels => cfg.vertical_pixels as u32,
            Register::DetectorTemperature => cfg.detector_temp_centi,
            Register::BoardTemperature => cfg.board_temp_centi,
            other => Self::register(&st, other).ok_or_else(|| {
                Box::new(TransportError::from_status(21)) as BoxError
            })?,
        };
        Ok(v)
    }

    fn start_capture(&self, cycles: usize) -> Result<(), BoxError> {
        let mut st = self.state()?;
        Self::require_open(&st)?;
        if st.faults.unresponsive {
            return Err(Box::new(TransportError::Timeout));
        }
        st.counters.captures_started += 1;
        if st.faults.fail_next_captures > 0 {
            st.faults.fail_next_captures -= 1;
            return Err(Box::new(TransportError::from_status(11)));
        }
        let duration = self.cycle_period(&st) * cycles as u32 + st.faults.capture_delay;
        st.capture = Some(Capture {
            cycles,
            started: Instant::now(),
            duration,
        });
        st.aborted = false;
        st.buffer_ready = false;
        tracing::trace!(cycles, ?duration, "sim: capture started");
        Ok(())
    }

    fn poll_capture(&self) -> Result<CaptureState, BoxError> {
        let mut st = self.state()?;
        Self::require_open(&st)?;
        if st.faults.unresponsive {
            return Err(Box::new(TransportError::Timeout));
        }
        if st.aborted {
            return Ok(CaptureState::Failed);
        }
        let Some(cap) = st.capture.as_ref() else {
            return Ok(if st.buffer_ready {
                CaptureState::Ready
            } else {
                CaptureState::Failed
            });
        };
        if cap.started.elapsed() < cap.duration {
            return Ok(CaptureState::Busy);
        }
        let cycles = cap.cycles;
        st.capture = None;
        self.fill_buffer(&mut st, cycles);
        Ok(CaptureState::Ready)
    }

    fn read_capture(&self, out: &mut Vec<u16>) -> Result<(), BoxError> {
        let st = self.state()?;
        Self::require_open(&st)?;
        if !st.buffer_ready {
            return Err(Box::new(TransportError::from_status(11)));
        }
        out.clear();
        out.extend_from_slice(&st.buffer);
        Ok(())
    }

    fn abort(&self) -> Result<(), BoxError> {
        let mut st = self.state()?;
        st.counters.aborts += 1;
        if st.faults.fail_next_aborts > 0 {
            st.faults.fail_next_aborts -= 1;
            return Err(Box::new(TransportError::from_status(8)));
        }
        if st.faults.unresponsive {
            return Err(Box::new(TransportError::Timeout));
        }
        if st.capture.take().is_some() {
            st.aborted = true;
            tracing::trace!("sim: capture aborted");
        }
        Ok(())
    }
}
