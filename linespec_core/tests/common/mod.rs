#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use linespec_core::{AcquisitionCfg, DeviceCfg, Spectrometer};
use linespec_hardware::{SimConfig, SimulatedTransport};
use linespec_traits::clock::test_clock::TestClock;
use linespec_traits::{BoxError, CaptureState, DeviceInfo, Register, Transport};

pub const PIXELS: usize = 64;
pub const WAIT: Duration = Duration::from_secs(10);

pub fn sim() -> SimulatedTransport {
    SimulatedTransport::new(SimConfig {
        pixel_count: PIXELS,
        ..SimConfig::default()
    })
}

pub fn device() -> DeviceCfg {
    DeviceCfg {
        serial: "SIM0001".into(),
        alias: "test".into(),
        pixel_count: PIXELS,
        ..DeviceCfg::default()
    }
}

pub fn acquisition(max_cycles_per_call: usize) -> AcquisitionCfg {
    AcquisitionCfg {
        max_cycles_per_call,
        cycle_timeout_ms: 500,
        ..AcquisitionCfg::default()
    }
}

/// A connected spectrometer on `sim` whose settle delays go to a test clock.
pub fn connected(sim: &SimulatedTransport, max_cycles_per_call: usize) -> (Spectrometer, TestClock) {
    connected_via(sim.clone(), max_cycles_per_call)
}

pub fn connected_via(
    transport: impl Transport + 'static,
    max_cycles_per_call: usize,
) -> (Spectrometer, TestClock) {
    let clock = TestClock::new();
    let mut spec = Spectrometer::builder()
        .with_transport(transport)
        .with_device(device())
        .with_acquisition(acquisition(max_cycles_per_call))
        .with_clock(Arc::new(clock.clone()))
        .build()
        .expect("build");
    spec.connect().expect("connect");
    (spec, clock)
}

#[derive(Default)]
struct Script {
    fail_line_time: Option<u32>,
    captures_left: Option<usize>,
}

/// Simulator wrapper for faults the simulator has no knob for.
#[derive(Clone)]
pub struct Scripted {
    pub sim: SimulatedTransport,
    script: Arc<Mutex<Script>>,
}

impl Scripted {
    pub fn new(sim: &SimulatedTransport) -> Self {
        Self {
            sim: sim.clone(),
            script: Arc::default(),
        }
    }

    /// The next write of `value` to `LineTime` fails.
    pub fn fail_line_time_once(&self, value: u32) {
        self.script.lock().unwrap().fail_line_time = Some(value);
    }

    /// `n` more captures start normally; every later one is refused.
    pub fn refuse_captures_after(&self, n: usize) {
        self.script.lock().unwrap().captures_left = Some(n);
    }
}

impl Transport for Scripted {
    fn initialize(&self) -> Result<(), BoxError> {
        self.sim.initialize()
    }
    fn terminate(&self) -> Result<(), BoxError> {
        self.sim.terminate()
    }
    fn enumerate(&self) -> Result<Vec<DeviceInfo>, BoxError> {
        self.sim.enumerate()
    }
    fn open(&self, index: u32) -> Result<(), BoxError> {
        self.sim.open(index)
    }
    fn close(&self) -> Result<(), BoxError> {
        self.sim.close()
    }
    fn reset(&self) -> Result<(), BoxError> {
        self.sim.reset()
    }
    fn set_register(&self, reg: Register, value: u32) -> Result<(), BoxError> {
        {
            let mut s = self.script.lock().unwrap();
            if reg == Register::LineTime && s.fail_line_time == Some(value) {
                s.fail_line_time = None;
                return Err("line time write rejected".into());
            }
        }
        self.sim.set_register(reg, value)
    }
    fn get_register(&self, reg: Register) -> Result<u32, BoxError> {
        self.sim.get_register(reg)
    }
    fn start_capture(&self, cycles: usize) -> Result<(), BoxError> {
        {
            let mut s = self.script.lock().unwrap();
            match s.captures_left.as_mut() {
                Some(0) => return Err("capture refused".into()),
                Some(n) => *n -= 1,
                None => {}
            }
        }
        self.sim.start_capture(cycles)
    }
    fn poll_capture(&self) -> Result<CaptureState, BoxError> {
        self.sim.poll_capture()
    }
    fn read_capture(&self, out: &mut Vec<u16>) -> Result<(), BoxError> {
        self.sim.read_capture(out)
    }
    fn abort(&self) -> Result<(), BoxError> {
        self.sim.abort()
    }
}
