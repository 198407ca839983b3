pub mod clock;

pub use clock::{Clock, MonotonicClock};

/// Error type used at every transport boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Device registers reachable through the vendor call interface.
///
/// Some are write-only timing registers, some are read-only status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    /// Line period in clock ticks.
    LineTime,
    /// Start-pulse high period in clock ticks.
    StartPulseTime,
    /// Per-cycle data timeout in milliseconds.
    DataTimeoutMs,
    /// Detector sensitivity: 0 = high gain, 1 = low gain.
    DetectorGainLow,
    /// ADC gain: 0 = high gain, 1 = low gain.
    AdcGainLow,
    AdcOffset,
    HorizontalPixels,
    VerticalPixels,
    /// Detector temperature, hundredths of a degree Celsius.
    DetectorTemperature,
    /// Board temperature, hundredths of a degree Celsius.
    BoardTemperature,
}

/// Result of polling an outstanding capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Busy,
    Ready,
    Failed,
}

/// Identity of one enumerated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub index: u32,
    pub camera: String,
    pub serial: String,
    pub hw_revision: u8,
    pub fw_revision: u8,
}

/// Synchronous vendor call interface for one line-sensor camera.
///
/// All methods take `&self`: `abort` must be callable from any thread while
/// another thread is polling a capture, so implementations serialize
/// internally. `initialize`/`terminate` act on the host-wide interface shared
/// by every device; the remaining calls act on the opened device.
pub trait Transport: Send + Sync {
    fn initialize(&self) -> Result<(), BoxError>;
    fn terminate(&self) -> Result<(), BoxError>;
    fn enumerate(&self) -> Result<Vec<DeviceInfo>, BoxError>;
    fn open(&self, index: u32) -> Result<(), BoxError>;
    fn close(&self) -> Result<(), BoxError>;
    /// Vendor hardware-reset pulse.
    fn reset(&self) -> Result<(), BoxError>;

    fn set_register(&self, reg: Register, value: u32) -> Result<(), BoxError>;
    /// Temperature registers are returned in hundredths of a degree Celsius;
    /// 9900 or more means the sensor is not fitted.
    fn get_register(&self, reg: Register) -> Result<u32, BoxError>;

    /// Start capturing `cycles` consecutive lines into the transport buffer.
    fn start_capture(&self, cycles: usize) -> Result<(), BoxError>;
    fn poll_capture(&self) -> Result<CaptureState, BoxError>;
    /// Copy the last completed capture into `out` (cleared first).
    fn read_capture(&self, out: &mut Vec<u16>) -> Result<(), BoxError>;
    fn abort(&self) -> Result<(), BoxError>;
}
