//! Test and helper mocks for linespec_core

use linespec_traits::{BoxError, CaptureState, DeviceInfo, Register, Transport};

/// A transport whose every call fails; useful for exercising the builder and
/// connect-failure paths without a simulator.
pub struct NoopTransport;

fn noop() -> BoxError {
    Box::new(std::io::Error::other("noop transport"))
}

impl Transport for NoopTransport {
    fn initialize(&self) -> Result<(), BoxError> {
        Err(noop())
    }
    fn terminate(&self) -> Result<(), BoxError> {
        Ok(())
    }
    fn enumerate(&self) -> Result<Vec<DeviceInfo>, BoxError> {
        Err(noop())
    }
    fn open(&self, _index: u32) -> Result<(), BoxError> {
        Err(noop())
    }
    fn close(&self) -> Result<(), BoxError> {
        Ok(())
    }
    fn reset(&self) -> Result<(), BoxError> {
        Err(noop())
    }
    fn set_register(&self, _reg: Register, _value: u32) -> Result<(), BoxError> {
        Err(noop())
    }
    fn get_register(&self, _reg: Register) -> Result<u32, BoxError> {
        Err(noop())
    }
    fn start_capture(&self, _cycles: usize) -> Result<(), BoxError> {
        Err(noop())
    }
    fn poll_capture(&self) -> Result<CaptureState, BoxError> {
        Err(noop())
    }
    fn read_capture(&self, _buf: &mut Vec<u16>) -> Result<(), BoxError> {
        Err(noop())
    }
    fn abort(&self) -> Result<(), BoxError> {
        Ok(())
    }
}
