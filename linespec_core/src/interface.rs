//! Host-wide vendor interface shared by every device session.
//!
//! The vendor library is initialized once per host and enumerates all
//! cameras at once. Sessions hold a reference-counted lease on it; the
//! device list is cached so reconnects do not re-enumerate.

use std::sync::{Arc, Mutex, MutexGuard};

use linespec_traits::{DeviceInfo, Transport};

use crate::error::{Result, SpecError};
use crate::hw_error::map_boxed;

#[derive(Debug, Default)]
struct InterfaceState {
    initialized: bool,
    users: usize,
    devices: Option<Vec<DeviceInfo>>,
}

/// Explicit context replacing any process-wide device table.
#[derive(Debug, Default)]
pub struct SharedInterface {
    state: Mutex<InterfaceState>,
}

impl SharedInterface {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sessions currently holding the interface.
    pub fn users(&self) -> usize {
        self.lock().map(|s| s.users).unwrap_or(0)
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().map(|s| s.initialized).unwrap_or(false)
    }

    fn lock(&self) -> Result<MutexGuard<'_, InterfaceState>> {
        self.state
            .lock()
            .map_err(|_| SpecError::State("shared interface lock poisoned".into()))
    }

    /// Take a lease, initializing the vendor library on first use.
    pub(crate) fn acquire(&self, transport: &dyn Transport) -> Result<()> {
        let mut st = self.lock()?;
        if !st.initialized {
            transport.initialize().map_err(map_boxed)?;
            st.initialized = true;
            tracing::debug!("vendor interface initialized");
        }
        st.users += 1;
        Ok(())
    }

    /// Find a device by serial number, enumerating at most twice (cached list,
    /// then a fresh one).
    pub(crate) fn find_device(&self, transport: &dyn Transport, serial: &str) -> Result<DeviceInfo> {
        let mut st = self.lock()?;
        if let Some(found) = st
            .devices
            .as_ref()
            .and_then(|d| d.iter().find(|i| i.serial == serial))
        {
            return Ok(found.clone());
        }
        let devices = transport.enumerate().map_err(map_boxed)?;
        tracing::debug!(count = devices.len(), "enumerated devices");
        let found = devices.iter().find(|i| i.serial == serial).cloned();
        st.devices = Some(devices);
        found.ok_or_else(|| SpecError::Config(format!("no device with serial number {serial}")))
    }

    /// Drop a lease. The vendor library is terminated only when `free` is set
    /// and no other session holds it. Returns whether it was terminated.
    pub(crate) fn release(&self, transport: &dyn Transport, free: bool) -> Result<bool> {
        let mut st = self.lock()?;
        st.users = st.users.saturating_sub(1);
        if free && st.users == 0 && st.initialized {
            transport.terminate().map_err(map_boxed)?;
            st.initialized = false;
            st.devices = None;
            tracing::debug!("vendor interface terminated");
            return Ok(true);
        }
        Ok(false)
    }
}
