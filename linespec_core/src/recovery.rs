//! Soft/hard recovery ladder for a device that stopped responding.
//!
//! Soft recovery aborts and re-asserts the last good integration time. Hard
//! recovery releases the device, optionally pulses the vendor reset, and
//! reopens it from scratch. All delays go through the injected `Clock`.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use linespec_traits::Clock;

use crate::config::RecoveryCfg;
use crate::error::{Result, SpecError};

/// No recovery in progress or needed.
pub const LEVEL_HEALTHY: u8 = 0;
/// Soft recovery in progress or last used.
pub const LEVEL_SOFT: u8 = 1;
/// Hard recovery in progress or last used.
pub const LEVEL_HARD: u8 = 2;

/// Which rung of the ladder restored the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStep {
    Soft,
    Hard { attempt: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub step: RecoveryStep,
}

/// Device operations the ladder is built from.
pub trait Recoverable {
    /// Transport abort with errors surfaced.
    fn abort_strict(&mut self) -> Result<()>;
    /// Program the last known good integration time again.
    fn reassert_integration(&mut self) -> Result<()>;
    /// Close the device and drop the interface lease. With `free` set the
    /// interface is terminated when nobody else holds it.
    fn release_device(&mut self, free: bool) -> Result<()>;
    fn acquire_interface(&mut self) -> Result<()>;
    fn hardware_reset(&mut self) -> Result<()>;
    /// Discovery, open, geometry check and settings, with the lease held.
    fn reopen_device(&mut self) -> Result<()>;
}

fn soft<R: Recoverable + ?Sized>(target: &mut R, cfg: &RecoveryCfg, clock: &dyn Clock) -> Result<()> {
    target.abort_strict()?;
    clock.sleep(Duration::from_millis(cfg.abort_settle_ms));
    target.reassert_integration()?;
    clock.sleep(Duration::from_millis(cfg.settle_ms));
    Ok(())
}

fn hard_once<R: Recoverable + ?Sized>(
    target: &mut R,
    cfg: &RecoveryCfg,
    clock: &dyn Clock,
    free: bool,
) -> Result<()> {
    if let Err(e) = target.release_device(free) {
        tracing::debug!(error = %e, "release before reconnect failed (ignored)");
    }
    clock.sleep(Duration::from_millis(cfg.reconnect_settle_ms));
    target.acquire_interface()?;
    if cfg.hardware_reset {
        target.hardware_reset()?;
        clock.sleep(Duration::from_millis(cfg.reset_settle_ms));
    }
    target.reopen_device()
}

/// Walk the ladder until the device responds again.
///
/// `level` is set to the rung in progress and back to healthy on success.
/// `free_shared_interface` applies to the first hard attempt only; later
/// attempts keep the interface up. Exhausting every hard attempt returns
/// `CommunicationLoss`.
pub fn run_ladder<R: Recoverable + ?Sized>(
    target: &mut R,
    cfg: &RecoveryCfg,
    clock: &dyn Clock,
    level: &AtomicU8,
    alias: &str,
    free_shared_interface: bool,
) -> Result<RecoveryReport> {
    if cfg.soft_enabled {
        level.store(LEVEL_SOFT, Ordering::Release);
        tracing::info!(alias, "soft recovery");
        match soft(target, cfg, clock) {
            Ok(()) => {
                level.store(LEVEL_HEALTHY, Ordering::Release);
                tracing::info!(alias, "soft recovery succeeded");
                return Ok(RecoveryReport {
                    step: RecoveryStep::Soft,
                });
            }
            Err(e) => tracing::warn!(alias, error = %e, "soft recovery failed"),
        }
    }

    level.store(LEVEL_HARD, Ordering::Release);
    let attempts = cfg.hard_attempts.max(1);
    let mut last = SpecError::CommunicationLoss("no hard recovery attempted".into());
    for attempt in 1..=attempts {
        tracing::info!(alias, attempt, attempts, "hard recovery attempt");
        match hard_once(target, cfg, clock, free_shared_interface && attempt == 1) {
            Ok(()) => {
                level.store(LEVEL_HEALTHY, Ordering::Release);
                tracing::info!(alias, attempt, "hard recovery succeeded");
                return Ok(RecoveryReport {
                    step: RecoveryStep::Hard { attempt },
                });
            }
            Err(e) => {
                tracing::warn!(alias, attempt, error = %e, "hard recovery attempt failed");
                last = e;
                if attempt < attempts {
                    clock.sleep(Duration::from_millis(
                        cfg.retry_delay_ms.saturating_mul(u64::from(attempt)),
                    ));
                }
            }
        }
    }
    tracing::error!(alias, attempts, error = %last, "device did not recover");
    Err(SpecError::CommunicationLoss(format!(
        "device did not recover after {attempts} hard attempts: {last}"
    )))
}
