#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Acquisition driver for a line-sensor spectrometer (hardware-agnostic).
//!
//! All device access goes through `linespec_traits::Transport`; the vendor
//! library and the simulator live behind that trait.
//!
//! ## Architecture
//!
//! - **Timing**: integration time to start-pulse/line registers (`timing`)
//! - **Packing**: cycle count to capture-call decomposition (`packer`)
//! - **Pipeline**: capture and reduction threads joined by a bounded channel (`pipeline`)
//! - **Statistics**: per-cycle validation and streaming reduction (`stats`)
//! - **Recovery**: soft/hard ladder with injectable delays (`recovery`)
//! - **Driver**: `Spectrometer` and its public operations (`driver`, `builder`)
//!
//! ## Example
//!
//! ```no_run
//! use linespec_core::{DeviceCfg, Spectrometer};
//! # fn transport() -> linespec_core::mocks::NoopTransport { linespec_core::mocks::NoopTransport }
//!
//! let mut spec = Spectrometer::builder()
//!     .with_transport(transport())
//!     .with_device(DeviceCfg { serial: "SIM0001".into(), ..DeviceCfg::default() })
//!     .build()?;
//! spec.connect()?;
//! spec.set_integration_time(10.0)?;
//! spec.measure(20)?;
//! let outcome = spec.wait_for_measurement()?;
//! println!("{} cycles", outcome.result().cycles_handled);
//! # Ok::<(), eyre::Report>(())
//! ```

pub mod builder;
pub mod config;
pub mod conversions;
pub mod driver;
pub mod error;
pub mod hw_error;
pub mod interface;
pub mod mocks;
pub mod packer;
pub mod perf;
pub mod pipeline;
pub mod recovery;
pub mod stats;
pub mod status;
pub mod timing;
pub mod util;

pub use builder::{BuildResult, Missing, Set, SpectrometerBuilder};
pub use config::{AcquisitionCfg, DeviceCfg, Gain, RecoveryCfg, Timeouts};
pub use driver::{AbortHandle, Acquisition, DeviceSession, Spectrometer};
pub use error::{BuildError, Report, Result, SpecError, TerminationReason};
pub use interface::SharedInterface;
pub use packer::{CapturePack, pack_summary, split_cycles};
pub use perf::PerformanceStats;
pub use recovery::{RecoveryReport, RecoveryStep};
pub use stats::{Accumulator, Reduction, Scaling};
pub use status::{AcquisitionState, MeasurementOutcome, MeasurementResult};
pub use timing::{CameraLimits, PulseTiming, SensorLimits, TimingStatus};
