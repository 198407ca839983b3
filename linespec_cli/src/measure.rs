//! Command implementations: config mapping, device assembly, and acquisition.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use eyre::{Result, WrapErr};
use linespec_core::timing::{compute_pulse_timing, effective_integration_ms, floor_integration_ms};
use linespec_core::{
    AbortHandle, AcquisitionCfg, DeviceCfg, MeasurementOutcome, MeasurementResult,
    PerformanceStats, RecoveryCfg, RecoveryStep, Spectrometer, TerminationReason, Timeouts,
    TimingStatus,
};
use linespec_hardware::{SimConfig, SimulatedTransport};
use serde_json::json;

use crate::cli::{AuxSensor, CliRequest, LAST_REQUEST};

/// A measurement that ended before every requested cycle was accumulated.
#[derive(Debug, thiserror::Error)]
#[error("measurement terminated ({reason}) after {cycles_handled} of {requested_cycles} cycles")]
pub struct MeasurementTerminated {
    pub reason: TerminationReason,
    pub cycles_handled: usize,
    pub requested_cycles: usize,
}

pub fn termination_reason_name(r: TerminationReason) -> &'static str {
    match r {
        TerminationReason::Saturation => "Saturation",
        TerminationReason::InvalidData => "InvalidData",
        TerminationReason::Cancelled => "Cancelled",
    }
}

fn timing_status_name(s: TimingStatus) -> &'static str {
    match s {
        TimingStatus::Exact => "exact",
        TimingStatus::Limited => "limited",
        TimingStatus::Capped => "capped",
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Simulated camera matching the configured device.
///
/// Fault knobs come from `LINESPEC_SIM_*` environment variables so the
/// failure paths can be driven end to end.
pub fn simulator(cfg: &linespec_config::Config) -> Result<SimulatedTransport> {
    let d = &cfg.device;
    let sensor = cfg.sensor_limits()?;
    let sim = SimulatedTransport::new(SimConfig {
        serial: std::env::var("LINESPEC_SIM_SERIAL").unwrap_or_else(|_| d.serial.clone()),
        camera: d.camera.clone(),
        pixel_count: env_parse("LINESPEC_SIM_PIXELS").unwrap_or(d.pixel_count),
        vertical_pixels: d.vertical_pixels,
        clock_mhz: d.clock_mhz,
        it_offset_clk: sensor.it_offset_clk,
        ..SimConfig::default()
    });
    sim.with_faults(|f| {
        f.saturate_at_cycle = env_parse("LINESPEC_SIM_SATURATE_AT");
        f.fail_next_captures = env_parse("LINESPEC_SIM_FAIL_CAPTURES").unwrap_or(0);
        f.unresponsive = env_parse::<u8>("LINESPEC_SIM_UNRESPONSIVE").is_some_and(|v| v != 0);
        if let Some(ms) = env_parse("LINESPEC_SIM_CAPTURE_DELAY_MS") {
            f.capture_delay = Duration::from_millis(ms);
        }
    });
    Ok(sim)
}

/// Map the typed config onto the driver and build it (not yet connected).
pub fn build_spectrometer(
    cfg: &linespec_config::Config,
    transport: SimulatedTransport,
) -> Result<Spectrometer> {
    let device = DeviceCfg::try_from(cfg)?;
    let acquisition: AcquisitionCfg = (&cfg.acquisition).into();
    let recovery: RecoveryCfg = (&cfg.recovery).into();
    let timeouts: Timeouts = (&cfg.timeouts).into();
    Spectrometer::builder()
        .with_transport(transport)
        .with_device(device)
        .with_acquisition(acquisition)
        .with_recovery(recovery)
        .with_timeouts(timeouts)
        .build()
}

/// Connect, run `f`, and always disconnect (freeing the shared interface).
fn with_device<T>(
    cfg: &linespec_config::Config,
    f: impl FnOnce(&mut Spectrometer) -> Result<T>,
) -> Result<T> {
    let mut spec = build_spectrometer(cfg, simulator(cfg)?)?;
    spec.connect()
        .wrap_err_with(|| format!("connect to {} ({})", cfg.device.alias, cfg.device.serial))?;
    if let Some(info) = spec.device_info() {
        tracing::debug!(hw = info.hw_revision, fw = info.fw_revision, "device revisions");
    }
    let out = f(&mut spec);
    if let Err(e) = spec.disconnect(true) {
        tracing::warn!(error = %e, "disconnect failed");
    }
    out
}

/// Fires the abort handle once the Ctrl-C flag is raised; stops on drop.
struct AbortOnShutdown {
    done: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl AbortOnShutdown {
    fn spawn(handle: Option<AbortHandle>, shutdown: Arc<AtomicBool>) -> Self {
        let done = Arc::new(AtomicBool::new(false));
        let join = handle.and_then(|handle| {
            let done = done.clone();
            std::thread::Builder::new()
                .name("linespec-interrupt".into())
                .spawn(move || {
                    while !done.load(Ordering::Acquire) {
                        if shutdown.load(Ordering::Acquire) {
                            tracing::warn!("interrupt received, aborting measurement");
                            let _ = handle.abort(true);
                            return;
                        }
                        std::thread::sleep(Duration::from_millis(20));
                    }
                })
                .ok()
        });
        Self { done, join }
    }
}

impl Drop for AbortOnShutdown {
    fn drop(&mut self) {
        self.done.store(true, Ordering::Release);
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

fn acquire(
    spec: &Spectrometer,
    cycles: usize,
    shutdown: &Arc<AtomicBool>,
) -> linespec_core::Result<MeasurementOutcome> {
    let _guard = AbortOnShutdown::spawn(spec.abort_handle(), shutdown.clone());
    spec.measure(cycles)?;
    spec.wait_for_measurement()
}

fn mean_of(v: &[f64]) -> f64 {
    if v.is_empty() {
        0.0
    } else {
        v.iter().sum::<f64>() / v.len() as f64
    }
}

fn result_json(r: &MeasurementResult, reason: Option<TerminationReason>) -> serde_json::Value {
    let peak = r.mean.iter().copied().fold(f64::NAN, f64::max);
    json!({
        "timestamp": now_unix_ms() as u64,
        "request_id": r.request_id,
        "requested_cycles": r.requested_cycles,
        "cycles_handled": r.cycles_handled,
        "cycles_saturated": r.cycles_saturated,
        "cycles_read": r.cycles_read,
        "integration_time_ms": r.integration_time_ms,
        "duration_ms": r.duration().as_millis() as u64,
        "pixels": r.mean.len(),
        "mean_avg": if r.mean.is_empty() { None } else { Some(mean_of(&r.mean)) },
        "mean_peak": if peak.is_nan() { None } else { Some(peak) },
        "std_avg": if r.sample_std.is_empty() { None } else { Some(mean_of(&r.sample_std)) },
        "termination_reason": reason.map(termination_reason_name),
    })
}

fn stats_json(s: &PerformanceStats) -> serde_json::Value {
    json!({
        "measured_ms": s.measured_ms,
        "handling_ms": s.handling_ms,
        "cdt_mean_ms": s.cdt_mean_ms,
        "cdt_median_ms": s.cdt_median_ms,
        "packs": s.packs,
    })
}

/// Print throughput stats to stderr.
fn print_stats(s: &PerformanceStats) {
    eprintln!("\n--- Acquisition Stats ---");
    eprintln!("Packs: {}", s.packs);
    eprintln!("Measured (ms): {:.2}", s.measured_ms);
    eprintln!("Handling (ms): {:.2}", s.handling_ms);
    eprintln!(
        "Cycle delay mean/median (ms): {:.3} / {:.3}",
        s.cdt_mean_ms, s.cdt_median_ms
    );
    eprintln!("-------------------------\n");
}

fn write_spectrum(path: &Path, r: &MeasurementResult) -> Result<()> {
    let doc = json!({
        "integration_time_ms": r.integration_time_ms,
        "cycles": r.cycles_handled,
        "mean": r.mean,
        "std": r.sample_std,
        "line_rms": r.noise_line_fit_rms,
    });
    std::fs::write(path, doc.to_string())
        .wrap_err_with(|| format!("write spectrum to {}", path.display()))
}

pub struct MeasureArgs<'a> {
    pub cycles: usize,
    pub it_ms: Option<f64>,
    pub output: Option<&'a Path>,
    pub recover: bool,
    pub stats: bool,
    pub json: bool,
}

pub fn run_measure(
    cfg: &linespec_config::Config,
    args: &MeasureArgs<'_>,
    shutdown: &Arc<AtomicBool>,
) -> Result<()> {
    with_device(cfg, |spec| {
        if let Some(it) = args.it_ms {
            let status = spec.set_integration_time(it)?;
            tracing::info!(requested_ms = it, status = timing_status_name(status), "integration time set");
        }
        let _ = LAST_REQUEST.set(CliRequest {
            cycles: args.cycles,
            it_ms: spec.integration_time_ms().unwrap_or_default(),
            cycle_timeout_ms: cfg.acquisition.cycle_timeout_ms,
        });

        let outcome = match acquire(spec, args.cycles, shutdown) {
            Ok(o) => o,
            Err(e) if args.recover && e.is_recoverable() => {
                tracing::warn!(error = %e, "measurement failed, running recovery");
                let report = spec.recover(false)?;
                tracing::info!(step = ?report.step, "device recovered, retrying");
                acquire(spec, args.cycles, shutdown)?
            }
            Err(e) => return Err(e.into()),
        };

        let reason = match &outcome {
            MeasurementOutcome::Complete(_) => None,
            MeasurementOutcome::Terminated { reason, .. } => Some(*reason),
        };
        let r = outcome.result();
        let perf = PerformanceStats::from_result(r);

        if args.json {
            let mut line = result_json(r, reason);
            if args.stats {
                line["stats"] = stats_json(&perf);
            }
            println!("{line}");
        } else {
            match reason {
                None => println!(
                    "measurement complete: {} cycles at {:.4} ms in {} ms",
                    r.cycles_handled,
                    r.integration_time_ms,
                    r.duration().as_millis()
                ),
                Some(why) => println!(
                    "measurement terminated ({why}): {} of {} cycles at {:.4} ms",
                    r.cycles_handled, r.requested_cycles, r.integration_time_ms
                ),
            }
            if !r.mean.is_empty() {
                println!(
                    "mean avg {:.1}, std avg {:.2}, saturated cycles {}",
                    mean_of(&r.mean),
                    mean_of(&r.sample_std),
                    r.cycles_saturated
                );
            }
            if args.stats {
                print_stats(&perf);
            }
        }

        if let Some(path) = args.output
            && !r.mean.is_empty()
        {
            write_spectrum(path, r)?;
        }

        match reason {
            None => Ok(()),
            Some(reason) => Err(MeasurementTerminated {
                reason,
                cycles_handled: r.cycles_handled,
                requested_cycles: r.requested_cycles,
            }
            .into()),
        }
    })
}

/// Show the registers an integration time maps to. Needs no device.
pub fn run_timing(cfg: &linespec_config::Config, it_ms: f64, json: bool) -> Result<()> {
    let dev = DeviceCfg::try_from(cfg)?;
    let (status, t) = compute_pulse_timing(it_ms, dev.clock_mhz, &dev.camera, &dev.sensor);
    let effective = effective_integration_ms(t.high, dev.clock_mhz, &dev.sensor);
    let floor = floor_integration_ms(dev.clock_mhz, &dev.camera, &dev.sensor);
    if json {
        println!(
            "{}",
            json!({
                "it_ms": it_ms,
                "status": timing_status_name(status),
                "high": t.high,
                "low": t.low,
                "line": t.line,
                "effective_it_ms": effective,
                "floor_it_ms": floor,
            })
        );
    } else {
        println!("status: {}", timing_status_name(status));
        println!("start pulse high/low (clk): {} / {}", t.high, t.low);
        println!("line period (clk): {}", t.line);
        println!("effective integration (ms): {effective:.4}");
        println!("hardware floor (ms): {floor:.4}");
    }
    Ok(())
}

pub fn run_sensor(cfg: &linespec_config::Config, name: AuxSensor, json: bool) -> Result<()> {
    with_device(cfg, |spec| {
        let value = spec.read_aux_sensor(name.register_name())?;
        if json {
            println!(
                "{}",
                json!({ "sensor": name.register_name(), "celsius": value })
            );
        } else {
            match value {
                Some(c) => println!("{}: {c:.2} C", name.register_name()),
                None => println!("{}: no sensor", name.register_name()),
            }
        }
        Ok(())
    })
}

pub fn run_recover(cfg: &linespec_config::Config, json: bool) -> Result<()> {
    with_device(cfg, |spec| {
        let report = spec.recover(false)?;
        let (step, attempt) = match report.step {
            RecoveryStep::Soft => ("soft", None),
            RecoveryStep::Hard { attempt } => ("hard", Some(attempt)),
        };
        if json {
            println!("{}", json!({ "step": step, "attempt": attempt }));
        } else if let Some(n) = attempt {
            println!("recovered: hard reset (attempt {n})");
        } else {
            println!("recovered: soft");
        }
        Ok(())
    })
}

/// Sweep integration time x cycle count and report cycle delay times.
pub fn run_perf(
    cfg: &linespec_config::Config,
    repeat: usize,
    json: bool,
    shutdown: &Arc<AtomicBool>,
) -> Result<()> {
    let repeat = repeat.max(1);
    with_device(cfg, |spec| {
        if !json {
            println!(
                "{:>10} {:>8} {:>12} {:>12} {:>12}",
                "it_ms", "cycles", "measured_ms", "cdt_mean", "cdt_median"
            );
        }
        for &it in &cfg.performance.it_ms_list {
            spec.set_integration_time(it)?;
            for &cycles in &cfg.performance.cycles_list {
                for _ in 0..repeat {
                    if shutdown.load(Ordering::Acquire) {
                        return Err(MeasurementTerminated {
                            reason: TerminationReason::Cancelled,
                            cycles_handled: 0,
                            requested_cycles: cycles,
                        }
                        .into());
                    }
                    let outcome = acquire(spec, cycles, shutdown)?;
                    let r = outcome.result();
                    let s = PerformanceStats::from_result(r);
                    if json {
                        let mut line = stats_json(&s);
                        line["it_ms"] = json!(r.integration_time_ms);
                        line["cycles"] = json!(r.cycles_handled);
                        println!("{line}");
                    } else {
                        println!(
                            "{:>10.4} {:>8} {:>12.2} {:>12.4} {:>12.4}",
                            r.integration_time_ms,
                            r.cycles_handled,
                            s.measured_ms,
                            s.cdt_mean_ms,
                            s.cdt_median_ms
                        );
                    }
                }
            }
        }
        Ok(())
    })
}

pub fn run_self_check(cfg: &linespec_config::Config, shutdown: &Arc<AtomicBool>) -> Result<()> {
    with_device(cfg, |spec| {
        let temp = spec.read_aux_sensor("detector")?;
        let outcome = acquire(spec, 1, shutdown)?;
        if !outcome.is_complete() {
            eyre::bail!("self-check measurement did not complete");
        }
        match temp {
            Some(c) => tracing::info!(detector_c = c, "detector temperature"),
            None => tracing::info!("no detector temperature sensor"),
        }
        println!("OK");
        Ok(())
    })
}
