//! Two-stage acquisition pipeline.
//!
//! A capture thread owns all capture calls on the transport and pushes owned
//! copies of each pack through a bounded channel; a reduction thread owns
//! the accumulator, validates and folds cycles in order, and publishes the
//! result. Both threads live from connect to disconnect and are joined when
//! the `Pipeline` is shut down or dropped.
//!
//! Every request gets an increasing id. Cancellation is a watermark (the
//! highest cancelled id); completion is recorded once per id by the
//! reduction thread behind a mutex + condvar.
use crossbeam_channel as xch;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use linespec_traits::Transport;

use crate::config::{AcquisitionCfg, DeviceCfg};
use crate::error::{Result, SpecError, TerminationReason};
use crate::hw_error::map_boxed;
use crate::packer::{CapturePack, pack_summary, split_cycles};
use crate::stats::{Accumulator, CyclePolicy, CycleVerdict, Scaling, check_cycle};
use crate::status::{AcquisitionState, MeasurementOutcome, MeasurementResult};
use crate::util::{self, WaitOutcome};

/// Parameters of one queued measurement.
#[derive(Debug, Clone, Copy)]
struct MeasureRequest {
    id: u64,
    cycles: usize,
    it_ms: f64,
    line_ms: f64,
}

enum Request {
    Measure(MeasureRequest),
    Shutdown,
}

/// One capture call's samples, owned by the reduction side.
#[derive(Debug)]
pub struct RawPack {
    pub request_id: u64,
    pub index: usize,
    pub cycles: usize,
    pub arrival: Instant,
    pub samples: Vec<u16>,
}

#[derive(Debug)]
enum CaptureOutcome {
    Captured,
    Cancelled,
    Failed(SpecError),
}

enum Handoff {
    Begin {
        id: u64,
        cycles: usize,
        it_ms: f64,
        started_at: Instant,
    },
    Pack(RawPack),
    End {
        id: u64,
        outcome: CaptureOutcome,
    },
    Shutdown,
}

#[derive(Default)]
struct Completion {
    completed_id: u64,
    status: Option<Result<MeasurementOutcome>>,
    last_result: Option<Arc<MeasurementResult>>,
}

/// State shared between the caller and both worker threads.
pub(crate) struct Shared {
    submitted: AtomicU64,
    cancel_upto: AtomicU64,
    completed: AtomicU64,
    pub(crate) recovery_level: AtomicU8,
    state: Mutex<AcquisitionState>,
    completion: Mutex<Completion>,
    done: Condvar,
}

impl Shared {
    fn new() -> Self {
        Self {
            submitted: AtomicU64::new(0),
            cancel_upto: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            recovery_level: AtomicU8::new(0),
            state: Mutex::new(AcquisitionState::Idle),
            completion: Mutex::new(Completion::default()),
            done: Condvar::new(),
        }
    }

    #[inline]
    fn is_cancelled(&self, id: u64) -> bool {
        self.cancel_upto.load(Ordering::Acquire) >= id
    }

    /// Cancel request `id` and everything queued before it.
    #[inline]
    fn cancel_through(&self, id: u64) {
        self.cancel_upto.fetch_max(id, Ordering::AcqRel);
    }

    /// Cancel the in-flight request and everything queued.
    pub(crate) fn cancel_all(&self) {
        self.cancel_through(self.submitted.load(Ordering::Acquire));
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.completed.load(Ordering::Acquire) < self.submitted.load(Ordering::Acquire)
    }

    fn set_state(&self, s: AcquisitionState) {
        if let Ok(mut g) = self.state.lock() {
            *g = s;
        }
    }

    /// Progress update that never overwrites a terminal state of `id`.
    fn set_progress(&self, id: u64, s: AcquisitionState) {
        if self.completed.load(Ordering::Acquire) < id && !self.is_cancelled(id) {
            self.set_state(s);
        }
    }

    pub(crate) fn state(&self) -> AcquisitionState {
        self.state
            .lock()
            .map(|g| *g)
            .unwrap_or(AcquisitionState::Failed)
    }

    pub(crate) fn last_result(&self) -> Option<Arc<MeasurementResult>> {
        self.completion
            .lock()
            .ok()
            .and_then(|c| c.last_result.clone())
    }

    /// Record the terminal status of `id`. Later calls for the same id are ignored.
    fn complete(&self, id: u64, status: Result<MeasurementOutcome>) {
        self.complete_with_partial(id, status, None);
    }

    /// Like `complete`; a failed request with `partial` still publishes the
    /// cycles it handled as the last result.
    fn complete_with_partial(
        &self,
        id: u64,
        status: Result<MeasurementOutcome>,
        partial: Option<Arc<MeasurementResult>>,
    ) {
        let Ok(mut c) = self.completion.lock() else {
            return;
        };
        if id <= c.completed_id {
            tracing::warn!(request = id, "completion already signalled, ignoring");
            return;
        }
        let state = match &status {
            Ok(MeasurementOutcome::Complete(_)) => AcquisitionState::Complete,
            Ok(MeasurementOutcome::Terminated { reason, .. }) => {
                AcquisitionState::Terminated(*reason)
            }
            Err(_) => AcquisitionState::Failed,
        };
        match &status {
            Ok(o) => c.last_result = Some(o.result().clone()),
            Err(_) => {
                if let Some(p) = partial {
                    c.last_result = Some(p);
                }
            }
        }
        c.completed_id = id;
        c.status = Some(status);
        self.completed.store(id, Ordering::Release);
        self.set_state(state);
        self.done.notify_all();
    }
}

/// Capture and reduction threads plus their channels.
pub struct Pipeline {
    requests: xch::Sender<Request>,
    handoff: xch::Sender<Handoff>,
    pub(crate) shared: Arc<Shared>,
    capture: Option<JoinHandle<()>>,
    reduction: Option<JoinHandle<()>>,
}

impl Pipeline {
    pub fn spawn(transport: Arc<dyn Transport>, device: &DeviceCfg, acq: &AcquisitionCfg) -> Self {
        let (req_tx, req_rx) = xch::unbounded();
        let (pack_tx, pack_rx) = xch::bounded(acq.handoff_depth.max(1));
        let shared = Arc::new(Shared::new());

        let capture_ctx = CaptureCtx {
            transport,
            samples_per_cycle: device.samples_per_cycle(),
            acq: acq.clone(),
            alias: device.alias.clone(),
        };
        let capture_shared = shared.clone();
        let capture_tx = pack_tx.clone();
        let capture = std::thread::spawn(move || {
            capture_loop(&capture_ctx, &req_rx, &capture_tx, &capture_shared);
        });

        let reduce_ctx = ReduceCtx {
            samples_per_cycle: device.samples_per_cycle(),
            scaling: device.scaling,
            policy: CyclePolicy {
                saturation_limit: device.effective_saturation_limit(),
                abort_on_saturation: acq.abort_on_saturation,
            },
            alias: device.alias.clone(),
        };
        let reduce_shared = shared.clone();
        let reduction = std::thread::spawn(move || {
            reduction_loop(&reduce_ctx, &pack_rx, &reduce_shared);
        });

        Self {
            requests: req_tx,
            handoff: pack_tx,
            shared,
            capture: Some(capture),
            reduction: Some(reduction),
        }
    }

    /// Queue a measurement and return its id without waiting.
    pub fn submit(&self, cycles: usize, it_ms: f64, line_ms: f64) -> Result<u64> {
        let id = self.shared.submitted.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.set_state(AcquisitionState::Requested);
        let req = MeasureRequest {
            id,
            cycles,
            it_ms,
            line_ms,
        };
        if self.requests.send(Request::Measure(req)).is_err() {
            let err = SpecError::State("capture loop is not running".into());
            self.shared.complete(id, Err(err.clone()));
            return Err(err);
        }
        tracing::debug!(request = id, cycles, "measurement queued");
        Ok(id)
    }

    /// Cancel the in-flight request and everything queued.
    pub fn cancel_all(&self) {
        self.shared.cancel_all();
    }

    /// True while any submitted request has not completed.
    pub fn is_busy(&self) -> bool {
        self.shared.is_busy()
    }

    /// Block until the most recently submitted request completes.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<MeasurementOutcome> {
        let target = self.shared.submitted.load(Ordering::Acquire);
        if target == 0 {
            return Err(SpecError::State("no measurement has been requested".into()));
        }
        let guard = self
            .shared
            .completion
            .lock()
            .map_err(|_| SpecError::State("completion lock poisoned".into()))?;
        let pending = |c: &mut Completion| c.completed_id < target;
        let guard = match timeout {
            Some(d) => {
                let (g, res) = self
                    .shared
                    .done
                    .wait_timeout_while(guard, d, pending)
                    .map_err(|_| SpecError::State("completion lock poisoned".into()))?;
                if res.timed_out() {
                    return Err(SpecError::Timeout);
                }
                g
            }
            None => self
                .shared
                .done
                .wait_while(guard, pending)
                .map_err(|_| SpecError::State("completion lock poisoned".into()))?,
        };
        guard
            .status
            .clone()
            .unwrap_or_else(|| Err(SpecError::State("no measurement status recorded".into())))
    }

    /// Push the shutdown sentinel through both channels and join both threads.
    pub fn shutdown(&mut self) {
        let _ = self.requests.send(Request::Shutdown);
        let _ = self.handoff.send(Handoff::Shutdown);
        for (name, handle) in [
            ("capture", self.capture.take()),
            ("reduction", self.reduction.take()),
        ] {
            if let Some(h) = handle {
                match h.join() {
                    Ok(()) => tracing::trace!(thread = name, "worker joined"),
                    Err(e) => tracing::warn!(thread = name, ?e, "worker panicked during shutdown"),
                }
            }
        }
        if self.shared.is_busy() {
            let last = self.shared.submitted.load(Ordering::Acquire);
            self.shared
                .complete(last, Err(SpecError::State("session shut down".into())));
        }
    }

    pub fn is_running(&self) -> bool {
        self.capture.is_some() && self.reduction.is_some()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.cancel_all();
        self.shutdown();
    }
}

// ── Capture side ─────────────────────────────────────────────────────────────

struct CaptureCtx {
    transport: Arc<dyn Transport>,
    samples_per_cycle: usize,
    acq: AcquisitionCfg,
    alias: String,
}

/// Reduction side has gone away.
struct Closed;

fn capture_loop(
    ctx: &CaptureCtx,
    requests: &xch::Receiver<Request>,
    handoff: &xch::Sender<Handoff>,
    shared: &Shared,
) {
    while let Ok(Request::Measure(req)) = requests.recv() {
        let begin = Handoff::Begin {
            id: req.id,
            cycles: req.cycles,
            it_ms: req.it_ms,
            started_at: Instant::now(),
        };
        if handoff.send(begin).is_err() {
            tracing::debug!(alias = %ctx.alias, "reduction side disconnected, exiting capture loop");
            break;
        }
        let outcome = match run_request(ctx, &req, handoff, shared) {
            Ok(o) => o,
            Err(Closed) => {
                tracing::debug!(alias = %ctx.alias, "reduction side disconnected, exiting capture loop");
                break;
            }
        };
        if handoff
            .send(Handoff::End {
                id: req.id,
                outcome,
            })
            .is_err()
        {
            break;
        }
    }
    tracing::trace!(alias = %ctx.alias, "capture loop exiting cleanly");
}

fn run_request(
    ctx: &CaptureCtx,
    req: &MeasureRequest,
    handoff: &xch::Sender<Handoff>,
    shared: &Shared,
) -> std::result::Result<CaptureOutcome, Closed> {
    let packs = split_cycles(req.cycles, ctx.acq.max_cycles_per_call);
    tracing::debug!(
        alias = %ctx.alias,
        request = req.id,
        cycles = req.cycles,
        it_ms = req.it_ms,
        packs = %pack_summary(&packs),
        "measurement started"
    );
    if let Err(e) = ctx.transport.abort() {
        tracing::debug!(alias = %ctx.alias, error = %e, "pre-measurement abort failed (ignored)");
    }
    let poll = util::poll_interval(req.it_ms, ctx.acq.polls_per_it);
    let attempts = ctx.acq.retries_per_pack.max(1);

    for pack in &packs {
        if shared.is_cancelled(req.id) {
            tracing::debug!(request = req.id, pack = pack.index, "cancelled before pack");
            return Ok(CaptureOutcome::Cancelled);
        }
        shared.set_progress(req.id, AcquisitionState::Capturing { pack: pack.index });

        let mut attempt = 0;
        let samples = loop {
            attempt += 1;
            match capture_pack(ctx, req, pack, poll, shared) {
                Ok(Some(samples)) => break samples,
                Ok(None) => return Ok(CaptureOutcome::Cancelled),
                Err(e) if shared.is_cancelled(req.id) => {
                    tracing::debug!(request = req.id, pack = pack.index, error = %e, "capture ended by cancellation");
                    return Ok(CaptureOutcome::Cancelled);
                }
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        alias = %ctx.alias,
                        request = req.id,
                        pack = pack.index,
                        attempt,
                        error = %e,
                        "capture failed, retrying"
                    );
                    if let Err(e) = ctx.transport.abort() {
                        tracing::debug!(error = %e, "abort before retry failed (ignored)");
                    }
                }
                Err(e) => {
                    tracing::error!(
                        alias = %ctx.alias,
                        request = req.id,
                        pack = pack.index,
                        attempts,
                        error = %e,
                        "capture failed on every attempt"
                    );
                    return Ok(CaptureOutcome::Failed(e));
                }
            }
        };

        let raw = RawPack {
            request_id: req.id,
            index: pack.index,
            cycles: pack.cycles,
            arrival: Instant::now(),
            samples,
        };
        handoff.send(Handoff::Pack(raw)).map_err(|_| Closed)?;
    }
    Ok(CaptureOutcome::Captured)
}

/// One start + poll + read sequence. `Ok(None)` means cancelled.
fn capture_pack(
    ctx: &CaptureCtx,
    req: &MeasureRequest,
    pack: &CapturePack,
    poll: Duration,
    shared: &Shared,
) -> Result<Option<Vec<u16>>> {
    let t = ctx.transport.as_ref();
    t.start_capture(pack.cycles).map_err(map_boxed)?;
    let timeout = util::pack_timeout(pack.cycles, req.line_ms, ctx.acq.cycle_timeout_ms);
    let outcome = util::wait_for_capture(
        || t.poll_capture().map_err(map_boxed),
        || shared.is_cancelled(req.id),
        timeout,
        poll,
    )?;
    if outcome == WaitOutcome::Cancelled {
        if let Err(e) = t.abort() {
            tracing::debug!(error = %e, "abort after cancellation failed (ignored)");
        }
        return Ok(None);
    }
    let expected = pack.cycles * ctx.samples_per_cycle;
    let mut samples = Vec::with_capacity(expected);
    t.read_capture(&mut samples).map_err(map_boxed)?;
    if samples.len() != expected {
        return Err(SpecError::DataIntegrity(format!(
            "pack {} returned {} samples, expected {expected}",
            pack.index,
            samples.len()
        )));
    }
    Ok(Some(samples))
}

// ── Reduction side ───────────────────────────────────────────────────────────

struct ReduceCtx {
    samples_per_cycle: usize,
    scaling: Scaling,
    policy: CyclePolicy,
    alias: String,
}

/// Bookkeeping for the request currently being reduced.
struct Active {
    id: u64,
    requested: usize,
    it_ms: f64,
    started_at: Instant,
    cycles_read: usize,
    pack_sizes: Vec<usize>,
    pack_arrivals: Vec<Instant>,
    open: bool,
}

impl Active {
    fn reduce(&mut self, acc: &Accumulator) -> Arc<MeasurementResult> {
        let red = acc.reduce();
        self.open = false;
        Arc::new(MeasurementResult {
            request_id: self.id,
            requested_cycles: self.requested,
            mean: red.mean,
            sample_std: red.std,
            noise_line_fit_rms: red.line_rms,
            cycles_handled: acc.cycles_handled(),
            cycles_saturated: acc.cycles_saturated(),
            cycles_read: self.cycles_read,
            integration_time_ms: self.it_ms,
            started_at: self.started_at,
            ended_at: self.pack_arrivals.last().copied().unwrap_or(self.started_at),
            handled_at: Instant::now(),
            pack_sizes: std::mem::take(&mut self.pack_sizes),
            pack_arrivals: std::mem::take(&mut self.pack_arrivals),
        })
    }

    fn finish(
        &mut self,
        acc: &Accumulator,
        shared: &Shared,
        reason: Option<TerminationReason>,
    ) {
        let result = self.reduce(acc);
        let outcome = match reason {
            None => {
                shared.recovery_level.store(0, Ordering::Release);
                tracing::debug!(request = self.id, cycles = result.cycles_handled, "measurement complete");
                MeasurementOutcome::Complete(result)
            }
            Some(reason) => {
                tracing::debug!(
                    request = self.id,
                    %reason,
                    handled = result.cycles_handled,
                    requested = self.requested,
                    "measurement terminated early"
                );
                MeasurementOutcome::Terminated { reason, result }
            }
        };
        shared.complete(self.id, Ok(outcome));
    }

    /// Fail the request, keeping whatever was reduced before the failure.
    fn fail(&mut self, acc: &Accumulator, shared: &Shared, err: SpecError) {
        let partial = self.reduce(acc);
        tracing::debug!(
            request = self.id,
            handled = partial.cycles_handled,
            requested = self.requested,
            "measurement failed"
        );
        shared.complete_with_partial(self.id, Err(err), Some(partial));
    }
}

fn reduction_loop(ctx: &ReduceCtx, rx: &xch::Receiver<Handoff>, shared: &Shared) {
    let mut acc = Accumulator::new(ctx.samples_per_cycle);
    let mut active: Option<Active> = None;
    let mut scaled = Vec::with_capacity(ctx.samples_per_cycle);

    while let Ok(msg) = rx.recv() {
        match msg {
            Handoff::Shutdown => {
                tracing::debug!(alias = %ctx.alias, "reduction loop received shutdown");
                break;
            }
            Handoff::Begin {
                id,
                cycles,
                it_ms,
                started_at,
            } => {
                acc.reset(ctx.samples_per_cycle);
                active = Some(Active {
                    id,
                    requested: cycles,
                    it_ms,
                    started_at,
                    cycles_read: 0,
                    pack_sizes: Vec::new(),
                    pack_arrivals: Vec::new(),
                    open: true,
                });
            }
            Handoff::Pack(pack) => {
                let Some(a) = active
                    .as_mut()
                    .filter(|a| a.open && a.id == pack.request_id)
                else {
                    tracing::trace!(request = pack.request_id, pack = pack.index, "discarding pack");
                    continue;
                };
                shared.set_progress(a.id, AcquisitionState::Handling { pack: pack.index });
                a.pack_sizes.push(pack.cycles);
                a.pack_arrivals.push(pack.arrival);
                handle_pack(ctx, a, &pack, &mut acc, &mut scaled, shared);
            }
            Handoff::End { id, outcome } => {
                let Some(a) = active.as_mut().filter(|a| a.open && a.id == id) else {
                    continue;
                };
                match outcome {
                    CaptureOutcome::Cancelled => {
                        a.finish(&acc, shared, Some(TerminationReason::Cancelled));
                    }
                    CaptureOutcome::Failed(e) => a.fail(&acc, shared, e),
                    CaptureOutcome::Captured => {
                        let msg = format!(
                            "capture ended after {} of {} cycles",
                            acc.cycles_handled(),
                            a.requested
                        );
                        tracing::warn!(request = id, "{msg}");
                        a.fail(&acc, shared, SpecError::DataIntegrity(msg));
                    }
                }
            }
        }
    }
    tracing::trace!(alias = %ctx.alias, "reduction loop exiting cleanly");
}

fn handle_pack(
    ctx: &ReduceCtx,
    a: &mut Active,
    pack: &RawPack,
    acc: &mut Accumulator,
    scaled: &mut Vec<f64>,
    shared: &Shared,
) {
    for cycle in pack.samples.chunks_exact(ctx.samples_per_cycle.max(1)) {
        a.cycles_read += 1;
        ctx.scaling.apply(cycle, scaled);
        let check = check_cycle(scaled, ctx.policy.saturation_limit);
        match ctx.policy.judge(&check) {
            CycleVerdict::Accumulate { saturated } => {
                acc.add_cycle(a.cycles_read, scaled, saturated);
                tracing::trace!(request = a.id, cycle = a.cycles_read, max = check.max, "cycle handled");
            }
            CycleVerdict::Terminate(reason) => {
                tracing::warn!(
                    alias = %ctx.alias,
                    request = a.id,
                    cycle = a.cycles_read,
                    %reason,
                    min = check.min,
                    max = check.max,
                    "cycle rejected, ending measurement"
                );
                shared.cancel_through(a.id);
                a.finish(acc, shared, Some(reason));
                return;
            }
        }
        if acc.cycles_handled() == a.requested {
            a.finish(acc, shared, None);
            return;
        }
    }
}
