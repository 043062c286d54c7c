use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};

use crate::{
    error::{AcquisitionError, ExportError, RenderError},
    export::Exporter,
    kaleido::{self, OutputSurface},
    pipeline::{SourceProvider, SourceSlot},
    types::{ExportRequest, FacingMode, Frame, KaleidoConfig, Scale},
};

// Upper bound for a handle waiting on an export reply.
const EXPORT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Cooperative stop flag, checked at the top of every tick.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Paces the loop between ticks.
pub trait FrameScheduler {
    fn wait_for_next_tick(&mut self);
}

/// Sleeps so that ticks start at most `fps` times per second.
#[derive(Debug)]
pub struct FixedRateScheduler {
    interval: Duration,
    last_tick: Option<Instant>,
}

impl FixedRateScheduler {
    pub fn new(fps: u32) -> Self {
        Self {
            interval: Duration::from_secs_f64(1.0 / f64::from(fps.max(1))),
            last_tick: None,
        }
    }
}

impl FrameScheduler for FixedRateScheduler {
    fn wait_for_next_tick(&mut self) {
        if let Some(last) = self.last_tick {
            if let Some(remaining) = self.interval.checked_sub(last.elapsed()) {
                thread::sleep(remaining);
            }
        }
        self.last_tick = Some(Instant::now());
    }
}

/// Runs ticks back to back.
#[derive(Debug, Default)]
pub struct ImmediateScheduler;

impl FrameScheduler for ImmediateScheduler {
    fn wait_for_next_tick(&mut self) {}
}

enum Control {
    SetScale(Scale),
    SetFacing(FacingMode),
    Export(ExportRequest, Sender<Result<PathBuf, ExportError>>),
    Stop,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StopReason {
    Cancelled,
    /// The frame source stopped or paused; the loop does not resume.
    SourceStopped,
    TickLimit,
    InvariantViolation(RenderError),
}

#[derive(Clone, Debug)]
pub enum LoopEvent {
    /// First frame is on the surface. Sent once per loop.
    Ready,
    AcquisitionFailed(AcquisitionError),
    Exported(PathBuf),
    ExportFailed(String),
    Stopped(StopReason),
}

#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    /// No source to read from.
    Idle,
    /// Nothing changed since the previous fill.
    Unchanged,
    Rendered,
    Stopped(StopReason),
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LoopOptions {
    pub max_ticks: Option<u64>,
}

/// Thread-safe remote for a running loop. Every change is queued and
/// applied at the start of the next tick.
#[derive(Clone)]
pub struct RenderHandle {
    control_tx: Sender<Control>,
    cancel: CancelToken,
}

impl RenderHandle {
    pub fn set_scale(&self, value: f64) {
        let _ = self.control_tx.send(Control::SetScale(Scale::new(value)));
    }

    pub fn set_facing(&self, facing: FacingMode) {
        let _ = self.control_tx.send(Control::SetFacing(facing));
    }

    /// Blocks until the loop has written the export between two ticks.
    /// Must not be called from the thread running the loop.
    pub fn export(&self, request: ExportRequest) -> Result<PathBuf, ExportError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.control_tx
            .send(Control::Export(request, reply_tx))
            .map_err(|_| ExportError::LoopUnavailable)?;
        reply_rx
            .recv_timeout(EXPORT_REPLY_TIMEOUT)
            .map_err(|_| ExportError::LoopUnavailable)?
    }

    pub fn stop(&self) {
        self.cancel.cancel();
        let _ = self.control_tx.send(Control::Stop);
    }
}

pub struct RenderLoop {
    slot: SourceSlot,
    config: KaleidoConfig,
    surface: OutputSurface,
    pattern_size: Option<(u32, u32)>,
    current_frame: Option<Frame>,
    dirty: bool,
    ready: bool,
    ticks: u64,
    stopped: Option<StopReason>,
    options: LoopOptions,
    exporter: Exporter,
    cancel: CancelToken,
    control_tx: Sender<Control>,
    control_rx: Receiver<Control>,
    events_tx: Sender<LoopEvent>,
    events_rx: Receiver<LoopEvent>,
}

impl RenderLoop {
    pub fn new(
        provider: Box<dyn SourceProvider>,
        config: KaleidoConfig,
        viewport: (u32, u32),
        exporter: Exporter,
        options: LoopOptions,
    ) -> Result<Self, RenderError> {
        let surface = OutputSurface::new(viewport.0, viewport.1)?;
        let (control_tx, control_rx) = unbounded();
        let (events_tx, events_rx) = unbounded();

        Ok(Self {
            slot: SourceSlot::new(provider),
            config,
            surface,
            pattern_size: None,
            current_frame: None,
            dirty: false,
            ready: false,
            ticks: 0,
            stopped: None,
            options,
            exporter,
            cancel: CancelToken::default(),
            control_tx,
            control_rx,
            events_tx,
            events_rx,
        })
    }

    /// Opens the source for the configured facing. A failure is reported and
    /// leaves the loop idle until another facing is requested.
    pub fn start(&mut self) -> Result<(), AcquisitionError> {
        self.switch_source(self.config.facing)
    }

    pub fn handle(&self) -> RenderHandle {
        RenderHandle {
            control_tx: self.control_tx.clone(),
            cancel: self.cancel.clone(),
        }
    }

    pub fn events(&self) -> Receiver<LoopEvent> {
        self.events_rx.clone()
    }

    pub fn config(&self) -> KaleidoConfig {
        self.config
    }

    pub fn surface(&self) -> &OutputSurface {
        &self.surface
    }

    pub fn pattern_size(&self) -> Option<(u32, u32)> {
        self.pattern_size
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn export(&self, request: ExportRequest) -> Result<PathBuf, ExportError> {
        self.exporter
            .export(request, &self.surface, self.pattern_size)
    }

    pub fn run<S: FrameScheduler>(&mut self, scheduler: &mut S) -> StopReason {
        let reason = loop {
            match self.tick() {
                Ok(TickOutcome::Stopped(reason)) => break reason,
                Ok(_) => scheduler.wait_for_next_tick(),
                Err(err) => {
                    log::error!("render loop terminated: {err}");
                    break StopReason::InvariantViolation(err);
                }
            }
        };

        self.stopped = Some(reason.clone());
        self.slot.release();
        self.answer_pending_exports();
        log::info!("render loop stopped after {} ticks: {reason:?}", self.ticks);
        self.emit(LoopEvent::Stopped(reason.clone()));
        reason
    }

    pub fn tick(&mut self) -> Result<TickOutcome, RenderError> {
        if let Some(reason) = &self.stopped {
            return Ok(TickOutcome::Stopped(reason.clone()));
        }
        if self.cancel.is_cancelled() {
            return Ok(TickOutcome::Stopped(StopReason::Cancelled));
        }
        if self
            .options
            .max_ticks
            .is_some_and(|limit| self.ticks >= limit)
        {
            return Ok(TickOutcome::Stopped(StopReason::TickLimit));
        }

        self.apply_controls();
        if self.cancel.is_cancelled() {
            return Ok(TickOutcome::Stopped(StopReason::Cancelled));
        }
        self.ticks += 1;

        let incoming = {
            let Some(source) = self.slot.source_mut() else {
                return Ok(TickOutcome::Idle);
            };
            if !source.is_active() {
                return Ok(TickOutcome::Stopped(StopReason::SourceStopped));
            }
            source.latest_frame()
        };
        if let Some(frame) = incoming {
            self.current_frame = Some(frame);
            self.dirty = true;
        }

        if !self.dirty {
            return Ok(TickOutcome::Unchanged);
        }
        let Some(frame) = self.current_frame.as_ref() else {
            return Ok(TickOutcome::Idle);
        };
        if !frame.is_well_formed() {
            return Err(RenderError::InvariantViolation(format!(
                "malformed frame: {}x{} with {} bytes",
                frame.width,
                frame.height,
                frame.rgba.len()
            )));
        }

        let pattern = kaleido::build_pattern(frame, self.config.scale)
            .map_err(|err| RenderError::InvariantViolation(format!("{err:#}")))?;
        self.surface.fill_with(&pattern);
        self.pattern_size = Some((pattern.width, pattern.height));
        self.dirty = false;

        if !self.ready {
            self.ready = true;
            log::info!(
                "first frame rendered: tile {}x{} on {}x{} surface",
                pattern.width,
                pattern.height,
                self.surface.width(),
                self.surface.height()
            );
            self.emit(LoopEvent::Ready);
        }
        Ok(TickOutcome::Rendered)
    }

    fn apply_controls(&mut self) {
        while let Ok(control) = self.control_rx.try_recv() {
            match control {
                Control::SetScale(scale) => {
                    if scale != self.config.scale {
                        log::debug!("scale -> {}", scale.get());
                        self.config = self.config.with_scale(scale);
                        self.dirty = true;
                    }
                }
                Control::SetFacing(facing) => {
                    if facing != self.config.facing || self.slot.is_empty() {
                        // A failure is already reported through the event channel.
                        let _ = self.switch_source(facing);
                    }
                }
                Control::Export(request, reply_tx) => self.answer_export(request, reply_tx),
                Control::Stop => self.cancel.cancel(),
            }
        }
    }

    /// Replies to exports that raced with the stop. Scale and facing changes
    /// are dropped; a stopped loop never opens another source.
    fn answer_pending_exports(&self) {
        while let Ok(control) = self.control_rx.try_recv() {
            if let Control::Export(request, reply_tx) = control {
                self.answer_export(request, reply_tx);
            }
        }
    }

    fn answer_export(
        &self,
        request: ExportRequest,
        reply_tx: Sender<Result<PathBuf, ExportError>>,
    ) {
        let result = self.export(request);
        match &result {
            Ok(path) => self.emit(LoopEvent::Exported(path.clone())),
            Err(err) => self.emit(LoopEvent::ExportFailed(err.to_string())),
        }
        let _ = reply_tx.send(result);
    }

    fn switch_source(&mut self, facing: FacingMode) -> Result<(), AcquisitionError> {
        self.config = self.config.with_facing(facing);
        match self.slot.switch(facing) {
            Ok(()) => Ok(()),
            Err(err) => {
                log::warn!("failed to acquire {facing}-facing source: {err}");
                self.emit(LoopEvent::AcquisitionFailed(err.clone()));
                Err(err)
            }
        }
    }

    fn emit(&self, event: LoopEvent) {
        let _ = self.events_tx.send(event);
    }
}
