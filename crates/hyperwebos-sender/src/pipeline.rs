//! `CapturePipeline`: gate, composite and send one frame per video-plane
//! notification.
//!
//! ```text
//! VT dispatch thread                       main task
//! ──────────────────                       ─────────
//! on_available()                           ctrl-c / reply reader EOF
//!   │ available = true                       │
//!   ▼                                        ▼
//! tick() ─── frame lock ───────────────── shutdown()
//!   AwaitingAvailability → Gating → Compositing → Sending → Idle
//! ```
//!
//! Every tick and the teardown run under the same lock, so a frame in flight
//! always finishes before resources are released, and nothing is processed
//! after `Shutdown`. The GPU context is bound only while a frame (or the
//! teardown) uses it, so each may run on a different thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use hyperwebos_capture::{EventSink, GraphicsSurface, VideoSession};
use hyperwebos_core::{CaptureError, GrabberError, RendererError, TransportError};
use hyperwebos_renderer::Compositor;
use hyperwebos_transport_client::StreamSink;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::gate::FrameGate;
use crate::stats::{self, StatsAccumulator};
use crate::texture::TextureLifecycle;

// ── State ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    AwaitingAvailability,
    Gating,
    Compositing,
    Sending,
    /// Terminal.
    Shutdown,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No pending availability.
    NothingPending,
    /// Too soon after the last accepted frame.
    Throttled,
    /// Texture generation failed; retried on the next notification.
    Skipped,
    Sent,
    /// The sink failed; the session is over.
    SessionEnded,
    /// A GPU or configuration fault; the session is over.
    Failed,
    /// Already shut down or cancelled.
    Stopped,
}

enum FrameError {
    Transient(CaptureError),
    Sink(TransportError),
    Fatal(GrabberError),
}

impl From<CaptureError> for FrameError {
    fn from(e: CaptureError) -> Self {
        if e.is_transient() {
            Self::Transient(e)
        } else {
            Self::Fatal(e.into())
        }
    }
}

impl From<RendererError> for FrameError {
    fn from(e: RendererError) -> Self {
        Self::Fatal(e.into())
    }
}

// ── PipelineContext ───────────────────────────────────────────────────────────

/// Collaborators a pipeline is built from.
pub struct PipelineParts {
    pub session: VideoSession,
    pub graphics: GraphicsSurface,
    pub compositor: Compositor,
    pub sink: Box<dyn StreamSink>,
}

/// Everything the frame lock protects.
struct PipelineContext {
    session: VideoSession,
    graphics: GraphicsSurface,
    compositor: Compositor,
    texture: TextureLifecycle,
    sink: Box<dyn StreamSink>,
    gate: FrameGate,
    stats: StatsAccumulator,
    state: PipelineState,
    frames_sent: u64,
    fault: Option<GrabberError>,
    torn_down: bool,
}

impl PipelineContext {
    fn enter(&mut self, state: PipelineState) {
        if self.state != PipelineState::Shutdown {
            self.state = state;
        }
    }

    /// One accepted frame: texture, graphics poll, composite, send.
    fn produce(&mut self, clock: &dyn Clock) -> Result<(), FrameError> {
        let Self {
            session,
            graphics,
            compositor,
            texture,
            sink,
            stats,
            state,
            frames_sent,
            ..
        } = self;
        let resolution = compositor.resolution();

        let started = clock.now_us();
        let mut gpu = compositor.bind()?;
        let acquired = texture.acquire(session, gpu.gpu());
        let polled = graphics.poll();
        let mut mark = clock.now_us();
        stats.record_acquire(mark.saturating_sub(started));

        let (video, _) = acquired?;
        let plane = polled?;

        *state = PipelineState::Compositing;
        gpu.composite(plane, video)?;
        drop(gpu);
        let now = clock.now_us();
        stats.record_composite(now.saturating_sub(mark));
        mark = now;

        *state = PipelineState::Sending;
        let sent = sink.set_image(compositor.output(), resolution.width, resolution.height);
        stats.record_send(clock.now_us().saturating_sub(mark));
        sent.map_err(FrameError::Sink)?;

        stats.frame_sent();
        *frames_sent += 1;
        Ok(())
    }
}

// ── CapturePipeline ───────────────────────────────────────────────────────────

pub struct CapturePipeline {
    ctx: Mutex<PipelineContext>,
    /// Raised by the event thread, consumed by an accepted tick.
    available: AtomicBool,
    clock: Box<dyn Clock>,
    cancel: CancellationToken,
}

impl CapturePipeline {
    /// `frame_delay_us` is the minimum interval between accepted frames;
    /// 0 accepts every notification.
    pub fn new(
        parts: PipelineParts,
        frame_delay_us: u64,
        clock: Box<dyn Clock>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let gate = FrameGate::new(frame_delay_us);
        info!("Frame gate: {} us between frames", gate.delay_us());
        Arc::new(Self {
            ctx: Mutex::new(PipelineContext {
                session: parts.session,
                graphics: parts.graphics,
                compositor: parts.compositor,
                texture: TextureLifecycle::new(),
                sink: parts.sink,
                gate,
                stats: StatsAccumulator::new(),
                state: PipelineState::Idle,
                frames_sent: 0,
                fault: None,
                torn_down: false,
            }),
            available: AtomicBool::new(false),
            clock,
            cancel,
        })
    }

    /// Start receiving video-plane notifications.
    ///
    /// The platform only holds a weak reference to the pipeline, so dropping
    /// the last `Arc` is never blocked by a registered handler.
    pub fn start(self: &Arc<Self>) -> Result<(), CaptureError> {
        let events: Arc<dyn EventSink> = Arc::new(PipelineEvents(Arc::downgrade(self)));
        let mut ctx = self.lock();
        ctx.session.register(events)?;
        ctx.enter(PipelineState::Idle);
        info!("Capture pipeline started");
        Ok(())
    }

    pub fn state(&self) -> PipelineState {
        self.lock().state
    }

    pub fn frames_sent(&self) -> u64 {
        self.lock().frames_sent
    }

    /// The fault that ended the session, if it was not a sink fault.
    pub fn take_fault(&self) -> Option<GrabberError> {
        self.lock().fault.take()
    }

    /// Record a video-plane AVAILABLE notification and run a tick.
    pub fn on_available(&self) -> TickOutcome {
        self.available.store(true, Ordering::SeqCst);
        self.tick()
    }

    /// Run one pass of the state machine under the frame lock.
    pub fn tick(&self) -> TickOutcome {
        let mut ctx = self.lock();
        if ctx.state == PipelineState::Shutdown || self.cancel.is_cancelled() {
            return TickOutcome::Stopped;
        }

        let outcome = self.step(&mut ctx);
        ctx.enter(PipelineState::Idle);

        if let Some(summary) = ctx.stats.roll(self.clock.now_us()) {
            stats::log_summary(&summary);
        }
        outcome
    }

    fn step(&self, ctx: &mut PipelineContext) -> TickOutcome {
        ctx.enter(PipelineState::AwaitingAvailability);
        if !self.available.load(Ordering::SeqCst) {
            return TickOutcome::NothingPending;
        }

        ctx.enter(PipelineState::Gating);
        if !ctx.gate.should_process(self.clock.now_us()) {
            return TickOutcome::Throttled;
        }
        // Consumed here so a notification arriving mid-frame stays pending.
        self.available.store(false, Ordering::SeqCst);

        match ctx.produce(self.clock.as_ref()) {
            Ok(()) => {
                debug!(
                    "Frame {} sent (VT texture {})",
                    ctx.frames_sent,
                    ctx.texture.current().raw()
                );
                TickOutcome::Sent
            }
            Err(FrameError::Transient(e)) => {
                warn!("Frame skipped: {}", e);
                TickOutcome::Skipped
            }
            Err(FrameError::Sink(e)) => {
                error!("Hyperion send failed, ending session: {}", e);
                self.end_session(ctx);
                TickOutcome::SessionEnded
            }
            Err(FrameError::Fatal(e)) => {
                error!("Capture pipeline fault: {}", e);
                ctx.fault = Some(e);
                self.end_session(ctx);
                TickOutcome::Failed
            }
        }
    }

    fn end_session(&self, ctx: &mut PipelineContext) {
        ctx.state = PipelineState::Shutdown;
        ctx.sink.close();
        self.cancel.cancel();
    }

    /// Close the sink and release the texture, the video session, the
    /// graphics surface and the GPU context, in that order.
    ///
    /// Waits for an in-flight frame to finish. Calling it again is a no-op.
    pub fn shutdown(&self) {
        let mut ctx = self.lock();
        ctx.state = PipelineState::Shutdown;
        if ctx.torn_down {
            return;
        }
        ctx.torn_down = true;
        info!("Capture pipeline shutting down after {} frames", ctx.frames_sent);

        let PipelineContext { session, graphics, compositor, texture, sink, .. } = &mut *ctx;
        sink.close();
        match compositor.bind() {
            Ok(gpu) => texture.release(session, gpu.gpu()),
            Err(e) => warn!("Video texture left to the platform, GPU context unavailable: {}", e),
        }
        session.close();
        graphics.close();
        compositor.destroy();
    }

    fn lock(&self) -> MutexGuard<'_, PipelineContext> {
        self.ctx.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ── PipelineEvents ────────────────────────────────────────────────────────────

struct PipelineEvents(Weak<CapturePipeline>);

impl EventSink for PipelineEvents {
    fn on_available(&self) {
        if let Some(pipeline) = self.0.upgrade() {
            pipeline.on_available();
        }
    }

    fn on_unavailable(&self) {
        warn!("VT event: video plane unavailable");
    }

    fn on_resource_busy(&self) {
        warn!("VT event: video resource busy");
    }

    fn on_unknown(&self, code: i32) {
        warn!("VT event: unknown type {}", code);
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
