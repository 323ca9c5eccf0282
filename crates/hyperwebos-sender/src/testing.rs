//! Scripted collaborators for pipeline tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex, MutexGuard};

use hyperwebos_capture::{
    CapturedPlane, EventSink, GraphicsPlaneSource, SurfaceId, VideoPlaneSource,
};
use hyperwebos_core::{
    CaptureError, ContextId, OutputInfo, Resolution, ResourceId, SourceLocation, SourceRegion,
    TextureHandle, TransportError, WindowId,
};
use hyperwebos_renderer::HeadlessTextures;
use hyperwebos_transport_client::StreamSink;

pub const RED: [u8; 4] = [255, 0, 0, 255];
pub const BLUE: [u8; 4] = [0, 0, 255, 255];

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Video plane ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct VideoLog {
    generated: usize,
    fail_on: Vec<usize>,
    deleted: Vec<TextureHandle>,
    handler: Option<Arc<dyn EventSink>>,
    unregistered: bool,
}

/// Video plane that hands out solid-colour headless textures.
///
/// Panics if asked to delete a sentinel or unknown texture.
#[derive(Clone)]
pub struct StubVideo {
    textures: HeadlessTextures,
    color: [u8; 4],
    log: Arc<Mutex<VideoLog>>,
}

impl StubVideo {
    pub fn new(textures: HeadlessTextures, color: [u8; 4]) -> Self {
        Self { textures, color, log: Arc::default() }
    }

    /// Fail the given generate calls (1-based).
    pub fn failing_on(self, calls: &[usize]) -> Self {
        lock(&self.log).fail_on = calls.to_vec();
        self
    }

    pub fn deleted(&self) -> Vec<TextureHandle> {
        lock(&self.log).deleted.clone()
    }

    pub fn generated(&self) -> usize {
        lock(&self.log).generated
    }

    pub fn live_textures(&self) -> usize {
        self.textures.live_count()
    }

    /// Drop a texture without going through `delete_texture`.
    pub fn forget(&self, texture: TextureHandle) {
        self.textures.delete(texture);
    }

    pub fn is_unregistered(&self) -> bool {
        lock(&self.log).unregistered
    }

    /// Deliver an AVAILABLE event the way the platform thread would.
    pub fn fire_available(&self) {
        let handler = lock(&self.log).handler.clone();
        if let Some(handler) = handler {
            handler.on_available();
        }
    }
}

impl VideoPlaneSource for StubVideo {
    fn is_supported(&self) -> bool {
        true
    }
    fn create_window(&mut self) -> Result<WindowId, CaptureError> {
        Ok(WindowId(0))
    }
    fn acquire_resource(&mut self, _: WindowId) -> Result<ResourceId, CaptureError> {
        Ok(ResourceId(7))
    }
    fn create_context(&mut self, _: ResourceId, _: u32) -> Result<ContextId, CaptureError> {
        Ok(ContextId(3))
    }
    fn set_resolution(&mut self, _: ContextId, _: Resolution) {}
    fn set_source_region(&mut self, _: ContextId, _: SourceRegion) -> Result<(), CaptureError> {
        Ok(())
    }
    fn set_source_location(
        &mut self,
        _: ContextId,
        _: SourceLocation,
    ) -> Result<(), CaptureError> {
        Ok(())
    }
    fn register_event_handler(
        &mut self,
        _: ContextId,
        sink: Arc<dyn EventSink>,
    ) -> Result<(), CaptureError> {
        lock(&self.log).handler = Some(sink);
        Ok(())
    }
    fn unregister_event_handler(&mut self, _: ContextId) -> Result<(), CaptureError> {
        let mut log = lock(&self.log);
        log.handler = None;
        log.unregistered = true;
        Ok(())
    }
    fn generate_texture(
        &mut self,
        _: ResourceId,
        _: ContextId,
    ) -> Result<(TextureHandle, OutputInfo), CaptureError> {
        let mut log = lock(&self.log);
        log.generated += 1;
        if log.fail_on.contains(&log.generated) {
            return Err(CaptureError::TextureGeneration { status: -1 });
        }
        let info = OutputInfo { width: 1920, height: 1080 };
        Ok((self.textures.create(self.color), info))
    }
    fn delete_texture(&mut self, _: ContextId, texture: TextureHandle) {
        assert!(!texture.is_none(), "delete_texture called with the sentinel handle");
        assert!(self.textures.delete(texture), "delete_texture called with dead {texture:?}");
        lock(&self.log).deleted.push(texture);
    }
    fn delete_context(&mut self, _: ContextId) {}
    fn release_resource(&mut self, _: ResourceId) {}
}

// ── Graphics plane ────────────────────────────────────────────────────────────

/// Graphics plane stuck on one solid colour.
pub struct SolidGraphics {
    data: Vec<u8>,
    reported: Resolution,
    polls: Arc<AtomicUsize>,
}

impl SolidGraphics {
    pub fn new(resolution: Resolution, color: [u8; 4]) -> Self {
        Self {
            data: color.repeat(resolution.total_pixels()),
            reported: resolution,
            polls: Arc::default(),
        }
    }

    /// Report a capture size other than the buffer's.
    pub fn reporting(mut self, resolution: Resolution) -> Self {
        self.reported = resolution;
        self
    }

    pub fn poll_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.polls)
    }
}

impl GraphicsPlaneSource for SolidGraphics {
    fn create_surface(&mut self, _: Resolution) -> Result<SurfaceId, CaptureError> {
        Ok(SurfaceId(1))
    }
    fn capture_screen(&mut self, _: SurfaceId) -> Result<CapturedPlane<'_>, CaptureError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(CapturedPlane {
            data: &self.data,
            width: self.reported.width,
            height: self.reported.height,
        })
    }
    fn destroy_surface(&mut self, _: SurfaceId) {}
}

// ── Sink ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentImage {
    pub width: u32,
    pub height: u32,
    pub len: usize,
    pub first_pixel: [u8; 3],
}

/// Parks one `set_image` call until the test lets it go.
#[derive(Clone)]
pub struct SendGate {
    entered: Arc<Barrier>,
    released: Arc<Barrier>,
}

impl SendGate {
    pub fn new() -> Self {
        Self { entered: Arc::new(Barrier::new(2)), released: Arc::new(Barrier::new(2)) }
    }

    /// Block until a send is parked in the sink.
    pub fn wait_entered(&self) {
        self.entered.wait();
    }

    /// Let the parked send finish.
    pub fn release(&self) {
        self.released.wait();
    }
}

#[derive(Default)]
struct SinkLog {
    images: Vec<SentImage>,
    fail_on: Option<usize>,
    closed: usize,
    hold: Option<SendGate>,
    events: Vec<&'static str>,
}

/// Sink that records every frame and can fail on the Nth call.
#[derive(Clone, Default)]
pub struct RecordingSink(Arc<Mutex<SinkLog>>);

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(self, call: usize) -> Self {
        lock(&self.0).fail_on = Some(call);
        self
    }

    pub fn images(&self) -> Vec<SentImage> {
        lock(&self.0).images.clone()
    }

    pub fn calls(&self) -> usize {
        lock(&self.0).images.len()
    }

    pub fn close_count(&self) -> usize {
        lock(&self.0).closed
    }

    /// Park the first send on `gate`.
    pub fn holding_first_send(self, gate: SendGate) -> Self {
        lock(&self.0).hold = Some(gate);
        self
    }

    /// `"send"` / `"sent"` around each frame and `"close"`, in call order.
    pub fn events(&self) -> Vec<&'static str> {
        lock(&self.0).events.clone()
    }
}

impl StreamSink for RecordingSink {
    fn set_image(&mut self, rgb: &[u8], width: u32, height: u32) -> Result<(), TransportError> {
        let hold = {
            let mut log = lock(&self.0);
            if log.closed > 0 {
                return Err(TransportError::ConnectionClosed);
            }
            log.events.push("send");
            log.hold.take()
        };
        if let Some(gate) = hold {
            gate.entered.wait();
            gate.released.wait();
        }

        let mut log = lock(&self.0);
        let mut first_pixel = [0; 3];
        first_pixel.copy_from_slice(&rgb[..3]);
        log.images.push(SentImage { width, height, len: rgb.len(), first_pixel });
        log.events.push("sent");
        if log.fail_on == Some(log.images.len()) {
            return Err(TransportError::Timeout { ms: 150 });
        }
        Ok(())
    }

    fn close(&mut self) {
        let mut log = lock(&self.0);
        log.closed += 1;
        log.events.push("close");
    }
}
