//! hyperwebos-capture: the two image sources of the grabber.
//!
//! # Planes
//!
//! | Plane | Delivery | Exposed as |
//! |-------|----------|------------|
//! | Video (VT) | push: `AVAILABLE` event, then generate on demand | GPU texture name |
//! | Graphics (GM) | pull: polled once per accepted frame | RGBA bytes in CPU memory |
//!
//! ```text
//! VT dispatch thread ──► EventSink::on_available() ──► pipeline tick
//!                                                         │
//!        VideoSession::generate_texture() ◄───────────────┤
//!        GraphicsSurface::poll()          ◄───────────────┘
//! ```
//!
//! The platform SDKs are linked only with the `webos` feature. Every other
//! build gets a stub backend that reports the system as unsupported.

use std::sync::Arc;

use hyperwebos_core::{
    CaptureError, ContextId, OutputInfo, PlaneEvent, Resolution, ResourceId, SourceLocation,
    SourceRegion, TextureHandle, WindowId,
};
use tracing::{info, warn};

// ── Platform split ─────────────────────────────────────────────────────────────

#[cfg(feature = "webos")]
mod webos;
#[cfg(feature = "webos")]
pub use webos::{GmGraphicsSource as PlatformGraphicsSource, VtVideoSource as PlatformVideoSource};

#[cfg(not(feature = "webos"))]
mod stub;
#[cfg(not(feature = "webos"))]
pub use stub::{
    StubGraphicsSource as PlatformGraphicsSource, StubVideoSource as PlatformVideoSource,
};

/// Texture buffers requested from the video plane per context.
pub const VIDEO_BUFFER_COUNT: u32 = 2;

// ── EventSink ─────────────────────────────────────────────────────────────────

/// Receiver for video-plane notifications.
///
/// Called from the platform's dispatch context, concurrently with the rest of
/// the process.
pub trait EventSink: Send + Sync {
    fn on_available(&self);
    fn on_unavailable(&self);
    fn on_resource_busy(&self);
    fn on_unknown(&self, code: i32);
}

/// Route a decoded platform event to the matching [`EventSink`] method.
pub fn dispatch_event(sink: &dyn EventSink, event: PlaneEvent) {
    match event {
        PlaneEvent::Available => sink.on_available(),
        PlaneEvent::Unavailable => sink.on_unavailable(),
        PlaneEvent::ResourceBusy => sink.on_resource_busy(),
        PlaneEvent::Unknown(code) => sink.on_unknown(code),
    }
}

// ── Collaborator contracts ────────────────────────────────────────────────────

/// Video-plane platform API (VT on webOS).
pub trait VideoPlaneSource: Send {
    fn is_supported(&self) -> bool;
    fn create_window(&mut self) -> Result<WindowId, CaptureError>;
    fn acquire_resource(&mut self, window: WindowId) -> Result<ResourceId, CaptureError>;
    fn create_context(
        &mut self,
        resource: ResourceId,
        buffer_count: u32,
    ) -> Result<ContextId, CaptureError>;
    fn set_resolution(&mut self, context: ContextId, resolution: Resolution);
    fn set_source_region(
        &mut self,
        context: ContextId,
        region: SourceRegion,
    ) -> Result<(), CaptureError>;
    fn set_source_location(
        &mut self,
        context: ContextId,
        location: SourceLocation,
    ) -> Result<(), CaptureError>;
    fn register_event_handler(
        &mut self,
        context: ContextId,
        sink: Arc<dyn EventSink>,
    ) -> Result<(), CaptureError>;
    fn unregister_event_handler(&mut self, context: ContextId) -> Result<(), CaptureError>;
    fn generate_texture(
        &mut self,
        resource: ResourceId,
        context: ContextId,
    ) -> Result<(TextureHandle, OutputInfo), CaptureError>;
    /// Never called with [`TextureHandle::NONE`].
    fn delete_texture(&mut self, context: ContextId, texture: TextureHandle);
    fn delete_context(&mut self, context: ContextId);
    fn release_resource(&mut self, resource: ResourceId);
}

/// Surface id handed out by the graphics plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceId(pub u32);

/// One poll of the graphics plane.
#[derive(Debug)]
pub struct CapturedPlane<'a> {
    /// RGBA pixels, row-major. Owned by the platform; rewritten on every poll.
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
}

/// Graphics-plane platform API (GM on webOS).
pub trait GraphicsPlaneSource: Send {
    fn create_surface(&mut self, resolution: Resolution) -> Result<SurfaceId, CaptureError>;
    fn capture_screen(&mut self, surface: SurfaceId) -> Result<CapturedPlane<'_>, CaptureError>;
    fn destroy_surface(&mut self, surface: SurfaceId);
}

// ── VideoSession ──────────────────────────────────────────────────────────────

/// Video window, resource and context acquired from a [`VideoPlaneSource`].
pub struct VideoSession {
    source: Box<dyn VideoPlaneSource>,
    resource: ResourceId,
    context: ContextId,
    events_registered: bool,
    open: bool,
}

impl VideoSession {
    /// Bring up the video plane at `resolution`.
    ///
    /// Anything acquired before a failing step is released again, in reverse
    /// order, before the error is returned.
    pub fn open(
        mut source: Box<dyn VideoPlaneSource>,
        resolution: Resolution,
    ) -> Result<Self, CaptureError> {
        if !source.is_supported() {
            return Err(CaptureError::Unsupported);
        }

        info!("VT create video window");
        let window = source.create_window()?;
        info!("VT window_id={}", window.0);

        let resource = source.acquire_resource(window)?;
        info!("VT resource_id={}", resource.0);

        let context = match source.create_context(resource, VIDEO_BUFFER_COUNT) {
            Ok(ctx) => ctx,
            Err(e) => {
                source.release_resource(resource);
                return Err(e);
            }
        };
        info!("VT context_id={}", context.0);

        source.set_resolution(context, resolution);
        info!("VT texture resolution {}", resolution);

        let configured = source
            .set_source_region(context, SourceRegion::Max)
            .and_then(|_| source.set_source_location(context, SourceLocation::Display));
        if let Err(e) = configured {
            source.delete_context(context);
            source.release_resource(resource);
            return Err(e);
        }

        Ok(Self { source, resource, context, events_registered: false, open: true })
    }

    /// Start delivering notifications to `sink`. On failure the session is
    /// closed.
    pub fn register(&mut self, sink: Arc<dyn EventSink>) -> Result<(), CaptureError> {
        info!("VT register event handler");
        if let Err(e) = self.source.register_event_handler(self.context, sink) {
            self.close();
            return Err(e);
        }
        self.events_registered = true;
        Ok(())
    }

    pub fn generate_texture(&mut self) -> Result<(TextureHandle, OutputInfo), CaptureError> {
        self.source.generate_texture(self.resource, self.context)
    }

    pub fn delete_texture(&mut self, texture: TextureHandle) {
        if texture.is_none() {
            return;
        }
        self.source.delete_texture(self.context, texture);
    }

    /// Unregister events, delete the context and release the resource.
    /// Calling it again is a no-op.
    pub fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;

        if self.events_registered {
            self.events_registered = false;
            info!("VT unregister event handler");
            if let Err(e) = self.source.unregister_event_handler(self.context) {
                warn!("VT unregister event handler: {}", e);
            }
        }
        info!("VT delete context");
        self.source.delete_context(self.context);
        info!("VT release video window resource");
        self.source.release_resource(self.resource);
    }
}

impl Drop for VideoSession {
    fn drop(&mut self) {
        self.close();
    }
}

// ── GraphicsSurface ───────────────────────────────────────────────────────────

/// Graphics-plane surface sized to the capture resolution.
pub struct GraphicsSurface {
    source: Box<dyn GraphicsPlaneSource>,
    surface: Option<SurfaceId>,
    resolution: Resolution,
}

impl GraphicsSurface {
    pub fn open(
        mut source: Box<dyn GraphicsPlaneSource>,
        resolution: Resolution,
    ) -> Result<Self, CaptureError> {
        let surface = source.create_surface(resolution)?;
        info!("GM surface {} created at {}", surface.0, resolution);
        Ok(Self { source, surface: Some(surface), resolution })
    }

    /// Capture the graphics plane and return its RGBA pixels.
    ///
    /// A capture whose size differs from the configured resolution is a
    /// configuration fault.
    pub fn poll(&mut self) -> Result<&[u8], CaptureError> {
        let surface = self.surface.ok_or(CaptureError::ScreenCapture)?;
        let expected = self.resolution;
        let plane = self.source.capture_screen(surface)?;

        let actual = Resolution::new(plane.width, plane.height);
        if actual != expected {
            return Err(CaptureError::DimensionMismatch { expected, actual });
        }
        if plane.data.len() < expected.rgba_len() {
            return Err(CaptureError::ScreenCapture);
        }
        Ok(&plane.data[..expected.rgba_len()])
    }

    pub fn close(&mut self) {
        if let Some(surface) = self.surface.take() {
            info!("GM destroy surface {}", surface.0);
            self.source.destroy_surface(surface);
        }
    }
}

impl Drop for GraphicsSurface {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Calls(Mutex<Vec<&'static str>>);

    impl Calls {
        fn push(&self, name: &'static str) {
            self.0.lock().unwrap().push(name);
        }
        fn take(&self) -> Vec<&'static str> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    struct ScriptedVideo {
        calls: Arc<Calls>,
        fail_at: Option<&'static str>,
    }

    impl ScriptedVideo {
        fn step(&self, name: &'static str) -> Result<(), CaptureError> {
            self.calls.push(name);
            if self.fail_at == Some(name) {
                Err(CaptureError::SourceSetup { step: name })
            } else {
                Ok(())
            }
        }
    }

    impl VideoPlaneSource for ScriptedVideo {
        fn is_supported(&self) -> bool {
            self.fail_at != Some("supported")
        }
        fn create_window(&mut self) -> Result<WindowId, CaptureError> {
            self.step("create_window").map(|_| WindowId(0))
        }
        fn acquire_resource(&mut self, _: WindowId) -> Result<ResourceId, CaptureError> {
            self.step("acquire_resource").map(|_| ResourceId(3))
        }
        fn create_context(&mut self, _: ResourceId, n: u32) -> Result<ContextId, CaptureError> {
            assert_eq!(n, VIDEO_BUFFER_COUNT);
            self.step("create_context").map(|_| ContextId(9))
        }
        fn set_resolution(&mut self, _: ContextId, _: Resolution) {
            self.calls.push("set_resolution");
        }
        fn set_source_region(&mut self, _: ContextId, _: SourceRegion) -> Result<(), CaptureError> {
            self.step("set_source_region")
        }
        fn set_source_location(
            &mut self,
            _: ContextId,
            _: SourceLocation,
        ) -> Result<(), CaptureError> {
            self.step("set_source_location")
        }
        fn register_event_handler(
            &mut self,
            _: ContextId,
            _: Arc<dyn EventSink>,
        ) -> Result<(), CaptureError> {
            self.step("register")
        }
        fn unregister_event_handler(&mut self, _: ContextId) -> Result<(), CaptureError> {
            self.step("unregister")
        }
        fn generate_texture(
            &mut self,
            _: ResourceId,
            _: ContextId,
        ) -> Result<(TextureHandle, OutputInfo), CaptureError> {
            self.step("generate").map(|_| (TextureHandle(5), OutputInfo::default()))
        }
        fn delete_texture(&mut self, _: ContextId, texture: TextureHandle) {
            assert!(!texture.is_none(), "sentinel handle deleted");
            self.calls.push("delete_texture");
        }
        fn delete_context(&mut self, _: ContextId) {
            self.calls.push("delete_context");
        }
        fn release_resource(&mut self, _: ResourceId) {
            self.calls.push("release_resource");
        }
    }

    fn scripted(fail_at: Option<&'static str>) -> (Box<ScriptedVideo>, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        (Box::new(ScriptedVideo { calls: Arc::clone(&calls), fail_at }), calls)
    }

    struct NullSink;
    impl EventSink for NullSink {
        fn on_available(&self) {}
        fn on_unavailable(&self) {}
        fn on_resource_busy(&self) {}
        fn on_unknown(&self, _: i32) {}
    }

    #[test]
    fn unsupported_system_acquires_nothing() {
        let (video, calls) = scripted(Some("supported"));
        let err = VideoSession::open(video, Resolution::AMBIENT).err().unwrap();
        assert!(matches!(err, CaptureError::Unsupported));
        assert!(calls.take().is_empty());
    }

    #[test]
    fn failed_source_setup_unwinds_in_reverse() {
        let (video, calls) = scripted(Some("set_source_location"));
        assert!(VideoSession::open(video, Resolution::AMBIENT).is_err());
        assert_eq!(
            calls.take(),
            vec![
                "create_window",
                "acquire_resource",
                "create_context",
                "set_resolution",
                "set_source_region",
                "set_source_location",
                "delete_context",
                "release_resource",
            ]
        );
    }

    #[test]
    fn failed_context_releases_resource_only() {
        let (video, calls) = scripted(Some("create_context"));
        assert!(VideoSession::open(video, Resolution::AMBIENT).is_err());
        let log = calls.take();
        assert_eq!(log.last(), Some(&"release_resource"));
        assert!(!log.contains(&"delete_context"));
    }

    #[test]
    fn close_is_idempotent_and_ordered() {
        let (video, calls) = scripted(None);
        let mut session = VideoSession::open(video, Resolution::AMBIENT).unwrap();
        session.register(Arc::new(NullSink)).unwrap();
        calls.take();

        session.close();
        session.close();
        drop(session);
        assert_eq!(calls.take(), vec!["unregister", "delete_context", "release_resource"]);
    }

    #[test]
    fn sentinel_texture_never_reaches_platform() {
        let (video, calls) = scripted(None);
        let mut session = VideoSession::open(video, Resolution::AMBIENT).unwrap();
        calls.take();
        session.delete_texture(TextureHandle::NONE);
        assert!(calls.take().is_empty());
    }

    struct CountingSink {
        available: AtomicUsize,
        other: AtomicUsize,
    }

    impl EventSink for CountingSink {
        fn on_available(&self) {
            self.available.fetch_add(1, Ordering::SeqCst);
        }
        fn on_unavailable(&self) {
            self.other.fetch_add(1, Ordering::SeqCst);
        }
        fn on_resource_busy(&self) {
            self.other.fetch_add(1, Ordering::SeqCst);
        }
        fn on_unknown(&self, _: i32) {
            self.other.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn dispatch_routes_each_event_kind() {
        let sink = CountingSink { available: AtomicUsize::new(0), other: AtomicUsize::new(0) };
        for event in [
            PlaneEvent::Available,
            PlaneEvent::Unavailable,
            PlaneEvent::ResourceBusy,
            PlaneEvent::Unknown(42),
            PlaneEvent::Available,
        ] {
            dispatch_event(&sink, event);
        }
        assert_eq!(sink.available.load(Ordering::SeqCst), 2);
        assert_eq!(sink.other.load(Ordering::SeqCst), 3);
    }

    struct FixedPlane {
        pixels: Vec<u8>,
        reported: Resolution,
        destroyed: Arc<AtomicUsize>,
    }

    impl GraphicsPlaneSource for FixedPlane {
        fn create_surface(&mut self, _: Resolution) -> Result<SurfaceId, CaptureError> {
            Ok(SurfaceId(1))
        }
        fn capture_screen(&mut self, _: SurfaceId) -> Result<CapturedPlane<'_>, CaptureError> {
            Ok(CapturedPlane {
                data: &self.pixels,
                width: self.reported.width,
                height: self.reported.height,
            })
        }
        fn destroy_surface(&mut self, _: SurfaceId) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn graphics_poll_checks_dimensions() {
        let res = Resolution::new(4, 2);
        let destroyed = Arc::new(AtomicUsize::new(0));
        let plane = FixedPlane {
            pixels: vec![7; res.rgba_len()],
            reported: Resolution::new(4, 3),
            destroyed: Arc::clone(&destroyed),
        };
        let mut surface = GraphicsSurface::open(Box::new(plane), res).unwrap();
        let err = surface.poll().unwrap_err();
        assert!(matches!(err, CaptureError::DimensionMismatch { .. }));

        surface.close();
        surface.close();
        drop(surface);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn graphics_poll_returns_configured_bytes() {
        let res = Resolution::new(4, 2);
        let plane = FixedPlane {
            pixels: vec![9; res.rgba_len() + 16],
            reported: res,
            destroyed: Arc::new(AtomicUsize::new(0)),
        };
        let mut surface = GraphicsSurface::open(Box::new(plane), res).unwrap();
        assert_eq!(surface.poll().unwrap().len(), res.rgba_len());
    }
}
