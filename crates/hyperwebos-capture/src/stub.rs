//! Non-webOS stub for the capture planes (CI + desktop builds).
//!
//! Reports the system as unsupported so the grabber stops during bring-up,
//! before the Hyperion connection is opened.

use std::sync::Arc;

use hyperwebos_core::{
    CaptureError, ContextId, OutputInfo, Resolution, ResourceId, SourceLocation, SourceRegion,
    TextureHandle, WindowId,
};

use super::{CapturedPlane, EventSink, GraphicsPlaneSource, SurfaceId, VideoPlaneSource};

#[derive(Debug, Default)]
pub struct StubVideoSource;

impl StubVideoSource {
    pub fn new() -> Self {
        tracing::info!("VideoPlaneSource stub (built without the `webos` feature)");
        Self
    }
}

impl VideoPlaneSource for StubVideoSource {
    fn is_supported(&self) -> bool {
        false
    }

    fn create_window(&mut self) -> Result<WindowId, CaptureError> {
        Err(CaptureError::Unsupported)
    }

    fn acquire_resource(&mut self, _window: WindowId) -> Result<ResourceId, CaptureError> {
        Err(CaptureError::Unsupported)
    }

    fn create_context(&mut self, _: ResourceId, _: u32) -> Result<ContextId, CaptureError> {
        Err(CaptureError::Unsupported)
    }

    fn set_resolution(&mut self, _: ContextId, _: Resolution) {}

    fn set_source_region(&mut self, _: ContextId, _: SourceRegion) -> Result<(), CaptureError> {
        Err(CaptureError::Unsupported)
    }

    fn set_source_location(&mut self, _: ContextId, _: SourceLocation) -> Result<(), CaptureError> {
        Err(CaptureError::Unsupported)
    }

    fn register_event_handler(
        &mut self,
        _: ContextId,
        _: Arc<dyn EventSink>,
    ) -> Result<(), CaptureError> {
        Err(CaptureError::Unsupported)
    }

    fn unregister_event_handler(&mut self, _: ContextId) -> Result<(), CaptureError> {
        Ok(())
    }

    fn generate_texture(
        &mut self,
        _: ResourceId,
        _: ContextId,
    ) -> Result<(TextureHandle, OutputInfo), CaptureError> {
        Err(CaptureError::Unsupported)
    }

    fn delete_texture(&mut self, _: ContextId, _: TextureHandle) {}

    fn delete_context(&mut self, _: ContextId) {}

    fn release_resource(&mut self, _: ResourceId) {}
}

#[derive(Debug, Default)]
pub struct StubGraphicsSource;

impl StubGraphicsSource {
    pub fn new() -> Self {
        Self
    }
}

impl GraphicsPlaneSource for StubGraphicsSource {
    fn create_surface(&mut self, _: Resolution) -> Result<SurfaceId, CaptureError> {
        Err(CaptureError::Unsupported)
    }

    fn capture_screen(&mut self, _: SurfaceId) -> Result<CapturedPlane<'_>, CaptureError> {
        Err(CaptureError::Unsupported)
    }

    fn destroy_surface(&mut self, _: SurfaceId) {}
}
