//! webOS backend: VT (video texture) and GM (graphics manager) SDK bindings.
//!
//! # VT event delivery
//!
//! ```text
//! libvt dispatch thread
//!   │  on_vt_event(type, data, user_data)
//!   ▼
//! user_data ──► Box<Arc<dyn EventSink>> (owned by VtVideoSource)
//!   │
//!   ▼
//! dispatch_event(sink, PlaneEvent)
//! ```
//!
//! The boxed sink stays alive until the handler is unregistered, so the raw
//! `user_data` pointer never dangles while the platform may still call it.

use std::ffi::{c_int, c_uint, c_void};
use std::sync::Arc;

use hyperwebos_core::{
    CaptureError, ContextId, OutputInfo, PlaneEvent, Resolution, ResourceId, SourceLocation,
    SourceRegion, TextureHandle, WindowId,
};
use tracing::{debug, warn};

use super::{
    dispatch_event, CapturedPlane, EventSink, GraphicsPlaneSource, SurfaceId, VideoPlaneSource,
};

// ── vt_openapi.h ──────────────────────────────────────────────────────────────

mod vt {
    use super::*;

    pub const VT_OK: c_int = 0;

    pub const VT_AVAILABLE: c_int = 0;
    pub const VT_UNAVAILABLE: c_int = 1;
    pub const VT_RESOURCE_BUSY: c_int = 2;

    pub const VT_SOURCE_REGION_MAX: c_int = 0;
    pub const VT_SOURCE_REGION_VIDEO: c_int = 1;

    pub const VT_SOURCE_LOCATION_DISPLAY: c_int = 0;
    pub const VT_SOURCE_LOCATION_SCALER: c_int = 1;

    #[repr(C)]
    pub struct VtResolution {
        pub w: c_uint,
        pub h: c_uint,
    }

    #[repr(C)]
    #[derive(Default)]
    pub struct VtOutputInfo {
        pub width: c_uint,
        pub height: c_uint,
        pub format: c_int,
        pub reserved: [c_int; 8],
    }

    pub type VtEventHandler =
        extern "C" fn(event: c_int, data: *mut c_void, user_data: *mut c_void);

    #[link(name = "vt")]
    extern "C" {
        pub fn VT_IsSystemSupported(supported: *mut i32) -> c_int;
        pub fn VT_CreateVideoWindow(window: c_int) -> c_int;
        pub fn VT_AcquireVideoWindowResource(window: c_int, resource: *mut c_uint) -> c_int;
        pub fn VT_CreateContext(resource: c_uint, buffer_count: c_int) -> c_int;
        pub fn VT_SetTextureResolution(context: c_uint, resolution: *mut VtResolution) -> c_int;
        pub fn VT_SetTextureSourceRegion(context: c_uint, region: c_int) -> c_int;
        pub fn VT_SetTextureSourceLocation(context: c_uint, location: c_int) -> c_int;
        pub fn VT_RegisterEventHandler(
            context: c_uint,
            handler: VtEventHandler,
            user_data: *mut c_void,
        ) -> c_int;
        pub fn VT_UnRegisterEventHandler(context: c_uint) -> c_int;
        pub fn VT_GenerateTexture(
            resource: c_uint,
            context: c_uint,
            texture: *mut c_uint,
            info: *mut VtOutputInfo,
        ) -> c_int;
        pub fn VT_DeleteTexture(context: c_uint, texture: c_uint);
        pub fn VT_DeleteContext(context: c_uint);
        pub fn VT_ReleaseVideoWindowResource(resource: c_uint) -> c_int;
    }
}

// ── gm.h ──────────────────────────────────────────────────────────────────────

mod gm {
    use super::*;

    pub const GM_OK: c_int = 0;
    pub const GM_PIXEL_FORMAT_RGBA: c_int = 0;

    #[repr(C)]
    pub struct GmSurface {
        pub surface_id: c_uint,
        pub width: c_uint,
        pub height: c_uint,
        pub bytes_per_line: c_uint,
        pub pixel_format: c_int,
        pub framebuffer: *mut u8,
    }

    #[link(name = "gm")]
    extern "C" {
        pub fn GM_CreateSurface(
            width: c_int,
            height: c_int,
            format: c_int,
            surface: *mut GmSurface,
        ) -> c_int;
        pub fn GM_CaptureGraphicScreen(
            surface_id: c_uint,
            width: *mut c_uint,
            height: *mut c_uint,
        ) -> c_int;
        pub fn GM_DestroySurface(surface_id: c_uint) -> c_int;
    }
}

fn decode_event(code: c_int) -> PlaneEvent {
    match code {
        vt::VT_AVAILABLE => PlaneEvent::Available,
        vt::VT_UNAVAILABLE => PlaneEvent::Unavailable,
        vt::VT_RESOURCE_BUSY => PlaneEvent::ResourceBusy,
        other => PlaneEvent::Unknown(other),
    }
}

extern "C" fn on_vt_event(event: c_int, _data: *mut c_void, user_data: *mut c_void) {
    if user_data.is_null() {
        return;
    }
    // SAFETY: `user_data` is the `Box<Arc<dyn EventSink>>` registered by
    // `VtVideoSource`, which outlives the registration.
    let sink = unsafe { &*(user_data as *const Arc<dyn EventSink>) };
    dispatch_event(sink.as_ref(), decode_event(event));
}

// ── VtVideoSource ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct VtVideoSource {
    handler: Option<Box<Arc<dyn EventSink>>>,
}

impl VtVideoSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VideoPlaneSource for VtVideoSource {
    fn is_supported(&self) -> bool {
        let mut supported: i32 = 0;
        let status = unsafe { vt::VT_IsSystemSupported(&mut supported) };
        status == vt::VT_OK && supported != 0
    }

    fn create_window(&mut self) -> Result<WindowId, CaptureError> {
        let window = unsafe { vt::VT_CreateVideoWindow(0) };
        if window == -1 {
            return Err(CaptureError::WindowCreation);
        }
        Ok(WindowId(window))
    }

    fn acquire_resource(&mut self, window: WindowId) -> Result<ResourceId, CaptureError> {
        let mut resource: c_uint = 0;
        let status = unsafe { vt::VT_AcquireVideoWindowResource(window.0, &mut resource) };
        if status != vt::VT_OK {
            return Err(CaptureError::ResourceAcquisition);
        }
        Ok(ResourceId(resource))
    }

    fn create_context(
        &mut self,
        resource: ResourceId,
        buffer_count: u32,
    ) -> Result<ContextId, CaptureError> {
        let context = unsafe { vt::VT_CreateContext(resource.0, buffer_count as c_int) };
        if context == 0 || context == -1 {
            return Err(CaptureError::ContextCreation);
        }
        Ok(ContextId(context as u32))
    }

    fn set_resolution(&mut self, context: ContextId, resolution: Resolution) {
        let mut res = vt::VtResolution { w: resolution.width, h: resolution.height };
        let status = unsafe { vt::VT_SetTextureResolution(context.0, &mut res) };
        if status != vt::VT_OK {
            warn!("VT_SetTextureResolution returned {}", status);
        }
    }

    fn set_source_region(
        &mut self,
        context: ContextId,
        region: SourceRegion,
    ) -> Result<(), CaptureError> {
        let region = match region {
            SourceRegion::Max => vt::VT_SOURCE_REGION_MAX,
            SourceRegion::Video => vt::VT_SOURCE_REGION_VIDEO,
        };
        match unsafe { vt::VT_SetTextureSourceRegion(context.0, region) } {
            vt::VT_OK => Ok(()),
            _ => Err(CaptureError::SourceSetup { step: "source region" }),
        }
    }

    fn set_source_location(
        &mut self,
        context: ContextId,
        location: SourceLocation,
    ) -> Result<(), CaptureError> {
        let location = match location {
            SourceLocation::Display => vt::VT_SOURCE_LOCATION_DISPLAY,
            SourceLocation::Scaler => vt::VT_SOURCE_LOCATION_SCALER,
        };
        match unsafe { vt::VT_SetTextureSourceLocation(context.0, location) } {
            vt::VT_OK => Ok(()),
            _ => Err(CaptureError::SourceSetup { step: "source location" }),
        }
    }

    fn register_event_handler(
        &mut self,
        context: ContextId,
        sink: Arc<dyn EventSink>,
    ) -> Result<(), CaptureError> {
        let boxed = Box::new(sink);
        let user_data = &*boxed as *const Arc<dyn EventSink> as *mut c_void;
        let status = unsafe { vt::VT_RegisterEventHandler(context.0, on_vt_event, user_data) };
        if status != vt::VT_OK {
            return Err(CaptureError::EventRegistration);
        }
        self.handler = Some(boxed);
        Ok(())
    }

    fn unregister_event_handler(&mut self, context: ContextId) -> Result<(), CaptureError> {
        let status = unsafe { vt::VT_UnRegisterEventHandler(context.0) };
        // Only free the sink once the platform has stopped calling it.
        if status != vt::VT_OK {
            return Err(CaptureError::EventRegistration);
        }
        self.handler = None;
        Ok(())
    }

    fn generate_texture(
        &mut self,
        resource: ResourceId,
        context: ContextId,
    ) -> Result<(TextureHandle, OutputInfo), CaptureError> {
        let mut texture: c_uint = 0;
        let mut info = vt::VtOutputInfo::default();
        let status =
            unsafe { vt::VT_GenerateTexture(resource.0, context.0, &mut texture, &mut info) };
        if status != vt::VT_OK {
            return Err(CaptureError::TextureGeneration { status });
        }
        debug!("VT texture {} ({}x{})", texture, info.width, info.height);
        Ok((TextureHandle(texture), OutputInfo { width: info.width, height: info.height }))
    }

    fn delete_texture(&mut self, context: ContextId, texture: TextureHandle) {
        unsafe { vt::VT_DeleteTexture(context.0, texture.raw()) }
    }

    fn delete_context(&mut self, context: ContextId) {
        unsafe { vt::VT_DeleteContext(context.0) }
    }

    fn release_resource(&mut self, resource: ResourceId) {
        let status = unsafe { vt::VT_ReleaseVideoWindowResource(resource.0) };
        if status != vt::VT_OK {
            warn!("VT_ReleaseVideoWindowResource returned {}", status);
        }
    }
}

// ── GmGraphicsSource ──────────────────────────────────────────────────────────

pub struct GmGraphicsSource {
    surface: Option<gm::GmSurface>,
    resolution: Resolution,
}

impl GmGraphicsSource {
    pub fn new() -> Self {
        Self { surface: None, resolution: Resolution::AMBIENT }
    }
}

impl Default for GmGraphicsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsPlaneSource for GmGraphicsSource {
    fn create_surface(&mut self, resolution: Resolution) -> Result<SurfaceId, CaptureError> {
        let mut surface = gm::GmSurface {
            surface_id: 0,
            width: 0,
            height: 0,
            bytes_per_line: 0,
            pixel_format: 0,
            framebuffer: std::ptr::null_mut(),
        };
        let status = unsafe {
            gm::GM_CreateSurface(
                resolution.width as c_int,
                resolution.height as c_int,
                gm::GM_PIXEL_FORMAT_RGBA,
                &mut surface,
            )
        };
        if status != gm::GM_OK || surface.framebuffer.is_null() {
            return Err(CaptureError::SurfaceCreation);
        }
        let id = SurfaceId(surface.surface_id);
        self.surface = Some(surface);
        self.resolution = resolution;
        Ok(id)
    }

    fn capture_screen(&mut self, surface: SurfaceId) -> Result<CapturedPlane<'_>, CaptureError> {
        let gm = self.surface.as_ref().ok_or(CaptureError::ScreenCapture)?;
        let mut width = self.resolution.width;
        let mut height = self.resolution.height;
        let status = unsafe { gm::GM_CaptureGraphicScreen(surface.0, &mut width, &mut height) };
        if status != gm::GM_OK {
            return Err(CaptureError::ScreenCapture);
        }
        // SAFETY: GM allocated the framebuffer for the surface size requested
        // in `create_surface`, and it lives until `GM_DestroySurface`.
        let data = unsafe {
            std::slice::from_raw_parts(gm.framebuffer as *const u8, self.resolution.rgba_len())
        };
        Ok(CapturedPlane { data, width, height })
    }

    fn destroy_surface(&mut self, surface: SurfaceId) {
        if self.surface.take().is_some() {
            unsafe {
                gm::GM_DestroySurface(surface.0);
            }
        }
    }
}

// SAFETY: the framebuffer pointer is only dereferenced through `&mut self`.
unsafe impl Send for GmGraphicsSource {}
