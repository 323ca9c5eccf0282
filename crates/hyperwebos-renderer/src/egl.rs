//! EGL pbuffer context for [`GlesBackend`](crate::GlesBackend), through
//! `khronos-egl` linked against the system libEGL.
//!
//! ```text
//! eglGetDisplay → eglInitialize → eglChooseConfig (pbuffer, ES2, RGBA8)
//!   → eglCreatePbufferSurface → eglBindAPI(ES) → eglCreateContext(v2)
//!   → eglMakeCurrent (check) → eglMakeCurrent(NO_CONTEXT)
//! ```
//!
//! The context is left released after construction. Whoever renders binds it
//! through [`GlContextLoader::make_current`] and releases it afterwards, since
//! EGL refuses to bind a context that is current on another thread.

use std::ffi::c_void;

use hyperwebos_core::{RendererError, Resolution};
use khronos_egl as egl;
use tracing::{info, warn};

use crate::GlContextLoader;

type Egl = egl::Instance<egl::Static>;

#[rustfmt::skip]
const CONFIG_ATTRIBS: [egl::Int; 13] = [
    egl::SURFACE_TYPE,    egl::PBUFFER_BIT,
    egl::RENDERABLE_TYPE, egl::OPENGL_ES2_BIT,
    egl::BLUE_SIZE,       8,
    egl::GREEN_SIZE,      8,
    egl::RED_SIZE,        8,
    egl::ALPHA_SIZE,      8,
    egl::NONE,
];

const CONTEXT_ATTRIBS: [egl::Int; 3] = [egl::CONTEXT_CLIENT_VERSION, 2, egl::NONE];

fn context_error(step: &str, e: egl::Error) -> RendererError {
    RendererError::ContextInit(format!("{step} failed: {e}"))
}

pub struct EglPbufferContext {
    egl: Egl,
    display: egl::Display,
    surface: Option<egl::Surface>,
    context: Option<egl::Context>,
}

impl EglPbufferContext {
    pub fn new(resolution: Resolution) -> Result<Self, RendererError> {
        let egl = egl::Instance::new(egl::Static);
        let display = unsafe { egl.get_display(egl::DEFAULT_DISPLAY) }
            .ok_or_else(|| RendererError::ContextInit("no EGL display".into()))?;
        let (major, minor) =
            egl.initialize(display).map_err(|e| context_error("eglInitialize", e))?;
        info!("EGL display {}.{}", major, minor);

        // From here on, Drop terminates the display and whatever was created.
        let mut this = Self { egl, display, surface: None, context: None };
        this.create(resolution)?;
        this.make_current()?;
        this.release_current();
        info!("EGL pbuffer context ready at {}", resolution);
        Ok(this)
    }

    fn create(&mut self, resolution: Resolution) -> Result<(), RendererError> {
        let config = self
            .egl
            .choose_first_config(self.display, &CONFIG_ATTRIBS)
            .map_err(|e| context_error("eglChooseConfig", e))?
            .ok_or_else(|| RendererError::ContextInit("no matching EGL config".into()))?;

        #[rustfmt::skip]
        let pbuffer_attribs = [
            egl::WIDTH,          resolution.width as egl::Int,
            egl::HEIGHT,         resolution.height as egl::Int,
            egl::TEXTURE_FORMAT, egl::TEXTURE_RGBA,
            egl::TEXTURE_TARGET, egl::TEXTURE_2D,
            egl::LARGEST_PBUFFER, egl::TRUE as egl::Int,
            egl::NONE,
        ];
        self.surface = Some(
            self.egl
                .create_pbuffer_surface(self.display, config, &pbuffer_attribs)
                .map_err(|e| context_error("eglCreatePbufferSurface", e))?,
        );

        self.egl.bind_api(egl::OPENGL_ES_API).map_err(|e| context_error("eglBindAPI", e))?;
        self.context = Some(
            self.egl
                .create_context(self.display, config, None, &CONTEXT_ATTRIBS)
                .map_err(|e| context_error("eglCreateContext", e))?,
        );
        Ok(())
    }
}

impl GlContextLoader for EglPbufferContext {
    fn get_proc_address(&self, name: &str) -> *const c_void {
        self.egl.get_proc_address(name).map_or(std::ptr::null(), |f| f as *const c_void)
    }

    fn make_current(&self) -> Result<(), RendererError> {
        self.egl
            .make_current(self.display, self.surface, self.surface, self.context)
            .map_err(|e| context_error("eglMakeCurrent", e))
    }

    fn release_current(&self) {
        if let Err(e) = self.egl.make_current(self.display, None, None, None) {
            warn!("eglMakeCurrent(EGL_NO_CONTEXT) failed: {}", e);
        }
    }
}

impl Drop for EglPbufferContext {
    fn drop(&mut self) {
        self.release_current();
        if let Some(context) = self.context.take() {
            if let Err(e) = self.egl.destroy_context(self.display, context) {
                warn!("eglDestroyContext failed: {}", e);
            }
        }
        if let Some(surface) = self.surface.take() {
            if let Err(e) = self.egl.destroy_surface(self.display, surface) {
                warn!("eglDestroySurface failed: {}", e);
            }
        }
        if let Err(e) = self.egl.terminate(self.display) {
            warn!("eglTerminate failed: {}", e);
        }
    }
}
