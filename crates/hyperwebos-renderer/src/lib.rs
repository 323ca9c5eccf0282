//! hyperwebos-renderer: offscreen compositing of the video and graphics planes.
//!
//! ```text
//! GM RGBA bytes ──upload──► tex_gm ─┐
//!                                   ├─► fullscreen quad (two-sampler shader)
//! VT texture name ────────► tex_vt ─┘          │
//!                                              ▼
//!                                 offscreen FBO (RGBA) ──readback──► RGB
//! ```

use std::path::Path;

use hyperwebos_core::{RendererError, Resolution, TextureHandle};

pub mod compositor;
#[cfg(feature = "egl")]
pub mod egl;
pub mod gles;
pub mod headless;

pub use compositor::{narrow_rgba_to_rgb, Compositor, CurrentContext};
pub use gles::{GlContextLoader, GlesBackend};
pub use headless::{HeadlessBackend, HeadlessTextures};

// MARK: - GpuBackend trait

/// GPU context the [`Compositor`] drives, one primitive per compositing step.
///
/// A context is current on at most one thread at a time. Every step, and
/// [`is_texture`](Self::is_texture), needs it current on the calling thread;
/// callers pair [`make_current`](Self::make_current) with
/// [`release_current`](Self::release_current) so the next frame can run on
/// another thread.
///
/// Implementations:
/// - [`GlesBackend`]: GLES2 through `gleam`, context from EGL or any loader
/// - [`HeadlessBackend`]: CPU rasterizer with the same blend, for tests
pub trait GpuBackend: Send {
    /// Make the context current on the calling thread.
    fn make_current(&mut self) -> Result<(), RendererError>;

    /// Detach the context from the calling thread.
    fn release_current(&mut self);

    /// Bind the offscreen target and set the viewport to `resolution`.
    fn bind_target(&mut self, resolution: Resolution) -> Result<(), RendererError>;

    /// Upload the graphics-plane pixels into the graphics texture.
    fn upload_graphics(&mut self, rgba: &[u8]) -> Result<(), RendererError>;

    /// Attach the target's color texture to the bound framebuffer.
    fn attach_color_target(&mut self) -> Result<(), RendererError>;

    /// Draw the fullscreen quad sampling graphics (unit 1) and `video` (unit 2).
    fn draw_composite(&mut self, video: TextureHandle) -> Result<(), RendererError>;

    /// Fails with [`RendererError::IncompleteTarget`] if the target cannot be
    /// rendered to.
    fn check_target(&mut self) -> Result<(), RendererError>;

    /// Read the target back as RGBA into `out` (`width * height * 4` bytes).
    fn read_rgba(&mut self, out: &mut [u8]) -> Result<(), RendererError>;

    /// Unbind textures, buffers, program and framebuffer.
    fn unbind_all(&mut self);

    /// Whether `texture` names a live texture in this context.
    fn is_texture(&self, texture: TextureHandle) -> bool;

    /// Release every GPU object, binding the context for the duration.
    /// Calling it again is a no-op.
    fn destroy(&mut self);
}

// MARK: - Shader assets

pub const DEFAULT_VERTEX_SHADER: &str = include_str!("../shaders/vertex_gles2.glsl");
pub const DEFAULT_FRAGMENT_SHADER: &str = include_str!("../shaders/fragment_gles2.glsl");

/// Vertex + fragment source for the compositing program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSources {
    pub vertex: String,
    pub fragment: String,
}

impl Default for ShaderSources {
    fn default() -> Self {
        Self {
            vertex: DEFAULT_VERTEX_SHADER.to_owned(),
            fragment: DEFAULT_FRAGMENT_SHADER.to_owned(),
        }
    }
}

impl ShaderSources {
    /// Built-in sources, with either stage replaced by a file when given.
    pub fn load(vertex: Option<&Path>, fragment: Option<&Path>) -> std::io::Result<Self> {
        let mut sources = Self::default();
        if let Some(path) = vertex {
            sources.vertex = std::fs::read_to_string(path)?;
        }
        if let Some(path) = fragment {
            sources.fragment = std::fs::read_to_string(path)?;
        }
        Ok(sources)
    }
}
