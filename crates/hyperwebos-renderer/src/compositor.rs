//! `Compositor`: one offscreen pass per accepted frame.
//!
//! The GPU context is bound through [`Compositor::bind`], which returns a
//! [`CurrentContext`] guard. The context is released when the guard drops, so
//! the next frame or the teardown may run on any thread.
//!
//! Steps run in a fixed order on the [`GpuBackend`]:
//!
//! ```text
//! bind target → upload GM → attach color → draw quad → check target → read RGBA
//!                                                                   │
//!                                   unbind_all (always) ◄───────────┘
//! ```
//!
//! The RGBA readback is narrowed to packed RGB in the compositor's own output
//! buffer, which is overwritten by the next call.

use hyperwebos_core::{RendererError, Resolution, TextureHandle};
use tracing::info;

use crate::GpuBackend;

pub struct Compositor {
    gpu: Box<dyn GpuBackend>,
    resolution: Resolution,
    rgba: Vec<u8>,
    rgb: Vec<u8>,
}

impl Compositor {
    pub fn new(gpu: Box<dyn GpuBackend>, resolution: Resolution) -> Self {
        info!("Compositor ready at {}", resolution);
        Self {
            gpu,
            resolution,
            rgba: vec![0; resolution.rgba_len()],
            rgb: vec![0; resolution.rgb_len()],
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Make the GPU context current on this thread until the guard drops.
    pub fn bind(&mut self) -> Result<CurrentContext<'_>, RendererError> {
        self.gpu.make_current()?;
        Ok(CurrentContext { compositor: self })
    }

    /// Output of the last successful composite.
    pub fn output(&self) -> &[u8] {
        &self.rgb
    }

    pub fn destroy(&mut self) {
        self.gpu.destroy();
    }

    fn composite(&mut self, graphics: &[u8], video: TextureHandle) -> Result<(), RendererError> {
        let expected = self.resolution.rgba_len();
        if graphics.len() != expected {
            return Err(RendererError::BufferSize { expected, actual: graphics.len() });
        }

        let rendered = self.render(graphics, video);
        self.gpu.unbind_all();
        rendered?;

        narrow_rgba_to_rgb(&self.rgba, &mut self.rgb);
        Ok(())
    }

    fn render(&mut self, graphics: &[u8], video: TextureHandle) -> Result<(), RendererError> {
        self.gpu.bind_target(self.resolution)?;
        self.gpu.upload_graphics(graphics)?;
        self.gpu.attach_color_target()?;
        self.gpu.draw_composite(video)?;
        self.gpu.check_target()?;
        self.gpu.read_rgba(&mut self.rgba)
    }
}

// MARK: - CurrentContext

/// The compositor's GPU context, current on the thread holding this guard.
pub struct CurrentContext<'a> {
    compositor: &'a mut Compositor,
}

impl CurrentContext<'_> {
    /// The bound GPU context, e.g. to check texture validity.
    pub fn gpu(&self) -> &dyn GpuBackend {
        self.compositor.gpu.as_ref()
    }

    /// Composite `graphics` (RGBA) with the `video` texture and return the
    /// packed RGB result, `width * height * 3` bytes, row 0 at the GL origin.
    ///
    /// Every error is a driver/context fault and fatal to the session. GPU
    /// state is unbound before returning on both paths.
    pub fn composite(
        &mut self,
        graphics: &[u8],
        video: TextureHandle,
    ) -> Result<&[u8], RendererError> {
        self.compositor.composite(graphics, video)?;
        Ok(self.compositor.output())
    }
}

impl Drop for CurrentContext<'_> {
    fn drop(&mut self) {
        self.compositor.gpu.release_current();
    }
}

/// Drop the alpha channel: `rgba` holds N pixels, `rgb` receives N.
pub fn narrow_rgba_to_rgb(rgba: &[u8], rgb: &mut [u8]) {
    for (src, dst) in rgba.chunks_exact(4).zip(rgb.chunks_exact_mut(3)) {
        dst.copy_from_slice(&src[..3]);
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
