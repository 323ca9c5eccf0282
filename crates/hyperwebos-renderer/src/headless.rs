//! CPU stand-in for the GLES2 backend.
//!
//! Applies the same blend as the built-in fragment shader
//! (`mix(gm.rgb, vt.rgb, vt.a)`), with video textures modelled as solid
//! colours registered in a shared [`HeadlessTextures`] table. Used by tests
//! and anywhere no GL context exists.
//!
//! The context follows EGL's thread rules: it is current on at most one
//! thread, binding it from a second thread fails with `EGL_BAD_ACCESS`, and
//! every step fails unless the calling thread holds it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use hyperwebos_core::{RendererError, Resolution, TextureHandle};

use crate::GpuBackend;

/// `GL_FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT`
const INCOMPLETE_MISSING_ATTACHMENT: u32 = 0x8CD7;
/// `GL_INVALID_OPERATION`
const INVALID_OPERATION: u32 = 0x0502;
/// `EGL_BAD_ACCESS`
const BAD_ACCESS: u32 = 0x3002;

// MARK: - HeadlessTextures

/// Shared table of solid-colour "video textures".
#[derive(Clone, Default)]
pub struct HeadlessTextures {
    colors: Arc<Mutex<HashMap<u32, [u8; 4]>>>,
    next: Arc<AtomicU32>,
}

impl HeadlessTextures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a texture of one RGBA colour. Names start at 1.
    pub fn create(&self, rgba: [u8; 4]) -> TextureHandle {
        let name = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        self.lock().insert(name, rgba);
        TextureHandle(name)
    }

    /// Returns `false` if `texture` was not live.
    pub fn delete(&self, texture: TextureHandle) -> bool {
        self.lock().remove(&texture.raw()).is_some()
    }

    pub fn contains(&self, texture: TextureHandle) -> bool {
        self.lock().contains_key(&texture.raw())
    }

    pub fn live_count(&self) -> usize {
        self.lock().len()
    }

    fn color(&self, texture: TextureHandle) -> Option<[u8; 4]> {
        self.lock().get(&texture.raw()).copied()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, [u8; 4]>> {
        self.colors.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// MARK: - HeadlessMonitor

#[derive(Default)]
struct Flags {
    draws: AtomicUsize,
    bound: AtomicBool,
    attached: AtomicBool,
    incomplete: AtomicBool,
    destroyed: AtomicBool,
    /// Thread the context is current on.
    owner: Mutex<Option<ThreadId>>,
}

impl Flags {
    fn owner(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.owner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Observer for a [`HeadlessBackend`] that has been moved into a compositor.
#[derive(Clone)]
pub struct HeadlessMonitor(Arc<Flags>);

impl HeadlessMonitor {
    pub fn draws(&self) -> usize {
        self.0.draws.load(Ordering::SeqCst)
    }

    /// No framebuffer or attachment left bound.
    pub fn is_clean(&self) -> bool {
        !self.0.bound.load(Ordering::SeqCst) && !self.0.attached.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.0.destroyed.load(Ordering::SeqCst)
    }

    /// Not current on any thread.
    pub fn is_released(&self) -> bool {
        self.0.owner().is_none()
    }

    /// Make every following completeness check fail.
    pub fn force_incomplete(&self, incomplete: bool) {
        self.0.incomplete.store(incomplete, Ordering::SeqCst);
    }
}

// MARK: - HeadlessBackend

pub struct HeadlessBackend {
    textures: HeadlessTextures,
    resolution: Resolution,
    graphics: Vec<u8>,
    target: Vec<u8>,
    flags: Arc<Flags>,
}

impl HeadlessBackend {
    pub fn new(textures: HeadlessTextures, resolution: Resolution) -> Self {
        Self {
            textures,
            resolution,
            graphics: vec![0; resolution.rgba_len()],
            target: vec![0; resolution.rgba_len()],
            flags: Arc::new(Flags::default()),
        }
    }

    pub fn monitor(&self) -> HeadlessMonitor {
        HeadlessMonitor(Arc::clone(&self.flags))
    }

    fn is_current(&self) -> bool {
        *self.flags.owner() == Some(thread::current().id())
    }

    fn require_current(&self, call: &'static str) -> Result<(), RendererError> {
        if self.is_current() {
            Ok(())
        } else {
            Err(RendererError::Gl { call, code: INVALID_OPERATION })
        }
    }

    fn require(&self, flag: &AtomicBool, call: &'static str) -> Result<(), RendererError> {
        if flag.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RendererError::Gl { call, code: INVALID_OPERATION })
        }
    }
}

fn blend(under: u8, over: u8, alpha: u8) -> u8 {
    let a = alpha as u32;
    ((under as u32 * (255 - a) + over as u32 * a + 127) / 255) as u8
}

impl GpuBackend for HeadlessBackend {
    fn make_current(&mut self) -> Result<(), RendererError> {
        if self.flags.destroyed.load(Ordering::SeqCst) {
            return Err(RendererError::ContextInit("context destroyed".into()));
        }
        let me = thread::current().id();
        let mut owner = self.flags.owner();
        match *owner {
            Some(other) if other != me => Err(RendererError::ContextInit(format!(
                "eglMakeCurrent failed (EGL 0x{BAD_ACCESS:x}): current on {other:?}"
            ))),
            _ => {
                *owner = Some(me);
                Ok(())
            }
        }
    }

    fn release_current(&mut self) {
        let mut owner = self.flags.owner();
        if *owner == Some(thread::current().id()) {
            *owner = None;
        }
    }

    fn bind_target(&mut self, resolution: Resolution) -> Result<(), RendererError> {
        self.require_current("bind_target")?;
        if resolution != self.resolution {
            return Err(RendererError::BufferSize {
                expected: self.resolution.rgba_len(),
                actual: resolution.rgba_len(),
            });
        }
        self.flags.bound.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn upload_graphics(&mut self, rgba: &[u8]) -> Result<(), RendererError> {
        self.require_current("upload_graphics")?;
        if rgba.len() != self.graphics.len() {
            return Err(RendererError::BufferSize {
                expected: self.graphics.len(),
                actual: rgba.len(),
            });
        }
        self.graphics.copy_from_slice(rgba);
        Ok(())
    }

    fn attach_color_target(&mut self) -> Result<(), RendererError> {
        self.require_current("attach_color_target")?;
        self.require(&self.flags.bound, "attach_color_target")?;
        self.flags.attached.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn draw_composite(&mut self, video: TextureHandle) -> Result<(), RendererError> {
        self.require_current("draw_composite")?;
        self.require(&self.flags.attached, "draw_composite")?;
        // An unbound/unknown texture samples as opaque black, as in GLES2.
        let vt = self.textures.color(video).unwrap_or([0, 0, 0, 255]);
        for (dst, gm) in self.target.chunks_exact_mut(4).zip(self.graphics.chunks_exact(4)) {
            dst[0] = blend(gm[0], vt[0], vt[3]);
            dst[1] = blend(gm[1], vt[1], vt[3]);
            dst[2] = blend(gm[2], vt[2], vt[3]);
            dst[3] = 255;
        }
        self.flags.draws.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn check_target(&mut self) -> Result<(), RendererError> {
        self.require_current("check_target")?;
        if self.flags.incomplete.load(Ordering::SeqCst)
            || !self.flags.attached.load(Ordering::SeqCst)
        {
            return Err(RendererError::IncompleteTarget { status: INCOMPLETE_MISSING_ATTACHMENT });
        }
        Ok(())
    }

    fn read_rgba(&mut self, out: &mut [u8]) -> Result<(), RendererError> {
        self.require_current("read_rgba")?;
        self.require(&self.flags.bound, "read_rgba")?;
        if out.len() != self.target.len() {
            return Err(RendererError::BufferSize {
                expected: self.target.len(),
                actual: out.len(),
            });
        }
        out.copy_from_slice(&self.target);
        Ok(())
    }

    fn unbind_all(&mut self) {
        self.flags.attached.store(false, Ordering::SeqCst);
        self.flags.bound.store(false, Ordering::SeqCst);
    }

    fn is_texture(&self, texture: TextureHandle) -> bool {
        // glIsTexture without a current context answers GL_FALSE.
        self.is_current() && !texture.is_none() && self.textures.contains(texture)
    }

    fn destroy(&mut self) {
        if self.make_current().is_err() {
            return;
        }
        self.flags.destroyed.store(true, Ordering::SeqCst);
        self.release_current();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_names_are_unique_and_tracked() {
        let textures = HeadlessTextures::new();
        let a = textures.create([1, 2, 3, 4]);
        let b = textures.create([5, 6, 7, 8]);
        assert_ne!(a, b);
        assert!(!a.is_none());
        assert_eq!(textures.live_count(), 2);
        assert!(textures.delete(a));
        assert!(!textures.delete(a));
        assert!(!textures.contains(a));
        assert!(textures.contains(b));
    }

    #[test]
    fn blend_endpoints() {
        assert_eq!(blend(10, 200, 0), 10);
        assert_eq!(blend(10, 200, 255), 200);
        assert_eq!(blend(0, 255, 128), 128);
    }

    #[test]
    fn draw_without_attachment_fails() {
        let res = Resolution::new(2, 2);
        let mut backend = HeadlessBackend::new(HeadlessTextures::new(), res);
        backend.make_current().unwrap();
        backend.bind_target(res).unwrap();
        assert!(matches!(
            backend.draw_composite(TextureHandle(1)),
            Err(RendererError::Gl { call: "draw_composite", .. })
        ));
    }

    #[test]
    fn context_current_elsewhere_cannot_be_bound() {
        let res = Resolution::new(2, 2);
        let mut backend = HeadlessBackend::new(HeadlessTextures::new(), res);
        let monitor = backend.monitor();
        backend.make_current().unwrap();

        let mut backend = thread::spawn(move || {
            assert!(matches!(backend.make_current(), Err(RendererError::ContextInit(_))));
            assert!(matches!(
                backend.bind_target(res),
                Err(RendererError::Gl { call: "bind_target", .. })
            ));
            // Only the owning thread can release it.
            backend.release_current();
            backend
        })
        .join()
        .unwrap();
        assert!(!monitor.is_released());

        backend.release_current();
        assert!(monitor.is_released());
        thread::spawn(move || {
            let mut backend = backend;
            backend.make_current().unwrap();
            backend.release_current();
        })
        .join()
        .unwrap();
    }

    #[test]
    fn texture_is_unknown_without_a_current_context() {
        let res = Resolution::new(2, 2);
        let textures = HeadlessTextures::new();
        let texture = textures.create([1, 2, 3, 4]);
        let mut backend = HeadlessBackend::new(textures, res);

        assert!(!backend.is_texture(texture));
        backend.make_current().unwrap();
        assert!(backend.is_texture(texture));
        assert!(!backend.is_texture(TextureHandle::NONE));
    }

    #[test]
    fn destroy_binds_and_releases_the_context() {
        let res = Resolution::new(2, 2);
        let mut backend = HeadlessBackend::new(HeadlessTextures::new(), res);
        let monitor = backend.monitor();
        backend.make_current().unwrap();

        // Held by this thread, so a destroy elsewhere is refused.
        let mut backend = thread::spawn(move || {
            backend.destroy();
            backend
        })
        .join()
        .unwrap();
        assert!(!monitor.is_destroyed());

        backend.release_current();
        thread::spawn(move || backend.destroy()).join().unwrap();
        assert!(monitor.is_destroyed());
        assert!(monitor.is_released());
    }
}
