//! `TextureLifecycle`: the one live video-plane texture.

use hyperwebos_capture::VideoSession;
use hyperwebos_core::{CaptureError, OutputInfo, TextureHandle};
use hyperwebos_renderer::GpuBackend;
use tracing::debug;

/// Holds at most one live texture and deletes it before asking for the next.
#[derive(Debug, Default)]
pub struct TextureLifecycle {
    current: TextureHandle,
}

impl TextureLifecycle {
    pub fn new() -> Self {
        Self { current: TextureHandle::NONE }
    }

    pub fn current(&self) -> TextureHandle {
        self.current
    }

    /// Release the live texture, then generate a new one.
    ///
    /// On failure nothing is live afterwards. Generation failures are
    /// expected under resource contention.
    pub fn acquire(
        &mut self,
        session: &mut VideoSession,
        gpu: &dyn GpuBackend,
    ) -> Result<(TextureHandle, OutputInfo), CaptureError> {
        self.release(session, gpu);
        match session.generate_texture() {
            Ok((texture, info)) => {
                debug!("VT texture {} ({}x{})", texture.raw(), info.width, info.height);
                self.current = texture;
                Ok((texture, info))
            }
            Err(e) => {
                self.current = TextureHandle::NONE;
                Err(e)
            }
        }
    }

    /// Delete the live texture if the GPU still knows it. Safe to repeat.
    ///
    /// `gpu` must be current on this thread, or every texture looks unknown.
    pub fn release(&mut self, session: &mut VideoSession, gpu: &dyn GpuBackend) {
        let texture = std::mem::replace(&mut self.current, TextureHandle::NONE);
        if !texture.is_none() && gpu.is_texture(texture) {
            session.delete_texture(texture);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubVideo, RED};
    use hyperwebos_core::Resolution;
    use hyperwebos_renderer::{HeadlessBackend, HeadlessTextures};

    fn setup(fail: &[usize]) -> (VideoSession, HeadlessBackend, StubVideo) {
        let textures = HeadlessTextures::new();
        let video = StubVideo::new(textures.clone(), RED).failing_on(fail);
        let session = VideoSession::open(Box::new(video.clone()), Resolution::AMBIENT).unwrap();
        let mut gpu = HeadlessBackend::new(textures, Resolution::AMBIENT);
        gpu.make_current().unwrap();
        (session, gpu, video)
    }

    #[test]
    fn delete_happens_before_each_new_texture() {
        let (mut session, gpu, video) = setup(&[]);
        let mut lifecycle = TextureLifecycle::new();

        let (first, _) = lifecycle.acquire(&mut session, &gpu).unwrap();
        let (second, _) = lifecycle.acquire(&mut session, &gpu).unwrap();
        assert_ne!(first, second);
        assert_eq!(lifecycle.current(), second);
        assert_eq!(video.deleted(), vec![first]);
        assert_eq!(video.live_textures(), 1);
    }

    #[test]
    fn failure_leaves_no_live_texture() {
        let (mut session, gpu, video) = setup(&[2]);
        let mut lifecycle = TextureLifecycle::new();

        lifecycle.acquire(&mut session, &gpu).unwrap();
        assert!(lifecycle.acquire(&mut session, &gpu).is_err());
        assert!(lifecycle.current().is_none());
        assert_eq!(video.live_textures(), 0);

        // Nothing to delete after the failure; the stub panics on a bad delete.
        lifecycle.acquire(&mut session, &gpu).unwrap();
        lifecycle.release(&mut session, &gpu);
        lifecycle.release(&mut session, &gpu);
        assert_eq!(video.live_textures(), 0);
        assert_eq!(video.deleted().len(), 2);
    }

    #[test]
    fn texture_unknown_to_the_gpu_is_not_deleted() {
        let (mut session, gpu, video) = setup(&[]);
        let mut lifecycle = TextureLifecycle::new();

        let (texture, _) = lifecycle.acquire(&mut session, &gpu).unwrap();
        // The driver dropped it behind our back.
        video.forget(texture);
        lifecycle.release(&mut session, &gpu);
        assert!(video.deleted().is_empty());
        assert!(lifecycle.current().is_none());
    }

    #[test]
    fn unbound_context_keeps_the_texture() {
        let (mut session, mut gpu, video) = setup(&[]);
        let mut lifecycle = TextureLifecycle::new();

        lifecycle.acquire(&mut session, &gpu).unwrap();
        gpu.release_current();
        lifecycle.release(&mut session, &gpu);
        assert!(video.deleted().is_empty());
        assert_eq!(video.live_textures(), 1);
    }
}
