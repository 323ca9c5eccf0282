//! hyperion-webos: forward what a webOS TV shows to a Hyperion server.
//!
//! # Architecture
//!
//! ```text
//! webOS TV (this app)                                  Hyperion
//! ───────────────────────────────────────────────      ─────────────────
//! VT video plane ──► AVAILABLE event ─┐
//!                                     ▼
//! GM graphics plane ──► poll ──► CapturePipeline
//!                                  FrameGate → GLES2 composite → RGB
//!                                     │
//!                                     ▼
//!                               ImageSender ── TCP flatbuffers (19400) ──► register, image
//!                               ReplyReader ◄──────────────────────────── replies
//! ```
//!
//! The pipeline runs on the platform's event thread. This task only waits
//! for Ctrl-C, a pipeline-ended session or the server hanging up, then tears
//! everything down behind the frame lock.

mod cli;
mod clock;
mod gate;
mod pipeline;
mod stats;
mod texture;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use hyperwebos_capture::{
    GraphicsSurface, PlatformGraphicsSource, PlatformVideoSource, VideoSession,
};
use hyperwebos_core::GrabberConfig;
use hyperwebos_renderer::{Compositor, GpuBackend};
use hyperwebos_transport_client::{HyperionClient, HyperionOptions, ReplyReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::clock::MonotonicClock;
use crate::pipeline::{CapturePipeline, PipelineParts};

const XDG_RUNTIME_DIR_FALLBACK: &str = "/tmp/xdg";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config = cli::config_from_args(std::env::args_os()).unwrap_or_else(|e| e.exit());
    info!("hyperion-webos v{}", env!("CARGO_PKG_VERSION"));

    if std::env::var_os("XDG_RUNTIME_DIR").is_none() {
        std::env::set_var("XDG_RUNTIME_DIR", XDG_RUNTIME_DIR_FALLBACK);
    }

    // EGL setup and the connect timeout block, so keep them off the runtime.
    let cancel = CancellationToken::new();
    let startup_cancel = cancel.clone();
    let priority = config.priority;
    let (pipeline, replies) = tokio::task::spawn_blocking(move || start(&config, startup_cancel))
        .await
        .context("Startup task failed")??;

    // ── Wait for the session to end ───────────────────────────────────────
    info!("Start connection loop");
    let reader_cancel = cancel.clone();
    let mut reader =
        tokio::task::spawn_blocking(move || read_replies(replies, priority, &reader_cancel));
    let mut reader_done = false;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping");
        }
        _ = cancel.cancelled() => {
            info!("Capture session ended");
        }
        joined = &mut reader => {
            reader_done = true;
            if let Err(e) = joined {
                warn!("Reply reader task failed: {}", e);
            }
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────────
    cancel.cancel();
    let teardown = Arc::clone(&pipeline);
    tokio::task::spawn_blocking(move || teardown.shutdown())
        .await
        .context("Teardown task failed")?;
    if !reader_done {
        if let Err(e) = reader.await {
            warn!("Reply reader task failed: {}", e);
        }
    }

    info!("Stopped after {} frames ({:?})", pipeline.frames_sent(), pipeline.state());
    if let Some(fault) = pipeline.take_fault() {
        return Err(fault).context("Capture pipeline failed");
    }
    Ok(())
}

/// Bring up GPU, video plane, graphics plane and the Hyperion connection, in
/// that order, then start listening for video events.
///
/// Anything already acquired is released on the way out if a later step fails.
fn start(
    config: &GrabberConfig,
    cancel: CancellationToken,
) -> Result<(Arc<CapturePipeline>, ReplyReader)> {
    let resolution = config.resolution;

    let gpu = open_gpu(config).context("Failed to initialize the GPU context")?;
    let compositor = Compositor::new(gpu, resolution);

    let session = VideoSession::open(Box::new(PlatformVideoSource::new()), resolution)
        .context("Failed to initialize video capture")?;
    let graphics = GraphicsSurface::open(Box::new(PlatformGraphicsSource::new()), resolution)
        .context("Failed to initialize graphics capture")?;

    let address = config.address.as_deref().context("Address not specified")?;
    let options = HyperionOptions {
        origin: config.origin.clone(),
        priority: config.priority,
        send_timeout: Duration::from_millis(config.send_timeout_ms),
        read_timeout: Duration::from_millis(config.read_timeout_ms),
    };
    let client = HyperionClient::connect(address, config.port, options)
        .with_context(|| format!("Failed to connect to Hyperion at {}:{}", address, config.port))?;
    let (sender, replies) = client.split().context("Failed to set up the Hyperion connection")?;

    let parts = PipelineParts { session, graphics, compositor, sink: Box::new(sender) };
    let clock = Box::new(MonotonicClock::new());
    let pipeline = CapturePipeline::new(parts, config.frame_delay_us(), clock, cancel);
    if let Err(e) = pipeline.start() {
        pipeline.shutdown();
        return Err(e).context("Failed to register the video event handler");
    }
    Ok((pipeline, replies))
}

#[cfg(feature = "webos")]
fn open_gpu(config: &GrabberConfig) -> Result<Box<dyn GpuBackend>> {
    use hyperwebos_renderer::egl::EglPbufferContext;
    use hyperwebos_renderer::{GlesBackend, ShaderSources};

    let shaders =
        ShaderSources::load(config.vertex_shader.as_deref(), config.fragment_shader.as_deref())
            .context("Failed to read shader sources")?;
    let context = EglPbufferContext::new(config.resolution)?;
    let backend = GlesBackend::new(Box::new(context), config.resolution, &shaders)?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "webos"))]
fn open_gpu(config: &GrabberConfig) -> Result<Box<dyn GpuBackend>> {
    use hyperwebos_renderer::{HeadlessBackend, HeadlessTextures};

    warn!("Built without the webos feature; compositing on the CPU");
    Ok(Box::new(HeadlessBackend::new(HeadlessTextures::new(), config.resolution)))
}

/// Drain server replies until the connection drops, the server reports an
/// error, or the session is cancelled.
fn read_replies(mut replies: ReplyReader, priority: i32, cancel: &CancellationToken) {
    while !cancel.is_cancelled() {
        match replies.read_reply() {
            Ok(Some(reply)) => {
                if let Some(e) = &reply.error {
                    error!("Connection terminated: Hyperion error: {}", e);
                    return;
                }
                match reply.registered {
                    Some(registered) if registered == priority => {
                        info!("Registered with Hyperion at priority {}", registered)
                    }
                    Some(registered) => warn!(
                        "Hyperion registered priority {} (asked for {})",
                        registered, priority
                    ),
                    None => debug!("Hyperion reply: {:?}", reply),
                }
            }
            Ok(None) => {}
            Err(e) => {
                error!("Connection terminated: {}", e);
                return;
            }
        }
    }
}
