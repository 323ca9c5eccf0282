use thiserror::Error;

use crate::types::Resolution;

/// A fault that ends the capture session with a non-zero exit.
#[derive(Error, Debug)]
pub enum GrabberError {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Renderer error: {0}")]
    Renderer(#[from] RendererError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Resolution must be positive, got {0}")]
    InvalidResolution(Resolution),

    #[error("FPS should be between 0 (unlimited) and 60, got {0}")]
    FpsOutOfRange(u32),

    #[error("Address not specified")]
    MissingAddress,

    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failures reported by the video-plane and graphics-plane collaborators.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Video texture capture is not supported on this system")]
    Unsupported,

    #[error("Failed to create video window")]
    WindowCreation,

    #[error("Failed to acquire video window resource")]
    ResourceAcquisition,

    #[error("Failed to create texture context")]
    ContextCreation,

    #[error("Failed to configure texture source ({step})")]
    SourceSetup { step: &'static str },

    #[error("Failed to register event handler")]
    EventRegistration,

    #[error("Texture generation failed (status {status})")]
    TextureGeneration { status: i32 },

    #[error("Failed to create graphics surface")]
    SurfaceCreation,

    #[error("Graphics screen capture failed")]
    ScreenCapture,

    #[error("Graphics plane is {actual}, expected {expected}")]
    DimensionMismatch { expected: Resolution, actual: Resolution },
}

impl CaptureError {
    /// Whether the failure is expected to clear up on its own (frame is
    /// skipped, pipeline stays live).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TextureGeneration { .. })
    }
}

/// Failures of the GPU context collaborator. All of these are fatal to the
/// session.
#[derive(Error, Debug)]
pub enum RendererError {
    #[error("Failed to initialize GPU context: {0}")]
    ContextInit(String),

    #[error("{stage} shader compile error: {log}")]
    ShaderCompile { stage: &'static str, log: String },

    #[error("Shader program link error: {0}")]
    ProgramLink(String),

    #[error("Failed to create GPU resource: {0}")]
    ResourceCreation(String),

    #[error("Offscreen target incomplete (status 0x{status:x})")]
    IncompleteTarget { status: u32 },

    #[error("GL error 0x{code:x} in {call}")]
    Gl { call: &'static str, code: u32 },

    #[error("Buffer holds {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Send failed: {reason}")]
    SendFailed { reason: String },

    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Protocol error: {reason}")]
    Protocol { reason: String },
}
