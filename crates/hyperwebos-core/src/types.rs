use serde::{Deserialize, Serialize};

// MARK: - Resolution

/// Capture resolution. Fixed for the lifetime of the process once chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Default grab size: small enough for ambient lighting, cheap to read back.
    pub const AMBIENT: Self = Self { width: 192, height: 108 };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn total_pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Byte length of a tightly packed RGBA buffer at this resolution.
    pub fn rgba_len(&self) -> usize {
        self.total_pixels() * 4
    }

    /// Byte length of a tightly packed RGB buffer at this resolution.
    pub fn rgb_len(&self) -> usize {
        self.total_pixels() * 3
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::AMBIENT
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}×{}", self.width, self.height)
    }
}

// MARK: - Video plane ids

/// Video window created by the video-plane platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub i32);

/// Hardware resource bound to a video window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(pub u32);

/// Texture-generation context bound to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u32);

// MARK: - TextureHandle

/// GPU texture name produced by the video plane.
///
/// `TextureHandle::NONE` (name 0) is the sentinel for "no live texture" and
/// must never reach a delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextureHandle(pub u32);

impl TextureHandle {
    pub const NONE: Self = Self(0);

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// Extra information returned alongside a generated video texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputInfo {
    pub width: u32,
    pub height: u32,
}

// MARK: - Source selection

/// Which part of the decoded video the texture is generated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRegion {
    /// The whole decoded picture.
    Max,
    /// Only the region currently visible in the video window.
    Video,
}

/// Where in the video path the texture is sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLocation {
    /// After scaling to the display (what the viewer sees).
    Display,
    /// Before scaling.
    Scaler,
}

// MARK: - PlaneEvent

/// Notification delivered by the video plane's dispatch context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneEvent {
    /// A new texture may now be generated.
    Available,
    Unavailable,
    ResourceBusy,
    Unknown(i32),
}

impl std::fmt::Display for PlaneEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available => write!(f, "AVAILABLE"),
            Self::Unavailable => write!(f, "UNAVAILABLE"),
            Self::ResourceBusy => write!(f, "RESOURCE_BUSY"),
            Self::Unknown(code) => write!(f, "UNKNOWN({code})"),
        }
    }
}
