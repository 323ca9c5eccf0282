use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::types::Resolution;

pub const DEFAULT_PORT: u16 = 19400;
pub const DEFAULT_FPS: u32 = 15;
pub const MAX_FPS: u32 = 60;

/// Grabber configuration. Loaded from an optional JSON file, then overridden
/// by command-line flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrabberConfig {
    pub resolution: Resolution,
    /// Target frame rate. `0` disables throttling.
    pub fps: u32,
    /// Hyperion server address.
    pub address: Option<String>,
    pub port: u16,
    /// Origin name reported to Hyperion.
    pub origin: String,
    /// Hyperion priority channel.
    pub priority: i32,
    #[serde(alias = "sendTimeoutMs")]
    pub send_timeout_ms: u64,
    #[serde(alias = "readTimeoutMs")]
    pub read_timeout_ms: u64,
    #[serde(alias = "vertexShader")]
    pub vertex_shader: Option<PathBuf>,
    #[serde(alias = "fragmentShader")]
    pub fragment_shader: Option<PathBuf>,
}

impl Default for GrabberConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::AMBIENT,
            fps: DEFAULT_FPS,
            address: None,
            port: DEFAULT_PORT,
            origin: "webos".to_owned(),
            priority: 150,
            send_timeout_ms: 150,
            read_timeout_ms: 100,
            vertex_shader: None,
            fragment_shader: None,
        }
    }
}

impl GrabberConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.resolution.is_valid() {
            return Err(ConfigError::InvalidResolution(self.resolution));
        }
        if self.fps > MAX_FPS {
            return Err(ConfigError::FpsOutOfRange(self.fps));
        }
        match self.address.as_deref() {
            Some(addr) if !addr.trim().is_empty() => Ok(()),
            _ => Err(ConfigError::MissingAddress),
        }
    }

    /// Minimum interval between accepted frames, in microseconds.
    pub fn frame_delay_us(&self) -> u64 {
        if self.fps == 0 {
            0
        } else {
            1_000_000 / self.fps as u64
        }
    }
}
