pub mod config;
pub mod errors;
pub mod types;

pub use config::GrabberConfig;
pub use errors::{CaptureError, ConfigError, GrabberError, RendererError, TransportError};
pub use types::*;
