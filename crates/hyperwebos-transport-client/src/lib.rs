//! hyperwebos-transport-client: delivery of composited frames to Hyperion.
//!
//! # Architecture
//!
//! ```text
//! CapturePipeline ── StreamSink::set_image ──► ImageSender ─┐
//!                                                            ├─ TCP ──► Hyperion
//! main wait loop  ◄── ReplyReader::read_reply ──────────────┘
//! ```
//!
//! Both halves share one TCP connection to Hyperion's flatbuffers server.
//! Connecting registers the origin and priority; each frame is one raw RGB
//! image request. Closing the sender shuts the socket down, which ends the
//! reader with [`TransportError::ConnectionClosed`].
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use hyperwebos_transport_client::{HyperionClient, HyperionOptions, StreamSink};
//!
//! let options = HyperionOptions::default();
//! let client = HyperionClient::connect("192.168.1.100", 19400, options).unwrap();
//! let (mut sender, mut replies) = client.split().unwrap();
//! sender.set_image(&[0u8; 192 * 108 * 3], 192, 108).unwrap();
//! let _ = replies.read_reply();
//! ```

pub mod hyperion;
mod proto;

pub use hyperion::{HyperionClient, HyperionOptions, ImageSender, ReplyReader};
pub use proto::Reply;

use hyperwebos_core::TransportError;

// ── StreamSink ────────────────────────────────────────────────────────────────

/// Destination for composited frames.
///
/// `set_image` blocks for at most the sink's own timeout. Any error means the
/// connection is gone.
pub trait StreamSink: Send {
    /// `rgb` is packed RGB, `width * height * 3` bytes, only valid for the
    /// duration of the call.
    fn set_image(&mut self, rgb: &[u8], width: u32, height: u32) -> Result<(), TransportError>;

    /// Tear the connection down. Calling it again is a no-op.
    fn close(&mut self);
}
