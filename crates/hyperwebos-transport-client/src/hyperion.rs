//! Hyperion flatbuffers image client.
//!
//! # Wire format
//!
//! Length-prefixed flatbuffers in both directions (see [`crate::proto`]).
//!
//! ```text
//! → [len BE u32] Request{ Register{ origin:"webos", priority:150 } }   once, on connect
//! ← [len BE u32] Reply{ registered:150 }
//! → [len BE u32] Request{ Image{ RawImage{ data:RGB, width, height } } }   per frame
//! ← [len BE u32] Reply{ }
//! ```

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use flatbuffers::FlatBufferBuilder;
use hyperwebos_core::TransportError;
use tracing::{debug, info};

use crate::proto::{self, Reply, HEADER_LEN};
use crate::StreamSink;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Replies are a few bytes; anything this large is not a Hyperion server.
const MAX_REPLY_LEN: usize = 64 * 1024;

// ── Options ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HyperionOptions {
    /// Name shown as the source in Hyperion.
    pub origin: String,
    pub priority: i32,
    /// Upper bound for one `set_image` write.
    pub send_timeout: Duration,
    /// How long `read_reply` blocks before returning `Ok(None)`.
    pub read_timeout: Duration,
}

impl Default for HyperionOptions {
    fn default() -> Self {
        Self {
            origin: "webos".to_owned(),
            priority: 150,
            send_timeout: Duration::from_millis(150),
            read_timeout: Duration::from_millis(100),
        }
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

// ── HyperionClient ────────────────────────────────────────────────────────────

/// Connected and registered, not yet split, Hyperion session.
pub struct HyperionClient {
    stream: TcpStream,
    remote_addr: SocketAddr,
    options: HyperionOptions,
    builder: FlatBufferBuilder<'static>,
    frame: Vec<u8>,
}

impl HyperionClient {
    /// Connect and register `options.origin` at `options.priority`.
    pub fn connect(
        host: &str,
        port: u16,
        options: HyperionOptions,
    ) -> Result<Self, TransportError> {
        let remote_addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| TransportError::ConnectionFailed {
                reason: format!("resolving {host}:{port}: {e}"),
            })?
            .next()
            .ok_or_else(|| TransportError::ConnectionFailed {
                reason: format!("{host}:{port} did not resolve"),
            })?;
        let failed = |e: std::io::Error| TransportError::ConnectionFailed {
            reason: format!("{remote_addr}: {e}"),
        };

        let mut stream = TcpStream::connect_timeout(&remote_addr, CONNECT_TIMEOUT).map_err(failed)?;
        let _ = stream.set_nodelay(true);
        stream.set_write_timeout(Some(options.send_timeout)).map_err(failed)?;

        let mut builder = FlatBufferBuilder::with_capacity(1024);
        let mut frame = Vec::new();
        proto::build_register(&mut builder, &options.origin, options.priority);
        proto::frame(builder.finished_data(), &mut frame);
        stream.write_all(&frame).map_err(failed)?;
        info!(
            "Connected to Hyperion at {} as '{}' (priority {})",
            remote_addr, options.origin, options.priority
        );

        Ok(Self { stream, remote_addr, options, builder, frame })
    }

    /// Split into the frame-sending half and the reply-reading half.
    pub fn split(self) -> Result<(ImageSender, ReplyReader), TransportError> {
        let io_err = |e: std::io::Error| TransportError::ConnectionFailed { reason: e.to_string() };

        let read_half = self.stream.try_clone().map_err(io_err)?;
        read_half.set_read_timeout(Some(self.options.read_timeout)).map_err(io_err)?;

        let sender = ImageSender {
            stream: self.stream,
            remote_addr: self.remote_addr,
            send_timeout: self.options.send_timeout,
            builder: self.builder,
            frame: self.frame,
            frames_sent: 0,
            closed: false,
        };
        let reader = ReplyReader { stream: read_half, pending: Vec::new() };
        Ok((sender, reader))
    }
}

// ── ImageSender ───────────────────────────────────────────────────────────────

pub struct ImageSender {
    stream: TcpStream,
    remote_addr: SocketAddr,
    send_timeout: Duration,
    // Reused for every frame.
    builder: FlatBufferBuilder<'static>,
    frame: Vec<u8>,
    frames_sent: u64,
    closed: bool,
}

impl ImageSender {
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }
}

impl StreamSink for ImageSender {
    fn set_image(&mut self, rgb: &[u8], width: u32, height: u32) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        let expected = width as usize * height as usize * 3;
        if rgb.len() != expected {
            return Err(TransportError::Protocol {
                reason: format!(
                    "image is {} bytes, expected {} for {}x{}",
                    rgb.len(),
                    expected,
                    width,
                    height
                ),
            });
        }
        let (Ok(w), Ok(h)) = (i32::try_from(width), i32::try_from(height)) else {
            return Err(TransportError::Protocol { reason: format!("{width}x{height} too large") });
        };

        proto::build_image(&mut self.builder, rgb, w, h);
        proto::frame(self.builder.finished_data(), &mut self.frame);
        self.stream.write_all(&self.frame).map_err(|e| {
            if is_timeout(&e) {
                TransportError::Timeout { ms: self.send_timeout.as_millis() as u64 }
            } else {
                TransportError::SendFailed { reason: format!("{}: {}", self.remote_addr, e) }
            }
        })?;
        self.frames_sent += 1;

        debug!("Sent image {} {}x{} bytes={}", self.frames_sent, width, height, self.frame.len());
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!("Hyperion shutdown: {}", e);
        }
        info!("Hyperion connection to {} closed", self.remote_addr);
    }
}

impl Drop for ImageSender {
    fn drop(&mut self) {
        self.close();
    }
}

// ── ReplyReader ───────────────────────────────────────────────────────────────

pub struct ReplyReader {
    stream: TcpStream,
    // Received bytes not yet consumed as a whole message; survives timeouts.
    pending: Vec<u8>,
}

impl ReplyReader {
    /// Wait up to the read timeout for one reply.
    ///
    /// `Ok(None)` on timeout; [`TransportError::ConnectionClosed`] once the
    /// server (or our own sender half) has closed the connection.
    pub fn read_reply(&mut self) -> Result<Option<Reply>, TransportError> {
        let mut chunk = [0u8; 1024];
        loop {
            if let Some(reply) = self.take_reply()? {
                return Ok(Some(reply));
            }
            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(TransportError::ConnectionClosed),
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if is_timeout(&e) => return Ok(None),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => return Err(TransportError::ConnectionClosed),
            }
        }
    }

    fn take_reply(&mut self) -> Result<Option<Reply>, TransportError> {
        if self.pending.len() < HEADER_LEN {
            return Ok(None);
        }
        let header = [self.pending[0], self.pending[1], self.pending[2], self.pending[3]];
        let len = u32::from_be_bytes(header) as usize;
        if len > MAX_REPLY_LEN {
            return Err(TransportError::Protocol {
                reason: format!("reply of {len} bytes exceeds {MAX_REPLY_LEN}"),
            });
        }
        if self.pending.len() < HEADER_LEN + len {
            return Ok(None);
        }

        let reply = proto::parse_reply(&self.pending[HEADER_LEN..HEADER_LEN + len])
            .map_err(|e| TransportError::Protocol { reason: format!("bad reply: {e}") });
        self.pending.drain(..HEADER_LEN + len);
        reply.map(Some)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
