//! Wire framing.
//!
//! There is no length prefix and no delimiter: whatever one receive call
//! returns is one frame. Senders keep each payload at or under the peer's
//! receive capacity. Three control sentinels travel in-band, each the tag
//! text wrapped in `0x06` bytes:
//!
//! ```text
//! 0x06 "_ASM_" 0x06        shell -> host   list loaded resources
//! 0x06 "_INTERRUPT_" 0x06  shell -> host   cancel the running evaluation
//! 0x06 "_NONO_" 0x06       host -> shell   command produced no value
//! ```

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;

/// Byte wrapped around sentinel tags.
pub const TAG_MARKER: u8 = 0x06;

/// Port both sides use unless configured otherwise.
pub const DEFAULT_PORT: u16 = 5448;

/// Bytes the host reads per receive.
pub const HOST_RECV_CAPACITY: usize = 4096;

/// Bytes the shell reads per receive.
pub const CLIENT_RECV_CAPACITY: usize = 8192;

/// Separator between identities in a resource list reply.
pub const RESOURCE_SEPARATOR: char = ';';

const ASM: &[u8] = b"\x06_ASM_\x06";
const INTERRUPT: &[u8] = b"\x06_INTERRUPT_\x06";
const NO_VALUE: &[u8] = b"\x06_NONO_\x06";

/// Out-of-band control messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sentinel {
    /// Request for the host's loaded resource list.
    Asm,
    /// Request to cancel the in-flight evaluation.
    Interrupt,
    /// Reply for a command that completed without a value.
    NoValue,
}

impl Sentinel {
    /// Encoded frame bytes.
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Sentinel::Asm => ASM,
            Sentinel::Interrupt => INTERRUPT,
            Sentinel::NoValue => NO_VALUE,
        }
    }

    /// Decode an exact sentinel frame.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            ASM => Some(Sentinel::Asm),
            INTERRUPT => Some(Sentinel::Interrupt),
            NO_VALUE => Some(Sentinel::NoValue),
            _ => None,
        }
    }
}

/// One received frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A control sentinel.
    Sentinel(Sentinel),
    /// Command text (to the host) or reply text (to the shell).
    Text(String),
}

impl Frame {
    /// Classify a payload. Only an exact byte match is a sentinel; anything
    /// else is text, decoded lossily.
    pub fn classify(bytes: &[u8]) -> Self {
        match Sentinel::from_bytes(bytes) {
            Some(sentinel) => Frame::Sentinel(sentinel),
            None => Frame::Text(String::from_utf8_lossy(bytes).into_owned()),
        }
    }
}

/// Fail if `payload` would not arrive in one receive of `capacity` bytes.
pub fn check_frame_size(payload: &[u8], capacity: usize) -> Result<(), ProtocolError> {
    if payload.len() > capacity {
        return Err(ProtocolError::FrameTooLarge {
            len: payload.len(),
            capacity,
        });
    }
    Ok(())
}

/// Join resource identities into a list reply body.
pub fn join_resource_list<S: AsRef<str>>(identities: &[S]) -> String {
    let mut body = String::new();
    for (i, identity) in identities.iter().enumerate() {
        if i != 0 {
            body.push(RESOURCE_SEPARATOR);
        }
        body.push_str(identity.as_ref());
    }
    body
}

/// Split a list reply body into identities. An empty body is an empty list.
pub fn split_resource_list(body: &str) -> Vec<String> {
    if body.is_empty() {
        return Vec::new();
    }
    body.split(RESOURCE_SEPARATOR).map(str::to_string).collect()
}

/// Reads one frame per receive call.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a stream, reading at most `capacity` bytes per frame.
    pub fn new(inner: R, capacity: usize) -> Self {
        Self {
            inner,
            buf: vec![0; capacity.max(1)],
        }
    }

    /// Bytes read per receive.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Receive one raw frame. `None` on EOF.
    pub async fn read_raw(&mut self) -> Result<Option<&[u8]>, ProtocolError> {
        let n = self.inner.read(&mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(&self.buf[..n]))
    }

    /// Receive and classify one frame. `None` on EOF.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Ok(self.read_raw().await?.map(Frame::classify))
    }
}

/// Writes whole frames.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap a stream.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write `payload` as one frame.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        self.inner.write_all(payload).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Write a sentinel frame.
    pub async fn send_sentinel(&mut self, sentinel: Sentinel) -> Result<(), ProtocolError> {
        self.send(sentinel.as_bytes()).await
    }

    /// Write a text frame.
    pub async fn send_text(&mut self, text: &str) -> Result<(), ProtocolError> {
        self.send(text.as_bytes()).await
    }

    /// Shut down the write half.
    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
