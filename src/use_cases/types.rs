// Use-case level values shared by the broker, queues and tick loop.

use axum::extract::ws::Utf8Bytes;
use std::ops::Deref;

/// Opaque byte payload read from clients and moved through the response queue.
pub type Payload = axum::body::Bytes;

/// One encoded state snapshot on its way to every client of a broker.
///
/// The text variant is valid UTF-8 by construction, so transports can send it as
/// a WebSocket text frame without checking it per client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(Utf8Bytes),
    Binary(Payload),
}

impl Frame {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Frame::Text(text) => text.as_bytes(),
            Frame::Binary(bytes) => &bytes[..],
        }
    }
}

impl Deref for Frame {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Frame::Text(text.into())
    }
}

impl From<Payload> for Frame {
    fn from(bytes: Payload) -> Self {
        Frame::Binary(bytes)
    }
}

/// Result of a non-blocking push onto a bounded queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    // Queue was full; the new payload was discarded.
    Dropped,
    // Consumer is gone.
    Closed,
}
