//! Transport module - the opaque send/receive primitive under the channel.
//!
//! A transport is split in two halves:
//! - a [`Transport`] used to put a payload on the medium (fire-and-forget)
//! - an [`Inbound`] receiver of [`TransportEvent`]s, one per arriving
//!   fragment or receive failure
//!
//! Provided implementations:
//! - [`SharedMedium`] - in-memory broadcast medium (echo, fragmentation,
//!   transmission log) for simulations and tests
//! - [`StreamTransport`] - any `AsyncRead + AsyncWrite` byte stream, e.g. a
//!   serial modem or a pipe

mod medium;
mod stream;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;

pub use medium::{MediumConfig, SharedMedium, Station, Transmission};
pub use stream::{StreamTransport, DEFAULT_PACKET_SIZE, DEFAULT_READ_BUFFER_SIZE};

/// Something that happened on the receive side of a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One received fragment. A single logical send may arrive as several.
    Received(Bytes),
    /// The receiver failed to demodulate a fragment. `failures` is the
    /// adapter's running count.
    ReceiveFailed { failures: u64 },
}

/// Receive half of a transport.
pub type Inbound = mpsc::UnboundedReceiver<TransportEvent>;

/// Send half of a transport.
pub trait Transport: Send + 'static {
    /// Put one payload on the medium.
    ///
    /// Fire-and-forget: success means the payload was handed to the
    /// adapter, not that the peer received it.
    ///
    /// # Errors
    ///
    /// Returns an error if the adapter has shut down.
    fn send(&mut self, payload: Bytes) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, payload: Bytes) -> Result<()> {
        (**self).send(payload)
    }
}
