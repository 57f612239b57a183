//! Consumer-facing channel handle.
//!
//! A [`Channel`] exists once the handshake has bound a role. It offers:
//! - `send` - enqueue a message; it leaves with the next frame this peer
//!   is allowed to transmit
//! - `on_message` - set the handler for decoded, in-order messages
//! - `role` - the negotiated role
//!
//! # Example
//!
//! ```ignore
//! let channel = peer.connected().await?;
//! let replies = channel.sender();
//! channel.on_message(move |msg| {
//!     // Enqueued synchronously: leaves with the very next frame.
//!     let _ = replies.send(&serde_json::json!({ "echo": msg }));
//! })?;
//! channel.send(&"hello")?;
//! ```
//!
//! Messages that arrive before a handler is set are dropped. Liveness is
//! the consumer's job: the token only comes back when the other side
//! sends something, so a protocol on top must always reply (or send
//! keep-alives) to avoid a stall.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Result, TurnlinkError};
use crate::protocol::Role;

/// Handler invoked for each decoded message, in order.
pub type MessageHandler = Box<dyn FnMut(Value) + Send + 'static>;

/// Input to the peer task from local handles.
pub(crate) enum Command {
    /// Local trigger for the handshake.
    Initiate,
    /// Append a message to the outbound queue.
    Enqueue(Value),
    /// Replace the message handler.
    SetHandler(MessageHandler),
}

/// Token and counter snapshot published by the peer task.
#[derive(Debug, Default)]
pub(crate) struct PeerStatus {
    pub(crate) holds_token: AtomicBool,
    pub(crate) queued: AtomicUsize,
    pub(crate) receive_failures: AtomicU64,
}

/// Cheap, cloneable handle for enqueueing messages.
///
/// Safe to move into a message handler to reply from inside it.
#[derive(Clone)]
pub struct ChannelSender {
    tx: mpsc::UnboundedSender<Command>,
}

impl ChannelSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Command>) -> Self {
        Self { tx }
    }

    /// Serialize `message` and enqueue it.
    ///
    /// Never blocks. Messages enqueued in the same tick travel in the
    /// same frame.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<()> {
        let value = serde_json::to_value(message)?;
        self.send_value(value)
    }

    /// Enqueue an already-built JSON value.
    pub fn send_value(&self, message: Value) -> Result<()> {
        self.tx
            .send(Command::Enqueue(message))
            .map_err(|_| TurnlinkError::ConnectionClosed)
    }
}

/// The negotiated logical connection to the other peer.
pub struct Channel {
    role: Role,
    sender: ChannelSender,
    status: Arc<PeerStatus>,
}

impl Channel {
    pub(crate) fn new(role: Role, sender: ChannelSender, status: Arc<PeerStatus>) -> Self {
        Self {
            role,
            sender,
            status,
        }
    }

    /// Negotiated role of this peer.
    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Serialize `message` and enqueue it.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<()> {
        self.sender.send(message)
    }

    /// Enqueue an already-built JSON value.
    pub fn send_value(&self, message: Value) -> Result<()> {
        self.sender.send_value(message)
    }

    /// Get a cloneable sender, e.g. to reply from inside a handler.
    pub fn sender(&self) -> ChannelSender {
        self.sender.clone()
    }

    /// Set the handler for incoming messages, replacing any previous one.
    ///
    /// The handler runs on the peer task. Messages it sends before
    /// returning are transmitted together with the frame that answers
    /// the one being handled.
    pub fn on_message<F>(&self, handler: F) -> Result<()>
    where
        F: FnMut(Value) + Send + 'static,
    {
        self.sender
            .tx
            .send(Command::SetHandler(Box::new(handler)))
            .map_err(|_| TurnlinkError::ConnectionClosed)
    }

    /// Forward incoming messages into an unbounded receiver.
    ///
    /// Convenience for async consumers; replaces any handler.
    pub fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<Value>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.on_message(move |msg| {
            let _ = tx.send(msg);
        })?;
        Ok(rx)
    }

    /// Whether this peer currently holds the token.
    #[inline]
    pub fn holds_token(&self) -> bool {
        self.status.holds_token.load(Ordering::Acquire)
    }

    /// Number of messages waiting for the token.
    #[inline]
    pub fn queued(&self) -> usize {
        self.status.queued.load(Ordering::Acquire)
    }
}
