//! Wire format constants, roles and raw chunk classification.
//!
//! Two kinds of bytes travel over the shared medium:
//!
//! ```text
//! control frame (pre-channel):   init-con | init-ack
//! application frame:             ┌─────────┬──────────────────┬────┐
//!                                │ role tag│ JSON array       │ \n │
//!                                │ 3 bytes │ compact, no '\n' │    │
//!                                └─────────┴──────────────────┴────┘
//! ```
//!
//! Every raw chunk is classified into a [`WireChunk`] before it is
//! dispatched, so the negotiator and the frame buffer never look at
//! character positions themselves.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Length of the role tag that prefixes every application frame.
pub const TAG_LEN: usize = 3;

/// Frame terminator. Compact JSON never contains an unescaped line feed.
pub const TERMINATOR: u8 = b'\n';

/// First byte of the serialized batch (JSON array opener).
pub const BATCH_OPEN: u8 = b'[';

/// Default maximum size of a single reassembled frame (64 KiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Role tag written by the Initiator.
pub const INITIATOR_TAG: &[u8; TAG_LEN] = b"con";

/// Role tag written by the Acceptor.
pub const ACCEPTOR_TAG: &[u8; TAG_LEN] = b"ack";

/// Control frame sent by the side that starts negotiation.
pub const INIT_CON: &[u8] = b"init-con";

/// Control frame sent by the side that answers negotiation.
pub const INIT_ACK: &[u8] = b"init-ack";

/// A peer's fixed identity on the channel.
///
/// Assigned once by the handshake and never changed afterwards. A peer
/// that has not finished negotiating has no role (`Option<Role>::None`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Sent `init-con` and received `init-ack`. Starts with the token.
    Initiator,
    /// Received `init-con` and answered `init-ack`.
    Acceptor,
}

impl Role {
    /// The 3-byte tag this role writes in front of its frames.
    #[inline]
    pub fn tag(self) -> &'static [u8; TAG_LEN] {
        match self {
            Role::Initiator => INITIATOR_TAG,
            Role::Acceptor => ACCEPTOR_TAG,
        }
    }

    /// Look up a role by its tag.
    pub fn from_tag(tag: &[u8]) -> Option<Role> {
        match tag {
            t if t == INITIATOR_TAG => Some(Role::Initiator),
            t if t == ACCEPTOR_TAG => Some(Role::Acceptor),
            _ => None,
        }
    }

    /// The other side of the channel.
    #[inline]
    pub fn peer(self) -> Role {
        match self {
            Role::Initiator => Role::Acceptor,
            Role::Acceptor => Role::Initiator,
        }
    }

    /// Whether this role holds the token when the channel is created.
    #[inline]
    pub fn starts_with_token(self) -> bool {
        matches!(self, Role::Initiator)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => f.write_str("initiator"),
            Role::Acceptor => f.write_str("acceptor"),
        }
    }
}

/// Reserved control frames exchanged before a channel exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFrame {
    /// `init-con`: "I want to open a channel".
    InitCon,
    /// `init-ack`: "I accept, you are the Initiator".
    InitAck,
}

impl ControlFrame {
    /// Raw ASCII bytes placed on the medium.
    #[inline]
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            ControlFrame::InitCon => INIT_CON,
            ControlFrame::InitAck => INIT_ACK,
        }
    }

    /// Parse a whole receive event as a control frame.
    ///
    /// Only an exact match counts; control frames are never fragmented
    /// or padded.
    pub fn parse(data: &[u8]) -> Option<ControlFrame> {
        if data == INIT_CON {
            Some(ControlFrame::InitCon)
        } else if data == INIT_ACK {
            Some(ControlFrame::InitAck)
        } else {
            None
        }
    }
}

/// Classification of a raw receive event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireChunk {
    /// An exact control frame.
    Control(ControlFrame),
    /// The leading chunk of an application frame written by `Role`.
    FrameStart(Role),
    /// Anything else: a continuation fragment, noise, or garbage.
    Other,
}

/// Classify a raw receive event.
pub fn classify(data: &[u8]) -> WireChunk {
    if let Some(control) = ControlFrame::parse(data) {
        return WireChunk::Control(control);
    }

    if data.len() > TAG_LEN && data[TAG_LEN] == BATCH_OPEN {
        if let Some(role) = Role::from_tag(&data[..TAG_LEN]) {
            return WireChunk::FrameStart(role);
        }
    }

    WireChunk::Other
}
