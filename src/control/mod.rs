//! Control plane module - role negotiation before a channel exists.
//!
//! The control plane exchanges two reserved ASCII frames directly over the
//! transport. After negotiation, all traffic is application frames.
//!
//! # Workflow
//!
//! 1. Both peers listen on the same medium
//! 2. One peer's local trigger sends `init-con`
//! 3. The other peer answers `init-ack` and binds as Acceptor
//! 4. The triggering peer binds as Initiator and holds the token
//! 5. Framed, turn-taking communication begins
//!
//! # Example
//!
//! ```
//! use turnlink::control::{Handshake, HandshakeAction, HandshakeState};
//! use turnlink::protocol::{ControlFrame, Role};
//!
//! let mut initiator = Handshake::default();
//! let mut acceptor = Handshake::default();
//!
//! let HandshakeAction::Transmit(con) = initiator.trigger() else { unreachable!() };
//! let HandshakeAction::Bind { role, reply: Some(ack) } = acceptor.on_control(con) else {
//!     unreachable!()
//! };
//! assert_eq!(role, Role::Acceptor);
//! assert_eq!(ack, ControlFrame::InitAck);
//!
//! initiator.on_control(ack);
//! assert_eq!(initiator.state(), HandshakeState::Bound(Role::Initiator));
//! ```

mod handshake;

pub use handshake::{
    Handshake, HandshakeAction, HandshakeConfig, HandshakeState, DEFAULT_MAX_BACKOFF,
    DEFAULT_RESPONSE_TIMEOUT,
};
