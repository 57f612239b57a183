//! # turnlink
//!
//! Ordered, message-oriented channel between exactly two peers over a
//! shared half-duplex medium (one that garbles simultaneous transmissions
//! and delivers payloads in arbitrary fragments).
//!
//! ## Architecture
//!
//! - **Control Plane**: `init-con` / `init-ack` handshake that decides who
//!   is the Initiator and who is the Acceptor
//! - **Data Plane**: role-tagged, line-terminated JSON batches, sent one
//!   turn at a time; receiving the peer's frame hands the turn back
//!
//! ## Example
//!
//! ```no_run
//! use turnlink::transport::{MediumConfig, SharedMedium};
//! use turnlink::Peer;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> turnlink::Result<()> {
//!     let medium = SharedMedium::new(MediumConfig::default());
//!     let (a_station, a_inbound) = medium.attach();
//!     let (b_station, b_inbound) = medium.attach();
//!
//!     let alice = Peer::builder().start(a_station, a_inbound);
//!     let bob = Peer::builder().start(b_station, b_inbound);
//!
//!     alice.initiate()?;
//!     let alice = alice.connected().await?;
//!     let bob = bob.connected().await?;
//!
//!     let replies = bob.sender();
//!     bob.on_message(move |msg| {
//!         let _ = replies.send(&msg);
//!     })?;
//!
//!     let mut echoes = alice.subscribe()?;
//!     alice.send(&"hello")?;
//!     assert_eq!(echoes.recv().await.unwrap(), "hello");
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod control;
pub mod error;
pub mod protocol;
pub mod scheduler;
pub mod transport;

mod peer;

pub use channel::{Channel, ChannelSender, MessageHandler};
pub use error::{Result, TurnlinkError};
pub use peer::{Peer, PeerBuilder, PeerConfig};
pub use protocol::Role;
