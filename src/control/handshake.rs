//! Role negotiation over the raw medium.
//!
//! Before a channel exists the peers exchange two reserved control
//! frames. The side whose local trigger fires first sends `init-con`; a
//! side that hears `init-con` while idle answers `init-ack` and becomes
//! the Acceptor; the triggering side becomes the Initiator when it hears
//! `init-ack`.
//!
//! ```text
//!   Idle ──trigger──► InitiationSent ──init-ack──► Bound(Initiator)
//!    │ ▲                    │
//!    │ └──backoff elapsed───┘ (retry: ack timeout, then random backoff)
//!    └──init-con (reply init-ack)──► Bound(Acceptor)
//! ```
//!
//! A peer cannot tell its own `init-con` echo from the other peer's, so a
//! peer in `InitiationSent` ignores `init-con`. When both sides trigger at
//! the same time neither hears `init-ack`; both time out and fall back to
//! `Idle` for a random backoff. The side whose backoff expires first sends
//! `init-con` again and is accepted by the side still listening.
//!
//! [`Handshake`] is pure: it reports what to transmit and when a role is
//! bound. The peer task owns the timers.

use std::time::Duration;

use rand::Rng;

use crate::error::{Result, TurnlinkError};
use crate::protocol::{ControlFrame, Role};

/// Default time to wait for `init-ack` after sending `init-con`.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Default upper bound of the random backoff before retrying.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Negotiation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Listening; no role yet.
    Idle,
    /// Sent `init-con`, waiting for `init-ack`.
    InitiationSent,
    /// Negotiation finished.
    Bound(Role),
}

/// What the peer task must do after feeding an input to the negotiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeAction {
    /// Nothing to do.
    Ignore,
    /// Put a control frame on the medium.
    Transmit(ControlFrame),
    /// A role is bound; optionally answer first.
    Bind {
        role: Role,
        reply: Option<ControlFrame>,
    },
}

/// Retry behaviour of the negotiator.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// How long to wait for `init-ack`. `None` waits forever and never
    /// retries.
    pub response_timeout: Option<Duration>,
    /// Upper bound of the random backoff before re-sending `init-con`.
    pub max_backoff: Duration,
    /// Maximum number of `init-con` transmissions. `None` is unlimited.
    pub max_attempts: Option<u32>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            response_timeout: Some(DEFAULT_RESPONSE_TIMEOUT),
            max_backoff: DEFAULT_MAX_BACKOFF,
            max_attempts: None,
        }
    }
}

/// Two-party role negotiator.
#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
    /// Number of `init-con` frames sent so far.
    attempts: u32,
    /// A retry is scheduled after the current backoff.
    retry_pending: bool,
    config: HandshakeConfig,
}

impl Handshake {
    /// Create an idle negotiator.
    pub fn new(config: HandshakeConfig) -> Self {
        Self {
            state: HandshakeState::Idle,
            attempts: 0,
            retry_pending: false,
            config,
        }
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Number of `init-con` frames sent so far.
    #[inline]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Retry configuration.
    #[inline]
    pub fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    /// Local trigger: start negotiating as the would-be Initiator.
    ///
    /// Ignored unless idle.
    pub fn trigger(&mut self) -> HandshakeAction {
        if self.state != HandshakeState::Idle {
            tracing::debug!(state = ?self.state, "ignoring local trigger");
            return HandshakeAction::Ignore;
        }

        self.send_init()
    }

    /// Feed a control frame received from the medium.
    pub fn on_control(&mut self, frame: ControlFrame) -> HandshakeAction {
        match (self.state, frame) {
            (HandshakeState::Idle, ControlFrame::InitCon) => {
                self.state = HandshakeState::Bound(Role::Acceptor);
                self.retry_pending = false;
                HandshakeAction::Bind {
                    role: Role::Acceptor,
                    reply: Some(ControlFrame::InitAck),
                }
            }
            (HandshakeState::InitiationSent, ControlFrame::InitAck) => {
                self.state = HandshakeState::Bound(Role::Initiator);
                HandshakeAction::Bind {
                    role: Role::Initiator,
                    reply: None,
                }
            }
            // Our init-ack was lost and the Initiator is retrying.
            (HandshakeState::Bound(Role::Acceptor), ControlFrame::InitCon) => {
                tracing::debug!("re-acknowledging repeated init-con");
                HandshakeAction::Transmit(ControlFrame::InitAck)
            }
            (state, frame) => {
                tracing::trace!(?state, ?frame, "ignoring control frame");
                HandshakeAction::Ignore
            }
        }
    }

    /// No `init-ack` arrived within the response timeout.
    ///
    /// Falls back to listening and returns the random backoff to wait
    /// before [`retry`](Self::retry). `Ok(None)` means the timeout no
    /// longer applies (already bound or idle).
    ///
    /// # Errors
    ///
    /// Returns [`TurnlinkError::HandshakeExhausted`] when the attempt
    /// budget is spent.
    pub fn on_response_timeout(&mut self) -> Result<Option<Duration>> {
        if self.state != HandshakeState::InitiationSent {
            return Ok(None);
        }

        self.state = HandshakeState::Idle;

        if let Some(max) = self.config.max_attempts {
            if self.attempts >= max {
                return Err(TurnlinkError::HandshakeExhausted {
                    attempts: self.attempts,
                });
            }
        }

        self.retry_pending = true;
        let backoff = random_backoff(self.config.max_backoff);
        tracing::debug!(
            attempts = self.attempts,
            ?backoff,
            "no init-ack, backing off before retry"
        );
        Ok(Some(backoff))
    }

    /// The backoff elapsed: re-send `init-con` unless we were accepted
    /// in the meantime.
    pub fn retry(&mut self) -> HandshakeAction {
        if !self.retry_pending || self.state != HandshakeState::Idle {
            return HandshakeAction::Ignore;
        }

        self.retry_pending = false;
        self.send_init()
    }

    fn send_init(&mut self) -> HandshakeAction {
        self.state = HandshakeState::InitiationSent;
        self.attempts += 1;
        HandshakeAction::Transmit(ControlFrame::InitCon)
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new(HandshakeConfig::default())
    }
}

fn random_backoff(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    rand::thread_rng().gen_range(Duration::ZERO..=max)
}
