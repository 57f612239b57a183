//! Turn-taking scheduler.
//!
//! The shared medium cannot carry two transmissions at once, so each peer
//! keeps a token that says whether it may transmit the next frame. The
//! token travels implicitly: sending a frame gives it away, receiving the
//! peer's frame gives it back.
//!
//! [`TurnScheduler`] is the pure state machine. It performs no I/O and no
//! scheduling; the peer task decides *when* to call it (after yielding, so
//! that enqueues issued in the same tick coalesce) and does the actual
//! encoding and sending of the batches it hands out.
//!
//! ```text
//!            enqueue ─┐
//!                     ▼
//!  ┌──────────────────────────┐  attempt_transmit  ┌───────────────┐
//!  │ holds_token = true       │ ─────────────────► │ token in      │
//!  │ (idle, queue empty)      │                    │ flight (false)│
//!  └──────────────────────────┘ ◄──────────────── └───────────────┘
//!                    resume_after_receive, queue empty   │  ▲
//!                                                        │  │ resume_after_receive,
//!                                                        └──┘ queue non-empty (send)
//! ```

use serde_json::Value;

use crate::protocol::{Batch, Role};

/// Per-peer token and outbound queue.
#[derive(Debug)]
pub struct TurnScheduler {
    /// Negotiated role of this peer.
    role: Role,
    /// Whether this peer may transmit the next frame.
    holds_token: bool,
    /// Messages waiting for the token.
    outbound: Batch,
}

impl TurnScheduler {
    /// Create the scheduler for a freshly bound channel.
    ///
    /// The Initiator starts with the token, the Acceptor without.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            holds_token: role.starts_with_token(),
            outbound: Vec::new(),
        }
    }

    /// Append a message to the outbound queue.
    ///
    /// Does not transmit; call [`attempt_transmit`](Self::attempt_transmit)
    /// once the current burst of enqueues is over.
    pub fn enqueue(&mut self, message: Value) {
        self.outbound.push(message);
    }

    /// Take the whole queue as one batch if this peer holds the token.
    ///
    /// Giving out a batch gives away the token. Holding the token with an
    /// empty queue keeps it.
    pub fn attempt_transmit(&mut self) -> Option<Batch> {
        if !self.holds_token || self.outbound.is_empty() {
            return None;
        }

        self.holds_token = false;
        Some(std::mem::take(&mut self.outbound))
    }

    /// Regain the token after the peer's frame has been delivered.
    ///
    /// Queued work uses the token immediately and the returned batch must
    /// be transmitted; otherwise the token is parked until the next
    /// enqueue.
    pub fn resume_after_receive(&mut self) -> Option<Batch> {
        if self.outbound.is_empty() {
            self.holds_token = true;
            return None;
        }

        self.holds_token = false;
        Some(std::mem::take(&mut self.outbound))
    }

    /// Negotiated role.
    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether this peer currently holds the token.
    #[inline]
    pub fn holds_token(&self) -> bool {
        self.holds_token
    }

    /// Number of queued messages.
    #[inline]
    pub fn queued(&self) -> usize {
        self.outbound.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_initial_token_by_role() {
        assert!(TurnScheduler::new(Role::Initiator).holds_token());
        assert!(!TurnScheduler::new(Role::Acceptor).holds_token());
    }

    #[test]
    fn test_attempt_without_token_is_noop() {
        let mut acceptor = TurnScheduler::new(Role::Acceptor);
        acceptor.enqueue(json!(1));

        assert_eq!(acceptor.attempt_transmit(), None);
        assert_eq!(acceptor.queued(), 1);
        assert!(!acceptor.holds_token());
    }

    #[test]
    fn test_attempt_with_empty_queue_keeps_token() {
        let mut initiator = TurnScheduler::new(Role::Initiator);

        assert_eq!(initiator.attempt_transmit(), None);
        assert!(initiator.holds_token());
    }

    #[test]
    fn test_enqueues_coalesce_into_one_batch() {
        let mut initiator = TurnScheduler::new(Role::Initiator);
        initiator.enqueue(json!("a"));
        initiator.enqueue(json!("b"));

        assert_eq!(
            initiator.attempt_transmit(),
            Some(vec![json!("a"), json!("b")])
        );
        assert!(!initiator.holds_token());
        assert_eq!(initiator.queued(), 0);

        // Token is gone until the peer answers.
        initiator.enqueue(json!("c"));
        assert_eq!(initiator.attempt_transmit(), None);
    }

    #[test]
    fn test_resume_parks_token_when_idle() {
        let mut acceptor = TurnScheduler::new(Role::Acceptor);

        assert_eq!(acceptor.resume_after_receive(), None);
        assert!(acceptor.holds_token());

        acceptor.enqueue(json!(42));
        assert_eq!(acceptor.attempt_transmit(), Some(vec![json!(42)]));
    }

    #[test]
    fn test_resume_sends_queued_work_immediately() {
        let mut acceptor = TurnScheduler::new(Role::Acceptor);
        acceptor.enqueue(json!("queued before turn"));
        acceptor.enqueue(json!("reply"));

        assert_eq!(
            acceptor.resume_after_receive(),
            Some(vec![json!("queued before turn"), json!("reply")])
        );
        assert!(!acceptor.holds_token());
    }

    /// Two schedulers wired back to back with an instantaneous medium.
    /// The token must never be held by both sides and never be lost.
    #[test]
    fn test_token_passes_back_and_forth() {
        let mut a = TurnScheduler::new(Role::Initiator);
        let mut b = TurnScheduler::new(Role::Acceptor);
        let mut in_flight: Option<(Role, Batch)> = None;
        let mut received_by_b = Vec::new();

        // A pattern of sends from both sides, including bursts.
        let script: &[(Role, i64)] = &[
            (Role::Initiator, 1),
            (Role::Acceptor, 100),
            (Role::Initiator, 2),
            (Role::Initiator, 3),
            (Role::Acceptor, 101),
            (Role::Initiator, 4),
            (Role::Acceptor, 102),
        ];

        for &(who, value) in script {
            let side = if who == Role::Initiator { &mut a } else { &mut b };
            side.enqueue(json!(value));
            if let Some(batch) = side.attempt_transmit() {
                assert!(in_flight.is_none(), "two frames in flight");
                in_flight = Some((who, batch));
            }
            assert!(!(a.holds_token() && b.holds_token()));

            // Deliver whatever is in flight; replies chain until idle.
            while let Some((from, batch)) = in_flight.take() {
                let receiver = if from == Role::Initiator { &mut b } else { &mut a };
                if from == Role::Initiator {
                    received_by_b.extend(batch);
                }
                if let Some(reply) = receiver.resume_after_receive() {
                    in_flight = Some((from.peer(), reply));
                }
                assert!(!(a.holds_token() && b.holds_token()));
            }

            // Quiescent: exactly one side holds the token.
            assert!(a.holds_token() ^ b.holds_token());
        }

        assert_eq!(
            received_by_b,
            vec![json!(1), json!(2), json!(3), json!(4)]
        );
    }
}
