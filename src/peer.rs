//! Peer builder and runtime loop.
//!
//! The [`PeerBuilder`] configures negotiation and framing limits. The
//! [`Peer`] owns one task that drives the whole protocol for this side:
//! 1. Listen on the transport
//! 2. Negotiate a role (local trigger or remote `init-con`)
//! 3. Bind the channel: scheduler + reassembly buffer for the peer's role
//! 4. Exchange framed batches, one turn at a time
//!
//! All protocol state lives in that single task, so nothing is locked.
//! Consumer calls and transport events reach it over channels; the task
//! yields once before every flush so that sends issued in the same tick
//! (including replies from inside a message handler) share one frame.
//!
//! # Example
//!
//! ```no_run
//! use turnlink::transport::{MediumConfig, SharedMedium};
//! use turnlink::Peer;
//!
//! # async fn run() -> turnlink::Result<()> {
//! let medium = SharedMedium::new(MediumConfig::default());
//! let (station, inbound) = medium.attach();
//!
//! let peer = Peer::builder().start(station, inbound);
//! peer.initiate()?;
//!
//! let channel = peer.connected().await?;
//! let mut messages = channel.subscribe()?;
//! channel.send(&"hello")?;
//! while let Some(msg) = messages.recv().await {
//!     println!("received: {}", msg);
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::channel::{Channel, ChannelSender, Command, MessageHandler, PeerStatus};
use crate::control::{Handshake, HandshakeAction, HandshakeConfig};
use crate::error::{Result, TurnlinkError};
use crate::protocol::{
    classify, Batch, ControlFrame, Frame, FrameBuffer, FrameEvent, Role, WireChunk,
    DEFAULT_MAX_FRAME_SIZE,
};
use crate::scheduler::TurnScheduler;
use crate::transport::{Inbound, Transport, TransportEvent};

/// Full configuration of a peer.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Negotiation retry behaviour.
    pub handshake: HandshakeConfig,
    /// Largest frame accepted by the reassembly buffer.
    pub max_frame_size: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            handshake: HandshakeConfig::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Builder for configuring and starting a peer.
#[derive(Debug, Clone, Default)]
pub struct PeerBuilder {
    config: PeerConfig,
}

impl PeerBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// How long to wait for `init-ack` before backing off and retrying.
    ///
    /// `None` disables retries. Default: 3 seconds
    pub fn handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.handshake.response_timeout = timeout;
        self
    }

    /// Upper bound of the random backoff between attempts.
    ///
    /// Default: 2 seconds
    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.config.handshake.max_backoff = backoff;
        self
    }

    /// Give up after this many `init-con` transmissions.
    ///
    /// Default: unlimited
    pub fn max_handshake_attempts(mut self, attempts: u32) -> Self {
        self.config.handshake.max_attempts = Some(attempts);
        self
    }

    /// Set the maximum reassembled frame size.
    ///
    /// Default: 64KB
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: PeerConfig) -> Self {
        self.config = config;
        self
    }

    /// Start the peer task on the given transport.
    ///
    /// Must be called from within a tokio runtime. The peer listens
    /// immediately and binds as Acceptor if it hears `init-con` before
    /// [`Peer::initiate`] is called.
    pub fn start<T: Transport>(self, transport: T, inbound: Inbound) -> Peer {
        Peer::start(self.config, transport, inbound)
    }
}

/// Negotiation progress published by the peer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Negotiating,
    Bound(Role),
    Failed { attempts: u32 },
}

/// A running peer.
pub struct Peer {
    /// Command queue into the peer task.
    commands: mpsc::UnboundedSender<Command>,
    /// Negotiation progress.
    link: watch::Receiver<LinkState>,
    /// Token and counters.
    status: Arc<PeerStatus>,
    /// Peer task handle.
    _task: JoinHandle<()>,
}

impl Peer {
    /// Create a new peer builder.
    pub fn builder() -> PeerBuilder {
        PeerBuilder::new()
    }

    fn start<T: Transport>(config: PeerConfig, transport: T, inbound: Inbound) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (link_tx, link_rx) = watch::channel(LinkState::Negotiating);
        let status = Arc::new(PeerStatus::default());

        let task = PeerTask {
            transport,
            inbound,
            commands: commands_rx,
            handshake: Handshake::new(config.handshake),
            max_frame_size: config.max_frame_size,
            bound: None,
            handler: None,
            timer: None,
            link: link_tx,
            status: status.clone(),
        };

        let handle = tokio::spawn(async move {
            if let Err(e) = task.run().await {
                tracing::error!("Peer task error: {}", e);
            }
        });

        Peer {
            commands: commands_tx,
            link: link_rx,
            status,
            _task: handle,
        }
    }

    /// Local trigger: start negotiating as the would-be Initiator.
    ///
    /// Ignored if negotiation already started or finished.
    pub fn initiate(&self) -> Result<()> {
        self.commands
            .send(Command::Initiate)
            .map_err(|_| TurnlinkError::ConnectionClosed)
    }

    /// Negotiated role, `None` while unassigned.
    pub fn role(&self) -> Option<Role> {
        match *self.link.borrow() {
            LinkState::Bound(role) => Some(role),
            _ => None,
        }
    }

    /// Running count of transport receive failures.
    pub fn receive_failures(&self) -> u64 {
        self.status.receive_failures.load(Ordering::Acquire)
    }

    /// Wait until a role is bound and return the channel.
    ///
    /// Can be called any number of times; every call returns a handle to
    /// the same channel.
    ///
    /// # Errors
    ///
    /// [`TurnlinkError::HandshakeExhausted`] if negotiation gave up,
    /// [`TurnlinkError::ConnectionClosed`] if the peer task stopped.
    pub async fn connected(&self) -> Result<Channel> {
        let mut link = self.link.clone();
        let state = *link
            .wait_for(|state| *state != LinkState::Negotiating)
            .await
            .map_err(|_| TurnlinkError::ConnectionClosed)?;

        match state {
            LinkState::Bound(role) => Ok(Channel::new(
                role,
                ChannelSender::new(self.commands.clone()),
                self.status.clone(),
            )),
            LinkState::Failed { attempts } => Err(TurnlinkError::HandshakeExhausted { attempts }),
            LinkState::Negotiating => Err(TurnlinkError::ConnectionClosed),
        }
    }
}

/// Pending negotiation timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    /// Waiting for `init-ack`.
    AwaitAck,
    /// Random backoff before re-sending `init-con`.
    Backoff,
}

/// State that only exists once a role is bound.
struct Bound {
    scheduler: TurnScheduler,
    frames: FrameBuffer,
}

/// The single task that owns all protocol state of one peer.
struct PeerTask<T> {
    transport: T,
    inbound: Inbound,
    commands: mpsc::UnboundedReceiver<Command>,
    handshake: Handshake,
    max_frame_size: usize,
    bound: Option<Bound>,
    handler: Option<MessageHandler>,
    timer: Option<(Instant, TimerKind)>,
    link: watch::Sender<LinkState>,
    status: Arc<PeerStatus>,
}

impl<T: Transport> PeerTask<T> {
    /// Main loop - multiplexes local commands, transport events and timers.
    async fn run(mut self) -> Result<()> {
        loop {
            let deadline = self.timer.map(|(at, _)| at);

            tokio::select! {
                // Local commands first: a handler set before a frame
                // arrives must see that frame.
                biased;

                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await?,
                    None => {
                        tracing::debug!("all peer handles dropped, stopping");
                        return Ok(());
                    }
                },
                event = self.inbound.recv() => match event {
                    Some(event) => self.on_transport_event(event).await?,
                    None => {
                        tracing::warn!("transport closed, stopping peer");
                        return Ok(());
                    }
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() => self.on_timer()?,
            }
        }
    }

    /// Apply a local command, then flush after the current tick.
    async fn on_command(&mut self, command: Command) -> Result<()> {
        self.apply(command)?;

        // Let every send issued in this tick land before the flush.
        tokio::task::yield_now().await;
        self.drain_commands()?;

        let batch = self
            .bound
            .as_mut()
            .and_then(|bound| bound.scheduler.attempt_transmit());
        if let Some(batch) = batch {
            self.transmit_batch(batch)?;
        }

        self.publish_status();
        Ok(())
    }

    fn apply(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Initiate => {
                let action = self.handshake.trigger();
                self.perform(action)?;
            }
            Command::Enqueue(message) => match self.bound.as_mut() {
                Some(bound) => bound.scheduler.enqueue(message),
                None => tracing::warn!("dropping message enqueued before binding"),
            },
            Command::SetHandler(handler) => self.handler = Some(handler),
        }
        Ok(())
    }

    fn drain_commands(&mut self) -> Result<()> {
        while let Ok(command) = self.commands.try_recv() {
            self.apply(command)?;
        }
        Ok(())
    }

    async fn on_transport_event(&mut self, event: TransportEvent) -> Result<()> {
        let data = match event {
            TransportEvent::Received(data) => data,
            TransportEvent::ReceiveFailed { failures } => {
                tracing::warn!("Failed to receive ({})", failures);
                self.status
                    .receive_failures
                    .store(failures, Ordering::Release);
                return Ok(());
            }
        };

        let in_progress = self
            .bound
            .as_ref()
            .is_some_and(|bound| bound.frames.in_progress());

        // Fragments of an in-flight frame always go to the frame buffer.
        if !in_progress {
            if let WireChunk::Control(frame) = classify(&data) {
                return self.on_control(frame);
            }
        }

        let Some(bound) = self.bound.as_mut() else {
            tracing::trace!(len = data.len(), "ignoring data before binding");
            return Ok(());
        };

        match bound.frames.push(&data) {
            FrameEvent::Complete(frame) => self.on_frame(frame).await,
            FrameEvent::Incomplete | FrameEvent::Unrecognized => Ok(()),
        }
    }

    fn on_control(&mut self, frame: ControlFrame) -> Result<()> {
        let action = self.handshake.on_control(frame);
        self.perform(action)
    }

    /// Deliver a batch, then regain the token.
    async fn on_frame(&mut self, frame: Frame) -> Result<()> {
        tracing::debug!(messages = frame.len(), "received frame");

        match self.handler.as_mut() {
            Some(handler) => {
                for message in frame.batch {
                    handler(message);
                }
            }
            None => tracing::debug!("no message handler, dropping {} messages", frame.len()),
        }

        // Replies enqueued by the handler must ride on this turn.
        tokio::task::yield_now().await;
        self.drain_commands()?;

        let batch = self
            .bound
            .as_mut()
            .and_then(|bound| bound.scheduler.resume_after_receive());
        if let Some(batch) = batch {
            self.transmit_batch(batch)?;
        }

        self.publish_status();
        Ok(())
    }

    fn perform(&mut self, action: HandshakeAction) -> Result<()> {
        match action {
            HandshakeAction::Ignore => {}
            HandshakeAction::Transmit(frame) => {
                self.send_control(frame)?;
                if frame == ControlFrame::InitCon {
                    self.arm_response_timer();
                }
            }
            HandshakeAction::Bind { role, reply } => {
                if let Some(reply) = reply {
                    self.send_control(reply)?;
                }
                self.bind(role);
            }
        }
        Ok(())
    }

    fn bind(&mut self, role: Role) {
        tracing::info!(%role, attempts = self.handshake.attempts(), "channel bound");

        self.timer = None;
        self.bound = Some(Bound {
            scheduler: TurnScheduler::new(role),
            frames: FrameBuffer::with_max_frame_size(role.peer(), self.max_frame_size),
        });
        self.publish_status();
        self.link.send_replace(LinkState::Bound(role));
    }

    fn arm_response_timer(&mut self) {
        self.timer = self
            .handshake
            .config()
            .response_timeout
            .map(|timeout| (Instant::now() + timeout, TimerKind::AwaitAck));
    }

    fn on_timer(&mut self) -> Result<()> {
        let Some((_, kind)) = self.timer.take() else {
            return Ok(());
        };

        match kind {
            TimerKind::AwaitAck => match self.handshake.on_response_timeout() {
                Ok(Some(backoff)) => {
                    self.timer = Some((Instant::now() + backoff, TimerKind::Backoff));
                }
                Ok(None) => {}
                Err(e) => {
                    self.link.send_replace(LinkState::Failed {
                        attempts: self.handshake.attempts(),
                    });
                    return Err(e);
                }
            },
            TimerKind::Backoff => {
                let action = self.handshake.retry();
                self.perform(action)?;
            }
        }
        Ok(())
    }

    fn send_control(&mut self, frame: ControlFrame) -> Result<()> {
        tracing::debug!(?frame, "sending control frame");
        self.transport.send(Bytes::from_static(frame.as_bytes()))
    }

    fn transmit_batch(&mut self, batch: Batch) -> Result<()> {
        let Some(bound) = self.bound.as_ref() else {
            return Err(TurnlinkError::Protocol("transmit before binding".into()));
        };

        let frame = Frame::new(bound.scheduler.role(), batch);
        let bytes = frame.encode()?;
        tracing::debug!(messages = frame.len(), bytes = bytes.len(), "sending frame");
        self.transport.send(bytes)
    }

    fn publish_status(&self) {
        if let Some(bound) = self.bound.as_ref() {
            self.status
                .holds_token
                .store(bound.scheduler.holds_token(), Ordering::Release);
            self.status
                .queued
                .store(bound.scheduler.queued(), Ordering::Release);
        }
    }
}
