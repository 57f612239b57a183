//! In-memory broadcast medium.
//!
//! Models the shared air between two (or more) stations: every
//! transmission is heard by every attached station, optionally including
//! the sender itself, and is cut into fixed-size fragments the way a
//! modem splits a payload into frames. Every transmission is logged so
//! tests can check who talked when.
//!
//! # Example
//!
//! ```
//! use turnlink::transport::{MediumConfig, SharedMedium, Transport, TransportEvent};
//! use bytes::Bytes;
//!
//! let medium = SharedMedium::new(MediumConfig::default());
//! let (mut a, _a_rx) = medium.attach();
//! let (_b, mut b_rx) = medium.attach();
//!
//! a.send(Bytes::from_static(b"init-con")).unwrap();
//! assert_eq!(
//!     b_rx.try_recv().unwrap(),
//!     TransportEvent::Received(Bytes::from_static(b"init-con"))
//! );
//! assert_eq!(medium.transmissions().len(), 1);
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::mpsc;

use super::{Inbound, Transport, TransportEvent};
use crate::error::{Result, TurnlinkError};
use crate::protocol::INIT_CON;

/// Smallest fragment size; control frames must never be split.
const MIN_FRAGMENT_SIZE: usize = INIT_CON.len();

/// Behaviour of a [`SharedMedium`].
#[derive(Debug, Clone)]
pub struct MediumConfig {
    /// Deliver each transmission back to its sender too.
    pub echo: bool,
    /// Split transmissions into fragments of at most this many bytes.
    /// `None` delivers each transmission as one event.
    pub fragment_size: Option<usize>,
}

impl Default for MediumConfig {
    fn default() -> Self {
        Self {
            echo: true,
            fragment_size: None,
        }
    }
}

/// One logged transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    /// Station that transmitted.
    pub station: usize,
    /// Full payload, before fragmentation.
    pub payload: Bytes,
    /// Whether the transmission was suppressed (station muted).
    pub lost: bool,
}

struct Listener {
    station: usize,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

struct MediumInner {
    config: MediumConfig,
    listeners: Vec<Listener>,
    muted: Vec<usize>,
    log: Vec<Transmission>,
}

/// Broadcast medium shared by all attached stations.
#[derive(Clone)]
pub struct SharedMedium {
    inner: Arc<Mutex<MediumInner>>,
}

impl SharedMedium {
    /// Create an empty medium.
    pub fn new(config: MediumConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MediumInner {
                config,
                listeners: Vec::new(),
                muted: Vec::new(),
                log: Vec::new(),
            })),
        }
    }

    /// Attach a new station and return its send and receive halves.
    pub fn attach(&self) -> (Station, Inbound) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let station = inner.listeners.len();
        inner.listeners.push(Listener { station, tx });

        (
            Station {
                id: station,
                medium: self.clone(),
            },
            rx,
        )
    }

    /// Broadcast bytes that no station sent (noise, garbage, stray frames).
    pub fn inject(&self, payload: Bytes) {
        let inner = self.lock();
        for listener in &inner.listeners {
            let _ = listener.tx.send(TransportEvent::Received(payload.clone()));
        }
    }

    /// Report a demodulation failure to one station.
    pub fn fail_receive(&self, station: usize, failures: u64) {
        let inner = self.lock();
        if let Some(listener) = inner.listeners.iter().find(|l| l.station == station) {
            let _ = listener.tx.send(TransportEvent::ReceiveFailed { failures });
        }
    }

    /// Mute or unmute a station. Transmissions of a muted station are
    /// logged as lost and reach nobody.
    pub fn set_muted(&self, station: usize, muted: bool) {
        let mut inner = self.lock();
        inner.muted.retain(|&s| s != station);
        if muted {
            inner.muted.push(station);
        }
    }

    /// Snapshot of every transmission so far.
    pub fn transmissions(&self) -> Vec<Transmission> {
        self.lock().log.clone()
    }

    fn transmit(&self, station: usize, payload: Bytes) {
        let mut inner = self.lock();
        let lost = inner.muted.contains(&station);
        inner.log.push(Transmission {
            station,
            payload: payload.clone(),
            lost,
        });

        if lost {
            tracing::trace!(station, len = payload.len(), "transmission lost");
            return;
        }

        let fragments = fragment(&payload, inner.config.fragment_size);
        for listener in &inner.listeners {
            if listener.station == station && !inner.config.echo {
                continue;
            }
            for fragment in &fragments {
                let _ = listener
                    .tx
                    .send(TransportEvent::Received(fragment.clone()));
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, MediumInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn fragment(payload: &Bytes, fragment_size: Option<usize>) -> Vec<Bytes> {
    let Some(size) = fragment_size else {
        return vec![payload.clone()];
    };
    let size = size.max(MIN_FRAGMENT_SIZE);

    let mut fragments = Vec::with_capacity(payload.len() / size + 1);
    let mut offset = 0;
    while offset < payload.len() {
        let end = (offset + size).min(payload.len());
        fragments.push(payload.slice(offset..end));
        offset = end;
    }
    fragments
}

/// A station's send half on a [`SharedMedium`].
pub struct Station {
    id: usize,
    medium: SharedMedium,
}

impl Station {
    /// Station identifier, as recorded in [`Transmission::station`].
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }
}

impl Transport for Station {
    fn send(&mut self, payload: Bytes) -> Result<()> {
        if payload.is_empty() {
            return Err(TurnlinkError::Protocol("empty transmission".into()));
        }
        self.medium.transmit(self.id, payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut Inbound) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_broadcast_with_echo() {
        let medium = SharedMedium::new(MediumConfig::default());
        let (mut a, mut a_rx) = medium.attach();
        let (_b, mut b_rx) = medium.attach();

        a.send(Bytes::from_static(b"con[1]\n")).unwrap();

        assert_eq!(drain(&mut a_rx).len(), 1);
        assert_eq!(drain(&mut b_rx).len(), 1);
    }

    #[test]
    fn test_no_echo() {
        let config = MediumConfig {
            echo: false,
            ..Default::default()
        };
        let medium = SharedMedium::new(config);
        let (mut a, mut a_rx) = medium.attach();
        let (_b, mut b_rx) = medium.attach();

        a.send(Bytes::from_static(b"hello")).unwrap();

        assert!(drain(&mut a_rx).is_empty());
        assert_eq!(drain(&mut b_rx).len(), 1);
    }

    #[test]
    fn test_fragmentation() {
        let config = MediumConfig {
            echo: false,
            fragment_size: Some(8),
        };
        let medium = SharedMedium::new(config);
        let (mut a, _a_rx) = medium.attach();
        let (_b, mut b_rx) = medium.attach();

        a.send(Bytes::from_static(b"con[\"0123456789\"]\n")).unwrap();

        let events = drain(&mut b_rx);
        assert_eq!(events.len(), 3);
        let mut joined = Vec::new();
        for event in events {
            match event {
                TransportEvent::Received(bytes) => {
                    assert!(bytes.len() <= 8);
                    joined.extend_from_slice(&bytes);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(joined, b"con[\"0123456789\"]\n");
    }

    #[test]
    fn test_fragment_size_never_splits_control_frames() {
        let fragments = fragment(&Bytes::from_static(b"init-ack"), Some(2));
        assert_eq!(fragments, vec![Bytes::from_static(b"init-ack")]);
    }

    #[test]
    fn test_muted_station_is_logged_but_lost() {
        let medium = SharedMedium::new(MediumConfig::default());
        let (mut a, _a_rx) = medium.attach();
        let (_b, mut b_rx) = medium.attach();

        medium.set_muted(a.id(), true);
        a.send(Bytes::from_static(b"init-con")).unwrap();
        assert!(drain(&mut b_rx).is_empty());

        medium.set_muted(a.id(), false);
        a.send(Bytes::from_static(b"init-con")).unwrap();
        assert_eq!(drain(&mut b_rx).len(), 1);

        let log = medium.transmissions();
        assert_eq!(log.len(), 2);
        assert!(log[0].lost);
        assert!(!log[1].lost);
    }

    #[test]
    fn test_inject_and_fail_receive() {
        let medium = SharedMedium::new(MediumConfig::default());
        let (_a, mut a_rx) = medium.attach();

        medium.inject(Bytes::from_static(b"\x00noise"));
        medium.fail_receive(0, 3);

        assert_eq!(
            drain(&mut a_rx),
            vec![
                TransportEvent::Received(Bytes::from_static(b"\x00noise")),
                TransportEvent::ReceiveFailed { failures: 3 },
            ]
        );
        assert!(medium.transmissions().is_empty());
    }

    #[test]
    fn test_empty_send_rejected() {
        let medium = SharedMedium::new(MediumConfig::default());
        let (mut a, _a_rx) = medium.attach();
        assert!(a.send(Bytes::new()).is_err());
    }
}
