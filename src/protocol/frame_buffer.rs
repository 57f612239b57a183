//! Reassembly buffer for fragmented application frames.
//!
//! Uses `bytes::BytesMut` to accumulate the chunks of one in-flight frame.
//! Only one frame can be in flight under the turn-taking discipline, so the
//! buffer holds at most one partial frame at a time:
//! - empty: the next chunk must open a frame written by the expected role
//! - non-empty: every chunk is appended until one ends with the terminator
//!
//! # Example
//!
//! ```
//! use turnlink::protocol::{FrameBuffer, FrameEvent, Role};
//!
//! let mut buffer = FrameBuffer::new(Role::Acceptor);
//!
//! assert_eq!(buffer.push(b"ack[1,"), FrameEvent::Incomplete);
//! match buffer.push(b"2]\n") {
//!     FrameEvent::Complete(frame) => assert_eq!(frame.batch.len(), 2),
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

use bytes::BytesMut;

use super::wire_format::{classify, Role, WireChunk, DEFAULT_MAX_FRAME_SIZE, TERMINATOR};
use super::Frame;

/// Outcome of pushing one raw chunk into the buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    /// Chunk accepted, frame not finished yet.
    Incomplete,
    /// Chunk finished a frame; the buffer has been reset.
    Complete(Frame),
    /// Chunk discarded: noise, an echo of our own frames, a garbled or
    /// oversized frame.
    Unrecognized,
}

/// Buffer reassembling frames written by one expected role.
#[derive(Debug)]
pub struct FrameBuffer {
    /// Bytes of the in-progress frame.
    buffer: BytesMut,
    /// Role whose frames we accept (the remote peer's role).
    expected: Role,
    /// Maximum allowed frame size, tag and terminator included.
    max_frame_size: usize,
}

impl FrameBuffer {
    /// Create a buffer accepting frames written by `expected`.
    ///
    /// Default max frame size: 64KB.
    pub fn new(expected: Role) -> Self {
        Self::with_max_frame_size(expected, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a buffer with a custom max frame size.
    pub fn with_max_frame_size(expected: Role, max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024.min(max_frame_size)),
            expected,
            max_frame_size,
        }
    }

    /// Push one raw receive event into the buffer.
    ///
    /// A chunk is only accepted when it opens a frame written by the
    /// expected role, or when a frame is already in progress. The frame is
    /// complete when the last byte of this chunk is the terminator; a
    /// terminator anywhere else is treated as payload.
    pub fn push(&mut self, data: &[u8]) -> FrameEvent {
        if self.buffer.is_empty() {
            match classify(data) {
                WireChunk::FrameStart(role) if role == self.expected => {}
                chunk => {
                    tracing::trace!(?chunk, len = data.len(), "discarding unrecognized chunk");
                    return FrameEvent::Unrecognized;
                }
            }
        }

        if self.buffer.len() + data.len() > self.max_frame_size {
            tracing::warn!(
                "Frame exceeds maximum size {} ({} bytes buffered), resynchronizing",
                self.max_frame_size,
                self.buffer.len() + data.len()
            );
            self.clear();
            return FrameEvent::Unrecognized;
        }

        self.buffer.extend_from_slice(data);

        if data.last() != Some(&TERMINATOR) {
            return FrameEvent::Incomplete;
        }

        let frame = self.buffer.split();
        match Frame::decode(&frame) {
            Ok(frame) => FrameEvent::Complete(frame),
            Err(e) => {
                tracing::debug!("Discarding garbled frame: {}", e);
                FrameEvent::Unrecognized
            }
        }
    }

    /// Whether a frame is partially received.
    #[inline]
    pub fn in_progress(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop any partial frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
