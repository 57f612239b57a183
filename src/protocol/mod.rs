//! Protocol module - wire format, framing, and reassembly.
//!
//! This module implements the application framing used once a channel is
//! bound:
//! - 3-byte role tag + JSON array + line-feed terminator
//! - Reassembly of frames delivered in arbitrary fragments
//! - Classification of raw chunks (control frame, frame start, other)

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{encode_frame, Batch, Frame};
pub use frame_buffer::{FrameBuffer, FrameEvent};
pub use wire_format::{
    classify, ControlFrame, Role, WireChunk, ACCEPTOR_TAG, BATCH_OPEN, DEFAULT_MAX_FRAME_SIZE,
    INITIATOR_TAG, INIT_ACK, INIT_CON, TAG_LEN, TERMINATOR,
};
