//! Property-based tests for frame reassembly.
//!
//! These tests verify the framing invariants:
//! - Any batch survives encode then reassembly unchanged
//! - Reassembly does not depend on how the medium fragments a frame
//! - Frames written by our own role (echoes) are never delivered and leave
//!   no partial frame behind
//! - Noise never leaves a partial frame behind

use proptest::prelude::*;
use serde_json::Value;
use turnlink::protocol::{encode_frame, FrameBuffer, FrameEvent, Role};

/// Smallest first fragment that still identifies a frame (tag + '[').
const MIN_FIRST_CHUNK: usize = 4;

fn message() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        "\\PC{0,40}".prop_map(Value::from),
        // Strings that carry a role tag followed by '[', as a frame start does.
        "\\PC{0,8}(con|ack)\\[\\PC{0,16}".prop_map(Value::from),
        Just(Value::Null),
        prop::collection::vec(any::<u16>(), 0..4).prop_map(Value::from),
    ]
}

fn batch() -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec(message(), 1..8)
}

fn role() -> impl Strategy<Value = Role> {
    prop_oneof![Just(Role::Initiator), Just(Role::Acceptor)]
}

/// Cut `data` into chunks of the given sizes (cycled), keeping the first
/// chunk long enough to carry the frame start.
fn fragment(data: &[u8], sizes: &[usize]) -> Vec<Vec<u8>> {
    let mut chunks = Vec::new();
    let mut offset = 0;
    let mut i = 0;
    while offset < data.len() {
        let mut size = sizes[i % sizes.len()];
        if offset == 0 {
            size = size.max(MIN_FIRST_CHUNK);
        }
        let end = (offset + size).min(data.len());
        chunks.push(data[offset..end].to_vec());
        offset = end;
        i += 1;
    }
    chunks
}

proptest! {
    /// A whole frame pushed at once yields exactly the sent batch.
    #[test]
    fn prop_whole_frame_round_trips(writer in role(), batch in batch()) {
        let bytes = encode_frame(writer, &batch).unwrap();
        let mut buffer = FrameBuffer::new(writer);

        match buffer.push(&bytes) {
            FrameEvent::Complete(frame) => {
                prop_assert_eq!(frame.role, writer);
                prop_assert_eq!(frame.batch, batch);
            }
            other => prop_assert!(false, "expected complete frame, got {:?}", other),
        }
        prop_assert!(buffer.is_empty());
    }

    /// Every fragmentation of a frame reassembles to the same batch, and
    /// only the final fragment completes it.
    /// The first fragment always carries the tag and '[', since a shorter
    /// leading chunk cannot be recognized as a frame start.
    #[test]
    fn prop_fragmentation_is_transparent(
        writer in role(),
        batch in batch(),
        sizes in prop::collection::vec(1usize..16, 1..8),
    ) {
        let bytes = encode_frame(writer, &batch).unwrap();
        let chunks = fragment(&bytes, &sizes);
        let mut buffer = FrameBuffer::new(writer);

        let (last, head) = chunks.split_last().unwrap();
        for chunk in head {
            prop_assert_eq!(buffer.push(chunk), FrameEvent::Incomplete);
            prop_assert!(buffer.in_progress());
        }
        match buffer.push(last) {
            FrameEvent::Complete(frame) => prop_assert_eq!(frame.batch, batch),
            other => prop_assert!(false, "expected complete frame, got {:?}", other),
        }
        prop_assert!(!buffer.in_progress());
    }

    /// Our own frames come back as echoes on a broadcast medium. A string
    /// containing the peer's tag and '[' may open a reassembly mid-echo,
    /// but the echo's terminator always ends it without a delivery.
    #[test]
    fn prop_own_echo_is_never_delivered(
        writer in role(),
        batch in batch(),
        sizes in prop::collection::vec(1usize..16, 1..8),
    ) {
        let bytes = encode_frame(writer, &batch).unwrap();
        let mut buffer = FrameBuffer::new(writer.peer());

        for chunk in fragment(&bytes, &sizes) {
            let event = buffer.push(&chunk);
            prop_assert!(
                !matches!(event, FrameEvent::Complete(_)),
                "echo delivered: {:?}",
                event
            );
        }
        prop_assert!(buffer.is_empty());
    }

    /// Noise that does not open a frame is dropped without state.
    #[test]
    fn prop_noise_leaves_buffer_empty(
        expected in role(),
        noise in prop::collection::vec(any::<u8>(), 1..64),
    ) {
        let mut noise = noise;
        noise.insert(0, b'#');
        let mut buffer = FrameBuffer::new(expected);

        prop_assert_eq!(buffer.push(&noise), FrameEvent::Unrecognized);
        prop_assert!(buffer.is_empty());
    }

    /// Noise between two frames does not disturb the second one.
    #[test]
    fn prop_frame_after_noise_is_delivered(
        writer in role(),
        batch in batch(),
        noise in prop::collection::vec(any::<u8>(), 1..32),
    ) {
        let mut buffer = FrameBuffer::new(writer);
        let mut noise = noise;
        noise.insert(0, 0);
        buffer.push(&noise);

        let bytes = encode_frame(writer, &batch).unwrap();
        match buffer.push(&bytes) {
            FrameEvent::Complete(frame) => prop_assert_eq!(frame.batch, batch),
            other => prop_assert!(false, "expected complete frame, got {:?}", other),
        }
    }
}
