//! Application frame encoding and whole-frame decoding.
//!
//! A frame carries one batch of messages written by one role:
//!
//! ```
//! use turnlink::protocol::{encode_frame, Frame, Role};
//! use serde_json::json;
//!
//! let bytes = encode_frame(Role::Initiator, &[json!(1), json!("two")]).unwrap();
//! assert_eq!(&bytes[..], b"con[1,\"two\"]\n");
//!
//! let frame = Frame::decode(&bytes).unwrap();
//! assert_eq!(frame.role, Role::Initiator);
//! assert_eq!(frame.batch, vec![json!(1), json!("two")]);
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;

use super::wire_format::{Role, BATCH_OPEN, TAG_LEN, TERMINATOR};
use crate::error::{Result, TurnlinkError};

/// An ordered group of messages transmitted together in one frame.
pub type Batch = Vec<Value>;

/// A complete, decoded application frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Role that wrote the frame.
    pub role: Role,
    /// Messages in send order.
    pub batch: Batch,
}

impl Frame {
    /// Create a new frame.
    pub fn new(role: Role, batch: Batch) -> Self {
        Self { role, batch }
    }

    /// Encode this frame into wire bytes.
    pub fn encode(&self) -> Result<Bytes> {
        encode_frame(self.role, &self.batch)
    }

    /// Decode a complete frame: tag, JSON array, terminator.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the tag or terminator is missing, and a
    /// JSON error if the body is not an array of JSON values.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < TAG_LEN + 2 || data[TAG_LEN] != BATCH_OPEN {
            return Err(TurnlinkError::Protocol(format!(
                "frame too short or missing batch opener ({} bytes)",
                data.len()
            )));
        }

        let role = Role::from_tag(&data[..TAG_LEN]).ok_or_else(|| {
            TurnlinkError::Protocol(format!(
                "unknown role tag {:?}",
                String::from_utf8_lossy(&data[..TAG_LEN])
            ))
        })?;

        let Some((&last, body)) = data[TAG_LEN..].split_last() else {
            return Err(TurnlinkError::Protocol("empty frame body".into()));
        };
        if last != TERMINATOR {
            return Err(TurnlinkError::Protocol("frame is not terminated".into()));
        }

        let batch: Batch = serde_json::from_slice(body)?;
        Ok(Self { role, batch })
    }

    /// Number of messages in the batch.
    #[inline]
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    /// Whether the batch carries no messages.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }
}

/// Encode a batch written by `role` into a single contiguous frame.
///
/// # Errors
///
/// Returns a JSON error if a message cannot be serialized.
pub fn encode_frame(role: Role, batch: &[Value]) -> Result<Bytes> {
    let body = serde_json::to_vec(batch)?;

    let mut buf = BytesMut::with_capacity(TAG_LEN + body.len() + 1);
    buf.put_slice(role.tag());
    buf.put_slice(&body);
    buf.put_u8(TERMINATOR);

    Ok(buf.freeze())
}
