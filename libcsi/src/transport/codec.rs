//! Frame encoding shared by client and server.
//!
//! Binary format:
//! ```text
//! [len: u32 (big-endian)][JSON-encoded Frame]
//! ```

use bytes::Bytes;
use tokio_util::codec::LengthDelimitedCodec;

use crate::error::CsiError;
use crate::message::Frame;

/// Upper bound on a single frame (16 MiB).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Length-delimited codec with the transport's frame limit.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

/// Serialize a frame body.
pub fn encode_frame(frame: &Frame) -> Result<Bytes, CsiError> {
    serde_json::to_vec(frame)
        .map(Bytes::from)
        .map_err(CsiError::internal)
}

/// Deserialize a frame body.
pub fn decode_frame(buf: &[u8]) -> Result<Frame, CsiError> {
    serde_json::from_slice(buf)
        .map_err(|e| CsiError::InvalidArgument(format!("malformed frame: {e}")))
}
