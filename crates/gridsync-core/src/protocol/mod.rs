//! Protocol module containing message types, the DATA payload, the line codec and
//! the async frame reader.

pub mod codec;
pub mod framing;
pub mod messages;
pub mod payload;

pub use codec::{
    classify, decode_frame, decode_line, encode_line, encode_message, ProtocolError, MAX_LINE_BYTES,
};
pub use framing::{Frame, FrameReader};
pub use messages::*;
pub use payload::RecordPayload;
