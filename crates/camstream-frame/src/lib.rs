//! Wire framing for camera streams.
//!
//! Three policies share one writer and one reader:
//!
//! ```text
//! Raw             payload bytes, no delimiter
//! LengthPrefixed  [u32 len][payload]
//! Typed           [u8 type][u32 len][payload] | [type][score] | [type]
//! ```
//!
//! Lengths are native endian. Typed tags: `CurrentResolution = 0`,
//! `RegularFrame = 1`, `MotionInFrame = 2`, `MotionAlarm = 3`,
//! `ConfigHeader = 4`.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_length_prefixed, decode_message, encode_header, encode_message, FrameConfig,
    FramingPolicy, Message, MessageType, DEFAULT_CONFIG_HEADER_LIMIT, DEFAULT_MAX_PAYLOAD,
    LENGTH_PREFIX_SIZE, TAG_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
