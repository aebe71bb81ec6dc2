use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{FrameError, Result};

/// Length field: 4 bytes, native endian.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Type tag: 1 byte.
pub const TAG_SIZE: usize = 1;

/// Default maximum payload size accepted by readers: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Default number of config headers sent with typed framing (SPS + PPS).
pub const DEFAULT_CONFIG_HEADER_LIMIT: u32 = 2;

/// Configuration shared by [`FrameWriter`](crate::FrameWriter) and
/// [`FrameReader`](crate::FrameReader).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameConfig {
    /// Wire layout.
    pub policy: FramingPolicy,
    /// Maximum payload accepted in a single message.
    pub max_payload_size: usize,
    /// Typed framing only: config headers beyond this count are suppressed.
    pub config_header_limit: u32,
    /// Read timeout applied by `with_config_conn`.
    pub read_timeout: Option<Duration>,
    /// Write timeout applied by `with_config_conn`.
    pub write_timeout: Option<Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            policy: FramingPolicy::default(),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            config_header_limit: DEFAULT_CONFIG_HEADER_LIMIT,
            read_timeout: Some(Duration::from_secs(3)),
            write_timeout: Some(Duration::from_secs(3)),
        }
    }
}

impl FrameConfig {
    pub fn with_policy(policy: FramingPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }
}

/// How logical frames are laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FramingPolicy {
    /// Payload bytes only; the consumer finds frame boundaries itself.
    Raw,
    /// `[u32 length][payload]` per frame and per config header.
    #[default]
    LengthPrefixed,
    /// `[u8 type]` followed by a type-specific body.
    Typed,
}

impl FramingPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            FramingPolicy::Raw => "raw",
            FramingPolicy::LengthPrefixed => "length-prefixed",
            FramingPolicy::Typed => "typed",
        }
    }
}

impl fmt::Display for FramingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FramingPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "raw" => Ok(FramingPolicy::Raw),
            "length-prefixed" => Ok(FramingPolicy::LengthPrefixed),
            "typed" => Ok(FramingPolicy::Typed),
            other => Err(format!("unknown framing policy: {other}")),
        }
    }
}

/// Type tags of the typed (multiplexed) wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// `[tag][len][width u32][height u32]`
    CurrentResolution = 0,
    /// `[tag][len][frame bytes]`
    RegularFrame = 1,
    /// `[tag][score u8]`
    MotionInFrame = 2,
    /// `[tag]`
    MotionAlarm = 3,
    /// `[tag][len][SPS/PPS bytes]`
    ConfigHeader = 4,
}

impl MessageType {
    /// Whether the tag is followed by a length field and payload.
    pub fn carries_payload(self) -> bool {
        matches!(
            self,
            MessageType::CurrentResolution | MessageType::RegularFrame | MessageType::ConfigHeader
        )
    }
}

impl TryFrom<u8> for MessageType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(MessageType::CurrentResolution),
            1 => Ok(MessageType::RegularFrame),
            2 => Ok(MessageType::MotionInFrame),
            3 => Ok(MessageType::MotionAlarm),
            4 => Ok(MessageType::ConfigHeader),
            other => Err(FrameError::UnknownMessageType(other)),
        }
    }
}

/// A decoded stream message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    ConfigHeader(Bytes),
    RegularFrame(Bytes),
    MotionInFrame(u8),
    MotionAlarm,
    CurrentResolution { width: u32, height: u32 },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::ConfigHeader(_) => MessageType::ConfigHeader,
            Message::RegularFrame(_) => MessageType::RegularFrame,
            Message::MotionInFrame(_) => MessageType::MotionInFrame,
            Message::MotionAlarm => MessageType::MotionAlarm,
            Message::CurrentResolution { .. } => MessageType::CurrentResolution,
        }
    }
}

/// Append a 4-byte native-endian length.
pub fn put_length(len: usize, dst: &mut BytesMut) -> Result<()> {
    let len = u32::try_from(len).map_err(|_| FrameError::PayloadTooLarge {
        size: len,
        max: u32::MAX as usize,
    })?;
    dst.put_slice(&len.to_ne_bytes());
    Ok(())
}

/// Encode the header that precedes `payload_len` bytes of payload.
///
/// Raw framing has no header; length-prefixed framing writes the length;
/// typed framing writes the tag and, for payload-bearing types, the length.
pub fn encode_header(
    policy: FramingPolicy,
    message_type: MessageType,
    payload_len: usize,
    dst: &mut BytesMut,
) -> Result<()> {
    match policy {
        FramingPolicy::Raw => Ok(()),
        FramingPolicy::LengthPrefixed => put_length(payload_len, dst),
        FramingPolicy::Typed => {
            dst.put_u8(message_type as u8);
            if message_type.carries_payload() {
                put_length(payload_len, dst)?;
            }
            Ok(())
        }
    }
}

/// Encode a complete typed message.
///
/// Wire format:
/// ```text
/// ┌──────────┬──────────────┬──────────────────┐
/// │ Type (1B)│ Length (4B)  │ Payload          │  frame-bearing types
/// ├──────────┼──────────────┴──────────────────┘
/// │ Type (1B)│ Score (1B)                          MotionInFrame
/// ├──────────┤
/// │ Type (1B)│                                     MotionAlarm
/// └──────────┘
/// ```
pub fn encode_message(message: &Message, dst: &mut BytesMut) -> Result<()> {
    match message {
        Message::ConfigHeader(payload) | Message::RegularFrame(payload) => {
            dst.reserve(TAG_SIZE + LENGTH_PREFIX_SIZE + payload.len());
            encode_header(
                FramingPolicy::Typed,
                message.message_type(),
                payload.len(),
                dst,
            )?;
            dst.put_slice(payload);
        }
        Message::MotionInFrame(score) => {
            dst.put_u8(MessageType::MotionInFrame as u8);
            dst.put_u8(*score);
        }
        Message::MotionAlarm => dst.put_u8(MessageType::MotionAlarm as u8),
        Message::CurrentResolution { width, height } => {
            encode_header(
                FramingPolicy::Typed,
                MessageType::CurrentResolution,
                8,
                dst,
            )?;
            dst.put_slice(&width.to_ne_bytes());
            dst.put_slice(&height.to_ne_bytes());
        }
    }
    Ok(())
}

/// Decode one typed message from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete message yet.
/// On success, consumes the message bytes from the buffer.
pub fn decode_message(src: &mut BytesMut, max_payload: usize) -> Result<Option<Message>> {
    if src.is_empty() {
        return Ok(None);
    }

    let message_type = MessageType::try_from(src[0])?;
    match message_type {
        MessageType::MotionAlarm => {
            src.advance(TAG_SIZE);
            Ok(Some(Message::MotionAlarm))
        }
        MessageType::MotionInFrame => {
            if src.len() < TAG_SIZE + 1 {
                return Ok(None);
            }
            let score = src[1];
            src.advance(TAG_SIZE + 1);
            Ok(Some(Message::MotionInFrame(score)))
        }
        _ => {
            let Some(payload) = split_prefixed(src, TAG_SIZE, max_payload)? else {
                return Ok(None);
            };
            let message = match message_type {
                MessageType::ConfigHeader => Message::ConfigHeader(payload),
                MessageType::RegularFrame => Message::RegularFrame(payload),
                _ => decode_resolution(&payload)?,
            };
            Ok(Some(message))
        }
    }
}

/// Decode one `[u32 length][payload]` unit from a buffer.
pub fn decode_length_prefixed(src: &mut BytesMut, max_payload: usize) -> Result<Option<Bytes>> {
    split_prefixed(src, 0, max_payload)
}

fn split_prefixed(src: &mut BytesMut, offset: usize, max_payload: usize) -> Result<Option<Bytes>> {
    let header = offset + LENGTH_PREFIX_SIZE;
    if src.len() < header {
        return Ok(None);
    }

    let mut len_bytes = [0u8; LENGTH_PREFIX_SIZE];
    len_bytes.copy_from_slice(&src[offset..header]);
    let payload_len = u32::from_ne_bytes(len_bytes) as usize;

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    if src.len() < header + payload_len {
        return Ok(None);
    }

    src.advance(header);
    Ok(Some(src.split_to(payload_len).freeze()))
}

fn decode_resolution(payload: &[u8]) -> Result<Message> {
    if payload.len() != 8 {
        return Err(FrameError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("resolution payload must be 8 bytes, got {}", payload.len()),
        )));
    }
    let mut width = [0u8; 4];
    let mut height = [0u8; 4];
    width.copy_from_slice(&payload[..4]);
    height.copy_from_slice(&payload[4..]);
    Ok(Message::CurrentResolution {
        width: u32::from_ne_bytes(width),
        height: u32::from_ne_bytes(height),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_frame_layout() {
        let mut buf = BytesMut::new();
        encode_message(&Message::RegularFrame(Bytes::from_static(b"abc")), &mut buf).unwrap();

        assert_eq!(buf[0], MessageType::RegularFrame as u8);
        assert_eq!(&buf[1..5], &3u32.to_ne_bytes());
        assert_eq!(&buf[5..], b"abc");
    }

    #[test]
    fn motion_and_alarm_layout() {
        let mut buf = BytesMut::new();
        encode_message(&Message::MotionInFrame(42), &mut buf).unwrap();
        encode_message(&Message::MotionAlarm, &mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[2, 42, 3]);
    }

    #[test]
    fn decode_typed_sequence() {
        let mut buf = BytesMut::new();
        let config = Message::ConfigHeader(Bytes::from_static(&[0, 0, 0, 1, 0x67]));
        let frame = Message::RegularFrame(Bytes::from(vec![7u8; 300]));
        let resolution = Message::CurrentResolution {
            width: 1280,
            height: 720,
        };
        for message in [&config, &frame, &Message::MotionInFrame(9), &Message::MotionAlarm, &resolution] {
            encode_message(message, &mut buf).unwrap();
        }

        let decoded: Vec<Message> = std::iter::from_fn(|| {
            decode_message(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap()
        })
        .collect();

        assert_eq!(
            decoded,
            vec![config, frame, Message::MotionInFrame(9), Message::MotionAlarm, resolution]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_waits_for_complete_message() {
        let mut full = BytesMut::new();
        encode_message(&Message::RegularFrame(Bytes::from_static(b"hello")), &mut full).unwrap();

        let mut partial = BytesMut::from(&full[..3]);
        assert!(decode_message(&mut partial, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
        let mut partial = BytesMut::from(&full[..7]);
        assert!(decode_message(&mut partial, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
        assert_eq!(partial.len(), 7, "incomplete input must not be consumed");

        let mut motion = BytesMut::from(&[MessageType::MotionInFrame as u8][..]);
        assert!(decode_message(&mut motion, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
    }

    #[test]
    fn decode_rejects_unknown_tag_and_oversized_payload() {
        let mut unknown = BytesMut::from(&[0x7Fu8, 0, 0][..]);
        assert!(matches!(
            decode_message(&mut unknown, DEFAULT_MAX_PAYLOAD),
            Err(FrameError::UnknownMessageType(0x7F))
        ));

        let mut oversized = BytesMut::new();
        oversized.put_u8(MessageType::RegularFrame as u8);
        oversized.put_slice(&1024u32.to_ne_bytes());
        assert!(matches!(
            decode_message(&mut oversized, 16),
            Err(FrameError::PayloadTooLarge { size: 1024, max: 16 })
        ));
    }

    #[test]
    fn length_prefixed_header_only_for_payload_types() {
        let mut buf = BytesMut::new();
        encode_header(FramingPolicy::LengthPrefixed, MessageType::RegularFrame, 5, &mut buf).unwrap();
        assert_eq!(buf.as_ref(), &5u32.to_ne_bytes());

        let mut raw = BytesMut::new();
        encode_header(FramingPolicy::Raw, MessageType::RegularFrame, 5, &mut raw).unwrap();
        assert!(raw.is_empty());

        let mut typed = BytesMut::new();
        encode_header(FramingPolicy::Typed, MessageType::MotionAlarm, 0, &mut typed).unwrap();
        assert_eq!(typed.as_ref(), &[MessageType::MotionAlarm as u8]);
    }

    #[test]
    fn framing_policy_parses_and_deserializes() {
        assert_eq!("typed".parse::<FramingPolicy>().unwrap(), FramingPolicy::Typed);
        assert!("bogus".parse::<FramingPolicy>().is_err());
        let policy: FramingPolicy = serde_json::from_str("\"length-prefixed\"").unwrap();
        assert_eq!(policy, FramingPolicy::LengthPrefixed);
    }
}
