//! CMP-over-TCP message framing (spec §6).
//!
//! The transport wraps every CMP PKIMessage in a fixed 7-byte header:
//! `uint32be total-length, uint8 version, uint8 lastMessage-flag, uint8
//! messageType`. Only three message types are consumed here; anything
//! else is a transport-level protocol error.

use crate::error::{CoreError, Result};

/// Fixed protocol version this transport speaks.
pub const CMP_TRANSPORT_VERSION: u8 = 10;

/// Header size in bytes: `length(4) + version(1) + lastMessage(1) +
/// messageType(1)`.
pub const HEADER_SIZE: usize = 7;

/// CMP-over-TCP message types this engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// A PKI request.
    PkiReq,
    /// A PKI response.
    PkiRep,
    /// A transport-level error report.
    ErrorMsgRep,
}

impl MessageType {
    fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(MessageType::PkiReq),
            5 => Some(MessageType::PkiRep),
            6 => Some(MessageType::ErrorMsgRep),
            _ => None,
        }
    }

    fn to_wire(self) -> u8 {
        match self {
            MessageType::PkiReq => 0,
            MessageType::PkiRep => 5,
            MessageType::ErrorMsgRep => 6,
        }
    }
}

/// A framed CMP-over-TCP message: header fields plus the PKIMessage body.
#[derive(Debug, Clone)]
pub struct FramedMessage {
    /// `true` if the sender considers this the last message of the
    /// exchange (the connection may be closed after it).
    pub last_message: bool,
    /// The message type.
    pub message_type: MessageType,
    /// The embedded PKIMessage DER bytes (or, for `ErrorMsgRep`, an
    /// implementation-defined error body — treated as opaque here).
    pub body: Vec<u8>,
}

/// Parse one framed message from `buf`. Returns `None` (not an error) if
/// `buf` doesn't yet hold a complete frame; the caller should read more
/// bytes and retry, mirroring the deenveloping consumer's underflow
/// convention.
pub fn read_frame(buf: &[u8]) -> Result<Option<(FramedMessage, usize)>> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }
    let total_length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if total_length < HEADER_SIZE {
        return Err(CoreError::bad_data("CMP frame length shorter than the header itself"));
    }
    if buf.len() < total_length {
        return Ok(None);
    }
    let version = buf[4];
    if version != CMP_TRANSPORT_VERSION {
        return Err(CoreError::bad_data(format!(
            "unsupported CMP transport version {version}"
        )));
    }
    let last_message = buf[5] != 0;
    let message_type = MessageType::from_wire(buf[6])
        .ok_or_else(|| CoreError::bad_data("CMP transport-level protocol error"))?;
    let body = buf[HEADER_SIZE..total_length].to_vec();
    Ok(Some((FramedMessage { last_message, message_type, body }, total_length)))
}

/// Serialise a framed message to its wire form.
pub fn write_frame(msg: &FramedMessage) -> Vec<u8> {
    let total_length = (HEADER_SIZE + msg.body.len()) as u32;
    let mut out = Vec::with_capacity(HEADER_SIZE + msg.body.len());
    out.extend_from_slice(&total_length.to_be_bytes());
    out.push(CMP_TRANSPORT_VERSION);
    out.push(if msg.last_message { 1 } else { 0 });
    out.push(msg.message_type.to_wire());
    out.extend_from_slice(&msg.body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips() {
        let msg = FramedMessage {
            last_message: true,
            message_type: MessageType::PkiRep,
            body: b"pkimessage-der-bytes".to_vec(),
        };
        let wire = write_frame(&msg);
        let (parsed, consumed) = read_frame(&wire).unwrap().unwrap();
        assert_eq!(consumed, wire.len());
        assert_eq!(parsed.message_type, MessageType::PkiRep);
        assert!(parsed.last_message);
        assert_eq!(parsed.body, msg.body);
    }

    #[test]
    fn incomplete_frame_requests_more_data() {
        let msg = FramedMessage {
            last_message: false,
            message_type: MessageType::PkiReq,
            body: b"hello world, this is a longer body".to_vec(),
        };
        let wire = write_frame(&msg);
        let partial = &wire[..wire.len() - 5];
        assert!(read_frame(partial).unwrap().is_none());
    }

    #[test]
    fn unrecognised_message_type_is_a_protocol_error() {
        let mut wire = write_frame(&FramedMessage {
            last_message: false,
            message_type: MessageType::PkiReq,
            body: vec![],
        });
        wire[6] = 99;
        let err = read_frame(&wire);
        assert!(err.is_err());
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut wire = write_frame(&FramedMessage {
            last_message: false,
            message_type: MessageType::PkiReq,
            body: vec![],
        });
        wire[4] = 1;
        let err = read_frame(&wire);
        assert!(err.is_err());
    }

    #[test]
    fn multiple_frames_can_be_read_back_to_back() {
        let first = write_frame(&FramedMessage {
            last_message: false,
            message_type: MessageType::PkiReq,
            body: b"one".to_vec(),
        });
        let second = write_frame(&FramedMessage {
            last_message: true,
            message_type: MessageType::PkiRep,
            body: b"two".to_vec(),
        });
        let mut combined = first.clone();
        combined.extend_from_slice(&second);

        let (msg1, consumed1) = read_frame(&combined).unwrap().unwrap();
        assert_eq!(msg1.body, b"one");
        let (msg2, consumed2) = read_frame(&combined[consumed1..]).unwrap().unwrap();
        assert_eq!(msg2.body, b"two");
        assert_eq!(consumed1 + consumed2, combined.len());
    }
}
