use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::EngineIoConfig;
use crate::payload::PayloadError;
use crate::sid::Sid;

/// Probe frame sent by the client to start the upgrade handshake.
pub(crate) const PROBE_REQUEST: &str = "2probe";
/// Probe frame answered by the server.
pub(crate) const PROBE_RESPONSE: &str = "3probe";
/// Final frame sent by the client once its pending poll has drained.
pub(crate) const UPGRADE_REQUEST: &str = "5";
/// Response body acknowledging a polling write.
pub(crate) const OK_RESPONSE: &str = "ok";

/// A unit of protocol data moving through a session.
///
/// The wire type byte is an ascii digit in `0..=6`; [`Packet::Heartbeat`] is
/// internal to the polling flusher and never crosses the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Opens a session; carries the serialized handshake json.
    Open(Bytes),
    /// Closes a session.
    Close,
    /// Keepalive request.
    Ping,
    /// Keepalive answer. `slot` is a transport-local hint: the sequence
    /// number of the poll request this pong answers, when there is one.
    Pong { slot: Option<u64> },
    /// Application data.
    Message(Bytes),
    /// Completes the polling to websocket transition.
    Upgrade,
    /// Flushes a pending poll without carrying data.
    Noop,
    /// Internal flusher pacing marker, consumed before encoding.
    Heartbeat,
}

impl Packet {
    /// Wire byte for the packet type, or `None` for the internal heartbeat.
    pub(crate) fn type_byte(&self) -> Option<u8> {
        match self {
            Packet::Open(_) => Some(b'0'),
            Packet::Close => Some(b'1'),
            Packet::Ping => Some(b'2'),
            Packet::Pong { .. } => Some(b'3'),
            Packet::Message(_) => Some(b'4'),
            Packet::Upgrade => Some(b'5'),
            Packet::Noop => Some(b'6'),
            Packet::Heartbeat => None,
        }
    }

    pub(crate) fn payload(&self) -> &[u8] {
        match self {
            Packet::Open(data) | Packet::Message(data) => data,
            _ => &[],
        }
    }

    /// Build a packet from its wire type byte and payload.
    pub(crate) fn from_type_byte(byte: u8, payload: Bytes) -> Result<Self, PayloadError> {
        match byte {
            b'0' => Ok(Packet::Open(payload)),
            b'1' => Ok(Packet::Close),
            b'2' => Ok(Packet::Ping),
            b'3' => Ok(Packet::Pong { slot: None }),
            b'4' => Ok(Packet::Message(payload)),
            b'5' => Ok(Packet::Upgrade),
            b'6' => Ok(Packet::Noop),
            _ => Err(PayloadError::UnknownType),
        }
    }

    /// Decode a single websocket text frame: `<typeByte><payload>`.
    pub(crate) fn decode_frame(frame: &str) -> Result<Self, PayloadError> {
        let bytes = frame.as_bytes();
        match bytes.split_first() {
            Some((byte, payload)) => {
                Packet::from_type_byte(*byte, Bytes::copy_from_slice(payload))
            }
            None => Err(PayloadError::ShortRead),
        }
    }

    /// Encode to a single websocket text frame, or `None` when the packet
    /// has no wire form or is not valid utf-8.
    pub(crate) fn encode_frame(&self) -> Option<String> {
        let type_byte = self.type_byte()?;
        let mut frame = Vec::with_capacity(1 + self.payload().len());
        frame.push(type_byte);
        frame.extend_from_slice(self.payload());
        String::from_utf8(frame).ok()
    }
}

/// The payload of an [`Packet::Open`]: what the server tells a fresh session
/// about itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenPacket {
    sid: Sid,
    upgrades: Vec<String>,
    ping_interval: u64,
    ping_timeout: u64,
}

impl OpenPacket {
    pub(crate) fn new(sid: Sid, config: &EngineIoConfig) -> Self {
        OpenPacket {
            sid,
            upgrades: config.upgrades.clone(),
            ping_interval: config.ping_interval.as_millis() as u64,
            ping_timeout: config.ping_timeout.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_packet_serialize() {
        let sid = Sid::new();
        let open = OpenPacket::new(sid, &EngineIoConfig::default());
        let json = serde_json::to_string(&open).unwrap();
        assert_eq!(
            json,
            format!(
                "{{\"sid\":\"{sid}\",\"upgrades\":[\"websocket\"],\"pingInterval\":25000,\"pingTimeout\":60000}}"
            )
        );
    }

    #[test]
    fn message_frame_roundtrip() {
        let packet = Packet::Message(Bytes::from_static(b"hello"));
        assert_eq!(packet.encode_frame().unwrap(), "4hello");
        assert_eq!(Packet::decode_frame("4hello").unwrap(), packet);
    }

    #[test]
    fn control_frames() {
        assert_eq!(Packet::Close.encode_frame().unwrap(), "1");
        assert_eq!(Packet::Pong { slot: None }.encode_frame().unwrap(), "3");
        assert_eq!(Packet::Noop.encode_frame().unwrap(), "6");
        assert_eq!(Packet::decode_frame("2").unwrap(), Packet::Ping);
        assert_eq!(Packet::decode_frame("5").unwrap(), Packet::Upgrade);
    }

    #[test]
    fn heartbeat_has_no_wire_form() {
        assert_eq!(Packet::Heartbeat.type_byte(), None);
        assert!(Packet::Heartbeat.encode_frame().is_none());
    }

    #[test]
    fn invalid_frames() {
        assert_eq!(
            Packet::decode_frame("9oops").unwrap_err(),
            PayloadError::UnknownType
        );
        assert_eq!(
            Packet::decode_frame("").unwrap_err(),
            PayloadError::ShortRead
        );
    }
}
