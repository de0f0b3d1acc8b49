//! Codec for the polling payload format: one or more frames of the form
//! `<len>:<typeByte><payload>`, abutting with no separator, where `<len>` is
//! the decimal byte length of `<typeByte><payload>`.

use bytes::{BufMut, Bytes, BytesMut};
use memchr::memchr;

use crate::packet::Packet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("short read")]
    ShortRead,
    #[error("ignoring payload")]
    IgnoringPayload,
    #[error("unknown packet type")]
    UnknownType,
    #[error("malformed packet")]
    Malformed,
}

/// Decode a polling payload into its packets.
///
/// Packet payloads are slices of the input buffer, no per-frame copies are
/// made. Empty input and zero-length frames are rejected.
pub(crate) fn decode(data: &Bytes) -> Result<Vec<Packet>, PayloadError> {
    let mut packets = Vec::new();
    let mut pos = 0;

    loop {
        let rest = &data[pos..];
        let colon = memchr(b':', rest).ok_or(PayloadError::ShortRead)?;
        let len: usize = std::str::from_utf8(&rest[..colon])
            .ok()
            .and_then(|prefix| prefix.parse().ok())
            .ok_or(PayloadError::IgnoringPayload)?;
        if len == 0 {
            return Err(PayloadError::Malformed);
        }

        let frame = pos + colon + 1;
        if data.len() - frame < len {
            return Err(PayloadError::Malformed);
        }
        packets.push(Packet::from_type_byte(
            data[frame],
            data.slice(frame + 1..frame + len),
        )?);

        pos = frame + len;
        if pos == data.len() {
            return Ok(packets);
        }
    }
}

/// Encode a packet into `buf` as a length-prefixed polling frame, wrapped in
/// a jsonp callback invocation when an index is given.
pub(crate) fn encode(packet: &Packet, jsonp: Option<u32>, buf: &mut BytesMut) {
    let Some(type_byte) = packet.type_byte() else {
        debug_assert!(false, "heartbeat packets are transport internal");
        return;
    };
    let payload = packet.payload();
    let len = payload.len() + 1;

    match jsonp {
        None => {
            buf.extend_from_slice(len.to_string().as_bytes());
            buf.put_u8(b':');
            buf.put_u8(type_byte);
            buf.extend_from_slice(payload);
        }
        Some(index) => {
            let mut frame = Vec::with_capacity(len + 8);
            frame.extend_from_slice(len.to_string().as_bytes());
            frame.push(b':');
            frame.push(type_byte);
            frame.extend_from_slice(payload);

            buf.extend_from_slice(format!("___eio[{index}](\"").as_bytes());
            push_js_escaped(buf, &frame);
            buf.extend_from_slice(b"\");");
        }
    }
}

/// Append `frame` as the inside of a javascript string literal: quote,
/// backslash and control bytes are escaped.
fn push_js_escaped(buf: &mut BytesMut, frame: &[u8]) {
    for &byte in frame {
        match byte {
            b'"' => buf.extend_from_slice(b"\\\""),
            b'\\' => buf.extend_from_slice(b"\\\\"),
            b'\n' => buf.extend_from_slice(b"\\n"),
            b'\r' => buf.extend_from_slice(b"\\r"),
            b'\t' => buf.extend_from_slice(b"\\t"),
            0x00..=0x1f => buf.extend_from_slice(format!("\\u{byte:04x}").as_bytes()),
            _ => buf.put_u8(byte),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_str(data: &str) -> Result<Vec<Packet>, PayloadError> {
        decode(&Bytes::copy_from_slice(data.as_bytes()))
    }

    fn encode_one(packet: &Packet, jsonp: Option<u32>) -> String {
        let mut buf = BytesMut::new();
        encode(packet, jsonp, &mut buf);
        String::from_utf8(buf.to_vec()).unwrap()
    }

    #[test]
    fn decode_single_message() {
        let packets = decode_str("8:4aaaaaaa").unwrap();
        assert_eq!(
            packets,
            vec![Packet::Message(Bytes::from_static(b"aaaaaaa"))]
        );
    }

    #[test]
    fn decode_multiple_frames() {
        let packets = decode_str("8:4aaaaaaa10:4xxxxxxxxx4:2bbb").unwrap();
        assert_eq!(
            packets,
            vec![
                Packet::Message(Bytes::from_static(b"aaaaaaa")),
                Packet::Message(Bytes::from_static(b"xxxxxxxxx")),
                Packet::Ping,
            ]
        );
    }

    #[test]
    fn decode_json_payload() {
        let packets = decode_str("15:4{\"test\":\"aaa\"}").unwrap();
        assert_eq!(
            packets,
            vec![Packet::Message(Bytes::from_static(b"{\"test\":\"aaa\"}"))]
        );
    }

    #[test]
    fn decode_rejects_short_payload() {
        assert_eq!(decode_str("8:4aaa").unwrap_err(), PayloadError::Malformed);
    }

    #[test]
    fn decode_rejects_trailing_junk() {
        // the first frame leaves a remainder with no colon
        assert_eq!(
            decode_str("2:4aaaaaaaaaa").unwrap_err(),
            PayloadError::ShortRead
        );
    }

    #[test]
    fn decode_rejects_length_past_remainder() {
        assert_eq!(
            decode_str("8:4aaa34:4aaa").unwrap_err(),
            PayloadError::ShortRead
        );
        assert_eq!(decode_str("3:4").unwrap_err(), PayloadError::Malformed);
        assert_eq!(
            decode_str("3:4::::::::::").unwrap_err(),
            PayloadError::IgnoringPayload
        );
    }

    #[test]
    fn decode_rejects_empty_input() {
        assert_eq!(decode_str("").unwrap_err(), PayloadError::ShortRead);
    }

    #[test]
    fn decode_rejects_zero_length() {
        assert_eq!(decode_str("0:4abc").unwrap_err(), PayloadError::Malformed);
    }

    #[test]
    fn decode_rejects_missing_colon() {
        assert_eq!(decode_str("4hello").unwrap_err(), PayloadError::ShortRead);
    }

    #[test]
    fn decode_rejects_non_numeric_length() {
        assert_eq!(
            decode_str("x:4hello").unwrap_err(),
            PayloadError::IgnoringPayload
        );
        assert_eq!(
            decode_str(":4hello").unwrap_err(),
            PayloadError::IgnoringPayload
        );
    }

    #[test]
    fn decode_rejects_unknown_type() {
        assert_eq!(decode_str("2:9a").unwrap_err(), PayloadError::UnknownType);
    }

    #[test]
    fn encode_message() {
        let packet = Packet::Message(Bytes::from_static(b"hello"));
        assert_eq!(encode_one(&packet, None), "6:4hello");
    }

    #[test]
    fn encode_control_frames() {
        assert_eq!(encode_one(&Packet::Pong { slot: None }, None), "1:3");
        assert_eq!(encode_one(&Packet::Noop, None), "1:6");
    }

    #[test]
    fn encode_jsonp() {
        let packet = Packet::Message(Bytes::from_static(b"hello"));
        assert_eq!(
            encode_one(&packet, Some(0)),
            "___eio[0](\"6:4hello\");"
        );
    }

    #[test]
    fn encode_jsonp_escapes() {
        let packet = Packet::Message(Bytes::from_static(b"a\"b\\c\nd"));
        assert_eq!(
            encode_one(&packet, Some(3)),
            "___eio[3](\"8:4a\\\"b\\\\c\\nd\");"
        );
    }

    #[test]
    fn roundtrip() {
        let frames = vec![
            Packet::Message(Bytes::from_static(b"hello")),
            Packet::Ping,
            Packet::Pong { slot: None },
            Packet::Message(Bytes::from_static(b"{\"a\":1}")),
            Packet::Noop,
        ];
        let mut buf = BytesMut::new();
        for frame in &frames {
            encode(frame, None, &mut buf);
        }
        let decoded = decode(&buf.freeze()).unwrap();
        assert_eq!(decoded, frames);
    }
}
