//! Frame codec.
//!
//! One logical message travels as a single self-delimited frame:
//!
//! ```text
//! ESC ] 1337 ; MCPanel : <base64(utf8(json))> BEL \n
//! ```
//!
//! The prefix is an OSC sequence that terminal renderers swallow, so a human
//! watching the console never sees protocol traffic. The trailing newline
//! forces line-buffered transports to deliver the frame promptly.
//!
//! # Example
//!
//! ```
//! use consolewire::protocol::frame;
//!
//! let bytes = frame::encode(&serde_json::json!({"event": "server_ready"})).unwrap();
//! assert!(bytes.starts_with(frame::PREFIX));
//!
//! let value = frame::decode(&bytes).unwrap();
//! assert_eq!(value["event"], "server_ready");
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{FrameError, Result};

/// Marker opening every frame (`ESC ] 1337 ; MCPanel :`).
pub const PREFIX: &[u8] = b"\x1b]1337;MCPanel:";

/// Terminator byte closing every frame (BEL).
pub const SUFFIX: u8 = 0x07;

/// Largest encoded frame a bridge will emit, trailing newline included.
///
/// Clients hold back an unterminated frame up to this size by default.
pub const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

/// Encode a message as a complete frame, trailing newline included.
pub fn encode<T: Serialize + ?Sized>(message: &T) -> Result<Bytes> {
    let json = serde_json::to_vec(message)?;
    let body_len = base64::encoded_len(json.len(), true).unwrap_or(json.len() * 2);

    let mut out = BytesMut::with_capacity(PREFIX.len() + body_len + 2);
    out.put_slice(PREFIX);
    out.put_slice(STANDARD.encode(&json).as_bytes());
    out.put_u8(SUFFIX);
    out.put_u8(b'\n');
    Ok(out.freeze())
}

/// Decode a frame that starts at the beginning of `bytes`.
///
/// Bytes after the suffix are ignored. Returns [`FrameError::IncompleteFrame`]
/// when the suffix has not been seen yet.
pub fn decode(bytes: &[u8]) -> std::result::Result<Value, FrameError> {
    let rest = bytes
        .strip_prefix(PREFIX)
        .ok_or_else(|| FrameError::MalformedFrame("missing frame prefix".into()))?;

    let end = rest
        .iter()
        .position(|&b| b == SUFFIX)
        .ok_or(FrameError::IncompleteFrame)?;

    decode_body(&rest[..end])
}

/// Decode and deserialize a frame into a typed message.
pub fn decode_as<T: DeserializeOwned>(bytes: &[u8]) -> std::result::Result<T, FrameError> {
    let value = decode(bytes)?;
    serde_json::from_value(value).map_err(|e| FrameError::MalformedFrame(e.to_string()))
}

/// Decode the base64 JSON body found between prefix and suffix.
pub fn decode_body(body: &[u8]) -> std::result::Result<Value, FrameError> {
    let body = body.trim_ascii();
    let json = STANDARD
        .decode(body)
        .map_err(|e| FrameError::MalformedFrame(format!("base64: {e}")))?;
    serde_json::from_slice(&json).map_err(|e| FrameError::MalformedFrame(format!("json: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_layout() {
        let bytes = encode(&json!({"id": "1", "type": "pong"})).unwrap();

        assert!(bytes.starts_with(PREFIX));
        assert_eq!(bytes[bytes.len() - 2], SUFFIX);
        assert_eq!(bytes[bytes.len() - 1], b'\n');

        let body = &bytes[PREFIX.len()..bytes.len() - 2];
        assert!(body.iter().all(|b| b.is_ascii_alphanumeric() || b"+/=".contains(b)));
    }

    #[test]
    fn test_roundtrip_nested_value() {
        let value = json!({
            "id": "abc",
            "type": "command_tree",
            "payload": {"commands": {"give": {"type": "literal", "children": {}}}},
            "unicode": "§a héllo ✓",
        });
        let bytes = encode(&value).unwrap();
        assert_eq!(decode(&bytes).unwrap(), value);
    }

    #[test]
    fn test_decode_incomplete() {
        let bytes = encode(&json!({"a": 1})).unwrap();
        let cut = &bytes[..bytes.len() - 3];
        assert_eq!(decode(cut), Err(FrameError::IncompleteFrame));
    }

    #[test]
    fn test_decode_missing_prefix() {
        let result = decode(b"plain text\x07");
        assert!(matches!(result, Err(FrameError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_bad_base64() {
        let mut raw = PREFIX.to_vec();
        raw.extend_from_slice(b"!!not base64!!\x07");
        assert!(matches!(decode(&raw), Err(FrameError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_bad_json() {
        let mut raw = PREFIX.to_vec();
        raw.extend_from_slice(STANDARD.encode(b"{not json").as_bytes());
        raw.push(SUFFIX);
        assert!(matches!(decode(&raw), Err(FrameError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_as_typed() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Pong {
            time: u64,
        }

        let bytes = encode(&json!({"time": 42})).unwrap();
        let pong: Pong = decode_as(&bytes).unwrap();
        assert_eq!(pong, Pong { time: 42 });
    }
}
