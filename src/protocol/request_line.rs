//! Line-oriented forms that travel outside the framed console stream.
//!
//! Requests enter the bridge through the process input as a single line:
//!
//! ```text
//! ///mcpanel:<base64 json>
//! ```
//!
//! The input side is already line-delimited, so there is no terminator to
//! scan for. Replies sent over a direct command channel (where OSC framing is
//! pointless) use the plain form `MCPANEL:<base64 json>`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::message::{Request, Response};
use crate::error::{FrameError, Result};

/// Marker opening a request line.
pub const REQUEST_MARKER: &str = "///mcpanel:";

/// Marker opening a plain reply line.
pub const PLAIN_REPLY_MARKER: &str = "MCPANEL:";

/// Whether `line` carries a request.
pub fn is_request_line(line: &str) -> bool {
    line.trim_start().starts_with(REQUEST_MARKER)
}

/// Encode a request as an input line, newline included.
pub fn encode_request(request: &Request) -> Result<String> {
    Ok(format!("{REQUEST_MARKER}{}\n", encode_b64(request)?))
}

/// Decode a request line. Surrounding whitespace is ignored.
pub fn decode_request(line: &str) -> std::result::Result<Request, FrameError> {
    let body = line
        .trim()
        .strip_prefix(REQUEST_MARKER)
        .ok_or_else(|| FrameError::MalformedFrame("missing request marker".into()))?;
    decode_b64(body)
}

/// Decode a bare request body, as passed to a console command.
pub fn decode_request_body(body: &str) -> std::result::Result<Request, FrameError> {
    decode_b64(body)
}

/// Encode a response in the plain reply form, without trailing newline.
pub fn encode_plain_reply(response: &Response) -> Result<String> {
    Ok(format!("{PLAIN_REPLY_MARKER}{}", encode_b64(response)?))
}

/// Decode a plain reply line.
pub fn decode_plain_reply(line: &str) -> std::result::Result<Response, FrameError> {
    let body = line
        .trim()
        .strip_prefix(PLAIN_REPLY_MARKER)
        .ok_or_else(|| FrameError::MalformedFrame("missing reply marker".into()))?;
    decode_b64(body)
}

fn encode_b64<T: Serialize>(value: &T) -> Result<String> {
    Ok(STANDARD.encode(serde_json::to_vec(value)?))
}

fn decode_b64<T: DeserializeOwned>(body: &str) -> std::result::Result<T, FrameError> {
    // Some transports split long arguments; the body never contains spaces.
    let compact: String = body.split_whitespace().collect();
    let json = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| FrameError::MalformedFrame(format!("base64: {e}")))?;
    serde_json::from_slice(&json).map_err(|e| FrameError::MalformedFrame(format!("json: {e}")))
}
