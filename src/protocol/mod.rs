//! Protocol module - framing, scanning, and message types.
//!
//! This module implements the embedded console protocol:
//! - OSC-wrapped base64 JSON frames ([`frame`])
//! - Lazy gap/frame segmentation of a buffer ([`scan`])
//! - Request, response and event records ([`message`], [`payloads`])
//! - The line-oriented request input form ([`request_line`])

pub mod frame;
pub mod message;
pub mod payloads;
pub mod request_line;
pub mod scan;

pub use frame::{PREFIX, SUFFIX};
pub use message::{
    response_type, ErrorCode, ErrorPayload, Event, EventName, Inbound, Request, RequestKind,
    Response,
};
pub use request_line::REQUEST_MARKER;
pub use scan::{scan, Segment, Span};
