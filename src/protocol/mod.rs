//! Wire protocol module.
//!
//! Defines the message types and the frame codec for socket communication.
//!
//! ## Wire Format
//!
//! Messages are length-prefixed JSON:
//! ```text
//! <decimal ASCII length>\n<UTF-8 JSON payload of exactly that many bytes>
//! ```
//!
//! Client → server payloads carry `token`, `action` and `body`; server →
//! client payloads carry `code` and `body`.

mod message;
mod wire;

pub use message::{Body, ClientMessage, IncomingRequest, Response, CODE_FAILURE, CODE_OK};
pub use wire::{
    decode, encode, parse_payload, read_frame, read_frame_with_timeout, write_frame,
    write_message, write_message_with_timeout, FrameLimits, DEFAULT_MAX_FRAME_SIZE,
};
