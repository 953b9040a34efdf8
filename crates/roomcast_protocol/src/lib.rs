#![forbid(unsafe_code)]

pub mod codec;
pub mod message;

pub use codec::{DecodeError, decode, encode};
pub use message::ChatMessage;
