//! DBGp wire protocol: buffers, framing, and status codes
//!
//! This module knows nothing about sessions or interpreters; it only turns
//! bytes into commands and responses into bytes.

pub mod buffer;
pub mod codec;
pub mod codes;

pub use buffer::{Buffer, BufferFull};
pub use codec::{parse_command, CommandArgs, ParseFailure, XML_DECLARATION};
pub use codes::ErrorCode;
