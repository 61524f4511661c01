//! Async DBGp client (the IDE side)
//!
//! Used by the `dbgp listen` command and by the end-to-end tests.

mod connection;
pub mod codec;
pub mod packet;

pub use connection::{DbgpClient, DbgpListener, DEFAULT_TIMEOUT};
pub use packet::{Element, InitPacket, Packet, Response, ResponseError, StreamPacket};
