//! In-memory transport
//!
//! Commands are queued up front; everything the engine sends is collected
//! in a shared buffer the test keeps a handle to.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::rc::Rc;

use crate::engine::Transport;
use crate::protocol::XML_DECLARATION;

/// Shared view of the bytes written by the engine
pub type OutputHandle = Rc<RefCell<Vec<u8>>>;

/// A transport backed by byte queues; reading past the queued input is EOF
#[derive(Debug, Default)]
pub struct MemoryTransport {
    input: VecDeque<u8>,
    output: OutputHandle,
}

impl MemoryTransport {
    pub fn new() -> (Self, OutputHandle) {
        let transport = Self::default();
        let output = Rc::clone(&transport.output);
        (transport, output)
    }

    /// A transport with NUL-terminated `commands` already queued
    pub fn with_commands(commands: &[&str]) -> (Self, OutputHandle) {
        let (mut transport, output) = Self::new();
        for command in commands {
            transport.push_command(command);
        }
        (transport, output)
    }

    pub fn push_command(&mut self, command: &str) {
        self.input.extend(command.as_bytes());
        self.input.push_back(0);
    }
}

impl Read for MemoryTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for MemoryTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MemoryTransport {
    fn has_pending(&mut self) -> io::Result<bool> {
        Ok(!self.input.is_empty())
    }
}

/// Split engine output into packet bodies, without the XML declaration
///
/// Stops at the first malformed or truncated packet.
pub fn split_packets(bytes: &[u8]) -> Vec<String> {
    let mut packets = Vec::new();
    let mut rest = bytes;
    while let Some(nul) = rest.iter().position(|&b| b == 0) {
        let Some(length) = std::str::from_utf8(&rest[..nul])
            .ok()
            .and_then(|len| len.parse::<usize>().ok())
        else {
            break;
        };
        let body_start = nul + 1;
        let body_end = body_start + length;
        if rest.len() <= body_end || rest[body_end] != 0 {
            break;
        }
        let body = String::from_utf8_lossy(&rest[body_start..body_end]);
        let body = body.strip_prefix(XML_DECLARATION).unwrap_or(&body);
        packets.push(body.to_string());
        rest = &rest[body_end + 1..];
    }
    packets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec;

    #[test]
    fn test_reads_queued_commands_then_eof() {
        let (mut transport, _) = MemoryTransport::with_commands(&["status -i 1"]);
        assert!(transport.has_pending().unwrap());
        let mut buf = [0u8; 64];
        let n = transport.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"status -i 1\0");
        assert!(!transport.has_pending().unwrap());
        assert_eq!(transport.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_split_packets() {
        let (mut transport, output) = MemoryTransport::new();
        codec::write_packet(&mut transport, b"<init/>").unwrap();
        codec::write_packet(&mut transport, b"<response/>").unwrap();
        let packets = split_packets(&output.borrow());
        assert_eq!(packets, vec!["<init/>".to_string(), "<response/>".to_string()]);
    }

    #[test]
    fn test_split_packets_ignores_truncated_tail() {
        let mut bytes = codec::encode_packet(b"<a/>");
        bytes.extend_from_slice(b"99\0<trunc");
        assert_eq!(split_packets(&bytes), vec!["<a/>".to_string()]);
    }
}
