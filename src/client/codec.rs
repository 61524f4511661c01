//! DBGp wire codec, IDE side
//!
//! Engine → IDE packets are length-prefixed:
//! ```text
//! <decimal length>\0<?xml ...?><response .../>\0
//! ```
//! IDE → engine commands are plain text terminated by a single NUL.

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::{Error, Result};

/// Sanity limit for a single packet
pub const MAX_PACKET_SIZE: usize = 100 * 1024 * 1024;

fn eof_to_disconnect(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::Disconnected
    } else {
        Error::Io(e)
    }
}

/// Read one packet and return its XML text
pub async fn read_packet<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String> {
    let mut header = Vec::new();
    let n = reader
        .read_until(0, &mut header)
        .await
        .map_err(eof_to_disconnect)?;
    if n == 0 {
        return Err(Error::Disconnected);
    }
    if header.pop() != Some(0) {
        return Err(Error::Disconnected);
    }

    let text = std::str::from_utf8(&header)
        .map_err(|_| Error::Protocol("non-ASCII packet length".to_string()))?;
    let len: usize = text
        .trim()
        .parse()
        .map_err(|_| Error::Protocol(format!("invalid packet length '{}'", text)))?;
    if len > MAX_PACKET_SIZE {
        return Err(Error::Protocol(format!("packet too large: {} bytes", len)));
    }

    // Body plus its terminating NUL
    let mut body = vec![0u8; len + 1];
    reader.read_exact(&mut body).await.map_err(eof_to_disconnect)?;
    if body.pop() != Some(0) {
        return Err(Error::Protocol("packet is not NUL-terminated".to_string()));
    }

    String::from_utf8(body).map_err(|e| Error::Protocol(format!("invalid UTF-8: {}", e)))
}

/// Write one NUL-terminated command
pub async fn write_command<W: AsyncWrite + Unpin>(writer: &mut W, command: &str) -> Result<()> {
    writer.write_all(command.as_bytes()).await?;
    writer.write_all(&[0]).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::encode_packet;
    use std::io::Cursor;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_read_packet() {
        let mut data = encode_packet(b"<init/>");
        data.extend(encode_packet(b"<response/>"));
        let mut reader = BufReader::new(Cursor::new(data));

        let first = read_packet(&mut reader).await.unwrap();
        assert!(first.starts_with("<?xml"));
        assert!(first.ends_with("<init/>"));
        let second = read_packet(&mut reader).await.unwrap();
        assert!(second.ends_with("<response/>"));
        assert!(matches!(read_packet(&mut reader).await, Err(Error::Disconnected)));
    }

    #[tokio::test]
    async fn test_read_packet_bad_length() {
        let mut reader = BufReader::new(Cursor::new(b"12x\0<a/>\0".to_vec()));
        assert!(matches!(read_packet(&mut reader).await, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_read_packet_truncated() {
        let mut reader = BufReader::new(Cursor::new(b"50\0<a/>".to_vec()));
        assert!(matches!(read_packet(&mut reader).await, Err(Error::Disconnected)));
    }

    #[tokio::test]
    async fn test_write_command() {
        let mut output = Vec::new();
        write_command(&mut output, "run -i 1").await.unwrap();
        assert_eq!(output, b"run -i 1\0");
    }
}
