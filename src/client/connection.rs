//! IDE side of a DBGp connection
//!
//! The IDE listens; engines connect to it. [`DbgpListener::accept`] returns a
//! connected [`DbgpClient`] together with the engine's `init` packet.
//!
//! Packets are read by a background task and queued, so waiting for one can
//! be raced against other input in `tokio::select!` without losing data.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::common::{Error, Result};

use super::codec;
use super::packet::{InitPacket, Packet, Response, StreamPacket};

/// Default time to wait for a packet
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Listening socket for engine connections
pub struct DbgpListener {
    listener: TcpListener,
}

impl DbgpListener {
    pub async fn bind(host: &str, port: u16) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!(addr = %addr, "Listening for DBGp engines");
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Wait for an engine and read its `init` packet
    pub async fn accept(&self) -> Result<(DbgpClient, InitPacket)> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        tracing::info!(peer = %peer, "Engine connected");

        let (read_half, write_half) = stream.into_split();
        let (packet_tx, packet_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(BufReader::new(read_half), packet_tx));
        let mut client = DbgpClient {
            writer: BufWriter::new(write_half),
            packets: packet_rx,
            reader,
            peer,
            next_transaction: 1,
            timeout: DEFAULT_TIMEOUT,
            streams: Vec::new(),
        };

        match client.read_packet().await? {
            Packet::Init(init) => Ok((client, init)),
            other => Err(Error::Protocol(format!(
                "expected an init packet, got {:?}",
                other
            ))),
        }
    }
}

/// Forward packets from the engine until it disconnects
async fn read_loop(
    mut reader: BufReader<OwnedReadHalf>,
    tx: mpsc::UnboundedSender<Result<Packet>>,
) {
    loop {
        let packet = match codec::read_packet(&mut reader).await {
            Ok(xml) => {
                tracing::debug!(packet = %xml, "DBGp <<<");
                Packet::parse(&xml)
            }
            Err(e) => {
                let _ = tx.send(Err(e));
                return;
            }
        };
        if tx.send(packet).is_err() {
            return;
        }
    }
}

/// Commands whose response only arrives once the script breaks or ends
fn is_continuation(command: &str) -> bool {
    matches!(
        command.split_whitespace().next(),
        Some("run" | "step_into" | "step_over" | "step_out")
    )
}

/// A connected engine
pub struct DbgpClient {
    writer: BufWriter<OwnedWriteHalf>,
    packets: mpsc::UnboundedReceiver<Result<Packet>>,
    reader: JoinHandle<()>,
    peer: SocketAddr,
    next_transaction: u64,
    timeout: Duration,
    /// Stream packets that arrived while waiting for a response
    streams: Vec<StreamPacket>,
}

/// Split off the transaction id of a command, inserting one if absent
///
/// Returns the command to send and its transaction id.
fn with_transaction_id(command: &str, next: &mut u64) -> (String, String) {
    let command = command.trim();
    let mut tokens = command.split(' ');
    while let Some(token) = tokens.next() {
        if token == "-i" {
            if let Some(id) = tokens.next() {
                return (command.to_string(), id.to_string());
            }
        }
        if token == "--" {
            break;
        }
    }

    let id = next.to_string();
    *next += 1;
    let (name, rest) = match command.find(' ') {
        Some(i) => (&command[..i], &command[i..]),
        None => (command, ""),
    };
    (format!("{} -i {}{}", name, id, rest), id)
}

impl DbgpClient {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Time to wait for the response to a command that does not resume
    /// the script
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Send a command; returns its transaction id
    ///
    /// A `-i` argument is added when the command has none.
    pub async fn send(&mut self, command: &str) -> Result<String> {
        let (line, transaction_id) = with_transaction_id(command, &mut self.next_transaction);
        tracing::debug!(command = %line, "DBGp >>>");
        codec::write_command(&mut self.writer, &line).await?;
        Ok(transaction_id)
    }

    async fn receive(&mut self, limit: Option<Duration>) -> Result<Packet> {
        let packet = match limit {
            Some(limit) => tokio::time::timeout(limit, self.packets.recv())
                .await
                .map_err(|_| Error::Timeout(limit.as_secs()))?,
            None => self.packets.recv().await,
        };
        packet.unwrap_or(Err(Error::Disconnected))
    }

    /// Read the next packet of any kind, giving up after the timeout
    pub async fn read_packet(&mut self) -> Result<Packet> {
        self.receive(Some(self.timeout)).await
    }

    /// Wait for the next packet with no time limit
    ///
    /// Cancel safe: a packet is never lost when this loses a `select!`.
    pub async fn next_packet(&mut self) -> Result<Packet> {
        self.receive(None).await
    }

    /// Send a command and wait for its response
    ///
    /// For `run` and the `step_*` commands this waits, without a time
    /// limit, until the script breaks or finishes. Stream packets received
    /// meanwhile are kept for [`DbgpClient::take_streams`].
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        let limit = (!is_continuation(command)).then_some(self.timeout);
        let transaction_id = self.send(command).await?;
        loop {
            match self.receive(limit).await? {
                Packet::Response(response) if response.transaction_id == transaction_id => {
                    return Ok(response)
                }
                Packet::Response(response) => {
                    tracing::warn!(
                        transaction_id = %response.transaction_id,
                        "Dropping response to another command"
                    );
                }
                Packet::Stream(stream) => self.streams.push(stream),
                other => tracing::warn!(packet = ?other, "Unexpected packet"),
            }
        }
    }

    /// Stream packets collected by [`DbgpClient::command`]
    pub fn take_streams(&mut self) -> Vec<StreamPacket> {
        std::mem::take(&mut self.streams)
    }
}

impl Drop for DbgpClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inserts_transaction_id() {
        let mut next = 7;
        assert_eq!(
            with_transaction_id("stack_get -d 1", &mut next),
            ("stack_get -i 7 -d 1".to_string(), "7".to_string())
        );
        assert_eq!(
            with_transaction_id("run", &mut next),
            ("run -i 8".to_string(), "8".to_string())
        );
        assert_eq!(next, 9);
    }

    #[test]
    fn test_keeps_existing_transaction_id() {
        let mut next = 1;
        assert_eq!(
            with_transaction_id("status -i abc", &mut next),
            ("status -i abc".to_string(), "abc".to_string())
        );
        assert_eq!(next, 1);
    }

    #[test]
    fn test_ignores_flags_inside_data() {
        let mut next = 1;
        let (line, id) = with_transaction_id("property_set -n x -- -i 5", &mut next);
        assert_eq!(line, "property_set -i 1 -n x -- -i 5");
        assert_eq!(id, "1");
    }

    #[tokio::test]
    async fn test_accept_reads_init() {
        use crate::protocol::codec::encode_packet;
        use tokio::io::AsyncWriteExt;

        let listener = DbgpListener::bind("127.0.0.1", 0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let engine = tokio::spawn(async move {
            let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(&encode_packet(b"<init appid=\"x\" fileuri=\"file:///a.ahk\"/>"))
                .await
                .unwrap();
            stream
                .write_all(&encode_packet(b"<stream type=\"stdout\" encoding=\"base64\">aGk=</stream>"))
                .await
                .unwrap();
            stream
                .write_all(&encode_packet(b"<response command=\"status\" transaction_id=\"1\" status=\"starting\" reason=\"ok\"/>"))
                .await
                .unwrap();
            stream
        });

        let (mut client, init) = listener.accept().await.unwrap();
        assert_eq!(init.appid, "x");
        let response = client.command("status").await.unwrap();
        assert_eq!(response.status(), Some("starting"));
        assert_eq!(client.take_streams()[0].data, "hi");
        drop(engine.await.unwrap());
    }

    #[test]
    fn test_continuation_commands() {
        assert!(is_continuation("run -i 3"));
        assert!(is_continuation("step_over"));
        assert!(!is_continuation("stack_get -d 0"));
        assert!(!is_continuation("break"));
    }

    #[tokio::test]
    async fn test_busy_engine_does_not_time_out_run() {
        use crate::protocol::codec::encode_packet;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = DbgpListener::bind("127.0.0.1", 0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let engine = tokio::spawn(async move {
            let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(&encode_packet(b"<init appid=\"x\" fileuri=\"file:///a.ahk\"/>"))
                .await
                .unwrap();

            // Read "run -i 1\0", then stay busy past the client timeout
            let mut command = Vec::new();
            while command.last() != Some(&0) {
                let mut byte = [0u8; 1];
                stream.read_exact(&mut byte).await.unwrap();
                command.push(byte[0]);
            }
            tokio::time::sleep(Duration::from_millis(600)).await;
            stream
                .write_all(&encode_packet(b"<response command=\"run\" transaction_id=\"1\" status=\"break\" reason=\"ok\"/>"))
                .await
                .unwrap();
            (command, stream)
        });

        let (mut client, _init) = listener.accept().await.unwrap();
        client.set_timeout(Duration::from_millis(100));
        let response = client.command("run").await.unwrap();
        assert_eq!(response.status(), Some("break"));

        let (command, _stream) = engine.await.unwrap();
        assert_eq!(command, b"run -i 1\0");
        assert!(matches!(client.read_packet().await, Err(Error::Timeout(0))));
    }
}
