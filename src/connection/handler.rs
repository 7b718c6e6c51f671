//! Per-connection handling: protocol detection and the two client loops.
//!
//! The first byte of a connection decides its protocol. RESP frames always
//! open with one of the five type tags (`+ - : $ *`); anything else is the
//! plain text protocol. The byte is only peeked, so whichever loop takes
//! over still sees the full stream.
//!
//! ```text
//! accept
//!   │
//!   ▼
//! peek 1 byte ──── RESP tag ────▶ RESP loop (parse frame → execute →
//!   │                              encode reply)
//!   └───── anything else ───────▶ text loop ("> " prompt, one command
//!                                  per line, plain text replies)
//! ```
//!
//! Both loops dispatch through the same command registry; the text loop
//! wraps its line tokens as bulk strings first and renders replies with
//! ASCII framing (`(nil)` for absence, `END` closing multi-line output).

use crate::commands::{CommandRegistry, ServerContext};
use crate::persistence::snapshot;
use crate::protocol::{tag, ParseError, RespParser, RespValue};
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Hard cap on buffered request bytes per connection.
const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Initial read buffer capacity.
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Server-wide connection counters.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub connections_accepted: AtomicU64,
    pub active_connections: AtomicU64,
    pub commands_processed: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("client disconnected")]
    ClientDisconnected,

    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("buffer size limit exceeded")]
    BufferFull,
}

/// Serves one client to completion: detects the protocol, then runs the
/// matching loop until the client leaves or the connection fails.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: Arc<ServerContext>,
    registry: Arc<CommandRegistry>,
    stats: Arc<ConnectionStats>,
) {
    stats.connection_opened();
    info!(client = %addr, "client connected");

    let result = match detect_protocol(&stream).await {
        Ok(true) => RespConnection::new(stream, addr, ctx, registry, Arc::clone(&stats))
            .run()
            .await,
        Ok(false) => text_loop(stream, addr, ctx, registry, Arc::clone(&stats)).await,
        Err(e) => Err(ConnectionError::Io(e)),
    };

    match result {
        Ok(()) => info!(client = %addr, "client disconnected"),
        Err(ConnectionError::ClientDisconnected) => {
            debug!(client = %addr, "client disconnected")
        }
        Err(ConnectionError::Io(ref e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
            debug!(client = %addr, "connection reset by client")
        }
        Err(e) => warn!(client = %addr, error = %e, "connection error"),
    }

    stats.connection_closed();
}

/// Peeks the first byte without consuming it. Returns true for RESP; EOF
/// before any byte counts as text (a benign immediate close).
async fn detect_protocol(stream: &TcpStream) -> std::io::Result<bool> {
    let mut first = [0u8; 1];
    let n = stream.peek(&mut first).await?;
    Ok(n == 1 && tag::is_resp(first[0]))
}

fn is_exit(command: &RespValue) -> bool {
    command
        .as_array()
        .and_then(|args| args.first())
        .and_then(|name| name.as_str())
        .map(|name| name.eq_ignore_ascii_case("EXIT"))
        .unwrap_or(false)
}

// ============================================================================
// RESP loop
// ============================================================================

struct RespConnection {
    stream: BufWriter<TcpStream>,
    addr: SocketAddr,
    buffer: BytesMut,
    parser: RespParser,
    ctx: Arc<ServerContext>,
    registry: Arc<CommandRegistry>,
    stats: Arc<ConnectionStats>,
}

impl RespConnection {
    fn new(
        stream: TcpStream,
        addr: SocketAddr,
        ctx: Arc<ServerContext>,
        registry: Arc<CommandRegistry>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser: RespParser::new(),
            ctx,
            registry,
            stats,
        }
    }

    async fn run(mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(command) = self.try_parse_command()? {
                self.stats.command_processed();

                if is_exit(&command) {
                    self.send(&RespValue::ok()).await?;
                    return Ok(());
                }

                let response = self.registry.execute(&self.ctx, command);
                self.send(&response).await?;
            }

            self.read_more().await?;
        }
    }

    fn try_parse_command(&mut self) -> Result<Option<RespValue>, ConnectionError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match self.parser.parse(&self.buffer) {
            Ok(Some((value, consumed))) => {
                let _ = self.buffer.split_to(consumed);
                trace!(client = %self.addr, consumed, "parsed command");
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(client = %self.addr, error = %e, "RESP parse error");
                Err(ConnectionError::Parse(e))
            }
        }
    }

    async fn read_more(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            return Err(ConnectionError::BufferFull);
        }
        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;
        if n == 0 {
            if self.buffer.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            }
            return Err(ConnectionError::UnexpectedEof);
        }

        trace!(client = %self.addr, bytes = n, "read data");
        Ok(())
    }

    async fn send(&mut self, response: &RespValue) -> Result<(), ConnectionError> {
        let bytes = response.encode();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

// ============================================================================
// Text loop
// ============================================================================

/// Line-based protocol: prompt, read one line, split into at most four
/// tokens, dispatch through the registry, render the reply as plain text.
async fn text_loop(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: Arc<ServerContext>,
    registry: Arc<CommandRegistry>,
    stats: Arc<ConnectionStats>,
) -> Result<(), ConnectionError> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(write_half);

    loop {
        writer.write_all(b"> ").await?;
        writer.flush().await?;

        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(()); // client closed
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        // Up to four tokens, so SET can carry a TTL as its fourth.
        let mut tokens: Vec<&str> = line.splitn(4, ' ').filter(|t| !t.is_empty()).collect();
        if tokens.is_empty() {
            continue;
        }

        let cmd = tokens[0].to_uppercase();
        trace!(client = %addr, command = %cmd, "text command");

        if cmd == "EXIT" {
            writer.write_all("Bye 👋\n".as_bytes()).await?;
            writer.flush().await?;
            // A leaving client forces a final save, like shutdown does.
            if let Err(e) = snapshot::save(&ctx.store, &ctx.db_path) {
                warn!(error = %e, "snapshot save on EXIT failed");
            }
            return Ok(());
        }

        // Text SET spells its TTL as a bare fourth token; the registry
        // expects the EX form.
        if cmd == "SET" && tokens.len() == 4 {
            if tokens[3].parse::<u64>().is_err() {
                writer.write_all(b"Invalid expiration format\n").await?;
                writer.flush().await?;
                continue;
            }
            let secs = tokens[3];
            tokens[3] = "EX";
            tokens.push(secs);
        }

        let command = RespValue::Array(
            tokens
                .iter()
                .map(|t| RespValue::BulkString(Bytes::from(t.to_string())))
                .collect(),
        );

        stats.command_processed();
        let response = registry.execute(&ctx, command);
        write_text_response(&mut writer, &response).await?;
        writer.flush().await?;
    }
}

/// Renders one reply in text framing. Multi-value replies are one line per
/// element closed by `END`.
async fn write_text_response<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    response: &RespValue,
) -> Result<(), ConnectionError> {
    match response {
        RespValue::SimpleString(s) => {
            writer.write_all(s.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        RespValue::Error(msg) => {
            writer.write_all(msg.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        RespValue::Integer(n) => {
            writer.write_all(n.to_string().as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        RespValue::BulkString(data) => {
            writer.write_all(data).await?;
            writer.write_all(b"\n").await?;
        }
        RespValue::Null | RespValue::NullArray => {
            writer.write_all(b"(nil)\n").await?;
        }
        RespValue::Array(values) => {
            for value in values {
                match value {
                    RespValue::BulkString(data) => writer.write_all(data).await?,
                    other => writer.write_all(other.to_string().as_bytes()).await?,
                }
                writer.write_all(b"\n").await?;
            }
            writer.write_all(b"END\n").await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Store;
    use std::path::PathBuf;
    use tokio::io::AsyncReadExt as _;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    async fn start_server() -> (SocketAddr, Arc<ServerContext>, Arc<ConnectionStats>) {
        let dir = tempfile::tempdir().unwrap();
        let db_path: PathBuf = dir.path().join("data.json");
        // Leak the tempdir so the path stays valid for the whole test.
        std::mem::forget(dir);

        let (tx, _rx) = mpsc::channel(100);
        let ctx = Arc::new(ServerContext {
            store: Arc::new(Store::new(tx)),
            db_path,
            aof: None,
        });
        let registry = Arc::new(CommandRegistry::new());
        let stats = Arc::new(ConnectionStats::new());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let ctx_clone = Arc::clone(&ctx);
        let stats_clone = Arc::clone(&stats);
        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                tokio::spawn(handle_connection(
                    stream,
                    client_addr,
                    Arc::clone(&ctx_clone),
                    Arc::clone(&registry),
                    Arc::clone(&stats_clone),
                ));
            }
        });

        (addr, ctx, stats)
    }

    async fn read_reply(client: &mut TcpStream) -> Vec<u8> {
        let mut buf = [0u8; 1024];
        let n = client.read(&mut buf).await.unwrap();
        buf[..n].to_vec()
    }

    /// Reads until `needle` shows up or the stream goes quiet; text replies
    /// arrive interleaved with `> ` prompts in arbitrary chunking.
    async fn read_text_until(client: &mut TcpStream, needle: &str) -> String {
        let mut collected = String::new();
        for _ in 0..50 {
            let mut buf = [0u8; 1024];
            match tokio::time::timeout(
                std::time::Duration::from_millis(100),
                client.read(&mut buf),
            )
            .await
            {
                Ok(Ok(n)) if n > 0 => {
                    collected.push_str(&String::from_utf8_lossy(&buf[..n]));
                    if collected.contains(needle) {
                        break;
                    }
                }
                _ => break,
            }
        }
        collected
    }

    #[tokio::test]
    async fn resp_set_then_get() {
        let (addr, _, _) = start_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$5\r\nharsh\r\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut client).await, b"+OK\r\n");

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut client).await, b"$5\r\nharsh\r\n");
    }

    #[tokio::test]
    async fn resp_get_missing_is_null_bulk() {
        let (addr, _, _) = start_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$4\r\nnope\r\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut client).await, b"$-1\r\n");
    }

    #[tokio::test]
    async fn resp_type_mismatch_reply() {
        let (addr, _, _) = start_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$1\r\ns\r\n$5\r\nhello\r\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut client).await, b"+OK\r\n");

        client
            .write_all(b"*3\r\n$5\r\nLPUSH\r\n$1\r\ns\r\n$1\r\nx\r\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut client).await, b"-ERR value is not a list\r\n");

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$1\r\ns\r\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut client).await, b"$5\r\nhello\r\n");
    }

    #[tokio::test]
    async fn resp_pipelined_commands() {
        let (addr, _, _) = start_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(
                b"*3\r\n$3\r\nSET\r\n$2\r\nk1\r\n$2\r\nv1\r\n*3\r\n$3\r\nSET\r\n$2\r\nk2\r\n$2\r\nv2\r\n*2\r\n$3\r\nGET\r\n$2\r\nk1\r\n",
            )
            .await
            .unwrap();

        // +OK\r\n +OK\r\n $2\r\nv1\r\n — 18 bytes in total.
        let mut collected = Vec::new();
        while collected.len() < 18 {
            let chunk = read_reply(&mut client).await;
            if chunk.is_empty() {
                break;
            }
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(collected, b"+OK\r\n+OK\r\n$2\r\nv1\r\n");
    }

    #[tokio::test]
    async fn resp_exit_closes_connection() {
        let (addr, _, _) = start_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nEXIT\r\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, b"+OK\r\n");

        // The server side is closed; the next read returns EOF.
        let mut buf = [0u8; 16];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn text_protocol_basics() {
        let (addr, _, _) = start_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"SET k v\n").await.unwrap();
        let reply = read_text_until(&mut client, "OK").await;
        assert!(reply.contains("OK"), "got: {:?}", reply);

        client.write_all(b"GET k\n").await.unwrap();
        let reply = read_text_until(&mut client, "v\n").await;
        assert!(reply.contains("v\n"), "got: {:?}", reply);

        client.write_all(b"GET missing\n").await.unwrap();
        let reply = read_text_until(&mut client, "(nil)").await;
        assert!(reply.contains("(nil)"), "got: {:?}", reply);
    }

    #[tokio::test]
    async fn text_set_with_ttl_token() {
        let (addr, ctx, _) = start_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"SET session tok 100\n").await.unwrap();
        let reply = read_text_until(&mut client, "OK").await;
        assert!(reply.contains("OK"), "got: {:?}", reply);

        let ttl = ctx.store.ttl("session").unwrap().unwrap();
        assert!(ttl > std::time::Duration::from_secs(90));

        client.write_all(b"SET bad v notanumber\n").await.unwrap();
        let reply = read_text_until(&mut client, "Invalid expiration").await;
        assert!(reply.contains("Invalid expiration"), "got: {:?}", reply);
    }

    #[tokio::test]
    async fn text_all_ends_with_end_marker() {
        let (addr, _, _) = start_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"SET a 1\n").await.unwrap();
        let _ = read_text_until(&mut client, "OK").await;

        client.write_all(b"ALL\n").await.unwrap();
        let reply = read_text_until(&mut client, "END\n").await;
        assert!(reply.contains("a : 1"), "got: {:?}", reply);
        assert!(reply.contains("END\n"), "got: {:?}", reply);
    }

    #[tokio::test]
    async fn text_exit_says_goodbye() {
        let (addr, _, _) = start_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"EXIT\n").await.unwrap();
        let reply = read_text_until(&mut client, "Bye").await;
        assert!(reply.contains("Bye"), "got: {:?}", reply);

        let mut buf = [0u8; 16];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn both_protocols_on_one_port() {
        let (addr, _, _) = start_server().await;

        // Text client.
        let mut text_client = TcpStream::connect(addr).await.unwrap();
        text_client.write_all(b"SET k v\n").await.unwrap();
        let reply = read_text_until(&mut text_client, "OK").await;
        assert!(reply.contains("OK"), "got: {:?}", reply);

        // RESP client sees the write made through the text client.
        let mut resp_client = TcpStream::connect(addr).await.unwrap();
        resp_client
            .write_all(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut resp_client).await, b"$1\r\nv\r\n");
    }

    #[tokio::test]
    async fn connection_stats_track_lifecycle() {
        let (addr, _, stats) = start_server().await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        let _ = read_reply(&mut client).await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);
        assert!(stats.commands_processed.load(Ordering::Relaxed) >= 1);

        drop(client);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }
}
