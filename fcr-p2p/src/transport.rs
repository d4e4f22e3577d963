//! Length-framed message transport.
//!
//! A frame is a 4-byte big-endian length followed by one bincode-encoded
//! [`FcrMessage`]. Every read and write is bounded by a caller-supplied
//! timeout, and a timeout is reported distinctly from other I/O failures.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{FcrP2pError, Result};
use crate::messages::FcrMessage;
use crate::settings::MAX_FRAME_LEN;

/// Buffer size of in-memory pipes.
const MEMORY_PIPE_CAPACITY: usize = 64 * 1024;

/// Any bidirectional byte stream.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteStream for T {}

/// One framed connection to a peer.
pub struct FcrConnection {
    stream: Box<dyn ByteStream>,
    remote: String,
}

impl std::fmt::Debug for FcrConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FcrConnection").field("remote", &self.remote).finish()
    }
}

impl FcrConnection {
    /// Wrap a stream.
    pub fn new(stream: impl ByteStream + 'static, remote: impl Into<String>) -> Self {
        Self {
            stream: Box::new(stream),
            remote: remote.into(),
        }
    }

    /// Address of the other end.
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Write one message.
    pub async fn send_message(&mut self, msg: &FcrMessage, limit: Duration) -> Result<()> {
        let bytes = msg.to_bytes()?;
        if bytes.len() > MAX_FRAME_LEN {
            return Err(FcrP2pError::InvalidArgument(format!(
                "frame of {} bytes exceeds {}",
                bytes.len(),
                MAX_FRAME_LEN
            )));
        }
        let len = u32::try_from(bytes.len()).map_err(|_| FcrP2pError::InvalidArgument("frame too large".into()))?;

        let write = async {
            self.stream.write_all(&len.to_be_bytes()).await?;
            self.stream.write_all(&bytes).await?;
            self.stream.flush().await
        };
        match timeout(limit, write).await {
            Ok(result) => result.map_err(|e| FcrP2pError::Network(format!("write to {}: {}", self.remote, e))),
            Err(_) => Err(FcrP2pError::Timeout),
        }
    }

    /// Read one message.
    pub async fn receive_message(&mut self, limit: Duration) -> Result<FcrMessage> {
        let read = async {
            let mut header = [0u8; 4];
            self.stream.read_exact(&mut header).await?;
            let len = u32::from_be_bytes(header) as usize;
            if len > MAX_FRAME_LEN {
                return Ok(Err(FcrP2pError::ProtocolViolation(format!(
                    "frame of {} bytes exceeds {}",
                    len, MAX_FRAME_LEN
                ))));
            }
            let mut body = vec![0u8; len];
            self.stream.read_exact(&mut body).await?;
            Ok::<_, std::io::Error>(FcrMessage::from_bytes(&body))
        };

        match timeout(limit, read).await {
            Ok(Ok(decoded)) => decoded,
            Ok(Err(e)) => Err(FcrP2pError::Network(format!("read from {}: {}", self.remote, e))),
            Err(_) => Err(FcrP2pError::Timeout),
        }
    }
}

/// Opens outbound connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `addr` within `limit`.
    async fn connect(&self, addr: &str, limit: Duration) -> Result<FcrConnection>;
}

/// Yields inbound connections.
#[async_trait]
pub trait Acceptor: Send {
    /// Wait for the next inbound connection.
    async fn accept(&mut self) -> Result<FcrConnection>;
}

/// TCP connector.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, addr: &str, limit: Duration) -> Result<FcrConnection> {
        match timeout(limit, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                Ok(FcrConnection::new(stream, addr))
            }
            Ok(Err(e)) => Err(FcrP2pError::Network(format!("connect to {}: {}", addr, e))),
            Err(_) => Err(FcrP2pError::Timeout),
        }
    }
}

#[async_trait]
impl Acceptor for TcpListener {
    async fn accept(&mut self) -> Result<FcrConnection> {
        let (stream, remote) = TcpListener::accept(self).await?;
        stream.set_nodelay(true)?;
        Ok(FcrConnection::new(stream, remote.to_string()))
    }
}

/// In-process network of named endpoints backed by duplex pipes.
#[derive(Debug, Default)]
pub struct MemoryNetwork {
    endpoints: Mutex<HashMap<String, mpsc::UnboundedSender<DuplexStream>>>,
}

/// Inbound side of a [`MemoryNetwork`] endpoint.
#[derive(Debug)]
pub struct MemoryListener {
    addr: String,
    incoming: mpsc::UnboundedReceiver<DuplexStream>,
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint at `addr`, replacing any previous one.
    pub fn listen(&self, addr: &str) -> MemoryListener {
        let (tx, rx) = mpsc::unbounded_channel();
        self.endpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(addr.to_string(), tx);
        MemoryListener {
            addr: addr.to_string(),
            incoming: rx,
        }
    }

    /// Remove the endpoint at `addr`; later connects fail.
    pub fn shutdown(&self, addr: &str) {
        self.endpoints.lock().unwrap_or_else(|e| e.into_inner()).remove(addr);
    }
}

#[async_trait]
impl Connector for MemoryNetwork {
    async fn connect(&self, addr: &str, _limit: Duration) -> Result<FcrConnection> {
        let sender = self
            .endpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(addr)
            .cloned()
            .ok_or_else(|| FcrP2pError::Network(format!("connection refused: {}", addr)))?;

        let (local, remote) = tokio::io::duplex(MEMORY_PIPE_CAPACITY);
        sender
            .send(remote)
            .map_err(|_| FcrP2pError::Network(format!("connection refused: {}", addr)))?;
        debug!("Memory connection to {}", addr);
        Ok(FcrConnection::new(local, addr))
    }
}

#[async_trait]
impl Acceptor for MemoryListener {
    async fn accept(&mut self) -> Result<FcrConnection> {
        let stream = self
            .incoming
            .recv()
            .await
            .ok_or_else(|| FcrP2pError::Network(format!("endpoint {} closed", self.addr)))?;
        Ok(FcrConnection::new(stream, format!("{}#peer", self.addr)))
    }
}
