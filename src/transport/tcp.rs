//! TCP implementation of the framed transport.
//!
//! Frames are a 4-byte big-endian length prefix followed by exactly that many
//! payload bytes. Sockets are tuned for low latency (TCP_NODELAY, explicit
//! buffer sizes) and optionally for OS-level keepalive via `socket2`. The
//! listener binds with address reuse so a restarted server can reclaim its
//! port immediately.

use super::{
    FrameTransport, TransportConfig, TransportError, TransportState, FRAME_HEADER_LEN,
};
use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Run an I/O future under an optional deadline
async fn bounded<F, T>(deadline: Option<Duration>, fut: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match deadline {
        Some(deadline) => match timeout(deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        },
        None => fut.await,
    }
}

fn map_io(err: std::io::Error) -> TransportError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::UnexpectedEof
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe => TransportError::PeerClosed,
        _ => TransportError::Io(err),
    }
}

/// Read one frame from the stream
///
/// Reads exactly four prefix bytes, validates the announced length against
/// `max_size` before allocating, then reads exactly that many payload bytes.
async fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    reader.read_exact(&mut header).await.map_err(map_io)?;
    let frame_len = u32::from_be_bytes(header) as usize;

    if frame_len > max_size {
        return Err(TransportError::TooLarge {
            size: frame_len,
            limit: max_size,
        });
    }
    if frame_len == 0 {
        return Ok(Vec::new());
    }

    let mut payload = vec![0u8; frame_len];
    reader.read_exact(&mut payload).await.map_err(map_io)?;
    Ok(payload)
}

/// Write one frame to the stream: prefix, payload, flush
async fn write_frame<W>(
    writer: &mut W,
    payload: &[u8],
    max_size: usize,
) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > max_size {
        return Err(TransportError::TooLarge {
            size: payload.len(),
            limit: max_size,
        });
    }
    let header = (payload.len() as u32).to_be_bytes();
    writer.write_all(&header).await.map_err(map_io)?;
    writer.write_all(payload).await.map_err(map_io)?;
    writer.flush().await.map_err(map_io)?;
    Ok(())
}

/// Apply low-latency and keepalive socket options to an accepted stream
fn configure_stream(stream: &TcpStream, config: &TransportConfig) -> std::io::Result<()> {
    let sock = SockRef::from(stream);
    sock.set_nodelay(true)?;
    if config.receive_buffer_size > 0 {
        sock.set_recv_buffer_size(config.receive_buffer_size)?;
        sock.set_send_buffer_size(config.receive_buffer_size)?;
    }
    if config.keep_alive.enabled {
        let keepalive = TcpKeepalive::new()
            .with_time(Duration::from_secs(config.keep_alive.idle_s))
            .with_interval(Duration::from_secs(config.keep_alive.interval_s));
        #[cfg(all(unix, not(target_os = "openbsd")))]
        let keepalive = keepalive.with_retries(config.keep_alive.count);
        sock.set_tcp_keepalive(&keepalive)?;
    }
    Ok(())
}

/// TCP framed transport over one connected stream
pub struct TcpFrameTransport {
    stream: Option<TcpStream>,
    config: TransportConfig,
    state: TransportState,
    peer: Option<SocketAddr>,
}

impl TcpFrameTransport {
    /// Wrap an accepted stream, applying socket options
    pub fn from_stream(stream: TcpStream, config: TransportConfig) -> Self {
        if let Err(e) = configure_stream(&stream, &config) {
            warn!("Failed to configure socket options: {}", e);
        }
        let peer = stream.peer_addr().ok();
        Self {
            stream: Some(stream),
            config,
            state: TransportState::Connected,
            peer,
        }
    }

    /// Connect to a remote endpoint (client side; used by tests and tooling)
    pub async fn connect(
        addr: SocketAddr,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await.map_err(map_io)?;
        debug!("Connected TCP transport to {}", addr);
        Ok(Self::from_stream(stream, config))
    }

    /// Remote endpoint address, when still known
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Split into independently owned receive and send halves
    ///
    /// The session runs its reader and its single writer concurrently; each
    /// half carries the transport configuration it needs.
    pub fn into_split(mut self) -> Result<(FrameReceiver, FrameSender), TransportError> {
        let stream = self.stream.take().ok_or(TransportError::PeerClosed)?;
        let (read_half, write_half) = stream.into_split();
        let receiver = FrameReceiver {
            half: read_half,
            config: self.config.clone(),
            state: TransportState::Connected,
        };
        let sender = FrameSender {
            half: write_half,
            config: self.config,
            state: TransportState::Connected,
        };
        Ok((receiver, sender))
    }
}

#[async_trait]
impl FrameTransport for TcpFrameTransport {
    async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        if self.state != TransportState::Connected {
            return Err(TransportError::PeerClosed);
        }
        let max = self.config.effective_max_message_size();
        let deadline = self.config.send_timeout();
        let stream = self.stream.as_mut().ok_or(TransportError::PeerClosed)?;
        let result = bounded(deadline, write_frame(stream, payload, max)).await;
        if let Err(ref e) = result {
            if !e.is_recoverable() {
                self.state = TransportState::Error;
                self.stream = None;
            }
        }
        result
    }

    async fn receive(&mut self) -> Result<Vec<u8>, TransportError> {
        if self.state != TransportState::Connected {
            return Err(TransportError::PeerClosed);
        }
        let max = self.config.effective_max_message_size();
        let deadline = self.config.receive_timeout();
        let stream = self.stream.as_mut().ok_or(TransportError::PeerClosed)?;
        let result = bounded(deadline, read_frame(stream, max)).await;
        if let Err(ref e) = result {
            if !e.is_recoverable() {
                self.state = TransportState::Error;
                self.stream = None;
            }
        }
        result
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        if self.state == TransportState::Connected {
            self.state = TransportState::Disconnected;
        }
        debug!("TCP framed transport closed");
    }

    fn is_connected(&self) -> bool {
        match &self.stream {
            Some(stream) => {
                // Socket error query; a pending error means the peer is gone
                match SockRef::from(stream).take_error() {
                    Ok(None) => true,
                    Ok(Some(_)) | Err(_) => false,
                }
            }
            None => false,
        }
    }

    fn name(&self) -> &'static str {
        "TCP framed"
    }

    fn max_message_size(&self) -> usize {
        self.config.effective_max_message_size()
    }
}

/// Receive half of a split transport
pub struct FrameReceiver {
    half: OwnedReadHalf,
    config: TransportConfig,
    state: TransportState,
}

impl FrameReceiver {
    /// Receive one frame, bounded by the configured receive timeout
    pub async fn receive(&mut self) -> Result<Vec<u8>, TransportError> {
        if self.state != TransportState::Connected {
            return Err(TransportError::PeerClosed);
        }
        let max = self.config.effective_max_message_size();
        let deadline = self.config.receive_timeout();
        let result = bounded(deadline, read_frame(&mut self.half, max)).await;
        if let Err(ref e) = result {
            if !e.is_recoverable() {
                self.state = TransportState::Error;
            }
        }
        result
    }

    /// Receive with an explicit deadline, overriding the configured one
    pub async fn receive_timeout(
        &mut self,
        deadline: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        if self.state != TransportState::Connected {
            return Err(TransportError::PeerClosed);
        }
        let max = self.config.effective_max_message_size();
        let result = bounded(Some(deadline), read_frame(&mut self.half, max)).await;
        if let Err(ref e) = result {
            if !e.is_recoverable() {
                self.state = TransportState::Error;
            }
        }
        result
    }
}

/// Send half of a split transport
pub struct FrameSender {
    half: OwnedWriteHalf,
    config: TransportConfig,
    state: TransportState,
}

impl FrameSender {
    /// Send one frame, bounded by the configured send timeout
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        if self.state != TransportState::Connected {
            return Err(TransportError::PeerClosed);
        }
        let max = self.config.effective_max_message_size();
        let deadline = self.config.send_timeout();
        let result = bounded(deadline, write_frame(&mut self.half, payload, max)).await;
        if let Err(ref e) = result {
            if !e.is_recoverable() {
                self.state = TransportState::Error;
            }
        }
        result
    }

    /// Shut down the write direction; idempotent
    pub async fn close(&mut self) {
        if self.state == TransportState::Connected {
            let _ = self.half.shutdown().await;
            self.state = TransportState::Disconnected;
        }
    }
}

/// Passive listener handing out framed transports
pub struct FrameListener {
    listener: TcpListener,
    config: TransportConfig,
    local_addr: SocketAddr,
}

impl FrameListener {
    /// Bind a listening socket with address reuse
    pub async fn bind(addr: SocketAddr, config: TransportConfig) -> Result<Self, TransportError> {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(16)?;
        let local_addr = listener.local_addr()?;
        debug!("Framed listener bound on {}", local_addr);
        Ok(Self {
            listener,
            config,
            local_addr,
        })
    }

    /// The bound local address (useful when binding port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept one connection, bounded by the given deadline
    pub async fn accept(
        &self,
        deadline: Option<Duration>,
    ) -> Result<TcpFrameTransport, TransportError> {
        let accept_fut = async {
            let (stream, peer) = self.listener.accept().await.map_err(map_io)?;
            debug!("Accepted connection from {}", peer);
            Ok(TcpFrameTransport::from_stream(stream, self.config.clone()))
        };
        bounded(deadline, accept_fut).await
    }
}
