//! Socket seam between the transport worker and the network.

use std::net::TcpStream;
use std::time::Duration;

use tungstenite::stream::MaybeTlsStream;
use tungstenite::{WebSocket, connect};
use url::Url;

use super::TransportError;

/// Read timeout on the underlying TCP stream, so the worker can interleave
/// outgoing commands with incoming frames.
const READ_TIMEOUT: Duration = Duration::from_millis(50);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a single read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketRead {
    /// A text frame.
    Text(String),
    /// Nothing arrived within the read timeout.
    Idle,
    /// The peer closed the connection.
    Closed,
}

/// An open, bidirectional text socket.
pub trait Socket: Send {
    fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Read the next frame, returning [`SocketRead::Idle`] after a short timeout.
    fn read(&mut self) -> Result<SocketRead, TransportError>;

    fn close(&mut self);
}

/// Opens sockets. Owned by the transport worker thread.
pub trait Connector: Send + 'static {
    type Socket: Socket;

    fn open(&mut self, url: &Url) -> Result<Self::Socket, TransportError>;
}

/// WebSocket connector built on `tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    type Socket = TungsteniteSocket;

    fn open(&mut self, url: &Url) -> Result<TungsteniteSocket, TransportError> {
        log::info!("Connecting to {}", url);
        let (mut socket, response) =
            connect(url.as_str()).map_err(|e| TransportError::Connect(e.to_string()))?;
        log::info!("WebSocket connected, status: {}", response.status());

        match socket.get_mut() {
            MaybeTlsStream::Plain(tcp) => {
                let _ = tcp.set_read_timeout(Some(READ_TIMEOUT));
                let _ = tcp.set_write_timeout(Some(WRITE_TIMEOUT));
            }
            #[allow(unreachable_patterns)]
            _ => {
                log::debug!("TLS or other stream - using default timeout handling");
            }
        }

        Ok(TungsteniteSocket { inner: socket })
    }
}

/// A live `tungstenite` WebSocket.
pub struct TungsteniteSocket {
    inner: WebSocket<MaybeTlsStream<TcpStream>>,
}

impl Socket for TungsteniteSocket {
    fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        log::trace!("WebSocket sending {} bytes", text.len());
        self.inner.send(tungstenite::Message::Text(text))?;
        Ok(())
    }

    fn read(&mut self) -> Result<SocketRead, TransportError> {
        match self.inner.read() {
            Ok(tungstenite::Message::Text(text)) => Ok(SocketRead::Text(text)),
            Ok(tungstenite::Message::Ping(data)) => {
                let _ = self.inner.send(tungstenite::Message::Pong(data));
                Ok(SocketRead::Idle)
            }
            Ok(tungstenite::Message::Close(_)) => {
                log::info!("WebSocket received close frame");
                Ok(SocketRead::Closed)
            }
            Ok(_) => Ok(SocketRead::Idle),
            Err(tungstenite::Error::Io(ref e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(SocketRead::Idle)
            }
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                Ok(SocketRead::Closed)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) {
        let _ = self.inner.close(None);
        let _ = self.inner.flush();
    }
}
