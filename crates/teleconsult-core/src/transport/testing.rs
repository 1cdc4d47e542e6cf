//! In-memory sockets for exercising the transport without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use url::Url;

use super::{Connector, Socket, SocketRead, TransportError};
use crate::protocol::{Message, MessageKind};

const IDLE_WAIT: Duration = Duration::from_millis(2);

/// Client half of an in-memory socket.
pub(crate) struct ScriptedSocket {
    incoming: Receiver<SocketRead>,
    outgoing: Sender<String>,
}

/// Test-side half: what the "server" sees.
pub(crate) struct ScriptedPeer {
    to_client: Sender<SocketRead>,
    from_client: Receiver<String>,
}

pub(crate) fn socket_pair() -> (ScriptedSocket, ScriptedPeer) {
    let (to_client, incoming) = channel();
    let (outgoing, from_client) = channel();
    (
        ScriptedSocket { incoming, outgoing },
        ScriptedPeer { to_client, from_client },
    )
}

impl Socket for ScriptedSocket {
    fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.outgoing
            .send(text)
            .map_err(|_| TransportError::Connect("peer dropped".to_string()))
    }

    fn read(&mut self) -> Result<SocketRead, TransportError> {
        match self.incoming.recv_timeout(IDLE_WAIT) {
            Ok(read) => Ok(read),
            Err(RecvTimeoutError::Timeout) => Ok(SocketRead::Idle),
            Err(RecvTimeoutError::Disconnected) => Ok(SocketRead::Closed),
        }
    }

    fn close(&mut self) {}
}

impl ScriptedPeer {
    pub(crate) fn push_text(&self, text: impl Into<String>) {
        let _ = self.to_client.send(SocketRead::Text(text.into()));
    }

    pub(crate) fn push(&self, message: &Message) {
        if let Ok(json) = message.to_json() {
            self.push_text(json);
        }
    }

    pub(crate) fn close(&self) {
        let _ = self.to_client.send(SocketRead::Closed);
    }

    /// Wait up to `timeout` for the next frame the client sent.
    pub(crate) fn recv(&self, timeout: Duration) -> Option<Message> {
        let text = self.from_client.recv_timeout(timeout).ok()?;
        Message::from_json(&text).ok()
    }

    /// Everything the client has sent so far.
    pub(crate) fn drain(&self) -> Vec<Message> {
        self.from_client
            .try_iter()
            .filter_map(|text| Message::from_json(&text).ok())
            .collect()
    }
}

/// Hands out queued sockets in order; once they run out every open fails.
pub(crate) struct ScriptedConnector {
    sockets: VecDeque<ScriptedSocket>,
    opens: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub(crate) fn new(sockets: Vec<ScriptedSocket>) -> Self {
        Self {
            sockets: sockets.into(),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of open attempts.
    pub(crate) fn opens(&self) -> Arc<AtomicUsize> {
        self.opens.clone()
    }
}

impl Connector for ScriptedConnector {
    type Socket = ScriptedSocket;

    fn open(&mut self, url: &Url) -> Result<ScriptedSocket, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.sockets
            .pop_front()
            .ok_or_else(|| TransportError::Connect(format!("{} refused", url)))
    }
}

/// Minimal relay that forwards every client frame to the other peers,
/// standing in for the session server.
#[derive(Default)]
pub(crate) struct ScriptedRelay {
    peers: Mutex<Vec<ScriptedPeer>>,
}

impl ScriptedRelay {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Connector whose single socket is attached to this relay.
    pub(crate) fn attach(&self) -> ScriptedConnector {
        let (socket, peer) = socket_pair();
        if let Ok(mut peers) = self.peers.lock() {
            peers.push(peer);
        }
        ScriptedConnector::new(vec![socket])
    }

    /// Send a server-originated message to every peer.
    pub(crate) fn broadcast(&self, message: &Message) {
        if let Ok(peers) = self.peers.lock() {
            for peer in peers.iter() {
                peer.push(message);
            }
        }
    }

    /// Forward pending frames, skipping `authenticate` and the sender itself.
    pub(crate) fn pump(&self) -> usize {
        let Ok(peers) = self.peers.lock() else {
            return 0;
        };
        let mut forwarded = 0;
        for (from, peer) in peers.iter().enumerate() {
            for message in peer.drain() {
                if message.kind() == MessageKind::Authenticate {
                    continue;
                }
                for (to, other) in peers.iter().enumerate() {
                    if to != from {
                        other.push(&message);
                    }
                }
                forwarded += 1;
            }
        }
        forwarded
    }
}
