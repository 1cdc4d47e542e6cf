//! Per-session broadcast rooms.

use std::collections::HashSet;

use dashmap::DashMap;
use teleconsult_core::protocol::Message;
use tokio::sync::broadcast;

/// Sender id for messages originated by the server itself.
pub const SERVER_SENDER: &str = "server";

/// A relayed message tagged with the peer it came from.
pub type Envelope = (String, Message);

struct Room {
    tx: broadcast::Sender<Envelope>,
    peers: HashSet<String>,
}

impl Room {
    fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            peers: HashSet::new(),
        }
    }
}

/// Connected peers of every live session.
pub struct Rooms {
    rooms: DashMap<String, Room>,
    capacity: usize,
}

impl Rooms {
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Add a peer to a session, creating the room on first join.
    pub fn join(&self, session_id: &str, peer_id: &str) -> broadcast::Receiver<Envelope> {
        let mut room = self
            .rooms
            .entry(session_id.to_string())
            .or_insert_with(|| Room::new(self.capacity));
        room.peers.insert(peer_id.to_string());
        room.tx.subscribe()
    }

    /// Remove a peer. Empty rooms are dropped.
    pub fn leave(&self, session_id: &str, peer_id: &str) {
        let empty = match self.rooms.get_mut(session_id) {
            Some(mut room) => {
                room.peers.remove(peer_id);
                room.peers.is_empty()
            }
            None => return,
        };
        if empty {
            self.rooms.remove_if(session_id, |_, room| room.peers.is_empty());
        }
    }

    /// Send to every subscriber of a session. Returns how many received it.
    pub fn broadcast(&self, session_id: &str, from: &str, message: Message) -> usize {
        match self.rooms.get(session_id) {
            Some(room) => room.tx.send((from.to_string(), message)).unwrap_or(0),
            None => 0,
        }
    }

    pub fn peer_count(&self, session_id: &str) -> usize {
        self.rooms.get(session_id).map_or(0, |room| room.peers.len())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_and_leave() {
        let rooms = Rooms::new(16);
        let _a = rooms.join("s1", "a");
        let _b = rooms.join("s1", "b");
        let _c = rooms.join("s2", "c");
        assert_eq!(rooms.peer_count("s1"), 2);
        assert_eq!(rooms.room_count(), 2);

        rooms.leave("s1", "a");
        assert_eq!(rooms.peer_count("s1"), 1);
        rooms.leave("s1", "b");
        assert_eq!(rooms.peer_count("s1"), 0);
        assert_eq!(rooms.room_count(), 1);

        // Unknown room or peer is a no-op.
        rooms.leave("nope", "a");
        rooms.leave("s2", "zz");
        assert_eq!(rooms.peer_count("s2"), 1);
    }

    #[test]
    fn test_broadcast_is_scoped_to_session() {
        let rooms = Rooms::new(16);
        let mut a = rooms.join("s1", "a");
        let mut other = rooms.join("s2", "x");

        assert_eq!(rooms.broadcast("s1", "b", Message::error("hello")), 1);
        let (from, message) = a.try_recv().unwrap();
        assert_eq!(from, "b");
        assert!(matches!(message, Message::Error(ref e) if e.message == "hello"));
        assert!(other.try_recv().is_err());

        assert_eq!(rooms.broadcast("missing", SERVER_SENDER, Message::error("x")), 0);
    }

    #[test]
    fn test_sender_receives_own_broadcast_tagged() {
        // Echo suppression happens per connection, using the sender tag.
        let rooms = Rooms::new(16);
        let mut a = rooms.join("s1", "a");
        rooms.broadcast("s1", "a", Message::error("mine"));
        let (from, _) = a.try_recv().unwrap();
        assert_eq!(from, "a");
    }
}
