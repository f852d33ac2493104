//! Authoritative in-memory room table
//!
//! All mutations for a given room code are serialized through the map's
//! entry locking; a join racing a host teardown resolves deterministically
//! (teardown wins, the join observes `RoomNotFound`). Notification
//! delivery is a lock-free push into each peer's bounded outbound queue,
//! so no mutation ever blocks on a slow receiver.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::error::SessionError;
use crate::protocol::{ConnectionId, PlaybackControl, PlaybackState, ServerMessage};
use crate::server::outbound::{Outbound, OutboundQueue};

/// One active room
pub struct Room {
    pub host: ConnectionId,
    /// All members, host included
    participants: HashSet<ConnectionId>,
    pub state: PlaybackState,
}

impl Room {
    fn new(host: ConnectionId) -> Self {
        let mut participants = HashSet::new();
        participants.insert(host);
        Self {
            host,
            participants,
            state: PlaybackState::default(),
        }
    }

    /// Total occupancy including the host
    pub fn occupancy(&self) -> usize {
        self.participants.len()
    }
}

/// Host and members of a room at one instant
pub(crate) struct RoomMembers {
    pub host: ConnectionId,
    pub members: Vec<ConnectionId>,
}

/// Registry of active rooms and connected peers
pub struct SessionRegistry {
    rooms: DashMap<String, Room>,
    peers: DashMap<ConnectionId, Arc<OutboundQueue>>,
    started_at: Instant,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            peers: DashMap::new(),
            started_at: Instant::now(),
        }
    }

    /// Attach a connection's outbound queue
    pub fn register_peer(&self, conn: ConnectionId, queue: Arc<OutboundQueue>) {
        self.peers.insert(conn, queue);
    }

    /// Detach a connection's outbound queue. Call after
    /// [`remove_connection`](Self::remove_connection) so teardown
    /// notifications for other members still flow.
    pub fn unregister_peer(&self, conn: ConnectionId) {
        self.peers.remove(&conn);
    }

    /// Create a room owned by `host`. Colliding codes are rejected.
    pub fn create_room(&self, room_code: &str, host: ConnectionId) -> Result<(), SessionError> {
        match self.rooms.entry(room_code.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(SessionError::RoomCodeInUse),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Room::new(host));
                info!("Room created: {} by host {}", room_code, host);
                Ok(())
            }
        }
    }

    /// Add `conn` to a room. Notifies the host, confirms to the joiner and
    /// broadcasts the new occupancy. Returns the occupancy including host.
    pub fn join_room(&self, room_code: &str, conn: ConnectionId) -> Result<usize, SessionError> {
        let mut room = self
            .rooms
            .get_mut(room_code)
            .ok_or(SessionError::RoomNotFound)?;

        room.participants.insert(conn);
        let count = room.participants.len();

        self.send_to(
            conn,
            &ServerMessage::RoomJoined {
                room_code: room_code.to_string(),
            },
        );
        self.send_to(room.host, &ServerMessage::ParticipantJoined { connection_id: conn });
        self.broadcast_count(&room, count);

        info!("Connection {} joined room {} ({} members)", conn, room_code, count);
        Ok(count)
    }

    /// Remove `conn` from every room it belongs to.
    ///
    /// Host membership tears the room down: every other member receives
    /// `room-closed` exactly once and the room is deleted. Plain
    /// membership removes the connection, notifies the host and broadcasts
    /// the new occupancy. The scan deliberately covers all rooms so a
    /// connection that somehow holds several memberships is fully cleaned
    /// up.
    pub fn remove_connection(&self, conn: ConnectionId) {
        self.rooms.retain(|room_code, room| {
            if room.host == conn {
                info!("Host disconnected, closing room {}", room_code);
                for &member in &room.participants {
                    if member != conn {
                        self.send_to(member, &ServerMessage::RoomClosed);
                    }
                }
                false
            } else if room.participants.remove(&conn) {
                let count = room.participants.len();
                self.send_to(room.host, &ServerMessage::ParticipantLeft { connection_id: conn });
                self.broadcast_count(room, count);
                debug!("Connection {} left room {} ({} members)", conn, room_code, count);
                true
            } else {
                true
            }
        });
    }

    /// Replace a room's playback state wholesale. Applies only when `conn`
    /// is the room's recorded host; anything else is silently rejected.
    /// Returns the stamped state on acceptance.
    pub fn record_state(
        &self,
        room_code: &str,
        conn: ConnectionId,
        control: PlaybackControl,
    ) -> Option<PlaybackState> {
        let mut room = self.rooms.get_mut(room_code)?;
        if room.host != conn {
            debug!("Rejected state write from non-host {} in {}", conn, room_code);
            return None;
        }
        let state = PlaybackState::from_control(control);
        room.state = state;
        Some(state)
    }

    /// Snapshot a room's host and membership
    pub(crate) fn room_members(&self, room_code: &str) -> Option<RoomMembers> {
        self.rooms.get(room_code).map(|room| RoomMembers {
            host: room.host,
            members: room.participants.iter().copied().collect(),
        })
    }

    pub fn has_room(&self, room_code: &str) -> bool {
        self.rooms.contains_key(room_code)
    }

    /// Occupancy of a room including the host
    pub fn occupancy(&self, room_code: &str) -> Option<usize> {
        self.rooms.get(room_code).map(|room| room.occupancy())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn connection_count(&self) -> usize {
        self.peers.len()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Push a control message to one peer; unknown peers are skipped
    pub(crate) fn send_to(&self, conn: ConnectionId, message: &ServerMessage) {
        if let Some(queue) = self.peers.get(&conn) {
            if let Ok(json) = serde_json::to_string(message) {
                queue.push(Outbound::Text(json));
            }
        }
    }

    /// Push a bare audio frame to one peer
    pub(crate) fn push_frame(&self, conn: ConnectionId, payload: Bytes) {
        if let Some(queue) = self.peers.get(&conn) {
            queue.push(Outbound::Binary(payload));
        }
    }

    fn broadcast_count(&self, room: &Room, count: usize) {
        for &member in &room.participants {
            self.send_to(member, &ServerMessage::RoomCountUpdate { count });
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::OUTBOUND_QUEUE_CAPACITY;

    fn connect(registry: &SessionRegistry) -> (ConnectionId, Arc<OutboundQueue>) {
        let conn = ConnectionId::new();
        let queue = OutboundQueue::new(OUTBOUND_QUEUE_CAPACITY);
        registry.register_peer(conn, queue.clone());
        (conn, queue)
    }

    fn drain(queue: &OutboundQueue) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Some(payload) = queue.try_pop() {
            match payload {
                Outbound::Text(json) => messages.push(serde_json::from_str(&json).unwrap()),
                Outbound::Binary(_) => panic!("unexpected binary payload"),
            }
        }
        messages
    }

    #[test]
    fn test_create_then_join_notifies_host_and_counts() {
        let registry = SessionRegistry::new();
        let (host, host_queue) = connect(&registry);
        let (client, client_queue) = connect(&registry);

        registry.create_room("ABCDEF", host).unwrap();
        let count = registry.join_room("ABCDEF", client).unwrap();
        assert_eq!(count, 2);

        let host_messages = drain(&host_queue);
        assert!(host_messages
            .contains(&ServerMessage::ParticipantJoined { connection_id: client }));
        assert!(host_messages.contains(&ServerMessage::RoomCountUpdate { count: 2 }));

        let client_messages = drain(&client_queue);
        assert_eq!(
            client_messages[0],
            ServerMessage::RoomJoined {
                room_code: "ABCDEF".to_string()
            }
        );
        assert!(client_messages.contains(&ServerMessage::RoomCountUpdate { count: 2 }));
    }

    #[test]
    fn test_room_code_collision_rejected() {
        let registry = SessionRegistry::new();
        let (first, _) = connect(&registry);
        let (second, _) = connect(&registry);

        registry.create_room("SAME", first).unwrap();
        assert_eq!(
            registry.create_room("SAME", second),
            Err(SessionError::RoomCodeInUse)
        );
        // The original room is untouched
        assert_eq!(registry.occupancy("SAME"), Some(1));
    }

    #[test]
    fn test_join_unknown_room_changes_nothing() {
        let registry = SessionRegistry::new();
        let (conn, queue) = connect(&registry);

        assert_eq!(
            registry.join_room("NOWHERE", conn),
            Err(SessionError::RoomNotFound)
        );
        assert!(drain(&queue).is_empty());
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn test_host_disconnect_closes_room_exactly_once() {
        let registry = SessionRegistry::new();
        let (host, _host_queue) = connect(&registry);
        let (a, a_queue) = connect(&registry);
        let (b, b_queue) = connect(&registry);

        registry.create_room("ABCDEF", host).unwrap();
        registry.join_room("ABCDEF", a).unwrap();
        registry.join_room("ABCDEF", b).unwrap();
        drain(&a_queue);
        drain(&b_queue);

        registry.remove_connection(host);
        registry.unregister_peer(host);

        for queue in [&a_queue, &b_queue] {
            let messages = drain(queue);
            let closed = messages
                .iter()
                .filter(|m| matches!(m, ServerMessage::RoomClosed))
                .count();
            assert_eq!(closed, 1);
            // No count update accompanies teardown
            assert!(!messages
                .iter()
                .any(|m| matches!(m, ServerMessage::RoomCountUpdate { .. })));
        }

        // The room is unreachable immediately afterwards
        assert_eq!(
            registry.join_room("ABCDEF", a),
            Err(SessionError::RoomNotFound)
        );
    }

    #[test]
    fn test_participant_disconnect_updates_host() {
        let registry = SessionRegistry::new();
        let (host, host_queue) = connect(&registry);
        let (client, _client_queue) = connect(&registry);

        registry.create_room("ROOM", host).unwrap();
        registry.join_room("ROOM", client).unwrap();
        drain(&host_queue);

        registry.remove_connection(client);
        registry.unregister_peer(client);

        let messages = drain(&host_queue);
        assert!(messages.contains(&ServerMessage::ParticipantLeft { connection_id: client }));
        assert!(messages.contains(&ServerMessage::RoomCountUpdate { count: 1 }));
        assert_eq!(registry.occupancy("ROOM"), Some(1));
    }

    #[test]
    fn test_occupancy_tracks_every_mutation() {
        let registry = SessionRegistry::new();
        let (host, host_queue) = connect(&registry);
        registry.create_room("ROOM", host).unwrap();
        assert_eq!(registry.occupancy("ROOM"), Some(1));

        let mut clients = Vec::new();
        for expected in 2..=4 {
            let (conn, queue) = connect(&registry);
            registry.join_room("ROOM", conn).unwrap();
            assert_eq!(registry.occupancy("ROOM"), Some(expected));

            // The broadcast count matches the true set size at that instant
            let last_count = drain(&host_queue)
                .into_iter()
                .rev()
                .find_map(|m| match m {
                    ServerMessage::RoomCountUpdate { count } => Some(count),
                    _ => None,
                })
                .unwrap();
            assert_eq!(last_count, expected);
            clients.push((conn, queue));
        }

        for (index, (conn, _)) in clients.iter().enumerate() {
            registry.remove_connection(*conn);
            assert_eq!(registry.occupancy("ROOM"), Some(3 - index));
        }
    }

    #[test]
    fn test_multi_membership_disconnect_hits_both_branches() {
        // One connection hosting one room while a member of another; the
        // defensive scan must fire both teardown and removal.
        let registry = SessionRegistry::new();
        let (dual, _dual_queue) = connect(&registry);
        let (other_host, other_host_queue) = connect(&registry);
        let (listener, listener_queue) = connect(&registry);

        registry.create_room("MINE", dual).unwrap();
        registry.join_room("MINE", listener).unwrap();
        registry.create_room("THEIRS", other_host).unwrap();
        registry.join_room("THEIRS", dual).unwrap();
        drain(&listener_queue);
        drain(&other_host_queue);

        registry.remove_connection(dual);

        assert!(!registry.has_room("MINE"));
        assert!(registry.has_room("THEIRS"));
        assert!(drain(&listener_queue)
            .iter()
            .any(|m| matches!(m, ServerMessage::RoomClosed)));
        assert!(drain(&other_host_queue)
            .contains(&ServerMessage::ParticipantLeft { connection_id: dual }));
    }

    #[test]
    fn test_record_state_host_only() {
        let registry = SessionRegistry::new();
        let (host, _) = connect(&registry);
        let (client, _) = connect(&registry);

        registry.create_room("ROOM", host).unwrap();
        registry.join_room("ROOM", client).unwrap();

        let control = PlaybackControl {
            is_playing: true,
            position: 30.5,
        };
        assert!(registry.record_state("ROOM", client, control).is_none());
        assert!(registry.record_state("NOWHERE", host, control).is_none());

        let state = registry.record_state("ROOM", host, control).unwrap();
        assert!(state.is_playing);
        assert_eq!(state.position, 30.5);
    }

    #[test]
    fn test_state_replaced_wholesale() {
        let registry = SessionRegistry::new();
        let (host, _) = connect(&registry);
        registry.create_room("ROOM", host).unwrap();

        registry
            .record_state("ROOM", host, PlaybackControl { is_playing: true, position: 10.0 })
            .unwrap();
        let second = registry
            .record_state("ROOM", host, PlaybackControl { is_playing: false, position: 2.0 })
            .unwrap();

        // Last write wins with no merge
        assert!(!second.is_playing);
        assert_eq!(second.position, 2.0);
    }
}
