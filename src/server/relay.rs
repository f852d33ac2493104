//! Stateless audio frame fan-out
//!
//! Frames are fire-and-forget: no sequencing, no retransmission, no
//! acknowledgement. Delivery is at-most-once, ordered only as far as the
//! transport orders a single sender-to-receiver path.

use bytes::Bytes;
use tracing::{debug, trace};

use crate::protocol::ConnectionId;
use crate::server::registry::SessionRegistry;

/// Forward one frame to every member of the room except the sender.
///
/// Frames for unknown rooms are dropped without an error (frames are not
/// request/response). Only the room's host may broadcast; frames from any
/// other member are dropped the same silent way.
pub fn relay_frame(
    registry: &SessionRegistry,
    room_code: &str,
    sender: ConnectionId,
    payload: Bytes,
) {
    let Some(room) = registry.room_members(room_code) else {
        trace!("Dropping frame for unknown room {}", room_code);
        return;
    };

    if room.host != sender {
        debug!("Dropping frame from non-host {} in {}", sender, room_code);
        return;
    }

    for member in room.members {
        if member != sender {
            registry.push_frame(member, payload.clone());
        }
    }
}
