//! Playback-control state propagation
//!
//! Shares the per-connection channel with the frame relay but runs on its
//! own cadence. Last write wins; there is no versioning, so an update that
//! arrives after a structurally later one becomes authoritative.

use tracing::debug;

use crate::protocol::{ConnectionId, PlaybackControl, ServerMessage};
use crate::server::registry::SessionRegistry;

/// Record a host's playback state and broadcast it to every other member.
///
/// A write from anyone but the room's host is rejected silently: no
/// broadcast, no error to the sender. Returns whether the state was
/// applied.
pub fn publish_state(
    registry: &SessionRegistry,
    room_code: &str,
    sender: ConnectionId,
    control: PlaybackControl,
) -> bool {
    let Some(state) = registry.record_state(room_code, sender, control) else {
        return false;
    };

    if let Some(room) = registry.room_members(room_code) {
        for member in room.members {
            if member != sender {
                registry.send_to(member, &ServerMessage::StateUpdate { state });
            }
        }
    }

    debug!(
        "State update for {}: playing={} position={:.2}",
        room_code, state.is_playing, state.position
    );
    true
}
