use std::collections::HashMap;

use crate::{
    error::SyncError,
    types::{ConnectionState, RoomLifecycle, SyncEvent},
};

/// Socket connection state plus per-room membership lifecycle.
///
/// Rooms move `Inactive -> Joining -> Joined -> Leaving -> Inactive`. Joins are
/// only allowed while connected; a disconnect drops every room back to
/// `Inactive` because the server forgets memberships with the socket.
#[derive(Debug, Clone, Default)]
pub struct RoomStateMachine {
    connection: ConnectionState,
    rooms: HashMap<String, RoomLifecycle>,
}

impl RoomStateMachine {
    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    pub fn lifecycle(&self, room_id: &str) -> RoomLifecycle {
        self.rooms.get(room_id).copied().unwrap_or_default()
    }

    /// Returns an event only when the state actually changed.
    pub fn on_connected(&mut self) -> Option<SyncEvent> {
        if self.connection == ConnectionState::Connected {
            return None;
        }
        self.connection = ConnectionState::Connected;
        Some(SyncEvent::ConnectionChanged {
            state: ConnectionState::Connected,
        })
    }

    /// Mark the socket as down and drop all memberships.
    pub fn on_disconnected(&mut self) -> Vec<SyncEvent> {
        if self.connection == ConnectionState::Disconnected {
            return Vec::new();
        }
        self.connection = ConnectionState::Disconnected;

        let mut events = vec![SyncEvent::ConnectionChanged {
            state: ConnectionState::Disconnected,
        }];
        for (room_id, lifecycle) in self.rooms.drain() {
            if lifecycle != RoomLifecycle::Inactive {
                events.push(SyncEvent::RoomLifecycleChanged {
                    room_id,
                    lifecycle: RoomLifecycle::Inactive,
                });
            }
        }
        events
    }

    pub fn begin_join(&mut self, room_id: &str) -> Result<SyncEvent, SyncError> {
        if !self.is_connected() {
            return Err(SyncError::not_connected("join_room"));
        }
        self.transition(room_id, &[RoomLifecycle::Inactive], RoomLifecycle::Joining, "begin_join")
    }

    pub fn finish_join(&mut self, room_id: &str) -> Result<SyncEvent, SyncError> {
        self.transition(room_id, &[RoomLifecycle::Joining], RoomLifecycle::Joined, "finish_join")
    }

    /// Roll a failed join back to `Inactive`.
    pub fn abort_join(&mut self, room_id: &str) -> Result<SyncEvent, SyncError> {
        self.transition(room_id, &[RoomLifecycle::Joining], RoomLifecycle::Inactive, "abort_join")
    }

    pub fn begin_leave(&mut self, room_id: &str) -> Result<SyncEvent, SyncError> {
        self.transition(
            room_id,
            &[RoomLifecycle::Joining, RoomLifecycle::Joined],
            RoomLifecycle::Leaving,
            "begin_leave",
        )
    }

    pub fn finish_leave(&mut self, room_id: &str) -> Result<SyncEvent, SyncError> {
        self.transition(room_id, &[RoomLifecycle::Leaving], RoomLifecycle::Inactive, "finish_leave")
    }

    /// Forget a room regardless of its state (room removed).
    pub fn forget(&mut self, room_id: &str) -> Option<SyncEvent> {
        match self.rooms.remove(room_id) {
            Some(lifecycle) if lifecycle != RoomLifecycle::Inactive => {
                Some(SyncEvent::RoomLifecycleChanged {
                    room_id: room_id.to_owned(),
                    lifecycle: RoomLifecycle::Inactive,
                })
            }
            _ => None,
        }
    }

    pub fn reset(&mut self) {
        self.connection = ConnectionState::Disconnected;
        self.rooms.clear();
    }

    fn transition(
        &mut self,
        room_id: &str,
        expected: &[RoomLifecycle],
        next: RoomLifecycle,
        action: &str,
    ) -> Result<SyncEvent, SyncError> {
        let current = self.lifecycle(room_id);
        if !expected.contains(&current) {
            return Err(SyncError::invalid_state(room_id, current, action));
        }
        if next == RoomLifecycle::Inactive {
            self.rooms.remove(room_id);
        } else {
            self.rooms.insert(room_id.to_owned(), next);
        }
        Ok(SyncEvent::RoomLifecycleChanged {
            room_id: room_id.to_owned(),
            lifecycle: next,
        })
    }
}
