//! Persisted room/message store.
//!
//! The store is the only writer of room and message state. Every mutation
//! keeps each room's list deduplicated and ordered, then hands a snapshot to
//! the configured [`StorePersistence`]. Storage errors are logged and the
//! in-memory state stays authoritative; only [`RoomStore::clear`] reports them.

use std::{mem, sync::Arc};

use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::{
    error::PersistenceError,
    persistence::{STORE_SCHEMA_VERSION, StorePersistence, StoreSnapshot},
    timeline::{MergeMode, MergeReport, insert_optimistic, merge_messages},
    types::{DeliveryState, Message, PageCursor, PeerSummary, RoomSummary},
};

const UNKNOWN_PEER_NAME: &str = "Unknown";

/// One chat room with its cached messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Room {
    pub room_id: String,
    #[serde(default)]
    pub peer: PeerSummary,
    #[serde(default)]
    pub last_message_preview: Option<String>,
    #[serde(default)]
    pub last_activity_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_count: u64,
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    cursor: PageCursor,
}

impl Room {
    /// Room created before its summary is known.
    fn placeholder(room_id: &str) -> Self {
        Self {
            room_id: room_id.to_owned(),
            peer: PeerSummary {
                display_name: UNKNOWN_PEER_NAME.to_owned(),
                ..PeerSummary::default()
            },
            last_message_preview: None,
            last_activity_at: None,
            unread_count: 0,
            messages: Vec::new(),
            cursor: PageCursor::default(),
        }
    }

    /// Messages in chronological order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn cursor(&self) -> PageCursor {
        self.cursor
    }

    /// Timestamp of the newest server-confirmed message.
    ///
    /// Unconfirmed sends carry the client clock and are skipped.
    pub fn last_confirmed_timestamp(&self) -> Option<DateTime<Utc>> {
        self.messages
            .iter()
            .rev()
            .find(|message| !message.is_unconfirmed())
            .map(|message| message.timestamp)
    }

    fn apply_summary(&mut self, summary: RoomSummary) {
        self.peer = summary.peer;
        self.unread_count = summary.unread_count;

        let listing_is_newer = match (summary.last_message_at, self.last_activity_at) {
            (Some(listed), Some(local)) => listed >= local,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => true,
        };
        if listing_is_newer {
            self.last_message_preview = summary.last_message;
            self.last_activity_at = summary.last_message_at;
        }
    }

    fn refresh_activity(&mut self) {
        let Some(latest) = self.messages.last() else {
            return;
        };
        if self
            .last_activity_at
            .is_none_or(|current| latest.timestamp >= current)
        {
            self.last_message_preview = Some(latest.text.clone());
            self.last_activity_at = Some(latest.timestamp);
        }
    }
}

/// In-memory room map with an optional save-after-mutation hook.
pub struct RoomStore {
    rooms: IndexMap<String, Room>,
    tolerance: TimeDelta,
    persistence: Option<Arc<dyn StorePersistence>>,
}

impl std::fmt::Debug for RoomStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomStore")
            .field("rooms", &self.rooms.len())
            .field("tolerance_ms", &self.tolerance.num_milliseconds())
            .field("persistent", &self.persistence.is_some())
            .finish()
    }
}

impl RoomStore {
    /// Empty, non-persistent store.
    pub fn new(dedup_tolerance_ms: u64) -> Self {
        Self {
            rooms: IndexMap::new(),
            tolerance: tolerance_from_ms(dedup_tolerance_ms),
            persistence: None,
        }
    }

    /// Replace the dedup window used by subsequent merges.
    pub fn set_dedup_tolerance(&mut self, dedup_tolerance_ms: u64) {
        self.tolerance = tolerance_from_ms(dedup_tolerance_ms);
    }

    /// Attach a persistence backend; subsequent mutations are saved.
    pub fn with_persistence(mut self, persistence: Arc<dyn StorePersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Load the last saved state, re-validating every room.
    ///
    /// Unreadable or newer-schema snapshots reset the store to empty.
    pub fn rehydrate(persistence: Arc<dyn StorePersistence>, dedup_tolerance_ms: u64) -> Self {
        let mut store = Self::new(dedup_tolerance_ms).with_persistence(Arc::clone(&persistence));

        let snapshot = match persistence.load() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!("no persisted chat store; starting empty");
                return store;
            }
            Err(err) => {
                warn!(error = %err, "persisted chat store unreadable; resetting");
                store.discard_persisted();
                return store;
            }
        };

        if snapshot.schema_version > STORE_SCHEMA_VERSION {
            warn!(
                found = snapshot.schema_version,
                supported = STORE_SCHEMA_VERSION,
                "persisted chat store has a newer schema; resetting"
            );
            store.discard_persisted();
            return store;
        }

        for mut room in snapshot.rooms {
            let raw = mem::take(&mut room.messages);
            let room_id = room.room_id.clone();
            let entry = store
                .rooms
                .entry(room_id.clone())
                .or_insert_with(|| Room {
                    messages: Vec::new(),
                    ..room
                });
            let revalidated = raw
                .into_iter()
                .map(|mut message| {
                    message.room_id = room_id.clone();
                    if message.delivery == DeliveryState::Pending {
                        message.delivery = DeliveryState::Failed;
                    }
                    message
                })
                .collect();
            merge_messages(&mut entry.messages, revalidated, MergeMode::Append, store.tolerance);
        }

        info!(
            rooms = store.rooms.len(),
            schema_version = snapshot.schema_version,
            "rehydrated chat store"
        );
        if snapshot.schema_version < STORE_SCHEMA_VERSION {
            store.persist();
        }
        store
    }

    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    /// Rooms in listing order.
    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Messages of a room, empty when the room is unknown.
    pub fn messages(&self, room_id: &str) -> &[Message] {
        self.rooms
            .get(room_id)
            .map(|room| room.messages())
            .unwrap_or_default()
    }

    pub fn last_confirmed_timestamp(&self, room_id: &str) -> Option<DateTime<Utc>> {
        self.rooms.get(room_id)?.last_confirmed_timestamp()
    }

    pub fn cursor(&self, room_id: &str) -> PageCursor {
        self.rooms
            .get(room_id)
            .map(|room| room.cursor)
            .unwrap_or_default()
    }

    /// Replace room metadata from a listing without touching cached messages.
    ///
    /// Listed rooms come first in listing order; rooms only known locally are
    /// kept after them until explicitly removed.
    pub fn upsert_room_summaries(&mut self, summaries: Vec<RoomSummary>) {
        let mut next = IndexMap::with_capacity(summaries.len().max(self.rooms.len()));
        for summary in summaries {
            if let Some(room) = next.get_mut(&summary.room_id) {
                Room::apply_summary(room, summary);
                continue;
            }
            let room_id = summary.room_id.clone();
            let mut room = self
                .rooms
                .shift_remove(&room_id)
                .unwrap_or_else(|| Room::placeholder(&room_id));
            room.apply_summary(summary);
            next.insert(room_id, room);
        }

        let listed = next.len();
        for (room_id, room) in self.rooms.drain(..) {
            next.insert(room_id, room);
        }
        self.rooms = next;

        debug!(listed, total = self.rooms.len(), "room summaries upserted");
        self.persist();
    }

    /// Create an empty room entry if it is missing. Returns `true` when created.
    pub fn ensure_room(&mut self, room_id: &str) -> bool {
        if self.rooms.contains_key(room_id) {
            return false;
        }
        self.rooms
            .insert(room_id.to_owned(), Room::placeholder(room_id));
        debug!(%room_id, "created placeholder room");
        self.persist();
        true
    }

    /// Deduplicate `incoming` against the room and merge it.
    ///
    /// Unknown rooms are created with placeholder metadata first.
    pub fn merge_messages(
        &mut self,
        room_id: &str,
        incoming: Vec<Message>,
        mode: MergeMode,
    ) -> MergeReport {
        let created = !self.rooms.contains_key(room_id);
        let tolerance = self.tolerance;
        let room = self
            .rooms
            .entry(room_id.to_owned())
            .or_insert_with(|| Room::placeholder(room_id));
        if created {
            debug!(%room_id, "message for unknown room; created placeholder");
        }

        let incoming = incoming
            .into_iter()
            .map(|mut message| {
                message.room_id = room_id.to_owned();
                message
            })
            .collect();
        let report = merge_messages(&mut room.messages, incoming, mode, tolerance);
        room.refresh_activity();

        if created || report.changed() {
            self.persist();
        }
        report
    }

    /// Insert a just-sent message immediately, without deduplication.
    pub fn add_optimistic_message(&mut self, room_id: &str, mut message: Message) {
        message.room_id = room_id.to_owned();
        let room = self
            .rooms
            .entry(room_id.to_owned())
            .or_insert_with(|| Room::placeholder(room_id));
        insert_optimistic(&mut room.messages, message);
        room.refresh_activity();
        self.persist();
    }

    /// Local entry for a message this client sent.
    pub fn find_by_client_temp_id(&self, room_id: &str, client_temp_id: &str) -> Option<&Message> {
        self.messages(room_id)
            .iter()
            .find(|message| message.client_temp_id.as_deref() == Some(client_temp_id))
    }

    /// Change the delivery state of an unconfirmed local message.
    ///
    /// Confirmed messages are never downgraded. Returns `true` when changed.
    pub fn set_delivery(
        &mut self,
        room_id: &str,
        client_temp_id: &str,
        delivery: DeliveryState,
    ) -> bool {
        let Some(message) = self.rooms.get_mut(room_id).and_then(|room| {
            room.messages
                .iter_mut()
                .find(|message| message.client_temp_id.as_deref() == Some(client_temp_id))
        }) else {
            return false;
        };
        if !message.is_unconfirmed() || message.delivery == delivery {
            return false;
        }
        message.delivery = delivery;
        trace!(%room_id, %client_temp_id, ?delivery, "delivery state updated");
        self.persist();
        true
    }

    pub fn increment_unread(&mut self, room_id: &str, count: u64) {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return;
        };
        room.unread_count = room.unread_count.saturating_add(count);
        self.persist();
    }

    pub fn mark_read(&mut self, room_id: &str) {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return;
        };
        if room.unread_count == 0 {
            return;
        }
        room.unread_count = 0;
        self.persist();
    }

    /// Rewind pagination to the most recent page (room activation).
    pub fn reset_cursor(&mut self, room_id: &str) {
        if let Some(room) = self.rooms.get_mut(room_id) {
            room.cursor = PageCursor::default();
            self.persist();
        }
    }

    /// Move the cursor past one successfully fetched page.
    pub fn advance_cursor(&mut self, room_id: &str, exhausted: bool) {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return;
        };
        room.cursor.next_page = room.cursor.next_page.saturating_add(1);
        room.cursor.exhausted |= exhausted;
        self.persist();
    }

    /// Flag that no older history exists.
    pub fn mark_exhausted(&mut self, room_id: &str) {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return;
        };
        if !room.cursor.exhausted {
            room.cursor.exhausted = true;
            self.persist();
        }
    }

    /// Remove a room and all its messages.
    pub fn remove_room(&mut self, room_id: &str) -> Option<Room> {
        let removed = self.rooms.shift_remove(room_id);
        if removed.is_some() {
            debug!(%room_id, "room removed from store");
            self.persist();
        }
        removed
    }

    /// Drop every room and the persisted copy (logout).
    ///
    /// The in-memory state is always emptied; the error reports a persisted
    /// copy that could not be removed.
    pub fn clear(&mut self) -> Result<(), PersistenceError> {
        self.rooms.clear();
        match &self.persistence {
            Some(persistence) => persistence.clear(),
            None => Ok(()),
        }
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            schema_version: STORE_SCHEMA_VERSION,
            rooms: self.rooms.values().cloned().collect(),
        }
    }

    fn persist(&self) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        if let Err(err) = persistence.save(&self.snapshot()) {
            warn!(error = %err, "failed saving chat store");
        }
    }

    fn discard_persisted(&self) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        if let Err(err) = persistence.clear() {
            warn!(error = %err, "failed clearing persisted chat store");
        }
    }
}

/// Millisecond window as a `TimeDelta`, saturating instead of wrapping.
fn tolerance_from_ms(ms: u64) -> TimeDelta {
    i64::try_from(ms)
        .ok()
        .and_then(TimeDelta::try_milliseconds)
        .unwrap_or(TimeDelta::MAX)
}
