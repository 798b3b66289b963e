//! Collaborator contracts implemented outside this crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::SyncError,
    types::{OutgoingMessage, RoomSummary, WireMessage},
};

/// Authoritative paginated history service.
#[async_trait]
pub trait HistoryApi: Send + Sync {
    async fn list_rooms(&self) -> Result<Vec<RoomSummary>, SyncError>;

    /// One page of a room's history; page 0 is the most recent.
    async fn list_messages(
        &self,
        room_id: &str,
        page: u32,
        limit: u16,
    ) -> Result<Vec<WireMessage>, SyncError>;

    /// Messages stored after `since`.
    async fn list_messages_since(
        &self,
        room_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<WireMessage>, SyncError>;

    /// Leave (delete) a room server-side.
    async fn leave_room(&self, room_id: &str) -> Result<(), SyncError>;
}

/// Live bidirectional socket.
///
/// Inbound messages and connection changes are pushed into
/// [`SyncChannels::socket_sender`](crate::channel::SyncChannels::socket_sender).
#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self) -> Result<(), SyncError>;

    async fn join_room(&self, room_id: &str) -> Result<(), SyncError>;

    async fn leave_room(&self, room_id: &str) -> Result<(), SyncError>;

    async fn send_message(&self, message: OutgoingMessage) -> Result<(), SyncError>;
}
