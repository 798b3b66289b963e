use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of the conversation authored a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageDirection {
    /// Authored by the local user.
    Sent,
    /// Authored by the peer.
    Received,
}

/// Delivery status of a message as far as this client knows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    /// Optimistic local echo waiting for the server copy.
    Pending,
    /// Server-confirmed (history, live delivery, or absorbed echo).
    #[default]
    Confirmed,
    /// The transport rejected the send; the entry stays visible for retry.
    Failed,
}

/// Canonical chat message held by the room store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Room the message belongs to.
    pub room_id: String,
    /// Author side (`sent`/`received`).
    #[serde(rename = "type")]
    pub direction: MessageDirection,
    /// Message body.
    pub text: String,
    /// Server-assigned timestamp, or client clock for unconfirmed sends.
    pub timestamp: DateTime<Utc>,
    /// Client correlation id, present for locally originated sends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_temp_id: Option<String>,
    /// Server message id once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    /// Delivery status.
    #[serde(default)]
    pub delivery: DeliveryState,
    /// Position tie-breaker within the room, rewritten after every merge.
    #[serde(default)]
    pub seq: u64,
}

impl Message {
    /// Build a server-confirmed message.
    pub fn confirmed(
        room_id: impl Into<String>,
        direction: MessageDirection,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            direction,
            text: text.into(),
            timestamp,
            client_temp_id: None,
            server_id: None,
            delivery: DeliveryState::Confirmed,
            seq: 0,
        }
    }

    /// Build an optimistic local echo for a message the user just sent.
    pub fn optimistic(
        room_id: impl Into<String>,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
        client_temp_id: impl Into<String>,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            direction: MessageDirection::Sent,
            text: text.into(),
            timestamp,
            client_temp_id: Some(client_temp_id.into()),
            server_id: None,
            delivery: DeliveryState::Pending,
            seq: 0,
        }
    }

    /// Attach a server id.
    pub fn with_server_id(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = Some(server_id.into());
        self
    }

    /// Attach a client correlation id.
    pub fn with_client_temp_id(mut self, client_temp_id: impl Into<String>) -> Self {
        self.client_temp_id = Some(client_temp_id.into());
        self
    }

    /// `true` while the server copy has not been seen.
    pub fn is_unconfirmed(&self) -> bool {
        self.delivery != DeliveryState::Confirmed
    }
}

/// Display information about the other participant of a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PeerSummary {
    /// In-game name.
    pub display_name: String,
    /// Name tag (for example `KR1`).
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// School/club affiliation shown under the name.
    #[serde(default)]
    pub affiliation: Option<String>,
}

/// Room metadata returned by the room listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomSummary {
    pub room_id: String,
    pub peer: PeerSummary,
    /// Preview of the most recent message.
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: u64,
}

/// Backward-pagination cursor for one room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PageCursor {
    /// Next page to request (0 = most recent).
    pub next_page: u32,
    /// No older history exists.
    pub exhausted: bool,
}

/// Message payload as delivered by the history API and the socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    /// Missing on history pages, where the room is implied by the request.
    #[serde(default)]
    pub room_id: Option<String>,
    pub sender_id: String,
    pub content: String,
    /// RFC 3339, or a zone-less local date-time.
    pub timestamp: String,
    #[serde(default)]
    pub message_id: Option<String>,
    /// Correlation id echoed back for messages this client sent.
    #[serde(default)]
    pub client_msg_id: Option<String>,
}

/// Outgoing send request handed to the socket transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub room_id: String,
    pub content: String,
    pub client_msg_id: String,
}

/// Events produced by the socket transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// Transport (re)established its connection.
    Connected,
    /// Transport lost its connection.
    Disconnected,
    /// Live message pushed by the server.
    Message(WireMessage),
}

/// Global socket connection state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

/// Per-room socket membership state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum RoomLifecycle {
    /// Not joined on the socket.
    #[default]
    Inactive,
    /// Join emitted, first history page not yet merged.
    Joining,
    /// Joined and receiving live events.
    Joined,
    /// Leave emitted, waiting for the transport.
    Leaving,
}

/// Send acknowledgement as observed by the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendAck {
    pub room_id: String,
    /// Correlation id of the optimistic message.
    pub client_temp_id: String,
    /// Stable error code on failure.
    pub error_code: Option<String>,
}

/// Notifications emitted to UI subscribers after state changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncEvent {
    /// Socket connection state changed.
    ConnectionChanged { state: ConnectionState },
    /// Room membership state changed.
    RoomLifecycleChanged {
        room_id: String,
        lifecycle: RoomLifecycle,
    },
    /// Room metadata refreshed from the listing.
    RoomsUpdated { room_count: usize },
    /// Message list of a room changed.
    MessagesChanged { room_id: String, added: usize },
    /// No older history remains for a room.
    HistoryExhausted { room_id: String },
    /// Room removed after an explicit leave.
    RoomRemoved { room_id: String },
    /// A fetch failed; the UI shows a neutral retry affordance.
    LoadFailed {
        room_id: Option<String>,
        code: String,
        message: String,
        recoverable: bool,
    },
    /// Outcome of handing a message to the transport.
    SendAck(SendAck),
}

/// Runtime tuning for the synchronization engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Messages per history page; a shorter page means history is exhausted.
    pub page_size: u16,
    /// Window within which structurally equal messages are the same message.
    pub dedup_tolerance_ms: u64,
    /// Scroll offset (from the top) below which older history is requested.
    pub top_threshold_px: f32,
    /// Upper bound for a single history request.
    pub fetch_timeout_ms: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    /// Give up reconnecting after this many failures; `None` retries forever.
    #[serde(default)]
    pub reconnect_max_attempts: Option<u32>,
    /// Offset applied to zone-less server timestamps and display dates.
    pub utc_offset_minutes: i32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            dedup_tolerance_ms: 1_000,
            top_threshold_px: 50.0,
            fetch_timeout_ms: 10_000,
            reconnect_base_delay_ms: 500,
            reconnect_max_delay_ms: 30_000,
            reconnect_max_attempts: None,
            utc_offset_minutes: 540,
        }
    }
}
