//! Client-side chat synchronization core.
//!
//! Reconciles a persisted local message cache against a paginated history
//! API, a live socket stream and app lifecycle events. The room store is the
//! single writer of message state; every path (history pages, live events,
//! gap recovery, optimistic sends) goes through the same dedup and ordering
//! merge.

/// History API and socket transport contracts.
pub mod api;
/// Socket-event queue and UI event fan-out.
pub mod channel;
/// Duplicate detection.
pub mod dedup;
/// Socket reconciliation engine.
pub mod engine;
/// Stable error types and HTTP classification helpers.
pub mod error;
/// Wire payload and outcome normalization.
pub mod normalization;
/// Message ordering.
pub mod ordering;
/// Backward pagination controller and scroll anchoring.
pub mod pagination;
/// Store snapshot and persistence contract.
pub mod persistence;
/// Backoff policy used by the reconnect loop.
pub mod retry;
/// Connection and room membership state machine.
pub mod state_machine;
/// Persisted room/message store.
pub mod store;
/// Dedup-aware merge of message batches.
pub mod timeline;
/// Shared data model, events and configuration.
pub mod types;
/// Display projections.
pub mod view;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{HistoryApi, SocketTransport};
pub use channel::{EventStream, SyncChannelError, SyncChannels};
pub use dedup::{find_duplicate, is_duplicate, same_message};
pub use engine::SyncEngine;
pub use error::{PersistenceError, SyncError, SyncErrorCategory, classify_http_status};
pub use normalization::{
    NormalizationContext, SendOutcome, normalize_history_page, normalize_send_outcome,
    normalize_wire_message, parse_timestamp,
};
pub use ordering::{compare_messages, sort_messages};
pub use pagination::{
    PageOutcome, PageRequest, PaginationController, PaginationPhase, ScrollAnchor, ScrollMetrics,
};
pub use persistence::{STORE_SCHEMA_VERSION, StorePersistence, StoreSnapshot};
pub use retry::BackoffPolicy;
pub use state_machine::RoomStateMachine;
pub use store::{Room, RoomStore};
pub use timeline::{MergeMode, MergeReport, merge_messages};
pub use types::{
    ConnectionState, DeliveryState, Message, MessageDirection, OutgoingMessage, PageCursor,
    PeerSummary, RoomLifecycle, RoomSummary, SendAck, SocketEvent, SyncConfig, SyncEvent,
    WireMessage,
};
pub use view::{MessageRow, RoomRow, project_messages, project_rooms};
