//! In-process fakes for engine and store tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::Notify;

use crate::{
    api::{HistoryApi, SocketTransport},
    error::{PersistenceError, SyncError},
    persistence::{StorePersistence, StoreSnapshot},
    types::{OutgoingMessage, RoomSummary, WireMessage},
};

/// Wire message with an RFC 3339 timestamp.
pub(crate) fn wire(
    room_id: Option<&str>,
    sender_id: &str,
    content: &str,
    timestamp: DateTime<Utc>,
) -> WireMessage {
    WireMessage {
        room_id: room_id.map(str::to_owned),
        sender_id: sender_id.to_owned(),
        content: content.to_owned(),
        timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        message_id: None,
        client_msg_id: None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HistoryCall {
    ListRooms,
    Page { room_id: String, page: u32 },
    Since { room_id: String, since: DateTime<Utc> },
    Leave { room_id: String },
}

/// Pauses a fake call until the test releases it.
#[derive(Debug, Default)]
pub(crate) struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

#[derive(Default)]
pub(crate) struct FakeHistory {
    rooms: Mutex<Vec<RoomSummary>>,
    pages: Mutex<HashMap<(String, u32), Vec<WireMessage>>>,
    since: Mutex<HashMap<String, Vec<WireMessage>>>,
    failures: Mutex<VecDeque<SyncError>>,
    gates: Mutex<HashMap<String, Arc<Gate>>>,
    stalled: Mutex<Vec<String>>,
    calls: Mutex<Vec<HistoryCall>>,
}

impl FakeHistory {
    pub fn set_rooms(&self, rooms: Vec<RoomSummary>) {
        *self.rooms.lock().expect("rooms lock") = rooms;
    }

    pub fn set_page(&self, room_id: &str, page: u32, messages: Vec<WireMessage>) {
        self.pages
            .lock()
            .expect("pages lock")
            .insert((room_id.to_owned(), page), messages);
    }

    pub fn set_since(&self, room_id: &str, messages: Vec<WireMessage>) {
        self.since
            .lock()
            .expect("since lock")
            .insert(room_id.to_owned(), messages);
    }

    /// The next call of any kind fails with `error`.
    pub fn fail_next(&self, error: SyncError) {
        self.failures.lock().expect("failures lock").push_back(error);
    }

    /// Hold every response for `room_id` until the returned gate is released.
    pub fn gate(&self, room_id: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.gates
            .lock()
            .expect("gates lock")
            .insert(room_id.to_owned(), Arc::clone(&gate));
        gate
    }

    /// Responses for `room_id` never resolve.
    pub fn stall(&self, room_id: &str) {
        self.stalled.lock().expect("stalled lock").push(room_id.to_owned());
    }

    pub fn calls(&self) -> Vec<HistoryCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    async fn enter(&self, call: HistoryCall, room_id: Option<&str>) -> Result<(), SyncError> {
        self.calls.lock().expect("calls lock").push(call);

        if let Some(room_id) = room_id {
            let gate = self.gates.lock().expect("gates lock").remove(room_id);
            if let Some(gate) = gate {
                gate.entered.notify_one();
                gate.release.notified().await;
            }
            let stalled = self
                .stalled
                .lock()
                .expect("stalled lock")
                .iter()
                .any(|stalled| stalled == room_id);
            if stalled {
                std::future::pending::<()>().await;
            }
        }

        match self.failures.lock().expect("failures lock").pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl HistoryApi for FakeHistory {
    async fn list_rooms(&self) -> Result<Vec<RoomSummary>, SyncError> {
        self.enter(HistoryCall::ListRooms, None).await?;
        Ok(self.rooms.lock().expect("rooms lock").clone())
    }

    async fn list_messages(
        &self,
        room_id: &str,
        page: u32,
        _limit: u16,
    ) -> Result<Vec<WireMessage>, SyncError> {
        self.enter(
            HistoryCall::Page {
                room_id: room_id.to_owned(),
                page,
            },
            Some(room_id),
        )
        .await?;
        Ok(self
            .pages
            .lock()
            .expect("pages lock")
            .get(&(room_id.to_owned(), page))
            .cloned()
            .unwrap_or_default())
    }

    async fn list_messages_since(
        &self,
        room_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<WireMessage>, SyncError> {
        self.enter(
            HistoryCall::Since {
                room_id: room_id.to_owned(),
                since,
            },
            Some(room_id),
        )
        .await?;
        Ok(self
            .since
            .lock()
            .expect("since lock")
            .get(room_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn leave_room(&self, room_id: &str) -> Result<(), SyncError> {
        self.enter(
            HistoryCall::Leave {
                room_id: room_id.to_owned(),
            },
            None,
        )
        .await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TransportCall {
    Connect,
    Join(String),
    Leave(String),
    Send(OutgoingMessage),
}

#[derive(Default)]
pub(crate) struct RecordingTransport {
    calls: Mutex<Vec<TransportCall>>,
    connect_failures: Mutex<VecDeque<SyncError>>,
    send_failures: Mutex<VecDeque<SyncError>>,
    join_gates: Mutex<HashMap<String, Arc<Gate>>>,
}

impl RecordingTransport {
    pub fn fail_connect(&self, error: SyncError) {
        self.connect_failures
            .lock()
            .expect("connect lock")
            .push_back(error);
    }

    pub fn fail_send(&self, error: SyncError) {
        self.send_failures.lock().expect("send lock").push_back(error);
    }

    /// Hold the next join of `room_id` until the returned gate is released.
    pub fn gate_join(&self, room_id: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.join_gates
            .lock()
            .expect("join gates lock")
            .insert(room_id.to_owned(), Arc::clone(&gate));
        gate
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Send(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

#[async_trait]
impl SocketTransport for RecordingTransport {
    async fn connect(&self) -> Result<(), SyncError> {
        self.record(TransportCall::Connect);
        match self.connect_failures.lock().expect("connect lock").pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn join_room(&self, room_id: &str) -> Result<(), SyncError> {
        self.record(TransportCall::Join(room_id.to_owned()));
        let gate = self.join_gates.lock().expect("join gates lock").remove(room_id);
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        Ok(())
    }

    async fn leave_room(&self, room_id: &str) -> Result<(), SyncError> {
        self.record(TransportCall::Leave(room_id.to_owned()));
        Ok(())
    }

    async fn send_message(&self, message: OutgoingMessage) -> Result<(), SyncError> {
        self.record(TransportCall::Send(message));
        match self.send_failures.lock().expect("send lock").pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub(crate) struct RecordingPersistence {
    stored: Mutex<Option<StoreSnapshot>>,
    load_error: Mutex<Option<PersistenceError>>,
    clear_error: Mutex<Option<PersistenceError>>,
    saves: AtomicUsize,
    clears: AtomicUsize,
}

impl RecordingPersistence {
    pub fn with_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            stored: Mutex::new(Some(snapshot)),
            ..Self::default()
        }
    }

    pub fn failing_load(error: PersistenceError) -> Self {
        Self {
            load_error: Mutex::new(Some(error)),
            ..Self::default()
        }
    }

    pub fn failing_clear(error: PersistenceError) -> Self {
        Self {
            clear_error: Mutex::new(Some(error)),
            ..Self::default()
        }
    }

    pub fn stored(&self) -> Option<StoreSnapshot> {
        self.stored.lock().expect("stored lock").clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl StorePersistence for RecordingPersistence {
    fn load(&self) -> Result<Option<StoreSnapshot>, PersistenceError> {
        if let Some(error) = self.load_error.lock().expect("load lock").take() {
            return Err(error);
        }
        Ok(self.stored())
    }

    fn save(&self, snapshot: &StoreSnapshot) -> Result<(), PersistenceError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.stored.lock().expect("stored lock") = Some(snapshot.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), PersistenceError> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.clear_error.lock().expect("clear lock").take() {
            return Err(error);
        }
        *self.stored.lock().expect("stored lock") = None;
        Ok(())
    }
}
