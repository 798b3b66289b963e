//! Socket reconciliation and the async surface used by UI frontends.
//!
//! [`SyncEngine`] owns the room store, the pagination controller and the room
//! state machine behind one lock. The lock is never held across an await:
//! each operation captures what it needs, awaits the collaborator, then
//! re-checks the captured room and request before mutating anything.

use std::{
    collections::HashMap,
    future::Future,
    mem,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::{
    api::{HistoryApi, SocketTransport},
    channel::{EventStream, SyncChannels},
    error::{SyncError, SyncErrorCategory},
    normalization::{
        NormalizationContext, SendOutcome, normalize_history_page, normalize_load_failure,
        normalize_send_outcome, normalize_wire_message,
    },
    pagination::{PageOutcome, PageRequest, PaginationController, PaginationPhase, ScrollMetrics},
    retry::BackoffPolicy,
    state_machine::RoomStateMachine,
    store::{Room, RoomStore},
    timeline::MergeMode,
    types::{
        ConnectionState, DeliveryState, Message, MessageDirection, OutgoingMessage,
        RoomLifecycle, SocketEvent, SyncConfig, SyncEvent, WireMessage,
    },
    view::{MessageRow, RoomRow, project_messages, project_rooms},
};

const SOCKET_EVENT_BUFFER: usize = 256;
const SYNC_EVENT_BUFFER: usize = 256;

/// How a freshly joined room catches up with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CatchUp {
    /// Fetch page 0 (activation).
    FirstPage,
    /// Fetch what was missed since the last confirmed message (reconnect).
    Gap,
}

struct EngineState {
    store: RoomStore,
    pagination: PaginationController,
    rooms: RoomStateMachine,
    active_room: Option<String>,
    visible: bool,
    /// Token of the join attempt each room is waiting on.
    joins: HashMap<String, u64>,
    next_join: u64,
}

impl EngineState {
    fn start_join(&mut self, room_id: &str) -> Result<(SyncEvent, u64), SyncError> {
        let event = self.rooms.begin_join(room_id)?;
        self.next_join += 1;
        self.joins.insert(room_id.to_owned(), self.next_join);
        Ok((event, self.next_join))
    }

    /// Whether `join` is still the attempt `room_id` is waiting on.
    fn join_is_current(&self, room_id: &str, join: u64) -> bool {
        self.joins.get(room_id) == Some(&join)
            && self.rooms.lifecycle(room_id) == RoomLifecycle::Joining
    }
}

/// Client-side chat synchronization engine.
pub struct SyncEngine {
    history: Arc<dyn HistoryApi>,
    socket: Arc<dyn SocketTransport>,
    channels: SyncChannels,
    config: SyncConfig,
    ctx: NormalizationContext,
    state: Mutex<EngineState>,
}

impl SyncEngine {
    /// Build an engine around `store` and return it with the socket-event
    /// receiver that [`SyncEngine::run`] drains.
    pub fn new(
        history: Arc<dyn HistoryApi>,
        socket: Arc<dyn SocketTransport>,
        mut store: RoomStore,
        own_user_id: impl Into<String>,
        config: SyncConfig,
    ) -> (Self, mpsc::Receiver<SocketEvent>) {
        let (channels, socket_rx) = SyncChannels::new(SOCKET_EVENT_BUFFER, SYNC_EVENT_BUFFER);
        store.set_dedup_tolerance(config.dedup_tolerance_ms);
        let ctx = NormalizationContext::new(own_user_id, config.utc_offset_minutes);
        let state = EngineState {
            store,
            pagination: PaginationController::new(config.page_size, config.top_threshold_px),
            rooms: RoomStateMachine::default(),
            active_room: None,
            visible: true,
            joins: HashMap::new(),
            next_join: 0,
        };
        let engine = Self {
            history,
            socket,
            channels,
            config,
            ctx,
            state: Mutex::new(state),
        };
        (engine, socket_rx)
    }

    pub fn channels(&self) -> &SyncChannels {
        &self.channels
    }

    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn connection(&self) -> ConnectionState {
        self.state().rooms.connection()
    }

    pub fn lifecycle(&self, room_id: &str) -> RoomLifecycle {
        self.state().rooms.lifecycle(room_id)
    }

    pub fn active_room(&self) -> Option<String> {
        self.state().active_room.clone()
    }

    pub fn pagination_phase(&self, room_id: &str) -> PaginationPhase {
        self.state().pagination.phase(room_id)
    }

    pub fn messages(&self, room_id: &str) -> Vec<Message> {
        self.state().store.messages(room_id).to_vec()
    }

    pub fn rooms(&self) -> Vec<Room> {
        self.state().store.rooms().cloned().collect()
    }

    /// Display rows for the active room.
    pub fn message_rows(&self) -> Vec<MessageRow> {
        let state = self.state();
        let Some(room_id) = state.active_room.as_deref() else {
            return Vec::new();
        };
        project_messages(state.store.messages(room_id), self.ctx.offset)
    }

    pub fn room_rows(&self) -> Vec<RoomRow> {
        let state = self.state();
        project_rooms(state.store.rooms(), state.active_room.as_deref())
    }

    /// Connect the socket and load the room listing.
    pub async fn start(&self) -> Result<(), SyncError> {
        self.connect().await?;
        self.refresh_rooms().await?;
        Ok(())
    }

    pub async fn connect(&self) -> Result<(), SyncError> {
        self.socket.connect().await?;
        self.on_connected().await;
        Ok(())
    }

    /// Refresh room metadata; cached messages are kept.
    pub async fn refresh_rooms(&self) -> Result<usize, SyncError> {
        let summaries = match self.bounded("list_rooms", self.history.list_rooms()).await {
            Ok(summaries) => summaries,
            Err(err) => {
                warn!(error = %err, "room listing failed");
                self.channels.emit(normalize_load_failure(None, &err));
                return Err(err);
            }
        };

        let mut state = self.state();
        state.store.upsert_room_summaries(summaries);
        if state.visible
            && let Some(room_id) = state.active_room.clone()
        {
            state.store.mark_read(&room_id);
        }
        let room_count = state.store.len();
        self.channels.emit(SyncEvent::RoomsUpdated { room_count });
        debug!(room_count, "room listing refreshed");
        Ok(room_count)
    }

    /// Make `room_id` the active room: leave the previous one, join this one
    /// and load its first page.
    ///
    /// While disconnected the room becomes active from cache and is joined on
    /// the next connect.
    pub async fn activate_room(&self, room_id: &str) -> Result<(), SyncError> {
        let previous = {
            let mut state = self.state();
            if state.active_room.as_deref() == Some(room_id)
                && state.rooms.lifecycle(room_id) != RoomLifecycle::Inactive
            {
                trace!(%room_id, "room already active");
                return Ok(());
            }
            state
                .active_room
                .replace(room_id.to_owned())
                .filter(|previous| previous != room_id)
        };
        if let Some(previous) = previous {
            self.release_room(&previous).await;
        }

        {
            let mut state = self.state();
            if state.active_room.as_deref() != Some(room_id) {
                debug!(%room_id, "activation superseded while leaving previous room");
                return Ok(());
            }
            let EngineState {
                store, pagination, ..
            } = &mut *state;
            store.ensure_room(room_id);
            store.mark_read(room_id);
            pagination.reset(store, room_id);

            if !state.rooms.is_connected() {
                info!(%room_id, "room activated while offline; join deferred");
                return Ok(());
            }
        }

        info!(%room_id, "activating room");
        self.join_and_catch_up(room_id, CatchUp::FirstPage).await
    }

    /// Leave the active room on the socket; cached messages stay.
    pub async fn deactivate_room(&self) {
        let Some(room_id) = self.state().active_room.take() else {
            return;
        };
        debug!(%room_id, "deactivating room");
        self.release_room(&room_id).await;
    }

    /// Leave a room server-side and drop it from the store.
    ///
    /// Nothing changes locally when the history API rejects the leave.
    pub async fn leave_room(&self, room_id: &str) -> Result<(), SyncError> {
        if let Err(err) = self
            .bounded("leave_room", self.history.leave_room(room_id))
            .await
        {
            warn!(%room_id, error = %err, "leaving room failed");
            return Err(err);
        }

        {
            let mut state = self.state();
            if state.active_room.as_deref() == Some(room_id) {
                state.active_room = None;
            }
        }
        self.release_room(room_id).await;

        let mut state = self.state();
        state.pagination.cancel(room_id);
        if let Some(event) = state.rooms.forget(room_id) {
            self.channels.emit(event);
        }
        state.store.remove_room(room_id);
        self.channels.emit(SyncEvent::RoomRemoved {
            room_id: room_id.to_owned(),
        });
        info!(%room_id, "room left");
        Ok(())
    }

    /// Scroll handler for the active room's message list.
    ///
    /// Returns the applied page outcome, whose anchor restores the viewport,
    /// or `None` when no fetch was triggered.
    pub async fn on_scroll(
        &self,
        metrics: ScrollMetrics,
    ) -> Result<Option<PageOutcome>, SyncError> {
        let request = {
            let mut state = self.state();
            let Some(room_id) = state.active_room.clone() else {
                return Ok(None);
            };
            let EngineState {
                store, pagination, ..
            } = &mut *state;
            pagination.begin_older(store, &room_id, metrics)
        };
        let Some(request) = request else {
            return Ok(None);
        };
        self.fetch_page(request).await.map(Some)
    }

    /// Echo `text` into the active room immediately and hand it to the socket.
    ///
    /// Returns the client correlation id. A transport failure leaves the
    /// message in the list marked failed and returns the error.
    pub async fn send_message(&self, text: &str) -> Result<String, SyncError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SyncError::new(
                SyncErrorCategory::Config,
                "empty_message",
                "message text is empty",
            ));
        }

        let client_temp_id = Uuid::new_v4().to_string();
        let room_id = {
            let mut state = self.state();
            let room_id = state
                .active_room
                .clone()
                .ok_or_else(|| SyncError::no_active_room("send_message"))?;
            let message = Message::optimistic(&room_id, text, Utc::now(), &client_temp_id);
            state.store.add_optimistic_message(&room_id, message);
            room_id
        };
        self.channels.emit(SyncEvent::MessagesChanged {
            room_id: room_id.clone(),
            added: 1,
        });

        self.deliver(&room_id, &client_temp_id, text.to_owned()).await?;
        Ok(client_temp_id)
    }

    /// Re-send a message previously marked failed.
    pub async fn retry_send(&self, room_id: &str, client_temp_id: &str) -> Result<(), SyncError> {
        let content = {
            let mut state = self.state();
            let Some(message) = state.store.find_by_client_temp_id(room_id, client_temp_id)
            else {
                return Err(SyncError::new(
                    SyncErrorCategory::Config,
                    "unknown_message",
                    format!("no local message {client_temp_id} in room {room_id}"),
                ));
            };
            let (delivery, content) = (message.delivery, message.text.clone());
            if delivery != DeliveryState::Failed {
                return Err(SyncError::new(
                    SyncErrorCategory::Config,
                    "not_retryable",
                    format!("message {client_temp_id} is {delivery:?}"),
                ));
            }
            state
                .store
                .set_delivery(room_id, client_temp_id, DeliveryState::Pending);
            content
        };
        self.channels.emit(SyncEvent::MessagesChanged {
            room_id: room_id.to_owned(),
            added: 0,
        });
        debug!(%room_id, %client_temp_id, "retrying failed send");
        self.deliver(room_id, client_temp_id, content).await
    }

    /// Fold a live socket message into the store.
    ///
    /// Messages for rooms that are not active update the room entry and its
    /// unread counter but never trigger a join.
    pub fn on_inbound_message(&self, wire: WireMessage) {
        let Some(message) = normalize_wire_message(&self.ctx, None, wire) else {
            return;
        };
        let room_id = message.room_id.clone();
        let direction = message.direction;

        let mut state = self.state();
        let report = state
            .store
            .merge_messages(&room_id, vec![message], MergeMode::Append);
        if !report.changed() {
            trace!(%room_id, "live message already present");
            return;
        }

        let in_view = state.visible && state.active_room.as_deref() == Some(room_id.as_str());
        if report.added > 0 && direction == MessageDirection::Received && !in_view {
            state.store.increment_unread(&room_id, 1);
        }
        self.channels.emit(SyncEvent::MessagesChanged {
            room_id,
            added: report.added,
        });
    }

    /// Socket (re)connected: rejoin the active room and recover the gap.
    pub async fn on_connected(&self) {
        let active = {
            let mut state = self.state();
            let Some(event) = state.rooms.on_connected() else {
                return;
            };
            self.channels.emit(event);
            state.active_room.clone()
        };
        info!("socket connected");

        if let Some(room_id) = active
            && let Err(err) = self.join_and_catch_up(&room_id, CatchUp::Gap).await
        {
            warn!(%room_id, error = %err, "rejoining active room failed");
        }
    }

    pub fn on_disconnected(&self) {
        let events = {
            let mut state = self.state();
            state.joins.clear();
            state.rooms.on_disconnected()
        };
        if events.is_empty() {
            return;
        }
        warn!("socket disconnected");
        for event in events {
            self.channels.emit(event);
        }
    }

    /// App moved to the foreground or background.
    ///
    /// Resuming while a room is joined runs gap recovery for it.
    pub async fn on_visibility_changed(&self, visible: bool) -> Result<(), SyncError> {
        let resume = {
            let mut state = self.state();
            let was_visible = mem::replace(&mut state.visible, visible);
            if !visible || was_visible {
                return Ok(());
            }
            let Some(room_id) = state.active_room.clone() else {
                return Ok(());
            };
            state.store.mark_read(&room_id);
            (state.rooms.lifecycle(&room_id) == RoomLifecycle::Joined).then_some(room_id)
        };

        match resume {
            Some(room_id) => {
                debug!(%room_id, "resumed; recovering gap");
                self.recover_gap(&room_id).await.map(|_| ())
            }
            None => Ok(()),
        }
    }

    /// Fetch what `room_id` missed since its last confirmed message and merge
    /// it. Rooms without confirmed messages load their first page instead.
    ///
    /// Returns the number of messages added.
    pub async fn recover_gap(&self, room_id: &str) -> Result<usize, SyncError> {
        let since = {
            let state = self.state();
            if state.store.room(room_id).is_none() {
                return Ok(0);
            }
            state.store.last_confirmed_timestamp(room_id)
        };
        let Some(since) = since else {
            debug!(%room_id, "nothing confirmed locally; loading first page");
            let request = self.state().pagination.begin_initial(room_id);
            return self.fetch_page(request).await.map(|outcome| outcome.added());
        };

        let fetched = self
            .bounded(
                "list_messages_since",
                self.history.list_messages_since(room_id, since),
            )
            .await;
        let page = match fetched {
            Ok(page) => page,
            Err(err) => {
                warn!(%room_id, error = %err, "gap recovery failed");
                self.channels
                    .emit(normalize_load_failure(Some(room_id), &err));
                return Err(err);
            }
        };

        let messages = normalize_history_page(&self.ctx, room_id, page);
        let mut state = self.state();
        if state.store.room(room_id).is_none() {
            debug!(%room_id, "room removed during gap recovery; discarding");
            return Ok(0);
        }
        let report = state
            .store
            .merge_messages(room_id, messages, MergeMode::Append);
        if report.changed() {
            self.channels.emit(SyncEvent::MessagesChanged {
                room_id: room_id.to_owned(),
                added: report.added,
            });
        }
        info!(
            %room_id,
            added = report.added,
            confirmed = report.confirmed,
            "gap recovered"
        );
        Ok(report.added)
    }

    pub async fn handle_socket_event(&self, event: SocketEvent) {
        match event {
            SocketEvent::Connected => self.on_connected().await,
            SocketEvent::Disconnected => self.on_disconnected(),
            SocketEvent::Message(wire) => self.on_inbound_message(wire),
        }
    }

    /// Drain socket events until `stop` is cancelled or the channel closes,
    /// reconnecting with backoff after each disconnect.
    pub async fn run(&self, mut events: mpsc::Receiver<SocketEvent>, stop: CancellationToken) {
        info!("sync loop started");
        loop {
            let event = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                debug!("socket event channel closed");
                break;
            };

            let disconnected = event == SocketEvent::Disconnected;
            self.handle_socket_event(event).await;
            if disconnected {
                self.reconnect(&stop).await;
            }
        }
        info!("sync loop stopped");
    }

    /// Drop every room, the persisted cache and all membership state.
    ///
    /// In-memory state is always reset; the error reports a persisted cache
    /// that could not be removed.
    pub fn logout(&self) -> Result<(), SyncError> {
        let cleared = {
            let mut state = self.state();
            let cleared = state.store.clear();
            state.pagination.clear();
            state.rooms.reset();
            state.joins.clear();
            state.active_room = None;
            cleared
        };
        self.channels.emit(SyncEvent::ConnectionChanged {
            state: ConnectionState::Disconnected,
        });
        self.channels.emit(SyncEvent::RoomsUpdated { room_count: 0 });

        if let Err(err) = cleared {
            warn!(error = %err, "logged out but the persisted chat store was not removed");
            return Err(err.into());
        }
        info!("logged out; chat store cleared");
        Ok(())
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().expect("sync engine state lock poisoned")
    }

    async fn bounded<T>(
        &self,
        action: &str,
        request: impl Future<Output = Result<T, SyncError>>,
    ) -> Result<T, SyncError> {
        let limit = Duration::from_millis(self.config.fetch_timeout_ms);
        match tokio::time::timeout(limit, request).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::timeout(action, limit)),
        }
    }

    /// Join `room_id` and catch it up.
    ///
    /// A leave, logout, disconnect or newer join of the same room supersedes
    /// this attempt; a superseded attempt stops touching the room and
    /// returns `Ok`.
    async fn join_and_catch_up(&self, room_id: &str, catch_up: CatchUp) -> Result<(), SyncError> {
        let join = {
            let mut state = self.state();
            let (event, join) = state.start_join(room_id)?;
            self.channels.emit(event);
            join
        };

        let joined = self.socket.join_room(room_id).await;
        {
            let mut state = self.state();
            if !state.join_is_current(room_id, join) {
                debug!(%room_id, "join superseded while the socket join was pending");
                return Ok(());
            }
            if let Err(err) = joined {
                warn!(%room_id, error = %err, "socket join failed");
                state.joins.remove(room_id);
                if let Ok(event) = state.rooms.abort_join(room_id) {
                    self.channels.emit(event);
                }
                self.channels
                    .emit(normalize_load_failure(Some(room_id), &err));
                return Err(err);
            }
        }

        let synced = match catch_up {
            CatchUp::FirstPage => {
                let request = self.state().pagination.begin_initial(room_id);
                self.fetch_page(request).await.map(|_| ())
            }
            CatchUp::Gap => self.recover_gap(room_id).await.map(|_| ()),
        };

        let mut state = self.state();
        if !state.join_is_current(room_id, join) {
            debug!(%room_id, "join superseded before completion");
            return Ok(());
        }
        state.joins.remove(room_id);
        if let Ok(event) = state.rooms.finish_join(room_id) {
            self.channels.emit(event);
            debug!(%room_id, "room joined");
        }
        synced
    }

    /// Leave `room_id` on the socket if it is joined; errors are logged.
    async fn release_room(&self, room_id: &str) {
        let leaving = {
            let mut state = self.state();
            state.pagination.cancel(room_id);
            state.joins.remove(room_id);
            match state.rooms.begin_leave(room_id) {
                Ok(event) => {
                    self.channels.emit(event);
                    true
                }
                Err(_) => false,
            }
        };
        if !leaving {
            return;
        }

        if let Err(err) = self.socket.leave_room(room_id).await {
            warn!(%room_id, error = %err, "socket leave failed");
        }
        if let Ok(event) = self.state().rooms.finish_leave(room_id) {
            self.channels.emit(event);
        }
    }

    async fn fetch_page(&self, request: PageRequest) -> Result<PageOutcome, SyncError> {
        let fetched = self
            .bounded(
                "list_messages",
                self.history
                    .list_messages(&request.room_id, request.page, request.limit),
            )
            .await;

        let mut state = self.state();
        let page = match fetched {
            Ok(page) => page,
            Err(err) => {
                if state.pagination.fail(&request) {
                    warn!(
                        room_id = %request.room_id,
                        page = request.page,
                        error = %err,
                        "history page failed"
                    );
                    self.channels
                        .emit(normalize_load_failure(Some(&request.room_id), &err));
                }
                return Err(err);
            }
        };

        let received = page.len();
        let messages = normalize_history_page(&self.ctx, &request.room_id, page);
        let EngineState {
            store, pagination, ..
        } = &mut *state;
        let outcome = pagination.complete(store, &request, messages, received);

        let room_id = request.room_id;
        match outcome {
            PageOutcome::Merged { added, .. } => {
                self.channels
                    .emit(SyncEvent::MessagesChanged { room_id, added });
            }
            PageOutcome::Exhausted { added, .. } => {
                self.channels.emit(SyncEvent::MessagesChanged {
                    room_id: room_id.clone(),
                    added,
                });
                self.channels.emit(SyncEvent::HistoryExhausted { room_id });
            }
            PageOutcome::Stale => {}
        }
        Ok(outcome)
    }

    async fn deliver(
        &self,
        room_id: &str,
        client_temp_id: &str,
        content: String,
    ) -> Result<(), SyncError> {
        let connected = self.state().rooms.is_connected();
        let result = if connected {
            self.socket
                .send_message(OutgoingMessage {
                    room_id: room_id.to_owned(),
                    content,
                    client_msg_id: client_temp_id.to_owned(),
                })
                .await
        } else {
            Err(SyncError::not_connected("send_message"))
        };

        let failure = result.err();
        if let Some(err) = &failure {
            warn!(%room_id, %client_temp_id, error = %err, "send failed; marking message failed");
            self.state()
                .store
                .set_delivery(room_id, client_temp_id, DeliveryState::Failed);
        }
        let outcome = match failure.clone() {
            None => SendOutcome::Accepted,
            Some(error) => SendOutcome::Failed { error },
        };
        self.channels
            .emit(normalize_send_outcome(room_id, client_temp_id, outcome));
        failure.map_or(Ok(()), Err)
    }

    async fn reconnect(&self, stop: &CancellationToken) {
        let policy = BackoffPolicy::new(
            self.config.reconnect_base_delay_ms,
            self.config.reconnect_max_delay_ms,
        );
        let policy = match self.config.reconnect_max_attempts {
            Some(max) => policy.with_max_attempts(max),
            None => policy,
        };

        let mut attempt = 0;
        let mut hint = None;
        while policy.allows(attempt) {
            if self.state().rooms.is_connected() {
                return;
            }
            let delay = policy.delay_for_attempt(attempt, hint);
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.socket.connect().await {
                Ok(()) => {
                    info!(attempt, "socket reconnected");
                    self.on_connected().await;
                    return;
                }
                Err(err) if err.is_recoverable() => {
                    warn!(attempt, error = %err, "reconnect attempt failed");
                    hint = err.retry_after_ms;
                    attempt += 1;
                }
                Err(err) => {
                    error!(error = %err, "reconnect aborted");
                    self.channels.emit(normalize_load_failure(None, &err));
                    return;
                }
            }
        }
        error!(attempts = attempt, "giving up reconnecting");
    }
}
