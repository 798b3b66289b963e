use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::types::{SocketEvent, SyncEvent};

/// Broadcast stream handed to UI subscribers.
pub type EventStream = broadcast::Receiver<SyncEvent>;

#[derive(Debug, Error)]
pub enum SyncChannelError {
    /// The engine stopped reading socket events.
    #[error("socket event channel is closed")]
    SocketChannelClosed,
}

/// Inbound socket-event queue plus outbound UI event fan-out.
#[derive(Clone, Debug)]
pub struct SyncChannels {
    socket_tx: mpsc::Sender<SocketEvent>,
    event_tx: broadcast::Sender<SyncEvent>,
}

impl SyncChannels {
    /// Create a channel set and return it with the socket-event receiver the
    /// engine loop drains.
    pub fn new(socket_buffer: usize, event_buffer: usize) -> (Self, mpsc::Receiver<SocketEvent>) {
        let (socket_tx, socket_rx) = mpsc::channel(socket_buffer.max(1));
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));
        (
            Self {
                socket_tx,
                event_tx,
            },
            socket_rx,
        )
    }

    /// Sender for transport implementations.
    pub fn socket_sender(&self) -> mpsc::Sender<SocketEvent> {
        self.socket_tx.clone()
    }

    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    pub async fn push_socket_event(&self, event: SocketEvent) -> Result<(), SyncChannelError> {
        self.socket_tx
            .send(event)
            .await
            .map_err(|_| SyncChannelError::SocketChannelClosed)
    }

    /// Best-effort fan-out; without subscribers the event is dropped.
    pub fn emit(&self, event: SyncEvent) {
        let _ = self.event_tx.send(event);
    }
}
