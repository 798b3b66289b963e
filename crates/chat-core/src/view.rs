//! Display projections derived from the store on demand.
//!
//! Nothing here is stored; rows are recomputed from the ordered message list.

use chrono::{DateTime, FixedOffset, NaiveDate, Timelike, Utc};

use crate::{
    store::Room,
    types::{DeliveryState, Message, MessageDirection},
};

/// One rendered chat bubble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    /// Stable key for list diffing.
    pub key: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Local `HH:MM`.
    pub time_label: String,
    pub is_own: bool,
    /// Last bubble of a same-side run within one local minute.
    pub show_time: bool,
    /// Set on the first message of each local calendar day.
    pub date_separator: Option<NaiveDate>,
    pub delivery: DeliveryState,
}

/// One sidebar entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRow {
    pub room_id: String,
    pub title: String,
    pub tag: String,
    pub avatar_url: Option<String>,
    pub preview: Option<String>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub unread_count: u64,
    pub is_active: bool,
}

pub fn project_messages(messages: &[Message], offset: FixedOffset) -> Vec<MessageRow> {
    let locals: Vec<_> = messages
        .iter()
        .map(|message| message.timestamp.with_timezone(&offset))
        .collect();

    messages
        .iter()
        .enumerate()
        .map(|(index, message)| {
            let local = locals[index];
            let day = local.date_naive();
            let date_separator = match index.checked_sub(1) {
                Some(prev) if locals[prev].date_naive() == day => None,
                _ => Some(day),
            };
            let show_time = match messages.get(index + 1) {
                Some(next) => {
                    next.direction != message.direction
                        || minute_bucket(locals[index + 1]) != minute_bucket(local)
                }
                None => true,
            };

            MessageRow {
                key: row_key(message),
                text: message.text.clone(),
                timestamp: message.timestamp,
                time_label: format!("{:02}:{:02}", local.hour(), local.minute()),
                is_own: message.direction == MessageDirection::Sent,
                show_time,
                date_separator,
                delivery: message.delivery,
            }
        })
        .collect()
}

pub fn project_rooms<'a>(
    rooms: impl IntoIterator<Item = &'a Room>,
    active_room: Option<&str>,
) -> Vec<RoomRow> {
    rooms
        .into_iter()
        .map(|room| {
            let name = room.peer.display_name.trim();
            let title = if name.is_empty() {
                room.room_id.clone()
            } else {
                name.to_owned()
            };
            RoomRow {
                room_id: room.room_id.clone(),
                title,
                tag: room.peer.tag.clone(),
                avatar_url: room.peer.avatar_url.clone(),
                preview: room.last_message_preview.clone(),
                last_activity_at: room.last_activity_at,
                unread_count: room.unread_count,
                is_active: active_room == Some(room.room_id.as_str()),
            }
        })
        .collect()
}

fn minute_bucket(local: DateTime<FixedOffset>) -> (NaiveDate, u32, u32) {
    (local.date_naive(), local.hour(), local.minute())
}

fn row_key(message: &Message) -> String {
    if let Some(server_id) = &message.server_id {
        return server_id.clone();
    }
    if let Some(client_temp_id) = &message.client_temp_id {
        return client_temp_id.clone();
    }
    format!("{}:{}", message.timestamp.timestamp_millis(), message.seq)
}
