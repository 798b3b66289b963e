use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};
use tracing::warn;

use crate::{
    error::SyncError,
    types::{Message, MessageDirection, SendAck, SyncEvent, WireMessage},
};

const LOCAL_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Who "we" are and how to read zone-less server timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizationContext {
    pub own_user_id: String,
    pub offset: FixedOffset,
}

impl NormalizationContext {
    /// Falls back to UTC when the offset is out of range.
    pub fn new(own_user_id: impl Into<String>, utc_offset_minutes: i32) -> Self {
        let offset = utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| {
                warn!(utc_offset_minutes, "invalid utc offset; using UTC");
                Utc.fix()
            });
        Self {
            own_user_id: own_user_id.into(),
            offset,
        }
    }

    pub fn direction_of(&self, sender_id: &str) -> MessageDirection {
        if sender_id == self.own_user_id {
            MessageDirection::Sent
        } else {
            MessageDirection::Received
        }
    }
}

/// Parse an RFC 3339 timestamp, or a zone-less one interpreted in `offset`.
pub fn parse_timestamp(raw: &str, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, LOCAL_TIMESTAMP_FORMAT).ok()?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
}

/// Convert a wire payload into a confirmed message.
///
/// `room_hint` is used when the payload omits its room (history pages).
/// Payloads without a room or with an unreadable timestamp are dropped.
pub fn normalize_wire_message(
    ctx: &NormalizationContext,
    room_hint: Option<&str>,
    wire: WireMessage,
) -> Option<Message> {
    let Some(room_id) = wire.room_id.as_deref().or(room_hint).map(str::to_owned) else {
        warn!(sender_id = %wire.sender_id, "dropping message without room id");
        return None;
    };
    let Some(timestamp) = parse_timestamp(&wire.timestamp, ctx.offset) else {
        warn!(%room_id, raw = %wire.timestamp, "dropping message with unreadable timestamp");
        return None;
    };

    let mut message = Message::confirmed(
        room_id,
        ctx.direction_of(&wire.sender_id),
        wire.content,
        timestamp,
    );
    message.server_id = wire.message_id;
    message.client_temp_id = wire.client_msg_id;
    Some(message)
}

/// Normalize a history page for `room_id`; order is not relied upon.
pub fn normalize_history_page(
    ctx: &NormalizationContext,
    room_id: &str,
    page: Vec<WireMessage>,
) -> Vec<Message> {
    page.into_iter()
        .filter_map(|wire| normalize_wire_message(ctx, Some(room_id), wire))
        .map(|mut message| {
            message.room_id = room_id.to_owned();
            message
        })
        .collect()
}

/// Outcome of handing an outgoing message to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Accepted,
    Failed { error: SyncError },
}

/// Convert a send outcome to a stable `SyncEvent::SendAck`.
pub fn normalize_send_outcome(
    room_id: impl Into<String>,
    client_temp_id: impl Into<String>,
    outcome: SendOutcome,
) -> SyncEvent {
    let error_code = match outcome {
        SendOutcome::Accepted => None,
        SendOutcome::Failed { error } => Some(error.code),
    };
    SyncEvent::SendAck(SendAck {
        room_id: room_id.into(),
        client_temp_id: client_temp_id.into(),
        error_code,
    })
}

/// Convert a fetch error into the soft "couldn't load" event.
pub fn normalize_load_failure(room_id: Option<&str>, error: &SyncError) -> SyncEvent {
    SyncEvent::LoadFailed {
        room_id: room_id.map(str::to_owned),
        code: error.code.clone(),
        message: error.message.clone(),
        recoverable: error.is_recoverable(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncErrorCategory;

    fn ctx() -> NormalizationContext {
        NormalizationContext::new("member-42", 540)
    }

    fn wire(sender: &str, timestamp: &str) -> WireMessage {
        WireMessage {
            room_id: Some("room-1".into()),
            sender_id: sender.into(),
            content: "ranked?".into(),
            timestamp: timestamp.into(),
            message_id: Some("m-1".into()),
            client_msg_id: None,
        }
    }

    #[test]
    fn parses_rfc3339_and_zoneless_timestamps() {
        let offset = ctx().offset;
        let rfc = parse_timestamp("2024-06-01T03:00:00Z", offset).expect("rfc3339");
        let local = parse_timestamp("2024-06-01T12:00:00", offset).expect("local");
        assert_eq!(rfc, local);

        let fractional = parse_timestamp("2024-06-01T12:00:00.250", offset).expect("fractional");
        assert_eq!((fractional - local).num_milliseconds(), 250);
        assert!(parse_timestamp("yesterday", offset).is_none());
    }

    #[test]
    fn maps_sender_to_direction() {
        let own = normalize_wire_message(&ctx(), None, wire("member-42", "2024-06-01T12:00:00"))
            .expect("own message");
        assert_eq!(own.direction, MessageDirection::Sent);
        assert_eq!(own.server_id.as_deref(), Some("m-1"));

        let peer = normalize_wire_message(&ctx(), None, wire("member-7", "2024-06-01T12:00:00"))
            .expect("peer message");
        assert_eq!(peer.direction, MessageDirection::Received);
    }

    #[test]
    fn drops_messages_without_room_or_timestamp() {
        let mut roomless = wire("member-7", "2024-06-01T12:00:00");
        roomless.room_id = None;
        assert!(normalize_wire_message(&ctx(), None, roomless.clone()).is_none());
        assert!(normalize_wire_message(&ctx(), Some("room-9"), roomless).is_some());

        let page = vec![
            wire("member-7", "not a time"),
            wire("member-7", "2024-06-01T12:00:01"),
        ];
        let messages = normalize_history_page(&ctx(), "room-9", page);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].room_id, "room-9");
    }

    #[test]
    fn falls_back_to_utc_for_invalid_offset() {
        let ctx = NormalizationContext::new("me", 100_000);
        assert_eq!(ctx.offset.local_minus_utc(), 0);
    }

    #[test]
    fn maps_send_outcomes_to_acks() {
        let ok = normalize_send_outcome("room-1", "tmp-1", SendOutcome::Accepted);
        assert_eq!(
            ok,
            SyncEvent::SendAck(SendAck {
                room_id: "room-1".into(),
                client_temp_id: "tmp-1".into(),
                error_code: None,
            })
        );

        let failed = normalize_send_outcome(
            "room-1",
            "tmp-2",
            SendOutcome::Failed {
                error: SyncError::new(SyncErrorCategory::RateLimited, "rate_limited", "slow down"),
            },
        );
        match failed {
            SyncEvent::SendAck(ack) => assert_eq!(ack.error_code.as_deref(), Some("rate_limited")),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn load_failures_carry_recoverability() {
        let err = SyncError::from_http_status(502, "bad gateway");
        let event = normalize_load_failure(Some("room-1"), &err);
        assert_eq!(
            event,
            SyncEvent::LoadFailed {
                room_id: Some("room-1".into()),
                code: "http_502".into(),
                message: "bad gateway".into(),
                recoverable: true,
            }
        );
    }
}
