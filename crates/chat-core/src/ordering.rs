//! Total order over messages within a room.
//!
//! Primary key is the timestamp; `seq` breaks ties. Merges sort with a stable
//! sort on the timestamp alone and then renumber `seq`, so messages that share
//! a timestamp keep the order in which they were inserted.

use std::cmp::Ordering;

use crate::types::Message;

/// Compare two messages of the same room.
pub fn compare_messages(a: &Message, b: &Message) -> Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| a.seq.cmp(&b.seq))
}

/// Re-establish chronological order and rewrite `seq` to match positions.
pub fn sort_messages(messages: &mut [Message]) {
    messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    reindex(messages);
}

/// Rewrite `seq` so it mirrors the current position.
pub fn reindex(messages: &mut [Message]) {
    for (position, message) in messages.iter_mut().enumerate() {
        message.seq = position as u64;
    }
}

/// `true` when the slice is non-decreasing under [`compare_messages`].
pub fn is_ordered(messages: &[Message]) -> bool {
    messages
        .windows(2)
        .all(|pair| compare_messages(&pair[0], &pair[1]) != Ordering::Greater)
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::types::MessageDirection;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_717_000_000 + secs, 0).single().expect("valid ts")
    }

    fn msg(text: &str, secs: i64) -> Message {
        Message::confirmed("room-1", MessageDirection::Received, text, at(secs))
    }

    #[test]
    fn orders_by_timestamp_then_seq() {
        let mut a = msg("a", 5);
        let mut b = msg("b", 5);
        a.seq = 1;
        b.seq = 2;
        assert_eq!(compare_messages(&a, &b), Ordering::Less);
        assert_eq!(compare_messages(&msg("c", 1), &a), Ordering::Less);
    }

    #[test]
    fn sort_keeps_insertion_order_for_equal_timestamps() {
        let mut messages = vec![msg("late", 9), msg("first", 3), msg("second", 3), msg("early", 1)];
        sort_messages(&mut messages);

        let texts: Vec<_> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["early", "first", "second", "late"]);
        let seqs: Vec<_> = messages.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, [0, 1, 2, 3]);
        assert!(is_ordered(&messages));
    }

    #[test]
    fn resorting_a_sorted_list_is_a_no_op() {
        let mut messages = vec![msg("x", 2), msg("y", 2), msg("z", 2)];
        sort_messages(&mut messages);
        let before = messages.clone();
        sort_messages(&mut messages);
        assert_eq!(messages, before);
    }

    #[test]
    fn detects_out_of_order_slices() {
        assert!(!is_ordered(&[msg("b", 2), msg("a", 1)]));
        assert!(is_ordered(&[]));
    }
}
