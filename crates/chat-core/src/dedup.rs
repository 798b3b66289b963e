//! Duplicate detection for incoming messages.
//!
//! Identifiers win when both sides carry the same kind of id. Without them,
//! two messages are the same when direction and text match and their
//! timestamps are closer than the tolerance window; this covers an optimistic
//! echo (client clock) meeting its server copy (server clock). Two genuinely
//! distinct messages with the same text, side and near-identical time collapse
//! into one under that fallback; ids avoid it whenever the server echoes them.

use chrono::TimeDelta;

use crate::types::Message;

/// Pairwise duplicate predicate.
pub fn same_message(existing: &Message, candidate: &Message, tolerance: TimeDelta) -> bool {
    if let (Some(a), Some(b)) = (&existing.server_id, &candidate.server_id) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (&existing.client_temp_id, &candidate.client_temp_id) {
        return a == b;
    }

    existing.direction == candidate.direction
        && existing.text == candidate.text
        && (existing.timestamp - candidate.timestamp).num_milliseconds().abs()
            < tolerance.num_milliseconds()
}

/// Whether `candidate` is already present in `existing`.
pub fn is_duplicate(existing: &[Message], candidate: &Message, tolerance: TimeDelta) -> bool {
    find_duplicate(existing, candidate, tolerance).is_some()
}

/// Index of the entry in `existing` that `candidate` duplicates.
///
/// Unconfirmed entries are preferred so a server copy replaces the optimistic
/// echo rather than matching an older confirmed message with the same text.
pub fn find_duplicate(
    existing: &[Message],
    candidate: &Message,
    tolerance: TimeDelta,
) -> Option<usize> {
    let mut fallback = None;
    for (index, message) in existing.iter().enumerate() {
        if !same_message(message, candidate, tolerance) {
            continue;
        }
        if message.is_unconfirmed() {
            return Some(index);
        }
        fallback.get_or_insert(index);
    }
    fallback
}
