use chrono::TimeDelta;
use tracing::trace;

use crate::{
    dedup::{find_duplicate, is_duplicate},
    ordering::sort_messages,
    types::{DeliveryState, Message},
};

/// Where a batch of incoming messages is merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Older history page: survivors go in front of the current list.
    Prepend,
    /// Live delivery, gap recovery or first page: full merge and re-sort.
    Append,
}

/// What a merge did to a message list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeReport {
    /// New messages inserted.
    pub added: usize,
    /// Unconfirmed entries promoted by their server copy.
    pub confirmed: usize,
    /// Incoming messages dropped as duplicates.
    pub dropped: usize,
}

impl MergeReport {
    pub fn changed(&self) -> bool {
        self.added > 0 || self.confirmed > 0
    }
}

/// Merge `incoming` into `messages`, keeping the list deduplicated and ordered.
///
/// Input order is irrelevant: survivors are sorted before insertion and the
/// final list is re-sorted.
pub fn merge_messages(
    messages: &mut Vec<Message>,
    incoming: Vec<Message>,
    mode: MergeMode,
    tolerance: TimeDelta,
) -> MergeReport {
    let mut report = MergeReport::default();
    let mut survivors: Vec<Message> = Vec::with_capacity(incoming.len());

    for candidate in incoming {
        if let Some(index) = find_duplicate(messages, &candidate, tolerance) {
            if absorb(&mut messages[index], candidate) {
                report.confirmed += 1;
            } else {
                report.dropped += 1;
            }
            continue;
        }
        if is_duplicate(&survivors, &candidate, tolerance) {
            report.dropped += 1;
            continue;
        }
        survivors.push(candidate);
    }

    report.added = survivors.len();
    survivors.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    match mode {
        MergeMode::Prepend => {
            survivors.append(messages);
            *messages = survivors;
        }
        MergeMode::Append => messages.append(&mut survivors),
    }
    sort_messages(messages);

    trace!(
        ?mode,
        added = report.added,
        confirmed = report.confirmed,
        dropped = report.dropped,
        "merged message batch"
    );
    report
}

/// Insert a locally created message without deduplication.
pub fn insert_optimistic(messages: &mut Vec<Message>, message: Message) {
    messages.push(message);
    sort_messages(messages);
}

/// Fold the server copy of a message into the local entry it duplicates.
///
/// Returns `true` when the local entry changed.
fn absorb(existing: &mut Message, incoming: Message) -> bool {
    if !existing.is_unconfirmed() || incoming.is_unconfirmed() {
        if existing.server_id.is_none() && incoming.server_id.is_some() {
            existing.server_id = incoming.server_id;
            return true;
        }
        return false;
    }

    existing.delivery = DeliveryState::Confirmed;
    existing.timestamp = incoming.timestamp;
    if incoming.server_id.is_some() {
        existing.server_id = incoming.server_id;
    }
    if existing.client_temp_id.is_none() {
        existing.client_temp_id = incoming.client_temp_id;
    }
    true
}

/// Clamp a requested page size to something the history API accepts.
///
/// The result is always in `1..=100`.
pub fn bounded_page_size(requested: u16) -> u16 {
    requested.clamp(1, 100)
}
