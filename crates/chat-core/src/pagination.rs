//! Backward history loading for rooms.
//!
//! Each room moves `Idle -> Fetching -> Idle` on a full page and
//! `Idle -> Fetching -> Exhausted` on an empty or short page. Exhausted rooms
//! ignore scroll triggers until [`PaginationController::reset`] (activation).
//! Every started request gets a request id; completions carrying an id that is
//! no longer the room's current one are stale and are discarded.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::{
    store::RoomStore,
    timeline::{MergeMode, bounded_page_size},
    types::Message,
};

/// Per-room pagination state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaginationPhase {
    #[default]
    Idle,
    Fetching,
    Exhausted,
}

/// Scroll position of the message viewport.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollMetrics {
    /// Distance from the top of the content to the top of the viewport.
    pub scroll_top: f32,
    /// Total content height.
    pub scroll_height: f32,
}

/// Viewport position captured right before an older page is requested.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollAnchor {
    pub old_height: f32,
    pub old_offset: f32,
}

impl ScrollAnchor {
    pub fn capture(metrics: ScrollMetrics) -> Self {
        Self {
            old_height: metrics.scroll_height,
            old_offset: metrics.scroll_top,
        }
    }

    /// Offset that keeps the previously visible message in place after the
    /// content grew to `new_height`.
    pub fn restored_offset(&self, new_height: f32) -> f32 {
        new_height - self.old_height + self.old_offset
    }
}

/// A history request the caller must issue.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub room_id: String,
    /// Page index, 0 is the most recent page.
    pub page: u32,
    /// Requested page size.
    pub limit: u16,
    pub anchor: Option<ScrollAnchor>,
    pub request_id: u64,
}

/// Result of applying a fetched page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PageOutcome {
    /// Page merged; more history may exist.
    Merged {
        added: usize,
        anchor: Option<ScrollAnchor>,
    },
    /// Page merged and no older history remains.
    Exhausted {
        added: usize,
        anchor: Option<ScrollAnchor>,
    },
    /// The request was superseded; nothing was applied.
    Stale,
}

impl PageOutcome {
    pub fn added(&self) -> usize {
        match self {
            Self::Merged { added, .. } | Self::Exhausted { added, .. } => *added,
            Self::Stale => 0,
        }
    }

    pub fn anchor(&self) -> Option<ScrollAnchor> {
        match self {
            Self::Merged { anchor, .. } | Self::Exhausted { anchor, .. } => *anchor,
            Self::Stale => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct RoomPagination {
    phase: PaginationPhase,
    in_flight: Option<u64>,
}

/// Tracks pagination phase per room and applies fetched pages to the store.
#[derive(Debug)]
pub struct PaginationController {
    page_size: u16,
    top_threshold_px: f32,
    next_request_id: u64,
    rooms: HashMap<String, RoomPagination>,
}

impl PaginationController {
    pub fn new(page_size: u16, top_threshold_px: f32) -> Self {
        Self {
            page_size: bounded_page_size(page_size),
            top_threshold_px,
            next_request_id: 1,
            rooms: HashMap::new(),
        }
    }

    pub fn page_size(&self) -> u16 {
        self.page_size
    }

    pub fn phase(&self, room_id: &str) -> PaginationPhase {
        self.rooms
            .get(room_id)
            .map(|room| room.phase)
            .unwrap_or_default()
    }

    /// Forget any previous state and rewind the store cursor (room activation).
    pub fn reset(&mut self, store: &mut RoomStore, room_id: &str) {
        self.rooms.remove(room_id);
        store.reset_cursor(room_id);
    }

    /// Start the first-page fetch of a freshly activated room.
    ///
    /// Supersedes any older-page request still in flight for the room.
    pub fn begin_initial(&mut self, room_id: &str) -> PageRequest {
        let request_id = self.allocate_request_id();
        self.rooms.insert(
            room_id.to_owned(),
            RoomPagination {
                phase: PaginationPhase::Fetching,
                in_flight: Some(request_id),
            },
        );
        trace!(%room_id, request_id, "initial page requested");
        PageRequest {
            room_id: room_id.to_owned(),
            page: 0,
            limit: self.page_size,
            anchor: None,
            request_id,
        }
    }

    /// Start an older-page fetch when the viewport is near the top.
    ///
    /// Returns `None` while a fetch is running, after exhaustion, or when the
    /// viewport is still below the threshold.
    pub fn begin_older(
        &mut self,
        store: &RoomStore,
        room_id: &str,
        metrics: ScrollMetrics,
    ) -> Option<PageRequest> {
        if metrics.scroll_top > self.top_threshold_px {
            return None;
        }

        let cursor = store.cursor(room_id);
        let state = self.rooms.entry(room_id.to_owned()).or_default();
        if cursor.exhausted && state.phase == PaginationPhase::Idle {
            state.phase = PaginationPhase::Exhausted;
        }
        match state.phase {
            PaginationPhase::Fetching | PaginationPhase::Exhausted => {
                trace!(%room_id, phase = ?state.phase, "scroll trigger suppressed");
                return None;
            }
            PaginationPhase::Idle => {}
        }

        let request_id = self.next_request_id;
        self.next_request_id += 1;
        state.phase = PaginationPhase::Fetching;
        state.in_flight = Some(request_id);

        debug!(%room_id, page = cursor.next_page, request_id, "older page requested");
        Some(PageRequest {
            room_id: room_id.to_owned(),
            page: cursor.next_page,
            limit: self.page_size,
            anchor: Some(ScrollAnchor::capture(metrics)),
            request_id,
        })
    }

    /// Apply a fetched page for `request`.
    ///
    /// `received` is the number of entries the server returned, before any
    /// unreadable ones were dropped. The first page merges in append mode (it
    /// may overlap live messages), older pages prepend. A page shorter than the
    /// page size exhausts the room.
    pub fn complete(
        &mut self,
        store: &mut RoomStore,
        request: &PageRequest,
        page: Vec<Message>,
        received: usize,
    ) -> PageOutcome {
        if !self.is_current(request) {
            debug!(
                room_id = %request.room_id,
                request_id = request.request_id,
                "discarding stale page"
            );
            return PageOutcome::Stale;
        }

        let mode = if request.page == 0 {
            MergeMode::Append
        } else {
            MergeMode::Prepend
        };
        let report = store.merge_messages(&request.room_id, page, mode);
        let exhausted = received < usize::from(request.limit);
        store.advance_cursor(&request.room_id, exhausted);

        let state = self.rooms.entry(request.room_id.clone()).or_default();
        state.in_flight = None;
        if exhausted {
            state.phase = PaginationPhase::Exhausted;
            debug!(room_id = %request.room_id, received, "history exhausted");
            PageOutcome::Exhausted {
                added: report.added,
                anchor: request.anchor,
            }
        } else {
            state.phase = PaginationPhase::Idle;
            PageOutcome::Merged {
                added: report.added,
                anchor: request.anchor,
            }
        }
    }

    /// Revert a failed or timed-out request to `Idle` so it can be retried.
    ///
    /// Returns `false` when the request was already superseded.
    pub fn fail(&mut self, request: &PageRequest) -> bool {
        if !self.is_current(request) {
            return false;
        }
        if let Some(state) = self.rooms.get_mut(&request.room_id) {
            state.phase = PaginationPhase::Idle;
            state.in_flight = None;
        }
        true
    }

    /// Drop the room's state; any in-flight result becomes stale.
    pub fn cancel(&mut self, room_id: &str) {
        self.rooms.remove(room_id);
    }

    pub fn clear(&mut self) {
        self.rooms.clear();
    }

    fn is_current(&self, request: &PageRequest) -> bool {
        self.rooms
            .get(&request.room_id)
            .is_some_and(|state| state.in_flight == Some(request.request_id))
    }

    fn allocate_request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }
}
