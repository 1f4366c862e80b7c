#![forbid(unsafe_code)]

//! Ordered watch list and the positional reconciliation cursor.
//!
//! A component's declaration-site calls are replayed on every render pass.
//! The list remembers what each call registered last time, addressed by
//! position:
//!
//! ```text
//! pass n:   watch(a)   watch_stream(s)   register_handler(a)
//!              │              │                   │
//!           [ slot 0 ]    [ slot 1 ]          [ slot 2 ]
//!              ▲
//!           cursor (reset by begin_pass, +1 per call)
//! ```
//!
//! # Invariants
//!
//! 1. Entries are never reordered. Insertion order is declaration order.
//! 2. During a pass the list only grows at the tail or has a slot replaced in
//!    place; nothing is removed until [`WatchList::clear`].
//! 3. The cursor is `Some(i)` only while `i < len`; an append makes it `None`
//!    for the rest of the pass.
//! 4. `clear` tears entries down in reverse registration order and is a
//!    no-op on an empty list.
//!
//! # Failure Modes
//!
//! The list itself never fails. Positional violations are detected by the
//! caller (kind/type mismatch at a slot) and by [`PassReport::unvisited`].

use std::fmt;

use fwatch_core::ObjectKey;

use crate::entry::WatchEntry;

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// Position of the next entry to match in the current pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconciliationCursor {
    position: Option<usize>,
}

impl ReconciliationCursor {
    /// Point at the head of a list of `len` entries.
    pub fn reset(&mut self, len: usize) {
        self.position = (len > 0).then_some(0);
    }

    /// Read the current slot and advance past it.
    pub fn advance(&mut self, len: usize) -> Option<usize> {
        let current = self.position?;
        let next = current + 1;
        self.position = (next < len).then_some(next);
        Some(current)
    }

    /// Mark the cursor exhausted.
    pub fn invalidate(&mut self) {
        self.position = None;
    }

    #[must_use]
    pub fn position(&self) -> Option<usize> {
        self.position
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.position.is_none()
    }
}

// ---------------------------------------------------------------------------
// PassReport
// ---------------------------------------------------------------------------

/// What one render pass did to the list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Pass number, starting at 1.
    pub pass: u64,
    /// Slots whose entry was reused unchanged.
    pub matched: usize,
    /// Entries appended at the tail.
    pub appended: usize,
    /// Slots whose entry was torn down and replaced.
    pub replaced: usize,
    /// Entries the pass never reached.
    pub unvisited: usize,
}

impl PassReport {
    /// Slots the pass declared.
    #[must_use]
    pub fn declared(&self) -> usize {
        self.matched + self.appended + self.replaced
    }

    /// Nothing was created, replaced or skipped.
    #[must_use]
    pub fn is_steady(&self) -> bool {
        self.appended == 0 && self.replaced == 0 && self.unvisited == 0
    }
}

impl fmt::Display for PassReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pass {}: {} matched, {} appended, {} replaced, {} unvisited",
            self.pass, self.matched, self.appended, self.replaced, self.unvisited
        )
    }
}

// ---------------------------------------------------------------------------
// WatchList
// ---------------------------------------------------------------------------

/// Entries owned by one binding state, in declaration order.
#[derive(Default)]
pub struct WatchList {
    entries: Vec<WatchEntry>,
    cursor: ReconciliationCursor,
    report: PassReport,
    passes: u64,
}

impl WatchList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a pass: reset the cursor to the head and zero the counters.
    pub fn begin_pass(&mut self) -> u64 {
        self.passes += 1;
        self.cursor.reset(self.entries.len());
        self.report = PassReport {
            pass: self.passes,
            ..PassReport::default()
        };
        self.passes
    }

    /// Slot of the entry the next declaration should match, if any.
    pub fn next_slot(&mut self) -> Option<usize> {
        self.cursor.advance(self.entries.len())
    }

    #[must_use]
    pub fn entry(&self, slot: usize) -> Option<&WatchEntry> {
        self.entries.get(slot)
    }

    pub(crate) fn record_match(&mut self) {
        self.report.matched += 1;
    }

    /// Add a new entry at the tail; returns its slot.
    pub(crate) fn append(&mut self, entry: WatchEntry) -> usize {
        self.entries.push(entry);
        self.cursor.invalidate();
        self.report.appended += 1;
        self.entries.len() - 1
    }

    /// Tear down the entry at `slot` without removing it.
    pub(crate) fn dispose_at(&mut self, slot: usize) -> bool {
        self.entries.get_mut(slot).is_some_and(WatchEntry::dispose)
    }

    /// Put `entry` at `slot`. The previous occupant must already be torn down;
    /// dropping it is then a no-op.
    pub(crate) fn replace(&mut self, slot: usize, entry: WatchEntry) {
        if let Some(existing) = self.entries.get_mut(slot) {
            *existing = entry;
            self.report.replaced += 1;
        }
    }

    /// First live watching entry observing `key` among the slots this pass
    /// has already visited, for which `same_selection` holds.
    ///
    /// `current` is the slot being declared (`None` when appending). Slots at
    /// or after it still hold last pass's objects and are not compared.
    pub(crate) fn find_watching(
        &self,
        key: ObjectKey,
        current: Option<usize>,
        same_selection: impl Fn(&WatchEntry) -> bool,
    ) -> Option<usize> {
        let visited = current.unwrap_or(self.entries.len());
        self.entries[..visited.min(self.entries.len())]
            .iter()
            .enumerate()
            .find_map(|(slot, entry)| {
                let candidate = entry.kind().is_watching()
                    && entry.is_alive()
                    && entry.observed() == Some(key);
                (candidate && same_selection(entry)).then_some(slot)
            })
    }

    /// End the pass and report. Entries past the cursor were not visited.
    pub fn finish_pass(&mut self) -> PassReport {
        self.report.unvisited = self
            .cursor
            .position()
            .map_or(0, |position| self.entries.len() - position);
        self.cursor.invalidate();
        self.report
    }

    /// Tear down every entry, newest first, and empty the list.
    ///
    /// Returns the number of entries that were still live.
    pub fn clear(&mut self) -> usize {
        if self.entries.is_empty() {
            return 0;
        }
        let mut torn = 0;
        for entry in self.entries.iter_mut().rev() {
            if entry.dispose() {
                torn += 1;
            }
        }
        let held = self.entries.len();
        self.entries.clear();
        self.cursor.invalidate();
        tracing::debug!(entries = held, live = torn, "watch list cleared");
        torn
    }

    pub fn iter(&self) -> impl Iterator<Item = &WatchEntry> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries that still own a live subscription.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_alive()).count()
    }

    #[must_use]
    pub fn cursor(&self) -> ReconciliationCursor {
        self.cursor
    }

    /// Passes started over the list's lifetime.
    #[must_use]
    pub fn passes(&self) -> u64 {
        self.passes
    }
}

impl Drop for WatchList {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for WatchList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchList")
            .field("entries", &self.entries)
            .field("cursor", &self.cursor)
            .field("passes", &self.passes)
            .finish()
    }
}
