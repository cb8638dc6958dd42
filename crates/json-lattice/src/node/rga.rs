//! Replicated growable sequence used by both array and string nodes.
//!
//! The sequence is kept as a flat `Vec<Run<T>>` in materialization order,
//! where each run is a contiguous burst of items from one insert operation;
//! item `k` of a run carries the timestamp `id + k`. Integration finds the
//! anchor item, splits its run so the anchor sits on a run boundary, then
//! skips every following run whose id is greater than the incoming one and
//! inserts there. Sessions only mint stamps above everything they have
//! observed, so an anchored run always outranks its anchor and skipping a
//! greater run steps over that run's nested inserts too. Runs sharing an
//! anchor materialize newest first, and the sequence comes out the same on
//! every replica for any delivery order. Scans are linear, which is correct
//! but not tuned for very large sequences.
//!
//! Deletion tombstones items in place: a tombstoned run keeps its id and
//! span, drops its payload, and stays addressable as an anchor.

use crate::clock::{contains_id, Ts, Tss, ORIGIN};

// ── RunData ────────────────────────────────────────────────────────────────

/// Trait for run payload types that can be split at a logical item offset.
///
/// Required for partial-run deletion and for anchoring inside a run: the run
/// must be split so the targeted item sits on a run boundary.
pub trait RunData: Clone {
    /// Split `self` at logical offset `at` (number of items before the split).
    /// Modifies `self` to hold items `[0, at)` and returns items `[at, len)`.
    fn split_at_offset(&mut self, at: usize) -> Self;
}

impl RunData for String {
    fn split_at_offset(&mut self, at: usize) -> Self {
        // Locate the byte position of the `at`-th character.
        let byte_pos = self
            .char_indices()
            .nth(at)
            .map(|(i, _)| i)
            .unwrap_or(self.len());
        self.split_off(byte_pos)
    }
}

impl RunData for Vec<Ts> {
    fn split_at_offset(&mut self, at: usize) -> Self {
        self.split_off(at)
    }
}

// ── Run ────────────────────────────────────────────────────────────────────

/// One run in the sequence.
///
/// Items within a run carry consecutive timestamps `id, id+1, id+2, ...`;
/// each item after the first is implicitly anchored on its predecessor.
#[derive(Debug, Clone)]
pub struct Run<T: Clone> {
    /// Timestamp of the *first* item in this run.
    pub id: Ts,
    /// Number of logical items in this run (including deleted ones).
    pub span: u64,
    /// Whether all items in this run are deleted.
    pub deleted: bool,
    /// The actual content. `None` once the run is a tombstone.
    pub data: Option<T>,
}

impl<T: Clone> Run<T> {
    pub fn new(id: Ts, span: u64, data: T) -> Self {
        Self {
            id,
            span,
            deleted: false,
            data: Some(data),
        }
    }

    /// Number of visible items.
    pub fn len(&self) -> u64 {
        if self.deleted {
            0
        } else {
            self.span
        }
    }
}

// ── Rga ────────────────────────────────────────────────────────────────────

/// A replicated sequence with linear-scan integration.
#[derive(Debug, Clone, Default)]
pub struct Rga<T: Clone> {
    pub runs: Vec<Run<T>>,
}

impl<T: Clone + RunData> Rga<T> {
    pub fn new() -> Self {
        Self { runs: Vec::new() }
    }

    /// Find the run index whose id range covers `id`, tombstones included.
    pub fn find_by_id(&self, id: Ts) -> Option<usize> {
        self.runs
            .iter()
            .position(|r| contains_id(r.id, r.span, id))
    }

    /// Returns `true` if some run (live or tombstoned) covers `id`.
    pub fn contains_item(&self, id: Ts) -> bool {
        self.find_by_id(id).is_some()
    }

    /// Integrate a run of `span` items with timestamp `id` after the item
    /// `after` (`ORIGIN` for the front). Returns `false` when the anchor is
    /// unknown, in which case nothing is inserted.
    ///
    /// When `after` falls in the middle of an existing run that run is split
    /// first, so the anchor always sits on a run boundary. From there the
    /// scan steps over runs with a greater id: a concurrent insert at the
    /// same anchor keeps the spot next to it when its stamp is greater, and
    /// anything anchored inside a skipped run is skipped along with it.
    pub fn insert(&mut self, after: Ts, id: Ts, span: u64, data: T) -> bool {
        let start = if after == ORIGIN {
            0
        } else {
            match self.find_by_id(after) {
                Some(idx) => {
                    let run_last = self.runs[idx].id.counter + self.runs[idx].span - 1;
                    if after.counter < run_last {
                        let at = (after.counter - self.runs[idx].id.counter + 1) as usize;
                        self.split_run_at(idx, at);
                    }
                    idx + 1
                }
                None => return false,
            }
        };

        let mut pos = start;
        while pos < self.runs.len() && self.runs[pos].id > id {
            pos += 1;
        }

        self.runs.insert(pos, Run::new(id, span, data));
        true
    }

    // ── Run splitting ────────────────────────────────────────────────────

    /// Split the run at `run_idx` at logical offset `at_offset`.
    ///
    /// After the call:
    /// - `runs[run_idx]` holds items `[0, at_offset)`.
    /// - `runs[run_idx + 1]` holds the rest.
    fn split_run_at(&mut self, run_idx: usize, at_offset: usize) {
        if at_offset == 0 {
            return;
        }
        let span = self.runs[run_idx].span;
        if at_offset as u64 >= span {
            return;
        }

        let run = &mut self.runs[run_idx];
        let id = run.id;
        let deleted = run.deleted;

        // `Option::map` keeps tombstones as `None` on both halves.
        let right_data = run.data.as_mut().map(|d| d.split_at_offset(at_offset));

        let right_run = Run {
            id: Ts::new(id.sid, id.counter + at_offset as u64),
            span: span - at_offset as u64,
            deleted,
            data: right_data,
        };

        self.runs[run_idx].span = at_offset as u64;
        self.runs.insert(run_idx + 1, right_run);
    }

    // ── Deletion ─────────────────────────────────────────────────────────

    /// Tombstone all items covered by the given timestamp spans.
    ///
    /// Runs only partially covered by a span are split at the boundaries so
    /// that exactly the targeted items are tombstoned. Items already deleted
    /// or never seen are left alone, which makes deletion idempotent.
    pub fn delete(&mut self, spans: &[Tss]) {
        for tss in spans {
            let del_start = tss.counter;
            let del_end = tss.counter + tss.span; // exclusive upper bound
            let sid = tss.sid;

            let mut i = 0;
            while i < self.runs.len() {
                let run = &self.runs[i];

                if run.id.sid != sid {
                    i += 1;
                    continue;
                }

                let run_start = run.id.counter;
                let run_end = run.id.counter + run.span;

                // No overlap.
                if run_start >= del_end || run_end <= del_start {
                    i += 1;
                    continue;
                }

                let overlap_start = del_start.max(run_start);
                let overlap_end = del_end.min(run_end);

                // Split off the prefix that precedes the deletion (if any).
                if overlap_start > run_start {
                    let prefix_len = (overlap_start - run_start) as usize;
                    self.split_run_at(i, prefix_len);
                    i += 1; // advance to the right half
                }

                // Split off the suffix that follows the deletion (if any).
                let run_end = self.runs[i].id.counter + self.runs[i].span;
                if overlap_end < run_end {
                    let del_len = (overlap_end - self.runs[i].id.counter) as usize;
                    self.split_run_at(i, del_len);
                    // runs[i] now covers exactly [overlap_start, overlap_end)
                }

                let run = &mut self.runs[i];
                run.deleted = true;
                run.data = None;

                i += 1;
            }
        }
    }

    // ── Iteration and addressing ─────────────────────────────────────────

    /// Iterate live (non-tombstoned) runs.
    pub fn iter_live(&self) -> impl Iterator<Item = &Run<T>> {
        self.runs.iter().filter(|r| !r.deleted)
    }

    /// Number of visible items.
    pub fn length(&self) -> u64 {
        self.runs.iter().map(|r| r.len()).sum()
    }

    /// Timestamp of the visible item at `pos`.
    pub fn id_at(&self, pos: u64) -> Option<Ts> {
        let mut seen = 0u64;
        for run in self.iter_live() {
            if pos < seen + run.span {
                return Some(Ts::new(run.id.sid, run.id.counter + (pos - seen)));
            }
            seen += run.span;
        }
        None
    }

    /// Covering timespans for `count` visible items starting at `pos`.
    /// Stops early when the sequence runs out of visible items.
    pub fn spans(&self, pos: u64, count: u64) -> Vec<Tss> {
        let mut out = Vec::new();
        let mut remaining = count;
        let mut seen = 0u64;
        for run in self.iter_live() {
            if remaining == 0 {
                break;
            }
            let run_end = seen + run.span;
            if pos >= run_end {
                seen = run_end;
                continue;
            }
            let start_off = pos.saturating_sub(seen);
            let take = (run.span - start_off).min(remaining);
            out.push(Tss::new(
                run.id.sid,
                run.id.counter + start_off,
                take,
            ));
            remaining -= take;
            seen = run_end;
        }
        out
    }
}
