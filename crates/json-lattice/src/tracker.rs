//! [`Tracker`] — keeps a typed application record synchronized with a
//! replicated document.
//!
//! The tracker owns a [`Document`] and a serde-serializable record type.
//! [`update`](Tracker::update) diffs the record against the document view and
//! turns the difference into a [`Patch`]: registers are overwritten in place,
//! strings are spliced, arrays grow, shrink, or replace single elements, and
//! only a genuine shape change rebuilds a subtree. The patch leaves the
//! document untouched until it goes through
//! [`apply_patch`](Tracker::apply_patch), the same entry point that folds in
//! patches from peers and refreshes the cached record.
//!
//! Every applied patch is also appended to a log, which powers snapshots: a
//! [`Snapshot`] stores a named clock cut (the per-session counters applied so
//! far), and [`time_travel`](Tracker::time_travel) rebuilds an independent
//! document by replaying the log up to that cut. Edits on the traveled
//! document never leak back into the live one. [`revert`](Tracker::revert)
//! brings the live document back to a snapshot's state by emitting a regular
//! forward patch, so a revert replicates to peers like any other edit.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::clock::{SessionId, Ts, ORIGIN};
use crate::doc::{AppliedResult, Document};
use crate::node::{ArrNode, Node, ObjNode, StrNode};
use crate::patch::builder::PatchBuilder;
use crate::patch::Patch;

// ── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TrackerError {
    /// The record failed to (de)serialize through `serde_json`.
    #[error("record shape mismatch: {0}")]
    Shape(#[from] serde_json::Error),
    /// Tracked records must serialize to a JSON object.
    #[error("record must serialize to an object, got {0}")]
    NotObject(&'static str),
    #[error("unknown snapshot {0:?}")]
    UnknownSnapshot(String),
    #[error("no snapshots registered")]
    NoSnapshots,
}

// ── Snapshot ───────────────────────────────────────────────────────────────

/// A named capture of the document's logical state: the per-session counter
/// cut at creation time. Reconstruction replays the tracker's patch log up
/// to the cut, so a snapshot stays cheap no matter how large the tree is.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub name: String,
    pub created_at: DateTime<Utc>,
    cut: HashMap<SessionId, u64>,
}

// ── Tracker ────────────────────────────────────────────────────────────────

/// Synchronizes a typed record with a replicated document.
#[derive(Debug)]
pub struct Tracker<T> {
    doc: Document,
    /// Frozen copy of the document at tracking start; log replay begins here.
    base: Document,
    record: T,
    log: Vec<Patch>,
    snapshots: IndexMap<String, Snapshot>,
    /// Next counter `update` may mint from. Stays ahead of patches that were
    /// built but not yet applied, so consecutive diffs never reuse stamps.
    mint_floor: u64,
}

impl<T: Serialize + DeserializeOwned + Clone> Tracker<T> {
    /// Build a fresh document whose view equals the record's serialization
    /// and start tracking it.
    pub fn initialize_document(record: &T) -> Result<Tracker<T>, TrackerError> {
        let value = serde_json::to_value(record)?;
        if !value.is_object() {
            return Err(TrackerError::NotObject(value_kind(&value)));
        }

        let mut doc = Document::create();
        let mut builder = doc.new_patch_builder();
        let root = builder.json(&value);
        builder.root(root);
        let patch = builder.flush();
        doc.apply_patch(&patch);

        let base = doc.clone();
        Ok(Tracker {
            doc,
            base,
            record: record.clone(),
            log: Vec::new(),
            snapshots: IndexMap::new(),
            mint_floor: 0,
        })
    }

    /// Adopt an existing document, deserializing its view into the record
    /// type. The document's current state becomes the replay baseline.
    pub fn track_from_document(doc: Document) -> Result<Tracker<T>, TrackerError> {
        let view = doc.view();
        if !view.is_object() {
            return Err(TrackerError::NotObject(value_kind(&view)));
        }
        let record = serde_json::from_value(view)?;
        let base = doc.clone();
        Ok(Tracker {
            doc,
            base,
            record,
            log: Vec::new(),
            snapshots: IndexMap::new(),
            mint_floor: 0,
        })
    }

    /// The tracked document.
    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// The last synchronized record.
    pub fn record(&self) -> &T {
        &self.record
    }

    /// The current document view.
    pub fn view(&self) -> Value {
        self.doc.view()
    }

    /// Every patch applied since tracking started, in application order.
    pub fn patches(&self) -> &[Patch] {
        &self.log
    }

    // ── Synchronization ────────────────────────────────────────────────────

    /// Diff `record` against the document and return the patch that brings
    /// the document up to date, stamped from this tracker's session. The
    /// document itself is untouched: feed the patch through
    /// [`apply_patch`](Self::apply_patch) locally and hand it to the
    /// transport for peers. Returns `None` when nothing changed.
    pub fn update(&mut self, record: &T) -> Result<Option<Patch>, TrackerError> {
        let want = serde_json::to_value(record)?;
        if !want.is_object() {
            return Err(TrackerError::NotObject(value_kind(&want)));
        }

        let patch = self.diff_against(&want);
        if patch.ops.is_empty() {
            return Ok(None);
        }
        debug!(ops = patch.ops.len(), "record diff");
        Ok(Some(patch))
    }

    /// Apply a patch, own or from a peer, and refresh the cached record. The
    /// document always keeps the patch; a shape error means the new view no
    /// longer deserializes into the record type, and the cached record keeps
    /// its last good value.
    pub fn apply_patch(&mut self, patch: &Patch) -> Result<AppliedResult, TrackerError> {
        let result = self.doc.apply_patch(patch);
        self.log.push(patch.clone());
        self.record = serde_json::from_value(self.doc.view())?;
        Ok(result)
    }

    fn diff_against(&mut self, want: &Value) -> Patch {
        let mut builder = self.doc.new_patch_builder();
        if self.mint_floor > builder.clock.counter {
            builder.clock.counter = self.mint_floor;
        }
        let rebuilt = match self.doc.root.child {
            Some(root) => !diff_node(&self.doc, &mut builder, root, want),
            None => true,
        };
        if rebuilt {
            let id = builder.json(want);
            builder.root(id);
        }
        self.mint_floor = builder.clock.counter;
        builder.flush()
    }

    // ── Snapshots ──────────────────────────────────────────────────────────

    /// Capture the current state under `name`. An existing snapshot with the
    /// same name is replaced.
    pub fn create_snapshot(&mut self, name: &str) -> &Snapshot {
        let snapshot = Snapshot {
            name: name.to_string(),
            created_at: Utc::now(),
            cut: self.doc.clock.cut(),
        };
        debug!(name, "snapshot created");
        self.snapshots.insert(name.to_string(), snapshot);
        &self.snapshots[name]
    }

    /// All snapshots in creation order.
    pub fn list_snapshots(&self) -> Vec<&Snapshot> {
        self.snapshots.values().collect()
    }

    pub fn delete_snapshot(&mut self, name: &str) -> Result<(), TrackerError> {
        self.snapshots
            .shift_remove(name)
            .map(|_| ())
            .ok_or_else(|| TrackerError::UnknownSnapshot(name.to_string()))
    }

    /// Rebuild an independent document holding the state captured by the
    /// named snapshot. The new document has its own session, so edits on it
    /// never affect the live one.
    pub fn time_travel(&self, name: &str) -> Result<Document, TrackerError> {
        let snapshot = self
            .snapshots
            .get(name)
            .ok_or_else(|| TrackerError::UnknownSnapshot(name.to_string()))?;
        debug!(name, "time travel");
        Ok(self.replay(&snapshot.cut))
    }

    /// Like [`time_travel`](Self::time_travel), picking the snapshot whose
    /// creation time is closest to `at`.
    pub fn time_travel_at(&self, at: DateTime<Utc>) -> Result<Document, TrackerError> {
        let snapshot = self
            .snapshots
            .values()
            .min_by_key(|s| (s.created_at - at).abs())
            .ok_or(TrackerError::NoSnapshots)?;
        Ok(self.replay(&snapshot.cut))
    }

    /// Bring the live document back to the named snapshot's state. The
    /// rollback is a regular forward patch (returned for broadcast), so the
    /// log, the existing snapshots, and peer replicas all stay consistent.
    pub fn revert(&mut self, name: &str) -> Result<Option<Patch>, TrackerError> {
        let snapshot = self
            .snapshots
            .get(name)
            .ok_or_else(|| TrackerError::UnknownSnapshot(name.to_string()))?;
        let target = self.replay(&snapshot.cut).view();

        let patch = self.diff_against(&target);
        if patch.ops.is_empty() {
            return Ok(None);
        }
        debug!(name, ops = patch.ops.len(), "revert");
        self.doc.apply_patch(&patch);
        self.log.push(patch.clone());
        self.record = serde_json::from_value(self.doc.view())?;
        Ok(Some(patch))
    }

    fn replay(&self, cut: &HashMap<SessionId, u64>) -> Document {
        let mut doc = self.base.fork();
        for patch in &self.log {
            for op in &patch.ops {
                let id = op.id();
                let edge = id.counter + op.span() - 1;
                if cut.get(&id.sid).copied().unwrap_or(0) >= edge {
                    doc.apply_operation(op);
                }
            }
        }
        doc
    }
}

// ── Structural diff ────────────────────────────────────────────────────────

/// Emit operations making node `id` view as `want`, when the node's kind can
/// represent it. Returns `false` on a kind mismatch; the caller then builds
/// a fresh subtree and rebinds. Nothing is emitted on the `false` path.
fn diff_node(doc: &Document, builder: &mut PatchBuilder, id: Ts, want: &Value) -> bool {
    let node = match doc.get_node(id) {
        Some(node) => node,
        None => return false,
    };
    match (node, want) {
        (Node::Obj(obj), Value::Object(map)) => {
            diff_obj(doc, builder, obj, map);
            true
        }
        (Node::Arr(arr), Value::Array(items)) => {
            diff_arr(doc, builder, arr, items);
            true
        }
        (Node::Str(node), Value::String(text)) => {
            diff_str(builder, node, text);
            true
        }
        (Node::Num(node), Value::Number(number)) => {
            if node.value != *number {
                builder.set(id, want.clone());
            }
            true
        }
        (Node::Bool(node), Value::Bool(flag)) => {
            if node.value != *flag {
                builder.set(id, Value::Bool(*flag));
            }
            true
        }
        (Node::Con(node), value) => {
            if node.value != *value {
                builder.set(id, value.clone());
            }
            true
        }
        (Node::Null(_), Value::Null) => true,
        _ => false,
    }
}

fn diff_obj(
    doc: &Document,
    builder: &mut PatchBuilder,
    obj: &ObjNode,
    want: &serde_json::Map<String, Value>,
) {
    for (key, want_val) in want {
        match obj.get(key) {
            Some(child) => {
                let have = doc.get_node(child).map(|n| n.view(&doc.table));
                if have.as_ref() == Some(want_val) {
                    continue;
                }
                if !diff_node(doc, builder, child, want_val) {
                    let fresh = builder.json(want_val);
                    builder.ins_obj(obj.id, key.clone(), fresh);
                }
            }
            None => {
                let fresh = builder.json(want_val);
                builder.ins_obj(obj.id, key.clone(), fresh);
            }
        }
    }

    // Tombstone keys the record no longer has, in a stable order.
    let mut dropped: Vec<&String> = obj
        .keys
        .iter()
        .filter(|(key, slot)| slot.child.is_some() && !want.contains_key(*key))
        .map(|(key, _)| key)
        .collect();
    dropped.sort();
    for key in dropped {
        builder.del_key(obj.id, key.clone());
    }
}

fn diff_arr(doc: &Document, builder: &mut PatchBuilder, arr: &ArrNode, want: &[Value]) {
    let have_ids: Vec<Ts> = arr.iter_ids().collect();
    let have: Vec<Value> = have_ids
        .iter()
        .map(|id| match doc.get_node(*id) {
            Some(node) => node.view(&doc.table),
            None => Value::Null,
        })
        .collect();

    if want.len() == have.len() {
        // Same shape: update elements in place, replacing a slot only when
        // the element kind changed.
        for (pos, want_val) in want.iter().enumerate() {
            if have[pos] == *want_val {
                continue;
            }
            if diff_node(doc, builder, have_ids[pos], want_val) {
                continue;
            }
            let fresh = builder.json(want_val);
            if let Some(slot) = arr.find(pos) {
                builder.ins_arr(arr.id, slot, vec![fresh]);
                builder.del(arr.id, arr.find_interval(pos, 1));
            }
        }
    } else if want.len() > have.len() && have[..] == want[..have.len()] {
        // Pure growth: one run appended after the current tail.
        let fresh: Vec<Ts> = want[have.len()..].iter().map(|v| builder.json(v)).collect();
        let anchor = if have.is_empty() {
            ORIGIN
        } else {
            arr.find(have.len() - 1).unwrap_or(ORIGIN)
        };
        builder.ins_arr(arr.id, anchor, fresh);
    } else if want.len() < have.len() && have[..want.len()] == want[..] {
        // Pure truncation.
        builder.del(arr.id, arr.find_interval(want.len(), have.len() - want.len()));
    } else {
        // Reordered or reshaped: rewrite the whole sequence as one run, so
        // the record's internal order is preserved exactly.
        if !have.is_empty() {
            builder.del(arr.id, arr.find_interval(0, have.len()));
        }
        if !want.is_empty() {
            let fresh: Vec<Ts> = want.iter().map(|v| builder.json(v)).collect();
            builder.ins_arr(arr.id, ORIGIN, fresh);
        }
    }
}

fn diff_str(builder: &mut PatchBuilder, node: &StrNode, want: &str) {
    let have = node.view_str();
    if have == want {
        return;
    }
    let have_chars: Vec<char> = have.chars().collect();
    let want_chars: Vec<char> = want.chars().collect();

    let mut prefix = 0;
    while prefix < have_chars.len()
        && prefix < want_chars.len()
        && have_chars[prefix] == want_chars[prefix]
    {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < have_chars.len() - prefix
        && suffix < want_chars.len() - prefix
        && have_chars[have_chars.len() - 1 - suffix] == want_chars[want_chars.len() - 1 - suffix]
    {
        suffix += 1;
    }

    // Splice: one insert after the common prefix, one delete of the stale
    // middle. Anchor and spans both come from the pre-edit state.
    let middle: String = want_chars[prefix..want_chars.len() - suffix].iter().collect();
    if !middle.is_empty() {
        let anchor = if prefix == 0 {
            ORIGIN
        } else {
            node.find(prefix - 1).unwrap_or(ORIGIN)
        };
        builder.ins_str(node.id, anchor, middle);
    }
    let stale = have_chars.len() - prefix - suffix;
    if stale > 0 {
        builder.del(node.id, node.find_interval(prefix, stale));
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
