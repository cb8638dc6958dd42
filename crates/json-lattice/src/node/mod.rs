//! CRDT node types: the tagged variants stored in a document's node table.
//!
//! # Node Types
//!
//! | Rust type  | Semantics                                  |
//! |------------|--------------------------------------------|
//! | `ObjNode`  | LWW key→child map with key tombstones      |
//! | `ArrNode`  | Replicated sequence of child node ids      |
//! | `StrNode`  | Replicated sequence of characters          |
//! | `NumNode`  | LWW number register                        |
//! | `BoolNode` | LWW boolean register                       |
//! | `ConNode`  | LWW register holding an opaque JSON value  |
//! | `NullNode` | Null, no payload                           |

pub mod rga;

use std::collections::HashMap;

use serde_json::{Number, Value};

use crate::clock::{Ts, Tss, ORIGIN};
use rga::Rga;

// ── NodeKind ───────────────────────────────────────────────────────────────

/// The variant tag carried by node-creating operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Obj,
    Arr,
    Str,
    Num,
    Bool,
    Con,
    Null,
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Obj => "obj",
            Self::Arr => "arr",
            Self::Str => "str",
            Self::Num => "num",
            Self::Bool => "bool",
            Self::Con => "con",
            Self::Null => "null",
        }
    }

    pub fn from_name(name: &str) -> Option<NodeKind> {
        Some(match name {
            "obj" => Self::Obj,
            "arr" => Self::Arr,
            "str" => Self::Str,
            "num" => Self::Num,
            "bool" => Self::Bool,
            "con" => Self::Con,
            "null" => Self::Null,
            _ => return None,
        })
    }
}

// ── ObjNode ────────────────────────────────────────────────────────────────

/// One key binding: the stamp of the operation that wrote it and the bound
/// child. `child: None` is a key tombstone; the slot stays in place so a
/// later write can re-bind the key and an older one loses.
#[derive(Debug, Clone, Copy)]
pub struct KeySlot {
    pub ts: Ts,
    pub child: Option<Ts>,
}

/// Last-write-wins object (map from string keys to child node ids).
#[derive(Debug, Clone)]
pub struct ObjNode {
    pub id: Ts,
    pub keys: HashMap<String, KeySlot>,
}

impl ObjNode {
    pub fn new(id: Ts) -> Self {
        Self {
            id,
            keys: HashMap::new(),
        }
    }

    /// Write a key slot, keeping it only if `ts` is newer than what the slot
    /// already holds. Returns `false` when the write loses (or repeats).
    pub fn put(&mut self, key: &str, ts: Ts, child: Option<Ts>) -> bool {
        match self.keys.get(key) {
            Some(slot) if ts <= slot.ts => false,
            _ => {
                self.keys.insert(key.to_string(), KeySlot { ts, child });
                true
            }
        }
    }

    /// Currently bound child for `key`, `None` for absent or tombstoned keys.
    pub fn get(&self, key: &str) -> Option<Ts> {
        self.keys.get(key).and_then(|slot| slot.child)
    }

    /// View: visible entries resolved through the table, keys sorted so the
    /// rendered value is stable.
    pub fn view(&self, table: &NodeTable) -> Value {
        let mut map = serde_json::Map::new();
        let mut keys: Vec<&String> = self
            .keys
            .iter()
            .filter(|(_, slot)| slot.child.is_some())
            .map(|(k, _)| k)
            .collect();
        keys.sort();
        for key in keys {
            if let Some(child) = self.keys[key].child {
                let val = match table.get(&child) {
                    Some(node) => node.view(table),
                    None => Value::Null,
                };
                map.insert(key.clone(), val);
            }
        }
        Value::Object(map)
    }
}

// ── ArrNode ────────────────────────────────────────────────────────────────

/// Replicated array of child node ids.
#[derive(Debug, Clone)]
pub struct ArrNode {
    pub id: Ts,
    pub rga: Rga<Vec<Ts>>,
}

impl ArrNode {
    pub fn new(id: Ts) -> Self {
        Self { id, rga: Rga::new() }
    }

    /// Insert child ids after the element `after`. Returns `false` when the
    /// anchor is unknown.
    pub fn ins(&mut self, after: Ts, id: Ts, data: Vec<Ts>) -> bool {
        let span = data.len() as u64;
        self.rga.insert(after, id, span, data)
    }

    pub fn delete(&mut self, spans: &[Tss]) {
        self.rga.delete(spans);
    }

    /// Number of live elements.
    pub fn size(&self) -> usize {
        self.rga.length() as usize
    }

    /// Slot id (the insertion timestamp) of the element at live position `pos`.
    pub fn find(&self, pos: usize) -> Option<Ts> {
        self.rga.id_at(pos as u64)
    }

    /// Slot-id spans covering live positions `[pos, pos + len)`.
    pub fn find_interval(&self, pos: usize, len: usize) -> Vec<Tss> {
        self.rga.spans(pos as u64, len as u64)
    }

    /// Child node id stored at live position `pos`.
    pub fn element_id(&self, pos: usize) -> Option<Ts> {
        let mut count = 0usize;
        for run in self.rga.iter_live() {
            if let Some(data) = &run.data {
                if pos < count + data.len() {
                    return Some(data[pos - count]);
                }
                count += data.len();
            }
        }
        None
    }

    /// Child node ids of all live elements, in order.
    pub fn iter_ids(&self) -> impl Iterator<Item = Ts> + '_ {
        self.rga
            .iter_live()
            .filter_map(|run| run.data.as_ref())
            .flatten()
            .copied()
    }

    /// View: resolve all live element ids through the table.
    pub fn view(&self, table: &NodeTable) -> Value {
        let items: Vec<Value> = self
            .iter_ids()
            .map(|id| match table.get(&id) {
                Some(node) => node.view(table),
                None => Value::Null,
            })
            .collect();
        Value::Array(items)
    }
}

// ── StrNode ────────────────────────────────────────────────────────────────

/// Replicated string, one logical item per character.
#[derive(Debug, Clone)]
pub struct StrNode {
    pub id: Ts,
    pub rga: Rga<String>,
}

impl StrNode {
    pub fn new(id: Ts) -> Self {
        Self { id, rga: Rga::new() }
    }

    /// Insert `data` after the character `after`. Returns `false` when the
    /// anchor is unknown.
    pub fn ins(&mut self, after: Ts, id: Ts, data: String) -> bool {
        let span = data.chars().count() as u64;
        self.rga.insert(after, id, span, data)
    }

    pub fn delete(&mut self, spans: &[Tss]) {
        self.rga.delete(spans);
    }

    /// Number of live characters.
    pub fn size(&self) -> usize {
        self.rga.length() as usize
    }

    /// Timestamp of the character at live position `pos`.
    pub fn find(&self, pos: usize) -> Option<Ts> {
        self.rga.id_at(pos as u64)
    }

    /// Timestamp spans covering live positions `[pos, pos + len)`.
    pub fn find_interval(&self, pos: usize, len: usize) -> Vec<Tss> {
        self.rga.spans(pos as u64, len as u64)
    }

    /// The visible string.
    pub fn view_str(&self) -> String {
        self.rga.iter_live().filter_map(|r| r.data.as_deref()).collect()
    }

    pub fn view(&self) -> Value {
        Value::String(self.view_str())
    }
}

// ── Register nodes ─────────────────────────────────────────────────────────

/// LWW number register.
#[derive(Debug, Clone)]
pub struct NumNode {
    pub id: Ts,
    /// Stamp of the operation that last set the value.
    pub ts: Ts,
    pub value: Number,
}

impl NumNode {
    pub fn new(id: Ts, value: Number) -> Self {
        Self { id, ts: id, value }
    }

    /// Set the value if `ts` is newer. Returns `false` for a losing write.
    pub fn set(&mut self, ts: Ts, value: Number) -> bool {
        if ts <= self.ts {
            return false;
        }
        self.ts = ts;
        self.value = value;
        true
    }
}

/// LWW boolean register.
#[derive(Debug, Clone)]
pub struct BoolNode {
    pub id: Ts,
    pub ts: Ts,
    pub value: bool,
}

impl BoolNode {
    pub fn new(id: Ts, value: bool) -> Self {
        Self { id, ts: id, value }
    }

    pub fn set(&mut self, ts: Ts, value: bool) -> bool {
        if ts <= self.ts {
            return false;
        }
        self.ts = ts;
        self.value = value;
        true
    }
}

/// LWW register holding an arbitrary JSON value as an opaque constant.
#[derive(Debug, Clone)]
pub struct ConNode {
    pub id: Ts,
    pub ts: Ts,
    pub value: Value,
}

impl ConNode {
    pub fn new(id: Ts, value: Value) -> Self {
        Self { id, ts: id, value }
    }

    pub fn set(&mut self, ts: Ts, value: Value) -> bool {
        if ts <= self.ts {
            return false;
        }
        self.ts = ts;
        self.value = value;
        true
    }
}

/// Null node, no payload.
#[derive(Debug, Clone)]
pub struct NullNode {
    pub id: Ts,
}

impl NullNode {
    pub fn new(id: Ts) -> Self {
        Self { id }
    }
}

// ── Node enum ──────────────────────────────────────────────────────────────

/// All node variants.
#[derive(Debug, Clone)]
pub enum Node {
    Obj(ObjNode),
    Arr(ArrNode),
    Str(StrNode),
    Num(NumNode),
    Bool(BoolNode),
    Con(ConNode),
    Null(NullNode),
}

impl Node {
    pub fn id(&self) -> Ts {
        match self {
            Self::Obj(n) => n.id,
            Self::Arr(n) => n.id,
            Self::Str(n) => n.id,
            Self::Num(n) => n.id,
            Self::Bool(n) => n.id,
            Self::Con(n) => n.id,
            Self::Null(n) => n.id,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Obj(_) => NodeKind::Obj,
            Self::Arr(_) => NodeKind::Arr,
            Self::Str(_) => NodeKind::Str,
            Self::Num(_) => NodeKind::Num,
            Self::Bool(_) => NodeKind::Bool,
            Self::Con(_) => NodeKind::Con,
            Self::Null(_) => NodeKind::Null,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    pub fn view(&self, table: &NodeTable) -> Value {
        match self {
            Self::Obj(n) => n.view(table),
            Self::Arr(n) => n.view(table),
            Self::Str(n) => n.view(),
            Self::Num(n) => Value::Number(n.value.clone()),
            Self::Bool(n) => Value::Bool(n.value),
            Self::Con(n) => n.value.clone(),
            Self::Null(_) => Value::Null,
        }
    }
}

// ── NodeTable ──────────────────────────────────────────────────────────────

/// The node arena: id → node.
pub type NodeTable = HashMap<Ts, Node>;

// ── Root register ──────────────────────────────────────────────────────────

/// The document root: a LWW register, addressed by `ORIGIN`, pointing at the
/// current root node of the tree.
#[derive(Debug, Clone)]
pub struct RootNode {
    pub ts: Ts,
    pub child: Option<Ts>,
}

impl RootNode {
    pub fn new() -> Self {
        Self {
            ts: ORIGIN,
            child: None,
        }
    }

    pub fn set(&mut self, ts: Ts, child: Ts) -> bool {
        if ts <= self.ts {
            return false;
        }
        self.ts = ts;
        self.child = Some(child);
        true
    }

    pub fn view(&self, table: &NodeTable) -> Value {
        match self.child.and_then(|id| table.get(&id)) {
            Some(node) => node.view(table),
            None => Value::Null,
        }
    }
}

impl Default for RootNode {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ts, SessionId};
    use serde_json::json;

    fn sid(n: u8) -> SessionId {
        SessionId::from_bytes([n; 16])
    }

    #[test]
    fn obj_put_newer_wins() {
        let mut obj = ObjNode::new(ts(sid(1), 1));
        assert!(obj.put("k", ts(sid(1), 2), Some(ts(sid(1), 3))));
        assert!(!obj.put("k", ts(sid(1), 2), Some(ts(sid(1), 9)))); // repeat
        assert!(!obj.put("k", ts(sid(1), 1), Some(ts(sid(1), 9)))); // older
        assert!(obj.put("k", ts(sid(2), 5), Some(ts(sid(2), 6))));
        assert_eq!(obj.get("k"), Some(ts(sid(2), 6)));
    }

    #[test]
    fn obj_key_tombstone_and_rebind() {
        let mut obj = ObjNode::new(ts(sid(1), 1));
        obj.put("k", ts(sid(1), 2), Some(ts(sid(1), 3)));
        // delete with a newer stamp hides the key
        assert!(obj.put("k", ts(sid(1), 5), None));
        assert_eq!(obj.get("k"), None);
        // a bind older than the delete loses
        assert!(!obj.put("k", ts(sid(2), 4), Some(ts(sid(2), 4))));
        assert_eq!(obj.get("k"), None);
        // a newer bind brings the key back
        assert!(obj.put("k", ts(sid(2), 8), Some(ts(sid(2), 9))));
        assert_eq!(obj.get("k"), Some(ts(sid(2), 9)));
    }

    #[test]
    fn obj_delete_before_bind_records_stamp() {
        let mut obj = ObjNode::new(ts(sid(1), 1));
        // delete for a key never bound still occupies the slot
        assert!(obj.put("k", ts(sid(1), 7), None));
        assert!(!obj.put("k", ts(sid(2), 3), Some(ts(sid(2), 3))));
        assert_eq!(obj.get("k"), None);
    }

    #[test]
    fn obj_view_sorted_and_tombstone_free() {
        let mut table = NodeTable::new();
        let mut obj = ObjNode::new(ts(sid(1), 1));
        table.insert(
            ts(sid(1), 2),
            Node::Num(NumNode::new(ts(sid(1), 2), Number::from(1))),
        );
        table.insert(
            ts(sid(1), 3),
            Node::Num(NumNode::new(ts(sid(1), 3), Number::from(2))),
        );
        obj.put("b", ts(sid(1), 4), Some(ts(sid(1), 2)));
        obj.put("a", ts(sid(1), 5), Some(ts(sid(1), 3)));
        obj.put("c", ts(sid(1), 6), None);
        assert_eq!(obj.view(&table), json!({"a": 2, "b": 1}));
    }

    #[test]
    fn registers_lww() {
        let mut num = NumNode::new(ts(sid(1), 1), Number::from(1));
        assert!(num.set(ts(sid(1), 5), Number::from(2)));
        assert!(!num.set(ts(sid(1), 3), Number::from(3)));
        assert_eq!(num.value, Number::from(2));

        let mut b = BoolNode::new(ts(sid(1), 1), false);
        assert!(b.set(ts(sid(2), 2), true));
        assert!(!b.set(ts(sid(1), 2), false)); // same counter, smaller session
        assert!(b.value);

        let mut con = ConNode::new(ts(sid(1), 1), json!({"x": 1}));
        assert!(con.set(ts(sid(1), 9), json!([1, 2])));
        assert_eq!(con.value, json!([1, 2]));
    }

    #[test]
    fn arr_positions_and_ids() {
        let mut arr = ArrNode::new(ts(sid(1), 1));
        assert!(arr.ins(ORIGIN, ts(sid(1), 2), vec![ts(sid(1), 10), ts(sid(1), 11)]));
        assert_eq!(arr.size(), 2);
        assert_eq!(arr.find(1), Some(ts(sid(1), 3)));
        assert_eq!(arr.element_id(1), Some(ts(sid(1), 11)));
        assert_eq!(arr.iter_ids().collect::<Vec<_>>(), vec![ts(sid(1), 10), ts(sid(1), 11)]);
        arr.delete(&arr.find_interval(0, 1));
        assert_eq!(arr.size(), 1);
        assert_eq!(arr.element_id(0), Some(ts(sid(1), 11)));
    }

    #[test]
    fn root_register_lww() {
        let mut root = RootNode::new();
        assert!(root.set(ts(sid(1), 1), ts(sid(1), 2)));
        assert!(!root.set(ts(sid(1), 1), ts(sid(1), 9)));
        assert!(root.set(ts(sid(2), 4), ts(sid(2), 5)));
        assert_eq!(root.child, Some(ts(sid(2), 5)));
    }
}
