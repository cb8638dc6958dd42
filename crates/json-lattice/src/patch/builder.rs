//! [`PatchBuilder`] — fluent builder for constructing [`Patch`]es.

use serde_json::Value;

use crate::clock::{ts, ClockTable, SessionClock, Ts, Tss, ORIGIN};
use crate::node::NodeKind;
use crate::patch::op::Op;
use crate::patch::Patch;

/// Utility for constructing a [`Patch`] operation by operation.
///
/// The builder owns a session clock and stamps every emitted operation from
/// it, so the finished patch occupies one contiguous counter range. If the
/// clock is advanced externally between operations, [`pad`](Self::pad) fills
/// the gap with a `Nop`.
pub struct PatchBuilder {
    pub clock: SessionClock,
    pub patch: Patch,
}

impl PatchBuilder {
    /// Creates a new builder minting from `counter` for `sid`.
    pub fn new(sid: crate::clock::SessionId, counter: u64) -> Self {
        Self {
            clock: SessionClock::new(sid, counter),
            patch: Patch::new(),
        }
    }

    /// Creates a builder that continues a document clock table.
    pub fn from_clock_table(table: &ClockTable) -> Self {
        Self::new(table.sid, table.counter)
    }

    /// Returns the counter the next operation will be stamped with.
    pub fn next_counter(&self) -> u64 {
        let patch_next = self.patch.next_counter();
        if patch_next == 0 {
            self.clock.counter
        } else {
            patch_next
        }
    }

    /// Returns the accumulated patch and resets the builder.
    pub fn flush(&mut self) -> Patch {
        std::mem::replace(&mut self.patch, Patch::new())
    }

    // ── Padding ────────────────────────────────────────────────────────────

    /// Adds a `Nop` if the clock has drifted ahead of the patch's last op.
    pub fn pad(&mut self) {
        let next_counter = self.patch.next_counter();
        if next_counter == 0 {
            return;
        }
        let drift = self.clock.counter.saturating_sub(next_counter);
        if drift > 0 {
            let id = ts(self.clock.sid, next_counter);
            self.patch.ops.push(Op::Nop { id, len: drift });
        }
    }

    // ── Creation operations ────────────────────────────────────────────────

    /// Create a new `obj` node.
    pub fn obj(&mut self) -> Ts {
        self.new_node(NodeKind::Obj, None)
    }

    /// Create a new `arr` node.
    pub fn arr(&mut self) -> Ts {
        self.new_node(NodeKind::Arr, None)
    }

    /// Create a new `str` node.
    pub fn str_node(&mut self) -> Ts {
        self.new_node(NodeKind::Str, None)
    }

    /// Create a new `num` register.
    pub fn num(&mut self, value: Value) -> Ts {
        self.new_node(NodeKind::Num, Some(value))
    }

    /// Create a new `bool` register.
    pub fn bool_node(&mut self, value: bool) -> Ts {
        self.new_node(NodeKind::Bool, Some(Value::Bool(value)))
    }

    /// Create a new `con` register holding an opaque value.
    pub fn con(&mut self, value: Value) -> Ts {
        self.new_node(NodeKind::Con, Some(value))
    }

    /// Create a new `null` node.
    pub fn null(&mut self) -> Ts {
        self.new_node(NodeKind::Null, None)
    }

    fn new_node(&mut self, kind: NodeKind, value: Option<Value>) -> Ts {
        self.pad();
        let id = self.clock.tick(1);
        self.patch.ops.push(Op::New { id, kind, value });
        id
    }

    // ── Mutation operations ────────────────────────────────────────────────

    /// Rebind the document root register.
    pub fn root(&mut self, val: Ts) -> Ts {
        self.set_val(ORIGIN, val)
    }

    /// Rebind a value register (the root is the only one in this model).
    pub fn set_val(&mut self, obj: Ts, val: Ts) -> Ts {
        self.pad();
        let id = self.clock.tick(1);
        self.patch.ops.push(Op::InsVal { id, obj, val });
        id
    }

    /// Bind one key of an `obj` node to a child node.
    pub fn ins_obj(&mut self, obj: Ts, key: String, child: Ts) -> Ts {
        self.pad();
        let id = self.clock.tick(1);
        self.patch.ops.push(Op::InsObj {
            id,
            obj,
            key,
            child,
        });
        id
    }

    /// Insert a string into a `str` node.
    pub fn ins_str(&mut self, obj: Ts, after: Ts, data: String) -> Ts {
        assert!(!data.is_empty(), "EMPTY_STRING");
        self.pad();
        let id = self.clock.tick(1);
        let op = Op::InsStr {
            id,
            obj,
            after,
            data,
        };
        let span = op.span();
        if span > 1 {
            self.clock.tick(span - 1);
        }
        self.patch.ops.push(op);
        id
    }

    /// Insert elements into an `arr` node.
    pub fn ins_arr(&mut self, arr: Ts, after: Ts, data: Vec<Ts>) -> Ts {
        assert!(!data.is_empty(), "EMPTY_ELEMENTS");
        self.pad();
        let id = self.clock.tick(1);
        let op = Op::InsArr {
            id,
            obj: arr,
            after,
            data,
        };
        let span = op.span();
        if span > 1 {
            self.clock.tick(span - 1);
        }
        self.patch.ops.push(op);
        id
    }

    /// Replace the value of a scalar register node.
    pub fn set(&mut self, obj: Ts, value: Value) -> Ts {
        self.pad();
        let id = self.clock.tick(1);
        self.patch.ops.push(Op::Set { id, obj, value });
        id
    }

    /// Tombstone one key of an `obj` node.
    pub fn del_key(&mut self, obj: Ts, key: String) -> Ts {
        self.pad();
        let id = self.clock.tick(1);
        self.patch.ops.push(Op::DelKey { id, obj, key });
        id
    }

    /// Tombstone element/character spans of an `arr` or `str` node.
    pub fn del(&mut self, obj: Ts, what: Vec<Tss>) -> Ts {
        self.pad();
        let id = self.clock.tick(1);
        self.patch.ops.push(Op::Del { id, obj, what });
        id
    }

    /// Insert a no-op of the given span.
    pub fn nop(&mut self, span: u64) -> Ts {
        self.pad();
        let id = self.clock.tick(span);
        self.patch.ops.push(Op::Nop { id, len: span });
        id
    }

    // ── Value emission ─────────────────────────────────────────────────────

    /// Emit the operations that build a whole JSON value as a node subtree,
    /// returning the id of the subtree root. The caller still has to bind
    /// that id into a parent (or the document root).
    pub fn json(&mut self, value: &Value) -> Ts {
        match value {
            Value::Null => self.null(),
            Value::Bool(b) => self.bool_node(*b),
            Value::Number(_) => self.num(value.clone()),
            Value::String(s) => {
                let id = self.str_node();
                if !s.is_empty() {
                    self.ins_str(id, ORIGIN, s.clone());
                }
                id
            }
            Value::Array(items) => {
                let id = self.arr();
                let children: Vec<Ts> = items.iter().map(|item| self.json(item)).collect();
                if !children.is_empty() {
                    self.ins_arr(id, ORIGIN, children);
                }
                id
            }
            Value::Object(map) => {
                let id = self.obj();
                for (key, val) in map {
                    let child = self.json(val);
                    self.ins_obj(id, key.clone(), child);
                }
                id
            }
        }
    }
}
