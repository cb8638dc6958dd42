//! [`Patch`] — an ordered batch of operations, the unit of transport and
//! persistence.

pub mod builder;
pub mod op;

use serde_json::Value;

use crate::clock::{print_ts, ts, Ts, Tss};
use op::Op;

/// A patch: an ordered list of operations with optional opaque metadata.
///
/// Normally created via [`PatchBuilder`](builder::PatchBuilder). The id of a
/// patch is the id of its first operation; the ops of a well-formed patch
/// occupy one contiguous counter range of a single session.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    /// The list of operations in the patch.
    pub ops: Vec<Op>,

    /// Arbitrary metadata (not interpreted by the document engine).
    pub meta: Option<Value>,
}

impl Default for Patch {
    fn default() -> Self {
        Self::new()
    }
}

impl Patch {
    /// Creates an empty patch with no operations.
    pub fn new() -> Self {
        Self {
            ops: Vec::new(),
            meta: None,
        }
    }

    /// Returns the ID of the first operation, if any.
    pub fn get_id(&self) -> Option<Ts> {
        self.ops.first().map(|op| op.id())
    }

    /// Returns the total logical clock span consumed by all operations.
    pub fn span(&self) -> u64 {
        self.ops.iter().map(|op| op.span()).sum()
    }

    /// Returns the counter expected for the next operation to be appended.
    ///
    /// Returns 0 if the patch has no operations.
    pub fn next_counter(&self) -> u64 {
        match self.ops.last() {
            None => 0,
            Some(op) => op.id().counter + op.span(),
        }
    }

    /// Creates a new patch where every timestamp is transformed by `f`.
    pub fn rewrite_time<F>(&self, f: &F) -> Patch
    where
        F: Fn(Ts) -> Ts,
    {
        let mut new_ops = Vec::with_capacity(self.ops.len());
        for op in &self.ops {
            new_ops.push(rewrite_op(op, f));
        }
        Patch {
            ops: new_ops,
            meta: self.meta.clone(),
        }
    }

    /// Rebases the patch so that the first operation begins at `new_counter`.
    ///
    /// Only timestamps belonging to the patch's session and at or after
    /// `transform_after` (defaults to the patch start counter) are shifted.
    /// An empty patch is returned unchanged.
    pub fn rebase(&self, new_counter: u64, transform_after: Option<u64>) -> Patch {
        let id = match self.get_id() {
            Some(id) => id,
            None => return self.clone(),
        };
        let sid = id.sid;
        let patch_start = id.counter;
        let transform_after = transform_after.unwrap_or(patch_start);
        if patch_start == new_counter {
            return self.clone();
        }
        let delta = new_counter as i64 - patch_start as i64;
        self.rewrite_time(&|id: Ts| -> Ts {
            if id.sid != sid {
                return id;
            }
            if id.counter < transform_after {
                return id;
            }
            ts(sid, (id.counter as i64 + delta) as u64)
        })
    }

    /// Deep-clones the patch.
    pub fn clone_patch(&self) -> Patch {
        self.rewrite_time(&|id| id)
    }

    /// Encodes the patch with the binary codec.
    pub fn to_binary(&self) -> Vec<u8> {
        crate::codec::binary::encode(self)
    }

    /// Decodes a patch produced by the binary codec.
    pub fn from_binary(data: &[u8]) -> Result<Patch, crate::codec::CodecError> {
        crate::codec::binary::decode(data)
    }
}

impl std::fmt::Display for Patch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let id_str = match self.get_id() {
            Some(id) => print_ts(id),
            None => "(nil)".to_owned(),
        };
        write!(f, "Patch {}!{}", id_str, self.span())?;
        for op in &self.ops {
            write!(f, "\n  {}", op)?;
        }
        Ok(())
    }
}

/// Applies the timestamp transform function to a single operation.
fn rewrite_op<F>(op: &Op, f: &F) -> Op
where
    F: Fn(Ts) -> Ts,
{
    match op {
        Op::New { id, kind, value } => Op::New {
            id: f(*id),
            kind: *kind,
            value: value.clone(),
        },
        Op::InsVal { id, obj, val } => Op::InsVal {
            id: f(*id),
            obj: f(*obj),
            val: f(*val),
        },
        Op::InsObj {
            id,
            obj,
            key,
            child,
        } => Op::InsObj {
            id: f(*id),
            obj: f(*obj),
            key: key.clone(),
            child: f(*child),
        },
        Op::InsArr {
            id,
            obj,
            after,
            data,
        } => Op::InsArr {
            id: f(*id),
            obj: f(*obj),
            after: f(*after),
            data: data.iter().map(|v| f(*v)).collect(),
        },
        Op::InsStr {
            id,
            obj,
            after,
            data,
        } => Op::InsStr {
            id: f(*id),
            obj: f(*obj),
            after: f(*after),
            data: data.clone(),
        },
        Op::Set { id, obj, value } => Op::Set {
            id: f(*id),
            obj: f(*obj),
            value: value.clone(),
        },
        Op::DelKey { id, obj, key } => Op::DelKey {
            id: f(*id),
            obj: f(*obj),
            key: key.clone(),
        },
        Op::Del { id, obj, what } => Op::Del {
            id: f(*id),
            obj: f(*obj),
            what: what
                .iter()
                .map(|s| {
                    let new_ts = f(s.ts());
                    Tss::new(new_ts.sid, new_ts.counter, s.span)
                })
                .collect(),
        },
        Op::Nop { id, len } => Op::Nop {
            id: f(*id),
            len: *len,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SessionId;
    use crate::node::NodeKind;

    fn sid(n: u8) -> SessionId {
        SessionId::from_bytes([n; 16])
    }

    #[test]
    fn empty_patch() {
        let p = Patch::new();
        assert_eq!(p.get_id(), None);
        assert_eq!(p.span(), 0);
        assert_eq!(p.next_counter(), 0);
    }

    #[test]
    fn patch_with_single_op() {
        let mut p = Patch::new();
        p.ops.push(Op::New {
            id: ts(sid(1), 100),
            kind: NodeKind::Obj,
            value: None,
        });
        assert_eq!(p.get_id(), Some(ts(sid(1), 100)));
        assert_eq!(p.span(), 1);
        assert_eq!(p.next_counter(), 101);
    }

    #[test]
    fn patch_rebase() {
        let mut p = Patch::new();
        p.ops.push(Op::New {
            id: ts(sid(1), 10),
            kind: NodeKind::Str,
            value: None,
        });
        p.ops.push(Op::InsStr {
            id: ts(sid(1), 11),
            obj: ts(sid(1), 10),
            after: ts(sid(1), 10),
            data: "hi".into(),
        });
        let rebased = p.rebase(20, None);
        assert_eq!(rebased.get_id(), Some(ts(sid(1), 20)));
        assert_eq!(rebased.ops[1].id(), ts(sid(1), 21));
    }

    #[test]
    fn rebase_leaves_foreign_sessions_alone() {
        let mut p = Patch::new();
        p.ops.push(Op::InsVal {
            id: ts(sid(1), 5),
            obj: ts(sid(2), 100),
            val: ts(sid(1), 5),
        });
        let rebased = p.rebase(10, None);
        if let Op::InsVal { obj, .. } = &rebased.ops[0] {
            assert_eq!(*obj, ts(sid(2), 100));
        }
    }
}
