//! The operation set carried by patches.

use serde_json::Value;

use crate::clock::{print_ts, Ts, Tss};
use crate::node::NodeKind;

// ── Operation ──────────────────────────────────────────────────────────────

/// A single document operation.
///
/// Each variant carries an `id: Ts` identifying the operation in the global
/// logical clock space.
///
/// Span (the number of clock ticks consumed):
/// - `InsStr` consumes one tick per character, `InsArr` one per element.
/// - `Nop` consumes `len` ticks.
/// - Everything else consumes 1 tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Create a new node of the given variant, optionally with an initial
    /// register value.
    New {
        id: Ts,
        kind: NodeKind,
        value: Option<Value>,
    },
    /// Rebind the root register (`obj` is always `ORIGIN`).
    InsVal { id: Ts, obj: Ts, val: Ts },
    /// Bind one key of an `obj` node to a child node.
    InsObj {
        id: Ts,
        obj: Ts,
        key: String,
        child: Ts,
    },
    /// Insert elements into an `arr` node after the element `after`.
    InsArr {
        id: Ts,
        obj: Ts,
        after: Ts,
        data: Vec<Ts>,
    },
    /// Insert characters into a `str` node after the character `after`.
    InsStr {
        id: Ts,
        obj: Ts,
        after: Ts,
        data: String,
    },
    /// Replace the value of a scalar register node.
    Set { id: Ts, obj: Ts, value: Value },
    /// Tombstone one key of an `obj` node.
    DelKey { id: Ts, obj: Ts, key: String },
    /// Tombstone element/character ranges of an `arr` or `str` node.
    Del { id: Ts, obj: Ts, what: Vec<Tss> },
    /// No-op; skips clock cycles without touching the document.
    Nop { id: Ts, len: u64 },
}

impl Op {
    /// Returns the ID (first timestamp) of this operation.
    pub fn id(&self) -> Ts {
        match self {
            Op::New { id, .. }
            | Op::InsVal { id, .. }
            | Op::InsObj { id, .. }
            | Op::InsArr { id, .. }
            | Op::InsStr { id, .. }
            | Op::Set { id, .. }
            | Op::DelKey { id, .. }
            | Op::Del { id, .. }
            | Op::Nop { id, .. } => *id,
        }
    }

    /// Number of logical clock cycles consumed by this operation.
    pub fn span(&self) -> u64 {
        match self {
            Op::InsStr { data, .. } => data.chars().count() as u64,
            Op::InsArr { data, .. } => data.len() as u64,
            Op::Nop { len, .. } => *len,
            _ => 1,
        }
    }

    /// Short mnemonic name of this operation (used by the wire codecs).
    pub fn name(&self) -> &'static str {
        match self {
            Op::New { .. } => "new",
            Op::InsVal { .. } => "ins_val",
            Op::InsObj { .. } => "ins_obj",
            Op::InsArr { .. } => "ins_arr",
            Op::InsStr { .. } => "ins_str",
            Op::Set { .. } => "set",
            Op::DelKey { .. } => "del_key",
            Op::Del { .. } => "del",
            Op::Nop { .. } => "nop",
        }
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let id = self.id();
        let span = self.span();
        let base = if span > 1 {
            format!("{} {}!{}", self.name(), print_ts(id), span)
        } else {
            format!("{} {}", self.name(), print_ts(id))
        };
        match self {
            Op::New { kind, .. } => write!(f, "{} {}", base, kind.name()),
            Op::InsVal { obj, val, .. } => write!(
                f,
                "{}, obj = {}, val = {}",
                base,
                print_ts(*obj),
                print_ts(*val)
            ),
            Op::InsObj { obj, key, child, .. } => write!(
                f,
                "{}, obj = {} {{ {:?} ← {} }}",
                base,
                print_ts(*obj),
                key,
                print_ts(*child)
            ),
            Op::InsStr {
                obj, after, data, ..
            } => write!(
                f,
                "{}, obj = {} {{ {} ← {:?} }}",
                base,
                print_ts(*obj),
                print_ts(*after),
                data
            ),
            Op::InsArr { obj, after, .. } => write!(
                f,
                "{}, obj = {} {{ after {} }}",
                base,
                print_ts(*obj),
                print_ts(*after)
            ),
            Op::DelKey { obj, key, .. } => {
                write!(f, "{}, obj = {} {{ {:?} }}", base, print_ts(*obj), key)
            }
            Op::Del { obj, what, .. } => {
                let spans: Vec<_> = what
                    .iter()
                    .map(|s| format!("{}!{}", print_ts(s.ts()), s.span))
                    .collect();
                write!(
                    f,
                    "{}, obj = {} {{ {} }}",
                    base,
                    print_ts(*obj),
                    spans.join(", ")
                )
            }
            _ => write!(f, "{}", base),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ts, SessionId};

    fn sid(n: u8) -> SessionId {
        SessionId::from_bytes([n; 16])
    }

    #[test]
    fn span_of_nop() {
        let op = Op::Nop {
            id: ts(sid(1), 1),
            len: 5,
        };
        assert_eq!(op.span(), 5);
    }

    #[test]
    fn span_of_ins_str_counts_chars() {
        let op = Op::InsStr {
            id: ts(sid(1), 1),
            obj: ts(sid(1), 1),
            after: ts(sid(1), 1),
            data: "héllo".into(),
        };
        assert_eq!(op.span(), 5);
    }

    #[test]
    fn span_of_ins_arr() {
        let op = Op::InsArr {
            id: ts(sid(1), 1),
            obj: ts(sid(1), 1),
            after: ts(sid(1), 1),
            data: vec![ts(sid(1), 2), ts(sid(1), 3)],
        };
        assert_eq!(op.span(), 2);
    }

    #[test]
    fn span_of_creation_op() {
        let op = Op::New {
            id: ts(sid(1), 1),
            kind: crate::node::NodeKind::Obj,
            value: None,
        };
        assert_eq!(op.span(), 1);
    }

    #[test]
    fn op_name() {
        let op = Op::DelKey {
            id: ts(sid(1), 1),
            obj: ts(sid(1), 2),
            key: "k".into(),
        };
        assert_eq!(op.name(), "del_key");
    }
}
