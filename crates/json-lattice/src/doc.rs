//! The document: node table, root register, clock table, and the merge
//! engine that folds patches in.
//!
//! # Overview
//!
//! A [`Document`] is the in-memory replica state. Applying a patch walks its
//! operations in order, reporting per operation whether it was applied,
//! skipped as stale (it lost a last-writer-wins comparison or repeated a
//! delivery), or skipped because it referenced something this replica has
//! never seen. A skipped operation never aborts the rest of the patch, and
//! the clock table observes every operation either way, so locally minted
//! timestamps always dominate everything seen so far.

use serde_json::{Number, Value};
use thiserror::Error;
use tracing::{debug, trace};

use crate::clock::{ClockTable, SessionId, Ts, ORIGIN};
use crate::node::{
    ArrNode, BoolNode, ConNode, Node, NodeKind, NodeTable, NullNode, NumNode, ObjNode, RootNode,
    StrNode,
};
use crate::patch::builder::PatchBuilder;
use crate::patch::op::Op;
use crate::patch::Patch;

// ── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq)]
pub enum DocError {
    #[error("node not found: {0}")]
    NotFound(Ts),
}

// ── Application outcomes ───────────────────────────────────────────────────

/// What happened to one operation during patch application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpOutcome {
    /// The operation mutated the document.
    Applied,
    /// Re-delivery or a lost LWW comparison; informative, not an error.
    Stale,
    /// The operation referenced a node, anchor, or type this replica cannot
    /// resolve; the single operation was skipped.
    Unresolved,
}

/// Per-operation report for one applied patch, index-aligned with the
/// patch's operation list.
#[derive(Debug, Clone)]
pub struct AppliedResult {
    pub outcomes: Vec<OpOutcome>,
}

impl AppliedResult {
    /// `true` when every operation mutated the document.
    pub fn all_applied(&self) -> bool {
        self.outcomes.iter().all(|o| *o == OpOutcome::Applied)
    }

    /// Indices of operations skipped with an unresolved reference.
    pub fn unresolved(&self) -> Vec<usize> {
        self.indices_of(OpOutcome::Unresolved)
    }

    /// Indices of operations skipped as stale.
    pub fn stale(&self) -> Vec<usize> {
        self.indices_of(OpOutcome::Stale)
    }

    fn indices_of(&self, want: OpOutcome) -> Vec<usize> {
        self.outcomes
            .iter()
            .enumerate()
            .filter(|(_, o)| **o == want)
            .map(|(i, _)| i)
            .collect()
    }
}

// ── Document ───────────────────────────────────────────────────────────────

/// One replica of a conflict-free JSON document.
#[derive(Debug, Clone)]
pub struct Document {
    /// Document root — a LWW register pointing at the top-level node.
    pub root: RootNode,
    /// All nodes keyed by their timestamp id.
    pub table: NodeTable,
    /// Local session clock plus observed peer counters.
    pub clock: ClockTable,
}

impl Document {
    /// Create a new empty document for the given session.
    ///
    /// The clock starts at counter 1; counter 0 with the nil session is
    /// permanently reserved as the root register address.
    pub fn new(sid: SessionId) -> Self {
        Self {
            root: RootNode::new(),
            table: NodeTable::default(),
            clock: ClockTable::new(sid, 1),
        }
    }

    /// Create a document with a freshly minted session id.
    pub fn create() -> Self {
        Self::new(SessionId::generate())
    }

    /// Return the JSON view of the current document state.
    pub fn view(&self) -> Value {
        self.root.view(&self.table)
    }

    /// Look up a node by id.
    pub fn get_node(&self, id: Ts) -> Option<&Node> {
        self.table.get(&id)
    }

    /// Look up a node by id, reporting a structured error when absent.
    pub fn node(&self, id: Ts) -> Result<&Node, DocError> {
        self.table.get(&id).ok_or(DocError::NotFound(id))
    }

    /// Advance the local clock and return the next timestamp for this
    /// session. Used when building patches locally.
    pub fn next_ts(&mut self) -> Ts {
        self.clock.tick(1)
    }

    /// A patch builder that continues this document's clock.
    pub fn new_patch_builder(&self) -> PatchBuilder {
        PatchBuilder::from_clock_table(&self.clock)
    }

    /// Deep copy under a fresh session id. The copy has observed everything
    /// this replica has, so its new timestamps dominate the shared history.
    pub fn fork(&self) -> Document {
        self.fork_as(SessionId::generate())
    }

    /// `fork` with a caller-chosen session id.
    pub fn fork_as(&self, sid: SessionId) -> Document {
        Document {
            root: self.root.clone(),
            table: self.table.clone(),
            clock: self.clock.fork(sid),
        }
    }

    /// Id of the node currently bound at the root, if any.
    pub fn root_child(&self) -> Option<Ts> {
        self.root.child
    }

    /// Number of live node records, tombstoned sequence content included.
    pub fn node_count(&self) -> usize {
        self.table.len()
    }

    /// Apply all operations in `patch`, in order, reporting one outcome per
    /// operation. Re-applying an already absorbed patch is a no-op.
    pub fn apply_patch(&mut self, patch: &Patch) -> AppliedResult {
        let mut outcomes = Vec::with_capacity(patch.ops.len());
        for op in &patch.ops {
            let outcome = self.apply_operation(op);
            match outcome {
                OpOutcome::Applied => trace!(op = %op, "applied"),
                OpOutcome::Stale => trace!(op = %op, "skipped stale"),
                OpOutcome::Unresolved => debug!(op = %op, "skipped unresolved reference"),
            }
            outcomes.push(outcome);
        }
        AppliedResult { outcomes }
    }

    /// Apply a single operation.
    pub fn apply_operation(&mut self, op: &Op) -> OpOutcome {
        // The clock observes every operation, applied or not.
        self.clock.observe(op.id(), op.span());

        match op {
            Op::New { id, kind, value } => {
                if self.table.contains_key(id) {
                    return OpOutcome::Stale;
                }
                let node = match kind {
                    NodeKind::Obj => Node::Obj(ObjNode::new(*id)),
                    NodeKind::Arr => Node::Arr(ArrNode::new(*id)),
                    NodeKind::Str => Node::Str(StrNode::new(*id)),
                    NodeKind::Null => Node::Null(NullNode::new(*id)),
                    NodeKind::Num => match value {
                        Some(Value::Number(n)) => Node::Num(NumNode::new(*id, n.clone())),
                        None => Node::Num(NumNode::new(*id, Number::from(0))),
                        Some(_) => return OpOutcome::Unresolved,
                    },
                    NodeKind::Bool => match value {
                        Some(Value::Bool(b)) => Node::Bool(BoolNode::new(*id, *b)),
                        None => Node::Bool(BoolNode::new(*id, false)),
                        Some(_) => return OpOutcome::Unresolved,
                    },
                    NodeKind::Con => Node::Con(ConNode::new(
                        *id,
                        value.clone().unwrap_or(Value::Null),
                    )),
                };
                self.table.insert(*id, node);
                OpOutcome::Applied
            }

            Op::InsVal { id, obj, val } => {
                // The root register is the only value register and is
                // addressed by ORIGIN.
                if *obj != ORIGIN || !self.table.contains_key(val) {
                    return OpOutcome::Unresolved;
                }
                if self.root.set(*id, *val) {
                    OpOutcome::Applied
                } else {
                    OpOutcome::Stale
                }
            }

            Op::InsObj {
                id,
                obj,
                key,
                child,
            } => {
                if !self.table.contains_key(child) {
                    return OpOutcome::Unresolved;
                }
                match self.table.get_mut(obj) {
                    Some(Node::Obj(node)) => {
                        if node.put(key, *id, Some(*child)) {
                            OpOutcome::Applied
                        } else {
                            OpOutcome::Stale
                        }
                    }
                    _ => OpOutcome::Unresolved,
                }
            }

            Op::InsArr {
                id,
                obj,
                after,
                data,
            } => {
                match self.table.get(obj) {
                    Some(Node::Arr(node)) => {
                        if node.rga.contains_item(*id) {
                            return OpOutcome::Stale;
                        }
                    }
                    _ => return OpOutcome::Unresolved,
                }
                // Every referenced element must resolve for the op to apply.
                if data.iter().any(|child| !self.table.contains_key(child)) {
                    return OpOutcome::Unresolved;
                }
                match self.table.get_mut(obj) {
                    Some(Node::Arr(node)) => {
                        if node.ins(*after, *id, data.clone()) {
                            OpOutcome::Applied
                        } else {
                            OpOutcome::Unresolved
                        }
                    }
                    _ => OpOutcome::Unresolved,
                }
            }

            Op::InsStr {
                id,
                obj,
                after,
                data,
            } => match self.table.get_mut(obj) {
                Some(Node::Str(node)) => {
                    if node.rga.contains_item(*id) {
                        OpOutcome::Stale
                    } else if node.ins(*after, *id, data.clone()) {
                        OpOutcome::Applied
                    } else {
                        OpOutcome::Unresolved
                    }
                }
                _ => OpOutcome::Unresolved,
            },

            Op::Set { id, obj, value } => match self.table.get_mut(obj) {
                Some(Node::Num(node)) => match value {
                    Value::Number(n) => {
                        if node.set(*id, n.clone()) {
                            OpOutcome::Applied
                        } else {
                            OpOutcome::Stale
                        }
                    }
                    _ => OpOutcome::Unresolved,
                },
                Some(Node::Bool(node)) => match value {
                    Value::Bool(b) => {
                        if node.set(*id, *b) {
                            OpOutcome::Applied
                        } else {
                            OpOutcome::Stale
                        }
                    }
                    _ => OpOutcome::Unresolved,
                },
                Some(Node::Con(node)) => {
                    if node.set(*id, value.clone()) {
                        OpOutcome::Applied
                    } else {
                        OpOutcome::Stale
                    }
                }
                _ => OpOutcome::Unresolved,
            },

            Op::DelKey { id, obj, key } => match self.table.get_mut(obj) {
                Some(Node::Obj(node)) => {
                    if node.put(key, *id, None) {
                        OpOutcome::Applied
                    } else {
                        OpOutcome::Stale
                    }
                }
                _ => OpOutcome::Unresolved,
            },

            Op::Del { obj, what, .. } => match self.table.get_mut(obj) {
                Some(Node::Str(node)) => {
                    node.delete(what);
                    OpOutcome::Applied
                }
                Some(Node::Arr(node)) => {
                    node.delete(what);
                    OpOutcome::Applied
                }
                _ => OpOutcome::Unresolved,
            },

            Op::Nop { .. } => OpOutcome::Applied,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ts;
    use serde_json::json;

    fn sid(n: u8) -> SessionId {
        SessionId::from_bytes([n; 16])
    }

    fn doc(n: u8) -> Document {
        Document::new(sid(n))
    }

    /// Build `{ "name": "ed", "tags": [1] }` as a patch for `d`'s session.
    fn seed_patch(d: &Document) -> Patch {
        let mut b = d.new_patch_builder();
        let root = b.json(&json!({"name": "ed", "tags": [1]}));
        b.root(root);
        b.flush()
    }

    #[test]
    fn builds_and_views_a_tree() {
        let mut d = doc(1);
        let patch = seed_patch(&d);
        let result = d.apply_patch(&patch);
        assert!(result.all_applied());
        assert_eq!(d.view(), json!({"name": "ed", "tags": [1]}));
    }

    #[test]
    fn reapplying_a_patch_is_a_no_op() {
        let mut d = doc(1);
        let patch = seed_patch(&d);
        d.apply_patch(&patch);
        let before = d.view();
        let second = d.apply_patch(&patch);
        assert_eq!(d.view(), before);
        assert!(second
            .outcomes
            .iter()
            .all(|o| *o != OpOutcome::Applied));
    }

    #[test]
    fn unresolved_op_skips_but_rest_applies() {
        let mut d = doc(1);
        let patch = seed_patch(&d);
        d.apply_patch(&patch);

        let mut b = d.new_patch_builder();
        let num = b.num(json!(7));
        // bind to a node id nobody has ever created
        b.ins_obj(ts(sid(9), 999), "ghost".into(), num);
        let root = d.root.child.unwrap();
        b.ins_obj(root, "n".into(), num);
        let result = d.apply_patch(&b.flush());

        assert_eq!(result.unresolved(), vec![1]);
        assert_eq!(d.view()["n"], json!(7));
    }

    #[test]
    fn concurrent_root_rebind_is_lww() {
        // Replicas share a seeded history, then each rebinds the root.
        let mut a = doc(1);
        let seed = seed_patch(&a);
        a.apply_patch(&seed);
        let mut b = doc(2);
        b.apply_patch(&seed);

        let mut ba = a.new_patch_builder();
        let va = ba.con(json!("from a"));
        ba.root(va);
        let pa = ba.flush();

        let mut bb = b.new_patch_builder();
        let vb = bb.con(json!("from b"));
        bb.root(vb);
        let pb = bb.flush();

        a.apply_patch(&pa);
        a.apply_patch(&pb);
        b.apply_patch(&pb);
        b.apply_patch(&pa);
        assert_eq!(a.view(), b.view());
    }

    #[test]
    fn concurrent_key_bind_is_lww_by_op_stamp() {
        let mut a = doc(1);
        let seed = seed_patch(&a);
        a.apply_patch(&seed);
        let mut b = doc(2);
        b.apply_patch(&seed);

        let root = a.root.child.unwrap();
        let mut ba = a.new_patch_builder();
        let ca = ba.con(json!("a-wrote"));
        ba.ins_obj(root, "name".into(), ca);
        let pa = ba.flush();

        let mut bb = b.new_patch_builder();
        let cb = bb.con(json!("b-wrote"));
        bb.ins_obj(root, "name".into(), cb);
        let pb = bb.flush();

        a.apply_patch(&pa);
        a.apply_patch(&pb);
        b.apply_patch(&pb);
        b.apply_patch(&pa);
        assert_eq!(a.view(), b.view());
        assert_eq!(a.view()["name"], b.view()["name"]);
    }

    #[test]
    fn key_delete_then_older_bind_loses() {
        let mut d = doc(1);
        let seed = seed_patch(&d);
        d.apply_patch(&seed);
        let root = d.root.child.unwrap();

        // A foreign bind stamped lower than the local delete stamp.
        let mut del = d.new_patch_builder();
        del.del_key(root, "name".into());
        let del_patch = del.flush();
        d.apply_patch(&del_patch);

        let stale_bind = Op::InsObj {
            id: ts(sid(2), 2),
            obj: root,
            key: "name".into(),
            child: root, // any known node
        };
        let outcome = d.apply_operation(&stale_bind);
        assert_eq!(outcome, OpOutcome::Stale);
        assert_eq!(d.view().get("name"), None);
    }

    #[test]
    fn clock_dominates_observed_patches() {
        let mut a = doc(1);
        let seed = seed_patch(&a);
        a.apply_patch(&seed);
        let mut b = doc(2);
        b.apply_patch(&seed);
        let next = b.next_ts();
        assert!(next.counter > seed.next_counter() - 1);
    }

    #[test]
    fn set_with_wrong_value_type_is_unresolved() {
        let mut d = doc(1);
        let mut b = d.new_patch_builder();
        let num = b.num(json!(5));
        b.root(num);
        d.apply_patch(&b.flush());

        let op = Op::Set {
            id: ts(sid(2), 50),
            obj: num,
            value: json!("not a number"),
        };
        assert_eq!(d.apply_operation(&op), OpOutcome::Unresolved);
        assert_eq!(d.view(), json!(5));
    }

    #[test]
    fn fork_mints_independent_timestamps() {
        let mut d = doc(1);
        d.apply_patch(&seed_patch(&d));
        let mut f = d.fork();
        assert_ne!(f.clock.sid, d.clock.sid);
        assert_eq!(f.view(), d.view());
        let t = f.next_ts();
        assert!(t.counter >= d.clock.counter);
    }

    #[test]
    fn fork_as_pins_the_session_and_copies_the_table() {
        let mut d = doc(1);
        d.apply_patch(&seed_patch(&d));
        let f = d.fork_as(sid(7));
        assert_eq!(f.clock.sid, sid(7));
        assert_eq!(f.root_child(), d.root_child());
        // obj root, str "ed", arr, num 1
        assert_eq!(f.node_count(), d.node_count());
        assert_eq!(d.node_count(), 4);
    }
}
