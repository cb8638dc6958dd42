//! Path-addressed editing against a live document.
//!
//! # Overview
//!
//! [`DocumentEditor`] wraps a document plus a [`PatchBuilder`] whose clock
//! continues the document's. Every edit resolves its path against the live
//! tree, emits the operations through the builder, and applies them to the
//! document immediately, so later edits in the same batch see earlier ones.
//! The operations keep accumulating until [`DocumentEditor::flush`] hands the
//! whole batch over as one [`Patch`] for transport; replaying that patch on
//! another replica reproduces the edits.

use serde_json::{Number, Value};
use thiserror::Error;

use crate::clock::{Ts, Tss, ORIGIN};
use crate::doc::{DocError, Document};
use crate::node::Node;
use crate::patch::builder::PatchBuilder;
use crate::patch::Patch;
use crate::path::{self, Segment};
use crate::view;

// ── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EditError {
    #[error(transparent)]
    Path(#[from] path::PathError),
    #[error(transparent)]
    Doc(#[from] DocError),
    #[error("expected {want} at `{path}`, found {got}")]
    WrongType {
        path: String,
        want: &'static str,
        got: &'static str,
    },
    #[error("index {index} out of bounds at `{path}` (length {len})")]
    OutOfBounds {
        path: String,
        index: usize,
        len: usize,
    },
    #[error("empty write at `{0}`")]
    EmptyWrite(String),
    #[error("cannot increment `{0}`: result is not a representable number")]
    Numeric(String),
}

// ── Write targets ──────────────────────────────────────────────────────────

/// Where a value lands once its node subtree exists.
enum Target {
    /// Rebind the document root.
    Root,
    /// Bind a key on an object node.
    Key { obj: Ts, key: String },
    /// Replace one array element: insert after its slot, then delete it.
    Elem {
        arr: Ts,
        slot: Ts,
        spans: Vec<Tss>,
    },
}

// ── DocumentEditor ─────────────────────────────────────────────────────────

pub struct DocumentEditor<'a> {
    pub doc: &'a mut Document,
    builder: PatchBuilder,
    applied: usize,
}

impl<'a> DocumentEditor<'a> {
    pub fn new(doc: &'a mut Document) -> Self {
        let builder = doc.new_patch_builder();
        Self {
            doc,
            builder,
            applied: 0,
        }
    }

    /// Hand over everything edited so far as one patch. The document already
    /// reflects these operations; the patch is for transport.
    pub fn flush(&mut self) -> Patch {
        self.applied = 0;
        self.builder.flush()
    }

    /// Materialize the value at `path`.
    pub fn get(&self, path: &str) -> Result<Value, EditError> {
        let id = path::resolve(self.doc, path)?;
        Ok(view::view_of(self.doc, id)?)
    }

    // ── Value writes ──────────────────────────────────────────────────────

    /// Write `value` at `path`, creating its node subtree. `root` rebinds
    /// the document root; `a.b` binds key `b`; `a.b[2]` replaces an element.
    pub fn set(&mut self, path: &str, value: &Value) -> Result<(), EditError> {
        let target = self.target(path)?;
        let child = self.builder.json(value);
        self.bind(target, child);
        self.commit();
        Ok(())
    }

    /// Create an empty object node at `path`.
    pub fn create_object(&mut self, path: &str) -> Result<(), EditError> {
        let target = self.target(path)?;
        let child = self.builder.obj();
        self.bind(target, child);
        self.commit();
        Ok(())
    }

    /// Create an empty array node at `path`.
    pub fn create_array(&mut self, path: &str) -> Result<(), EditError> {
        let target = self.target(path)?;
        let child = self.builder.arr();
        self.bind(target, child);
        self.commit();
        Ok(())
    }

    // ── Object writes ─────────────────────────────────────────────────────

    /// Bind `key` to `value` on the object at `path`.
    pub fn set_key(&mut self, path: &str, key: &str, value: &Value) -> Result<(), EditError> {
        let obj = self.expect_obj(path)?;
        let child = self.builder.json(value);
        self.builder.ins_obj(obj, key.to_string(), child);
        self.commit();
        Ok(())
    }

    /// Tombstone `key` on the object at `path`. Deleting an absent key still
    /// records the delete stamp, so older concurrent binds lose.
    pub fn delete_key(&mut self, path: &str, key: &str) -> Result<(), EditError> {
        let obj = self.expect_obj(path)?;
        self.builder.del_key(obj, key.to_string());
        self.commit();
        Ok(())
    }

    // ── Array writes ──────────────────────────────────────────────────────

    /// Insert `value` at `index` in the array at `path`. `index == len`
    /// appends.
    pub fn insert_element(
        &mut self,
        path: &str,
        index: usize,
        value: &Value,
    ) -> Result<(), EditError> {
        let arr = self.expect_arr(path)?;
        let anchor = self.arr_anchor(path, arr, index)?;
        let child = self.builder.json(value);
        self.builder.ins_arr(arr, anchor, vec![child]);
        self.commit();
        Ok(())
    }

    /// Append `value` to the array at `path`.
    pub fn push_element(&mut self, path: &str, value: &Value) -> Result<(), EditError> {
        let arr = self.expect_arr(path)?;
        let len = match self.doc.get_node(arr) {
            Some(Node::Arr(node)) => node.size(),
            _ => 0,
        };
        let anchor = self.arr_anchor(path, arr, len)?;
        let child = self.builder.json(value);
        self.builder.ins_arr(arr, anchor, vec![child]);
        self.commit();
        Ok(())
    }

    /// Delete the element at `index` in the array at `path`.
    pub fn delete_element(&mut self, path: &str, index: usize) -> Result<(), EditError> {
        let arr = self.expect_arr(path)?;
        let spans = match self.doc.get_node(arr) {
            Some(Node::Arr(node)) => {
                if index >= node.size() {
                    return Err(EditError::OutOfBounds {
                        path: path.to_string(),
                        index,
                        len: node.size(),
                    });
                }
                node.find_interval(index, 1)
            }
            _ => Vec::new(),
        };
        self.builder.del(arr, spans);
        self.commit();
        Ok(())
    }

    // ── Text writes ───────────────────────────────────────────────────────

    /// Insert `text` at character `offset` in the string at `path`.
    pub fn insert_text(&mut self, path: &str, offset: usize, text: &str) -> Result<(), EditError> {
        if text.is_empty() {
            return Err(EditError::EmptyWrite(path.to_string()));
        }
        let id = self.expect_str(path)?;
        let anchor = match self.doc.get_node(id) {
            Some(Node::Str(node)) => {
                let len = node.size();
                if offset > len {
                    return Err(EditError::OutOfBounds {
                        path: path.to_string(),
                        index: offset,
                        len,
                    });
                }
                if offset == 0 {
                    ORIGIN
                } else {
                    node.find(offset - 1).ok_or_else(|| EditError::OutOfBounds {
                        path: path.to_string(),
                        index: offset,
                        len,
                    })?
                }
            }
            _ => ORIGIN,
        };
        self.builder.ins_str(id, anchor, text.to_string());
        self.commit();
        Ok(())
    }

    /// Append `text` to the string at `path`.
    pub fn append_text(&mut self, path: &str, text: &str) -> Result<(), EditError> {
        let id = self.expect_str(path)?;
        let len = match self.doc.get_node(id) {
            Some(Node::Str(node)) => node.size(),
            _ => 0,
        };
        self.insert_text(path, len, text)
    }

    /// Delete `len` characters starting at `offset` in the string at `path`.
    pub fn delete_text(&mut self, path: &str, offset: usize, len: usize) -> Result<(), EditError> {
        if len == 0 {
            return Ok(());
        }
        let id = self.expect_str(path)?;
        let spans = match self.doc.get_node(id) {
            Some(Node::Str(node)) => {
                let size = node.size();
                if offset + len > size {
                    return Err(EditError::OutOfBounds {
                        path: path.to_string(),
                        index: offset + len,
                        len: size,
                    });
                }
                node.find_interval(offset, len)
            }
            _ => Vec::new(),
        };
        self.builder.del(id, spans);
        self.commit();
        Ok(())
    }

    // ── Register writes ───────────────────────────────────────────────────

    /// Add `delta` to the number register at `path`.
    pub fn increment(&mut self, path: &str, delta: i64) -> Result<(), EditError> {
        let id = path::resolve(self.doc, path)?;
        let current = match self.doc.get_node(id) {
            Some(Node::Num(node)) => node.value.clone(),
            Some(other) => {
                return Err(EditError::WrongType {
                    path: path.to_string(),
                    want: "num",
                    got: other.name(),
                })
            }
            None => return Err(EditError::Doc(DocError::NotFound(id))),
        };
        let next = if let Some(i) = current.as_i64() {
            i.checked_add(delta)
                .map(Number::from)
                .ok_or_else(|| EditError::Numeric(path.to_string()))?
        } else if let Some(f) = current.as_f64() {
            Number::from_f64(f + delta as f64)
                .ok_or_else(|| EditError::Numeric(path.to_string()))?
        } else {
            return Err(EditError::Numeric(path.to_string()));
        };
        self.builder.set(id, Value::Number(next));
        self.commit();
        Ok(())
    }

    // ── Internals ─────────────────────────────────────────────────────────

    /// Apply every operation staged since the previous commit. Edits only
    /// stage operations after their paths resolved, so staged operations
    /// always apply.
    fn commit(&mut self) {
        while self.applied < self.builder.patch.ops.len() {
            let op = self.builder.patch.ops[self.applied].clone();
            self.doc.apply_operation(&op);
            self.applied += 1;
        }
    }

    /// Resolve `path` into a write target without staging anything.
    fn target(&self, path: &str) -> Result<Target, EditError> {
        let segments = path::parse(path)?;
        let Some((last, parents)) = segments.split_last() else {
            return Ok(Target::Root);
        };
        match last.index {
            None => {
                let obj = path::resolve_segments(self.doc, parents)?;
                match self.doc.get_node(obj) {
                    Some(Node::Obj(_)) => Ok(Target::Key {
                        obj,
                        key: last.key.clone(),
                    }),
                    Some(other) => Err(EditError::WrongType {
                        path: path.to_string(),
                        want: "obj",
                        got: other.name(),
                    }),
                    None => Err(EditError::Doc(DocError::NotFound(obj))),
                }
            }
            Some(index) => {
                let mut to_arr = parents.to_vec();
                to_arr.push(Segment {
                    key: last.key.clone(),
                    index: None,
                });
                let arr = path::resolve_segments(self.doc, &to_arr)?;
                match self.doc.get_node(arr) {
                    Some(Node::Arr(node)) => {
                        let slot = node.find(index).ok_or_else(|| EditError::OutOfBounds {
                            path: path.to_string(),
                            index,
                            len: node.size(),
                        })?;
                        Ok(Target::Elem {
                            arr,
                            slot,
                            spans: node.find_interval(index, 1),
                        })
                    }
                    Some(other) => Err(EditError::WrongType {
                        path: path.to_string(),
                        want: "arr",
                        got: other.name(),
                    }),
                    None => Err(EditError::Doc(DocError::NotFound(arr))),
                }
            }
        }
    }

    /// Stage the binding operations for a freshly built child.
    fn bind(&mut self, target: Target, child: Ts) {
        match target {
            Target::Root => {
                self.builder.root(child);
            }
            Target::Key { obj, key } => {
                self.builder.ins_obj(obj, key, child);
            }
            Target::Elem { arr, slot, spans } => {
                self.builder.ins_arr(arr, slot, vec![child]);
                self.builder.del(arr, spans);
            }
        }
    }

    fn expect_obj(&self, path: &str) -> Result<Ts, EditError> {
        self.expect(path, "obj", |n| matches!(n, Node::Obj(_)))
    }

    fn expect_arr(&self, path: &str) -> Result<Ts, EditError> {
        self.expect(path, "arr", |n| matches!(n, Node::Arr(_)))
    }

    fn expect_str(&self, path: &str) -> Result<Ts, EditError> {
        self.expect(path, "str", |n| matches!(n, Node::Str(_)))
    }

    fn expect(
        &self,
        path: &str,
        want: &'static str,
        pred: impl Fn(&Node) -> bool,
    ) -> Result<Ts, EditError> {
        let id = path::resolve(self.doc, path)?;
        match self.doc.get_node(id) {
            Some(node) if pred(node) => Ok(id),
            Some(other) => Err(EditError::WrongType {
                path: path.to_string(),
                want,
                got: other.name(),
            }),
            None => Err(EditError::Doc(DocError::NotFound(id))),
        }
    }

    /// Anchor item for inserting at `index`: ORIGIN for the front, otherwise
    /// the slot id of the element just before the insertion point.
    fn arr_anchor(&self, path: &str, arr: Ts, index: usize) -> Result<Ts, EditError> {
        match self.doc.get_node(arr) {
            Some(Node::Arr(node)) => {
                let len = node.size();
                if index > len {
                    return Err(EditError::OutOfBounds {
                        path: path.to_string(),
                        index,
                        len,
                    });
                }
                if index == 0 {
                    Ok(ORIGIN)
                } else {
                    node.find(index - 1).ok_or_else(|| EditError::OutOfBounds {
                        path: path.to_string(),
                        index,
                        len,
                    })
                }
            }
            _ => Ok(ORIGIN),
        }
    }
}
