//! Shared-document handle for concurrent readers and writers.
//!
//! [`SharedDocument`] puts one replica behind a read-write lock. Reads
//! (view, resolve, materialize) take the shared lock; every patch
//! application takes the exclusive lock for exactly one patch, so readers
//! interleave between patches and never observe a half-applied one.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::clock::{SessionId, Ts};
use crate::doc::{AppliedResult, DocError, Document};
use crate::patch::builder::PatchBuilder;
use crate::patch::Patch;
use crate::path::{self, PathError};
use crate::view;

/// A cloneable handle to one document shared between threads. Clones point
/// at the same replica.
#[derive(Debug, Clone)]
pub struct SharedDocument {
    inner: Arc<RwLock<Document>>,
}

impl SharedDocument {
    /// Wrap a fresh document with a generated session id.
    pub fn new() -> Self {
        Document::create().into()
    }

    /// Wrap a fresh document for the given session.
    pub fn with_session(sid: SessionId) -> Self {
        Document::new(sid).into()
    }

    /// Render the current view.
    pub fn view(&self) -> Value {
        self.inner.read().view()
    }

    /// Resolve a path string to the node it addresses.
    pub fn resolve(&self, path: &str) -> Result<Ts, PathError> {
        path::resolve(&self.inner.read(), path)
    }

    /// Materialize the subtree rooted at `id`.
    pub fn view_of(&self, id: Ts) -> Result<Value, DocError> {
        view::view_of(&self.inner.read(), id)
    }

    /// Apply one patch under the exclusive lock.
    pub fn apply_patch(&self, patch: &Patch) -> AppliedResult {
        self.inner.write().apply_patch(patch)
    }

    /// A patch builder continuing the document's clock.
    pub fn new_patch_builder(&self) -> PatchBuilder {
        self.inner.read().new_patch_builder()
    }

    /// A private deep copy of the current state under a new session.
    pub fn fork(&self) -> Document {
        self.inner.read().fork()
    }

    /// Run `f` with shared read access, for reads this surface does not
    /// cover directly.
    pub fn read<R>(&self, f: impl FnOnce(&Document) -> R) -> R {
        f(&self.inner.read())
    }
}

impl Default for SharedDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Document> for SharedDocument {
    fn from(doc: Document) -> Self {
        Self {
            inner: Arc::new(RwLock::new(doc)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sid(n: u8) -> SessionId {
        SessionId::from_bytes([n; 16])
    }

    fn seeded() -> (SharedDocument, Patch) {
        let shared = SharedDocument::with_session(sid(1));
        let mut b = shared.new_patch_builder();
        let root = b.json(&json!({"log": []}));
        b.root(root);
        let seed = b.flush();
        shared.apply_patch(&seed);
        (shared, seed)
    }

    /// A patch from a peer session binding `key` on the shared root.
    fn peer_bind(n: u8, seed: &Patch, key: &str) -> Patch {
        let mut d = Document::new(sid(n));
        d.apply_patch(seed);
        let root = d.root.child.unwrap();
        let mut b = d.new_patch_builder();
        let val = b.con(json!(key));
        b.ins_obj(root, key.into(), val);
        b.flush()
    }

    #[test]
    fn clones_share_one_replica() {
        let (shared, seed) = seeded();
        let other = shared.clone();
        other.apply_patch(&peer_bind(2, &seed, "beta"));
        assert_eq!(shared.view()["beta"], json!("beta"));
    }

    #[test]
    fn resolves_and_materializes_under_the_read_lock() {
        let (shared, _) = seeded();
        let log = shared.resolve("root.log").unwrap();
        assert_eq!(shared.view_of(log).unwrap(), json!([]));
        assert!(shared.resolve("root.nope").is_err());
    }

    #[test]
    fn parallel_writers_and_readers_converge() {
        let (shared, seed) = seeded();
        let pa = peer_bind(2, &seed, "alpha");
        let pb = peer_bind(3, &seed, "beta");

        std::thread::scope(|s| {
            s.spawn(|| shared.apply_patch(&pa));
            s.spawn(|| shared.apply_patch(&pb));
            s.spawn(|| {
                for _ in 0..64 {
                    // any interleaving shows a whole number of patches
                    let view = shared.view();
                    assert!(view.as_object().is_some());
                }
            });
        });

        let view = shared.view();
        assert_eq!(view["alpha"], json!("alpha"));
        assert_eq!(view["beta"], json!("beta"));
    }

    #[test]
    fn fork_is_private() {
        let (shared, _) = seeded();
        let mut fork = shared.fork();
        let root = fork.root.child.unwrap();
        let mut b = fork.new_patch_builder();
        let val = b.con(json!(1));
        b.ins_obj(root, "local".into(), val);
        fork.apply_patch(&b.flush());

        assert_eq!(shared.view().get("local"), None);
        assert_eq!(fork.view()["local"], json!(1));
    }
}
