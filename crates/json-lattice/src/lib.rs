//! json-lattice — conflict-free replicated JSON documents.
//!
//! A [`Document`] is one replica of a JSON tree. Replicas edit locally,
//! exchange [`Patch`]es, and converge to the same view regardless of
//! delivery order, duplication, or timing. On top of the replica sit path
//! addressing, a direct tree editor, a typed-record tracker with snapshots
//! and time travel, and four interchangeable wire codecs.

pub mod clock;
pub mod codec;
pub mod doc;
pub mod edit;
pub mod node;
pub mod patch;
pub mod path;
pub mod sync;
pub mod tracker;
pub mod view;

pub use clock::{ClockTable, SessionClock, SessionId, Ts, Tss, ORIGIN};
pub use codec::{CodecError, Format, TaggedPayload};
pub use doc::{AppliedResult, DocError, Document, OpOutcome};
pub use edit::{DocumentEditor, EditError};
pub use node::{Node, NodeKind};
pub use patch::builder::PatchBuilder;
pub use patch::op::Op;
pub use patch::Patch;
pub use path::PathError;
pub use sync::SharedDocument;
pub use tracker::{Snapshot, Tracker, TrackerError};
pub use view::ViewError;
