//! Materializer: project the replicated tree into plain values.
//!
//! Projection is pure and stable: the same tree always renders the same
//! value, and tombstoned keys, elements, and text runs never appear.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::clock::Ts;
use crate::doc::{DocError, Document};

#[derive(Debug, Error)]
pub enum ViewError {
    #[error(transparent)]
    Doc(#[from] DocError),
    #[error("record shape mismatch: {0}")]
    Shape(#[from] serde_json::Error),
}

/// Render the whole document.
pub fn view(doc: &Document) -> Value {
    doc.view()
}

/// Render the subtree rooted at `id`. Tombstoned nodes stay addressable,
/// so a deleted array element can still be rendered by its id.
pub fn view_of(doc: &Document, id: Ts) -> Result<Value, DocError> {
    Ok(doc.node(id)?.view(&doc.table))
}

/// Render the document into a typed record. The record's derived
/// deserializer is the shape description; a field pointed at a node of the
/// wrong variant fails with [`ViewError::Shape`].
pub fn to_struct<T: DeserializeOwned>(doc: &Document) -> Result<T, ViewError> {
    Ok(serde_json::from_value(doc.view())?)
}

/// Render the subtree rooted at `id` into a typed record.
pub fn to_struct_of<T: DeserializeOwned>(doc: &Document, id: Ts) -> Result<T, ViewError> {
    Ok(serde_json::from_value(view_of(doc, id)?)?)
}
