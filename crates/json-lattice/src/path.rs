//! Path strings for addressing nodes in the tree.
//!
//! A path starts at `root` and descends through `.`-separated segments,
//! where each segment is a bare object key or `key[index]` for an array
//! element reached through that key: `root`, `root.name`, `root.tags[2]`,
//! `root.users[0].email`. Resolution walks the live tree and fails on the
//! first segment that cannot be resolved; it never returns a partial match.

use std::fmt;

use thiserror::Error;

use crate::clock::Ts;
use crate::doc::Document;
use crate::node::Node;

// ── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("empty path")]
    Empty,
    #[error("path must start with `root`: {0}")]
    MissingRoot(String),
    #[error("malformed segment: {0}")]
    BadSegment(String),
    #[error("document root is not bound")]
    Unbound,
    #[error("key not found: {0}")]
    UnknownKey(String),
    #[error("index {index} out of bounds for `{key}` of length {len}")]
    OutOfBounds {
        key: String,
        index: usize,
        len: usize,
    },
    #[error("cannot descend into {kind} node at `{segment}`")]
    TypeMismatch { segment: String, kind: &'static str },
    #[error("`root` has no parent")]
    NoParent,
}

// ── Segments ───────────────────────────────────────────────────────────────

/// One parsed path step: an object key, optionally followed by an array
/// index reached through that key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub key: String,
    pub index: Option<usize>,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(i) => write!(f, "{}[{}]", self.key, i),
            None => write!(f, "{}", self.key),
        }
    }
}

/// Parse a path string into its segments. `root` alone parses to an empty
/// segment list.
pub fn parse(path: &str) -> Result<Vec<Segment>, PathError> {
    let path = path.trim();
    if path.is_empty() {
        return Err(PathError::Empty);
    }
    let mut parts = path.split('.');
    if parts.next() != Some("root") {
        return Err(PathError::MissingRoot(path.to_string()));
    }
    parts.map(parse_segment).collect()
}

fn parse_segment(part: &str) -> Result<Segment, PathError> {
    let bad = || PathError::BadSegment(part.to_string());
    match part.find('[') {
        None => {
            if part.is_empty() || part.contains(']') {
                return Err(bad());
            }
            Ok(Segment {
                key: part.to_string(),
                index: None,
            })
        }
        Some(open) => {
            if open == 0 || !part.ends_with(']') {
                return Err(bad());
            }
            let digits = &part[open + 1..part.len() - 1];
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(bad());
            }
            let index = digits.parse().map_err(|_| bad())?;
            Ok(Segment {
                key: part[..open].to_string(),
                index: Some(index),
            })
        }
    }
}

/// Split off the final segment: `root.a.b[2]` becomes `("root.a", b[2])`.
/// Write operations use this to address "the container plus the step to
/// mutate". Fails with [`PathError::NoParent`] on `root` itself.
pub fn get_parent_path(path: &str) -> Result<(String, Segment), PathError> {
    let mut segments = parse(path)?;
    let last = segments.pop().ok_or(PathError::NoParent)?;
    let trimmed = path.trim();
    match trimmed.rfind('.') {
        Some(cut) => Ok((trimmed[..cut].to_string(), last)),
        None => Err(PathError::NoParent),
    }
}

// ── Resolution ─────────────────────────────────────────────────────────────

/// Resolve a path string against a document, returning the id of the node
/// it addresses.
pub fn resolve(doc: &Document, path: &str) -> Result<Ts, PathError> {
    let segments = parse(path)?;
    resolve_segments(doc, &segments)
}

/// Resolve already-parsed segments, starting at the document root.
pub fn resolve_segments(doc: &Document, segments: &[Segment]) -> Result<Ts, PathError> {
    let mut cur = doc.root.child.ok_or(PathError::Unbound)?;
    for seg in segments {
        cur = step(doc, cur, seg)?;
    }
    Ok(cur)
}

fn step(doc: &Document, cur: Ts, seg: &Segment) -> Result<Ts, PathError> {
    let child = match doc.get_node(cur) {
        Some(Node::Obj(obj)) => obj
            .get(&seg.key)
            .ok_or_else(|| PathError::UnknownKey(seg.key.clone()))?,
        Some(other) => {
            return Err(PathError::TypeMismatch {
                segment: seg.key.clone(),
                kind: other.name(),
            })
        }
        None => return Err(PathError::UnknownKey(seg.key.clone())),
    };
    let Some(index) = seg.index else {
        return Ok(child);
    };
    match doc.get_node(child) {
        Some(Node::Arr(arr)) => arr.element_id(index).ok_or_else(|| PathError::OutOfBounds {
            key: seg.key.clone(),
            index,
            len: arr.size(),
        }),
        Some(other) => Err(PathError::TypeMismatch {
            segment: seg.to_string(),
            kind: other.name(),
        }),
        None => Err(PathError::UnknownKey(seg.key.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SessionId;
    use serde_json::json;

    fn seeded() -> Document {
        let mut d = Document::new(SessionId::from_bytes([1; 16]));
        let mut b = d.new_patch_builder();
        let root = b.json(&json!({"name": "ed", "tags": [1, true]}));
        b.root(root);
        d.apply_patch(&b.flush());
        d
    }

    #[test]
    fn parses_root_and_segments() {
        assert_eq!(parse("root").unwrap(), vec![]);
        assert_eq!(
            parse("root.users[2].name").unwrap(),
            vec![
                Segment {
                    key: "users".into(),
                    index: Some(2)
                },
                Segment {
                    key: "name".into(),
                    index: None
                },
            ]
        );
    }

    #[test]
    fn rejects_malformed_paths() {
        assert_eq!(parse(""), Err(PathError::Empty));
        assert!(matches!(parse("user.name"), Err(PathError::MissingRoot(_))));
        assert!(matches!(parse("root..x"), Err(PathError::BadSegment(_))));
        assert!(matches!(parse("root.a["), Err(PathError::BadSegment(_))));
        assert!(matches!(parse("root.a[x]"), Err(PathError::BadSegment(_))));
        assert!(matches!(parse("root.a]b"), Err(PathError::BadSegment(_))));
        assert!(matches!(parse("root.[2]"), Err(PathError::BadSegment(_))));
    }

    #[test]
    fn splits_parent_path() {
        let (parent, last) = get_parent_path("root.a.b[2]").unwrap();
        assert_eq!(parent, "root.a");
        assert_eq!(last.to_string(), "b[2]");
        let (parent, last) = get_parent_path("root.a").unwrap();
        assert_eq!(parent, "root");
        assert_eq!(last.key, "a");
        assert_eq!(get_parent_path("root"), Err(PathError::NoParent));
    }

    #[test]
    fn resolves_keys_and_indexes() {
        let d = seeded();
        let root_id = d.root.child.unwrap();
        assert_eq!(resolve(&d, "root").unwrap(), root_id);

        let obj = match d.get_node(root_id) {
            Some(Node::Obj(o)) => o,
            _ => panic!("root is an object"),
        };
        assert_eq!(resolve(&d, "root.name").unwrap(), obj.get("name").unwrap());

        let second = resolve(&d, "root.tags[1]").unwrap();
        match d.get_node(second) {
            Some(Node::Bool(b)) => assert!(b.value),
            other => panic!("expected boolean, got {other:?}"),
        }
    }

    #[test]
    fn fails_on_the_first_bad_segment() {
        let d = seeded();
        assert_eq!(
            resolve(&d, "root.nope"),
            Err(PathError::UnknownKey("nope".into()))
        );
        assert_eq!(
            resolve(&d, "root.tags[9]"),
            Err(PathError::OutOfBounds {
                key: "tags".into(),
                index: 9,
                len: 2
            })
        );
        assert!(matches!(
            resolve(&d, "root.name.x"),
            Err(PathError::TypeMismatch { .. })
        ));
        assert!(matches!(
            resolve(&d, "root.name[0]"),
            Err(PathError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn unbound_root_does_not_resolve() {
        let d = Document::new(SessionId::from_bytes([7; 16]));
        assert_eq!(resolve(&d, "root"), Err(PathError::Unbound));
    }
}
