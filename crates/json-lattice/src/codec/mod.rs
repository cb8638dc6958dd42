//! Wire codecs for patches.
//!
//! Four formats are supported, all mutually convertible:
//! - [`Format::Json`] — human-readable JSON object form ([`verbose`])
//! - [`Format::Text`] — space-efficient JSON array form ([`compact`])
//! - [`Format::Binary`] — varint binary form ([`binary`]), the primary wire
//!   format
//! - [`Format::Base64`] — standard-alphabet base64 of the binary form
//!
//! Operation ids never travel on the wire: a patch's operations occupy a
//! contiguous clock range starting at the patch id, so decoders re-mint them
//! by walking op spans. Payload ids (targets, anchors, children) are always
//! explicit.
//!
//! [`TaggedPayload`] frames an encoded patch with a one-byte format tag so a
//! receiver can decode without out-of-band knowledge.

pub mod binary;
pub mod compact;
pub mod verbose;

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use thiserror::Error;

use crate::node::NodeKind;
use crate::patch::Patch;

// ── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unknown encoding format {0:?}")]
    UnknownFormat(String),
    #[error("unknown format tag {0}")]
    UnknownTag(u8),
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),
    #[error("unexpected end of input")]
    Truncated,
    #[error("malformed patch: {0}")]
    Malformed(&'static str),
    #[error("invalid session id")]
    BadSessionId,
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid embedded value")]
    Cbor,
}

// ── Format registry ────────────────────────────────────────────────────────

/// Wire encoding selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Json,
    Binary,
    Text,
    Base64,
}

impl Format {
    pub const ALL: [Format; 4] = [Format::Json, Format::Binary, Format::Text, Format::Base64];

    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Binary => "binary",
            Format::Text => "text",
            Format::Base64 => "base64",
        }
    }

    /// The one-byte tag used by [`TaggedPayload`] framing.
    pub fn tag(&self) -> u8 {
        match self {
            Format::Json => 0,
            Format::Binary => 1,
            Format::Text => 2,
            Format::Base64 => 3,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Format, CodecError> {
        match tag {
            0 => Ok(Format::Json),
            1 => Ok(Format::Binary),
            2 => Ok(Format::Text),
            3 => Ok(Format::Base64),
            other => Err(CodecError::UnknownTag(other)),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Format, CodecError> {
        match s {
            "json" => Ok(Format::Json),
            "binary" => Ok(Format::Binary),
            "text" => Ok(Format::Text),
            "base64" => Ok(Format::Base64),
            other => Err(CodecError::UnknownFormat(other.to_string())),
        }
    }
}

// ── Opcodes ────────────────────────────────────────────────────────────────

/// Operation tags shared by the compact and binary forms.
///
/// Node-creating opcodes occupy the low block, one per [`NodeKind`]; insert
/// opcodes sit at `0b01000`, deletions at `0b10000`. The binary form packs
/// the 5-bit opcode into the high bits of the op octet, leaving 3 bits for
/// an inline length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    NewObj = 0,
    NewArr = 1,
    NewStr = 2,
    NewNum = 3,
    NewBool = 4,
    NewCon = 5,
    NewNull = 6,
    InsVal = 0b01000,
    InsObj = 0b01001,
    InsArr = 0b01010,
    InsStr = 0b01011,
    Set = 0b01100,
    DelKey = 0b01101,
    Del = 0b10000,
    Nop = 0b10001,
}

impl Opcode {
    pub fn from_u8(code: u8) -> Option<Opcode> {
        Some(match code {
            0 => Opcode::NewObj,
            1 => Opcode::NewArr,
            2 => Opcode::NewStr,
            3 => Opcode::NewNum,
            4 => Opcode::NewBool,
            5 => Opcode::NewCon,
            6 => Opcode::NewNull,
            0b01000 => Opcode::InsVal,
            0b01001 => Opcode::InsObj,
            0b01010 => Opcode::InsArr,
            0b01011 => Opcode::InsStr,
            0b01100 => Opcode::Set,
            0b01101 => Opcode::DelKey,
            0b10000 => Opcode::Del,
            0b10001 => Opcode::Nop,
            _ => return None,
        })
    }

    pub fn for_kind(kind: NodeKind) -> Opcode {
        match kind {
            NodeKind::Obj => Opcode::NewObj,
            NodeKind::Arr => Opcode::NewArr,
            NodeKind::Str => Opcode::NewStr,
            NodeKind::Num => Opcode::NewNum,
            NodeKind::Bool => Opcode::NewBool,
            NodeKind::Con => Opcode::NewCon,
            NodeKind::Null => Opcode::NewNull,
        }
    }

    /// The node kind created by a `New*` opcode.
    pub fn kind(&self) -> Option<NodeKind> {
        Some(match self {
            Opcode::NewObj => NodeKind::Obj,
            Opcode::NewArr => NodeKind::Arr,
            Opcode::NewStr => NodeKind::Str,
            Opcode::NewNum => NodeKind::Num,
            Opcode::NewBool => NodeKind::Bool,
            Opcode::NewCon => NodeKind::Con,
            Opcode::NewNull => NodeKind::Null,
            _ => return None,
        })
    }
}

// ── Dispatch ───────────────────────────────────────────────────────────────

/// Encodes a patch in the given format.
pub fn encode(patch: &Patch, format: Format) -> Result<Vec<u8>, CodecError> {
    match format {
        Format::Json => Ok(serde_json::to_vec(&verbose::encode(patch))?),
        Format::Text => Ok(serde_json::to_vec(&serde_json::Value::Array(
            compact::encode(patch),
        ))?),
        Format::Binary => Ok(binary::encode(patch)),
        Format::Base64 => {
            let raw = binary::encode(patch);
            Ok(base64::engine::general_purpose::STANDARD
                .encode(raw)
                .into_bytes())
        }
    }
}

/// Decodes a patch from bytes in the given format.
pub fn decode(data: &[u8], format: Format) -> Result<Patch, CodecError> {
    match format {
        Format::Json => {
            let value: serde_json::Value = serde_json::from_slice(data)?;
            verbose::decode(&value)
        }
        Format::Text => {
            let value: serde_json::Value = serde_json::from_slice(data)?;
            let items = value
                .as_array()
                .ok_or(CodecError::Malformed("expected a top-level array"))?;
            compact::decode(items)
        }
        Format::Binary => binary::decode(data),
        Format::Base64 => {
            let raw = base64::engine::general_purpose::STANDARD.decode(data)?;
            binary::decode(&raw)
        }
    }
}

// ── Tagged framing ─────────────────────────────────────────────────────────

/// An encoded patch carrying its own format tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedPayload {
    pub format: Format,
    pub bytes: Vec<u8>,
}

impl TaggedPayload {
    /// Encodes `patch` and wraps it with the format tag.
    pub fn new(patch: &Patch, format: Format) -> Result<TaggedPayload, CodecError> {
        Ok(TaggedPayload {
            format,
            bytes: encode(patch, format)?,
        })
    }

    /// Decodes the wrapped patch.
    pub fn patch(&self) -> Result<Patch, CodecError> {
        decode(&self.bytes, self.format)
    }

    /// One tag byte, then the payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.bytes.len());
        out.push(self.format.tag());
        out.extend_from_slice(&self.bytes);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<TaggedPayload, CodecError> {
        let (&tag, rest) = data.split_first().ok_or(CodecError::Truncated)?;
        Ok(TaggedPayload {
            format: Format::from_tag(tag)?,
            bytes: rest.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{SessionId, ORIGIN};
    use crate::patch::builder::PatchBuilder;
    use serde_json::json;

    fn sample_patch() -> Patch {
        let mut b = PatchBuilder::new(SessionId::from_bytes([7; 16]), 1);
        let obj = b.obj();
        let name = b.str_node();
        b.ins_str(name, ORIGIN, "ada".into());
        b.ins_obj(obj, "name".into(), name);
        let score = b.num(json!(10));
        b.ins_obj(obj, "score".into(), score);
        b.root(obj);
        b.flush()
    }

    #[test]
    fn format_names_round_trip() {
        for format in Format::ALL {
            assert_eq!(format.as_str().parse::<Format>().unwrap(), format);
            assert_eq!(Format::from_tag(format.tag()).unwrap(), format);
        }
        assert!(matches!(
            "yaml".parse::<Format>(),
            Err(CodecError::UnknownFormat(_))
        ));
        assert!(matches!(Format::from_tag(9), Err(CodecError::UnknownTag(9))));
    }

    #[test]
    fn every_format_round_trips() {
        let patch = sample_patch();
        for format in Format::ALL {
            let bytes = encode(&patch, format).unwrap();
            let back = decode(&bytes, format).unwrap();
            assert_eq!(back.ops, patch.ops, "format {format}");
            assert_eq!(back.meta, patch.meta, "format {format}");
        }
    }

    #[test]
    fn formats_convert_across_each_other() {
        let patch = sample_patch();
        let json_bytes = encode(&patch, Format::Json).unwrap();
        let via_json = decode(&json_bytes, Format::Json).unwrap();
        let bin_bytes = encode(&via_json, Format::Binary).unwrap();
        let via_binary = decode(&bin_bytes, Format::Binary).unwrap();
        assert_eq!(via_binary.ops, patch.ops);
    }

    #[test]
    fn tagged_payload_is_self_describing() {
        let patch = sample_patch();
        let payload = TaggedPayload::new(&patch, Format::Base64).unwrap();
        let wire = payload.to_bytes();
        assert_eq!(wire[0], Format::Base64.tag());

        let back = TaggedPayload::from_bytes(&wire).unwrap();
        assert_eq!(back, payload);
        assert_eq!(back.patch().unwrap().ops, patch.ops);
    }

    #[test]
    fn tagged_payload_rejects_garbage() {
        assert!(matches!(
            TaggedPayload::from_bytes(&[]),
            Err(CodecError::Truncated)
        ));
        assert!(matches!(
            TaggedPayload::from_bytes(&[42, 1, 2]),
            Err(CodecError::UnknownTag(42))
        ));
    }

    #[test]
    fn malformed_inputs_error_per_format() {
        assert!(decode(b"not json", Format::Json).is_err());
        assert!(decode(b"{\"id\": 3}", Format::Text).is_err());
        assert!(decode(&[0xFF, 0x01], Format::Binary).is_err());
        assert!(decode(b"!!!not-base64!!!", Format::Base64).is_err());
    }
}
