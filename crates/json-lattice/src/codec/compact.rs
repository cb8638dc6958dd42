//! Compact JSON form: an array of arrays, one inner array per op.
//!
//! ```json
//! [
//!   [["6bd1…-uuid", 1]],
//!   [0],
//!   [2],
//!   [11, 2, 0, "hi"]
//! ]
//! ```
//!
//! The first element is the header: the patch id, plus the meta value when
//! one is attached. Every other element starts with a numeric opcode.
//!
//! Ids are written relative to the patch session: `0` is the origin stamp,
//! a bare integer is a counter under the patch session (live counters start
//! at 1, so there is no collision), and `[session-uuid, counter]` addresses
//! a foreign session. Delete spans follow the same rule with the span length
//! appended.

use serde_json::{json, Value};
use uuid::Uuid;

use crate::clock::{ts, tss, SessionId, Ts, Tss, ORIGIN};
use crate::patch::op::Op;
use crate::patch::Patch;

use super::{CodecError, Opcode};

fn encode_id(sid: SessionId, id: Ts) -> Value {
    if id == ORIGIN {
        json!(0)
    } else if id.sid == sid {
        json!(id.counter)
    } else {
        json!([id.sid.to_string(), id.counter])
    }
}

fn encode_span(sid: SessionId, span: &Tss) -> Value {
    if span.sid == sid {
        json!([span.counter, span.span])
    } else {
        json!([span.sid.to_string(), span.counter, span.span])
    }
}

/// Encodes a patch as the compact array form.
pub fn encode(patch: &Patch) -> Vec<Value> {
    let id = patch.get_id().unwrap_or(ORIGIN);
    let id_value = json!([id.sid.to_string(), id.counter]);
    let header = match &patch.meta {
        Some(meta) => json!([id_value, meta]),
        None => json!([id_value]),
    };

    let mut out = Vec::with_capacity(patch.ops.len() + 1);
    out.push(header);
    for op in &patch.ops {
        out.push(encode_op(id.sid, op));
    }
    out
}

fn encode_op(sid: SessionId, op: &Op) -> Value {
    match op {
        Op::New { kind, value, .. } => {
            let code = Opcode::for_kind(*kind) as u8;
            match value {
                Some(value) => json!([code, value]),
                None => json!([code]),
            }
        }
        Op::InsVal { obj, val, .. } => json!([
            Opcode::InsVal as u8,
            encode_id(sid, *obj),
            encode_id(sid, *val),
        ]),
        Op::InsObj { obj, key, child, .. } => json!([
            Opcode::InsObj as u8,
            encode_id(sid, *obj),
            key,
            encode_id(sid, *child),
        ]),
        Op::InsArr {
            obj, after, data, ..
        } => json!([
            Opcode::InsArr as u8,
            encode_id(sid, *obj),
            encode_id(sid, *after),
            data.iter().map(|id| encode_id(sid, *id)).collect::<Vec<_>>(),
        ]),
        Op::InsStr {
            obj, after, data, ..
        } => json!([
            Opcode::InsStr as u8,
            encode_id(sid, *obj),
            encode_id(sid, *after),
            data,
        ]),
        Op::Set { obj, value, .. } => json!([Opcode::Set as u8, encode_id(sid, *obj), value]),
        Op::DelKey { obj, key, .. } => json!([Opcode::DelKey as u8, encode_id(sid, *obj), key]),
        Op::Del { obj, what, .. } => json!([
            Opcode::Del as u8,
            encode_id(sid, *obj),
            what.iter().map(|s| encode_span(sid, s)).collect::<Vec<_>>(),
        ]),
        Op::Nop { len, .. } => {
            if *len > 1 {
                json!([Opcode::Nop as u8, len])
            } else {
                json!([Opcode::Nop as u8])
            }
        }
    }
}

/// Decodes the compact array form into a patch.
pub fn decode(data: &[Value]) -> Result<Patch, CodecError> {
    let header = data
        .first()
        .and_then(Value::as_array)
        .ok_or(CodecError::Malformed("missing patch header"))?;
    let id = decode_abs(
        header
            .first()
            .ok_or(CodecError::Malformed("header without a patch id"))?,
    )?;
    let meta = header.get(1).cloned();

    let mut ops = Vec::with_capacity(data.len() - 1);
    let mut next = id.counter;
    for item in &data[1..] {
        let op = decode_op(id.sid, item, ts(id.sid, next))?;
        next += op.span();
        ops.push(op);
    }
    Ok(Patch { ops, meta })
}

fn decode_op(sid: SessionId, value: &Value, id: Ts) -> Result<Op, CodecError> {
    let arr = value
        .as_array()
        .ok_or(CodecError::Malformed("op must be an array"))?;
    let tag = arr
        .first()
        .and_then(Value::as_u64)
        .ok_or(CodecError::Malformed("opcode must be an integer"))?;
    let opcode = u8::try_from(tag)
        .ok()
        .and_then(Opcode::from_u8)
        .ok_or(CodecError::UnknownOpcode(tag as u8))?;

    Ok(match opcode {
        Opcode::NewObj
        | Opcode::NewArr
        | Opcode::NewStr
        | Opcode::NewNum
        | Opcode::NewBool
        | Opcode::NewCon
        | Opcode::NewNull => {
            let kind = opcode
                .kind()
                .ok_or(CodecError::UnknownOpcode(tag as u8))?;
            Op::New {
                id,
                kind,
                value: arr.get(1).cloned(),
            }
        }
        Opcode::InsVal => Op::InsVal {
            id,
            obj: decode_id(sid, arg(arr, 1)?)?,
            val: decode_id(sid, arg(arr, 2)?)?,
        },
        Opcode::InsObj => Op::InsObj {
            id,
            obj: decode_id(sid, arg(arr, 1)?)?,
            key: arg(arr, 2)?
                .as_str()
                .ok_or(CodecError::Malformed("key must be a string"))?
                .to_string(),
            child: decode_id(sid, arg(arr, 3)?)?,
        },
        Opcode::InsArr => {
            let items = arg(arr, 3)?
                .as_array()
                .ok_or(CodecError::Malformed("ins_arr without values"))?;
            if items.is_empty() {
                return Err(CodecError::Malformed("empty element insert"));
            }
            Op::InsArr {
                id,
                obj: decode_id(sid, arg(arr, 1)?)?,
                after: decode_id(sid, arg(arr, 2)?)?,
                data: items
                    .iter()
                    .map(|item| decode_id(sid, item))
                    .collect::<Result<_, _>>()?,
            }
        }
        Opcode::InsStr => {
            let data = arg(arr, 3)?
                .as_str()
                .ok_or(CodecError::Malformed("ins_str without text"))?
                .to_string();
            if data.is_empty() {
                return Err(CodecError::Malformed("empty string insert"));
            }
            Op::InsStr {
                id,
                obj: decode_id(sid, arg(arr, 1)?)?,
                after: decode_id(sid, arg(arr, 2)?)?,
                data,
            }
        }
        Opcode::Set => Op::Set {
            id,
            obj: decode_id(sid, arg(arr, 1)?)?,
            value: arg(arr, 2)?.clone(),
        },
        Opcode::DelKey => Op::DelKey {
            id,
            obj: decode_id(sid, arg(arr, 1)?)?,
            key: arg(arr, 2)?
                .as_str()
                .ok_or(CodecError::Malformed("key must be a string"))?
                .to_string(),
        },
        Opcode::Del => {
            let spans = arg(arr, 2)?
                .as_array()
                .ok_or(CodecError::Malformed("del without spans"))?;
            Op::Del {
                id,
                obj: decode_id(sid, arg(arr, 1)?)?,
                what: spans
                    .iter()
                    .map(|span| decode_span(sid, span))
                    .collect::<Result<_, _>>()?,
            }
        }
        Opcode::Nop => {
            let len = match arr.get(1) {
                Some(len) => len
                    .as_u64()
                    .ok_or(CodecError::Malformed("nop length must be an integer"))?,
                None => 1,
            };
            if len == 0 {
                return Err(CodecError::Malformed("zero-length nop"));
            }
            Op::Nop { id, len }
        }
    })
}

fn arg<'a>(arr: &'a [Value], index: usize) -> Result<&'a Value, CodecError> {
    arr.get(index)
        .ok_or(CodecError::Malformed("op is missing an argument"))
}

fn decode_id(sid: SessionId, value: &Value) -> Result<Ts, CodecError> {
    if let Some(counter) = value.as_u64() {
        if counter == 0 {
            return Ok(ORIGIN);
        }
        return Ok(ts(sid, counter));
    }
    decode_abs(value)
}

fn decode_abs(value: &Value) -> Result<Ts, CodecError> {
    let pair = value
        .as_array()
        .filter(|a| a.len() == 2)
        .ok_or(CodecError::Malformed("id must be a counter or [session, counter]"))?;
    let sid = decode_sid(&pair[0])?;
    let counter = pair[1]
        .as_u64()
        .ok_or(CodecError::Malformed("id counter must be an integer"))?;
    Ok(ts(sid, counter))
}

fn decode_span(sid: SessionId, value: &Value) -> Result<Tss, CodecError> {
    let parts = value
        .as_array()
        .ok_or(CodecError::Malformed("span must be an array"))?;
    match parts.as_slice() {
        [counter, span] => {
            let counter = counter
                .as_u64()
                .ok_or(CodecError::Malformed("span counter must be an integer"))?;
            let span = span
                .as_u64()
                .ok_or(CodecError::Malformed("span length must be an integer"))?;
            Ok(tss(sid, counter, span))
        }
        [session, counter, span] => {
            let sid = decode_sid(session)?;
            let counter = counter
                .as_u64()
                .ok_or(CodecError::Malformed("span counter must be an integer"))?;
            let span = span
                .as_u64()
                .ok_or(CodecError::Malformed("span length must be an integer"))?;
            Ok(tss(sid, counter, span))
        }
        _ => Err(CodecError::Malformed("span must have two or three elements")),
    }
}

fn decode_sid(value: &Value) -> Result<SessionId, CodecError> {
    let text = value.as_str().ok_or(CodecError::BadSessionId)?;
    let uuid = Uuid::parse_str(text).map_err(|_| CodecError::BadSessionId)?;
    Ok(SessionId(uuid))
}
