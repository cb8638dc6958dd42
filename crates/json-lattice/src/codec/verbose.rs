//! Verbose JSON form: a self-describing object with one entry per op.
//!
//! ```json
//! {
//!   "id": ["6bd1…-uuid", 1],
//!   "ops": [
//!     { "op": "new_obj" },
//!     { "op": "new_str" },
//!     { "op": "ins_str", "obj": [...], "after": [...], "value": "hi" }
//!   ]
//! }
//! ```
//!
//! Ids are `[session-uuid, counter]` pairs, spans `[session-uuid, counter,
//! span]` triples. Op ids are implicit (see the module doc in
//! [`crate::codec`]).

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::clock::{ts, tss, SessionId, Ts, Tss, ORIGIN};
use crate::node::NodeKind;
use crate::patch::op::Op;
use crate::patch::Patch;

use super::CodecError;

fn encode_ts(id: Ts) -> Value {
    json!([id.sid.to_string(), id.counter])
}

fn encode_tss(span: &Tss) -> Value {
    json!([span.sid.to_string(), span.counter, span.span])
}

/// Encodes a patch as the verbose JSON object.
pub fn encode(patch: &Patch) -> Value {
    let id = patch.get_id().unwrap_or(ORIGIN);
    let mut out = Map::new();
    out.insert("id".into(), encode_ts(id));
    if let Some(meta) = &patch.meta {
        out.insert("meta".into(), meta.clone());
    }
    let ops: Vec<Value> = patch.ops.iter().map(encode_op).collect();
    out.insert("ops".into(), Value::Array(ops));
    Value::Object(out)
}

fn encode_op(op: &Op) -> Value {
    match op {
        Op::New { kind, value, .. } => {
            let mut out = Map::new();
            out.insert("op".into(), json!(format!("new_{}", kind.name())));
            if let Some(value) = value {
                out.insert("value".into(), value.clone());
            }
            Value::Object(out)
        }
        Op::InsVal { obj, val, .. } => json!({
            "op": "ins_val",
            "obj": encode_ts(*obj),
            "value": encode_ts(*val),
        }),
        Op::InsObj { obj, key, child, .. } => json!({
            "op": "ins_obj",
            "obj": encode_ts(*obj),
            "key": key,
            "value": encode_ts(*child),
        }),
        Op::InsArr {
            obj, after, data, ..
        } => json!({
            "op": "ins_arr",
            "obj": encode_ts(*obj),
            "after": encode_ts(*after),
            "values": data.iter().map(|id| encode_ts(*id)).collect::<Vec<_>>(),
        }),
        Op::InsStr {
            obj, after, data, ..
        } => json!({
            "op": "ins_str",
            "obj": encode_ts(*obj),
            "after": encode_ts(*after),
            "value": data,
        }),
        Op::Set { obj, value, .. } => json!({
            "op": "set",
            "obj": encode_ts(*obj),
            "value": value,
        }),
        Op::DelKey { obj, key, .. } => json!({
            "op": "del_key",
            "obj": encode_ts(*obj),
            "key": key,
        }),
        Op::Del { obj, what, .. } => json!({
            "op": "del",
            "obj": encode_ts(*obj),
            "what": what.iter().map(encode_tss).collect::<Vec<_>>(),
        }),
        Op::Nop { len, .. } => {
            if *len > 1 {
                json!({"op": "nop", "len": len})
            } else {
                json!({"op": "nop"})
            }
        }
    }
}

/// Decodes a verbose JSON value into a patch.
pub fn decode(data: &Value) -> Result<Patch, CodecError> {
    let obj = data
        .as_object()
        .ok_or(CodecError::Malformed("expected a patch object"))?;
    let id = decode_ts(obj.get("id").ok_or(CodecError::Malformed("missing patch id"))?)?;
    let meta = obj.get("meta").cloned();
    let items = obj
        .get("ops")
        .and_then(Value::as_array)
        .ok_or(CodecError::Malformed("missing ops array"))?;

    let mut ops = Vec::with_capacity(items.len());
    let mut next = id.counter;
    for item in items {
        let op = decode_op(item, ts(id.sid, next))?;
        next += op.span();
        ops.push(op);
    }
    Ok(Patch { ops, meta })
}

fn decode_ts(value: &Value) -> Result<Ts, CodecError> {
    let pair = value
        .as_array()
        .filter(|a| a.len() == 2)
        .ok_or(CodecError::Malformed("id must be [session, counter]"))?;
    let sid = decode_sid(&pair[0])?;
    let counter = pair[1]
        .as_u64()
        .ok_or(CodecError::Malformed("id counter must be an integer"))?;
    Ok(ts(sid, counter))
}

fn decode_tss(value: &Value) -> Result<Tss, CodecError> {
    let triple = value
        .as_array()
        .filter(|a| a.len() == 3)
        .ok_or(CodecError::Malformed("span must be [session, counter, span]"))?;
    let sid = decode_sid(&triple[0])?;
    let counter = triple[1]
        .as_u64()
        .ok_or(CodecError::Malformed("span counter must be an integer"))?;
    let span = triple[2]
        .as_u64()
        .ok_or(CodecError::Malformed("span length must be an integer"))?;
    Ok(tss(sid, counter, span))
}

fn decode_sid(value: &Value) -> Result<SessionId, CodecError> {
    let text = value.as_str().ok_or(CodecError::BadSessionId)?;
    let uuid = Uuid::parse_str(text).map_err(|_| CodecError::BadSessionId)?;
    Ok(SessionId(uuid))
}

fn decode_op(value: &Value, id: Ts) -> Result<Op, CodecError> {
    let map = value
        .as_object()
        .ok_or(CodecError::Malformed("op must be an object"))?;
    let tag = map
        .get("op")
        .and_then(Value::as_str)
        .ok_or(CodecError::Malformed("missing op tag"))?;

    if let Some(kind_name) = tag.strip_prefix("new_") {
        let kind =
            NodeKind::from_name(kind_name).ok_or(CodecError::Malformed("unknown op tag"))?;
        return Ok(Op::New {
            id,
            kind,
            value: map.get("value").cloned(),
        });
    }

    Ok(match tag {
        "ins_val" => Op::InsVal {
            id,
            obj: field_ts(map, "obj")?,
            val: field_ts(map, "value")?,
        },
        "ins_obj" => Op::InsObj {
            id,
            obj: field_ts(map, "obj")?,
            key: field_str(map, "key")?,
            child: field_ts(map, "value")?,
        },
        "ins_arr" => {
            let items = map
                .get("values")
                .and_then(Value::as_array)
                .ok_or(CodecError::Malformed("ins_arr without values"))?;
            if items.is_empty() {
                return Err(CodecError::Malformed("empty element insert"));
            }
            Op::InsArr {
                id,
                obj: field_ts(map, "obj")?,
                after: field_ts(map, "after")?,
                data: items.iter().map(decode_ts).collect::<Result<_, _>>()?,
            }
        }
        "ins_str" => {
            let data = field_str(map, "value")?;
            if data.is_empty() {
                return Err(CodecError::Malformed("empty string insert"));
            }
            Op::InsStr {
                id,
                obj: field_ts(map, "obj")?,
                after: field_ts(map, "after")?,
                data,
            }
        }
        "set" => Op::Set {
            id,
            obj: field_ts(map, "obj")?,
            value: map
                .get("value")
                .cloned()
                .ok_or(CodecError::Malformed("set without value"))?,
        },
        "del_key" => Op::DelKey {
            id,
            obj: field_ts(map, "obj")?,
            key: field_str(map, "key")?,
        },
        "del" => {
            let spans = map
                .get("what")
                .and_then(Value::as_array)
                .ok_or(CodecError::Malformed("del without spans"))?;
            Op::Del {
                id,
                obj: field_ts(map, "obj")?,
                what: spans.iter().map(decode_tss).collect::<Result<_, _>>()?,
            }
        }
        "nop" => {
            let len = match map.get("len") {
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
        _ => return Err(CodecError::Malformed("unknown op tag")),
    })
}

fn field_ts(map: &Map<String, Value>, name: &'static str) -> Result<Ts, CodecError> {
    decode_ts(map.get(name).ok_or(CodecError::Malformed("missing id field"))?)
}

fn field_str(map: &Map<String, Value>, name: &'static str) -> Result<String, CodecError> {
    Ok(map
        .get(name)
        .and_then(Value::as_str)
        .ok_or(CodecError::Malformed("missing string field"))?
        .to_string())
}
