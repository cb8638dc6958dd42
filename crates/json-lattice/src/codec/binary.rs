//! Binary form: the densest of the wire encodings.
//!
//! Layout:
//!
//! ```text
//! patch    = sid{16} vu57(counter) meta vu57(op-count) op*
//! meta     = 0xF7 | cbor            (0xF7 is the CBOR "undefined" byte)
//! op       = octet payload
//! octet    = opcode << 3 | inline   (inline carries small lengths, 0 = vu57 follows)
//! id       = b1vu56(0, counter)                   same session as the patch
//!          | b1vu56(1, counter) sid{16}           foreign session
//! ```
//!
//! `vu57` packs up to 57 bits as little-endian 7-bit groups with a
//! continuation bit, the eighth byte taken whole. `b1vu56` is the same with
//! one bit reserved up front, so the first byte carries the flag, a
//! continuation bit and 6 payload bits. Constants, keys and meta travel as
//! CBOR segments.
//!
//! Decoding is strict: truncated input, unknown opcodes, invalid UTF-8 and
//! trailing garbage are all errors, and no buffer is sized from a wire
//! length before the bytes backing it have been read.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::clock::{ts, tss, SessionId, Ts, ORIGIN};
use crate::patch::op::Op;
use crate::patch::Patch;

use super::{CodecError, Opcode};

/// CBOR simple value "undefined", standing in for an absent meta.
const NO_META: u8 = 0xF7;

// ── Encoding ────────────────────────────────────────────────────────────

/// Encodes a patch into the binary form.
pub fn encode(patch: &Patch) -> Vec<u8> {
    let id = patch.get_id().unwrap_or(ORIGIN);
    let mut w = Writer {
        sid: id.sid,
        out: Vec::new(),
    };
    w.raw(id.sid.as_bytes());
    w.vu57(id.counter);
    match &patch.meta {
        Some(meta) => w.cbor(meta),
        None => w.out.push(NO_META),
    }
    w.vu57(patch.ops.len() as u64);
    for op in &patch.ops {
        w.op(op);
    }
    w.out
}

struct Writer {
    sid: SessionId,
    out: Vec<u8>,
}

impl Writer {
    fn raw(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    fn vu57(&mut self, mut num: u64) {
        for _ in 0..7 {
            if num <= 0x7F {
                self.out.push(num as u8);
                return;
            }
            self.out.push(0x80 | (num & 0x7F) as u8);
            num >>= 7;
        }
        self.out.push(num as u8);
    }

    fn b1vu56(&mut self, flag: bool, mut num: u64) {
        let flag = if flag { 0x80 } else { 0 };
        if num <= 0x3F {
            self.out.push(flag | num as u8);
            return;
        }
        self.out.push(flag | 0x40 | (num & 0x3F) as u8);
        num >>= 6;
        for _ in 0..6 {
            if num <= 0x7F {
                self.out.push(num as u8);
                return;
            }
            self.out.push(0x80 | (num & 0x7F) as u8);
            num >>= 7;
        }
        self.out.push(num as u8);
    }

    fn id(&mut self, id: Ts) {
        if id.sid == self.sid {
            self.b1vu56(false, id.counter);
        } else {
            self.b1vu56(true, id.counter);
            self.raw(id.sid.as_bytes());
        }
    }

    fn cbor<T: Serialize + ?Sized>(&mut self, value: &T) {
        // serde_json values always serialize; Vec writes never fail
        ciborium::ser::into_writer(value, &mut self.out).ok();
    }

    fn octet(&mut self, opcode: Opcode, inline: u8) {
        self.out.push((opcode as u8) << 3 | inline);
    }

    fn length(&mut self, opcode: Opcode, len: u64) {
        if (1..=7).contains(&len) {
            self.octet(opcode, len as u8);
        } else {
            self.octet(opcode, 0);
            self.vu57(len);
        }
    }

    fn op(&mut self, op: &Op) {
        match op {
            Op::New { kind, value, .. } => {
                let opcode = Opcode::for_kind(*kind);
                match value {
                    Some(value) => {
                        self.octet(opcode, 1);
                        self.cbor(value);
                    }
                    None => self.octet(opcode, 0),
                }
            }
            Op::InsVal { obj, val, .. } => {
                self.octet(Opcode::InsVal, 0);
                self.id(*obj);
                self.id(*val);
            }
            Op::InsObj { obj, key, child, .. } => {
                self.octet(Opcode::InsObj, 0);
                self.id(*obj);
                self.cbor(key);
                self.id(*child);
            }
            Op::InsArr {
                obj, after, data, ..
            } => {
                self.length(Opcode::InsArr, data.len() as u64);
                self.id(*obj);
                self.id(*after);
                for element in data {
                    self.id(*element);
                }
            }
            Op::InsStr {
                obj, after, data, ..
            } => {
                self.length(Opcode::InsStr, data.len() as u64);
                self.id(*obj);
                self.id(*after);
                self.raw(data.as_bytes());
            }
            Op::Set { obj, value, .. } => {
                self.octet(Opcode::Set, 0);
                self.id(*obj);
                self.cbor(value);
            }
            Op::DelKey { obj, key, .. } => {
                self.octet(Opcode::DelKey, 0);
                self.id(*obj);
                self.cbor(key);
            }
            Op::Del { obj, what, .. } => {
                self.length(Opcode::Del, what.len() as u64);
                self.id(*obj);
                for span in what {
                    self.id(span.ts());
                    self.vu57(span.span);
                }
            }
            Op::Nop { len, .. } => self.length(Opcode::Nop, *len),
        }
    }
}

// ── Decoding ────────────────────────────────────────────────────────────

/// Decodes the binary form into a patch.
pub fn decode(data: &[u8]) -> Result<Patch, CodecError> {
    let mut r = Reader {
        sid: SessionId::NIL,
        data,
    };
    r.sid = r.sid16()?;
    let counter = r.vu57()?;
    let meta = if r.peek()? == NO_META {
        r.u8()?;
        None
    } else {
        Some(r.cbor::<Value>()?)
    };
    let count = r.vu57()?;

    let mut ops = Vec::new();
    let mut next = counter;
    for _ in 0..count {
        let op = r.op(ts(r.sid, next))?;
        next += op.span();
        ops.push(op);
    }
    if !r.data.is_empty() {
        return Err(CodecError::Malformed("trailing bytes after patch"));
    }
    Ok(Patch { ops, meta })
}

struct Reader<'a> {
    sid: SessionId,
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn peek(&self) -> Result<u8, CodecError> {
        self.data.first().copied().ok_or(CodecError::Truncated)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        let (&byte, rest) = self.data.split_first().ok_or(CodecError::Truncated)?;
        self.data = rest;
        Ok(byte)
    }

    fn raw(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.data.len() < len {
            return Err(CodecError::Truncated);
        }
        let (bytes, rest) = self.data.split_at(len);
        self.data = rest;
        Ok(bytes)
    }

    fn sid16(&mut self) -> Result<SessionId, CodecError> {
        let bytes = self.raw(16)?;
        let mut buf = [0u8; 16];
        buf.copy_from_slice(bytes);
        Ok(SessionId::from_bytes(buf))
    }

    fn vu57(&mut self) -> Result<u64, CodecError> {
        let mut value = 0u64;
        for shift in [0u32, 7, 14, 21, 28, 35, 42] {
            let byte = self.u8()?;
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        let byte = self.u8()?;
        Ok(value | u64::from(byte) << 49)
    }

    fn b1vu56(&mut self) -> Result<(bool, u64), CodecError> {
        let first = self.u8()?;
        let flag = first & 0x80 != 0;
        let mut value = u64::from(first & 0x3F);
        if first & 0x40 == 0 {
            return Ok((flag, value));
        }
        for shift in [6u32, 13, 20, 27, 34, 41] {
            let byte = self.u8()?;
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok((flag, value));
            }
        }
        let byte = self.u8()?;
        Ok((flag, value | u64::from(byte) << 48))
    }

    fn id(&mut self) -> Result<Ts, CodecError> {
        let (foreign, counter) = self.b1vu56()?;
        if foreign {
            let sid = self.sid16()?;
            Ok(ts(sid, counter))
        } else {
            Ok(ts(self.sid, counter))
        }
    }

    fn cbor<T: DeserializeOwned>(&mut self) -> Result<T, CodecError> {
        ciborium::de::from_reader(&mut self.data).map_err(|_| CodecError::Cbor)
    }

    fn length(&mut self, inline: u8) -> Result<u64, CodecError> {
        if inline == 0 {
            self.vu57()
        } else {
            Ok(u64::from(inline))
        }
    }

    fn op(&mut self, id: Ts) -> Result<Op, CodecError> {
        let octet = self.u8()?;
        let inline = octet & 0b111;
        let code = octet >> 3;
        let opcode = Opcode::from_u8(code).ok_or(CodecError::UnknownOpcode(code))?;

        Ok(match opcode {
            Opcode::NewObj
            | Opcode::NewArr
            | Opcode::NewStr
            | Opcode::NewNum
            | Opcode::NewBool
            | Opcode::NewCon
            | Opcode::NewNull => {
                let kind = opcode.kind().ok_or(CodecError::UnknownOpcode(code))?;
                let value = if inline == 1 { Some(self.cbor()?) } else { None };
                Op::New { id, kind, value }
            }
            Opcode::InsVal => Op::InsVal {
                id,
                obj: self.id()?,
                val: self.id()?,
            },
            Opcode::InsObj => Op::InsObj {
                id,
                obj: self.id()?,
                key: self.cbor()?,
                child: self.id()?,
            },
            Opcode::InsArr => {
                let len = self.length(inline)?;
                if len == 0 {
                    return Err(CodecError::Malformed("empty element insert"));
                }
                let obj = self.id()?;
                let after = self.id()?;
                let mut data = Vec::new();
                for _ in 0..len {
                    data.push(self.id()?);
                }
                Op::InsArr {
                    id,
                    obj,
                    after,
                    data,
                }
            }
            Opcode::InsStr => {
                let len = self.length(inline)?;
                if len == 0 {
                    return Err(CodecError::Malformed("empty string insert"));
                }
                let len = usize::try_from(len).map_err(|_| CodecError::Truncated)?;
                let obj = self.id()?;
                let after = self.id()?;
                let bytes = self.raw(len)?;
                let data = std::str::from_utf8(bytes)
                    .map_err(|_| CodecError::Malformed("invalid utf-8"))?
                    .to_string();
                Op::InsStr {
                    id,
                    obj,
                    after,
                    data,
                }
            }
            Opcode::Set => Op::Set {
                id,
                obj: self.id()?,
                value: self.cbor()?,
            },
            Opcode::DelKey => Op::DelKey {
                id,
                obj: self.id()?,
                key: self.cbor()?,
            },
            Opcode::Del => {
                let len = self.length(inline)?;
                let obj = self.id()?;
                let mut what = Vec::new();
                for _ in 0..len {
                    let stamp = self.id()?;
                    let span = self.vu57()?;
                    what.push(tss(stamp.sid, stamp.counter, span));
                }
                Op::Del { id, obj, what }
            }
            Opcode::Nop => {
                let len = self.length(inline)?;
                if len == 0 {
                    return Err(CodecError::Malformed("zero-length nop"));
                }
                Op::Nop { id, len }
            }
        })
    }
}
