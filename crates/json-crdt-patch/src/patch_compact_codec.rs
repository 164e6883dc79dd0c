//! Dense array patch codec.
//!
//! Form: one flat array `[sid, time, opcode, fields..., opcode, fields...]`
//! with no field names. Timestamp arguments referencing the patch's own
//! session at or after the patch start collapse to a single negative
//! integer (`start - time - 1`); all other timestamps are two consecutive
//! non-negative integers `sid, time`. Decoding resolves the two forms into
//! concrete [`Timestamp`]s immediately, so the signed-integer trick never
//! leaks past this module.

use base64::Engine;
use serde_json::Value;

use crate::op::{opcode, ConValue, Op, Timespan, Timestamp};
use crate::patch::Patch;
use crate::ORIGIN;

#[derive(Debug, thiserror::Error)]
pub enum CompactCodecError {
    #[error("patch must not be empty")]
    EmptyPatch,
    #[error("invalid compact header")]
    InvalidHeader,
    #[error("invalid compact operation")]
    InvalidOperation,
    #[error("unknown compact opcode: {0}")]
    UnknownOpcode(u64),
    #[error("invalid base64 payload")]
    InvalidBase64,
}

const CONST_FLAG_JSON: u64 = 0;
const CONST_FLAG_REF: u64 = 1;
const CONST_FLAG_UNDEF: u64 = 2;

/// A timestamp field as it appears on the wire, before resolution against
/// the patch header.
enum CompactTs {
    Relative(u64),
    Absolute(u64, u64),
}

impl CompactTs {
    fn resolve(self, patch_sid: u64, patch_start: u64) -> Result<Timestamp, CompactCodecError> {
        match self {
            CompactTs::Relative(offset) => {
                let time = patch_start
                    .checked_add(offset)
                    .ok_or(CompactCodecError::InvalidOperation)?;
                Ok(Timestamp {
                    sid: patch_sid,
                    time,
                })
            }
            CompactTs::Absolute(sid, time) => Ok(Timestamp { sid, time }),
        }
    }
}

fn push_ts(out: &mut Vec<Value>, patch_sid: u64, patch_start: u64, ts: Timestamp) {
    if ts.sid == patch_sid && ts.time >= patch_start {
        let rel = patch_start as i128 - ts.time as i128 - 1;
        out.push(Value::from(rel as i64));
    } else {
        out.push(Value::from(ts.sid));
        out.push(Value::from(ts.time));
    }
}

struct Cursor<'a> {
    items: &'a [Value],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(items: &'a [Value]) -> Self {
        Self { items, pos: 0 }
    }

    fn done(&self) -> bool {
        self.pos == self.items.len()
    }

    fn next(&mut self) -> Result<&'a Value, CompactCodecError> {
        let v = self
            .items
            .get(self.pos)
            .ok_or(CompactCodecError::InvalidOperation)?;
        self.pos += 1;
        Ok(v)
    }

    fn next_u64(&mut self) -> Result<u64, CompactCodecError> {
        self.next()?
            .as_u64()
            .ok_or(CompactCodecError::InvalidOperation)
    }

    fn next_str(&mut self) -> Result<&'a str, CompactCodecError> {
        self.next()?
            .as_str()
            .ok_or(CompactCodecError::InvalidOperation)
    }

    fn next_array(&mut self) -> Result<&'a [Value], CompactCodecError> {
        self.next()?
            .as_array()
            .map(Vec::as_slice)
            .ok_or(CompactCodecError::InvalidOperation)
    }

    fn next_ts(&mut self) -> Result<CompactTs, CompactCodecError> {
        let v = self.next()?;
        if let Some(x) = v.as_i64() {
            // `i64::MIN` must not reach a bare negation.
            if x < 0 {
                return Ok(CompactTs::Relative(x.unsigned_abs() - 1));
            }
        }
        let sid = v.as_u64().ok_or(CompactCodecError::InvalidOperation)?;
        let time = self.next_u64()?;
        Ok(CompactTs::Absolute(sid, time))
    }
}

pub fn encode_patch_compact(patch: &Patch) -> Result<Value, CompactCodecError> {
    let id = patch.get_id().ok_or(CompactCodecError::EmptyPatch)?;
    let sid = id.sid;
    let start = id.time;
    let mut out: Vec<Value> = vec![Value::from(sid), Value::from(start)];

    for op in &patch.ops {
        match op {
            Op::MakeObject { .. } => out.push(Value::from(opcode::OBJ)),
            Op::MakeArray { .. } => out.push(Value::from(opcode::ARR)),
            Op::MakeString { .. } => out.push(Value::from(opcode::STR)),
            Op::MakeNumber { .. } => out.push(Value::from(opcode::NUM)),
            Op::MakeBinary { .. } => out.push(Value::from(opcode::BIN)),
            Op::MakeTuple { .. } => out.push(Value::from(opcode::TUP)),
            Op::MakeConstant { value, .. } => {
                out.push(Value::from(opcode::CONST));
                match value {
                    ConValue::Json(v) => {
                        out.push(Value::from(CONST_FLAG_JSON));
                        out.push(v.clone());
                    }
                    ConValue::Ref(ts) => {
                        out.push(Value::from(CONST_FLAG_REF));
                        push_ts(&mut out, sid, start, *ts);
                    }
                    ConValue::Undef => out.push(Value::from(CONST_FLAG_UNDEF)),
                }
            }
            Op::MakeValue { value, .. } => {
                out.push(Value::from(opcode::VAL));
                out.push(value.clone());
            }
            Op::SetObjectKeys { obj, tuples, .. } => {
                out.push(Value::from(opcode::OBJ_SET));
                push_ts(&mut out, sid, start, *obj);
                let mut flat = Vec::with_capacity(tuples.len() * 2);
                for (key, value_id) in tuples {
                    flat.push(Value::String(key.clone()));
                    push_ts(&mut flat, sid, start, *value_id);
                }
                out.push(Value::Array(flat));
            }
            Op::SetNumber { obj, value, .. } => {
                // Non-finite doubles have no JSON form and would not decode.
                if !value.is_finite() {
                    return Err(CompactCodecError::InvalidOperation);
                }
                out.push(Value::from(opcode::NUM_SET));
                push_ts(&mut out, sid, start, *obj);
                out.push(Value::from(*value));
            }
            Op::SetValue { obj, val, .. } => {
                out.push(Value::from(opcode::VAL_SET));
                push_ts(&mut out, sid, start, *obj);
                push_ts(&mut out, sid, start, *val);
            }
            Op::InsertStringSubstring {
                obj, after, data, ..
            } => {
                out.push(Value::from(opcode::STR_INS));
                push_ts(&mut out, sid, start, *obj);
                push_ts(&mut out, sid, start, *after);
                out.push(Value::String(data.clone()));
            }
            Op::InsertBinaryData {
                obj, after, data, ..
            } => {
                out.push(Value::from(opcode::BIN_INS));
                push_ts(&mut out, sid, start, *obj);
                push_ts(&mut out, sid, start, *after);
                out.push(Value::String(
                    base64::engine::general_purpose::STANDARD.encode(data),
                ));
            }
            Op::InsertArrayElements {
                obj,
                after,
                elements,
                ..
            } => {
                out.push(Value::from(opcode::ARR_INS));
                push_ts(&mut out, sid, start, *obj);
                push_ts(&mut out, sid, start, *after);
                let mut flat = Vec::with_capacity(elements.len());
                for ts in elements {
                    push_ts(&mut flat, sid, start, *ts);
                }
                out.push(Value::Array(flat));
            }
            Op::Delete { obj, what, .. } => {
                if what.len() == 1 {
                    out.push(Value::from(opcode::DEL_ONE));
                    push_ts(&mut out, sid, start, *obj);
                    push_ts(&mut out, sid, start, what[0].id());
                    out.push(Value::from(what[0].span));
                } else {
                    out.push(Value::from(opcode::DEL));
                    push_ts(&mut out, sid, start, *obj);
                    let mut flat = Vec::new();
                    for span in what {
                        push_ts(&mut flat, sid, start, span.id());
                        flat.push(Value::from(span.span));
                    }
                    out.push(Value::Array(flat));
                }
            }
            Op::Noop { len, .. } => {
                if *len > 1 {
                    out.push(Value::from(opcode::NOOP));
                    out.push(Value::from(*len));
                } else {
                    out.push(Value::from(opcode::NOOP_ONE));
                }
            }
        }
    }
    Ok(Value::Array(out))
}

pub fn decode_patch_compact(value: &Value) -> Result<Patch, CompactCodecError> {
    let items = value.as_array().ok_or(CompactCodecError::InvalidHeader)?;
    if items.len() < 2 {
        return Err(CompactCodecError::InvalidHeader);
    }
    let sid = items[0].as_u64().ok_or(CompactCodecError::InvalidHeader)?;
    let start = items[1].as_u64().ok_or(CompactCodecError::InvalidHeader)?;

    let mut cur = Cursor::new(&items[2..]);
    let mut ops = Vec::new();
    let mut op_time = start;
    while !cur.done() {
        let code = cur.next_u64()?;
        if code > opcode::TUP as u64 {
            return Err(CompactCodecError::UnknownOpcode(code));
        }
        let id = Timestamp { sid, time: op_time };
        let op = match code as u8 {
            opcode::OBJ => Op::MakeObject { id },
            opcode::ARR => Op::MakeArray { id },
            opcode::STR => Op::MakeString { id },
            opcode::NUM => Op::MakeNumber { id },
            opcode::BIN => Op::MakeBinary { id },
            opcode::TUP => Op::MakeTuple { id },
            opcode::CONST => {
                let value = match cur.next_u64()? {
                    CONST_FLAG_JSON => ConValue::Json(cur.next()?.clone()),
                    CONST_FLAG_REF => ConValue::Ref(cur.next_ts()?.resolve(sid, start)?),
                    CONST_FLAG_UNDEF => ConValue::Undef,
                    _ => return Err(CompactCodecError::InvalidOperation),
                };
                Op::MakeConstant { id, value }
            }
            opcode::VAL => Op::MakeValue {
                id,
                value: cur.next()?.clone(),
            },
            opcode::OBJ_SET => {
                let obj = cur.next_ts()?.resolve(sid, start)?;
                let mut inner = Cursor::new(cur.next_array()?);
                let mut tuples = Vec::new();
                while !inner.done() {
                    let key = inner.next_str()?.to_string();
                    let value_id = inner.next_ts()?.resolve(sid, start)?;
                    tuples.push((key, value_id));
                }
                if tuples.is_empty() {
                    return Err(CompactCodecError::InvalidOperation);
                }
                Op::SetObjectKeys { id, obj, tuples }
            }
            opcode::NUM_SET => Op::SetNumber {
                id,
                obj: cur.next_ts()?.resolve(sid, start)?,
                value: cur
                    .next()?
                    .as_f64()
                    .ok_or(CompactCodecError::InvalidOperation)?,
            },
            opcode::VAL_SET => Op::SetValue {
                id,
                obj: cur.next_ts()?.resolve(sid, start)?,
                val: cur.next_ts()?.resolve(sid, start)?,
            },
            // Legacy root form.
            opcode::ROOT => Op::SetValue {
                id,
                obj: ORIGIN,
                val: cur.next_ts()?.resolve(sid, start)?,
            },
            opcode::STR_INS => Op::InsertStringSubstring {
                id,
                obj: cur.next_ts()?.resolve(sid, start)?,
                after: cur.next_ts()?.resolve(sid, start)?,
                data: cur.next_str()?.to_string(),
            },
            opcode::BIN_INS => Op::InsertBinaryData {
                id,
                obj: cur.next_ts()?.resolve(sid, start)?,
                after: cur.next_ts()?.resolve(sid, start)?,
                data: base64::engine::general_purpose::STANDARD
                    .decode(cur.next_str()?)
                    .map_err(|_| CompactCodecError::InvalidBase64)?,
            },
            opcode::ARR_INS => {
                let obj = cur.next_ts()?.resolve(sid, start)?;
                let after = cur.next_ts()?.resolve(sid, start)?;
                let mut inner = Cursor::new(cur.next_array()?);
                let mut elements = Vec::new();
                while !inner.done() {
                    elements.push(inner.next_ts()?.resolve(sid, start)?);
                }
                if elements.is_empty() {
                    return Err(CompactCodecError::InvalidOperation);
                }
                Op::InsertArrayElements {
                    id,
                    obj,
                    after,
                    elements,
                }
            }
            opcode::DEL_ONE => {
                let obj = cur.next_ts()?.resolve(sid, start)?;
                let ts = cur.next_ts()?.resolve(sid, start)?;
                let span = cur.next_u64()?;
                Op::Delete {
                    id,
                    obj,
                    what: vec![Timespan::new(ts.sid, ts.time, span)],
                }
            }
            opcode::DEL => {
                let obj = cur.next_ts()?.resolve(sid, start)?;
                let mut inner = Cursor::new(cur.next_array()?);
                let mut what = Vec::new();
                while !inner.done() {
                    let ts = inner.next_ts()?.resolve(sid, start)?;
                    let span = inner.next_u64()?;
                    what.push(Timespan::new(ts.sid, ts.time, span));
                }
                if what.is_empty() {
                    return Err(CompactCodecError::InvalidOperation);
                }
                Op::Delete { id, obj, what }
            }
            opcode::NOOP_ONE => Op::Noop { id, len: 1 },
            opcode::NOOP => Op::Noop {
                id,
                len: cur.next_u64()?,
            },
            _ => return Err(CompactCodecError::UnknownOpcode(code)),
        };
        op_time = op_time
            .checked_add(op.span())
            .ok_or(CompactCodecError::InvalidOperation)?;
        ops.push(op);
    }

    if ops.is_empty() {
        return Err(CompactCodecError::EmptyPatch);
    }
    Ok(Patch { ops })
}
