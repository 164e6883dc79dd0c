//! Fixed-layout binary patch codec.
//!
//! Layout: `sid: u32 LE`, `time: u32 LE`, then one opcode byte per
//! operation followed by that operation's fields. Timestamps are 8 bytes
//! (`u32 LE` sid + `u32 LE` time), strings and byte arrays are `vu29`
//! length-prefixed, numeric literals are IEEE-754 doubles (LE), arbitrary
//! constant/value literals are CBOR. Operation ids are implicit: the decoder
//! reconstructs them by accumulating spans from the header time.
//!
//! `vu29`: 7 data bits per byte, continuation in the top bit, at most 4
//! bytes; a continuation bit on the 4th byte is a protocol violation.

use std::io::Cursor as IoCursor;

use serde_json::Value;

use crate::op::{opcode, ConValue, Op, Timespan, Timestamp};
use crate::patch::Patch;
use crate::ORIGIN;

#[derive(Debug, thiserror::Error)]
pub enum BinaryCodecError {
    #[error("patch must not be empty")]
    EmptyPatch,
    #[error("unknown binary opcode: {0}")]
    UnknownOpcode(u8),
    #[error("invalid binary operation")]
    InvalidOperation,
    #[error("truncated binary patch")]
    TruncatedInput,
    #[error("malformed varuint")]
    MalformedVarUint,
    #[error("varuint value out of range")]
    VarUintOverflow,
    #[error("timestamp does not fit binary layout")]
    TimestampOverflow,
    #[error("invalid cbor payload")]
    InvalidCbor,
    #[error("invalid utf-8 string payload")]
    InvalidUtf8,
}

const VU29_MAX: u64 = (1 << 28) - 1;

const CONST_FLAG_JSON: u8 = 0;
const CONST_FLAG_REF: u8 = 1;
const CONST_FLAG_UNDEF: u8 = 2;

struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, b: u8) {
        self.bytes.push(b);
    }

    fn u32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn ts(&mut self, ts: Timestamp) -> Result<(), BinaryCodecError> {
        let sid = u32::try_from(ts.sid).map_err(|_| BinaryCodecError::TimestampOverflow)?;
        let time = u32::try_from(ts.time).map_err(|_| BinaryCodecError::TimestampOverflow)?;
        self.u32(sid);
        self.u32(time);
        Ok(())
    }

    fn vu29(&mut self, value: u64) -> Result<(), BinaryCodecError> {
        if value > VU29_MAX {
            return Err(BinaryCodecError::VarUintOverflow);
        }
        let mut value = value as u32;
        loop {
            let b = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.bytes.push(b);
                return Ok(());
            }
            self.bytes.push(b | 0x80);
        }
    }

    fn f64(&mut self, v: f64) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn str(&mut self, s: &str) -> Result<(), BinaryCodecError> {
        self.vu29(s.len() as u64)?;
        self.bytes.extend_from_slice(s.as_bytes());
        Ok(())
    }

    fn bin(&mut self, data: &[u8]) -> Result<(), BinaryCodecError> {
        self.vu29(data.len() as u64)?;
        self.bytes.extend_from_slice(data);
        Ok(())
    }

    fn cbor(&mut self, value: &Value) -> Result<(), BinaryCodecError> {
        ciborium::ser::into_writer(value, &mut self.bytes)
            .map_err(|_| BinaryCodecError::InvalidCbor)
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_eof(&self) -> bool {
        self.pos == self.data.len()
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn u8(&mut self) -> Result<u8, BinaryCodecError> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or(BinaryCodecError::TruncatedInput)?;
        self.pos += 1;
        Ok(b)
    }

    fn u32(&mut self) -> Result<u32, BinaryCodecError> {
        let end = self
            .pos
            .checked_add(4)
            .filter(|end| *end <= self.data.len())
            .ok_or(BinaryCodecError::TruncatedInput)?;
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(u32::from_le_bytes(buf))
    }

    fn ts(&mut self) -> Result<Timestamp, BinaryCodecError> {
        let sid = self.u32()? as u64;
        let time = self.u32()? as u64;
        Ok(Timestamp { sid, time })
    }

    fn vu29(&mut self) -> Result<u64, BinaryCodecError> {
        let mut result: u32 = 0;
        for i in 0..4 {
            let b = self.u8()?;
            result |= ((b & 0x7f) as u32) << (7 * i);
            if b & 0x80 == 0 {
                return Ok(result as u64);
            }
            if i == 3 {
                return Err(BinaryCodecError::MalformedVarUint);
            }
        }
        Err(BinaryCodecError::MalformedVarUint)
    }

    fn f64(&mut self) -> Result<f64, BinaryCodecError> {
        let end = self
            .pos
            .checked_add(8)
            .filter(|end| *end <= self.data.len())
            .ok_or(BinaryCodecError::TruncatedInput)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(f64::from_le_bytes(buf))
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], BinaryCodecError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or(BinaryCodecError::TruncatedInput)?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn str(&mut self) -> Result<String, BinaryCodecError> {
        let len = self.vu29()? as usize;
        let bytes = self.bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| BinaryCodecError::InvalidUtf8)
    }

    fn cbor(&mut self) -> Result<Value, BinaryCodecError> {
        let mut cursor = IoCursor::new(&self.data[self.pos..]);
        let value: Value = ciborium::de::from_reader(&mut cursor)
            .map_err(|_| BinaryCodecError::InvalidCbor)?;
        self.pos += cursor.position() as usize;
        Ok(value)
    }
}

pub fn encode_patch_binary(patch: &Patch) -> Result<Vec<u8>, BinaryCodecError> {
    let id = patch.get_id().ok_or(BinaryCodecError::EmptyPatch)?;
    let mut w = Writer {
        bytes: Vec::with_capacity(16 + patch.ops.len() * 8),
    };
    w.ts(id)?;

    for op in &patch.ops {
        match op {
            Op::MakeObject { .. } => w.u8(opcode::OBJ),
            Op::MakeArray { .. } => w.u8(opcode::ARR),
            Op::MakeString { .. } => w.u8(opcode::STR),
            Op::MakeNumber { .. } => w.u8(opcode::NUM),
            Op::MakeBinary { .. } => w.u8(opcode::BIN),
            Op::MakeTuple { .. } => w.u8(opcode::TUP),
            Op::MakeConstant { value, .. } => {
                w.u8(opcode::CONST);
                match value {
                    ConValue::Json(v) => {
                        w.u8(CONST_FLAG_JSON);
                        w.cbor(v)?;
                    }
                    ConValue::Ref(ts) => {
                        w.u8(CONST_FLAG_REF);
                        w.ts(*ts)?;
                    }
                    ConValue::Undef => w.u8(CONST_FLAG_UNDEF),
                }
            }
            Op::MakeValue { value, .. } => {
                w.u8(opcode::VAL);
                w.cbor(value)?;
            }
            Op::SetObjectKeys { obj, tuples, .. } => {
                w.u8(opcode::OBJ_SET);
                w.ts(*obj)?;
                w.vu29(tuples.len() as u64)?;
                for (key, value_id) in tuples {
                    w.str(key)?;
                    w.ts(*value_id)?;
                }
            }
            Op::SetNumber { obj, value, .. } => {
                w.u8(opcode::NUM_SET);
                w.ts(*obj)?;
                w.f64(*value);
            }
            Op::SetValue { obj, val, .. } => {
                w.u8(opcode::VAL_SET);
                w.ts(*obj)?;
                w.ts(*val)?;
            }
            Op::InsertStringSubstring {
                obj, after, data, ..
            } => {
                w.u8(opcode::STR_INS);
                w.ts(*obj)?;
                w.ts(*after)?;
                w.str(data)?;
            }
            Op::InsertBinaryData {
                obj, after, data, ..
            } => {
                w.u8(opcode::BIN_INS);
                w.ts(*obj)?;
                w.ts(*after)?;
                w.bin(data)?;
            }
            Op::InsertArrayElements {
                obj,
                after,
                elements,
                ..
            } => {
                w.u8(opcode::ARR_INS);
                w.ts(*obj)?;
                w.ts(*after)?;
                w.vu29(elements.len() as u64)?;
                for ts in elements {
                    w.ts(*ts)?;
                }
            }
            Op::Delete { obj, what, .. } => {
                // Span-1 case gets a dedicated opcode so the common single
                // range never pays for a count byte.
                if what.len() == 1 {
                    w.u8(opcode::DEL_ONE);
                    w.ts(*obj)?;
                    w.ts(what[0].id())?;
                    w.vu29(what[0].span)?;
                } else {
                    w.u8(opcode::DEL);
                    w.ts(*obj)?;
                    w.vu29(what.len() as u64)?;
                    for span in what {
                        w.ts(span.id())?;
                        w.vu29(span.span)?;
                    }
                }
            }
            Op::Noop { len, .. } => {
                if *len > 1 {
                    w.u8(opcode::NOOP);
                    w.vu29(*len)?;
                } else {
                    w.u8(opcode::NOOP_ONE);
                }
            }
        }
    }
    Ok(w.bytes)
}

pub fn decode_patch_binary(data: &[u8]) -> Result<Patch, BinaryCodecError> {
    let mut r = Reader::new(data);
    let header = r.ts()?;
    let sid = header.sid;

    let mut ops = Vec::new();
    let mut op_time = header.time;
    while !r.is_eof() {
        let code = r.u8()?;
        let id = Timestamp { sid, time: op_time };
        let op = match code {
            opcode::OBJ => Op::MakeObject { id },
            opcode::ARR => Op::MakeArray { id },
            opcode::STR => Op::MakeString { id },
            opcode::NUM => Op::MakeNumber { id },
            opcode::BIN => Op::MakeBinary { id },
            opcode::TUP => Op::MakeTuple { id },
            opcode::CONST => {
                let value = match r.u8()? {
                    CONST_FLAG_JSON => ConValue::Json(r.cbor()?),
                    CONST_FLAG_REF => ConValue::Ref(r.ts()?),
                    CONST_FLAG_UNDEF => ConValue::Undef,
                    other => return Err(BinaryCodecError::UnknownOpcode(other)),
                };
                Op::MakeConstant { id, value }
            }
            opcode::VAL => Op::MakeValue {
                id,
                value: r.cbor()?,
            },
            opcode::OBJ_SET => {
                let obj = r.ts()?;
                let count = r.vu29()?;
                if count == 0 {
                    return Err(BinaryCodecError::InvalidOperation);
                }
                // The wire count is untrusted; cap the pre-allocation at what
                // the buffer could possibly hold.
                let mut tuples = Vec::with_capacity((count as usize).min(r.remaining()));
                for _ in 0..count {
                    let key = r.str()?;
                    let value_id = r.ts()?;
                    tuples.push((key, value_id));
                }
                Op::SetObjectKeys { id, obj, tuples }
            }
            opcode::NUM_SET => Op::SetNumber {
                id,
                obj: r.ts()?,
                value: r.f64()?,
            },
            opcode::VAL_SET => Op::SetValue {
                id,
                obj: r.ts()?,
                val: r.ts()?,
            },
            // Legacy root form.
            opcode::ROOT => Op::SetValue {
                id,
                obj: ORIGIN,
                val: r.ts()?,
            },
            opcode::STR_INS => {
                let obj = r.ts()?;
                let after = r.ts()?;
                let data = r.str()?;
                Op::InsertStringSubstring {
                    id,
                    obj,
                    after,
                    data,
                }
            }
            opcode::BIN_INS => {
                let obj = r.ts()?;
                let after = r.ts()?;
                let len = r.vu29()? as usize;
                let data = r.bytes(len)?.to_vec();
                Op::InsertBinaryData {
                    id,
                    obj,
                    after,
                    data,
                }
            }
            opcode::ARR_INS => {
                let obj = r.ts()?;
                let after = r.ts()?;
                let count = r.vu29()?;
                if count == 0 {
                    return Err(BinaryCodecError::InvalidOperation);
                }
                let mut elements = Vec::with_capacity((count as usize).min(r.remaining()));
                for _ in 0..count {
                    elements.push(r.ts()?);
                }
                Op::InsertArrayElements {
                    id,
                    obj,
                    after,
                    elements,
                }
            }
            opcode::DEL_ONE => {
                let obj = r.ts()?;
                let ts = r.ts()?;
                let span = r.vu29()?;
                Op::Delete {
                    id,
                    obj,
                    what: vec![Timespan::new(ts.sid, ts.time, span)],
                }
            }
            opcode::DEL => {
                let obj = r.ts()?;
                let count = r.vu29()?;
                if count == 0 {
                    return Err(BinaryCodecError::InvalidOperation);
                }
                let mut what = Vec::with_capacity((count as usize).min(r.remaining()));
                for _ in 0..count {
                    let ts = r.ts()?;
                    let span = r.vu29()?;
                    what.push(Timespan::new(ts.sid, ts.time, span));
                }
                Op::Delete { id, obj, what }
            }
            opcode::NOOP_ONE => Op::Noop { id, len: 1 },
            opcode::NOOP => Op::Noop {
                id,
                len: r.vu29()?,
            },
            other => return Err(BinaryCodecError::UnknownOpcode(other)),
        };
        op_time += op.span();
        ops.push(op);
    }

    if ops.is_empty() {
        return Err(BinaryCodecError::EmptyPatch);
    }
    Ok(Patch { ops })
}
