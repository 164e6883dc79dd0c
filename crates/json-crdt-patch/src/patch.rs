//! The patch: an ordered list of operations sharing one originating session.
//!
//! A patch is the unit of transmission and of atomic application. Operations
//! are contiguous in time within the patch's session; the builder inserts
//! explicit no-ops to fill any clock gap, so `next_time` arithmetic over
//! spans is exact.

use thiserror::Error;

use crate::op::{ConValue, Op, Timespan, Timestamp};

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("patch must not be empty")]
    EmptyPatch,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Patch {
    pub ops: Vec<Op>,
}

impl Patch {
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Patch id: the id of the first operation.
    pub fn get_id(&self) -> Option<Timestamp> {
        self.ops.first().map(Op::id)
    }

    /// Total number of logical ids consumed by this patch.
    pub fn span(&self) -> u64 {
        self.ops.iter().map(Op::span).sum()
    }

    /// First id past the end of the patch, `0` for an empty patch.
    pub fn next_time(&self) -> u64 {
        match self.ops.last() {
            Some(op) => op.id().time + op.span(),
            None => 0,
        }
    }

    /// Produces a new patch with every id and every reference passed through
    /// `map`. The mapping must be injective and order-preserving within the
    /// rebased session or causal ordering breaks; foreign references are the
    /// caller's responsibility to leave intact.
    pub fn rewrite_time<F>(&self, mut map: F) -> Patch
    where
        F: FnMut(Timestamp) -> Timestamp,
    {
        let ops = self.ops.iter().map(|op| rewrite_op(op, &mut map)).collect();
        Patch { ops }
    }

    /// Rewrites the patch onto a new time baseline, typically when a
    /// client-authored patch is accepted and assigned authoritative server
    /// time. Ids in the patch's own session at or after `transform_after`
    /// (default: the patch start) are shifted; everything else is a foreign
    /// reference and is left unchanged.
    pub fn rebase(&self, new_time: u64, transform_after: Option<u64>) -> Result<Patch, PatchError> {
        let id = self.get_id().ok_or(PatchError::EmptyPatch)?;
        let patch_sid = id.sid;
        let patch_start = id.time;
        let horizon = transform_after.unwrap_or(patch_start);
        if patch_start == new_time {
            return Ok(self.clone());
        }
        let delta = new_time as i128 - patch_start as i128;
        Ok(self.rewrite_time(|ts| {
            if ts.sid != patch_sid || ts.time < horizon {
                return ts;
            }
            let time = (ts.time as i128 + delta).max(0) as u64;
            Timestamp { sid: ts.sid, time }
        }))
    }
}

fn rewrite_op<F>(op: &Op, map: &mut F) -> Op
where
    F: FnMut(Timestamp) -> Timestamp,
{
    match op {
        Op::MakeObject { id } => Op::MakeObject { id: map(*id) },
        Op::MakeArray { id } => Op::MakeArray { id: map(*id) },
        Op::MakeString { id } => Op::MakeString { id: map(*id) },
        Op::MakeNumber { id } => Op::MakeNumber { id: map(*id) },
        Op::MakeBinary { id } => Op::MakeBinary { id: map(*id) },
        Op::MakeTuple { id } => Op::MakeTuple { id: map(*id) },
        Op::MakeConstant { id, value } => Op::MakeConstant {
            id: map(*id),
            value: match value {
                ConValue::Ref(ts) => ConValue::Ref(map(*ts)),
                other => other.clone(),
            },
        },
        Op::MakeValue { id, value } => Op::MakeValue {
            id: map(*id),
            value: value.clone(),
        },
        Op::SetObjectKeys { id, obj, tuples } => Op::SetObjectKeys {
            id: map(*id),
            obj: map(*obj),
            tuples: tuples.iter().map(|(k, v)| (k.clone(), map(*v))).collect(),
        },
        Op::SetNumber { id, obj, value } => Op::SetNumber {
            id: map(*id),
            obj: map(*obj),
            value: *value,
        },
        Op::SetValue { id, obj, val } => Op::SetValue {
            id: map(*id),
            obj: map(*obj),
            val: map(*val),
        },
        Op::InsertStringSubstring {
            id,
            obj,
            after,
            data,
        } => Op::InsertStringSubstring {
            id: map(*id),
            obj: map(*obj),
            after: map(*after),
            data: data.clone(),
        },
        Op::InsertBinaryData {
            id,
            obj,
            after,
            data,
        } => Op::InsertBinaryData {
            id: map(*id),
            obj: map(*obj),
            after: map(*after),
            data: data.clone(),
        },
        Op::InsertArrayElements {
            id,
            obj,
            after,
            elements,
        } => Op::InsertArrayElements {
            id: map(*id),
            obj: map(*obj),
            after: map(*after),
            elements: elements.iter().map(|ts| map(*ts)).collect(),
        },
        Op::Delete { id, obj, what } => Op::Delete {
            id: map(*id),
            obj: map(*obj),
            what: what
                .iter()
                .map(|span| {
                    let ts = map(span.id());
                    Timespan::new(ts.sid, ts.time, span.span)
                })
                .collect(),
        },
        Op::Noop { id, len } => Op::Noop {
            id: map(*id),
            len: *len,
        },
    }
}
